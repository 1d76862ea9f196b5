//! AuthBridge Gateway
//!
//! OAuth bridge between MCP clients and upstream providers:
//! - OAuth 2.1 authorization server facing MCP clients (PKCE, DCR, discovery)
//! - Chained consent with Atlassian, Figma and Google
//! - Sealed session bearers carrying the provider tokens
//! - Single-flight provider token refresh
//! - Auth-gated MCP Streamable HTTP endpoint

pub mod config;
pub mod logging;
pub mod mcp;
pub mod oauth;
pub mod server;
pub mod session;

pub use config::{BridgeConfig, ProviderCredentials, ProvidersConfig};
pub use mcp::{BridgeMcpHandler, ToolAuthRequirements};
pub use oauth::{ProviderEndpoints, ProviderRegistry, TokenExchanger};
pub use server::{BridgeState, GatewayServer};
pub use session::{
    AuthContext, AuthContextAccessor, AuthInfo, MemoryOAuthClientProvider, SessionTokenService,
    TokenRefreshOrchestrator,
};
