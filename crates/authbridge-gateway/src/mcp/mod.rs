//! MCP endpoint
//!
//! - `auth_middleware`: bearer verification and the 401 discovery challenge
//! - `handler`: rmcp `ServerHandler` that consumes the auth accessor

pub mod auth_middleware;
pub mod handler;

pub use auth_middleware::{challenge_variant, mcp_auth_middleware, www_authenticate, ChallengeVariant};
pub use handler::{BridgeMcpHandler, ToolAuthRequirements, AUTH_STATUS_TOOL};
