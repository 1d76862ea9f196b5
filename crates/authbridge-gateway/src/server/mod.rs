//! Bridge Server
//!
//! OAuth authorization server facing MCP clients, plus the MCP Streamable
//! HTTP endpoint behind the bearer challenge middleware.

pub mod handlers;
pub mod logging_middleware;
pub mod rate_limit;
mod state;

pub use handlers::{ApiError, AuthorizationStart, TokenResponseBody};
pub use state::{BridgeState, McpSessionBinding};

use std::sync::Arc;
use std::time::Duration;

use authbridge_core::{branding, OAuthClientProvider};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::mcp::{mcp_auth_middleware, BridgeMcpHandler, ToolAuthRequirements};
use crate::oauth::ProviderRegistry;

/// How often expired flow state and idle refresh locks are reaped
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// MCP auth bridge server
///
/// Owns the shared [`BridgeState`]; stores and provider exchangers are
/// injected so tests can swap in mocks.
pub struct GatewayServer {
    state: BridgeState,
    requirements: ToolAuthRequirements,
}

impl GatewayServer {
    pub fn new(
        config: BridgeConfig,
        store: Arc<dyn OAuthClientProvider>,
        registry: ProviderRegistry,
    ) -> anyhow::Result<Self> {
        info!("[Gateway] Initializing...");
        if registry.is_empty() {
            warn!("[Gateway] No upstream providers configured; /authorize will reject every request");
        }
        let state = BridgeState::new(config, store, registry)?;
        Ok(Self {
            state,
            requirements: ToolAuthRequirements::new(),
        })
    }

    /// Provider requirements checked before each tool call
    pub fn with_tool_requirements(mut self, requirements: ToolAuthRequirements) -> Self {
        self.requirements = requirements;
        self
    }

    pub fn state(&self) -> &BridgeState {
        &self.state
    }

    /// Build the Axum router
    pub fn build_router(&self) -> Router {
        let state = self.state.clone();
        let handler = BridgeMcpHandler::new(state.accessor.clone(), self.requirements.clone());

        let mcp_service = StreamableHttpService::new(
            move || {
                debug!("[Gateway] Creating handler instance for MCP session");
                Ok(handler.clone())
            },
            LocalSessionManager::default().into(),
            StreamableHttpServerConfig {
                stateful_mode: true,
                sse_keep_alive: Some(Duration::from_secs(30)),
                sse_retry: Some(Duration::from_secs(3)),
                cancellation_token: CancellationToken::new(),
            },
        );

        let mcp_routes = Router::new()
            .nest_service("/mcp", mcp_service)
            .layer(middleware::from_fn_with_state(state.clone(), mcp_auth_middleware));

        let rate_limiter = state.rate_limiter.clone();

        let mut router = Router::new()
            .route("/health", get(handlers::health))
            .route("/.well-known/oauth-authorization-server", get(handlers::oauth_metadata))
            .route("/.well-known/oauth-protected-resource", get(handlers::resource_metadata))
            // RFC 9728: resource-specific metadata path
            .route("/.well-known/oauth-protected-resource/mcp", get(handlers::resource_metadata))
            .route("/register", post(handlers::oauth_register))
            .route("/authorize", get(handlers::authorize).post(handlers::authorize_form))
            .route("/callback", get(handlers::callback))
            .route("/access-token", post(handlers::access_token))
            .route("/revoke", post(handlers::revoke))
            .merge(mcp_routes)
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(logging_middleware::http_logging_middleware))
            .layer(middleware::from_fn(rate_limit::rate_limit_middleware))
            // Outside the limiter so the middleware finds it in the extensions
            .layer(axum::Extension(rate_limiter));

        if self.state.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers(Any);
            router = router.layer(cors);
        }

        router
    }

    /// Run the server until the listener fails
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.state.config.addr()?;
        info!("[Gateway] Starting on {} (public URL {})", addr, self.state.base_url);
        info!(
            "[Gateway] Providers: {:?}",
            self.state.registry.providers()
        );
        info!(
            "[Gateway] CORS: {}",
            if self.state.config.enable_cors { "enabled" } else { "disabled" }
        );

        let sweeper = self.state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                sweeper.sweep().await;
            }
        });

        let router = self.build_router();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(
            "[Gateway] {} ready; MCP endpoint at {}",
            branding::DISPLAY_NAME,
            branding::mcp_resource_url(&self.state.base_url)
        );

        // Peer addresses key the rate limiter
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .await?;
        Ok(())
    }

    /// Start the server in the background
    pub fn spawn(self) -> tokio::task::JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}
