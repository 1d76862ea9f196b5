//! Auth context accessor
//!
//! The narrow interface tool code uses to get the caller's provider tokens.
//! Everything handed out here has passed a liveness check.

use std::collections::BTreeMap;
use std::sync::Arc;

use authbridge_core::{
    MissingTokenError, OAuthClientProvider, Provider, ProviderTokenMap, ProviderTokenSet,
    SessionEnvelope,
};
use rmcp::model::Extensions;
use tracing::{debug, warn};

use super::TokenRefreshOrchestrator;

/// Authenticated caller, attached to request extensions by the MCP auth
/// middleware.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub session_id: String,
    pub client_id: String,
    pub envelope: Arc<SessionEnvelope>,
}

impl AuthContext {
    pub fn new(envelope: SessionEnvelope) -> Self {
        Self {
            session_id: envelope.session_id.clone(),
            client_id: envelope.client_id.clone(),
            envelope: Arc::new(envelope),
        }
    }
}

/// Live provider tokens for one request
#[derive(Debug, Clone, Default)]
pub struct AuthInfo {
    pub tokens: ProviderTokenMap,
    /// Providers present in the session whose token could not be made live
    pub failures: BTreeMap<Provider, MissingTokenError>,
    /// Set when a refresh re-issued the caller's bearer
    pub reissued_bearer: Option<String>,
}

impl AuthInfo {
    /// Token for `provider`; `None` if the session never connected it
    pub fn get(&self, provider: Provider) -> Option<&ProviderTokenSet> {
        self.tokens.get(&provider)
    }

    /// Token for `provider`, or the reason there is none
    pub fn require(&self, provider: Provider) -> Result<&ProviderTokenSet, MissingTokenError> {
        if let Some(token) = self.tokens.get(&provider) {
            return Ok(token);
        }
        Err(self
            .failures
            .get(&provider)
            .cloned()
            .unwrap_or_else(|| MissingTokenError::not_connected(provider)))
    }

    pub fn providers(&self) -> impl Iterator<Item = Provider> + '_ {
        self.tokens.keys().copied()
    }
}

pub struct AuthContextAccessor {
    store: Arc<dyn OAuthClientProvider>,
    orchestrator: Arc<TokenRefreshOrchestrator>,
}

impl AuthContextAccessor {
    pub fn new(store: Arc<dyn OAuthClientProvider>, orchestrator: Arc<TokenRefreshOrchestrator>) -> Self {
        Self { store, orchestrator }
    }

    /// Live tokens for every provider in the caller's session, refreshing
    /// stale ones first.
    ///
    /// Fails only when the session holds providers and none of them is usable;
    /// partial failures are reported per provider through [`AuthInfo::require`].
    pub async fn get_auth_info_safe(
        &self,
        ctx: &AuthContext,
        caller: &str,
    ) -> Result<AuthInfo, MissingTokenError> {
        let map = match self.store.load_tokens(&ctx.session_id).await {
            Ok(Some(map)) => map,
            Ok(None) => ctx.envelope.provider_tokens.clone(),
            Err(e) => {
                warn!("[Auth] {}: token store read failed, using bearer contents: {}", caller, e);
                ctx.envelope.provider_tokens.clone()
            }
        };

        let mut info = AuthInfo::default();
        for (provider, token) in map {
            match self.orchestrator.ensure_fresh(&ctx.envelope, &token).await {
                Ok(fresh) => {
                    if fresh.reissued_bearer.is_some() {
                        info.reissued_bearer = fresh.reissued_bearer;
                    }
                    info.tokens.insert(provider, fresh.token);
                }
                Err(e) => {
                    debug!("[Auth] {}: {} token unavailable ({:?})", caller, provider, e.reason);
                    info.failures.insert(provider, e);
                }
            }
        }

        if info.tokens.is_empty() {
            if let Some(first) = info.failures.values().next() {
                return Err(first.clone());
            }
        }
        Ok(info)
    }
}

/// Pull the [`AuthContext`] out of MCP request extensions.
///
/// The streamable HTTP transport stores the original `http::request::Parts`
/// in the extensions; the middleware put the context into those parts.
pub fn extract_auth_context(extensions: &Extensions) -> Option<AuthContext> {
    extensions
        .get::<http::request::Parts>()
        .and_then(|parts| parts.extensions.get::<AuthContext>())
        .cloned()
}
