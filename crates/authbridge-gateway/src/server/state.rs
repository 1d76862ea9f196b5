//! Shared server state
//!
//! Owned stores and services injected into every handler. Cheap to clone.

use std::sync::Arc;
use std::time::Duration;

use authbridge_core::{branding, OAuthClientProvider};
use authbridge_storage::generate_master_key;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::config::BridgeConfig;
use crate::oauth::ProviderRegistry;
use crate::server::rate_limit::{default_oauth_rate_limiter, RateLimiter};
use crate::session::{
    AuthContextAccessor, IssuedCode, PendingGrant, SessionTokenService, TokenRefreshOrchestrator,
    TtlMap,
};

/// Bridge session behind an `mcp-session-id`
#[derive(Debug, Clone)]
pub struct McpSessionBinding {
    pub session_id: String,
    /// `clientInfo.name` from `initialize`; picks the challenge variant later
    pub client_name: Option<String>,
    pub last_seen: DateTime<Utc>,
}

impl McpSessionBinding {
    pub fn new(session_id: impl Into<String>, client_name: Option<String>) -> Self {
        Self {
            session_id: session_id.into(),
            client_name,
            last_seen: Utc::now(),
        }
    }
}

#[derive(Clone)]
pub struct BridgeState {
    pub config: Arc<BridgeConfig>,
    pub base_url: String,
    pub store: Arc<dyn OAuthClientProvider>,
    pub registry: ProviderRegistry,
    pub tokens: Arc<SessionTokenService>,
    pub orchestrator: Arc<TokenRefreshOrchestrator>,
    pub accessor: Arc<AuthContextAccessor>,
    /// `/authorize` requests waiting on provider consent, by grant id
    pub pending_grants: Arc<TtlMap<PendingGrant>>,
    /// Bridge authorization codes, by code
    pub issued_codes: Arc<TtlMap<IssuedCode>>,
    /// `mcp-session-id` → bridge session
    pub mcp_sessions: Arc<DashMap<String, McpSessionBinding>>,
    pub rate_limiter: RateLimiter,
}

impl BridgeState {
    pub fn new(
        config: BridgeConfig,
        store: Arc<dyn OAuthClientProvider>,
        registry: ProviderRegistry,
    ) -> anyhow::Result<Self> {
        let secret = match config.session_secret.clone() {
            Some(secret) => secret,
            None => {
                warn!("[Session] No session secret configured; using an ephemeral one (bearers will not survive a restart)");
                generate_master_key()?
            }
        };
        let tokens = Arc::new(SessionTokenService::new(
            &secret,
            config.access_token_ttl,
            config.refresh_token_ttl,
        )?);

        let orchestrator = Arc::new(TokenRefreshOrchestrator::new(
            store.clone(),
            registry.clone(),
            tokens.clone(),
            config.clock_skew,
        ));
        let accessor = Arc::new(AuthContextAccessor::new(store.clone(), orchestrator.clone()));
        let flow_ttl = Duration::from_secs(branding::AUTHORIZATION_TTL_SECS as u64);
        let rate_limiter = default_oauth_rate_limiter().trust_forwarded_for(config.trust_forwarded_for);

        Ok(Self {
            base_url: config.base_url(),
            config: Arc::new(config),
            store,
            registry,
            tokens,
            orchestrator,
            accessor,
            pending_grants: Arc::new(TtlMap::new(flow_ttl)),
            issued_codes: Arc::new(TtlMap::new(flow_ttl)),
            mcp_sessions: Arc::new(DashMap::new()),
            rate_limiter,
        })
    }

    /// Oldest activity still worth keeping at `now`. Revocation markers and
    /// idle sessions must outlive every refresh envelope issued before them.
    pub fn retention_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.config.refresh_token_ttl
    }

    /// Reap expired flow state, idle refresh locks and stale store entries
    pub async fn sweep(&self) {
        self.sweep_at(Utc::now()).await
    }

    pub async fn sweep_at(&self, now: DateTime<Utc>) {
        let grants = self.pending_grants.purge();
        let codes = self.issued_codes.purge();
        let idle = self.orchestrator.purge_idle();
        let buckets = self.rate_limiter.purge();
        let stored = match self.store.purge_expired(self.retention_cutoff(now)).await {
            Ok(n) => n,
            Err(e) => {
                warn!("[Storage] Purge failed: {}", e);
                0
            }
        };
        let bindings = self.purge_mcp_sessions(now).await;

        if grants + codes + idle + buckets + stored + bindings > 0 {
            debug!(
                "[Gateway] Sweep removed {} grant(s), {} code(s), {} idle lock(s), {} rate bucket(s), {} store entr(ies), {} MCP binding(s)",
                grants, codes, idle, buckets, stored, bindings
            );
        }
    }

    /// Unbind MCP sessions whose bridge session was revoked or that have been
    /// idle longer than any bearer of theirs can live
    async fn purge_mcp_sessions(&self, now: DateTime<Utc>) -> usize {
        let cutoff = self.retention_cutoff(now);
        let candidates: Vec<(String, String, DateTime<Utc>)> = self
            .mcp_sessions
            .iter()
            .map(|entry| (entry.key().clone(), entry.session_id.clone(), entry.last_seen))
            .collect();

        let mut removed = 0;
        for (mcp_session, session_id, last_seen) in candidates {
            let stale = if last_seen < cutoff {
                true
            } else {
                match self.store.is_invalidated(&session_id).await {
                    Ok(revoked) => revoked,
                    Err(e) => {
                        warn!("[Gateway] Revocation check failed during sweep: {}", e);
                        false
                    }
                }
            };
            if stale && self.mcp_sessions.remove(&mcp_session).is_some() {
                removed += 1;
            }
        }
        removed
    }
}
