//! Token refresh orchestrator
//!
//! Refreshes stale provider tokens with at most one in-flight refresh per
//! `(session, provider)`. Concurrent callers wait on the same lock and pick
//! up the winner's result from the store instead of calling the provider
//! again (a second call would burn a rotated refresh token).

use std::sync::Arc;

use authbridge_core::{
    EnvelopeKind, Invalidation, MissingTokenError, MissingTokenReason, OAuthClientProvider,
    Provider, ProviderTokenMap, ProviderTokenSet, SessionEnvelope,
};
use chrono::{Duration, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::SessionTokenService;
use crate::oauth::ProviderRegistry;

/// A live provider token, plus the bearer re-issued when obtaining it
/// required a refresh.
#[derive(Debug, Clone)]
pub struct FreshToken {
    pub token: ProviderTokenSet,
    pub reissued_bearer: Option<String>,
}

struct LatestBearer {
    bearer: String,
    expires_at: i64,
}

pub struct TokenRefreshOrchestrator {
    store: Arc<dyn OAuthClientProvider>,
    registry: ProviderRegistry,
    tokens: Arc<SessionTokenService>,
    skew: Duration,
    locks: DashMap<(String, Provider), Arc<Mutex<()>>>,
    /// Newest access bearer per session, until the client presents it
    latest_bearers: DashMap<String, LatestBearer>,
}

impl TokenRefreshOrchestrator {
    pub fn new(
        store: Arc<dyn OAuthClientProvider>,
        registry: ProviderRegistry,
        tokens: Arc<SessionTokenService>,
        skew: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            tokens,
            skew,
            locks: DashMap::new(),
            latest_bearers: DashMap::new(),
        }
    }

    pub fn skew(&self) -> Duration {
        self.skew
    }

    /// Return `current` if it is still live, otherwise refresh it.
    pub async fn ensure_fresh(
        &self,
        envelope: &SessionEnvelope,
        current: &ProviderTokenSet,
    ) -> Result<FreshToken, MissingTokenError> {
        if !current.is_stale(self.skew) {
            return Ok(FreshToken { token: current.clone(), reissued_bearer: None });
        }

        let provider = current.provider;
        let session_id = envelope.session_id.as_str();
        let lock = self
            .locks
            .entry((session_id.to_string(), provider))
            .or_default()
            .clone();
        let _guard = lock.lock().await;

        // Re-read under the lock: another caller may have refreshed already
        let mut map = self
            .store
            .load_tokens(session_id)
            .await
            .map_err(|e| {
                warn!("[Refresh] Failed to load tokens for session {}: {}", session_id, e);
                unavailable(provider, "token store unavailable")
            })?
            .unwrap_or_else(|| envelope.provider_tokens.clone());

        let latest = map.get(&provider).cloned().unwrap_or_else(|| current.clone());
        if !latest.is_stale(self.skew) {
            debug!(
                "[Refresh] {} token for session {} already refreshed by a concurrent caller",
                provider, session_id
            );
            return Ok(FreshToken {
                token: latest,
                reissued_bearer: self.latest_bearer(session_id),
            });
        }

        if !latest.can_refresh() {
            info!("[Refresh] {} token for session {} is stale with no refresh token", provider, session_id);
            return Err(MissingTokenError::no_refresh_token(provider));
        }

        let Some(exchanger) = self.registry.get(provider) else {
            warn!("[Refresh] {} is no longer configured", provider);
            return Err(MissingTokenError {
                provider,
                retryable: false,
                reason: MissingTokenReason::RefreshRejected(format!("{} is not configured", provider)),
            });
        };

        info!("[Refresh] Refreshing {} token for session {}", provider, session_id);
        match exchanger.refresh_token(&latest).await {
            Ok(next) => {
                map.insert(provider, next.clone());
                if let Err(e) = self.store.save_tokens(session_id, &map).await {
                    warn!("[Refresh] Failed to persist refreshed {} token: {}", provider, e);
                }

                let reissued_bearer = if envelope.kind == EnvelopeKind::Access {
                    self.reissue(envelope, map)
                } else {
                    None
                };
                Ok(FreshToken { token: next, reissued_bearer })
            }
            Err(e) => {
                warn!(
                    "[Refresh] {} refresh failed for session {}: {} (retryable={})",
                    provider, session_id, e, e.retryable
                );
                if !e.retryable {
                    self.drop_refresh_token(session_id, provider, map).await;
                }
                Err(e.into())
            }
        }
    }

    fn reissue(&self, envelope: &SessionEnvelope, map: ProviderTokenMap) -> Option<String> {
        match self.tokens.reissue(envelope, map) {
            Ok((bearer, next)) => {
                self.record_latest(&next, &bearer);
                Some(bearer)
            }
            Err(e) => {
                warn!("[Refresh] Failed to re-issue bearer for session {}: {}", envelope.session_id, e);
                None
            }
        }
    }

    /// The refresh token was rejected: forget it so later reads fail fast, and
    /// revoke the session once nothing in it can ever work again.
    async fn drop_refresh_token(&self, session_id: &str, provider: Provider, mut map: ProviderTokenMap) {
        if let Some(token) = map.get_mut(&provider) {
            token.refresh_token = None;
        }

        let dead = map.values().all(|t| t.is_expired() && !t.can_refresh());
        let result = if dead {
            info!("[Refresh] Session {} has no usable provider tokens left, invalidating", session_id);
            self.latest_bearers.remove(session_id);
            self.store.invalidate(Invalidation::Session(session_id.to_string())).await
        } else {
            self.store.save_tokens(session_id, &map).await
        };
        if let Err(e) = result {
            warn!("[Refresh] Failed to record rejected refresh token: {}", e);
        }
    }

    /// Newest re-issued bearer for a session, if the client has not picked it up
    pub fn latest_bearer(&self, session_id: &str) -> Option<String> {
        let entry = self.latest_bearers.get(session_id)?;
        (entry.expires_at > Utc::now().timestamp()).then(|| entry.bearer.clone())
    }

    /// `bearer` (sealing `envelope`) is now the session's newest access bearer.
    /// Requests still carrying an older one are pointed at it.
    pub fn record_latest(&self, envelope: &SessionEnvelope, bearer: &str) {
        self.latest_bearers.insert(
            envelope.session_id.clone(),
            LatestBearer { bearer: bearer.to_string(), expires_at: envelope.expires_at },
        );
    }

    /// The client presented `bearer`; stop advertising it once it is the latest
    pub fn acknowledge(&self, session_id: &str, bearer: &str) {
        self.latest_bearers
            .remove_if(session_id, |_, latest| latest.bearer == bearer);
    }

    /// Drop lock entries nobody holds and expired re-issued bearers
    pub fn purge_idle(&self) -> usize {
        let now = Utc::now().timestamp();
        let before = self.locks.len() + self.latest_bearers.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        self.latest_bearers.retain(|_, latest| latest.expires_at > now);
        before.saturating_sub(self.locks.len() + self.latest_bearers.len())
    }
}

fn unavailable(provider: Provider, detail: &str) -> MissingTokenError {
    MissingTokenError {
        provider,
        retryable: true,
        reason: MissingTokenReason::RefreshUnavailable(detail.to_string()),
    }
}
