//! Short-lived server-side authorization state

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::Provider;

/// Correlates one provider consent redirect with the grant that started it.
///
/// Keyed by `state`, consumed exactly once on callback.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthorizationState {
    /// Opaque CSRF handle sent to the provider
    pub state: String,
    /// Pending grant this consent belongs to
    pub grant_id: String,
    pub provider: Provider,
    /// Where the MCP client ultimately gets sent back to
    pub client_redirect_uri: String,
    /// Server-side PKCE verifier for the provider exchange
    pub code_verifier: String,
    pub code_challenge: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AuthorizationState {
    pub fn new(
        state: impl Into<String>,
        grant_id: impl Into<String>,
        provider: Provider,
        client_redirect_uri: impl Into<String>,
        code_verifier: impl Into<String>,
        code_challenge: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            state: state.into(),
            grant_id: grant_id.into(),
            provider,
            client_redirect_uri: client_redirect_uri.into(),
            code_verifier: code_verifier.into(),
            code_challenge: code_challenge.into(),
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

impl std::fmt::Debug for AuthorizationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationState")
            .field("grant_id", &self.grant_id)
            .field("provider", &self.provider)
            .field("client_redirect_uri", &self.client_redirect_uri)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}
