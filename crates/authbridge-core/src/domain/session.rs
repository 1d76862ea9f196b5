//! Session envelope sealed inside the bridge's own bearer credential

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::{Provider, ProviderTokenMap, ProviderTokenSet};

/// Which credential an envelope backs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Access,
    Refresh,
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::Access => "access",
            EnvelopeKind::Refresh => "refresh",
        }
    }
}

/// Payload of a bridge bearer token.
///
/// Only the session token service creates these. Tool code reads them
/// through the auth context accessor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionEnvelope {
    /// Stable across re-issues
    pub session_id: String,
    pub kind: EnvelopeKind,
    /// OAuth client that completed the authorization
    pub client_id: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub provider_tokens: ProviderTokenMap,
    /// Issued at (unix timestamp)
    pub issued_at: i64,
    /// Expires at (unix timestamp)
    pub expires_at: i64,
}

impl SessionEnvelope {
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.expires_at
    }

    pub fn expires_at_utc(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.expires_at, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn token(&self, provider: Provider) -> Option<&ProviderTokenSet> {
        self.provider_tokens.get(&provider)
    }

    pub fn providers(&self) -> impl Iterator<Item = Provider> + '_ {
        self.provider_tokens.keys().copied()
    }

    /// True when no contained token is usable and none can be refreshed
    pub fn is_dead(&self) -> bool {
        self.provider_tokens
            .values()
            .all(|t| t.is_expired() && !t.can_refresh())
    }
}
