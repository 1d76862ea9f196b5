//! Normalized provider token set

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::Provider;

/// Provider tokens held by one session, keyed by provider
pub type ProviderTokenMap = BTreeMap<Provider, ProviderTokenSet>;

/// Tokens issued by one upstream provider for one session.
///
/// Refresh replaces the set in place; `expires_at` always tracks the most
/// recently issued access token.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderTokenSet {
    pub provider: Provider,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub scope: String,
    /// Provider specific extras (e.g. Atlassian `accessible_resources`)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub raw: serde_json::Map<String, serde_json::Value>,
}

impl ProviderTokenSet {
    pub fn new(
        provider: Provider,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            provider,
            access_token: access_token.into(),
            refresh_token,
            expires_at,
            token_type: "Bearer".to_string(),
            scope: String::new(),
            raw: serde_json::Map::new(),
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Check if the access token is past its expiry
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Check if the access token expires within `skew` (or already has)
    pub fn is_stale(&self, skew: Duration) -> bool {
        Utc::now() + skew >= self.expires_at
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Seconds until expiry, clamped at zero
    pub fn expires_in(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }

    /// Merge a refresh response into this set.
    ///
    /// Providers that do not rotate refresh tokens omit them from refresh
    /// responses; the previous refresh token is carried forward. Likewise an
    /// empty scope keeps the previous grant.
    pub fn refreshed_with(&self, mut next: ProviderTokenSet) -> ProviderTokenSet {
        if next.refresh_token.is_none() {
            next.refresh_token = self.refresh_token.clone();
        }
        if next.scope.is_empty() {
            next.scope = self.scope.clone();
        }
        for (key, value) in &self.raw {
            next.raw.entry(key.clone()).or_insert_with(|| value.clone());
        }
        next
    }
}

// Tokens never reach logs through Debug.
impl std::fmt::Debug for ProviderTokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderTokenSet")
            .field("provider", &self.provider)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish()
    }
}
