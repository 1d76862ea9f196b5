//! In-memory store variant
//!
//! Process-local `DashMap`s. Everything is lost on restart, which is fine for
//! single-instance deployments where clients simply re-authorize.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use authbridge_core::{
    AuthorizationState, Invalidation, OAuthClientProvider, ProviderTokenMap,
    RegisteredClient, RepoResult,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

/// Concurrent map whose entries expire `ttl` after insertion.
///
/// Expired entries are dropped on access and by [`purge`](Self::purge).
pub struct TtlMap<V> {
    entries: DashMap<String, (Instant, V)>,
    ttl: Duration,
}

impl<V> TtlMap<V> {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: DashMap::new(), ttl }
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.entries.insert(key.into(), (Instant::now() + self.ttl, value));
    }

    /// Remove and return a live entry. Atomic per key.
    pub fn take(&self, key: &str) -> Option<V> {
        let (_, (deadline, value)) = self.entries.remove(key)?;
        (Instant::now() < deadline).then_some(value)
    }

    pub fn purge(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, (deadline, _)| now < *deadline);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V: Clone> TtlMap<V> {
    /// Read a live entry without consuming it
    pub fn get(&self, key: &str) -> Option<V> {
        let entry = self.entries.get(key)?;
        let (deadline, value) = entry.value();
        (Instant::now() < *deadline).then(|| value.clone())
    }
}

/// DashMap-backed [`OAuthClientProvider`]
pub struct MemoryOAuthClientProvider {
    clients: DashMap<String, RegisteredClient>,
    /// session id → (last write, tokens)
    tokens: DashMap<String, (DateTime<Utc>, ProviderTokenMap)>,
    verifiers: DashMap<String, AuthorizationState>,
    invalidated: DashMap<String, DateTime<Utc>>,
}

impl Default for MemoryOAuthClientProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryOAuthClientProvider {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
            tokens: DashMap::new(),
            verifiers: DashMap::new(),
            invalidated: DashMap::new(),
        }
    }
}

#[async_trait]
impl OAuthClientProvider for MemoryOAuthClientProvider {
    async fn load_client_info(&self, client_id: &str) -> RepoResult<Option<RegisteredClient>> {
        Ok(self.clients.get(client_id).map(|c| c.clone()))
    }

    async fn save_client_info(&self, client: &RegisteredClient) -> RepoResult<()> {
        self.clients.insert(client.client_id.clone(), client.clone());
        Ok(())
    }

    async fn load_tokens(&self, session_id: &str) -> RepoResult<Option<ProviderTokenMap>> {
        Ok(self.tokens.get(session_id).map(|entry| entry.1.clone()))
    }

    async fn save_tokens(&self, session_id: &str, tokens: &ProviderTokenMap) -> RepoResult<()> {
        if self.invalidated.contains_key(session_id) {
            debug!("[Storage] Ignoring token write for revoked session {}", session_id);
            return Ok(());
        }
        self.tokens
            .insert(session_id.to_string(), (Utc::now(), tokens.clone()));
        Ok(())
    }

    async fn save_verifier(&self, state: &AuthorizationState) -> RepoResult<()> {
        self.verifiers.insert(state.state.clone(), state.clone());
        Ok(())
    }

    async fn take_verifier(&self, state: &str) -> RepoResult<Option<AuthorizationState>> {
        Ok(self.verifiers.remove(state).map(|(_, v)| v))
    }

    async fn invalidate(&self, target: Invalidation) -> RepoResult<()> {
        match target {
            Invalidation::Session(session_id) => {
                self.tokens.remove(&session_id);
                self.invalidated.insert(session_id, Utc::now());
            }
            Invalidation::Client(client_id) => {
                self.clients.remove(&client_id);
            }
        }
        Ok(())
    }

    async fn is_invalidated(&self, session_id: &str) -> RepoResult<bool> {
        Ok(self.invalidated.contains_key(session_id))
    }

    async fn purge_expired(&self, retain_since: DateTime<Utc>) -> RepoResult<usize> {
        let now = Utc::now();

        let before = self.verifiers.len() + self.invalidated.len() + self.tokens.len();
        self.verifiers.retain(|_, v| v.expires_at > now);
        self.invalidated.retain(|_, at| *at >= retain_since);
        self.tokens.retain(|_, (updated_at, _)| *updated_at >= retain_since);
        let removed = before
            .saturating_sub(self.verifiers.len() + self.invalidated.len() + self.tokens.len());

        if removed > 0 {
            debug!("[Storage] Purged {} expired entries", removed);
        }
        Ok(removed)
    }
}
