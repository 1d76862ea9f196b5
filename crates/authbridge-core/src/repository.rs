//! Store capability trait
//!
//! Core logic depends only on [`OAuthClientProvider`]. Two variants exist:
//! an in-memory store (gateway crate) and a persistent SQLite store
//! (storage crate).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{AuthorizationState, ProviderTokenMap, RegisteredClient};

/// Result type for store operations
pub type RepoResult<T> = anyhow::Result<T>;

/// What to invalidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    /// Drop a session's provider tokens and reject its bearers from now on
    Session(String),
    /// Remove a client registration
    Client(String),
}

/// Persistence for OAuth clients, session provider tokens and PKCE verifiers
#[async_trait]
pub trait OAuthClientProvider: Send + Sync {
    async fn load_client_info(&self, client_id: &str) -> RepoResult<Option<RegisteredClient>>;

    async fn save_client_info(&self, client: &RegisteredClient) -> RepoResult<()>;

    /// Latest provider tokens for a session. Authoritative over whatever an
    /// older bearer still carries.
    async fn load_tokens(&self, session_id: &str) -> RepoResult<Option<ProviderTokenMap>>;

    /// Replace the session's provider tokens
    async fn save_tokens(&self, session_id: &str, tokens: &ProviderTokenMap) -> RepoResult<()>;

    async fn save_verifier(&self, state: &AuthorizationState) -> RepoResult<()>;

    /// Remove and return the authorization state for `state`.
    ///
    /// Must be atomic: of two concurrent calls with the same handle at most
    /// one gets `Some`. Expired entries are still returned so the caller can
    /// tell expiry from replay.
    async fn take_verifier(&self, state: &str) -> RepoResult<Option<AuthorizationState>>;

    async fn invalidate(&self, target: Invalidation) -> RepoResult<()>;

    async fn is_invalidated(&self, session_id: &str) -> RepoResult<bool>;

    /// Reap expired authorization states, plus revocation markers and
    /// session token maps last touched before `retain_since`.
    /// Returns the number of removed entries.
    async fn purge_expired(&self, retain_since: DateTime<Utc>) -> RepoResult<usize>;
}
