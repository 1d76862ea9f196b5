//! SQLite implementation of `OAuthClientProvider`.
//!
//! Provider token maps and authorization states are stored as encrypted JSON;
//! lookup keys and expiry columns stay plaintext.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use authbridge_core::{
    AuthorizationState, Invalidation, OAuthClientProvider, ProviderTokenMap,
    RegisteredClient,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use tokio::sync::Mutex;
use tracing::debug;

use crate::crypto::FieldEncryptor;
use crate::Database;

/// SQLite-backed store with field-level encryption.
pub struct SqliteOAuthClientProvider {
    db: Arc<Mutex<Database>>,
    encryptor: Arc<FieldEncryptor>,
}

impl SqliteOAuthClientProvider {
    pub fn new(db: Arc<Mutex<Database>>, encryptor: Arc<FieldEncryptor>) -> Self {
        Self { db, encryptor }
    }

    fn seal_json<T: serde::Serialize>(&self, value: &T) -> Result<String> {
        let json = serde_json::to_string(value)?;
        self.encryptor
            .encrypt(&json)
            .map_err(|e| anyhow::anyhow!("Failed to encrypt column: {}", e))
    }

    fn open_json<T: serde::de::DeserializeOwned>(&self, encrypted: &str) -> Result<T> {
        let json = self
            .encryptor
            .decrypt(encrypted)
            .map_err(|e| anyhow::anyhow!("Failed to decrypt column: {}", e))?;
        serde_json::from_str(&json).context("Encrypted column holds invalid JSON")
    }
}

#[async_trait]
impl OAuthClientProvider for SqliteOAuthClientProvider {
    async fn load_client_info(&self, client_id: &str) -> Result<Option<RegisteredClient>> {
        let db = self.db.lock().await;
        let metadata: Option<String> = db
            .connection()
            .query_row(
                "SELECT metadata_json FROM oauth_clients WHERE client_id = ?1",
                params![client_id],
                |row| row.get(0),
            )
            .optional()?;

        metadata
            .map(|json| serde_json::from_str(&json).context("Invalid client metadata"))
            .transpose()
    }

    async fn save_client_info(&self, client: &RegisteredClient) -> Result<()> {
        let metadata = serde_json::to_string(client)?;
        let db = self.db.lock().await;
        db.connection().execute(
            "INSERT INTO oauth_clients (client_id, client_name, metadata_json, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(client_id) DO UPDATE SET
                client_name = excluded.client_name,
                metadata_json = excluded.metadata_json",
            params![
                client.client_id,
                client.client_name,
                metadata,
                client.created_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    async fn load_tokens(&self, session_id: &str) -> Result<Option<ProviderTokenMap>> {
        let encrypted: Option<String> = {
            let db = self.db.lock().await;
            db.connection()
                .query_row(
                    "SELECT tokens_encrypted FROM session_tokens WHERE session_id = ?1",
                    params![session_id],
                    |row| row.get(0),
                )
                .optional()?
        };

        encrypted.map(|e| self.open_json(&e)).transpose()
    }

    async fn save_tokens(&self, session_id: &str, tokens: &ProviderTokenMap) -> Result<()> {
        let encrypted = self.seal_json(tokens)?;
        let providers = tokens
            .keys()
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(",");

        let db = self.db.lock().await;
        db.connection().execute(
            "INSERT INTO session_tokens (session_id, providers, tokens_encrypted, updated_at)
             SELECT ?1, ?2, ?3, ?4
             WHERE NOT EXISTS (SELECT 1 FROM invalidated_sessions WHERE session_id = ?1)
             ON CONFLICT(session_id) DO UPDATE SET
                providers = excluded.providers,
                tokens_encrypted = excluded.tokens_encrypted,
                updated_at = excluded.updated_at",
            params![session_id, providers, encrypted, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    async fn save_verifier(&self, state: &AuthorizationState) -> Result<()> {
        let encrypted = self.seal_json(state)?;
        let db = self.db.lock().await;
        db.connection().execute(
            "INSERT OR REPLACE INTO authorization_states (state, provider, state_encrypted, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                state.state,
                state.provider.as_str(),
                encrypted,
                state.expires_at.timestamp()
            ],
        )?;
        Ok(())
    }

    async fn take_verifier(&self, state: &str) -> Result<Option<AuthorizationState>> {
        // DELETE .. RETURNING under the connection lock is the atomic take.
        let encrypted: Option<String> = {
            let db = self.db.lock().await;
            db.connection()
                .query_row(
                    "DELETE FROM authorization_states WHERE state = ?1 RETURNING state_encrypted",
                    params![state],
                    |row| row.get(0),
                )
                .optional()?
        };

        encrypted.map(|e| self.open_json(&e)).transpose()
    }

    async fn invalidate(&self, target: Invalidation) -> Result<()> {
        let db = self.db.lock().await;
        match target {
            Invalidation::Session(session_id) => {
                db.transaction(|conn| {
                    conn.execute(
                        "DELETE FROM session_tokens WHERE session_id = ?1",
                        params![session_id],
                    )?;
                    conn.execute(
                        "INSERT OR REPLACE INTO invalidated_sessions (session_id, invalidated_at) VALUES (?1, ?2)",
                        params![session_id, Utc::now().timestamp()],
                    )?;
                    Ok(())
                })?;
                debug!("[Storage] Invalidated session {}", session_id);
            }
            Invalidation::Client(client_id) => {
                db.connection().execute(
                    "DELETE FROM oauth_clients WHERE client_id = ?1",
                    params![client_id],
                )?;
                debug!("[Storage] Removed client {}", client_id);
            }
        }
        Ok(())
    }

    async fn is_invalidated(&self, session_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let found: Option<i64> = db
            .connection()
            .query_row(
                "SELECT 1 FROM invalidated_sessions WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    async fn purge_expired(&self, retain_since: DateTime<Utc>) -> Result<usize> {
        let now = Utc::now().timestamp();
        let cutoff = retain_since.timestamp();

        let db = self.db.lock().await;
        db.transaction(|conn| {
            let states = conn.execute(
                "DELETE FROM authorization_states WHERE expires_at <= ?1",
                params![now],
            )?;
            let markers = conn.execute(
                "DELETE FROM invalidated_sessions WHERE invalidated_at < ?1",
                params![cutoff],
            )?;
            let sessions = conn.execute(
                "DELETE FROM session_tokens WHERE updated_at < ?1",
                params![cutoff],
            )?;
            Ok(states + markers + sessions)
        })
    }
}
