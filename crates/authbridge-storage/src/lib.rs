//! AuthBridge Storage Layer
//!
//! SQLite persistence with field-level encryption for provider tokens and
//! PKCE verifiers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │             OAuthClientProvider (core)               │
//! ├──────────────────────────────────────────────────────┤
//! │            SqliteOAuthClientProvider                 │
//! ├──────────────────────────────────────────────────────┤
//! │         FieldEncryptor (AES-256-GCM)                 │
//! ├──────────────────────────────────────────────────────┤
//! │                   Database                           │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use authbridge_storage::{Database, FieldEncryptor, SqliteOAuthClientProvider};
//! use std::sync::Arc;
//! use tokio::sync::Mutex;
//!
//! let db = Arc::new(Mutex::new(Database::open(&path)?));
//! let encryptor = Arc::new(FieldEncryptor::from_hex(&key_hex)?);
//! let store = SqliteOAuthClientProvider::new(db, encryptor);
//! ```

pub mod crypto;
mod database;
mod repositories;

pub use crypto::{generate_master_key, parse_master_key, FieldEncryptor, KEY_SIZE};
pub use database::Database;
pub use repositories::*;

