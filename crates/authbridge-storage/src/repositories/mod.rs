//! SQLite repository implementations.

mod oauth_client_provider;

pub use oauth_client_provider::SqliteOAuthClientProvider;
