//! # AuthBridge Core Library
//!
//! Domain types and contracts shared by the bridge gateway and its stores.
//!
//! ## Modules
//!
//! - `branding` - Product naming and protocol defaults
//! - `domain` - Core entities (Provider, ProviderTokenSet, SessionEnvelope, ...)
//! - `error` - Typed auth error taxonomy
//! - `repository` - The `OAuthClientProvider` store capability trait

pub mod branding;
pub mod domain;
pub mod error;
pub mod repository;

// Re-export commonly used types
pub use domain::*;
pub use error::*;
pub use repository::*;
