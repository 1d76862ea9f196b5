//! OAuth 2.1 Implementation
//!
//! PKCE, dynamic client registration, discovery documents, and the upstream
//! provider token exchangers.

mod dcr;
mod metadata;
pub mod pkce;
pub mod providers;

pub use dcr::{process_dcr_request, validate_redirect_uris, DcrError, DcrRequest, DcrResponse};
pub use metadata::{OAuthServerMetadata, ProtectedResourceMetadata};
pub use pkce::{generate_state, PkceChallenge};
pub use providers::{
    AtlassianExchanger, FigmaExchanger, GoogleExchanger, ProviderEndpoints, ProviderRegistry,
    TokenExchanger,
};
