//! Discovery documents (RFC 8414, RFC 9728)

use authbridge_core::branding;
use serde::{Deserialize, Serialize};

/// OAuth Authorization Server Metadata (RFC 8414)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub registration_endpoint: String,
    pub revocation_endpoint: String,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
}

impl OAuthServerMetadata {
    pub fn for_base_url(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            issuer: base.to_string(),
            authorization_endpoint: format!("{}/authorize", base),
            token_endpoint: format!("{}/access-token", base),
            registration_endpoint: format!("{}/register", base),
            revocation_endpoint: format!("{}/revoke", base),
            response_types_supported: vec!["code".to_string()],
            grant_types_supported: vec![
                "authorization_code".to_string(),
                "refresh_token".to_string(),
            ],
            code_challenge_methods_supported: vec!["S256".to_string()],
            token_endpoint_auth_methods_supported: vec!["none".to_string()],
            scopes_supported: bridge_scopes(),
        }
    }
}

/// OAuth Protected Resource Metadata (RFC 9728)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    pub resource: String,
    pub authorization_servers: Vec<String>,
    pub bearer_methods_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
    pub resource_name: String,
}

impl ProtectedResourceMetadata {
    pub fn for_base_url(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            resource: branding::mcp_resource_url(base),
            authorization_servers: vec![base.to_string()],
            bearer_methods_supported: vec!["header".to_string()],
            scopes_supported: bridge_scopes(),
            resource_name: branding::DISPLAY_NAME.to_string(),
        }
    }
}

fn bridge_scopes() -> Vec<String> {
    branding::BRIDGE_SCOPES.iter().map(|s| s.to_string()).collect()
}
