//! OAuth client registered through dynamic client registration (RFC 7591)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegisteredClient {
    pub client_id: String,
    pub client_name: String,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    /// Always `none`: clients are public and prove possession with PKCE
    pub token_endpoint_auth_method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software_version: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RegisteredClient {
    pub fn new(
        client_id: impl Into<String>,
        client_name: impl Into<String>,
        redirect_uris: Vec<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_name: client_name.into(),
            redirect_uris,
            grant_types: vec!["authorization_code".into(), "refresh_token".into()],
            response_types: vec!["code".into()],
            token_endpoint_auth_method: "none".into(),
            scope: None,
            software_id: None,
            software_version: None,
            created_at: Utc::now(),
        }
    }

    /// Exact-match redirect URI check.
    ///
    /// Loopback redirects may differ in port (RFC 8252 §7.3), since native
    /// clients bind an ephemeral port per authorization.
    pub fn allows_redirect(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|registered| {
            registered == redirect_uri || loopback_equivalent(registered, redirect_uri)
        })
    }
}

fn loopback_equivalent(registered: &str, candidate: &str) -> bool {
    let (Some(a), Some(b)) = (strip_loopback_port(registered), strip_loopback_port(candidate))
    else {
        return false;
    };
    a == b
}

/// `http://127.0.0.1:1234/cb` -> `http://127.0.0.1/cb`
fn strip_loopback_port(uri: &str) -> Option<String> {
    let rest = uri.strip_prefix("http://")?;
    let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
    let host = match authority.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => authority,
    };
    if !matches!(host, "127.0.0.1" | "localhost" | "[::1]") {
        return None;
    }
    Some(format!("http://{}/{}", host, path))
}
