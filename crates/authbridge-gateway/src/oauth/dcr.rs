//! Dynamic Client Registration (RFC 7591)
//!
//! MCP clients register themselves before starting the authorization flow.
//! Every client is public (`token_endpoint_auth_method = none`) and proves
//! possession with PKCE.

use authbridge_core::{OAuthClientProvider, RegisteredClient};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

/// Dynamic Client Registration Request (RFC 7591)
#[derive(Debug, Clone, Deserialize)]
pub struct DcrRequest {
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub grant_types: Vec<String>,
    #[serde(default)]
    pub response_types: Vec<String>,
    #[serde(default)]
    pub token_endpoint_auth_method: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub software_id: Option<String>,
    #[serde(default)]
    pub software_version: Option<String>,
}

/// Dynamic Client Registration Response (RFC 7591)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DcrResponse {
    pub client_id: String,
    pub client_name: String,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: String,
    pub client_id_issued_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl From<&RegisteredClient> for DcrResponse {
    fn from(client: &RegisteredClient) -> Self {
        Self {
            client_id: client.client_id.clone(),
            client_name: client.client_name.clone(),
            redirect_uris: client.redirect_uris.clone(),
            grant_types: client.grant_types.clone(),
            response_types: client.response_types.clone(),
            token_endpoint_auth_method: client.token_endpoint_auth_method.clone(),
            client_id_issued_at: client.created_at.timestamp(),
            scope: client.scope.clone(),
        }
    }
}

/// DCR Error Response
#[derive(Debug, Clone, Serialize)]
pub struct DcrError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl DcrError {
    pub fn invalid_redirect_uri(description: impl Into<String>) -> Self {
        Self {
            error: "invalid_redirect_uri".to_string(),
            error_description: Some(description.into()),
        }
    }

    pub fn invalid_client_metadata(description: impl Into<String>) -> Self {
        Self {
            error: "invalid_client_metadata".to_string(),
            error_description: Some(description.into()),
        }
    }

    pub fn server_error() -> Self {
        Self {
            error: "server_error".to_string(),
            error_description: Some("Client registration could not be stored".to_string()),
        }
    }
}

/// Validate redirect URIs per RFC 8252 and OAuth 2.1.
///
/// Allowed: loopback `http://` (127.0.0.1, localhost, [::1]), any `https://`
/// URL, and private-use custom schemes (`cursor://`, `vscode://`, ...).
/// Fragments are never allowed.
pub fn validate_redirect_uris(uris: &[String]) -> Result<(), DcrError> {
    if uris.is_empty() {
        return Err(DcrError::invalid_redirect_uri(
            "At least one redirect_uri is required",
        ));
    }

    for uri in uris {
        let parsed = url::Url::parse(uri)
            .map_err(|_| DcrError::invalid_redirect_uri(format!("Not an absolute URI: {}", uri)))?;

        if parsed.fragment().is_some() {
            return Err(DcrError::invalid_redirect_uri(
                "Redirect URI must not contain a fragment",
            ));
        }

        let allowed = match parsed.scheme() {
            "https" => true,
            "http" => matches!(
                parsed.host_str(),
                Some("127.0.0.1") | Some("localhost") | Some("[::1]")
            ),
            "javascript" | "data" | "file" => false,
            _ => true,
        };

        if !allowed {
            warn!("[DCR] Rejected redirect_uri: {}", uri);
            return Err(DcrError::invalid_redirect_uri(
                "Redirect URI must be https, loopback http, or a custom URL scheme",
            ));
        }
    }

    Ok(())
}

/// Validate and persist a registration.
pub async fn process_dcr_request(
    store: &dyn OAuthClientProvider,
    request: DcrRequest,
) -> Result<DcrResponse, DcrError> {
    validate_redirect_uris(&request.redirect_uris)?;

    if let Some(method) = request.token_endpoint_auth_method.as_deref() {
        if method != "none" {
            return Err(DcrError::invalid_client_metadata(
                "Only public clients (token_endpoint_auth_method=none) are supported",
            ));
        }
    }
    if request
        .grant_types
        .iter()
        .any(|g| g != "authorization_code" && g != "refresh_token")
    {
        return Err(DcrError::invalid_client_metadata(
            "Supported grant_types are authorization_code and refresh_token",
        ));
    }
    if request.response_types.iter().any(|r| r != "code") {
        return Err(DcrError::invalid_client_metadata(
            "Only response_type=code is supported",
        ));
    }

    let client_name = request
        .client_name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| "MCP Client".to_string());
    let client_id = format!("mcp_{}", Uuid::new_v4().simple());

    let mut client = RegisteredClient::new(client_id, client_name, request.redirect_uris);
    client.scope = request.scope;
    client.software_id = request.software_id;
    client.software_version = request.software_version;

    store.save_client_info(&client).await.map_err(|e| {
        warn!("[DCR] Failed to save client: {}", e);
        DcrError::server_error()
    })?;

    info!(
        "[DCR] Registered client {} ({})",
        client.client_name, client.client_id
    );

    Ok(DcrResponse::from(&client))
}
