//! Discovery documents (RFC 8414, RFC 9728)

use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use serde_json::Value;
use tests::{TestBridge, BASE_URL};

fn strings(value: &Value) -> Vec<&str> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_protected_resource_metadata_shape() {
    let bridge = TestBridge::start(&[]).await;

    for uri in [
        "/.well-known/oauth-protected-resource",
        "/.well-known/oauth-protected-resource/mcp",
    ] {
        let response = bridge.get(uri).await;
        assert_eq!(response.status, StatusCode::OK, "{}", uri);

        let json = response.json();
        assert_eq!(json["resource"], format!("{}/mcp", BASE_URL));
        assert_eq!(strings(&json["authorization_servers"]), vec![BASE_URL]);
        assert_eq!(strings(&json["bearer_methods_supported"]), vec!["header"]);
    }
}

#[tokio::test]
async fn test_authorization_server_metadata_shape() {
    let bridge = TestBridge::start(&[]).await;
    let json = bridge.get("/.well-known/oauth-authorization-server").await.json();

    assert_eq!(json["issuer"], BASE_URL);
    assert_eq!(json["authorization_endpoint"], format!("{}/authorize", BASE_URL));
    assert_eq!(json["token_endpoint"], format!("{}/access-token", BASE_URL));
    assert_eq!(json["registration_endpoint"], format!("{}/register", BASE_URL));
    assert_eq!(json["revocation_endpoint"], format!("{}/revoke", BASE_URL));
    assert!(strings(&json["code_challenge_methods_supported"]).contains(&"S256"));
    assert_eq!(strings(&json["response_types_supported"]), vec!["code"]);
    assert_eq!(strings(&json["token_endpoint_auth_methods_supported"]), vec!["none"]);
    assert!(strings(&json["grant_types_supported"]).contains(&"refresh_token"));
}

#[tokio::test]
async fn test_health() {
    let bridge = TestBridge::start(&[]).await;
    let response = bridge.get("/health").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["status"], "ok");
}
