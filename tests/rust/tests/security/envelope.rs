//! Sealed session envelopes

use authbridge_core::{EnvelopeKind, Provider, ProviderTokenMap, ProviderTokenSet};
use authbridge_gateway::SessionTokenService;
use authbridge_storage::KEY_SIZE;
use axum::http::StatusCode;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, Utc};
use tests::{initialize_body, mcp_request, send, TestBridge};

fn provider_tokens() -> ProviderTokenMap {
    let mut map = ProviderTokenMap::new();
    map.insert(
        Provider::Google,
        ProviderTokenSet::new(
            Provider::Google,
            "google-secret-access-token",
            Some("google-rt".into()),
            Utc::now() + Duration::hours(1),
        ),
    );
    map
}

fn service(key: u8, access_ttl: Duration) -> SessionTokenService {
    SessionTokenService::new(&[key; KEY_SIZE], access_ttl, Duration::days(30)).unwrap()
}

#[test]
fn test_envelope_is_opaque() {
    let issued = service(1, Duration::hours(1)).issue("client", "mcp", provider_tokens()).unwrap();
    let (_, body) = issued.access_token.split_once('.').unwrap();
    let bytes = URL_SAFE_NO_PAD.decode(body).unwrap();

    let haystack = String::from_utf8_lossy(&bytes);
    assert!(!haystack.contains("google-secret-access-token"));
    assert!(!issued.access_token.contains(&issued.session_id));
}

#[test]
fn test_expired_envelope_is_rejected() {
    let service = service(1, Duration::seconds(-10));
    let issued = service.issue("client", "mcp", provider_tokens()).unwrap();
    assert!(service.verify(&issued.access_token).is_err());
    // Refresh lifetime is independent
    assert!(service.verify_refresh(&issued.refresh_token).is_ok());
}

#[test]
fn test_tampered_envelope_is_rejected() {
    let service = service(1, Duration::hours(1));
    let issued = service.issue("client", "mcp", provider_tokens()).unwrap();

    let (header, body) = issued.access_token.split_once('.').unwrap();
    let mut bytes = URL_SAFE_NO_PAD.decode(body).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    let tampered = format!("{}.{}", header, URL_SAFE_NO_PAD.encode(&bytes));
    assert!(service.verify(&tampered).is_err());

    let swapped_header = format!("{}.{}", URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#), body);
    assert!(service.verify(&swapped_header).is_err());

    assert!(service.verify("").is_err());
    assert!(service.verify("no-dot").is_err());
}

#[test]
fn test_envelope_from_other_key_is_rejected() {
    let issued = service(1, Duration::hours(1)).issue("client", "mcp", provider_tokens()).unwrap();
    assert!(service(2, Duration::hours(1)).verify(&issued.access_token).is_err());
}

#[test]
fn test_kinds_are_not_interchangeable() {
    let service = service(1, Duration::hours(1));
    let issued = service.issue("client", "mcp", provider_tokens()).unwrap();

    assert!(service.verify(&issued.refresh_token).is_err());
    assert!(service.verify_refresh(&issued.access_token).is_err());
    assert_eq!(
        service.verify_kind(&issued.refresh_token, EnvelopeKind::Refresh).unwrap().session_id,
        issued.session_id
    );
}

#[tokio::test]
async fn test_expired_bearer_gets_challenge() {
    let bridge = TestBridge::start_with(&[], |config| {
        config.access_token_ttl = Duration::seconds(-10);
    })
    .await;
    let issued = bridge.state.tokens.issue("client", "mcp", provider_tokens()).unwrap();

    let response = send(
        &bridge.router,
        mcp_request(initialize_body("Standard MCP Client"), Some(&issued.access_token)),
    )
    .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert!(response.header("www-authenticate").is_some());
}
