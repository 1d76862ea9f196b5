//! Callback `state` handling. Every rejection renders the same page so a
//! caller cannot probe which handles exist.

use authbridge_core::{AuthorizationState, Provider};
use authbridge_gateway::oauth::PkceChallenge;
use axum::http::StatusCode;
use chrono::Duration;
use pretty_assertions::assert_eq;
use tests::{mount_code_exchange, query_param, TestBridge, CLIENT_REDIRECT};

#[tokio::test]
async fn test_state_is_single_use() {
    let bridge = TestBridge::start(&[Provider::Google]).await;
    mount_code_exchange(&bridge.mock, Provider::Google, "google-at", 3600).await;
    let client_id = bridge.register_client().await;
    let pkce = PkceChallenge::generate();

    let consent = bridge
        .get(&bridge.authorize_uri(&client_id, &pkce, Some("google")))
        .await
        .location();
    let state = query_param(&consent, "state").unwrap();
    let callback = format!("/callback?code=provider-code&state={}", state);

    let first = bridge.get(&callback).await;
    assert_eq!(first.status, StatusCode::FOUND);

    let replay = bridge.get(&callback).await;
    assert_eq!(replay.status, StatusCode::BAD_REQUEST);
    assert!(replay.header("location").is_none());

    let unknown = bridge.get("/callback?code=provider-code&state=never-issued").await;
    assert_eq!(unknown.status, StatusCode::BAD_REQUEST);
    assert_eq!(replay.body, unknown.body);

    let missing = bridge.get("/callback?code=provider-code").await;
    assert_eq!(missing.status, StatusCode::BAD_REQUEST);
    assert_eq!(missing.body, unknown.body);
}

#[tokio::test]
async fn test_expired_state_looks_like_unknown_state() {
    let bridge = TestBridge::start(&[Provider::Google]).await;
    let expired = AuthorizationState::new(
        "expired-state",
        "grant-1",
        Provider::Google,
        CLIENT_REDIRECT,
        "verifier",
        "challenge",
        Duration::seconds(-1),
    );
    bridge.store.save_verifier(&expired).await.unwrap();

    let response = bridge.get("/callback?code=c&state=expired-state").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let unknown = bridge.get("/callback?code=c&state=other").await;
    assert_eq!(response.body, unknown.body);
    assert!(response.text().contains("authorization session expired"));
}

#[tokio::test]
async fn test_state_from_abandoned_grant_is_rejected() {
    let bridge = TestBridge::start(&[Provider::Google]).await;
    // Valid state whose grant was never registered as pending
    let orphan = AuthorizationState::new(
        "orphan-state",
        "no-such-grant",
        Provider::Google,
        CLIENT_REDIRECT,
        "verifier",
        "challenge",
        Duration::minutes(10),
    );
    bridge.store.save_verifier(&orphan).await.unwrap();

    let response = bridge.get("/callback?code=c&state=orphan-state").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.header("location").is_none());
}
