//! `/access-token` and `/revoke`

use authbridge_core::Provider;
use authbridge_gateway::oauth::PkceChallenge;
use axum::http::StatusCode;
use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use tests::{mount_code_exchange, mount_refresh, TestBridge, CLIENT_REDIRECT};

async fn bridge_with_code() -> (TestBridge, String, PkceChallenge, String) {
    let bridge = TestBridge::start(&[Provider::Google]).await;
    mount_code_exchange(&bridge.mock, Provider::Google, "google-at-1", 3600).await;
    let client_id = bridge.register_client().await;
    let pkce = PkceChallenge::generate();
    let code = bridge.authorize(&client_id, &pkce, Some("google")).await;
    (bridge, client_id, pkce, code)
}

async fn redeem(bridge: &TestBridge, client_id: &str, code: &str, verifier: &str) -> tests::TestResponse {
    bridge
        .post_form(
            "/access-token",
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", CLIENT_REDIRECT),
                ("client_id", client_id),
                ("code_verifier", verifier),
            ],
        )
        .await
}

#[tokio::test]
async fn test_code_is_single_use() {
    let (bridge, client_id, pkce, code) = bridge_with_code().await;

    let first = redeem(&bridge, &client_id, &code, &pkce.verifier).await;
    assert_eq!(first.status, StatusCode::OK);

    let second = redeem(&bridge, &client_id, &code, &pkce.verifier).await;
    assert_eq!(second.status, StatusCode::BAD_REQUEST);
    assert_eq!(second.json()["error"], "invalid_grant");

    // The replay does not touch the session minted by the first redemption
    let bearer = first.json()["access_token"].as_str().unwrap().to_string();
    let envelope = bridge.state.tokens.verify(&bearer).unwrap();
    assert!(!bridge.store.is_invalidated(&envelope.session_id).await.unwrap());
}

#[tokio::test]
async fn test_wrong_verifier_is_invalid_grant() {
    let (bridge, client_id, _, code) = bridge_with_code().await;
    let other = PkceChallenge::generate();

    let response = redeem(&bridge, &client_id, &code, &other.verifier).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["error"], "invalid_grant");
}

#[tokio::test]
async fn test_redirect_uri_must_match_authorization() {
    let (bridge, client_id, pkce, code) = bridge_with_code().await;

    let response = bridge
        .post_form(
            "/access-token",
            &[
                ("grant_type", "authorization_code"),
                ("code", code.as_str()),
                ("redirect_uri", "http://127.0.0.1:33418/elsewhere"),
                ("client_id", client_id.as_str()),
                ("code_verifier", pkce.verifier.as_str()),
            ],
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["error"], "invalid_grant");
}

#[tokio::test]
async fn test_unsupported_grant_type() {
    let bridge = TestBridge::start(&[]).await;
    let response = bridge
        .post_form("/access-token", &[("grant_type", "client_credentials")])
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["error"], "unsupported_grant_type");
}

#[tokio::test]
async fn test_refresh_grant_refreshes_stale_provider_tokens() {
    let bridge = TestBridge::start(&[Provider::Google]).await;
    // Inside the clock skew window, so the first refresh has to call Google
    mount_code_exchange(&bridge.mock, Provider::Google, "google-at-1", 30).await;
    mount_refresh(&bridge.mock, Provider::Google, "google-at-2", 1).await;

    let tokens = bridge.connect(Some("google")).await;
    let first = bridge.state.tokens.verify(tokens["access_token"].as_str().unwrap()).unwrap();
    let refresh_token = tokens["refresh_token"].as_str().unwrap();

    let response = bridge
        .post_form(
            "/access-token",
            &[("grant_type", "refresh_token"), ("refresh_token", refresh_token)],
        )
        .await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.text());

    let json = response.json();
    assert_eq!(json["refresh_token"].as_str(), Some(refresh_token));
    let next = bridge.state.tokens.verify(json["access_token"].as_str().unwrap()).unwrap();
    assert_eq!(next.session_id, first.session_id);
    assert_eq!(next.token(Provider::Google).unwrap().access_token, "google-at-2");
    assert_eq!(
        next.token(Provider::Google).unwrap().refresh_token.as_deref(),
        Some("google-refresh")
    );
}

#[tokio::test]
async fn test_access_bearer_is_not_a_refresh_token() {
    let bridge = TestBridge::start(&[Provider::Google]).await;
    mount_code_exchange(&bridge.mock, Provider::Google, "google-at-1", 3600).await;
    let tokens = bridge.connect(Some("google")).await;

    let response = bridge
        .post_form(
            "/access-token",
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", tokens["access_token"].as_str().unwrap()),
            ],
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["error"], "invalid_grant");
}

#[tokio::test]
async fn test_revoke_ends_session() {
    let bridge = TestBridge::start(&[Provider::Google]).await;
    mount_code_exchange(&bridge.mock, Provider::Google, "google-at-1", 3600).await;
    let tokens = bridge.connect(Some("google")).await;
    let access = tokens["access_token"].as_str().unwrap();
    let session_id = bridge.state.tokens.verify(access).unwrap().session_id;

    let response = bridge.post_form("/revoke", &[("token", access)]).await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(bridge.store.is_invalidated(&session_id).await.unwrap());
    assert!(bridge.store.load_tokens(&session_id).await.unwrap().is_none());

    let response = bridge
        .post_form(
            "/access-token",
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", tokens["refresh_token"].as_str().unwrap()),
            ],
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["error"], "invalid_grant");
}

#[tokio::test]
async fn test_revoke_unknown_token_is_ok() {
    let bridge = TestBridge::start(&[]).await;
    let response = bridge.post_form("/revoke", &[("token", "not-a-bearer")]).await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn test_missing_grant_type_is_invalid_request() {
    let (bridge, client_id, pkce, code) = bridge_with_code().await;

    let response = bridge
        .post_form(
            "/access-token",
            &[
                ("code", code.as_str()),
                ("client_id", client_id.as_str()),
                ("code_verifier", pkce.verifier.as_str()),
            ],
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["error"], "invalid_request");
    assert_eq!(response.header("cache-control").as_deref(), Some("no-store"));
}

#[tokio::test]
async fn test_revocation_outlives_purge_while_refresh_token_is_valid() {
    let bridge = TestBridge::start_with(&[Provider::Google], |config| {
        config.refresh_token_ttl = Duration::days(60);
    })
    .await;
    mount_code_exchange(&bridge.mock, Provider::Google, "google-at-1", 3600).await;
    let tokens = bridge.connect(Some("google")).await;
    let refresh_token = tokens["refresh_token"].as_str().unwrap();

    let response = bridge.post_form("/revoke", &[("token", refresh_token)]).await;
    assert_eq!(response.status, StatusCode::OK);

    // Sweep as if 45 days had passed; the refresh envelope is good for 60
    bridge.state.sweep_at(Utc::now() + Duration::days(45)).await;

    let response = bridge
        .post_form(
            "/access-token",
            &[("grant_type", "refresh_token"), ("refresh_token", refresh_token)],
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["error"], "invalid_grant");
}
