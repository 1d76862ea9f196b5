//! Authorization flow: /authorize → provider consent → /callback → client redirect

use authbridge_core::Provider;
use authbridge_gateway::oauth::PkceChallenge;
use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use serde_json::json;
use tests::{
    mount_accessible_resources, mount_code_exchange, query_param, token_path, TestBridge, BASE_URL,
    CLIENT_REDIRECT,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn test_single_provider_flow() {
    let bridge = TestBridge::start(&[Provider::Google]).await;
    mount_code_exchange(&bridge.mock, Provider::Google, "google-at-1", 3600).await;

    let client_id = bridge.register_client().await;
    let pkce = PkceChallenge::generate();

    // First hop goes to the provider with our own callback and PKCE
    let response = bridge.get(&bridge.authorize_uri(&client_id, &pkce, Some("google"))).await;
    assert_eq!(response.status, StatusCode::FOUND);
    let consent = response.location();
    assert!(consent.as_str().starts_with(&bridge.mock.uri()));
    assert_eq!(
        query_param(&consent, "redirect_uri").as_deref(),
        Some(format!("{}/callback", BASE_URL).as_str())
    );
    assert_eq!(query_param(&consent, "code_challenge_method").as_deref(), Some("S256"));
    // The provider sees the bridge's challenge, not the client's
    assert_ne!(query_param(&consent, "code_challenge").as_deref(), Some(pkce.challenge.as_str()));

    let state = query_param(&consent, "state").unwrap();
    let response = bridge
        .get(&format!("/callback?code=provider-code&state={}", state))
        .await;
    assert_eq!(response.status, StatusCode::FOUND);
    let back = response.location();
    assert!(back.as_str().starts_with(CLIENT_REDIRECT));
    assert_eq!(query_param(&back, "state").as_deref(), Some("client-state-1"));
    let code = query_param(&back, "code").unwrap();

    let response = bridge
        .post_form(
            "/access-token",
            &[
                ("grant_type", "authorization_code"),
                ("code", code.as_str()),
                ("redirect_uri", CLIENT_REDIRECT),
                ("client_id", client_id.as_str()),
                ("code_verifier", pkce.verifier.as_str()),
            ],
        )
        .await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.text());
    assert_eq!(response.header("cache-control").as_deref(), Some("no-store"));

    let json = response.json();
    assert_eq!(json["token_type"], "Bearer");
    assert_eq!(json["expires_in"], 3600);
    assert!(json["refresh_token"].is_string());

    let envelope = bridge.state.tokens.verify(json["access_token"].as_str().unwrap()).unwrap();
    assert_eq!(envelope.client_id, client_id);
    assert_eq!(envelope.token(Provider::Google).unwrap().access_token, "google-at-1");

    let stored = bridge.store.load_tokens(&envelope.session_id).await.unwrap().unwrap();
    assert_eq!(stored[&Provider::Google].refresh_token.as_deref(), Some("google-refresh"));
}

#[tokio::test]
async fn test_authorize_accepts_form_post() {
    let bridge = TestBridge::start(&[Provider::Google]).await;
    let client_id = bridge.register_client().await;
    let pkce = PkceChallenge::generate();

    let response = bridge
        .post_form(
            "/authorize",
            &[
                ("response_type", "code"),
                ("client_id", client_id.as_str()),
                ("redirect_uri", CLIENT_REDIRECT),
                ("code_challenge", pkce.challenge.as_str()),
                ("code_challenge_method", "S256"),
                ("state", "client-state-1"),
                ("provider", "google"),
            ],
        )
        .await;
    assert_eq!(response.status, StatusCode::FOUND);
    assert!(query_param(&response.location(), "state").is_some());
}

#[tokio::test]
async fn test_chained_providers_collect_every_token() {
    let bridge = TestBridge::start(&[Provider::Atlassian, Provider::Figma]).await;
    mount_code_exchange(&bridge.mock, Provider::Atlassian, "atlassian-at", 3600).await;
    mount_code_exchange(&bridge.mock, Provider::Figma, "figma-at", 3600).await;
    mount_accessible_resources(&bridge.mock).await;

    let json = bridge.connect(Some("atlassian,figma")).await;
    let envelope = bridge.state.tokens.verify(json["access_token"].as_str().unwrap()).unwrap();
    assert_eq!(
        envelope.providers().collect::<Vec<_>>(),
        vec![Provider::Atlassian, Provider::Figma]
    );

    let stored = bridge.store.load_tokens(&envelope.session_id).await.unwrap().unwrap();
    assert_eq!(stored[&Provider::Atlassian].access_token, "atlassian-at");
    assert_eq!(stored[&Provider::Atlassian].raw["cloud_id"], json!("cloud-1"));
    assert_eq!(stored[&Provider::Figma].access_token, "figma-at");
}

#[tokio::test]
async fn test_all_configured_providers_when_none_requested() {
    let bridge = TestBridge::start(&[Provider::Figma, Provider::Google]).await;
    mount_code_exchange(&bridge.mock, Provider::Figma, "figma-at", 3600).await;
    mount_code_exchange(&bridge.mock, Provider::Google, "google-at", 3600).await;

    let json = bridge.connect(None).await;
    let envelope = bridge.state.tokens.verify(json["access_token"].as_str().unwrap()).unwrap();
    assert_eq!(envelope.provider_tokens.len(), 2);
}

// =============================================================================
// Rejections
// =============================================================================

#[tokio::test]
async fn test_unknown_client_is_shown_not_redirected() {
    let bridge = TestBridge::start(&[Provider::Google]).await;
    let pkce = PkceChallenge::generate();

    let response = bridge.get(&bridge.authorize_uri("mcp_unknown", &pkce, None)).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["error"], "invalid_client");
    assert!(response.header("location").is_none());
}

#[tokio::test]
async fn test_unregistered_redirect_is_shown_not_redirected() {
    let bridge = TestBridge::start(&[Provider::Google]).await;
    let client_id = bridge.register_client().await;
    let pkce = PkceChallenge::generate();

    let uri = bridge
        .authorize_uri(&client_id, &pkce, None)
        .replace(&urlencoding_redirect(), "https%3A%2F%2Fevil.example%2Fcb");
    let response = bridge.get(&uri).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["error"], "invalid_request");
    assert!(response.header("location").is_none());
}

fn urlencoding_redirect() -> String {
    url::form_urlencoded::byte_serialize(CLIENT_REDIRECT.as_bytes()).collect()
}

#[tokio::test]
async fn test_plain_challenge_method_is_rejected() {
    let bridge = TestBridge::start(&[Provider::Google]).await;
    let client_id = bridge.register_client().await;
    let pkce = PkceChallenge::generate();

    let uri = bridge
        .authorize_uri(&client_id, &pkce, None)
        .replace("code_challenge_method=S256", "code_challenge_method=plain");
    let response = bridge.get(&uri).await;
    assert_eq!(response.status, StatusCode::FOUND);

    let location = response.location();
    assert!(location.as_str().starts_with(CLIENT_REDIRECT));
    assert_eq!(query_param(&location, "error").as_deref(), Some("invalid_request"));
    assert_eq!(query_param(&location, "state").as_deref(), Some("client-state-1"));
}

#[tokio::test]
async fn test_unconfigured_provider_redirects_error() {
    let bridge = TestBridge::start(&[Provider::Google]).await;
    let client_id = bridge.register_client().await;
    let pkce = PkceChallenge::generate();

    let response = bridge.get(&bridge.authorize_uri(&client_id, &pkce, Some("figma"))).await;
    assert_eq!(response.status, StatusCode::FOUND);
    let location = response.location();
    assert_eq!(query_param(&location, "error").as_deref(), Some("invalid_request"));

    let response = bridge.get(&bridge.authorize_uri(&client_id, &pkce, Some("dropbox"))).await;
    assert_eq!(query_param(&response.location(), "error").as_deref(), Some("invalid_request"));
}

#[tokio::test]
async fn test_provider_denial_reaches_client() {
    let bridge = TestBridge::start(&[Provider::Google]).await;
    let client_id = bridge.register_client().await;
    let pkce = PkceChallenge::generate();

    let consent = bridge
        .get(&bridge.authorize_uri(&client_id, &pkce, Some("google")))
        .await
        .location();
    let state = query_param(&consent, "state").unwrap();

    let response = bridge
        .get(&format!("/callback?error=access_denied&error_description=nope&state={}", state))
        .await;
    assert_eq!(response.status, StatusCode::FOUND);
    let location = response.location();
    assert!(location.as_str().starts_with(CLIENT_REDIRECT));
    assert_eq!(query_param(&location, "error").as_deref(), Some("access_denied"));
    assert_eq!(query_param(&location, "error_description").as_deref(), Some("nope"));
    assert_eq!(query_param(&location, "state").as_deref(), Some("client-state-1"));
}

#[tokio::test]
async fn test_failed_exchange_reaches_client() {
    let bridge = TestBridge::start(&[Provider::Google]).await;
    Mock::given(method("POST"))
        .and(path(token_path(Provider::Google)))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Bad code"
        })))
        .mount(&bridge.mock)
        .await;

    let client_id = bridge.register_client().await;
    let pkce = PkceChallenge::generate();
    let consent = bridge
        .get(&bridge.authorize_uri(&client_id, &pkce, Some("google")))
        .await
        .location();
    let state = query_param(&consent, "state").unwrap();

    let response = bridge
        .get(&format!("/callback?code=bad&state={}", state))
        .await;
    let location = response.location();
    assert_eq!(query_param(&location, "error").as_deref(), Some("access_denied"));
    assert_eq!(query_param(&location, "state").as_deref(), Some("client-state-1"));
    assert!(query_param(&location, "code").is_none());
}

#[tokio::test]
async fn test_provider_outage_is_temporarily_unavailable() {
    let bridge = TestBridge::start(&[Provider::Google]).await;
    Mock::given(method("POST"))
        .and(path(token_path(Provider::Google)))
        .respond_with(ResponseTemplate::new(503))
        .mount(&bridge.mock)
        .await;

    let client_id = bridge.register_client().await;
    let pkce = PkceChallenge::generate();
    let consent = bridge
        .get(&bridge.authorize_uri(&client_id, &pkce, Some("google")))
        .await
        .location();
    let state = query_param(&consent, "state").unwrap();

    let location = bridge
        .get(&format!("/callback?code=c&state={}", state))
        .await
        .location();
    assert_eq!(query_param(&location, "error").as_deref(), Some("temporarily_unavailable"));
}
