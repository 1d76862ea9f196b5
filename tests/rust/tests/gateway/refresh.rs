//! Provider token refresh through the auth context accessor

use authbridge_core::{MissingTokenReason, Provider};
use authbridge_gateway::AuthContext;
use pretty_assertions::assert_eq;
use serde_json::Value;
use tests::{
    init_test_tracing, mount_accessible_resources, mount_code_exchange, mount_refresh,
    refresh_path, TestBridge,
};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, ResponseTemplate};

fn context(bridge: &TestBridge, tokens: &Value) -> AuthContext {
    let bearer = tokens["access_token"].as_str().unwrap();
    AuthContext::new(bridge.state.tokens.verify(bearer).unwrap())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reads_share_one_refresh() {
    init_test_tracing();
    let bridge = TestBridge::start(&[Provider::Google]).await;
    mount_code_exchange(&bridge.mock, Provider::Google, "google-at-1", 30).await;
    mount_refresh(&bridge.mock, Provider::Google, "google-at-2", 1).await;

    let tokens = bridge.connect(Some("google")).await;
    let ctx = context(&bridge, &tokens);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let accessor = bridge.state.accessor.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { accessor.get_auth_info_safe(&ctx, "concurrent").await })
        })
        .collect();

    for handle in handles {
        let info = handle.await.unwrap().unwrap();
        assert_eq!(info.get(Provider::Google).unwrap().access_token, "google-at-2");
    }

    // Rotation-safe: the refresh token the provider saw was used exactly once
    bridge.mock.verify().await;

    let stored = bridge.store.load_tokens(&ctx.session_id).await.unwrap().unwrap();
    assert_eq!(stored[&Provider::Google].access_token, "google-at-2");
}

#[tokio::test]
async fn test_stale_atlassian_token_is_refreshed_before_use() {
    let bridge = TestBridge::start(&[Provider::Atlassian]).await;
    mount_code_exchange(&bridge.mock, Provider::Atlassian, "atlassian-at-1", 10).await;
    mount_accessible_resources(&bridge.mock).await;
    mount_refresh(&bridge.mock, Provider::Atlassian, "atlassian-at-2", 1).await;

    let tokens = bridge.connect(Some("atlassian")).await;
    let ctx = context(&bridge, &tokens);
    assert_eq!(ctx.envelope.token(Provider::Atlassian).unwrap().access_token, "atlassian-at-1");

    let info = bridge.state.accessor.get_auth_info_safe(&ctx, "jira_search").await.unwrap();
    let token = info.get(Provider::Atlassian).unwrap();
    assert_eq!(token.access_token, "atlassian-at-2");
    assert!(token.expires_in() > 3000);

    // A new bearer carrying the refreshed token is waiting for the client
    let reissued = info.reissued_bearer.expect("re-issued bearer");
    let envelope = bridge.state.tokens.verify(&reissued).unwrap();
    assert_eq!(envelope.session_id, ctx.session_id);
    assert_eq!(envelope.token(Provider::Atlassian).unwrap().access_token, "atlassian-at-2");

    // Second read is served from the store without another refresh
    let again = bridge.state.accessor.get_auth_info_safe(&ctx, "jira_search").await.unwrap();
    assert_eq!(again.get(Provider::Atlassian).unwrap().access_token, "atlassian-at-2");
}

#[tokio::test]
async fn test_provider_outage_fails_only_that_provider() {
    let bridge = TestBridge::start(&[Provider::Figma, Provider::Google]).await;
    mount_code_exchange(&bridge.mock, Provider::Figma, "figma-at", 3600).await;
    mount_code_exchange(&bridge.mock, Provider::Google, "google-at-1", 30).await;
    Mock::given(method("POST"))
        .and(path(refresh_path(Provider::Google)))
        .and(body_string_contains("refresh_token="))
        .respond_with(ResponseTemplate::new(503))
        .mount(&bridge.mock)
        .await;

    let tokens = bridge.connect(Some("figma,google")).await;
    let ctx = context(&bridge, &tokens);

    let info = bridge.state.accessor.get_auth_info_safe(&ctx, "figma_get_file").await.unwrap();
    assert_eq!(info.get(Provider::Figma).unwrap().access_token, "figma-at");

    let err = info.require(Provider::Google).unwrap_err();
    assert!(err.retryable);
    assert!(matches!(err.reason, MissingTokenReason::RefreshUnavailable(_)));

    // Retryable failures keep the refresh token for next time
    let stored = bridge.store.load_tokens(&ctx.session_id).await.unwrap().unwrap();
    assert_eq!(stored[&Provider::Google].refresh_token.as_deref(), Some("google-refresh"));
}

#[tokio::test]
async fn test_rejected_refresh_is_final() {
    let bridge = TestBridge::start_with(&[Provider::Google], |config| {
        // Hour-long provider tokens already count as stale
        config.clock_skew = chrono::Duration::hours(2);
    })
    .await;
    mount_code_exchange(&bridge.mock, Provider::Google, "google-at-1", 3600).await;
    Mock::given(method("POST"))
        .and(path(refresh_path(Provider::Google)))
        .and(body_string_contains("refresh_token="))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant"
        })))
        .mount(&bridge.mock)
        .await;

    let tokens = bridge.connect(Some("google")).await;
    let ctx = context(&bridge, &tokens);

    let err = bridge
        .state
        .accessor
        .get_auth_info_safe(&ctx, "drive_search")
        .await
        .unwrap_err();
    assert!(!err.retryable);
    assert_eq!(
        err.user_message(),
        "No valid Google access token found; please authenticate with Google first"
    );

    // The rejected refresh token is forgotten so later reads fail fast
    let stored = bridge.store.load_tokens(&ctx.session_id).await.unwrap().unwrap();
    assert!(stored[&Provider::Google].refresh_token.is_none());
}
