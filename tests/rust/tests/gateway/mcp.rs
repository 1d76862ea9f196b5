//! Authenticated `/mcp` requests

use authbridge_core::{branding, Invalidation, Provider};
use authbridge_gateway::logging::TraceContext;
use authbridge_gateway::AuthContext;
use axum::http::StatusCode;
use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use tests::{
    initialize_body, mcp_request, mount_code_exchange, mount_refresh, send, send_head, TestBridge,
};
use tower::ServiceExt;

const MCP_SESSION: &str = "mcp-session-id";

async fn connected(bridge: &TestBridge) -> String {
    let tokens = bridge.connect(Some("google")).await;
    tokens["access_token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_authenticated_initialize_opens_mcp_session() {
    let bridge = TestBridge::start(&[Provider::Google]).await;
    mount_code_exchange(&bridge.mock, Provider::Google, "google-at", 3600).await;
    let bearer = connected(&bridge).await;

    let (status, headers) = send_head(
        &bridge.router,
        mcp_request(initialize_body("Standard MCP Client"), Some(&bearer)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let mcp_session = headers.get(MCP_SESSION).unwrap().to_str().unwrap().to_string();
    let session_id = bridge.state.tokens.verify(&bearer).unwrap().session_id;
    assert_eq!(
        bridge.state.mcp_sessions.get(&mcp_session).map(|b| b.session_id.clone()),
        Some(session_id)
    );
}

#[tokio::test]
async fn test_mcp_session_is_bound_to_its_bearer() {
    let bridge = TestBridge::start(&[Provider::Google]).await;
    mount_code_exchange(&bridge.mock, Provider::Google, "google-at", 3600).await;
    let first = connected(&bridge).await;
    let second = connected(&bridge).await;

    let (_, headers) = send_head(
        &bridge.router,
        mcp_request(initialize_body("Standard MCP Client"), Some(&first)),
    )
    .await;
    let mcp_session = headers.get(MCP_SESSION).unwrap().clone();

    // Another session's bearer cannot ride on this MCP session
    let mut request = mcp_request(initialize_body("Standard MCP Client"), Some(&second));
    request.headers_mut().insert(MCP_SESSION, mcp_session);
    let response = send(&bridge.router, request).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert!(response.header("www-authenticate").is_some());
}

#[tokio::test]
async fn test_revoked_bearer_is_rejected() {
    let bridge = TestBridge::start(&[Provider::Google]).await;
    mount_code_exchange(&bridge.mock, Provider::Google, "google-at", 3600).await;
    let bearer = connected(&bridge).await;

    let response = bridge.post_form("/revoke", &[("token", bearer.as_str())]).await;
    assert_eq!(response.status, StatusCode::OK);

    let response = send(
        &bridge.router,
        mcp_request(initialize_body("Standard MCP Client"), Some(&bearer)),
    )
    .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_refreshed_bearer_is_delivered_once() {
    let bridge = TestBridge::start(&[Provider::Google]).await;
    mount_code_exchange(&bridge.mock, Provider::Google, "google-at-1", 30).await;
    mount_refresh(&bridge.mock, Provider::Google, "google-at-2", 1).await;
    let bearer = connected(&bridge).await;

    // A tool read refreshes Google and re-issues the bearer
    let ctx = AuthContext::new(bridge.state.tokens.verify(&bearer).unwrap());
    let info = bridge.state.accessor.get_auth_info_safe(&ctx, "drive_search").await.unwrap();
    let reissued = info.reissued_bearer.unwrap();

    // The old bearer still works and learns about the new one
    let (status, headers) = send_head(
        &bridge.router,
        mcp_request(initialize_body("Standard MCP Client"), Some(&bearer)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers
            .get(branding::REFRESHED_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok()),
        Some(reissued.as_str())
    );

    // Presenting the new bearer acknowledges it
    let (status, headers) = send_head(
        &bridge.router,
        mcp_request(initialize_body("Standard MCP Client"), Some(&reissued)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers.get(branding::REFRESHED_TOKEN_HEADER).is_none());
}

#[tokio::test]
async fn test_refresh_grant_bearer_supersedes_reissued_one() {
    let bridge = TestBridge::start(&[Provider::Google]).await;
    mount_code_exchange(&bridge.mock, Provider::Google, "google-at-1", 30).await;
    mount_refresh(&bridge.mock, Provider::Google, "google-at-2", 1).await;
    let tokens = bridge.connect(Some("google")).await;
    let bearer = tokens["access_token"].as_str().unwrap();
    let session_id = bridge.state.tokens.verify(bearer).unwrap().session_id;

    // A tool read re-issues the bearer first
    let ctx = AuthContext::new(bridge.state.tokens.verify(bearer).unwrap());
    let info = bridge.state.accessor.get_auth_info_safe(&ctx, "drive_search").await.unwrap();
    let reissued = info.reissued_bearer.unwrap();

    // Then the client runs the refresh grant
    let response = bridge
        .post_form(
            "/access-token",
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", tokens["refresh_token"].as_str().unwrap()),
            ],
        )
        .await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.text());
    let granted = response.json()["access_token"].as_str().unwrap().to_string();
    assert_ne!(granted, reissued);
    assert_eq!(bridge.state.orchestrator.latest_bearer(&session_id), Some(granted.clone()));

    // An older bearer is pointed at the granted one, never the other way round
    let (status, headers) = send_head(
        &bridge.router,
        mcp_request(initialize_body("Standard MCP Client"), Some(&reissued)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers
            .get(branding::REFRESHED_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok()),
        Some(granted.as_str())
    );

    let (_, headers) = send_head(
        &bridge.router,
        mcp_request(initialize_body("Standard MCP Client"), Some(&granted)),
    )
    .await;
    assert!(headers.get(branding::REFRESHED_TOKEN_HEADER).is_none());
}

#[tokio::test]
async fn test_sweep_unbinds_dead_mcp_sessions() {
    let bridge = TestBridge::start(&[Provider::Google]).await;
    mount_code_exchange(&bridge.mock, Provider::Google, "google-at", 3600).await;
    let first = connected(&bridge).await;
    let second = connected(&bridge).await;

    let mut mcp_sessions = Vec::new();
    for bearer in [&first, &second] {
        let (status, headers) = send_head(
            &bridge.router,
            mcp_request(initialize_body("Standard MCP Client"), Some(bearer)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        mcp_sessions.push(headers.get(MCP_SESSION).unwrap().to_str().unwrap().to_string());
    }

    // The first bridge session dies behind the endpoint's back
    let first_session = bridge.state.tokens.verify(&first).unwrap().session_id;
    bridge
        .store
        .invalidate(Invalidation::Session(first_session))
        .await
        .unwrap();
    bridge.state.sweep().await;
    assert!(bridge.state.mcp_sessions.get(&mcp_sessions[0]).is_none());
    assert!(bridge.state.mcp_sessions.get(&mcp_sessions[1]).is_some());

    // Idle past the refresh token lifetime
    let later = Utc::now() + bridge.state.config.refresh_token_ttl + Duration::days(1);
    bridge.state.sweep_at(later).await;
    assert!(bridge.state.mcp_sessions.is_empty());
}

#[tokio::test]
async fn test_authenticated_response_carries_session_trace() {
    let bridge = TestBridge::start(&[Provider::Google]).await;
    mount_code_exchange(&bridge.mock, Provider::Google, "google-at", 3600).await;
    let bearer = connected(&bridge).await;
    let envelope = bridge.state.tokens.verify(&bearer).unwrap();

    let response = bridge
        .router
        .clone()
        .oneshot(mcp_request(initialize_body("Standard MCP Client"), Some(&bearer)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let trace = response.extensions().get::<TraceContext>().cloned().unwrap();
    assert_eq!(trace.client_id.as_deref(), Some(envelope.client_id.as_str()));
    assert_eq!(trace.session_id.as_deref(), Some(envelope.session_id.as_str()));
    assert!(trace.exit_line(200, None).contains("client=mcp_"));
}
