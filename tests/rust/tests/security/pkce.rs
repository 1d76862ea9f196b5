//! PKCE binds the bridge code to the client that started the flow

use authbridge_core::Provider;
use authbridge_gateway::oauth::PkceChallenge;
use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use tests::{mount_code_exchange, TestBridge, CLIENT_REDIRECT};

#[test]
fn test_verify_requires_matching_verifier() {
    let pkce = PkceChallenge::generate();
    assert!(PkceChallenge::verify(&pkce.verifier, &pkce.challenge));

    let other = PkceChallenge::generate();
    assert!(!PkceChallenge::verify(&other.verifier, &pkce.challenge));
    // The challenge itself is not a verifier
    assert!(!PkceChallenge::verify(&pkce.challenge, &pkce.challenge));
}

#[test]
fn test_verify_rejects_malformed_verifiers() {
    let short = "a".repeat(42);
    assert!(!PkceChallenge::verify(&short, &PkceChallenge::from_verifier(&short).challenge));

    let long = "a".repeat(129);
    assert!(!PkceChallenge::verify(&long, &PkceChallenge::from_verifier(&long).challenge));

    let bad_chars = format!("{}!", "a".repeat(43));
    assert!(!PkceChallenge::verify(&bad_chars, &PkceChallenge::from_verifier(&bad_chars).challenge));
}

#[test]
fn test_generated_pairs_are_unique() {
    let a = PkceChallenge::generate();
    let b = PkceChallenge::generate();
    assert_ne!(a.verifier, b.verifier);
    assert_eq!(a.verifier.len(), 43);
    assert_eq!(a.method, "S256");
}

#[tokio::test]
async fn test_intercepted_code_is_useless_without_verifier() {
    let bridge = TestBridge::start(&[Provider::Google]).await;
    mount_code_exchange(&bridge.mock, Provider::Google, "google-at", 3600).await;
    let client_id = bridge.register_client().await;
    let pkce = PkceChallenge::generate();
    let code = bridge.authorize(&client_id, &pkce, Some("google")).await;

    let attacker = PkceChallenge::generate();
    let response = bridge
        .post_form(
            "/access-token",
            &[
                ("grant_type", "authorization_code"),
                ("code", code.as_str()),
                ("redirect_uri", CLIENT_REDIRECT),
                ("client_id", client_id.as_str()),
                ("code_verifier", attacker.verifier.as_str()),
            ],
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["error"], "invalid_grant");

    // A failed attempt burns the code; the rightful client cannot retry it either
    let response = bridge
        .post_form(
            "/access-token",
            &[
                ("grant_type", "authorization_code"),
                ("code", code.as_str()),
                ("code_verifier", pkce.verifier.as_str()),
            ],
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}
