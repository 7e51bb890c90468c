//! Passkey ceremonies driven through the HTTP API.

#![allow(clippy::unwrap_used)]

use axum::http::StatusCode;
use serde_json::json;

use portcullis_gateway::middleware::{SESSION_COOKIE_NAME, TOKEN_COOKIE_NAME};
use portcullis_gateway::services::ceremony::fake::FakeCeremony;
use portcullis_gateway::store::Store as _;
use portcullis_integration_tests::{TestGateway, credential_for};

// ============================================================================
// Registration
// ============================================================================

#[tokio::test]
async fn test_first_registrant_becomes_admin() {
    let gw = TestGateway::new();
    let alice = gw.sign_up("alice@example.com").await;
    let bob = gw.sign_up("bob@example.com").await;

    let me = gw.get("/api/me", Some(&alice)).await.json();
    assert_eq!(me["state"], "authenticated");
    assert_eq!(me["username"], "alice@example.com");
    assert_eq!(me["admin"], true);

    let me = gw.get("/api/me", Some(&bob)).await.json();
    assert_eq!(me["username"], "bob@example.com");
    assert_eq!(me["admin"], false);
}

#[tokio::test]
async fn test_registration_leaves_session_unauthenticated() {
    let gw = TestGateway::new();
    let cookie = gw.register("alice@example.com").await;

    let me = gw.get("/api/me", Some(&cookie)).await.json();
    assert_eq!(me["state"], "null");
    assert!(me["username"].is_null());
}

#[tokio::test]
async fn test_registering_a_taken_username_is_rejected() {
    let gw = TestGateway::new();
    gw.register("alice@example.com").await;

    let cookie = gw.new_session().await;
    let resp = gw
        .post_json(
            "/api/auth/register/start",
            Some(&cookie),
            &json!({"username": "alice@example.com"}),
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_abandoned_registration_does_not_block_the_username() {
    let gw = TestGateway::new();
    let abandoned = gw.new_session().await;
    let start = gw
        .post_json(
            "/api/auth/register/start",
            Some(&abandoned),
            &json!({"username": "bob@example.com"}),
        )
        .await;
    assert_eq!(start.status, StatusCode::OK);

    let cookie = gw.sign_up("bob@example.com").await;
    let me = gw.get("/api/me", Some(&cookie)).await.json();
    assert_eq!(me["username"], "bob@example.com");
}

#[tokio::test]
async fn test_finish_without_start_is_rejected() {
    let gw = TestGateway::new();
    let cookie = gw.new_session().await;

    let resp = gw
        .post_json(
            "/api/auth/register/finish",
            Some(&cookie),
            &json!({"challenge": "nope", "credential_id": "x"}),
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);

    let me = gw.get("/api/me", Some(&cookie)).await.json();
    assert_eq!(me["state"], "null");
}

// ============================================================================
// Login
// ============================================================================

#[tokio::test]
async fn test_login_with_wrong_credential_is_forbidden() {
    let gw = TestGateway::new();
    let cookie = gw.register("alice@example.com").await;

    let start = gw
        .post_json(
            "/api/auth/login/start",
            Some(&cookie),
            &json!({"username": "alice@example.com"}),
        )
        .await;
    let response = FakeCeremony::login_response(&start.json(), "cred-mallory", None);
    let finish = gw
        .post_json("/api/auth/login/finish", Some(&cookie), &response)
        .await;
    assert_eq!(finish.status, StatusCode::FORBIDDEN);

    let me = gw.get("/api/me", Some(&cookie)).await.json();
    assert_eq!(me["state"], "login");
}

#[tokio::test]
async fn test_login_for_unknown_user_is_rejected() {
    let gw = TestGateway::new();
    let cookie = gw.new_session().await;

    let resp = gw
        .post_json(
            "/api/auth/login/start",
            Some(&cookie),
            &json!({"username": "ghost@example.com"}),
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_discoverable_login_resolves_the_user_handle() {
    let gw = TestGateway::new();
    let cookie = gw.register("alice@example.com").await;
    let user_id = gw
        .state
        .store()
        .list_users()
        .await
        .unwrap()
        .into_iter()
        .find(|u| u.name.as_str() == "alice@example.com")
        .unwrap()
        .id;

    let start = gw
        .post_json("/api/auth/login/start", Some(&cookie), &json!({}))
        .await;
    assert_eq!(start.status, StatusCode::OK);

    let response = FakeCeremony::login_response(
        &start.json(),
        &credential_for("alice@example.com"),
        Some(user_id),
    );
    let finish = gw
        .post_json("/api/auth/login/finish", Some(&cookie), &response)
        .await;
    assert_eq!(finish.status, StatusCode::OK, "{}", finish.text());
    assert_eq!(finish.json()["success"], true);

    let me = gw.get("/api/me", Some(&cookie)).await.json();
    assert_eq!(me["username"], "alice@example.com");
}

// ============================================================================
// Additional passkeys
// ============================================================================

#[tokio::test]
async fn test_adding_a_passkey_requires_authentication() {
    let gw = TestGateway::new();
    let cookie = gw.new_session().await;

    let resp = gw
        .post_json("/api/auth/passkeys/start", Some(&cookie), &json!({}))
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_second_passkey_can_log_in() {
    let gw = TestGateway::new();
    let cookie = gw.sign_up("alice@example.com").await;

    let start = gw
        .post_json("/api/auth/passkeys/start", Some(&cookie), &json!({}))
        .await;
    assert_eq!(start.status, StatusCode::OK);
    let response = FakeCeremony::registration_response(&start.json(), "cred-laptop");
    let finish = gw
        .post_json("/api/auth/passkeys/finish", Some(&cookie), &response)
        .await;
    assert_eq!(finish.status, StatusCode::OK, "{}", finish.text());

    let me = gw.get("/api/me", Some(&cookie)).await.json();
    assert_eq!(me["state"], "authenticated");

    let other = gw.new_session().await;
    let start = gw
        .post_json(
            "/api/auth/login/start",
            Some(&other),
            &json!({"username": "alice@example.com"}),
        )
        .await;
    let response = FakeCeremony::login_response(&start.json(), "cred-laptop", None);
    let finish = gw
        .post_json("/api/auth/login/finish", Some(&other), &response)
        .await;
    assert_eq!(finish.status, StatusCode::OK, "{}", finish.text());
}

// ============================================================================
// Logout
// ============================================================================

#[tokio::test]
async fn test_logout_clears_both_cookies() {
    let gw = TestGateway::new();
    let cookie = gw.sign_up("alice@example.com").await;

    let resp = gw
        .post_json("/api/auth/logout", Some(&cookie), &json!({}))
        .await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);

    let cookies = resp.set_cookies();
    for name in [SESSION_COOKIE_NAME, TOKEN_COOKIE_NAME] {
        assert!(
            cookies
                .iter()
                .any(|c| c.starts_with(&format!("{name}=;")) && c.contains("Max-Age=0")),
            "{name} not cleared in {cookies:?}"
        );
    }

    // The old id no longer resolves to an authenticated session
    let me = gw.get("/api/me", Some(&cookie)).await;
    assert!(me.json()["username"].is_null());
    assert_ne!(me.session_cookie().as_deref(), Some(cookie.as_str()));
}
