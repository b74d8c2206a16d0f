//! Login, session and identity resolution through the guard chain

use axum::http::{header, StatusCode};
use chrono::{Duration, Utc};
use serde_json::{json, Value};

use approval_gateway::{db::AccountRepository, models::{events, Role}};

use crate::common::*;

#[tokio::test]
async fn test_health_is_public_and_carries_security_headers() {
    let app = TestApp::new().await;

    let response = app.get("/api/v1/health").await;
    response.assert_ok();

    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(response.header("x-content-type-options"), Some("nosniff"));
    assert_eq!(response.header("x-frame-options"), Some("DENY"));
}

#[tokio::test]
async fn test_public_routes_report_anonymous_allowance() {
    let app = TestApp::new().await;

    for response in [
        app.get("/api/v1/health").await,
        app.post_json("/api/v1/auth/logout", json!({})).await,
    ] {
        response.assert_ok();
        assert_eq!(response.header("x-ratelimit-limit"), Some("30"));
        assert_eq!(response.header("x-ratelimit-remaining"), Some("30"));
    }
}

#[tokio::test]
async fn test_cors_allows_only_configured_origins() {
    let mut config = test_config();
    config.server.cors_allowed_origins = vec!["https://review.example.com".to_string()];
    let app = TestApp::with_config(config).await;

    let request = |origin: &str| {
        axum::http::Request::builder()
            .uri("/api/v1/health")
            .header(header::ORIGIN, origin)
            .body(axum::body::Body::empty())
            .unwrap()
    };

    let allowed = app.request(request("https://review.example.com")).await;
    allowed.assert_ok();
    assert_eq!(
        allowed.header("access-control-allow-origin"),
        Some("https://review.example.com")
    );

    let other = app.request(request("https://elsewhere.example.com")).await;
    assert!(other.header("access-control-allow-origin").is_none());
}

#[tokio::test]
async fn test_detailed_health_probes_database() {
    let app = TestApp::new().await;

    let response = app.get("/api/v1/health/detailed").await;
    response.assert_ok();

    let body: Value = response.json();
    assert_eq!(body["components"]["database"]["status"], "healthy");
}

#[tokio::test]
async fn test_login_sets_session_cookie_and_resolves_identity() {
    let app = TestApp::new().await;
    let admin = create_account(&app, Role::Admin, None).await;

    let response = app
        .post_json(
            "/api/v1/auth/login",
            json!({ "email": admin.account.email, "password": TEST_PASSWORD }),
        )
        .await;
    response.assert_ok();

    let cookie = response.header(header::SET_COOKIE.as_str()).unwrap_or_default();
    assert!(cookie.starts_with(&format!("{}=", app.state.sessions.cookie_name())));
    assert!(cookie.contains("HttpOnly"));

    let body: Value = response.json();
    let session = body["session_token"].as_str().unwrap();
    assert!(body["account"].get("password_hash").is_none());

    let me = app.get_as("/api/v1/auth/me", session).await;
    me.assert_ok();
    let me: Value = me.json();
    assert_eq!(me["role"], "admin");
    assert_eq!(me["identity"]["account_id"], admin.id());

    let succeeded = app.events(events::LOGIN_SUCCEEDED).await;
    assert_eq!(succeeded.len(), 1);
    assert_eq!(succeeded[0].actor.as_deref(), Some(format!("account:{}", admin.id()).as_str()));
}

#[tokio::test]
async fn test_login_with_wrong_password_is_rejected_and_audited() {
    let app = TestApp::new().await;
    let client = {
        let seeded = seed_directory(&app).await;
        seeded.client_a
    };

    let response = app
        .post_json(
            "/api/v1/auth/login",
            json!({ "email": client.account.email, "password": "not-the-password" }),
        )
        .await;
    response.assert_unauthorized();

    let failed = app.events(events::LOGIN_FAILED).await;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].reason.as_deref(), Some("wrong_password"));
}

#[tokio::test]
async fn test_login_flood_guard_throttles_per_address() {
    let mut config = test_config();
    config.rate_limit.login.requests_per_second = 1;
    config.rate_limit.login.burst_size = 2;
    let app = TestApp::with_config(config).await;

    let attempt = json!({ "email": "nobody@example.com", "password": "whatever-it-is" });
    app.post_json("/api/v1/auth/login", attempt.clone()).await.assert_unauthorized();
    app.post_json("/api/v1/auth/login", attempt.clone()).await.assert_unauthorized();

    let response = app.post_json("/api/v1/auth/login", attempt).await;
    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
    assert!(response.header("retry-after").is_some());

    let throttled = app.events(events::RATE_LIMIT_EXCEEDED).await;
    assert_eq!(throttled[0].reason.as_deref(), Some("login_flood"));
}

#[tokio::test]
async fn test_missing_credentials_is_unauthenticated_with_anonymous_limit() {
    let app = TestApp::new().await;

    let response = app.get("/api/v1/auth/me").await;
    response.assert_unauthorized();
    assert_eq!(response.code().as_deref(), Some("no_credentials"));
    // Anonymous callers get half the base API limit
    assert_eq!(response.header("x-ratelimit-limit"), Some("30"));

    let failed = app.events(events::AUTH_FAILED).await;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].reason.as_deref(), Some("no_credentials"));
}

#[tokio::test]
async fn test_browser_requests_are_redirected_to_login() {
    let app = TestApp::new().await;

    let response = app.get_html("/api/v1/auth/me", None).await;
    response.assert_status(StatusCode::SEE_OTHER);

    let location = response.header("location").unwrap();
    assert!(location.starts_with("/login?flash="));
    assert!(location.ends_with("&next=%2Fapi%2Fv1%2Fauth%2Fme"));
}

#[tokio::test]
async fn test_session_cookie_is_accepted() {
    let app = TestApp::new().await;
    let seeded = seed_directory(&app).await;

    let response = app
        .get_html("/api/v1/auth/me", Some(&seeded.client_a.cookie(&app)))
        .await;
    response.assert_ok();

    let body: Value = response.json();
    assert_eq!(body["role"], "client");
    assert_eq!(body["tenant_id"], seeded.tenant_a.id);
}

#[tokio::test]
async fn test_expired_session_is_rejected() {
    let app = TestApp::new().await;
    let admin = create_account(&app, Role::Admin, None).await;

    let (stale, _) = app
        .state
        .sessions
        .issue_at(admin.id(), Utc::now() - Duration::days(3))
        .unwrap();

    let response = app.get_as("/api/v1/auth/me", &stale).await;
    response.assert_unauthorized();
    assert_eq!(response.code().as_deref(), Some("session_expired"));
}

#[tokio::test]
async fn test_inactive_account_is_rejected() {
    let app = TestApp::new().await;
    let agency = create_account(&app, Role::Agency, None).await;

    AccountRepository::new(&app.state.db)
        .set_active(agency.id(), false)
        .await
        .unwrap();

    let response = app.get_as("/api/v1/auth/me", &agency.session).await;
    response.assert_unauthorized();
    assert_eq!(response.code().as_deref(), Some("account_inactive"));
}

#[tokio::test]
async fn test_logout_clears_cookie() {
    let app = TestApp::new().await;

    let response = app.post_json("/api/v1/auth/logout", json!({})).await;
    response.assert_ok();

    let cookie = response.header(header::SET_COOKIE.as_str()).unwrap_or_default();
    assert!(cookie.starts_with(&format!("{}=", app.state.sessions.cookie_name())));
}
