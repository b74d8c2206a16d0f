//! Fixed-window API limits and magic-link brute-force protection

use axum::http::StatusCode;
use uuid::Uuid;

use approval_gateway::{config::WindowLimit, models::events};

use crate::common::*;

/// A well-formed token that does not exist, starting with `prefix`
fn bogus_token(prefix: &str) -> String {
    let filler = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
    format!("{}{}", prefix, &filler[..64 - prefix.len()])
}

#[tokio::test]
async fn test_api_limit_throttles_after_quota() {
    let mut config = test_config();
    config.rate_limit.api = WindowLimit {
        max_attempts: 2,
        window_secs: 60,
    };
    let app = TestApp::with_config(config).await;
    let seeded = seed_directory(&app).await;
    let uri = format!("/api/v1/tenants/{}", seeded.tenant_a.id);

    let first = app.get_as(&uri, &seeded.client_a.session).await;
    first.assert_ok();
    assert_eq!(first.header("x-ratelimit-limit"), Some("2"));
    assert_eq!(first.header("x-ratelimit-remaining"), Some("1"));

    let second = app.get_as(&uri, &seeded.client_a.session).await;
    second.assert_ok();
    assert_eq!(second.header("x-ratelimit-remaining"), Some("0"));

    let third = app.get_as(&uri, &seeded.client_a.session).await;
    third.assert_status(StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(third.code().as_deref(), Some("rate_limit_exceeded"));
    assert_eq!(third.header("x-ratelimit-remaining"), Some("0"));
    assert!(third.header("x-ratelimit-reset").is_some());
    let retry_after: u64 = third.header("retry-after").unwrap().parse().unwrap();
    assert!((1..=60).contains(&retry_after));

    let exceeded = app.events(events::RATE_LIMIT_EXCEEDED).await;
    assert_eq!(exceeded.len(), 1);
    assert_eq!(exceeded[0].reason.as_deref(), Some("api"));
    assert_eq!(
        exceeded[0].actor.as_deref(),
        Some(format!("account:{}", seeded.client_a.id()).as_str())
    );

    // Buckets are per identity
    app.get_as(
        &format!("/api/v1/tenants/{}", seeded.tenant_b.id),
        &seeded.client_b.session,
    )
    .await
    .assert_ok();
}

#[tokio::test]
async fn test_admin_limit_is_scaled_up() {
    let app = TestApp::new().await;
    let seeded = seed_directory(&app).await;

    let response = app.get_as("/api/v1/tenants", &seeded.admin.session).await;
    response.assert_ok();
    assert_eq!(response.header("x-ratelimit-limit"), Some("180"));
}

#[tokio::test]
async fn test_token_guessing_is_throttled_per_address_and_prefix() {
    let app = TestApp::new().await;
    let attempts = app.state.config.rate_limit.token_validation.max_attempts;

    for _ in 0..attempts {
        let response = app
            .get(&format!("/api/v1/review/{}", bogus_token("deadbeef")))
            .await;
        response.assert_unauthorized();
        assert_eq!(response.code().as_deref(), Some("invalid_or_expired_token"));
    }

    let response = app
        .get(&format!("/api/v1/review/{}", bogus_token("deadbeef")))
        .await;
    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
    assert!(response.header("retry-after").is_some());

    let exceeded = app.events(events::RATE_LIMIT_EXCEEDED).await;
    assert_eq!(exceeded[0].reason.as_deref(), Some("token_validation"));

    // Another prefix from the same address has its own bucket
    app.get(&format!("/api/v1/review/{}", bogus_token("cafebabe")))
        .await
        .assert_unauthorized();

    // The same prefix from another address is unaffected
    let elsewhere = TestApp {
        router: app.router.clone(),
        state: app.state.clone(),
        remote: app.remote,
    }
    .from_addr("198.51.100.7");
    elsewhere
        .get(&format!("/api/v1/review/{}", bogus_token("deadbeef")))
        .await
        .assert_unauthorized();
}

#[tokio::test]
async fn test_valid_token_resets_guessing_counter() {
    let app = TestApp::new().await;
    let seeded = seed_directory(&app).await;
    let issued = issue_token(&app, &seeded.tenant_a, None, &seeded.agency_a).await;
    let prefix = &issued.token[..8];
    let attempts = app.state.config.rate_limit.token_validation.max_attempts;

    for _ in 0..attempts - 1 {
        app.get(&format!("/api/v1/review/{}", bogus_token(prefix)))
            .await
            .assert_unauthorized();
    }

    app.get(&format!("/api/v1/review/{}", issued.token))
        .await
        .assert_ok();

    for _ in 0..attempts - 1 {
        app.get(&format!("/api/v1/review/{}", bogus_token(prefix)))
            .await
            .assert_unauthorized();
    }
}
