//! Magic-link token lifecycle and review access

use axum::http::StatusCode;
use serde_json::{json, Value};

use approval_gateway::models::events;

use crate::common::*;

fn tokens_uri(tenant_id: i64) -> String {
    format!("/api/v1/tenants/{}/access-tokens", tenant_id)
}

#[tokio::test]
async fn test_agency_creates_token_and_raw_value_is_shown_once() {
    let app = TestApp::new().await;
    let seeded = seed_directory(&app).await;

    let response = app
        .post_json_as(
            &tokens_uri(seeded.tenant_a.id),
            &seeded.agency_a.session,
            json!({ "expires_in_hours": 48, "scopes": ["view", "comment"] }),
        )
        .await;
    response.assert_created();

    let created: Value = response.json();
    let raw = created["token"].as_str().unwrap().to_string();
    assert_eq!(raw.len(), 64);
    assert_eq!(created["token_prefix"], raw[..8]);
    assert_eq!(created["scopes"], json!(["comment", "view"]));
    assert!(created.get("token_hash").is_none());

    let listed = app
        .get_as(&tokens_uri(seeded.tenant_a.id), &seeded.agency_a.session)
        .await;
    listed.assert_ok();
    let listed: Vec<Value> = listed.json();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].get("token").is_none());

    let audited = app.events(events::TOKEN_CREATED).await;
    assert_eq!(audited.len(), 1);
    assert_eq!(audited[0].tenant_id, Some(seeded.tenant_a.id));
    assert!(audited[0].after_state.is_some());
}

#[tokio::test]
async fn test_token_management_respects_tenant_isolation() {
    let app = TestApp::new().await;
    let seeded = seed_directory(&app).await;

    let response = app
        .post_json_as(&tokens_uri(seeded.tenant_b.id), &seeded.agency_a.session, json!({}))
        .await;
    response.assert_forbidden();

    let response = app
        .get_as(&tokens_uri(seeded.tenant_a.id), &seeded.client_a.session)
        .await;
    response.assert_forbidden();
    assert_eq!(response.code().as_deref(), Some("role_not_permitted"));
}

#[tokio::test]
async fn test_token_lifetime_is_bounded() {
    let app = TestApp::new().await;
    let seeded = seed_directory(&app).await;

    let too_long = app.state.config.tokens.max_ttl_hours + 1;
    let response = app
        .post_json_as(
            &tokens_uri(seeded.tenant_a.id),
            &seeded.admin.session,
            json!({ "expires_in_hours": too_long }),
        )
        .await;
    assert!(response.status.is_client_error(), "got {}", response.status);

    let response = app
        .post_json_as(
            &tokens_uri(seeded.tenant_a.id),
            &seeded.admin.session,
            json!({ "scopes": ["publish"] }),
        )
        .await;
    assert!(response.status.is_client_error(), "got {}", response.status);
}

#[tokio::test]
async fn test_review_link_resolves_tenant_and_tracks_access() {
    let app = TestApp::new().await;
    let seeded = seed_directory(&app).await;
    let issued = issue_token(&app, &seeded.tenant_a, Some(&["view", "approve"]), &seeded.agency_a).await;

    let uri = format!("/api/v1/review/{}", issued.token);
    let first = app.get(&uri).await;
    first.assert_ok();
    let body: Value = first.json();
    assert_eq!(body["tenant"]["id"], seeded.tenant_a.id);
    assert_eq!(body["scopes"], json!(["approve", "view"]));
    assert_eq!(body["access_count"], 1);
    // Token holders get half the base limit
    assert_eq!(first.header("x-ratelimit-limit"), Some("30"));

    let second: Value = app.get(&uri).await.json();
    assert_eq!(second["access_count"], 2);

    // The raw token never reaches the audit trail
    let proceeded = app.events(events::REQUEST_PROCEEDED).await;
    let details = proceeded[0].details.as_ref().unwrap();
    let path = details["path"].as_str().unwrap();
    assert!(!path.contains(&issued.token));
    assert!(path.ends_with(&format!("{}***", &issued.token[..8])));
}

#[tokio::test]
async fn test_token_accepted_from_query_and_header() {
    let app = TestApp::new().await;
    let seeded = seed_directory(&app).await;
    let issued = issue_token(&app, &seeded.tenant_a, None, &seeded.admin).await;

    app.get(&format!(
        "/api/v1/tenants/{}?token={}",
        seeded.tenant_a.id, issued.token
    ))
    .await
    .assert_ok();

    let request = axum::http::Request::get(format!("/api/v1/tenants/{}", seeded.tenant_a.id))
        .header("x-access-token", issued.token.as_str())
        .body(axum::body::Body::empty())
        .unwrap();
    app.request(request).await.assert_ok();
}

#[tokio::test]
async fn test_token_without_required_scope_is_denied() {
    let app = TestApp::new().await;
    let seeded = seed_directory(&app).await;
    let issued = issue_token(&app, &seeded.tenant_a, Some(&["comment"]), &seeded.agency_a).await;

    let response = app.get(&format!("/api/v1/review/{}", issued.token)).await;
    response.assert_forbidden();
    assert_eq!(response.code().as_deref(), Some("missing_scope"));
}

#[tokio::test]
async fn test_revoked_token_stops_working() {
    let app = TestApp::new().await;
    let seeded = seed_directory(&app).await;
    let issued = issue_token(&app, &seeded.tenant_a, None, &seeded.agency_a).await;

    let response = app
        .delete_as(
            &format!("{}/{}", tokens_uri(seeded.tenant_a.id), issued.record.id),
            &seeded.agency_a.session,
        )
        .await;
    response.assert_ok();
    let revoked: Value = response.json();
    assert_eq!(revoked["is_active"], false);

    let review = app.get(&format!("/api/v1/review/{}", issued.token)).await;
    review.assert_unauthorized();
    assert_eq!(review.code().as_deref(), Some("invalid_or_expired_token"));

    // Revoking twice is a conflict
    app.delete_as(
        &format!("{}/{}", tokens_uri(seeded.tenant_a.id), issued.record.id),
        &seeded.agency_a.session,
    )
    .await
    .assert_status(StatusCode::CONFLICT);

    let audited = app.events(events::TOKEN_REVOKED).await;
    assert_eq!(audited.len(), 1);
    assert!(audited[0].before_state.is_some() && audited[0].after_state.is_some());
}

#[tokio::test]
async fn test_regenerate_replaces_token() {
    let app = TestApp::new().await;
    let seeded = seed_directory(&app).await;
    let issued = issue_token(&app, &seeded.tenant_a, Some(&["view"]), &seeded.agency_a).await;

    let response = app
        .post_json_as(
            &format!("{}/{}/regenerate", tokens_uri(seeded.tenant_a.id), issued.record.id),
            &seeded.agency_a.session,
            json!({}),
        )
        .await;
    response.assert_created();
    let replacement: Value = response.json();
    let new_token = replacement["token"].as_str().unwrap();
    assert_ne!(new_token, issued.token);
    assert_eq!(replacement["scopes"], json!(["view"]));
    assert_eq!(replacement["tenant_id"], seeded.tenant_a.id);

    app.get(&format!("/api/v1/review/{}", issued.token))
        .await
        .assert_unauthorized();
    app.get(&format!("/api/v1/review/{}", new_token))
        .await
        .assert_ok();

    assert_eq!(app.events(events::TOKEN_REGENERATED).await.len(), 1);
}

#[tokio::test]
async fn test_unknown_token_id_is_not_found() {
    let app = TestApp::new().await;
    let seeded = seed_directory(&app).await;

    let response = app
        .delete_as(
            &format!("{}/{}", tokens_uri(seeded.tenant_a.id), uuid::Uuid::new_v4()),
            &seeded.admin.session,
        )
        .await;
    response.assert_not_found();
}
