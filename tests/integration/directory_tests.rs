//! Admin directory endpoints: accounts, teams, tenants

use axum::http::StatusCode;
use serde_json::{json, Value};

use approval_gateway::models::{events, Role};

use crate::common::*;

#[tokio::test]
async fn test_admin_builds_an_agency_directory() {
    let app = TestApp::new().await;
    let admin = create_account(&app, Role::Admin, None).await;

    let team: Value = {
        let response = app
            .post_json_as("/api/v1/teams", &admin.session, json!({ "name": "North Studio" }))
            .await;
        response.assert_created();
        response.json()
    };
    let team_id = team["id"].as_i64().unwrap();

    let tenant: Value = {
        let response = app
            .post_json_as(
                "/api/v1/tenants",
                &admin.session,
                json!({ "name": "Acme Bakery", "slug": "acme-bakery", "team_id": team_id }),
            )
            .await;
        response.assert_created();
        response.json()
    };
    let tenant_id = tenant["id"].as_i64().unwrap();

    let agency = AccountFactory::agency();
    let account: Value = {
        let response = app
            .post_json_as(
                "/api/v1/accounts",
                &admin.session,
                json!({
                    "email": agency.email,
                    "name": agency.name,
                    "password": agency.password,
                    "primary_role": "agency",
                }),
            )
            .await;
        response.assert_created();
        response.json()
    };
    let account_id = account["id"].as_i64().unwrap();
    assert!(account.get("password_hash").is_none());

    app.post_json_as(
        &format!("/api/v1/teams/{}/members", team_id),
        &admin.session,
        json!({ "account_id": account_id }),
    )
    .await
    .assert_status(StatusCode::NO_CONTENT);

    // The new agency account can now log in and reach the tenant
    let login: Value = app
        .post_json(
            "/api/v1/auth/login",
            json!({ "email": agency.email, "password": agency.password }),
        )
        .await
        .json();
    let session = login["session_token"].as_str().unwrap();
    app.get_as(&format!("/api/v1/tenants/{}", tenant_id), session)
        .await
        .assert_ok();

    // Removing the membership cuts access
    app.delete_as(
        &format!("/api/v1/teams/{}/members/{}", team_id, account_id),
        &admin.session,
    )
    .await
    .assert_status(StatusCode::NO_CONTENT);
    app.get_as(&format!("/api/v1/tenants/{}", tenant_id), session)
        .await
        .assert_forbidden();

    for name in [
        events::TEAM_CREATED,
        events::TENANT_CREATED,
        events::ACCOUNT_CREATED,
        events::TEAM_MEMBER_ADDED,
        events::TEAM_MEMBER_REMOVED,
    ] {
        assert_eq!(app.events(name).await.len(), 1, "expected one {} event", name);
    }
}

#[tokio::test]
async fn test_directory_is_admin_only() {
    let app = TestApp::new().await;
    let seeded = seed_directory(&app).await;

    let response = app
        .post_json_as("/api/v1/teams", &seeded.agency_a.session, json!({ "name": "Rogue" }))
        .await;
    response.assert_forbidden();
    assert_eq!(response.code().as_deref(), Some("role_not_permitted"));

    app.post_json_as(
        "/api/v1/tenants",
        &seeded.client_a.session,
        json!({ "name": "Mine", "slug": "mine" }),
    )
    .await
    .assert_forbidden();
}

#[tokio::test]
async fn test_duplicate_tenant_slug_conflicts() {
    let app = TestApp::new().await;
    let seeded = seed_directory(&app).await;

    let response = app
        .post_json_as(
            "/api/v1/tenants",
            &seeded.admin.session,
            json!({ "name": "Copy", "slug": seeded.tenant_a.slug }),
        )
        .await;
    response.assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_client_account_requires_a_tenant() {
    let app = TestApp::new().await;
    let admin = create_account(&app, Role::Admin, None).await;
    let client = AccountFactory::build(Role::Client, None);

    let response = app
        .post_json_as(
            "/api/v1/accounts",
            &admin.session,
            json!({
                "email": client.email,
                "name": client.name,
                "password": client.password,
                "primary_role": "client",
            }),
        )
        .await;
    assert!(response.status.is_client_error(), "got {}", response.status);
}

#[tokio::test]
async fn test_only_agency_accounts_join_teams() {
    let app = TestApp::new().await;
    let seeded = seed_directory(&app).await;

    let response = app
        .post_json_as(
            &format!("/api/v1/teams/{}/members", seeded.team_a.id),
            &seeded.admin.session,
            json!({ "account_id": seeded.client_a.id() }),
        )
        .await;
    assert!(response.status.is_client_error(), "got {}", response.status);
}
