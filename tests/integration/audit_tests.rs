//! Audit trail reads and audit store failure handling

use async_trait::async_trait;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

use approval_gateway::{
    config::AuditFailureMode,
    models::{events, AuditEvent, AuditQuery, AuditSummary, Role, TenantId},
    services::AuditStore,
    utils::StoreError,
    Stores,
};

use crate::common::*;

/// Audit store that is always down
struct UnavailableAuditStore;

#[async_trait]
impl AuditStore for UnavailableAuditStore {
    async fn append(&self, _event: &AuditEvent) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("audit database offline".to_string()))
    }

    async fn query(&self, _query: &AuditQuery) -> Result<Vec<AuditEvent>, StoreError> {
        Err(StoreError::Unavailable("audit database offline".to_string()))
    }

    async fn summarize(
        &self,
        _since: DateTime<Utc>,
        _tenant_id: Option<TenantId>,
    ) -> Result<AuditSummary, StoreError> {
        Err(StoreError::Unavailable("audit database offline".to_string()))
    }

    async fn delete_expired(&self, _now: DateTime<Utc>) -> Result<u64, StoreError> {
        Err(StoreError::Unavailable("audit database offline".to_string()))
    }
}

async fn app_with_broken_audit(mode: AuditFailureMode) -> TestApp {
    let mut config = test_config();
    config.audit.on_mandatory_failure = mode;
    TestApp::with_stores(config, |pool| Stores {
        audit: Arc::new(UnavailableAuditStore),
        ..Stores::sqlite(pool)
    })
    .await
}

#[tokio::test]
async fn test_admin_reads_the_whole_trail() {
    let app = TestApp::new().await;
    let seeded = seed_directory(&app).await;

    app.get_as(&format!("/api/v1/tenants/{}", seeded.tenant_b.id), &seeded.client_a.session)
        .await
        .assert_forbidden();

    let response = app
        .get_as(
            &format!("/api/v1/audit-events?event_name={}", events::AUTHZ_DENIED),
            &seeded.admin.session,
        )
        .await;
    response.assert_ok();

    let trail: Vec<Value> = response.json();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0]["reason"], "cross_tenant_access");
    assert_eq!(trail[0]["severity"], "warning");
}

#[tokio::test]
async fn test_client_reads_only_its_tenant() {
    let app = TestApp::new().await;
    let seeded = seed_directory(&app).await;

    app.get_as(&format!("/api/v1/tenants/{}", seeded.tenant_b.id), &seeded.client_b.session)
        .await
        .assert_ok();
    app.get_as(&format!("/api/v1/tenants/{}", seeded.tenant_a.id), &seeded.client_a.session)
        .await
        .assert_ok();

    let response = app.get_as("/api/v1/audit-events", &seeded.client_a.session).await;
    response.assert_ok();
    let trail: Vec<Value> = response.json();
    assert!(!trail.is_empty());
    assert!(trail.iter().all(|e| e["tenant_id"] == seeded.tenant_a.id));

    let response = app
        .get_as(
            &format!("/api/v1/audit-events?tenant_id={}", seeded.tenant_b.id),
            &seeded.client_a.session,
        )
        .await;
    response.assert_forbidden();
    assert_eq!(response.code().as_deref(), Some("cross_tenant_access"));

    let denied = app.events(events::AUTHZ_DENIED).await;
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].reason.as_deref(), Some("cross_tenant_access"));
    assert_eq!(
        denied[0].actor.as_deref(),
        Some(format!("account:{}", seeded.client_a.id()).as_str())
    );
}

#[tokio::test]
async fn test_agency_cannot_read_another_teams_trail() {
    let app = TestApp::new().await;
    let seeded = seed_directory(&app).await;

    let response = app
        .get_as(
            &format!("/api/v1/audit-events/summary?tenant_id={}", seeded.tenant_b.id),
            &seeded.agency_a.session,
        )
        .await;
    response.assert_forbidden();
    assert_eq!(response.code().as_deref(), Some("not_on_team"));

    let denied = app.events(events::AUTHZ_DENIED).await;
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].reason.as_deref(), Some("not_on_team"));
}

#[tokio::test]
async fn test_agency_must_name_a_reachable_tenant() {
    let app = TestApp::new().await;
    let seeded = seed_directory(&app).await;

    app.get_as("/api/v1/audit-events", &seeded.agency_a.session)
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    app.get_as(
        &format!("/api/v1/audit-events?tenant_id={}", seeded.tenant_a.id),
        &seeded.agency_a.session,
    )
    .await
    .assert_ok();
}

#[tokio::test]
async fn test_summary_counts_recent_events() {
    let app = TestApp::new().await;
    let seeded = seed_directory(&app).await;

    app.get_as("/api/v1/auth/me", &seeded.admin.session).await.assert_ok();

    let response = app
        .get_as("/api/v1/audit-events/summary?hours=1", &seeded.admin.session)
        .await;
    response.assert_ok();
    // the summary route carries its own, tighter base limit
    assert_eq!(response.header("x-ratelimit-limit"), Some("60"));
    let summary: AuditSummary = response.json();
    assert!(summary.total >= 2);
    assert!(summary.by_event.contains_key(events::AUTH_SUCCESS));
    assert!(summary.by_severity.contains_key("info"));

    app.get_as("/api/v1/audit-events/summary?hours=0", &seeded.admin.session)
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unavailable_audit_store_denies_in_deny_mode() {
    let app = app_with_broken_audit(AuditFailureMode::Deny).await;
    let admin = create_account(&app, Role::Admin, None).await;

    let response = app.get_as("/api/v1/auth/me", &admin.session).await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.code().as_deref(), Some("audit_unavailable"));
}

#[tokio::test]
async fn test_unavailable_audit_store_is_tolerated_in_allow_mode() {
    let app = app_with_broken_audit(AuditFailureMode::AllowAndLog).await;
    let admin = create_account(&app, Role::Admin, None).await;

    app.get_as("/api/v1/auth/me", &admin.session).await.assert_ok();
}
