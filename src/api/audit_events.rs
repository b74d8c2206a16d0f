//! Audit trail API endpoints

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use super::ACCOUNT_ROLES;
use crate::{
    middleware::guarded,
    models::{AuditEvent, AuditQuery, AuditSummary, RoleClass, TenantId},
    services::{GuardContext, RoutePolicy},
    utils::{AppError, AppResult},
    AppState,
};

pub fn routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/",
            guarded(
                get(list_audit_events),
                state,
                RoutePolicy::new("audit_events.list").with_roles(ACCOUNT_ROLES),
            ),
        )
        .route(
            "/summary",
            guarded(
                get(audit_summary),
                state,
                RoutePolicy::new("audit_events.summary")
                    .with_roles(ACCOUNT_ROLES)
                    .with_limit(20, 60),
            ),
        )
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    #[serde(default = "default_summary_hours")]
    pub hours: u32,
    pub tenant_id: Option<TenantId>,
}

fn default_summary_hours() -> u32 {
    24
}

/// Tenant filter for the caller's read.
///
/// The guard chain has already refused any named tenant the caller may not
/// read, so this only fills in the default: admins read everything, clients
/// their own tenant, and agency accounts must name one.
fn visible_tenant(context: &GuardContext) -> AppResult<Option<TenantId>> {
    match context.resolved_identity.role_class() {
        RoleClass::Admin | RoleClass::Client => Ok(context.resolved_tenant),
        RoleClass::Agency => context
            .resolved_tenant
            .map(Some)
            .ok_or_else(|| AppError::bad_request("tenant_id is required for agency accounts")),
        RoleClass::Token | RoleClass::Anonymous => {
            Err(AppError::forbidden("Not allowed to view audit events"))
        }
    }
}

/// GET /api/v1/audit-events
async fn list_audit_events(
    State(state): State<AppState>,
    context: GuardContext,
    Query(mut query): Query<AuditQuery>,
) -> AppResult<Json<Vec<AuditEvent>>> {
    query.tenant_id = visible_tenant(&context)?;

    let events = state.audit.query(&query).await.map_err(|e| {
        tracing::error!("Failed to list audit events: {}", e);
        AppError::from(e)
    })?;

    Ok(Json(events))
}

/// GET /api/v1/audit-events/summary
async fn audit_summary(
    State(state): State<AppState>,
    context: GuardContext,
    Query(params): Query<SummaryQuery>,
) -> AppResult<Json<AuditSummary>> {
    if params.hours == 0 || params.hours > 24 * 90 {
        return Err(AppError::bad_request("hours must be between 1 and 2160"));
    }
    let tenant_id = visible_tenant(&context)?;

    Ok(Json(state.audit.summary(params.hours, tenant_id).await?))
}
