//! Tenant endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use super::{access_tokens, ACCOUNT_ROLES, ADMIN_ONLY};
use crate::{
    db::{AccountRepository, TenantRepository},
    middleware::guarded,
    models::{events, AuditEventDraft, CreateTenantRequest, Identity, Role, Tenant, TenantId},
    services::{GuardContext, RoutePolicy},
    utils::{validation::validate_slug, AppError, AppResult},
    AppState,
};

pub fn routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/",
            guarded(
                get(list_tenants),
                state,
                RoutePolicy::new("tenants.list").with_roles(ACCOUNT_ROLES),
            )
            .merge(guarded(
                post(create_tenant),
                state,
                RoutePolicy::new("tenants.create").with_roles(ADMIN_ONLY),
            )),
        )
        .route(
            "/{tenant_id}",
            guarded(
                get(get_tenant),
                state,
                RoutePolicy::tenant_scoped("tenants.show").with_scope("view"),
            ),
        )
        .nest("/{tenant_id}/access-tokens", access_tokens::routes(state))
}

/// Tenants visible to the caller
///
/// GET /api/v1/tenants
async fn list_tenants(
    State(state): State<AppState>,
    context: GuardContext,
) -> AppResult<Json<Vec<Tenant>>> {
    let repo = TenantRepository::new(&state.db);

    let tenants = match &context.resolved_identity {
        Identity::Account(account) => match account.primary_role {
            Role::Admin => repo.list_all().await?,
            Role::Agency => {
                let teams = AccountRepository::new(&state.db)
                    .team_ids(account.account_id)
                    .await?;
                repo.list_for_teams(&teams).await?
            }
            Role::Client => match account.tenant_id {
                Some(tenant_id) => repo.get_by_id(tenant_id).await?.into_iter().collect(),
                None => Vec::new(),
            },
        },
        Identity::Token(_) => Vec::new(),
    };

    Ok(Json(tenants))
}

/// POST /api/v1/tenants
async fn create_tenant(
    State(state): State<AppState>,
    context: GuardContext,
    Json(payload): Json<CreateTenantRequest>,
) -> AppResult<(StatusCode, Json<Tenant>)> {
    if payload.name.trim().is_empty() {
        return Err(AppError::ValidationError("Tenant name is required".to_string()));
    }
    if !validate_slug(&payload.slug) {
        return Err(AppError::ValidationError(format!(
            "Invalid tenant slug: {}",
            payload.slug
        )));
    }

    let tenant = TenantRepository::new(&state.db)
        .create(&payload)
        .await
        .map_err(|e| match e.downcast_ref::<sqlx::Error>() {
            Some(sqlx::Error::Database(db)) if db.message().contains("UNIQUE") => {
                AppError::Conflict(format!("Tenant slug '{}' already exists", payload.slug))
            }
            _ => AppError::from(e),
        })?;

    state
        .audit
        .append(
            AuditEventDraft::new(events::TENANT_CREATED)
                .actor(context.resolved_identity.actor())
                .tenant(Some(tenant.id))
                .target("tenant", tenant.id)
                .after(json!(tenant)),
        )
        .await;

    Ok((StatusCode::CREATED, Json(tenant)))
}

/// Tenant record, once the chain has authorized access to it
///
/// GET /api/v1/tenants/{tenant_id}
async fn get_tenant(
    State(state): State<AppState>,
    Path(tenant_id): Path<TenantId>,
) -> AppResult<Json<Tenant>> {
    TenantRepository::new(&state.db)
        .get_by_id(tenant_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("Tenant {} not found", tenant_id)))
}
