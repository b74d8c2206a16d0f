//! Magic-link token lifecycle endpoints
//!
//! Nested under `/api/v1/tenants/{tenant_id}/access-tokens`; the guard chain
//! has already confirmed the caller is staff with access to the tenant.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use super::STAFF_ROLES;
use crate::{
    middleware::guarded,
    models::{AccessToken, AccountId, CreateAccessTokenRequest, IssuedAccessToken, TenantId},
    services::{GuardContext, RoutePolicy},
    utils::{AppError, AppResult},
    AppState,
};

pub fn routes(state: &AppState) -> Router<AppState> {
    let policy = |name| RoutePolicy::tenant_scoped(name).with_roles(STAFF_ROLES);

    Router::new()
        .route(
            "/",
            guarded(get(list_tokens), state, policy("access_tokens.list"))
                .merge(guarded(post(create_token), state, policy("access_tokens.create"))),
        )
        .route(
            "/{token_id}",
            guarded(delete(revoke_token), state, policy("access_tokens.revoke")),
        )
        .route(
            "/{token_id}/regenerate",
            guarded(post(regenerate_token), state, policy("access_tokens.regenerate")),
        )
}

#[derive(Debug, Default, Deserialize)]
pub struct RegenerateRequest {
    pub expires_in_hours: Option<u64>,
}

fn acting_account(context: &GuardContext) -> AppResult<AccountId> {
    context
        .resolved_identity
        .account_id()
        .ok_or_else(|| AppError::forbidden("Token management requires an account"))
}

/// GET /api/v1/tenants/{tenant_id}/access-tokens
async fn list_tokens(
    State(state): State<AppState>,
    Path(tenant_id): Path<TenantId>,
) -> AppResult<Json<Vec<AccessToken>>> {
    Ok(Json(state.tokens.list(tenant_id).await?))
}

/// POST /api/v1/tenants/{tenant_id}/access-tokens
async fn create_token(
    State(state): State<AppState>,
    Path(tenant_id): Path<TenantId>,
    context: GuardContext,
    Json(payload): Json<CreateAccessTokenRequest>,
) -> AppResult<(StatusCode, Json<IssuedAccessToken>)> {
    let issued = state
        .tokens
        .create(tenant_id, &payload, acting_account(&context)?)
        .await?;
    Ok((StatusCode::CREATED, Json(issued)))
}

/// DELETE /api/v1/tenants/{tenant_id}/access-tokens/{token_id}
async fn revoke_token(
    State(state): State<AppState>,
    Path((tenant_id, token_id)): Path<(TenantId, Uuid)>,
    context: GuardContext,
) -> AppResult<Json<AccessToken>> {
    let revoked = state
        .tokens
        .revoke(tenant_id, token_id, acting_account(&context)?)
        .await?;
    Ok(Json(revoked))
}

/// POST /api/v1/tenants/{tenant_id}/access-tokens/{token_id}/regenerate
async fn regenerate_token(
    State(state): State<AppState>,
    Path((tenant_id, token_id)): Path<(TenantId, Uuid)>,
    context: GuardContext,
    payload: Option<Json<RegenerateRequest>>,
) -> AppResult<(StatusCode, Json<IssuedAccessToken>)> {
    let Json(payload) = payload.unwrap_or_default();
    let issued = state
        .tokens
        .regenerate(tenant_id, token_id, payload.expires_in_hours, acting_account(&context)?)
        .await?;
    Ok((StatusCode::CREATED, Json(issued)))
}
