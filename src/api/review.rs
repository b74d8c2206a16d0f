//! Magic-link review context
//!
//! The token in the path is the credential: the guard chain resolves it,
//! tracks the access and pins the request to the token's tenant.

use std::collections::BTreeSet;

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    db::TenantRepository,
    middleware::guarded,
    models::{Identity, RoleClass, Tenant},
    services::{GuardContext, RoutePolicy},
    utils::{AppError, AppResult},
    AppState,
};

const TOKEN_ONLY: &[RoleClass] = &[RoleClass::Token];

pub fn routes(state: &AppState) -> Router<AppState> {
    Router::new().route(
        "/{token}",
        guarded(
            get(review_context),
            state,
            RoutePolicy::new("review.show")
                .with_roles(TOKEN_ONLY)
                .with_scope("view"),
        ),
    )
}

#[derive(Debug, Serialize)]
pub struct ReviewContext {
    pub token_id: Uuid,
    pub tenant: Tenant,
    pub scopes: BTreeSet<String>,
    pub expires_at: DateTime<Utc>,
    pub access_count: i64,
}

/// GET /api/v1/review/{token}
async fn review_context(
    State(state): State<AppState>,
    context: GuardContext,
) -> AppResult<Json<ReviewContext>> {
    let Identity::Token(token) = context.resolved_identity else {
        return Err(AppError::forbidden("A review link is required"));
    };

    let tenant = TenantRepository::new(&state.db)
        .get_by_id(token.tenant_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Tenant {} not found", token.tenant_id)))?;

    Ok(Json(ReviewContext {
        token_id: token.token_id,
        tenant,
        scopes: token.scopes,
        expires_at: token.expires_at,
        access_count: token.access_count,
    }))
}
