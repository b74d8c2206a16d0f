//! Authentication API endpoints
//!
//! Provides login, logout and current-identity endpoints.

use axum::{
    extract::State,
    middleware::from_fn_with_state,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Serialize;

use crate::{
    middleware::{flood_guard_middleware, guarded, ClientAddr},
    models::{Identity, LoginRequest, LoginResponse, TenantId},
    services::{GuardContext, RoutePolicy},
    utils::AppResult,
    AppState,
};

/// Routes that do not run the guard chain; login sits behind the flood guard
pub fn public_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/login",
            post(login).route_layer(from_fn_with_state(state.clone(), flood_guard_middleware)),
        )
        .route("/logout", post(logout))
}

pub fn protected_routes(state: &AppState) -> Router<AppState> {
    Router::new().route(
        "/me",
        guarded(get(current_identity), state, RoutePolicy::new("auth.me")),
    )
}

/// Login handler
///
/// POST /api/v1/auth/login
async fn login(
    State(state): State<AppState>,
    ClientAddr(remote_addr): ClientAddr,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(CookieJar, Json<LoginResponse>)> {
    let response = state.auth.login(&payload, remote_addr).await?;

    let cookie = Cookie::build((
        state.sessions.cookie_name().to_string(),
        response.session_token.clone(),
    ))
    .path("/")
    .http_only(true)
    .secure(state.config.server.tls.is_some())
    .same_site(SameSite::Lax);

    Ok((jar.add(cookie), Json(response)))
}

/// Logout handler: drops the session cookie
///
/// POST /api/v1/auth/logout
async fn logout(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, Json<serde_json::Value>) {
    let jar = jar.remove(Cookie::build((state.sessions.cookie_name().to_string(), "")).path("/"));
    (jar, Json(serde_json::json!({ "logged_out": true })))
}

#[derive(Serialize)]
struct IdentityResponse {
    identity: Identity,
    role: String,
    tenant_id: Option<TenantId>,
}

/// Resolved identity of the caller
///
/// GET /api/v1/auth/me
async fn current_identity(context: GuardContext) -> Json<IdentityResponse> {
    Json(IdentityResponse {
        role: context.resolved_identity.role_class().to_string(),
        tenant_id: context.resolved_identity.bound_tenant(),
        identity: context.resolved_identity,
    })
}
