//! API routes and handlers
//!
//! Every route except health, login and logout is wrapped by the guard chain
//! with its own [`RoutePolicy`](crate::services::RoutePolicy).

use axum::{middleware::from_fn_with_state, routing::get, Router};

use crate::{middleware::public_rate_limit_headers, models::RoleClass, AppState};

mod access_tokens;
mod audit_events;
mod auth;
mod directory;
mod health;
mod review;
mod tenants;

pub use health::*;

/// Administrators only
pub(crate) const ADMIN_ONLY: &[RoleClass] = &[RoleClass::Admin];
/// Staff accounts that manage tenants on behalf of clients
pub(crate) const STAFF_ROLES: &[RoleClass] = &[RoleClass::Admin, RoleClass::Agency];
/// Any signed-in account; excludes magic-link holders
pub(crate) const ACCOUNT_ROLES: &[RoleClass] =
    &[RoleClass::Admin, RoleClass::Agency, RoleClass::Client];

/// Routes that skip the guard chain. They still report the caller's
/// anonymous rate limit allowance.
pub fn public_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/health/detailed", get(health::health_check_detailed))
        .nest("/auth", auth::public_routes(state))
        .route_layer(from_fn_with_state(state.clone(), public_rate_limit_headers))
}

/// Routes behind the guard chain
pub fn protected_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .nest("/auth", auth::protected_routes(state))
        .nest("/tenants", tenants::routes(state))
        .nest("/audit-events", audit_events::routes(state))
        .nest("/review", review::routes(state))
        .merge(directory::routes(state))
}

/// Create the full API router (public + protected)
pub fn routes(state: &AppState) -> Router<AppState> {
    public_routes(state).merge(protected_routes(state))
}
