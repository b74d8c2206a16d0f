//! Approval Gateway Library
//!
//! Access-control and audit gateway for a multi-tenant content-approval
//! platform: identity resolution, tenant isolation, fixed-window rate
//! limiting and an append-only audit trail, composed into a guard chain that
//! fronts every protected route.

use std::sync::Arc;

use axum::{http::HeaderValue, Router};
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{warn, Level};

pub mod api;
pub mod config;
pub mod db;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

pub use config::AppConfig;
pub use db::DbPool;

use db::{SqliteAuditStore, SqliteDirectory};
use middleware::FloodGuard;
use services::{
    AuditRecorder, AuditStore, AuthService, BucketStore, GuardChain, IdentityResolver,
    IdentityStore, InMemoryBucketStore, Maintenance, MembershipStore, RateLimiter, SessionManager,
    TenantAccessResolver, TokenService,
};

/// Storage backends behind the guard chain
///
/// Production wires SQLite for audit and directory lookups and an in-process
/// bucket table; tests swap in fakes per concern.
#[derive(Clone)]
pub struct Stores {
    pub audit: Arc<dyn AuditStore>,
    pub identities: Arc<dyn IdentityStore>,
    pub memberships: Arc<dyn MembershipStore>,
    pub buckets: Arc<dyn BucketStore>,
}

impl Stores {
    pub fn sqlite(pool: &DbPool) -> Self {
        let directory = Arc::new(SqliteDirectory::new(pool.clone()));
        Self {
            audit: Arc::new(SqliteAuditStore::new(pool.clone())),
            identities: directory.clone(),
            memberships: directory,
            buckets: Arc::new(InMemoryBucketStore::new()),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Database connection pool
    pub db: DbPool,
    pub guard: GuardChain,
    pub sessions: SessionManager,
    pub audit: AuditRecorder,
    pub auth: AuthService,
    pub tokens: TokenService,
    pub maintenance: Maintenance,
    pub flood_guard: FloodGuard,
}

impl AppState {
    /// Build the state with the default SQLite-backed stores
    pub fn new(config: AppConfig, db: DbPool) -> Self {
        let stores = Stores::sqlite(&db);
        Self::with_stores(config, db, stores)
    }

    pub fn with_stores(config: AppConfig, db: DbPool, stores: Stores) -> Self {
        let audit = AuditRecorder::new(stores.audit, &config.audit);
        let sessions = SessionManager::new(&config.session);
        let limiter = RateLimiter::new(stores.buckets, config.rate_limit.store_timeout_ms);

        let guard = GuardChain::new(
            IdentityResolver::new(stores.identities, audit.clone()),
            TenantAccessResolver::new(stores.memberships, audit.clone()),
            limiter.clone(),
            audit.clone(),
            config.rate_limit.api.clone(),
            config.rate_limit.token_validation.clone(),
        );

        let auth = AuthService::new(db.clone(), sessions.clone(), audit.clone());
        let tokens = TokenService::new(db.clone(), audit.clone(), config.tokens.clone());
        let maintenance = Maintenance::new(audit.clone(), tokens.clone(), limiter);
        let flood_guard = FloodGuard::new(&config.rate_limit.login);

        Self {
            config,
            db,
            guard,
            sessions,
            audit,
            auth,
            tokens,
            maintenance,
            flood_guard,
        }
    }
}

/// Create the application router with all routes and global layers
pub fn build_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let cors = cors_layer(&state.config.server.cors_allowed_origins);

    // Global layers, innermost first:
    // 1. Security headers
    // 2. Compression
    // 3. Request tracing
    // 4. CORS
    Router::new()
        .nest("/api/v1", api::routes(&state))
        .with_state(state)
        .layer(axum::middleware::from_fn(
            middleware::security_headers_middleware,
        ))
        .layer(CompressionLayer::new())
        .layer(trace_layer)
        .layer(cors)
}

/// CORS policy for the configured origins; no origin is allowed when the list is empty
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}
