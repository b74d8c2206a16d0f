//! Login flood guard
//!
//! Per-IP burst limiter in front of the login endpoint, using a keyed
//! governor rate limiter. Independent of the fixed-window limiter in the
//! guard chain: it runs before any credential is checked.

use std::{
    net::IpAddr,
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};

use axum::{
    extract::{Request, State},
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use governor::{
    clock::{Clock, DefaultClock},
    DefaultKeyedRateLimiter, Quota, RateLimiter,
};
use serde_json::json;
use tracing::{debug, warn};

use super::guard::remote_addr;
use crate::config::FloodGuardConfig;
use crate::models::{events, AuditEventDraft};
use crate::utils::ErrorResponse;
use crate::AppState;

/// Keyed limiter over remote addresses
#[derive(Clone)]
pub struct FloodGuard {
    limiter: Arc<DefaultKeyedRateLimiter<IpAddr>>,
    clock: DefaultClock,
}

impl FloodGuard {
    pub fn new(config: &FloodGuardConfig) -> Self {
        let quota = Quota::per_second(
            NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN),
        )
        .allow_burst(NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN));

        Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
            clock: DefaultClock::default(),
        }
    }

    /// `Err` carries the wait before the next attempt is admitted
    pub fn check(&self, ip: IpAddr) -> Result<(), Duration> {
        self.limiter
            .check_key(&ip)
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }

    /// Forget addresses whose state has fully replenished
    pub fn cleanup(&self) {
        self.limiter.retain_recent();
        debug!(tracked = self.limiter.len(), "Flood guard cleanup");
    }
}

/// Spawn a background task to periodically drop idle limiter state
pub fn spawn_flood_guard_cleanup(guard: FloodGuard) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            guard.cleanup();
        }
    });
}

pub async fn flood_guard_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let ip = remote_addr(request.extensions());

    let wait = match state.flood_guard.check(ip) {
        Ok(()) => return next.run(request).await,
        Err(wait) => wait,
    };

    let retry_after = wait.as_secs_f64().ceil().max(1.0) as u64;
    warn!(ip = %ip, retry_after, "Login flood guard tripped");

    state
        .audit
        .append(
            AuditEventDraft::new(events::RATE_LIMIT_EXCEEDED)
                .reason("login_flood")
                .details(json!({
                    "key": format!("login:ip:{}", ip),
                    "route": request.uri().path(),
                    "remote_addr": ip.to_string(),
                    "retry_after_seconds": retry_after,
                })),
        )
        .await;

    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(
            ErrorResponse::new("throttled", "Too many login attempts. Please try again later.")
                .with_code("rate_limit_exceeded")
                .with_retry_after(retry_after),
        ),
    )
        .into_response();
    response
        .headers_mut()
        .insert(RETRY_AFTER, HeaderValue::from(retry_after));
    response
}
