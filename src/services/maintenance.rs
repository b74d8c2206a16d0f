//! Maintenance scheduler
//!
//! Runs audit retention cleanup and stale token purge on a cron schedule,
//! and sweeps expired rate-limit buckets on a fixed interval. Can also be
//! invoked once from the command line (`--cleanup`).

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::config::MaintenanceSettings;
use crate::services::audit::AuditRecorder;
use crate::services::rate_limit::RateLimiter;
use crate::services::tokens::TokenService;

/// Outcome of one maintenance pass
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub audit_events_removed: u64,
    pub tokens_purged: u64,
    pub buckets_swept: usize,
    pub errors: Vec<String>,
}

impl MaintenanceReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// The housekeeping work itself, independent of scheduling
#[derive(Clone)]
pub struct Maintenance {
    audit: AuditRecorder,
    tokens: TokenService,
    limiter: RateLimiter,
}

impl Maintenance {
    pub fn new(audit: AuditRecorder, tokens: TokenService, limiter: RateLimiter) -> Self {
        Self {
            audit,
            tokens,
            limiter,
        }
    }

    /// Run every maintenance step once. A failing step does not stop the
    /// others.
    pub async fn run_once(&self, now: DateTime<Utc>) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match self.audit.cleanup(now).await {
            Ok(removed) => report.audit_events_removed = removed,
            Err(e) => report.errors.push(format!("audit cleanup: {}", e)),
        }

        match self.tokens.purge(now).await {
            Ok(purged) => report.tokens_purged = purged,
            Err(e) => report.errors.push(format!("token purge: {}", e)),
        }

        match self.limiter.sweep(now).await {
            Ok(swept) => report.buckets_swept = swept,
            Err(e) => report.errors.push(format!("bucket sweep: {}", e)),
        }

        info!(
            audit_events_removed = report.audit_events_removed,
            tokens_purged = report.tokens_purged,
            buckets_swept = report.buckets_swept,
            errors = report.errors.len(),
            "Maintenance pass finished"
        );
        report
    }
}

/// Scheduler state
#[derive(Clone)]
pub struct MaintenanceScheduler {
    running: Arc<RwLock<bool>>,
}

impl MaintenanceScheduler {
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
        info!("Maintenance scheduler stop requested");
    }
}

/// Start the background maintenance tasks
///
/// Spawns:
/// - the cron-driven cleanup and purge task
/// - the fixed-interval bucket sweep task
pub fn start_maintenance_scheduler(
    maintenance: Maintenance,
    settings: &MaintenanceSettings,
    sweep_interval_secs: u64,
) -> anyhow::Result<MaintenanceScheduler> {
    let schedule = Schedule::from_str(&settings.schedule)
        .map_err(|e| anyhow::anyhow!("Invalid maintenance schedule '{}': {}", settings.schedule, e))?;

    let state = MaintenanceScheduler {
        running: Arc::new(RwLock::new(true)),
    };

    let cron_state = state.clone();
    let cron_maintenance = maintenance.clone();
    tokio::spawn(async move {
        scheduled_task(cron_state, cron_maintenance, schedule).await;
    });

    let sweep_state = state.clone();
    tokio::spawn(async move {
        sweep_task(sweep_state, maintenance.limiter, sweep_interval_secs).await;
    });

    info!(schedule = %settings.schedule, "Maintenance scheduler started");
    Ok(state)
}

async fn scheduled_task(state: MaintenanceScheduler, maintenance: Maintenance, schedule: Schedule) {
    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            warn!("Maintenance schedule has no upcoming runs, stopping");
            break;
        };

        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        debug!(next_run = %next, "Waiting for next maintenance run");
        tokio::time::sleep(wait).await;

        if !state.is_running().await {
            info!("Maintenance task stopping");
            break;
        }

        let report = maintenance.run_once(Utc::now()).await;
        for e in &report.errors {
            error!("Maintenance step failed: {}", e);
        }
    }
}

async fn sweep_task(state: MaintenanceScheduler, limiter: RateLimiter, interval_secs: u64) {
    let mut timer = interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        timer.tick().await;

        if !state.is_running().await {
            info!("Bucket sweep task stopping");
            break;
        }

        match limiter.sweep(Utc::now()).await {
            Ok(0) => {}
            Ok(swept) => debug!(swept, "Swept expired rate limit buckets"),
            Err(e) => warn!("Rate limit bucket sweep failed: {}", e),
        }
    }
}

/// Calculate the next run time for a cron expression
pub fn next_run(cron_expr: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Schedule::from_str(cron_expr).ok()?.after(&after).next()
}

/// Validate a cron expression
pub fn validate_cron_expression(cron_expr: &str) -> Result<(), String> {
    Schedule::from_str(cron_expr)
        .map(|_| ())
        .map_err(|e| format!("Invalid cron expression: {}", e))
}
