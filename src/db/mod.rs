//! Database layer
//!
//! This module handles persistent storage of:
//! - Accounts, teams and tenants
//! - Magic-link access tokens (digests only)
//! - The append-only audit trail

pub mod access_token_repository;
pub mod account_repository;
pub mod audit_repository;
pub mod directory;
pub mod migrations;
pub mod team_repository;
pub mod tenant_repository;

pub use access_token_repository::AccessTokenRepository;
pub use account_repository::AccountRepository;
pub use audit_repository::SqliteAuditStore;
pub use directory::SqliteDirectory;
pub use team_repository::TeamRepository;
pub use tenant_repository::TenantRepository;

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    Pool, Sqlite,
};

use crate::config::DatabaseConfig;

/// Database connection pool type
pub type DbPool = Pool<Sqlite>;

/// Initialize the database connection pool and run pending migrations
pub async fn init_pool(config: &DatabaseConfig) -> Result<DbPool> {
    let connect_options = config
        .url
        .parse::<SqliteConnectOptions>()
        .context("Failed to parse database URL")?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(config.connect_timeout_secs))
        .foreign_keys(true)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .connect_with(connect_options)
        .await
        .context("Failed to connect to database")?;

    migrations::run(&pool).await?;

    Ok(pool)
}

/// Check database connectivity and that the schema is in place
pub async fn check_health(pool: &DbPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .context("Database is not reachable")?;

    let missing = migrations::missing_tables(pool).await?;
    if !missing.is_empty() {
        anyhow::bail!("Missing tables: {}", missing.join(", "));
    }
    Ok(())
}

/// Format a timestamp for storage.
///
/// Fixed width (microseconds, `Z` suffix) so that comparing the stored text
/// orders the same way as comparing the instants.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_db_timestamp(ts: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S") {
        return DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc);
    }
    Utc::now()
}

pub(crate) fn parse_bool(value: i64) -> bool {
    value != 0
}
