//! Database migrations
//!
//! Migrations are handled by SQLx and stored in the `migrations/` directory.
//! This module provides utilities for working with migrations programmatically.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};

/// Tables the gateway cannot run without
pub const REQUIRED_TABLES: &[&str] = &[
    "teams",
    "tenants",
    "accounts",
    "team_members",
    "access_tokens",
    "audit_events",
];

/// Apply all pending migrations
pub async fn run(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("Failed to run database migrations")
}

/// Return the required tables that are missing from the database
pub async fn missing_tables(pool: &SqlitePool) -> Result<Vec<&'static str>> {
    let rows = sqlx::query(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name NOT LIKE '_sqlx_%'",
    )
    .fetch_all(pool)
    .await
    .context("Failed to query database tables")?;

    let existing: Vec<String> = rows
        .iter()
        .filter_map(|row| row.try_get::<String, _>("name").ok())
        .collect();

    Ok(REQUIRED_TABLES
        .iter()
        .filter(|&&table| !existing.iter().any(|t| t == table))
        .copied()
        .collect())
}
