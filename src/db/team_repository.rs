//! Team repository

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;

use super::{format_timestamp, parse_db_timestamp};
use crate::models::{AccountId, Team, TeamId};

#[derive(Debug, sqlx::FromRow)]
struct TeamRow {
    id: i64,
    name: String,
    created_at: String,
}

pub struct TeamRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> TeamRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, name: &str) -> Result<Team> {
        let created_at = Utc::now();

        let result = sqlx::query("INSERT INTO teams (name, created_at) VALUES (?, ?)")
            .bind(name)
            .bind(format_timestamp(created_at))
            .execute(self.pool)
            .await
            .context("Failed to create team")?;

        Ok(Team {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            created_at,
        })
    }

    pub async fn get_by_id(&self, id: TeamId) -> Result<Option<Team>> {
        let row = sqlx::query_as::<_, TeamRow>("SELECT id, name, created_at FROM teams WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await
            .context("Failed to get team")?;

        Ok(row.map(|r| Team {
            id: r.id,
            name: r.name,
            created_at: parse_db_timestamp(&r.created_at),
        }))
    }

    pub async fn add_member(&self, team_id: TeamId, account_id: AccountId) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO team_members (team_id, account_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(team_id)
        .bind(account_id)
        .bind(format_timestamp(Utc::now()))
        .execute(self.pool)
        .await
        .context("Failed to add team member")?;

        Ok(())
    }

    pub async fn remove_member(&self, team_id: TeamId, account_id: AccountId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM team_members WHERE team_id = ? AND account_id = ?")
            .bind(team_id)
            .bind(account_id)
            .execute(self.pool)
            .await
            .context("Failed to remove team member")?;

        Ok(result.rows_affected() > 0)
    }
}
