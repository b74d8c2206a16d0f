//! Tenant repository

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;

use super::{format_timestamp, parse_db_timestamp};
use crate::models::{CreateTenantRequest, TeamId, Tenant, TenantId};

#[derive(Debug, sqlx::FromRow)]
struct TenantRow {
    id: i64,
    name: String,
    slug: String,
    team_id: Option<i64>,
    created_at: String,
}

pub struct TenantRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> TenantRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, req: &CreateTenantRequest) -> Result<Tenant> {
        let created_at = Utc::now();

        let result = sqlx::query(
            "INSERT INTO tenants (name, slug, team_id, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&req.name)
        .bind(&req.slug)
        .bind(req.team_id)
        .bind(format_timestamp(created_at))
        .execute(self.pool)
        .await
        .context("Failed to create tenant")?;

        Ok(Tenant {
            id: result.last_insert_rowid(),
            name: req.name.clone(),
            slug: req.slug.clone(),
            team_id: req.team_id,
            created_at,
        })
    }

    pub async fn get_by_id(&self, id: TenantId) -> Result<Option<Tenant>> {
        let row = sqlx::query_as::<_, TenantRow>(
            "SELECT id, name, slug, team_id, created_at FROM tenants WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await
        .context("Failed to get tenant")?;

        Ok(row.map(row_to_tenant))
    }

    /// Team owning the tenant.
    ///
    /// `None` when the tenant does not exist, `Some(None)` when it exists
    /// without a team.
    pub async fn team_of(&self, id: TenantId) -> Result<Option<Option<TeamId>>> {
        sqlx::query_scalar::<_, Option<i64>>("SELECT team_id FROM tenants WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await
            .context("Failed to look up tenant team")
    }

    pub async fn list_all(&self) -> Result<Vec<Tenant>> {
        let rows = sqlx::query_as::<_, TenantRow>(
            "SELECT id, name, slug, team_id, created_at FROM tenants ORDER BY name",
        )
        .fetch_all(self.pool)
        .await
        .context("Failed to list tenants")?;

        Ok(rows.into_iter().map(row_to_tenant).collect())
    }

    pub async fn list_for_teams(&self, team_ids: &[TeamId]) -> Result<Vec<Tenant>> {
        if team_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; team_ids.len()].join(", ");
        let sql = format!(
            "SELECT id, name, slug, team_id, created_at FROM tenants WHERE team_id IN ({}) ORDER BY name",
            placeholders
        );

        let mut q = sqlx::query_as::<_, TenantRow>(&sql);
        for team_id in team_ids {
            q = q.bind(team_id);
        }

        let rows = q
            .fetch_all(self.pool)
            .await
            .context("Failed to list tenants")?;

        Ok(rows.into_iter().map(row_to_tenant).collect())
    }
}

fn row_to_tenant(row: TenantRow) -> Tenant {
    Tenant {
        id: row.id,
        name: row.name,
        slug: row.slug,
        team_id: row.team_id,
        created_at: parse_db_timestamp(&row.created_at),
    }
}
