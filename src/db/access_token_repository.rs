//! Access token repository
//!
//! Only the SHA-256 digest of a token is stored. Validation and access
//! tracking happen in a single `UPDATE ... RETURNING` statement so that
//! concurrent uses of one token never lose an increment.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{format_timestamp, parse_bool, parse_db_timestamp};
use crate::models::{AccessToken, AccountId, TenantId};

#[derive(Debug, sqlx::FromRow)]
struct AccessTokenRow {
    id: String,
    tenant_id: i64,
    token_prefix: String,
    scopes: String,
    created_by: Option<i64>,
    is_active: i64,
    expires_at: String,
    access_count: i64,
    last_accessed_at: Option<String>,
    revoked_at: Option<String>,
    replaced_by: Option<String>,
    created_at: String,
}

const TOKEN_COLUMNS: &str = "id, tenant_id, token_prefix, scopes, created_by, is_active, expires_at, access_count, last_accessed_at, revoked_at, replaced_by, created_at";

/// Values needed to mint a new token record
#[derive(Debug, Clone)]
pub struct NewAccessToken<'t> {
    pub tenant_id: TenantId,
    pub token_hash: &'t str,
    pub token_prefix: &'t str,
    pub scopes: &'t BTreeSet<String>,
    pub created_by: Option<AccountId>,
    pub expires_at: DateTime<Utc>,
}

pub struct AccessTokenRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> AccessTokenRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, new: &NewAccessToken<'_>) -> Result<AccessToken> {
        let id = Uuid::new_v4();
        let created_at = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO access_tokens (id, tenant_id, token_hash, token_prefix, scopes, created_by, is_active, expires_at, access_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 1, ?, 0, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(new.tenant_id)
        .bind(new.token_hash)
        .bind(new.token_prefix)
        .bind(serde_json::to_string(new.scopes)?)
        .bind(new.created_by)
        .bind(format_timestamp(new.expires_at))
        .bind(format_timestamp(created_at))
        .execute(self.pool)
        .await
        .context("Failed to create access token")?;

        Ok(AccessToken {
            id,
            tenant_id: new.tenant_id,
            token_prefix: new.token_prefix.to_string(),
            scopes: new.scopes.clone(),
            created_by: new.created_by,
            is_active: true,
            expires_at: new.expires_at,
            access_count: 0,
            last_accessed_at: None,
            revoked_at: None,
            replaced_by: None,
            created_at,
        })
    }

    /// Validate a token digest and record the access in one statement.
    ///
    /// Returns `None` when the token is unknown, revoked, inactive or
    /// expired at `now`; in that case nothing is written.
    pub async fn consume(&self, token_hash: &str, now: DateTime<Utc>) -> Result<Option<AccessToken>> {
        let now = format_timestamp(now);
        let sql = format!(
            r#"
            UPDATE access_tokens
            SET access_count = access_count + 1, last_accessed_at = ?
            WHERE token_hash = ? AND is_active = 1 AND revoked_at IS NULL AND expires_at > ?
            RETURNING {}
            "#,
            TOKEN_COLUMNS
        );

        let row = sqlx::query_as::<_, AccessTokenRow>(&sql)
            .bind(&now)
            .bind(token_hash)
            .bind(&now)
            .fetch_optional(self.pool)
            .await
            .context("Failed to validate access token")?;

        row.map(row_to_token).transpose()
    }

    pub async fn get(&self, tenant_id: TenantId, id: Uuid) -> Result<Option<AccessToken>> {
        let sql = format!(
            "SELECT {} FROM access_tokens WHERE tenant_id = ? AND id = ?",
            TOKEN_COLUMNS
        );
        let row = sqlx::query_as::<_, AccessTokenRow>(&sql)
            .bind(tenant_id)
            .bind(id.to_string())
            .fetch_optional(self.pool)
            .await
            .context("Failed to get access token")?;

        row.map(row_to_token).transpose()
    }

    pub async fn list_for_tenant(&self, tenant_id: TenantId) -> Result<Vec<AccessToken>> {
        let sql = format!(
            "SELECT {} FROM access_tokens WHERE tenant_id = ? ORDER BY created_at DESC",
            TOKEN_COLUMNS
        );
        let rows = sqlx::query_as::<_, AccessTokenRow>(&sql)
            .bind(tenant_id)
            .fetch_all(self.pool)
            .await
            .context("Failed to list access tokens")?;

        rows.into_iter().map(row_to_token).collect()
    }

    /// Permanently deactivate a token. Already-revoked tokens are left as-is
    /// and yield `None`.
    pub async fn revoke(
        &self,
        tenant_id: TenantId,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<AccessToken>> {
        let sql = format!(
            r#"
            UPDATE access_tokens
            SET is_active = 0, revoked_at = ?
            WHERE tenant_id = ? AND id = ? AND revoked_at IS NULL
            RETURNING {}
            "#,
            TOKEN_COLUMNS
        );

        let row = sqlx::query_as::<_, AccessTokenRow>(&sql)
            .bind(format_timestamp(now))
            .bind(tenant_id)
            .bind(id.to_string())
            .fetch_optional(self.pool)
            .await
            .context("Failed to revoke access token")?;

        row.map(row_to_token).transpose()
    }

    /// Revoke `id` and mint its replacement atomically.
    ///
    /// The replacement keeps the tenant and scopes of the old record; the
    /// caller supplies the new digest and expiry.
    pub async fn replace(
        &self,
        tenant_id: TenantId,
        id: Uuid,
        token_hash: &str,
        token_prefix: &str,
        expires_at: DateTime<Utc>,
        created_by: Option<AccountId>,
        now: DateTime<Utc>,
    ) -> Result<Option<(AccessToken, AccessToken)>> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        let new_id = Uuid::new_v4();

        let sql = format!(
            r#"
            UPDATE access_tokens
            SET is_active = 0, revoked_at = ?, replaced_by = ?
            WHERE tenant_id = ? AND id = ? AND revoked_at IS NULL
            RETURNING {}
            "#,
            TOKEN_COLUMNS
        );

        let old = sqlx::query_as::<_, AccessTokenRow>(&sql)
            .bind(format_timestamp(now))
            .bind(new_id.to_string())
            .bind(tenant_id)
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to revoke access token")?;

        let Some(old) = old else {
            tx.rollback().await.context("Failed to roll back transaction")?;
            return Ok(None);
        };
        let old = row_to_token(old)?;

        sqlx::query(
            r#"
            INSERT INTO access_tokens (id, tenant_id, token_hash, token_prefix, scopes, created_by, is_active, expires_at, access_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 1, ?, 0, ?)
            "#,
        )
        .bind(new_id.to_string())
        .bind(tenant_id)
        .bind(token_hash)
        .bind(token_prefix)
        .bind(serde_json::to_string(&old.scopes)?)
        .bind(created_by)
        .bind(format_timestamp(expires_at))
        .bind(format_timestamp(now))
        .execute(&mut *tx)
        .await
        .context("Failed to create replacement access token")?;

        tx.commit().await.context("Failed to commit token replacement")?;

        let replacement = AccessToken {
            id: new_id,
            tenant_id,
            token_prefix: token_prefix.to_string(),
            scopes: old.scopes.clone(),
            created_by,
            is_active: true,
            expires_at,
            access_count: 0,
            last_accessed_at: None,
            revoked_at: None,
            replaced_by: None,
            created_at: now,
        };

        Ok(Some((old, replacement)))
    }

    /// Delete tokens that expired or were revoked at or before `cutoff`
    pub async fn purge(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let cutoff = format_timestamp(cutoff);
        let result = sqlx::query(
            "DELETE FROM access_tokens WHERE expires_at <= ? OR (revoked_at IS NOT NULL AND revoked_at <= ?)",
        )
        .bind(&cutoff)
        .bind(&cutoff)
        .execute(self.pool)
        .await
        .context("Failed to purge access tokens")?;

        Ok(result.rows_affected())
    }
}

fn row_to_token(row: AccessTokenRow) -> Result<AccessToken> {
    Ok(AccessToken {
        id: Uuid::parse_str(&row.id).context("Invalid access token id")?,
        tenant_id: row.tenant_id,
        token_prefix: row.token_prefix,
        scopes: serde_json::from_str(&row.scopes).unwrap_or_default(),
        created_by: row.created_by,
        is_active: parse_bool(row.is_active),
        expires_at: parse_db_timestamp(&row.expires_at),
        access_count: row.access_count,
        last_accessed_at: row.last_accessed_at.as_deref().map(parse_db_timestamp),
        revoked_at: row.revoked_at.as_deref().map(parse_db_timestamp),
        replaced_by: row
            .replaced_by
            .as_deref()
            .and_then(|s| Uuid::parse_str(s).ok()),
        created_at: parse_db_timestamp(&row.created_at),
    })
}
