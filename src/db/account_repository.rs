//! Account repository

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;

use super::{format_timestamp, parse_bool, parse_db_timestamp};
use crate::models::{Account, AccountId, AccountIdentity, CreateAccountRequest, Role, TeamId};

#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    id: i64,
    email: String,
    name: String,
    password_hash: String,
    primary_role: String,
    tenant_id: Option<i64>,
    active: i64,
    created_at: String,
    updated_at: String,
}

const ACCOUNT_COLUMNS: &str =
    "id, email, name, password_hash, primary_role, tenant_id, active, created_at, updated_at";

pub struct AccountRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> AccountRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, req: &CreateAccountRequest, password_hash: &str) -> Result<Account> {
        let now = format_timestamp(Utc::now());

        let result = sqlx::query(
            r#"
            INSERT INTO accounts (email, name, password_hash, primary_role, tenant_id, active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(req.email.to_lowercase())
        .bind(&req.name)
        .bind(password_hash)
        .bind(req.primary_role.as_str())
        .bind(req.tenant_id)
        .bind(&now)
        .bind(&now)
        .execute(self.pool)
        .await
        .context("Failed to create account")?;

        self.get_by_id(result.last_insert_rowid())
            .await?
            .context("Failed to retrieve created account")
    }

    pub async fn get_by_id(&self, id: AccountId) -> Result<Option<Account>> {
        let sql = format!("SELECT {} FROM accounts WHERE id = ?", ACCOUNT_COLUMNS);
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await
            .context("Failed to get account")?;

        row.map(row_to_account).transpose()
    }

    pub async fn get_by_email(&self, email: &str) -> Result<Option<Account>> {
        let sql = format!("SELECT {} FROM accounts WHERE email = ?", ACCOUNT_COLUMNS);
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(email.to_lowercase())
            .fetch_optional(self.pool)
            .await
            .context("Failed to get account by email")?;

        row.map(row_to_account).transpose()
    }

    /// Load only the fields the identity resolver needs
    pub async fn get_identity(&self, id: AccountId) -> Result<Option<AccountIdentity>> {
        Ok(self.get_by_id(id).await?.map(|account| account.identity()))
    }

    pub async fn set_active(&self, id: AccountId, active: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE accounts SET active = ?, updated_at = ? WHERE id = ?")
            .bind(active as i64)
            .bind(format_timestamp(Utc::now()))
            .bind(id)
            .execute(self.pool)
            .await
            .context("Failed to update account status")?;

        Ok(result.rows_affected() > 0)
    }

    /// Teams the account is a member of
    pub async fn team_ids(&self, id: AccountId) -> Result<Vec<TeamId>> {
        sqlx::query_scalar::<_, i64>(
            "SELECT team_id FROM team_members WHERE account_id = ? ORDER BY team_id",
        )
        .bind(id)
        .fetch_all(self.pool)
        .await
        .context("Failed to list account teams")
    }
}

fn row_to_account(row: AccountRow) -> Result<Account> {
    let primary_role = row
        .primary_role
        .parse::<Role>()
        .map_err(|e| anyhow::anyhow!(e))
        .with_context(|| format!("Account {} has an invalid role", row.id))?;

    Ok(Account {
        id: row.id,
        email: row.email,
        name: row.name,
        password_hash: row.password_hash,
        primary_role,
        tenant_id: row.tenant_id,
        active: parse_bool(row.active),
        created_at: parse_db_timestamp(&row.created_at),
        updated_at: parse_db_timestamp(&row.updated_at),
    })
}
