//! Audit event repository
//!
//! SQLite implementation of the audit store. Rows are only ever inserted or
//! deleted by retention cleanup; there is no update path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{format_timestamp, parse_db_timestamp};
use crate::models::{AuditEvent, AuditQuery, AuditSummary, Severity, TenantId};
use crate::services::audit::AuditStore;
use crate::utils::StoreError;

#[derive(Debug, sqlx::FromRow)]
struct AuditRow {
    id: String,
    actor: Option<String>,
    tenant_id: Option<i64>,
    event_name: String,
    target_type: Option<String>,
    target_id: Option<String>,
    before_state: Option<String>,
    after_state: Option<String>,
    reason: Option<String>,
    details: Option<String>,
    severity: String,
    tags: String,
    occurred_at: String,
    expires_at: String,
}

#[derive(Debug, sqlx::FromRow)]
struct SummaryRow {
    severity: String,
    event_name: String,
    count: i64,
}

const AUDIT_COLUMNS: &str = "id, actor, tenant_id, event_name, target_type, target_id, before_state, after_state, reason, details, severity, tags, occurred_at, expires_at";

#[derive(Clone)]
pub struct SqliteAuditStore {
    pool: SqlitePool,
}

impl SqliteAuditStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditStore for SqliteAuditStore {
    async fn append(&self, event: &AuditEvent) -> Result<(), StoreError> {
        let tags = serde_json::to_string(&event.tags)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO audit_events (id, actor, tenant_id, event_name, target_type, target_id, before_state, after_state, reason, details, severity, tags, occurred_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.id.to_string())
        .bind(event.actor.as_deref())
        .bind(event.tenant_id)
        .bind(&event.event_name)
        .bind(event.target_type.as_deref())
        .bind(event.target_id.as_deref())
        .bind(event.before_state.as_ref().map(|v| v.to_string()))
        .bind(event.after_state.as_ref().map(|v| v.to_string()))
        .bind(event.reason.as_deref())
        .bind(event.details.as_ref().map(|v| v.to_string()))
        .bind(event.severity.as_str())
        .bind(tags)
        .bind(format_timestamp(event.occurred_at))
        .bind(format_timestamp(event.expires_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>, StoreError> {
        let mut sql = format!("SELECT {} FROM audit_events WHERE 1 = 1", AUDIT_COLUMNS);

        if query.tenant_id.is_some() {
            sql.push_str(" AND tenant_id = ?");
        }
        if query.actor.is_some() {
            sql.push_str(" AND actor = ?");
        }
        if query.event_name.is_some() {
            sql.push_str(" AND event_name = ?");
        }
        if query.severity.is_some() {
            sql.push_str(" AND severity = ?");
        }
        if query.from.is_some() {
            sql.push_str(" AND occurred_at >= ?");
        }
        if query.to.is_some() {
            sql.push_str(" AND occurred_at < ?");
        }

        sql.push_str(" ORDER BY occurred_at DESC, rowid DESC LIMIT ? OFFSET ?");

        let mut q = sqlx::query_as::<_, AuditRow>(&sql);
        if let Some(tenant_id) = query.tenant_id {
            q = q.bind(tenant_id);
        }
        if let Some(ref actor) = query.actor {
            q = q.bind(actor);
        }
        if let Some(ref event_name) = query.event_name {
            q = q.bind(event_name);
        }
        if let Some(severity) = query.severity {
            q = q.bind(severity.as_str());
        }
        if let Some(from) = query.from {
            q = q.bind(format_timestamp(from));
        }
        if let Some(to) = query.to {
            q = q.bind(format_timestamp(to));
        }
        q = q
            .bind(i64::from(query.effective_limit()))
            .bind(i64::from(query.offset.unwrap_or(0)));

        let rows = q.fetch_all(&self.pool).await?;

        Ok(rows.into_iter().map(row_to_event).collect())
    }

    async fn summarize(
        &self,
        since: DateTime<Utc>,
        tenant_id: Option<TenantId>,
    ) -> Result<AuditSummary, StoreError> {
        let mut sql = String::from(
            "SELECT severity, event_name, COUNT(*) AS count FROM audit_events WHERE occurred_at >= ?",
        );
        if tenant_id.is_some() {
            sql.push_str(" AND tenant_id = ?");
        }
        sql.push_str(" GROUP BY severity, event_name");

        let mut q = sqlx::query_as::<_, SummaryRow>(&sql).bind(format_timestamp(since));
        if let Some(tenant_id) = tenant_id {
            q = q.bind(tenant_id);
        }

        let rows = q.fetch_all(&self.pool).await?;

        let mut summary = AuditSummary::empty(since);
        for row in rows {
            let severity = row.severity.parse().unwrap_or(Severity::Info);
            summary.record(severity, &row.event_name, row.count.max(0) as u64);
        }
        Ok(summary)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM audit_events WHERE expires_at <= ?")
            .bind(format_timestamp(now))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

fn row_to_event(row: AuditRow) -> AuditEvent {
    AuditEvent {
        id: Uuid::parse_str(&row.id).unwrap_or_else(|_| Uuid::nil()),
        actor: row.actor,
        tenant_id: row.tenant_id,
        event_name: row.event_name,
        target_type: row.target_type,
        target_id: row.target_id,
        before_state: row.before_state.and_then(|s| serde_json::from_str(&s).ok()),
        after_state: row.after_state.and_then(|s| serde_json::from_str(&s).ok()),
        reason: row.reason,
        details: row.details.and_then(|s| serde_json::from_str(&s).ok()),
        severity: row.severity.parse().unwrap_or(Severity::Info),
        tags: serde_json::from_str(&row.tags).unwrap_or_default(),
        occurred_at: parse_db_timestamp(&row.occurred_at),
        expires_at: parse_db_timestamp(&row.expires_at),
    }
}
