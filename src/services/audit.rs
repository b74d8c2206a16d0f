//! Audit recorder
//!
//! Appends structured, expiring events to an injected [`AuditStore`].
//! Ordinary events never fail the caller: when the store is unreachable the
//! event is written to the `audit_fallback` log target instead. Security
//! decision events are mandatory and, depending on configuration, surface the
//! store failure so the request can be rejected.
//!
//! Every store write runs on its own task, so an event whose write has begun
//! is persisted even if the request that produced it is cancelled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::{AuditFailureMode, AuditSettings};
use crate::models::{
    events, AuditEvent, AuditEventDraft, AuditQuery, AuditSummary, Severity, TenantId,
};
use crate::utils::StoreError;

/// Append-only event store with range queries
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, event: &AuditEvent) -> Result<(), StoreError>;

    /// Events matching `query`, newest first
    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>, StoreError>;

    /// Counts per severity and event name for events since `since`
    async fn summarize(
        &self,
        since: DateTime<Utc>,
        tenant_id: Option<TenantId>,
    ) -> Result<AuditSummary, StoreError>;

    /// Remove every event with `expires_at <= now`
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// In-memory audit store, used by tests and as a stand-in when no durable
/// store is configured
#[derive(Default, Clone)]
pub struct InMemoryAuditStore {
    events: Arc<RwLock<Vec<AuditEvent>>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far, oldest first
    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, event: &AuditEvent) -> Result<(), StoreError> {
        self.events.write().await.push(event.clone());
        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>, StoreError> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .rev()
            .filter(|e| query.matches(e))
            .skip(query.offset.unwrap_or(0) as usize)
            .take(query.effective_limit() as usize)
            .cloned()
            .collect())
    }

    async fn summarize(
        &self,
        since: DateTime<Utc>,
        tenant_id: Option<TenantId>,
    ) -> Result<AuditSummary, StoreError> {
        let events = self.events.read().await;
        let mut summary = AuditSummary::empty(since);
        for event in events.iter().filter(|e| {
            e.occurred_at >= since && tenant_id.is_none_or(|t| e.tenant_id == Some(t))
        }) {
            summary.record(event.severity, &event.event_name, 1);
        }
        Ok(summary)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut events = self.events.write().await;
        let before = events.len();
        events.retain(|e| e.expires_at > now);
        Ok((before - events.len()) as u64)
    }
}

/// Records audit events with defaults, deadlines and fallback logging
#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn AuditStore>,
    retention: chrono::Duration,
    timeout: Duration,
    failure_mode: AuditFailureMode,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn AuditStore>, settings: &AuditSettings) -> Self {
        Self {
            store,
            retention: chrono::Duration::days(i64::from(settings.retention_days)),
            timeout: Duration::from_millis(settings.store_timeout_ms),
            failure_mode: settings.on_mandatory_failure,
        }
    }

    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }

    pub fn failure_mode(&self) -> AuditFailureMode {
        self.failure_mode
    }

    /// Turn a draft into a complete event, filling in id, timestamps and
    /// inferred severity
    pub fn finalize(&self, draft: AuditEventDraft) -> AuditEvent {
        let occurred_at = draft.occurred_at.unwrap_or_else(Utc::now);
        let severity = draft
            .severity
            .unwrap_or_else(|| Severity::infer(&draft.event_name));

        AuditEvent {
            id: Uuid::new_v4(),
            actor: draft.actor,
            tenant_id: draft.tenant_id,
            severity,
            expires_at: draft
                .expires_at
                .unwrap_or(occurred_at + self.retention),
            event_name: draft.event_name,
            target_type: draft.target_type,
            target_id: draft.target_id,
            before_state: draft.before_state,
            after_state: draft.after_state,
            reason: draft.reason,
            details: draft.details,
            tags: draft.tags,
            occurred_at,
        }
    }

    /// Append an ordinary event. Never fails; a store failure is logged to
    /// the fallback channel.
    pub async fn append(&self, draft: AuditEventDraft) -> AuditEvent {
        let event = self.finalize(draft);
        if let Err(e) = self.persist(&event).await {
            log_fallback(&event, &e);
        }
        event
    }

    /// Append a security decision event.
    ///
    /// With [`AuditFailureMode::Deny`] a store failure is returned so the
    /// caller can reject the request; otherwise it behaves like [`append`].
    ///
    /// [`append`]: AuditRecorder::append
    pub async fn append_mandatory(&self, draft: AuditEventDraft) -> Result<AuditEvent, StoreError> {
        let event = self.finalize(draft);
        match self.persist(&event).await {
            Ok(()) => Ok(event),
            Err(e) => {
                log_fallback(&event, &e);
                match self.failure_mode {
                    AuditFailureMode::AllowAndLog => Ok(event),
                    AuditFailureMode::Deny => Err(e),
                }
            }
        }
    }

    async fn persist(&self, event: &AuditEvent) -> Result<(), StoreError> {
        let store = self.store.clone();
        let owned = event.clone();
        let timeout = self.timeout;
        let timeout_ms = timeout.as_millis() as u64;

        // Detached from the caller: dropping the request future does not
        // abort the write.
        let handle = tokio::spawn(async move {
            match tokio::time::timeout(timeout, store.append(&owned)).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout(timeout_ms)),
            }
        });

        match handle.await {
            Ok(result) => {
                if result.is_ok() {
                    debug!(event = %event.event_name, id = %event.id, "Audit event recorded");
                }
                result
            }
            Err(e) => Err(StoreError::Unavailable(format!("audit task failed: {}", e))),
        }
    }

    /// Filtered read of the trail
    pub async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>, StoreError> {
        self.store.query(query).await
    }

    /// Aggregate counts for the trailing `hours`
    pub async fn summary(
        &self,
        hours: u32,
        tenant_id: Option<TenantId>,
    ) -> Result<AuditSummary, StoreError> {
        let since = Utc::now() - chrono::Duration::hours(i64::from(hours));
        self.store.summarize(since, tenant_id).await
    }

    /// Retention cleanup: delete every event with `expires_at <= now` and
    /// return how many were removed
    pub async fn cleanup(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let removed = self.store.delete_expired(now).await?;
        if removed > 0 {
            self.append(
                AuditEventDraft::new(events::AUDIT_CLEANUP)
                    .actor("system:maintenance")
                    .details(serde_json::json!({ "removed": removed }))
                    .occurred_at(now),
            )
            .await;
        }
        Ok(removed)
    }
}

fn log_fallback(event: &AuditEvent, err: &StoreError) {
    match serde_json::to_string(event) {
        Ok(json) => error!(
            target: "audit_fallback",
            error = %err,
            event = %json,
            "Audit store unavailable, event recorded locally"
        ),
        Err(e) => warn!(
            target: "audit_fallback",
            error = %err,
            event_name = %event.event_name,
            "Audit store unavailable and event could not be serialized: {}", e
        ),
    }
}
