//! Audit event models

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TenantId;

/// Well-known event names
pub mod events {
    pub const AUTH_SUCCESS: &str = "auth.success";
    pub const AUTH_FAILED: &str = "auth.failed";
    pub const AUTHZ_GRANTED: &str = "authz.granted";
    pub const AUTHZ_DENIED: &str = "authz.denied";
    pub const RATE_LIMIT_EXCEEDED: &str = "rate_limit.exceeded";
    pub const REQUEST_PROCEEDED: &str = "request.proceeded";
    pub const LOGIN_SUCCEEDED: &str = "auth.login_succeeded";
    pub const LOGIN_FAILED: &str = "auth.login_failed";
    pub const TOKEN_CREATED: &str = "access_token.created";
    pub const TOKEN_REVOKED: &str = "access_token.revoked";
    pub const TOKEN_REGENERATED: &str = "access_token.regenerated";
    pub const TOKENS_PURGED: &str = "access_token.purged";
    pub const AUDIT_CLEANUP: &str = "audit.cleanup";
    pub const TENANT_CREATED: &str = "tenant.created";
    pub const ACCOUNT_CREATED: &str = "account.created";
    pub const TEAM_CREATED: &str = "team.created";
    pub const TEAM_MEMBER_ADDED: &str = "team.member_added";
    pub const TEAM_MEMBER_REMOVED: &str = "team.member_removed";
}

/// Audit event severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn all() -> [Severity; 5] {
        [
            Severity::Debug,
            Severity::Info,
            Severity::Warning,
            Severity::Error,
            Severity::Critical,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }

    /// Infer a severity from event-name conventions.
    ///
    /// Names mentioning a failure outcome are warnings, names carrying an
    /// `error` segment are errors, everything else is informational.
    pub fn infer(event_name: &str) -> Severity {
        const WARNING_MARKERS: [&str; 4] = ["failed", "denied", "exceeded", "rejected"];

        let name = event_name.to_lowercase();
        if WARNING_MARKERS.iter().any(|marker| name.contains(marker)) {
            return Severity::Warning;
        }
        if name
            .split(|c: char| c == '.' || c == '_' || c == ':')
            .any(|segment| segment == "error")
        {
            return Severity::Error;
        }
        Severity::Info
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Severity::Debug),
            "info" => Ok(Severity::Info),
            "warning" | "warn" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("Invalid severity: {}", s)),
        }
    }
}

/// Immutable audit record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    pub id: Uuid,
    /// Actor label such as `account:12` or `token:<uuid>`
    pub actor: Option<String>,
    pub tenant_id: Option<TenantId>,
    pub event_name: String,
    pub target_type: Option<String>,
    pub target_id: Option<String>,
    pub before_state: Option<serde_json::Value>,
    pub after_state: Option<serde_json::Value>,
    /// Machine-readable reason code for decisions
    pub reason: Option<String>,
    /// Request context (route, remote address, limits...)
    pub details: Option<serde_json::Value>,
    pub severity: Severity,
    pub tags: BTreeSet<String>,
    pub occurred_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Event under construction, completed by the recorder on append
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditEventDraft {
    pub event_name: String,
    pub actor: Option<String>,
    pub tenant_id: Option<TenantId>,
    pub target_type: Option<String>,
    pub target_id: Option<String>,
    pub before_state: Option<serde_json::Value>,
    pub after_state: Option<serde_json::Value>,
    pub reason: Option<String>,
    pub details: Option<serde_json::Value>,
    pub severity: Option<Severity>,
    pub tags: BTreeSet<String>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuditEventDraft {
    pub fn new(event_name: impl Into<String>) -> Self {
        Self {
            event_name: event_name.into(),
            ..Default::default()
        }
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn maybe_actor(mut self, actor: Option<String>) -> Self {
        self.actor = actor;
        self
    }

    pub fn tenant(mut self, tenant_id: Option<TenantId>) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    pub fn target(mut self, target_type: impl Into<String>, target_id: impl ToString) -> Self {
        self.target_type = Some(target_type.into());
        self.target_id = Some(target_id.to_string());
        self
    }

    pub fn before(mut self, state: serde_json::Value) -> Self {
        self.before_state = Some(state);
        self
    }

    pub fn after(mut self, state: serde_json::Value) -> Self {
        self.after_state = Some(state);
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(at);
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }
}

/// Filters for audit queries
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditQuery {
    pub tenant_id: Option<TenantId>,
    pub actor: Option<String>,
    pub event_name: Option<String>,
    pub severity: Option<Severity>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl AuditQuery {
    pub const DEFAULT_LIMIT: u32 = 100;
    pub const MAX_LIMIT: u32 = 1000;

    pub fn effective_limit(&self) -> u32 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    /// Whether an event passes every filter except paging
    pub fn matches(&self, event: &AuditEvent) -> bool {
        self.tenant_id.is_none_or(|t| event.tenant_id == Some(t))
            && self
                .actor
                .as_deref()
                .is_none_or(|a| event.actor.as_deref() == Some(a))
            && self
                .event_name
                .as_deref()
                .is_none_or(|n| event.event_name == n)
            && self.severity.is_none_or(|s| event.severity == s)
            && self.from.is_none_or(|from| event.occurred_at >= from)
            && self.to.is_none_or(|to| event.occurred_at < to)
    }
}

/// Aggregate counts over a trailing window
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuditSummary {
    pub since: DateTime<Utc>,
    pub total: u64,
    pub by_severity: BTreeMap<String, u64>,
    pub by_event: BTreeMap<String, u64>,
}

impl AuditSummary {
    pub fn empty(since: DateTime<Utc>) -> Self {
        Self {
            since,
            ..Default::default()
        }
    }

    pub fn record(&mut self, severity: Severity, event_name: &str, count: u64) {
        self.total += count;
        *self.by_severity.entry(severity.as_str().to_string()).or_default() += count;
        *self.by_event.entry(event_name.to_string()).or_default() += count;
    }
}
