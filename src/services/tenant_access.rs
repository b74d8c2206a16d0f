//! Tenant access resolver
//!
//! Tenant isolation boundary. The decision table in [`decide`] is pure; the
//! resolver only loads the team facts an agency decision needs and records
//! the outcome.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::models::{events, AccountId, AuditEventDraft, Identity, Role, TeamId, TenantId};
use crate::services::audit::AuditRecorder;
use crate::services::guard::{RequestDescriptor, RoutePolicy};
use crate::utils::StoreError;

/// Team membership lookups
#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Team owning the tenant; `None` for unknown or team-less tenants
    async fn tenant_team(&self, tenant_id: TenantId) -> Result<Option<TeamId>, StoreError>;

    async fn account_teams(&self, account_id: AccountId) -> Result<Vec<TeamId>, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    RoleNotPermitted,
    TokenTenantMismatch,
    NotOnTeam,
    CrossTenantAccess,
    NoApplicableRule,
    MissingScope,
    StoreUnavailable,
}

impl DenyReason {
    pub fn code(&self) -> &'static str {
        match self {
            DenyReason::RoleNotPermitted => "role_not_permitted",
            DenyReason::TokenTenantMismatch => "token_tenant_mismatch",
            DenyReason::NotOnTeam => "not_on_team",
            DenyReason::CrossTenantAccess => "cross_tenant_access",
            DenyReason::NoApplicableRule => "no_applicable_rule",
            DenyReason::MissingScope => "missing_scope",
            DenyReason::StoreUnavailable => "store_unavailable",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            DenyReason::RoleNotPermitted => "Your role does not allow this action",
            DenyReason::TokenTenantMismatch | DenyReason::CrossTenantAccess => {
                "You do not have access to this client"
            }
            DenyReason::NotOnTeam => "This client is not managed by your team",
            DenyReason::NoApplicableRule => "Access denied",
            DenyReason::MissingScope => "This link does not allow this action",
            DenyReason::StoreUnavailable => "Authorization is temporarily unavailable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "reason", rename_all = "snake_case")]
pub enum AccessDecision {
    Allow,
    Deny(DenyReason),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow)
    }
}

/// Team facts for an agency decision
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeamFacts {
    pub tenant_team: Option<TeamId>,
    pub account_teams: Vec<TeamId>,
}

/// Tenant isolation decision table. First matching rule wins:
///
/// 1. admin: allow
/// 2. token: allow iff bound to the requested tenant
/// 3. agency: allow iff the tenant's team is one of the account's teams
/// 4. client: allow iff bound to the requested tenant
/// 5. otherwise deny
pub fn decide(identity: &Identity, requested: TenantId, facts: Option<&TeamFacts>) -> AccessDecision {
    match identity {
        Identity::Account(account) if account.primary_role == Role::Admin => AccessDecision::Allow,
        Identity::Token(token) => {
            if token.tenant_id == requested {
                AccessDecision::Allow
            } else {
                AccessDecision::Deny(DenyReason::TokenTenantMismatch)
            }
        }
        Identity::Account(account) if account.primary_role == Role::Agency => match facts {
            Some(facts) => match facts.tenant_team {
                Some(team) if facts.account_teams.contains(&team) => AccessDecision::Allow,
                _ => AccessDecision::Deny(DenyReason::NotOnTeam),
            },
            None => AccessDecision::Deny(DenyReason::NoApplicableRule),
        },
        Identity::Account(account) if account.primary_role == Role::Client => {
            if account.tenant_id == Some(requested) {
                AccessDecision::Allow
            } else {
                AccessDecision::Deny(DenyReason::CrossTenantAccess)
            }
        }
        Identity::Account(_) => AccessDecision::Deny(DenyReason::NoApplicableRule),
    }
}

#[derive(Clone)]
pub struct TenantAccessResolver {
    store: Arc<dyn MembershipStore>,
    audit: AuditRecorder,
}

impl TenantAccessResolver {
    pub fn new(store: Arc<dyn MembershipStore>, audit: AuditRecorder) -> Self {
        Self { store, audit }
    }

    /// Tenant isolation check without side effects
    pub async fn check(&self, identity: &Identity, requested: TenantId) -> AccessDecision {
        let facts = match identity {
            Identity::Account(account) if account.primary_role == Role::Agency => {
                match self.team_facts(account.account_id, requested).await {
                    Ok(facts) => Some(facts),
                    Err(e) => {
                        warn!(account_id = account.account_id, tenant_id = requested, error = %e, "Team lookup failed");
                        return AccessDecision::Deny(DenyReason::StoreUnavailable);
                    }
                }
            }
            _ => None,
        };

        decide(identity, requested, facts.as_ref())
    }

    async fn team_facts(&self, account_id: AccountId, tenant_id: TenantId) -> Result<TeamFacts, StoreError> {
        Ok(TeamFacts {
            tenant_team: self.store.tenant_team(tenant_id).await?,
            account_teams: self.store.account_teams(account_id).await?,
        })
    }

    /// Evaluate the route's role, tenant and scope requirements for
    /// `identity` and record the outcome.
    ///
    /// `Err` means the mandatory audit event could not be stored and the
    /// recorder is configured to deny in that case.
    pub async fn authorize(
        &self,
        request: &RequestDescriptor,
        policy: &RoutePolicy,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> Result<AccessDecision, StoreError> {
        let decision = self.evaluate(request, policy, identity).await;

        // Only a granted tenant is attributed; a denied one stays in details
        let (draft, tenant) = match decision {
            AccessDecision::Allow => (
                AuditEventDraft::new(events::AUTHZ_GRANTED),
                request.target_tenant.or(identity.bound_tenant()),
            ),
            AccessDecision::Deny(reason) => {
                debug!(actor = %identity.actor(), reason = reason.code(), route = %request.route, "Access denied");
                (
                    AuditEventDraft::new(events::AUTHZ_DENIED).reason(reason.code()),
                    identity.bound_tenant(),
                )
            }
        };

        self.audit
            .append_mandatory(
                draft
                    .actor(identity.actor())
                    .tenant(tenant)
                    .tag(format!("role:{}", identity.role_class()))
                    .details(request.audit_details())
                    .occurred_at(now),
            )
            .await?;

        Ok(decision)
    }

    async fn evaluate(
        &self,
        request: &RequestDescriptor,
        policy: &RoutePolicy,
        identity: &Identity,
    ) -> AccessDecision {
        if !policy.permits_role(identity.role_class()) {
            return AccessDecision::Deny(DenyReason::RoleNotPermitted);
        }

        match request.target_tenant {
            Some(tenant_id) => {
                let decision = self.check(identity, tenant_id).await;
                if !decision.is_allowed() {
                    return decision;
                }
            }
            None if policy.tenant_scoped => return AccessDecision::Deny(DenyReason::NoApplicableRule),
            None => {}
        }

        if let (Some(scope), Identity::Token(token)) = (policy.required_scope, identity) {
            if !token.has_scope(scope) {
                return AccessDecision::Deny(DenyReason::MissingScope);
            }
        }

        AccessDecision::Allow
    }
}
