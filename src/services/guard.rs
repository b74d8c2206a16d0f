//! Guard chain
//!
//! Runs every guarded request through the same fixed sequence:
//!
//! ```text
//! [token brute-force limit] -> identity -> access (role, tenant, scope) -> rate limit -> proceed
//! ```
//!
//! and stops at the first rejection. Each step records exactly one audit
//! event, including successful traversals.

use std::net::IpAddr;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::config::WindowLimit;
use crate::models::{events, token_prefix, AuditEventDraft, Identity, RoleClass, TenantId};
use crate::services::audit::AuditRecorder;
use crate::services::identity::{AuthFailure, Credential, IdentityResolver, Resolution};
use crate::services::rate_limit::{
    api_key, token_validation_key, EffectiveLimit, RateLimitDecision, RateLimiter,
};
use crate::services::tenant_access::{AccessDecision, DenyReason, TenantAccessResolver};
use crate::utils::StoreError;

/// Per-route guard declaration
#[derive(Debug, Clone, PartialEq)]
pub struct RoutePolicy {
    pub name: &'static str,
    /// Role classes allowed on the route; empty allows any
    pub roles: &'static [RoleClass],
    /// Whether the route acts on one tenant's data
    pub tenant_scoped: bool,
    /// Scope a token identity must carry
    pub required_scope: Option<&'static str>,
    /// Base limit; the configured API default when unset
    pub limit: Option<WindowLimit>,
}

impl RoutePolicy {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            roles: &[],
            tenant_scoped: false,
            required_scope: None,
            limit: None,
        }
    }

    pub fn tenant_scoped(name: &'static str) -> Self {
        Self {
            tenant_scoped: true,
            ..Self::new(name)
        }
    }

    pub fn with_roles(mut self, roles: &'static [RoleClass]) -> Self {
        self.roles = roles;
        self
    }

    pub fn with_scope(mut self, scope: &'static str) -> Self {
        self.required_scope = Some(scope);
        self
    }

    pub fn with_limit(mut self, max_attempts: u32, window_secs: u64) -> Self {
        self.limit = Some(WindowLimit {
            max_attempts,
            window_secs,
        });
        self
    }

    pub fn permits_role(&self, role: RoleClass) -> bool {
        self.roles.is_empty() || self.roles.contains(&role)
    }

    fn has_access_requirements(&self) -> bool {
        self.tenant_scoped || !self.roles.is_empty() || self.required_scope.is_some()
    }
}

/// What the gateway knows about an inbound request
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: String,
    pub path: String,
    pub route: String,
    pub remote_addr: IpAddr,
    pub user_agent: Option<String>,
    pub credential: Credential,
    pub target_tenant: Option<TenantId>,
}

impl RequestDescriptor {
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        route: impl Into<String>,
        remote_addr: IpAddr,
    ) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            route: route.into(),
            remote_addr,
            user_agent: None,
            credential: Credential::None,
            target_tenant: None,
        }
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = credential;
        self
    }

    pub fn with_target_tenant(mut self, tenant: Option<TenantId>) -> Self {
        self.target_tenant = tenant;
        self
    }

    pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }

    /// Request context attached to every audit event of this request
    /// Request facts stored in every event's details. The named tenant is
    /// kept here rather than on the event until access to it is granted.
    pub fn audit_details(&self) -> serde_json::Value {
        let mut details = json!({
            "method": self.method,
            "path": self.path,
            "route": self.route,
            "remote_addr": self.remote_addr.to_string(),
            "user_agent": self.user_agent,
        });
        if let Some(tenant_id) = self.target_tenant {
            details["requested_tenant"] = json!(tenant_id);
        }
        details
    }
}

/// Values for the `X-RateLimit-*` headers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub limit: u32,
    pub remaining: u32,
}

/// Context attached to a request that passed the chain
#[derive(Debug, Clone, Serialize)]
pub struct GuardContext {
    pub resolved_identity: Identity,
    pub resolved_tenant: Option<TenantId>,
    pub authorization_result: AccessDecision,
    pub rate_limit: RateLimitStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    Unauthenticated,
    Forbidden,
    Throttled,
    StoreUnavailable,
}

/// Terminal rejection with everything needed to build the response
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub kind: RejectionKind,
    pub reason: &'static str,
    pub message: String,
    pub rate_limit: Option<RateLimitStatus>,
    pub retry_after_secs: Option<u64>,
    pub resets_at: Option<DateTime<Utc>>,
}

impl Rejection {
    fn new(kind: RejectionKind, reason: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            reason,
            message: message.into(),
            rate_limit: None,
            retry_after_secs: None,
            resets_at: None,
        }
    }

    fn audit_unavailable() -> Self {
        Self::new(
            RejectionKind::StoreUnavailable,
            "audit_unavailable",
            "The request could not be recorded and was not processed",
        )
    }

    pub fn status(&self) -> StatusCode {
        match self.kind {
            RejectionKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            RejectionKind::Forbidden => StatusCode::FORBIDDEN,
            RejectionKind::Throttled => StatusCode::TOO_MANY_REQUESTS,
            RejectionKind::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn category(&self) -> &'static str {
        match self.kind {
            RejectionKind::Unauthenticated => "unauthenticated",
            RejectionKind::Forbidden => "forbidden",
            RejectionKind::Throttled => "throttled",
            RejectionKind::StoreUnavailable => "store_unavailable",
        }
    }
}

#[derive(Debug, Clone)]
pub enum GuardOutcome {
    Proceed(Box<GuardContext>),
    Rejected(Rejection),
}

/// Ordered composition of the identity resolver, tenant access resolver,
/// rate limiter and audit recorder
#[derive(Clone)]
pub struct GuardChain {
    identity: IdentityResolver,
    access: TenantAccessResolver,
    limiter: RateLimiter,
    audit: AuditRecorder,
    api_limit: WindowLimit,
    token_validation_limit: WindowLimit,
}

impl GuardChain {
    pub fn new(
        identity: IdentityResolver,
        access: TenantAccessResolver,
        limiter: RateLimiter,
        audit: AuditRecorder,
        api_limit: WindowLimit,
        token_validation_limit: WindowLimit,
    ) -> Self {
        Self {
            identity,
            access,
            limiter,
            audit,
            api_limit,
            token_validation_limit,
        }
    }

    /// Current allowance of an unauthenticated caller, without counting
    pub async fn anonymous_allowance(&self, remote: IpAddr) -> RateLimitStatus {
        let limit = EffectiveLimit::for_role(&self.api_limit, RoleClass::Anonymous);
        RateLimitStatus {
            limit: limit.max_attempts,
            remaining: self.limiter.remaining(&api_key(None, remote), limit, Utc::now()).await,
        }
    }

    pub async fn evaluate(&self, request: &RequestDescriptor, policy: &RoutePolicy) -> GuardOutcome {
        self.evaluate_at(request, policy, Utc::now()).await
    }

    pub async fn evaluate_at(
        &self,
        request: &RequestDescriptor,
        policy: &RoutePolicy,
        now: DateTime<Utc>,
    ) -> GuardOutcome {
        match self.run(request, policy, now).await {
            Ok(context) => GuardOutcome::Proceed(Box::new(context)),
            Err(rejection) => {
                info!(
                    route = %request.route,
                    status = rejection.status().as_u16(),
                    reason = rejection.reason,
                    remote_addr = %request.remote_addr,
                    "Request rejected by guard chain"
                );
                GuardOutcome::Rejected(rejection)
            }
        }
    }

    async fn run(
        &self,
        request: &RequestDescriptor,
        policy: &RoutePolicy,
        now: DateTime<Utc>,
    ) -> Result<GuardContext, Rejection> {
        // Bound validation attempts before the token is looked up
        let token_key = match request.credential.token() {
            Some(raw) => {
                let key = token_validation_key(request.remote_addr, &token_prefix(raw));
                let limit = EffectiveLimit::unscaled(&self.token_validation_limit);
                let decision = self.limiter.check_and_increment(&key, limit, now).await;
                if let RateLimitDecision::Throttled { .. } = decision {
                    return Err(self
                        .throttled(request, None, None, &key, limit, &decision, "token_validation", now)
                        .await);
                }
                Some(key)
            }
            None => None,
        };

        let identity = match self.identity.resolve(request, now).await {
            Ok(Resolution::Resolved(identity)) => identity,
            Ok(Resolution::Unauthenticated(failure)) => {
                let kind = match failure {
                    AuthFailure::StoreUnavailable => RejectionKind::StoreUnavailable,
                    _ => RejectionKind::Unauthenticated,
                };
                let mut rejection = Rejection::new(kind, failure.reason(), failure.message());
                rejection.rate_limit = Some(self.peek(None, request, policy, now).await);
                return Err(rejection);
            }
            Err(e) => return Err(self.audit_failed(request, e)),
        };

        if let Some(key) = token_key {
            self.limiter.reset(&key).await;
        }

        // A named tenant is always checked, even on routes without their own
        // access requirements
        let authorization_result = if policy.has_access_requirements() || request.target_tenant.is_some() {
            match self.access.authorize(request, policy, &identity, now).await {
                Ok(AccessDecision::Allow) => AccessDecision::Allow,
                Ok(AccessDecision::Deny(reason)) => {
                    let kind = match reason {
                        DenyReason::StoreUnavailable => RejectionKind::StoreUnavailable,
                        _ => RejectionKind::Forbidden,
                    };
                    let mut rejection = Rejection::new(kind, reason.code(), reason.message());
                    rejection.rate_limit = Some(self.peek(Some(&identity), request, policy, now).await);
                    return Err(rejection);
                }
                Err(e) => return Err(self.audit_failed(request, e)),
            }
        } else {
            AccessDecision::Allow
        };

        let resolved_tenant = request.target_tenant.or(identity.bound_tenant());

        let key = api_key(Some(&identity), request.remote_addr);
        let limit = self.limit_for(policy, identity.role_class());
        let decision = self.limiter.check_and_increment(&key, limit, now).await;
        if let RateLimitDecision::Throttled { .. } = decision {
            return Err(self
                .throttled(request, Some(&identity), resolved_tenant, &key, limit, &decision, "api", now)
                .await);
        }

        self.audit
            .append_mandatory(
                AuditEventDraft::new(events::REQUEST_PROCEEDED)
                    .actor(identity.actor())
                    .tenant(resolved_tenant)
                    .tag(format!("role:{}", identity.role_class()))
                    .details(request.audit_details())
                    .occurred_at(now),
            )
            .await
            .map_err(|e| self.audit_failed(request, e))?;

        Ok(GuardContext {
            resolved_identity: identity,
            resolved_tenant,
            authorization_result,
            rate_limit: RateLimitStatus {
                limit: decision.limit(),
                remaining: decision.remaining(),
            },
        })
    }

    fn limit_for(&self, policy: &RoutePolicy, role: RoleClass) -> EffectiveLimit {
        EffectiveLimit::for_role(policy.limit.as_ref().unwrap_or(&self.api_limit), role)
    }

    /// Rate limit headers for a request rejected before the limiter ran
    async fn peek(
        &self,
        identity: Option<&Identity>,
        request: &RequestDescriptor,
        policy: &RoutePolicy,
        now: DateTime<Utc>,
    ) -> RateLimitStatus {
        let role = identity.map_or(RoleClass::Anonymous, Identity::role_class);
        let limit = self.limit_for(policy, role);
        let key = api_key(identity, request.remote_addr);
        RateLimitStatus {
            limit: limit.max_attempts,
            remaining: self.limiter.remaining(&key, limit, now).await,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn throttled(
        &self,
        request: &RequestDescriptor,
        identity: Option<&Identity>,
        tenant: Option<TenantId>,
        key: &str,
        limit: EffectiveLimit,
        decision: &RateLimitDecision,
        limiter: &'static str,
        now: DateTime<Utc>,
    ) -> Rejection {
        let retry_after = match decision {
            RateLimitDecision::Throttled {
                retry_after_secs, ..
            } => *retry_after_secs,
            RateLimitDecision::Allowed { .. } => 0,
        };

        let mut details = request.audit_details();
        details["key"] = json!(key);
        details["limit"] = json!(limit.max_attempts);
        details["window_secs"] = json!(limit.window.as_secs());
        details["limiter"] = json!(limiter);
        details["retry_after_seconds"] = json!(retry_after);

        let draft = AuditEventDraft::new(events::RATE_LIMIT_EXCEEDED)
            .maybe_actor(identity.map(Identity::actor))
            .tenant(tenant)
            .reason(limiter)
            .details(details)
            .occurred_at(now);

        if let Err(e) = self.audit.append_mandatory(draft).await {
            return self.audit_failed(request, e);
        }

        let mut rejection = Rejection::new(
            RejectionKind::Throttled,
            "rate_limit_exceeded",
            format!("Too many requests. Please retry in {} seconds.", retry_after),
        );
        rejection.rate_limit = Some(RateLimitStatus {
            limit: limit.max_attempts,
            remaining: 0,
        });
        rejection.retry_after_secs = Some(retry_after);
        rejection.resets_at = Some(decision.resets_at());
        rejection
    }

    fn audit_failed(&self, request: &RequestDescriptor, err: StoreError) -> Rejection {
        warn!(route = %request.route, error = %err, "Mandatory audit event could not be stored");
        Rejection::audit_unavailable()
    }
}
