//! Identity resolver
//!
//! Decides who is asking: an account referenced by a session, or the holder
//! of a magic-link token. Every resolution attempt records exactly one
//! `auth.success` or `auth.failed` audit event.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::models::{
    events, hash_token, AccountId, AccountIdentity, AuditEventDraft, Identity, TokenIdentity,
};
use crate::services::audit::AuditRecorder;
use crate::services::guard::RequestDescriptor;
use crate::utils::validation::is_well_formed_token;
use crate::utils::StoreError;

/// Lookups the resolver needs
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_account(&self, id: AccountId) -> Result<Option<AccountIdentity>, StoreError>;

    /// Validate a token digest and record the access as one atomic step.
    ///
    /// Returns `None` (and writes nothing) for unknown, revoked or expired
    /// tokens.
    async fn consume_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<TokenIdentity>, StoreError>;
}

/// Credential carried by a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    None,
    /// Verified session referencing an account
    Session(AccountId),
    /// A session was presented but could not be verified
    InvalidSession(&'static str),
    /// Raw magic-link token
    Token(String),
}

impl Credential {
    pub fn token(&self) -> Option<&str> {
        match self {
            Credential::Token(token) => Some(token),
            _ => None,
        }
    }
}

/// Why a request could not be authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    NoCredentials,
    InvalidSession,
    SessionExpired,
    AccountNotFound,
    AccountInactive,
    InvalidOrExpiredToken,
    StoreUnavailable,
}

impl AuthFailure {
    pub fn reason(&self) -> &'static str {
        match self {
            AuthFailure::NoCredentials => "no_credentials",
            AuthFailure::InvalidSession => "invalid_session",
            AuthFailure::SessionExpired => "session_expired",
            AuthFailure::AccountNotFound => "account_not_found",
            AuthFailure::AccountInactive => "account_inactive",
            AuthFailure::InvalidOrExpiredToken => "invalid_or_expired_token",
            AuthFailure::StoreUnavailable => "store_unavailable",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            AuthFailure::NoCredentials => "Authentication required",
            AuthFailure::InvalidSession => "Invalid session",
            AuthFailure::SessionExpired => "Session has expired, please sign in again",
            AuthFailure::AccountNotFound | AuthFailure::AccountInactive => {
                "Account is not available"
            }
            AuthFailure::InvalidOrExpiredToken => "This link is invalid or has expired",
            AuthFailure::StoreUnavailable => "Authentication is temporarily unavailable",
        }
    }

    fn from_session_reason(reason: &str) -> Self {
        match reason {
            "session_expired" => AuthFailure::SessionExpired,
            _ => AuthFailure::InvalidSession,
        }
    }
}

/// Outcome of identity resolution
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(Identity),
    Unauthenticated(AuthFailure),
}

#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn IdentityStore>,
    audit: AuditRecorder,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn IdentityStore>, audit: AuditRecorder) -> Self {
        Self { store, audit }
    }

    /// Resolve the request's credential into an identity.
    ///
    /// `Err` means the mandatory audit event could not be stored and the
    /// recorder is configured to deny in that case.
    pub async fn resolve(
        &self,
        request: &RequestDescriptor,
        now: DateTime<Utc>,
    ) -> Result<Resolution, StoreError> {
        let resolution = self.lookup(&request.credential, now).await;

        let draft = match &resolution {
            Resolution::Resolved(identity) => {
                debug!(actor = %identity.actor(), route = %request.route, "Identity resolved");
                AuditEventDraft::new(events::AUTH_SUCCESS)
                    .actor(identity.actor())
                    .tenant(identity.bound_tenant())
                    .tag(format!("role:{}", identity.role_class()))
            }
            Resolution::Unauthenticated(failure) => {
                debug!(reason = failure.reason(), route = %request.route, "Identity not resolved");
                let actor = match &request.credential {
                    Credential::Session(id) => Some(format!("account:{}", id)),
                    _ => None,
                };
                AuditEventDraft::new(events::AUTH_FAILED)
                    .maybe_actor(actor)
                    .reason(failure.reason())
            }
        };

        self.audit
            .append_mandatory(draft.details(request.audit_details()).occurred_at(now))
            .await?;

        Ok(resolution)
    }

    async fn lookup(&self, credential: &Credential, now: DateTime<Utc>) -> Resolution {
        match credential {
            Credential::None => Resolution::Unauthenticated(AuthFailure::NoCredentials),
            Credential::InvalidSession(reason) => {
                Resolution::Unauthenticated(AuthFailure::from_session_reason(reason))
            }
            Credential::Session(account_id) => match self.store.find_account(*account_id).await {
                Ok(Some(account)) if account.active => {
                    Resolution::Resolved(Identity::Account(account))
                }
                Ok(Some(_)) => Resolution::Unauthenticated(AuthFailure::AccountInactive),
                Ok(None) => Resolution::Unauthenticated(AuthFailure::AccountNotFound),
                Err(e) => {
                    warn!(account_id = account_id, error = %e, "Account lookup failed");
                    Resolution::Unauthenticated(AuthFailure::StoreUnavailable)
                }
            },
            Credential::Token(raw) => {
                if !is_well_formed_token(raw) {
                    return Resolution::Unauthenticated(AuthFailure::InvalidOrExpiredToken);
                }
                match self.store.consume_token(&hash_token(raw), now).await {
                    Ok(Some(token)) => Resolution::Resolved(Identity::Token(token)),
                    Ok(None) => Resolution::Unauthenticated(AuthFailure::InvalidOrExpiredToken),
                    Err(e) => {
                        warn!(error = %e, "Token lookup failed");
                        Resolution::Unauthenticated(AuthFailure::StoreUnavailable)
                    }
                }
            }
        }
    }
}
