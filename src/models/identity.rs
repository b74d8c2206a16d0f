//! Identity model
//!
//! A request is made either by an authenticated account or by the holder of
//! a magic-link access token. Never both.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type AccountId = i64;
pub type TenantId = i64;
pub type TeamId = i64;

/// Primary role of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Platform administrator
    Admin,
    /// Agency staff working on the tenants of their teams
    Agency,
    /// Client user bound to a single tenant
    Client,
}

impl Role {
    pub fn all() -> [Role; 3] {
        [Role::Admin, Role::Agency, Role::Client]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Agency => "agency",
            Role::Client => "client",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "agency" => Ok(Role::Agency),
            "client" => Ok(Role::Client),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// Trust class of a caller.
///
/// Extends [`Role`] with the token holder and the anonymous caller so that
/// route requirements and rate-limit multipliers can be expressed over one
/// closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleClass {
    Admin,
    Agency,
    Client,
    Token,
    Anonymous,
}

impl RoleClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleClass::Admin => "admin",
            RoleClass::Agency => "agency",
            RoleClass::Client => "client",
            RoleClass::Token => "token",
            RoleClass::Anonymous => "anonymous",
        }
    }
}

impl From<Role> for RoleClass {
    fn from(role: Role) -> Self {
        match role {
            Role::Admin => RoleClass::Admin,
            Role::Agency => RoleClass::Agency,
            Role::Client => RoleClass::Client,
        }
    }
}

impl std::fmt::Display for RoleClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of an authenticated account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountIdentity {
    pub account_id: AccountId,
    pub primary_role: Role,
    /// Bound tenant, only meaningful for the client role
    pub tenant_id: Option<TenantId>,
    pub active: bool,
}

/// Identity of a magic-link token holder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenIdentity {
    pub token_id: Uuid,
    pub tenant_id: TenantId,
    pub expires_at: DateTime<Utc>,
    pub scopes: BTreeSet<String>,
    pub access_count: i64,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

impl TokenIdentity {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }
}

/// Resolved caller identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Identity {
    Account(AccountIdentity),
    Token(TokenIdentity),
}

impl Identity {
    pub fn role_class(&self) -> RoleClass {
        match self {
            Identity::Account(account) => account.primary_role.into(),
            Identity::Token(_) => RoleClass::Token,
        }
    }

    /// Stable actor label used in audit records, e.g. `account:12`
    pub fn actor(&self) -> String {
        match self {
            Identity::Account(account) => format!("account:{}", account.account_id),
            Identity::Token(token) => format!("token:{}", token.token_id),
        }
    }

    /// Tenant the identity is pinned to, if any
    pub fn bound_tenant(&self) -> Option<TenantId> {
        match self {
            Identity::Account(account) => account.tenant_id,
            Identity::Token(token) => Some(token.tenant_id),
        }
    }

    pub fn account_id(&self) -> Option<AccountId> {
        match self {
            Identity::Account(account) => Some(account.account_id),
            Identity::Token(_) => None,
        }
    }
}
