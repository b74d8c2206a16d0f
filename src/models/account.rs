//! Account and team models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{AccountId, AccountIdentity, Role, TeamId, TenantId};

/// Account entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub primary_role: Role,
    /// Bound tenant for client accounts
    pub tenant_id: Option<TenantId>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn identity(&self) -> AccountIdentity {
        AccountIdentity {
            account_id: self.id,
            primary_role: self.primary_role,
            tenant_id: self.tenant_id,
            active: self.active,
        }
    }
}

/// A team groups the tenants an agency account may reach
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Request to create an account
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateAccountRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(min = 8))]
    pub password: String,
    pub primary_role: Role,
    pub tenant_id: Option<TenantId>,
}

/// Login request body
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

/// Login response body
#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
    pub account: Account,
}
