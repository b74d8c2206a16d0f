//! Authentication service
//!
//! Password hashing with Argon2, account creation and session login.

use std::net::IpAddr;

use anyhow::Result;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use serde_json::json;
use sqlx::SqlitePool;
use tracing::info;
use validator::Validate;

use crate::db::{AccountRepository, TenantRepository};
use crate::models::{
    events, Account, AuditEventDraft, CreateAccountRequest, LoginRequest, LoginResponse, Role,
};
use crate::services::audit::AuditRecorder;
use crate::services::session::SessionManager;
use crate::utils::{AppError, AppResult};

/// Authentication service for account management
#[derive(Clone)]
pub struct AuthService {
    pool: SqlitePool,
    sessions: SessionManager,
    audit: AuditRecorder,
}

impl AuthService {
    pub fn new(pool: SqlitePool, sessions: SessionManager, audit: AuditRecorder) -> Self {
        Self {
            pool,
            sessions,
            audit,
        }
    }

    /// Hash a password using Argon2id
    pub fn hash_password(password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();
        let password_hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
            .to_string();
        Ok(password_hash)
    }

    /// Verify a password against a hash
    pub fn verify_password(password: &str, password_hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(password_hash)
            .map_err(|e| anyhow::anyhow!("Invalid password hash format: {}", e))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }

    /// Create an account.
    ///
    /// Client accounts must be bound to an existing tenant; admin and agency
    /// accounts must not be.
    pub async fn create_account(&self, req: &CreateAccountRequest) -> AppResult<Account> {
        req.validate()?;

        match (req.primary_role, req.tenant_id) {
            (Role::Client, None) => {
                return Err(AppError::ValidationError(
                    "Client accounts must be bound to a tenant".to_string(),
                ))
            }
            (Role::Client, Some(tenant_id)) => {
                if TenantRepository::new(&self.pool)
                    .get_by_id(tenant_id)
                    .await?
                    .is_none()
                {
                    return Err(AppError::ValidationError(format!(
                        "Tenant {} does not exist",
                        tenant_id
                    )));
                }
            }
            (_, Some(_)) => {
                return Err(AppError::ValidationError(
                    "Only client accounts can be bound to a tenant".to_string(),
                ))
            }
            (_, None) => {}
        }

        let repo = AccountRepository::new(&self.pool);
        if repo.get_by_email(&req.email).await?.is_some() {
            return Err(AppError::Conflict("Email already exists".to_string()));
        }

        let password_hash = Self::hash_password(&req.password)?;
        let account = repo.create(req, &password_hash).await?;

        info!(account_id = account.id, role = %account.primary_role, "Account created");
        Ok(account)
    }

    /// Create an admin account from the command line
    pub async fn create_admin(&self, email: &str, name: &str, password: &str) -> AppResult<Account> {
        self.create_account(&CreateAccountRequest {
            email: email.to_string(),
            name: name.to_string(),
            password: password.to_string(),
            primary_role: Role::Admin,
            tenant_id: None,
        })
        .await
    }

    /// Check credentials and issue a session.
    ///
    /// Unknown emails, wrong passwords and inactive accounts are reported
    /// with the same message.
    pub async fn login(&self, req: &LoginRequest, remote_addr: IpAddr) -> AppResult<LoginResponse> {
        req.validate()?;

        let account = AccountRepository::new(&self.pool)
            .get_by_email(&req.email)
            .await?;

        let failure = match &account {
            None => Some("unknown_email"),
            Some(account) if !Self::verify_password(&req.password, &account.password_hash)? => {
                Some("wrong_password")
            }
            Some(account) if !account.active => Some("account_inactive"),
            Some(_) => None,
        };

        let details = json!({ "remote_addr": remote_addr.to_string() });

        match (failure, account) {
            (None, Some(account)) => {
                let (session_token, expires_at) = self
                    .sessions
                    .issue(account.id)
                    .map_err(|e| AppError::internal(e.to_string()))?;

                self.audit
                    .append(
                        AuditEventDraft::new(events::LOGIN_SUCCEEDED)
                            .actor(format!("account:{}", account.id))
                            .tenant(account.tenant_id)
                            .tag(format!("role:{}", account.primary_role))
                            .details(details),
                    )
                    .await;

                Ok(LoginResponse {
                    session_token,
                    expires_at,
                    account,
                })
            }
            (reason, account) => {
                self.audit
                    .append(
                        AuditEventDraft::new(events::LOGIN_FAILED)
                            .maybe_actor(account.as_ref().map(|a| format!("account:{}", a.id)))
                            .reason(reason.unwrap_or("unknown_email"))
                            .details(details),
                    )
                    .await;

                Err(AppError::unauthorized("Invalid email or password"))
            }
        }
    }
}
