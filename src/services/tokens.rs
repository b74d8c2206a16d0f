//! Magic-link token management
//!
//! Minting, revocation, regeneration and purge of access tokens. Every
//! state change records an audit event carrying the record before and after
//! the change.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::config::TokenSettings;
use crate::db::access_token_repository::NewAccessToken;
use crate::db::{AccessTokenRepository, TenantRepository};
use crate::models::{
    events, generate_token, hash_token, normalize_scopes, token_prefix, AccessToken, AccountId,
    AuditEventDraft, CreateAccessTokenRequest, IssuedAccessToken, TenantId,
};
use crate::services::audit::AuditRecorder;
use crate::utils::{AppError, AppResult};

#[derive(Clone)]
pub struct TokenService {
    pool: SqlitePool,
    audit: AuditRecorder,
    settings: TokenSettings,
}

impl TokenService {
    pub fn new(pool: SqlitePool, audit: AuditRecorder, settings: TokenSettings) -> Self {
        Self {
            pool,
            audit,
            settings,
        }
    }

    fn lifetime(&self, requested_hours: Option<u64>) -> AppResult<Duration> {
        let hours = requested_hours.unwrap_or(self.settings.default_ttl_hours);
        if hours == 0 || hours > self.settings.max_ttl_hours {
            return Err(AppError::ValidationError(format!(
                "Token lifetime must be between 1 and {} hours",
                self.settings.max_ttl_hours
            )));
        }
        Ok(Duration::hours(hours as i64))
    }

    /// Mint a token for `tenant_id`. The raw token is only ever returned here.
    pub async fn create(
        &self,
        tenant_id: TenantId,
        req: &CreateAccessTokenRequest,
        created_by: AccountId,
    ) -> AppResult<IssuedAccessToken> {
        req.validate()?;
        let lifetime = self.lifetime(req.expires_in_hours)?;
        let scopes = normalize_scopes(req.scopes.as_deref()).map_err(AppError::ValidationError)?;

        if TenantRepository::new(&self.pool)
            .get_by_id(tenant_id)
            .await?
            .is_none()
        {
            return Err(AppError::not_found(format!("Tenant {} not found", tenant_id)));
        }

        let token = generate_token();
        let record = AccessTokenRepository::new(&self.pool)
            .insert(&NewAccessToken {
                tenant_id,
                token_hash: &hash_token(&token),
                token_prefix: &token_prefix(&token),
                scopes: &scopes,
                created_by: Some(created_by),
                expires_at: Utc::now() + lifetime,
            })
            .await?;

        info!(tenant_id, token_id = %record.id, "Access token created");
        self.audit
            .append(
                AuditEventDraft::new(events::TOKEN_CREATED)
                    .actor(format!("account:{}", created_by))
                    .tenant(Some(tenant_id))
                    .target("access_token", record.id)
                    .after(json!(record)),
            )
            .await;

        Ok(IssuedAccessToken { record, token })
    }

    pub async fn list(&self, tenant_id: TenantId) -> AppResult<Vec<AccessToken>> {
        Ok(AccessTokenRepository::new(&self.pool)
            .list_for_tenant(tenant_id)
            .await?)
    }

    pub async fn get(&self, tenant_id: TenantId, id: Uuid) -> AppResult<AccessToken> {
        AccessTokenRepository::new(&self.pool)
            .get(tenant_id, id)
            .await?
            .ok_or_else(|| AppError::not_found("Access token not found"))
    }

    /// Permanently deactivate a token
    pub async fn revoke(
        &self,
        tenant_id: TenantId,
        id: Uuid,
        revoked_by: AccountId,
    ) -> AppResult<AccessToken> {
        let before = self.get(tenant_id, id).await?;
        let after = AccessTokenRepository::new(&self.pool)
            .revoke(tenant_id, id, Utc::now())
            .await?
            .ok_or_else(|| AppError::Conflict("Access token is already revoked".to_string()))?;

        info!(tenant_id, token_id = %id, "Access token revoked");
        self.audit
            .append(
                AuditEventDraft::new(events::TOKEN_REVOKED)
                    .actor(format!("account:{}", revoked_by))
                    .tenant(Some(tenant_id))
                    .target("access_token", id)
                    .before(json!(before))
                    .after(json!(after)),
            )
            .await;

        Ok(after)
    }

    /// Revoke a token and mint a replacement with the same scopes.
    ///
    /// Without an explicit lifetime the replacement inherits the old
    /// token's expiry, or the default lifetime if the old one has lapsed.
    pub async fn regenerate(
        &self,
        tenant_id: TenantId,
        id: Uuid,
        expires_in_hours: Option<u64>,
        regenerated_by: AccountId,
    ) -> AppResult<IssuedAccessToken> {
        let now = Utc::now();
        let current = self.get(tenant_id, id).await?;
        let expires_at = match expires_in_hours {
            Some(hours) => now + self.lifetime(Some(hours))?,
            None if current.expires_at > now => current.expires_at,
            None => now + self.lifetime(None)?,
        };
        let token = generate_token();

        let (old, record) = AccessTokenRepository::new(&self.pool)
            .replace(
                tenant_id,
                id,
                &hash_token(&token),
                &token_prefix(&token),
                expires_at,
                Some(regenerated_by),
                now,
            )
            .await?
            .ok_or_else(|| AppError::not_found("Active access token not found"))?;

        info!(tenant_id, old_token_id = %old.id, token_id = %record.id, "Access token regenerated");
        self.audit
            .append(
                AuditEventDraft::new(events::TOKEN_REGENERATED)
                    .actor(format!("account:{}", regenerated_by))
                    .tenant(Some(tenant_id))
                    .target("access_token", id)
                    .before(json!(old))
                    .after(json!(record)),
            )
            .await;

        Ok(IssuedAccessToken { record, token })
    }

    /// Delete tokens that expired or were revoked more than the configured
    /// number of days before `now`
    pub async fn purge(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let cutoff = now - Duration::days(i64::from(self.settings.purge_after_days));
        let removed = AccessTokenRepository::new(&self.pool).purge(cutoff).await?;

        if removed > 0 {
            info!(removed, "Purged stale access tokens");
            self.audit
                .append(
                    AuditEventDraft::new(events::TOKENS_PURGED)
                        .actor("system:maintenance")
                        .details(json!({ "removed": removed, "cutoff": cutoff }))
                        .occurred_at(now),
                )
                .await;
        }

        Ok(removed)
    }
}
