//! Directory lookups for the guard chain
//!
//! Adapts the account, team, tenant and token repositories to the narrow
//! store traits the identity and tenant access resolvers depend on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::{AccessTokenRepository, AccountRepository, TenantRepository};
use crate::models::{AccountId, AccountIdentity, TeamId, TenantId, TokenIdentity};
use crate::services::identity::IdentityStore;
use crate::services::tenant_access::MembershipStore;
use crate::utils::StoreError;

#[derive(Clone)]
pub struct SqliteDirectory {
    pool: SqlitePool,
}

impl SqliteDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityStore for SqliteDirectory {
    async fn find_account(&self, id: AccountId) -> Result<Option<AccountIdentity>, StoreError> {
        Ok(AccountRepository::new(&self.pool).get_identity(id).await?)
    }

    async fn consume_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<TokenIdentity>, StoreError> {
        let token = AccessTokenRepository::new(&self.pool)
            .consume(token_hash, now)
            .await?;
        Ok(token.map(|t| t.identity()))
    }
}

#[async_trait]
impl MembershipStore for SqliteDirectory {
    async fn tenant_team(&self, tenant_id: TenantId) -> Result<Option<TeamId>, StoreError> {
        Ok(TenantRepository::new(&self.pool)
            .team_of(tenant_id)
            .await?
            .flatten())
    }

    async fn account_teams(&self, account_id: AccountId) -> Result<Vec<TeamId>, StoreError> {
        Ok(AccountRepository::new(&self.pool).team_ids(account_id).await?)
    }
}
