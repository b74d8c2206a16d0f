//! Magic-link access token models

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;
use validator::Validate;

use super::{AccountId, TenantId, TokenIdentity};

/// Length of a freshly minted token
pub const TOKEN_LENGTH: usize = 64;

/// Number of leading characters kept in clear for display and throttling
pub const TOKEN_PREFIX_LENGTH: usize = 8;

/// Scopes a token may carry
pub const KNOWN_SCOPES: [&str; 3] = ["view", "comment", "approve"];

/// Stored access token record.
///
/// The raw token is never persisted; only its SHA-256 digest is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub id: Uuid,
    pub tenant_id: TenantId,
    /// First characters of the raw token
    pub token_prefix: String,
    pub scopes: BTreeSet<String>,
    pub created_by: Option<AccountId>,
    pub is_active: bool,
    pub expires_at: DateTime<Utc>,
    pub access_count: i64,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    /// Record minted when this one was regenerated
    pub replaced_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether the token would pass validation at `now`
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.revoked_at.is_none() && !self.is_expired(now)
    }

    pub fn identity(&self) -> TokenIdentity {
        TokenIdentity {
            token_id: self.id,
            tenant_id: self.tenant_id,
            expires_at: self.expires_at,
            scopes: self.scopes.clone(),
            access_count: self.access_count,
            last_accessed_at: self.last_accessed_at,
        }
    }
}

/// Request body for minting a token
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct CreateAccessTokenRequest {
    /// Lifetime in hours; the configured default applies when absent
    #[validate(range(min = 1, max = 8760))]
    pub expires_in_hours: Option<u64>,
    /// Scopes granted to the holder; all known scopes when absent
    pub scopes: Option<Vec<String>>,
}

/// Freshly minted token: the only time the raw value is exposed
#[derive(Debug, Clone, Serialize)]
pub struct IssuedAccessToken {
    #[serde(flatten)]
    pub record: AccessToken,
    pub token: String,
}

/// Generate a new raw token from the OS random source
pub fn generate_token() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Hex-encoded SHA-256 digest used as the lookup key
pub fn hash_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Leading characters of a presented token (may be shorter than the prefix length)
pub fn token_prefix(raw: &str) -> String {
    raw.chars().take(TOKEN_PREFIX_LENGTH).collect()
}

/// Normalize and check requested scopes against the known set
pub fn normalize_scopes(requested: Option<&[String]>) -> Result<BTreeSet<String>, String> {
    let Some(requested) = requested else {
        return Ok(KNOWN_SCOPES.iter().map(|s| s.to_string()).collect());
    };

    let mut scopes = BTreeSet::new();
    for scope in requested {
        let scope = scope.trim().to_lowercase();
        if !KNOWN_SCOPES.contains(&scope.as_str()) {
            return Err(format!("Unknown scope: {}", scope));
        }
        scopes.insert(scope);
    }

    if scopes.is_empty() {
        return Err("At least one scope is required".to_string());
    }
    Ok(scopes)
}
