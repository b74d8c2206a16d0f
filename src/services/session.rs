//! Session tokens
//!
//! Sessions are short-lived HS256 JWTs carrying only the account id. The
//! account's role and tenant binding are always read fresh from the
//! directory when the session is resolved, so deactivation takes effect
//! immediately.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::models::AccountId;
use crate::services::identity::Credential;

/// Session JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Account id
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub nbf: i64,
    pub jti: String,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session has expired")]
    Expired,
    #[error("session is invalid")]
    Invalid,
    #[error("failed to sign session")]
    Signing,
}

impl SessionError {
    /// Reason code reported when the session is presented
    pub fn reason(&self) -> &'static str {
        match self {
            SessionError::Expired => "session_expired",
            SessionError::Invalid | SessionError::Signing => "invalid_session",
        }
    }
}

/// Signs and verifies session tokens
#[derive(Clone)]
pub struct SessionManager {
    secret: String,
    expiry: Duration,
    cookie_name: String,
}

impl SessionManager {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            secret: config.secret.clone(),
            expiry: Duration::hours(config.expiry_hours as i64),
            cookie_name: config.cookie_name.clone(),
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    /// Issue a session for `account_id`, returning the token and its expiry
    pub fn issue(&self, account_id: AccountId) -> Result<(String, DateTime<Utc>), SessionError> {
        self.issue_at(account_id, Utc::now())
    }

    pub fn issue_at(
        &self,
        account_id: AccountId,
        now: DateTime<Utc>,
    ) -> Result<(String, DateTime<Utc>), SessionError> {
        let expires_at = now + self.expiry;
        let claims = SessionClaims {
            sub: account_id.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            nbf: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|_| SessionError::Signing)?;

        Ok((token, expires_at))
    }

    /// Verify a session token and return the account it references
    pub fn verify(&self, token: &str) -> Result<AccountId, SessionError> {
        let mut validation = Validation::default();
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.leeway = 0;

        let data = decode::<SessionClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => SessionError::Expired,
            _ => SessionError::Invalid,
        })?;

        data.claims.sub.parse().map_err(|_| SessionError::Invalid)
    }

    /// Turn a presented session token into a request credential
    pub fn credential(&self, token: &str) -> Credential {
        match self.verify(token) {
            Ok(account_id) => Credential::Session(account_id),
            Err(e) => Credential::InvalidSession(e.reason()),
        }
    }
}

/// Whether a bearer value looks like a session JWT rather than a magic-link token
pub fn looks_like_session(value: &str) -> bool {
    value.split('.').count() == 3
}
