//! Fixed-window rate limiter
//!
//! Attempts are counted per key inside a window that starts with the first
//! attempt and resets once it has elapsed. The bucket store performs the
//! read-modify-write atomically; the limiter only interprets the result.
//!
//! Thresholds are role-adjusted: the base limit and window of a route are
//! scaled by the caller's role class before the check.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::WindowLimit;
use crate::models::{Identity, RoleClass};
use crate::utils::StoreError;

/// State of one bucket after an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketSnapshot {
    pub attempt_count: u32,
    pub window_started_at: DateTime<Utc>,
    pub window: Duration,
}

impl BucketSnapshot {
    pub fn resets_at(&self) -> DateTime<Utc> {
        self.window_started_at + to_chrono(self.window)
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.resets_at()
    }
}

/// Counter store with atomic increment and expiry
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Count one attempt under `key`.
    ///
    /// Starts a fresh window of length `window` when the bucket is missing
    /// or its window has elapsed. Must be atomic per key.
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<BucketSnapshot, StoreError>;

    /// Current bucket, if one is live. Never mutates.
    async fn peek(&self, key: &str, now: DateTime<Utc>) -> Result<Option<BucketSnapshot>, StoreError>;

    async fn reset(&self, key: &str) -> Result<(), StoreError>;

    /// Drop expired buckets, returning how many were removed
    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// Process-local bucket store
#[derive(Default, Clone)]
pub struct InMemoryBucketStore {
    buckets: Arc<Mutex<HashMap<String, BucketSnapshot>>>,
}

impl InMemoryBucketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.buckets.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.buckets.lock().await.is_empty()
    }
}

#[async_trait]
impl BucketStore for InMemoryBucketStore {
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<BucketSnapshot, StoreError> {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(key.to_string())
            .and_modify(|b| {
                if b.is_expired(now) {
                    *b = BucketSnapshot {
                        attempt_count: 0,
                        window_started_at: now,
                        window,
                    };
                }
            })
            .or_insert(BucketSnapshot {
                attempt_count: 0,
                window_started_at: now,
                window,
            });
        bucket.attempt_count = bucket.attempt_count.saturating_add(1);
        Ok(*bucket)
    }

    async fn peek(&self, key: &str, now: DateTime<Utc>) -> Result<Option<BucketSnapshot>, StoreError> {
        let buckets = self.buckets.lock().await;
        Ok(buckets.get(key).filter(|b| !b.is_expired(now)).copied())
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        self.buckets.lock().await.remove(key);
        Ok(())
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();
        buckets.retain(|_, b| !b.is_expired(now));
        Ok(before - buckets.len())
    }
}

/// Limit and window after role adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EffectiveLimit {
    pub max_attempts: u32,
    #[serde(with = "duration_secs")]
    pub window: Duration,
}

impl EffectiveLimit {
    /// Limit used as-is, without role scaling
    pub fn unscaled(base: &WindowLimit) -> Self {
        Self {
            max_attempts: base.max_attempts,
            window: Duration::from_secs(base.window_secs),
        }
    }

    /// Apply the role multipliers to a base limit.
    ///
    /// | role                  | limit        | window |
    /// |-----------------------|--------------|--------|
    /// | admin                 | x3           | x0.5   |
    /// | agency                | x2           | x1     |
    /// | client                | x1           | x1     |
    /// | token / anonymous     | x0.5, min 1  | x1     |
    pub fn for_role(base: &WindowLimit, role: RoleClass) -> Self {
        let window_ms = base.window_secs.saturating_mul(1000);
        let (max_attempts, window_ms) = match role {
            RoleClass::Admin => (base.max_attempts.saturating_mul(3), window_ms / 2),
            RoleClass::Agency => (base.max_attempts.saturating_mul(2), window_ms),
            RoleClass::Client => (base.max_attempts, window_ms),
            RoleClass::Token | RoleClass::Anonymous => ((base.max_attempts / 2).max(1), window_ms),
        };
        Self {
            max_attempts,
            window: Duration::from_millis(window_ms.max(1)),
        }
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}

/// Result of a limiter check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed {
        limit: u32,
        remaining: u32,
        resets_at: DateTime<Utc>,
    },
    Throttled {
        limit: u32,
        retry_after_secs: u64,
        resets_at: DateTime<Utc>,
    },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed { .. })
    }

    pub fn limit(&self) -> u32 {
        match self {
            RateLimitDecision::Allowed { limit, .. } | RateLimitDecision::Throttled { limit, .. } => {
                *limit
            }
        }
    }

    pub fn remaining(&self) -> u32 {
        match self {
            RateLimitDecision::Allowed { remaining, .. } => *remaining,
            RateLimitDecision::Throttled { .. } => 0,
        }
    }

    pub fn resets_at(&self) -> DateTime<Utc> {
        match self {
            RateLimitDecision::Allowed { resets_at, .. }
            | RateLimitDecision::Throttled { resets_at, .. } => *resets_at,
        }
    }
}

/// Bucket key for general API traffic.
///
/// The most specific identity wins: account, then token, then the remote
/// address. Callers behind a shared address are judged on their own account.
pub fn api_key(identity: Option<&Identity>, remote: IpAddr) -> String {
    match identity {
        Some(Identity::Account(account)) => format!("api:account:{}", account.account_id),
        Some(Identity::Token(token)) => format!("api:token:{}", token.token_id),
        None => format!("api:ip:{}", remote),
    }
}

/// Bucket key for magic-link validation attempts
pub fn token_validation_key(remote: IpAddr, token_prefix: &str) -> String {
    format!("token_validation:{}|{}", remote, token_prefix)
}

/// Fixed-window limiter over an injected bucket store
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn BucketStore>,
    timeout: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn BucketStore>, store_timeout_ms: u64) -> Self {
        Self {
            store,
            timeout: Duration::from_millis(store_timeout_ms),
        }
    }

    /// Count an attempt and decide whether it is within the limit.
    ///
    /// A store failure or timeout allows the request.
    pub async fn check_and_increment(
        &self,
        key: &str,
        limit: EffectiveLimit,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let result = tokio::time::timeout(self.timeout, self.store.increment(key, limit.window, now))
            .await
            .unwrap_or(Err(StoreError::Timeout(self.timeout.as_millis() as u64)));

        let bucket = match result {
            Ok(bucket) => bucket,
            Err(e) => {
                warn!(key = %key, error = %e, "Rate limit store unavailable, allowing request");
                return RateLimitDecision::Allowed {
                    limit: limit.max_attempts,
                    remaining: limit.max_attempts,
                    resets_at: now + to_chrono(limit.window),
                };
            }
        };

        if bucket.attempt_count <= limit.max_attempts {
            debug!(key = %key, count = bucket.attempt_count, limit = limit.max_attempts, "Rate limit check passed");
            RateLimitDecision::Allowed {
                limit: limit.max_attempts,
                remaining: limit.max_attempts - bucket.attempt_count,
                resets_at: bucket.resets_at(),
            }
        } else {
            RateLimitDecision::Throttled {
                limit: limit.max_attempts,
                retry_after_secs: retry_after(&bucket, now),
                resets_at: bucket.resets_at(),
            }
        }
    }

    /// Attempts left in the current window without counting one
    pub async fn remaining(&self, key: &str, limit: EffectiveLimit, now: DateTime<Utc>) -> u32 {
        match tokio::time::timeout(self.timeout, self.store.peek(key, now)).await {
            Ok(Ok(Some(bucket))) => limit.max_attempts.saturating_sub(bucket.attempt_count),
            Ok(Ok(None)) => limit.max_attempts,
            Ok(Err(e)) => {
                debug!(key = %key, error = %e, "Rate limit store unavailable on peek");
                limit.max_attempts
            }
            Err(_) => limit.max_attempts,
        }
    }

    /// Forget all attempts under `key`
    pub async fn reset(&self, key: &str) {
        let result = tokio::time::timeout(self.timeout, self.store.reset(key))
            .await
            .unwrap_or(Err(StoreError::Timeout(self.timeout.as_millis() as u64)));
        if let Err(e) = result {
            warn!(key = %key, error = %e, "Failed to reset rate limit bucket");
        }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        self.store.sweep(now).await
    }
}

/// Seconds until the bucket's window ends, clamped to `0..=window`
fn retry_after(bucket: &BucketSnapshot, now: DateTime<Utc>) -> u64 {
    let remaining_ms = (bucket.resets_at() - now).num_milliseconds().max(0) as u64;
    let window_secs = bucket.window.as_secs().max(1);
    remaining_ms.div_ceil(1000).min(window_secs)
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}
