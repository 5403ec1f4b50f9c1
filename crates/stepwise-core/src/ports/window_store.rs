//! Window store port - the admission event log behind the rate limiter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Decision, RateLimitKey, WindowPolicy};

/// Durable, append-only log of admission events queryable by key and time.
///
/// Implementations: in-memory map (per process), Redis sorted sets and a
/// PostgreSQL table (shared across instances).
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Number of events for `key` with timestamp >= `since`.
    async fn count(&self, key: &RateLimitKey, since: DateTime<Utc>)
    -> Result<u64, WindowStoreError>;

    /// Earliest event timestamp for `key` that is >= `since`.
    async fn oldest(
        &self,
        key: &RateLimitKey,
        since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, WindowStoreError>;

    /// Append one event.
    async fn record(&self, key: &RateLimitKey, at: DateTime<Utc>) -> Result<(), WindowStoreError>;

    /// Drop every event older than `before`. Returns how many were removed.
    async fn prune(&self, before: DateTime<Utc>) -> Result<u64, WindowStoreError>;

    /// Count the window and record `now` if there is room.
    ///
    /// The default composes `count`, `oldest` and `record` and is only atomic
    /// when the caller serializes calls per key. Backends that can do the
    /// conditional insert in one step override this, and backends with their
    /// own clock use it instead of `now`.
    async fn check_and_record(
        &self,
        key: &RateLimitKey,
        policy: &WindowPolicy,
        now: DateTime<Utc>,
    ) -> Result<Decision, WindowStoreError> {
        let since = policy.window_start(now);
        let admitted = self.count(key, since).await?;

        if policy.is_exhausted(admitted) {
            let oldest = self.oldest(key, since).await?;
            return Ok(Decision::rejected(policy, oldest, now));
        }

        self.record(key, now).await?;
        Ok(Decision::Admitted)
    }
}

/// Window store errors.
#[derive(Debug, thiserror::Error)]
pub enum WindowStoreError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage returned invalid data: {0}")]
    Corrupt(String),
}
