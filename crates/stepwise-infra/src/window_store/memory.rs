//! In-memory window store - used when no shared backend is configured.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use stepwise_core::domain::{Decision, RateLimitKey, WindowPolicy};
use stepwise_core::ports::{WindowStore, WindowStoreError};

/// Per-key event logs kept sorted by timestamp.
///
/// Limits are per-process, not shared across instances, and are lost on
/// restart.
#[derive(Default)]
pub struct InMemoryWindowStore {
    events: RwLock<HashMap<String, Vec<DateTime<Utc>>>>,
}

impl InMemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently holding events.
    pub async fn key_count(&self) -> usize {
        self.events.read().await.len()
    }
}

fn first_at_or_after(log: &[DateTime<Utc>], since: DateTime<Utc>) -> usize {
    log.partition_point(|at| *at < since)
}

#[async_trait]
impl WindowStore for InMemoryWindowStore {
    async fn count(&self, key: &RateLimitKey, since: DateTime<Utc>) -> Result<u64, WindowStoreError> {
        let events = self.events.read().await;
        Ok(events.get(key.as_str()).map_or(0, |log| {
            (log.len() - first_at_or_after(log, since)) as u64
        }))
    }

    async fn oldest(
        &self,
        key: &RateLimitKey,
        since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, WindowStoreError> {
        let events = self.events.read().await;
        Ok(events
            .get(key.as_str())
            .and_then(|log| log.get(first_at_or_after(log, since)).copied()))
    }

    async fn record(&self, key: &RateLimitKey, at: DateTime<Utc>) -> Result<(), WindowStoreError> {
        let mut events = self.events.write().await;
        let log = events.entry(key.as_str().to_string()).or_default();
        let pos = log.partition_point(|t| *t <= at);
        log.insert(pos, at);
        Ok(())
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<u64, WindowStoreError> {
        let mut events = self.events.write().await;
        let mut removed = 0u64;
        events.retain(|_, log| {
            let stale = first_at_or_after(log, before);
            log.drain(..stale);
            removed += stale as u64;
            !log.is_empty()
        });
        Ok(removed)
    }

    async fn check_and_record(
        &self,
        key: &RateLimitKey,
        policy: &WindowPolicy,
        now: DateTime<Utc>,
    ) -> Result<Decision, WindowStoreError> {
        let since = policy.window_start(now);
        let mut events = self.events.write().await;
        let log = events.entry(key.as_str().to_string()).or_default();

        // Lazily drop what can never count again for this key.
        let stale = first_at_or_after(log, since);
        log.drain(..stale);

        if policy.is_exhausted(log.len() as u64) {
            return Ok(Decision::rejected(policy, log.first().copied(), now));
        }

        let pos = log.partition_point(|t| *t <= now);
        log.insert(pos, now);
        Ok(Decision::Admitted)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeDelta;

    use super::*;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn counts_and_oldest_respect_since() {
        let store = InMemoryWindowStore::new();
        let key = RateLimitKey::new("chat", "u1");

        for secs in [30, 10, 20] {
            store.record(&key, t(secs)).await.unwrap();
        }

        assert_eq!(store.count(&key, t(0)).await.unwrap(), 3);
        assert_eq!(store.count(&key, t(20)).await.unwrap(), 2);
        assert_eq!(store.oldest(&key, t(15)).await.unwrap(), Some(t(20)));
        assert_eq!(store.oldest(&key, t(31)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn event_on_window_boundary_still_counts() {
        let store = InMemoryWindowStore::new();
        let key = RateLimitKey::new("parse", "u1");
        let policy = WindowPolicy::new(1, Duration::from_secs(60)).unwrap();

        assert!(store.check_and_record(&key, &policy, t(0)).await.unwrap().is_admitted());
        assert_eq!(
            store.check_and_record(&key, &policy, t(60)).await.unwrap(),
            Decision::Rejected {
                retry_after: Duration::from_millis(1)
            }
        );
        assert!(
            store
                .check_and_record(&key, &policy, t(60) + TimeDelta::milliseconds(1))
                .await
                .unwrap()
                .is_admitted()
        );
    }

    #[tokio::test]
    async fn prune_drops_old_events_and_empty_keys() {
        let store = InMemoryWindowStore::new();
        let a = RateLimitKey::new("chat", "a");
        let b = RateLimitKey::new("chat", "b");

        store.record(&a, t(0)).await.unwrap();
        store.record(&a, t(100)).await.unwrap();
        store.record(&b, t(5)).await.unwrap();

        assert_eq!(store.prune(t(50)).await.unwrap(), 2);
        assert_eq!(store.key_count().await, 1);
        assert_eq!(store.count(&a, t(0)).await.unwrap(), 1);
    }
}
