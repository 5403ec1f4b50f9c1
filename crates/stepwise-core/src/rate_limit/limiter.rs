//! Sliding-window admission over a [`WindowStore`].

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::{Decision, RateLimitKey, WindowPolicy};
use crate::ports::{Clock, Incident, IncidentReporter, LogIncidents, SystemClock, WindowStore};

/// Sliding-window (log variant) rate limiter.
///
/// Counts admission events inside the trailing window instead of fixed
/// buckets, so a burst straddling a bucket boundary cannot double the limit.
/// Checks for the same key are serialized in-process; stores that can make the
/// conditional insert atomic on their side extend that guarantee across
/// instances.
///
/// Storage failures fail open: the request is admitted and the failure is
/// reported as an [`Incident::StorageUnavailable`].
pub struct SlidingWindowLimiter {
    store: Arc<dyn WindowStore>,
    clock: Arc<dyn Clock>,
    incidents: Arc<dyn IncidentReporter>,
    locks: KeyedLocks,
}

impl SlidingWindowLimiter {
    pub fn new(store: Arc<dyn WindowStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            incidents: Arc::new(LogIncidents),
            locks: KeyedLocks::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_incidents(mut self, incidents: Arc<dyn IncidentReporter>) -> Self {
        self.incidents = incidents;
        self
    }

    pub fn store(&self) -> &Arc<dyn WindowStore> {
        &self.store
    }

    /// Decide whether one more request under `key` fits `policy`, recording it
    /// if it does.
    pub async fn check(&self, key: &RateLimitKey, policy: &WindowPolicy) -> Decision {
        if policy.limit() == 0 {
            return Decision::Rejected {
                retry_after: policy.window(),
            };
        }

        let _guard = self.locks.acquire(key.as_str()).await;
        let now = self.clock.now();

        match self.store.check_and_record(key, policy, now).await {
            Ok(decision) => {
                tracing::debug!(key = %key, ?decision, "Rate limit checked");
                decision
            }
            Err(e) => {
                self.incidents.report(Incident::StorageUnavailable {
                    key: key.to_string(),
                    error: e.to_string(),
                });
                Decision::Admitted
            }
        }
    }
}

/// One async mutex per key, created on demand and dropped when unused.
#[derive(Default)]
struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    async fn acquire(&self, key: &str) -> KeyGuard<'_> {
        let lock = self.locks.entry(key.to_string()).or_default().clone();
        // Built before waiting so a cancelled wait still cleans up the entry.
        let mut held = KeyGuard {
            locks: self,
            key: key.to_string(),
            guard: None,
        };
        held.guard = Some(lock.lock_owned().await);
        held
    }
}

struct KeyGuard<'a> {
    locks: &'a KeyedLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        // Release before checking the count so our own Arc is gone.
        self.guard.take();
        self.locks
            .locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
