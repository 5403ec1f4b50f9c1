//! Rate-limit identities, policies and decisions.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Smallest wait handed back on a rejection.
const MIN_RETRY_AFTER: Duration = Duration::from_millis(1);

/// Composite identity `action:caller` under which admissions are counted.
///
/// Distinct actions and distinct callers never share a budget.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    pub fn new(action: &str, caller_id: &str) -> Self {
        Self(format!("{action}:{caller_id}"))
    }

    /// Rebuild a key read back from a store.
    pub fn from_raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One accepted call against a rate-limited action. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionEvent {
    pub key: RateLimitKey,
    pub timestamp: DateTime<Utc>,
}

/// `limit` admissions per trailing `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    limit: u32,
    window: Duration,
}

impl WindowPolicy {
    /// Build a policy. The window must be non-zero; a zero limit is allowed and
    /// rejects every request.
    pub fn new(limit: u32, window: Duration) -> Result<Self, DomainError> {
        if window.is_zero() {
            return Err(DomainError::Validation(
                "rate limit window must be greater than zero".to_string(),
            ));
        }
        Ok(Self { limit, window })
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Start of the trailing window ending at `now` (inclusive).
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let span = TimeDelta::from_std(self.window).unwrap_or(TimeDelta::MAX);
        now.checked_sub_signed(span).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Whether `admitted` events inside the window leave no room for another.
    pub fn is_exhausted(&self, admitted: u64) -> bool {
        admitted >= u64::from(self.limit)
    }

    /// Time until the oldest in-window admission ages out.
    ///
    /// Falls back to the full window when the oldest event is unknown, which
    /// happens when a concurrent prune removed it between the count and the
    /// lookup. The result is always within `(0, window]`.
    pub fn retry_after(&self, oldest: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
        let Some(oldest) = oldest else {
            return self.window;
        };
        let elapsed = (now - oldest).to_std().unwrap_or(Duration::ZERO);
        self.window
            .saturating_sub(elapsed)
            .max(MIN_RETRY_AFTER.min(self.window))
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admitted,
    Rejected { retry_after: Duration },
}

impl Decision {
    /// Rejection for an exhausted window whose oldest event is `oldest`.
    pub fn rejected(policy: &WindowPolicy, oldest: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        Decision::Rejected {
            retry_after: policy.retry_after(oldest, now),
        }
    }

    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn key_joins_action_and_caller() {
        let key = RateLimitKey::new("parse", "user-1");
        assert_eq!(key.as_str(), "parse:user-1");
        assert_ne!(key, RateLimitKey::new("chat", "user-1"));
    }

    #[test]
    fn zero_window_is_rejected() {
        assert!(WindowPolicy::new(1, Duration::ZERO).is_err());
        assert!(WindowPolicy::new(0, Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn retry_after_counts_down_from_oldest() {
        let policy = WindowPolicy::new(1, Duration::from_secs(24 * 3600)).unwrap();
        let wait = policy.retry_after(Some(at(0)), at(3600));
        assert_eq!(wait, Duration::from_secs(23 * 3600));
    }

    #[test]
    fn retry_after_stays_positive_at_window_edge() {
        let policy = WindowPolicy::new(1, Duration::from_secs(60)).unwrap();
        let wait = policy.retry_after(Some(at(0)), at(60));
        assert!(wait > Duration::ZERO);
        assert!(wait <= policy.window());
    }

    #[test]
    fn missing_oldest_falls_back_to_full_window() {
        let policy = WindowPolicy::new(3, Duration::from_secs(300)).unwrap();
        assert_eq!(policy.retry_after(None, at(10)), Duration::from_secs(300));
    }

    #[test]
    fn window_start_is_inclusive_lower_bound() {
        let policy = WindowPolicy::new(1, Duration::from_secs(300)).unwrap();
        assert_eq!(policy.window_start(at(300)), at(0));
    }
}
