//! Wait durations as shown to callers: prose for the body, seconds for
//! `Retry-After`.

use std::time::Duration;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;

/// Human-readable wait, rounded up to minutes for sub-hour windows and to
/// hours otherwise.
pub fn describe_wait(retry_after: Duration, window: Duration) -> String {
    let (unit, label) = if window < Duration::from_secs(HOUR) {
        (MINUTE, "minute")
    } else {
        (HOUR, "hour")
    };

    let count = ceil_units(retry_after, unit).max(1);
    let plural = if count == 1 { "" } else { "s" };
    format!("{count} {label}{plural}")
}

/// Whole seconds, rounded up, for a `Retry-After` header.
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

fn ceil_units(duration: Duration, unit_secs: u64) -> u64 {
    retry_after_secs(duration).div_ceil(unit_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_windows_round_up_to_minutes() {
        let window = Duration::from_secs(300);
        assert_eq!(describe_wait(Duration::from_secs(61), window), "2 minutes");
        assert_eq!(describe_wait(Duration::from_secs(60), window), "1 minute");
        assert_eq!(describe_wait(Duration::from_millis(1), window), "1 minute");
    }

    #[test]
    fn long_windows_round_up_to_hours() {
        let window = Duration::from_secs(24 * HOUR);
        assert_eq!(describe_wait(Duration::from_secs(23 * HOUR), window), "23 hours");
        assert_eq!(
            describe_wait(Duration::from_secs(22 * HOUR + 1), window),
            "23 hours"
        );
        assert_eq!(describe_wait(Duration::from_secs(5), window), "1 hour");
    }

    #[test]
    fn header_seconds_round_up() {
        assert_eq!(retry_after_secs(Duration::from_millis(1500)), 2);
        assert_eq!(retry_after_secs(Duration::from_secs(3)), 3);
    }
}
