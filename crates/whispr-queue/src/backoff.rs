use chrono::{DateTime, Duration, Utc};

use crate::types::Backoff;

/// Upper bound on the doubling exponent so large attempt counts cannot overflow.
const MAX_EXPONENT: u32 = 20;

/// Delay before the next attempt, given how many attempts have already failed.
///
/// `failed_attempts` is 1 after the first failure, so an exponential backoff
/// with a 2 s base yields 2 s, 4 s, 8 s, …
pub fn retry_delay(backoff: &Backoff, failed_attempts: u32) -> Duration {
    match backoff {
        Backoff::Fixed { delay_ms } => millis(*delay_ms),
        Backoff::Exponential { base_ms } => {
            let exponent = failed_attempts.saturating_sub(1).min(MAX_EXPONENT);
            millis(base_ms.saturating_mul(1u64 << exponent))
        }
    }
}

/// Instant at which a job that failed at `from` becomes eligible again.
pub fn retry_at(backoff: &Backoff, failed_attempts: u32, from: DateTime<Utc>) -> DateTime<Utc> {
    from + retry_delay(backoff, failed_attempts)
}

fn millis(ms: u64) -> Duration {
    Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX / 1_000_000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn exponential_doubles_from_base() {
        let backoff = Backoff::Exponential { base_ms: 2_000 };
        assert_eq!(retry_delay(&backoff, 1), Duration::seconds(2));
        assert_eq!(retry_delay(&backoff, 2), Duration::seconds(4));
        assert_eq!(retry_delay(&backoff, 3), Duration::seconds(8));
    }

    #[test]
    fn fixed_ignores_attempt_count() {
        let backoff = Backoff::Fixed { delay_ms: 500 };
        assert_eq!(retry_delay(&backoff, 1), retry_delay(&backoff, 9));
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let backoff = Backoff::Exponential { base_ms: 2_000 };
        assert!(retry_delay(&backoff, u32::MAX) > Duration::zero());
    }

    #[test]
    fn retry_at_is_relative_to_failure_time() {
        let from = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let backoff = Backoff::Exponential { base_ms: 2_000 };
        assert_eq!(retry_at(&backoff, 2, from), from + Duration::seconds(4));
    }
}
