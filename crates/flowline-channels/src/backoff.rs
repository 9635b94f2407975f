//! Retry backoff policy.

use std::time::Duration;

use flowline_types::error::BackoffClass;

const BACKOFF_FAST_BASE_MS: u64 = 100;
const BACKOFF_NORMAL_BASE_MS: u64 = 1_000;
const BACKOFF_SLOW_BASE_MS: u64 = 5_000;
const BACKOFF_MAX_MS: u64 = 60_000;

/// Compute an exponential retry delay for the given class and attempt
/// number (1-based), capped at 60 s.
#[must_use]
pub fn compute_backoff(class: BackoffClass, attempt: u32) -> Duration {
    let base_ms: u64 = match class {
        BackoffClass::Fast => BACKOFF_FAST_BASE_MS,
        BackoffClass::Normal => BACKOFF_NORMAL_BASE_MS,
        BackoffClass::Slow => BACKOFF_SLOW_BASE_MS,
    };
    let delay_ms = base_ms.saturating_mul(
        2u64.checked_pow(attempt.saturating_sub(1)).unwrap_or(u64::MAX),
    );
    Duration::from_millis(delay_ms.min(BACKOFF_MAX_MS))
}

/// Backoff for cooperative poll loops: fast class, capped at 250 ms so
/// cancellation and timeouts are observed promptly.
#[must_use]
pub fn poll_backoff(attempt: u32) -> Duration {
    compute_backoff(BackoffClass::Fast, attempt).min(Duration::from_millis(250))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_backoff_doubles() {
        assert_eq!(compute_backoff(BackoffClass::Fast, 1), Duration::from_millis(100));
        assert_eq!(compute_backoff(BackoffClass::Fast, 2), Duration::from_millis(200));
        assert_eq!(compute_backoff(BackoffClass::Fast, 3), Duration::from_millis(400));
    }

    #[test]
    fn normal_and_slow_bases() {
        assert_eq!(compute_backoff(BackoffClass::Normal, 1), Duration::from_millis(1_000));
        assert_eq!(compute_backoff(BackoffClass::Slow, 2), Duration::from_millis(10_000));
    }

    #[test]
    fn capped_at_sixty_seconds() {
        assert_eq!(compute_backoff(BackoffClass::Normal, 20), Duration::from_millis(60_000));
        assert_eq!(compute_backoff(BackoffClass::Slow, 63), Duration::from_millis(60_000));
    }

    #[test]
    fn poll_backoff_is_bounded() {
        assert_eq!(poll_backoff(1), Duration::from_millis(100));
        assert_eq!(poll_backoff(2), Duration::from_millis(200));
        assert_eq!(poll_backoff(3), Duration::from_millis(250));
        assert_eq!(poll_backoff(30), Duration::from_millis(250));
    }
}
