//! Retry policy: how many times a transient fetch failure is retried and how
//! long to wait in between.

use std::time::Duration;

/// Exponential backoff with a cap.
///
/// The delay before retry `n` (1-based) is `min(base_delay * 2^(n-1), max_delay)`.
/// A source therefore makes at most `max_retries + 1` attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based). Zero for `retry == 0`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let factor = 2u32.checked_pow(retry - 1).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32, base_ms: u64, cap_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(cap_ms),
        }
    }

    #[test]
    fn delay_doubles_per_retry() {
        let p = policy(4, 100, 10_000);
        assert_eq!(
            (1..=p.max_retries).map(|r| p.delay_for(r)).collect::<Vec<_>>(),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
            ]
        );
    }

    #[test]
    fn delay_is_capped() {
        let p = policy(6, 500, 3_000);
        assert_eq!(p.delay_for(3), Duration::from_millis(2_000));
        assert_eq!(p.delay_for(4), Duration::from_millis(3_000));
        assert_eq!(p.delay_for(6), Duration::from_millis(3_000));
    }

    #[test]
    fn huge_retry_numbers_do_not_overflow() {
        let p = policy(u32::MAX, 500, 3_000);
        assert_eq!(p.delay_for(64), Duration::from_millis(3_000));
        assert_eq!(p.delay_for(u32::MAX), Duration::from_millis(3_000));
        assert_eq!(p.max_attempts(), u32::MAX);
    }

    #[test]
    fn zero_retries_means_single_attempt() {
        let p = RetryPolicy::no_retries();
        assert_eq!(p.max_attempts(), 1);
        assert_eq!(p.delay_for(0), Duration::ZERO);
    }

    #[test]
    fn cap_applies_before_the_exponent_runs_away() {
        let p = policy(3, 100, 250);
        let total: Duration = (1..=p.max_retries).map(|r| p.delay_for(r)).sum();
        assert_eq!(total, Duration::from_millis(100 + 200 + 250));
    }
}
