//! Retry policy: decides how long the relay loop idles after failures.

use std::time::Duration;

/// Backoff between unproductive relay iterations.
///
/// `none()` retries immediately, which is the plain "loop again" behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failure.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Retry right away, no sleeping.
    pub fn none() -> Self {
        Self {
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Calculate the delay after `failures` consecutive failures.
    ///
    /// delay = base_delay * multiplier^(failures - 1), capped at `max_delay`.
    /// Zero failures means no delay.
    ///
    /// Example with base_delay=500ms, multiplier=2.0, max_delay=30s:
    /// - failure 1: 500ms
    /// - failure 2: 1s
    /// - failure 3: 2s
    /// - failure 8 and later: 30s
    pub fn next_delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exponent = failures.saturating_sub(1).min(64) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(delay_secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn default_policy_has_reasonable_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert_eq!(policy.multiplier, 2.0);
        assert_eq!(policy.max_delay, Duration::from_secs(30));
    }

    #[rstest]
    #[case::no_failures(0, Duration::ZERO)]
    #[case::first(1, Duration::from_millis(500))]
    #[case::second(2, Duration::from_secs(1))]
    #[case::third(3, Duration::from_secs(2))]
    #[case::capped(8, Duration::from_secs(30))]
    #[case::huge(u32::MAX, Duration::from_secs(30))]
    fn exponential_backoff_is_capped(#[case] failures: u32, #[case] expected: Duration) {
        assert_eq!(RetryPolicy::default().next_delay(failures), expected);
    }

    #[test]
    fn none_never_sleeps() {
        let policy = RetryPolicy::none();
        assert_eq!(policy.next_delay(1), Duration::ZERO);
        assert_eq!(policy.next_delay(1000), Duration::ZERO);
    }
}
