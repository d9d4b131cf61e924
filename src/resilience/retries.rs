//! Retry policy for registry operations.
//!
//! # Responsibilities
//! - Turn the registry's `retry_interval_ms` / `max_retries` into delays
//! - Bound the number of attempts for connects and in-flight requests
//!
//! # Design Decisions
//! - `max_retries` counts extra attempts: 0 means one try only
//! - Delays grow exponentially from the retry interval and are capped, so a
//!   long outage settles into a steady probe rate

use std::time::Duration;

use crate::resilience::backoff::calculate_backoff;

/// Upper bound for a single backoff delay.
const MAX_DELAY_MS: u64 = 30_000;

/// Exponential retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Extra attempts after the first one.
    pub max_retries: u32,
    /// Cap for any single delay.
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(base_delay_ms: u64, max_retries: u32) -> Self {
        let max_delay_ms = base_delay_ms
            .saturating_mul(2u64.saturating_pow(max_retries.min(16)))
            .clamp(base_delay_ms, MAX_DELAY_MS.max(base_delay_ms));
        Self {
            base_delay_ms,
            max_retries,
            max_delay_ms,
        }
    }

    /// Total attempts including the first.
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay to wait before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        calculate_backoff(retry, self.base_delay_ms, self.max_delay_ms)
    }

    /// Steady interval used once the retry budget is exhausted.
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempts() {
        assert_eq!(RetryPolicy::new(100, 0).attempts(), 1);
        assert_eq!(RetryPolicy::new(100, 3).attempts(), 4);
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::new(1000, 3);
        assert_eq!(policy.max_delay_ms, 8000);
        assert!(policy.delay(10).as_millis() < 8800);

        let policy = RetryPolicy::new(1000, 40);
        assert_eq!(policy.max_delay_ms, 30_000);
    }

    #[test]
    fn test_zero_interval() {
        let policy = RetryPolicy::new(0, 3);
        assert_eq!(policy.delay(2), Duration::ZERO);
        assert_eq!(policy.probe_interval(), Duration::from_millis(1));
    }
}
