//! Exponential backoff with jitter for registry reconnects.

use std::time::Duration;

use rand::Rng;

/// Jitter adds up to `delay / JITTER_DIVISOR`.
const JITTER_DIVISOR: u64 = 10;

/// Delay before retry number `retry`.
///
/// Retry `0` never waits; retry `n` waits `base_ms * 2^(n-1)` capped at
/// `max_ms`, plus up to 10% jitter so reconnecting clients spread out.
pub fn calculate_backoff(retry: u32, base_ms: u64, max_ms: u64) -> Duration {
    let Some(exponent) = retry.checked_sub(1) else {
        return Duration::ZERO;
    };

    let delay_ms = 1u64
        .checked_shl(exponent)
        .map_or(u64::MAX, |factor| base_ms.saturating_mul(factor))
        .min(max_ms);

    Duration::from_millis(delay_ms.saturating_add(jitter(delay_ms)))
}

fn jitter(delay_ms: u64) -> u64 {
    match delay_ms / JITTER_DIVISOR {
        0 => 0,
        span => rand::thread_rng().gen_range(0..span),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_try_is_immediate() {
        assert_eq!(calculate_backoff(0, 500, 4000), Duration::ZERO);
    }

    #[test]
    fn test_delay_doubles_until_cap() {
        let first = calculate_backoff(1, 500, 4000).as_millis();
        assert!((500..550).contains(&first));

        let third = calculate_backoff(3, 500, 4000).as_millis();
        assert!((2000..2200).contains(&third));

        let capped = calculate_backoff(8, 500, 4000).as_millis();
        assert!((4000..4400).contains(&capped));
    }

    #[test]
    fn test_large_retry_counts_saturate() {
        let delay = calculate_backoff(200, u64::MAX / 2, 5000);
        assert!(delay.as_millis() >= 5000);
    }

    #[test]
    fn test_tiny_delays_have_no_jitter() {
        assert_eq!(calculate_backoff(1, 5, 100), Duration::from_millis(5));
    }
}
