// Retry pacing for the dispatch loop. The retry budget itself lives on the
// ScheduleRule; strategies only decide how long to wait between attempts.

use rand::Rng;
use std::time::Duration;

/// Strategy for spacing retry attempts within one tick
pub trait RetryStrategy: Send + Sync {
    /// Delay to wait before retry number `retry` (1-based: the first retry
    /// after a failed initial attempt is retry 1).
    fn delay_before(&self, retry: u32) -> Duration;
}

/// Fixed delay between attempts
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// No waiting between attempts. Used in tests and for deployments where
    /// the cadence itself provides enough spacing.
    pub fn none() -> Self {
        Self {
            delay: Duration::ZERO,
        }
    }
}

impl RetryStrategy for FixedDelay {
    fn delay_before(&self, _retry: u32) -> Duration {
        self.delay
    }
}

/// Exponential backoff with jitter. Sequence: base, 2*base, 4*base, ...,
/// capped at `max_delay`, plus up to `jitter_factor` random extra to avoid
/// retrying in lockstep with the upstream outage.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    jitter_factor: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.1,
        }
    }
}

impl ExponentialBackoff {
    pub fn new(base_delay: Duration, max_delay: Duration, jitter_factor: f64) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
        }
    }

    fn base_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let scaled = self.base_delay.saturating_mul(1u32 << exponent);
        scaled.min(self.max_delay)
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn delay_before(&self, retry: u32) -> Duration {
        let base = self.base_for(retry);
        if self.jitter_factor == 0.0 {
            return base;
        }

        let jitter_range_ms = (base.as_millis() as f64 * self.jitter_factor) as u64;
        let jitter_ms = if jitter_range_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_range_ms)
        } else {
            0
        };
        base + Duration::from_millis(jitter_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_delay_is_constant() {
        let strategy = FixedDelay::new(Duration::from_secs(2));
        for retry in 1..5 {
            assert_eq!(strategy.delay_before(retry), Duration::from_secs(2));
        }
    }

    #[test]
    fn test_none_delay_is_zero() {
        let strategy = FixedDelay::none();
        assert_eq!(strategy.delay_before(1), Duration::ZERO);
    }

    #[test]
    fn test_exponential_doubling_without_jitter() {
        let strategy = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(30), 0.0);
        assert_eq!(strategy.delay_before(1), Duration::from_secs(1));
        assert_eq!(strategy.delay_before(2), Duration::from_secs(2));
        assert_eq!(strategy.delay_before(3), Duration::from_secs(4));
        assert_eq!(strategy.delay_before(4), Duration::from_secs(8));
    }

    #[test]
    fn test_exponential_caps_at_max() {
        let strategy = ExponentialBackoff::new(Duration::from_secs(5), Duration::from_secs(20), 0.0);
        assert_eq!(strategy.delay_before(10), Duration::from_secs(20));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let strategy = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(30), 0.5);
        for _ in 0..50 {
            let delay = strategy.delay_before(1);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn test_jitter_factor_is_clamped() {
        let strategy = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(30), 7.0);
        assert_eq!(strategy.jitter_factor, 1.0);
    }
}
