// Scheduler: fixed-rate trigger plus the bounded-retry, bounded-staleness
// dispatch contract.

pub mod engine;

pub use engine::{Dispatcher, Scheduler, SchedulerEngine};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fixed-rate trigger parameters. Created once at startup, immutable
/// afterwards; the rule fires until the process is shut down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRule {
    /// Interval between ticks
    pub cadence: Duration,
    /// Staleness threshold: an event older than this at attempt time is
    /// dropped rather than attempted
    pub max_event_age: Duration,
    /// Additional attempts after the first failed one
    pub retry_attempts: u32,
}

impl ScheduleRule {
    pub fn new(cadence: Duration, max_event_age: Duration, retry_attempts: u32) -> Self {
        Self {
            cadence,
            max_event_age,
            retry_attempts,
        }
    }

    /// Total permitted delivery attempts per tick
    pub fn max_attempts(&self) -> u32 {
        self.retry_attempts + 1
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.cadence.is_zero() {
            return Err("Schedule cadence must be greater than 0".to_string());
        }
        if self.max_event_age > self.cadence {
            // Recommended, not enforced: a stale event can outlive its tick
            tracing::warn!(
                max_event_age_seconds = self.max_event_age.as_secs(),
                cadence_seconds = self.cadence.as_secs(),
                "max_event_age exceeds cadence; events may overlap the next tick"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_rejects_zero_cadence() {
        let rule = ScheduleRule::new(Duration::ZERO, Duration::from_secs(180), 1);
        assert!(rule.validate().is_err());
    }

    #[test]
    fn test_rule_accepts_observed_profiles() {
        // 6-hour and 5-minute cadences from the two deployment profiles
        let standard = ScheduleRule::new(
            Duration::from_secs(6 * 3600),
            Duration::from_secs(180),
            1,
        );
        let minimal = ScheduleRule::new(Duration::from_secs(300), Duration::from_secs(180), 1);
        assert!(standard.validate().is_ok());
        assert!(minimal.validate().is_ok());
    }

    #[test]
    fn test_max_event_age_above_cadence_is_allowed() {
        let rule = ScheduleRule::new(Duration::from_secs(60), Duration::from_secs(600), 0);
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn test_max_attempts() {
        assert_eq!(
            ScheduleRule::new(Duration::from_secs(1), Duration::from_secs(1), 0).max_attempts(),
            1
        );
        assert_eq!(
            ScheduleRule::new(Duration::from_secs(1), Duration::from_secs(1), 3).max_attempts(),
            4
        );
    }
}
