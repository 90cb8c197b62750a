//! Per-intent retry backoff
//!
//! Each failing intent gets its own exponential schedule; a successful pass
//! resets it.

use crate::domain::ports::IntentKey;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use dashmap::DashMap;
use std::time::Duration;

/// Configuration for retry backoff
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// First retry delay
    pub initial_interval: Duration,
    /// Upper bound on any delay
    pub max_interval: Duration,
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.0 disables jitter)
    pub randomization_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(300),
            multiplier: 2.0,
            randomization_factor: 0.0,
        }
    }
}

/// Tracks the backoff schedule of every failing intent
pub struct BackoffTracker {
    config: BackoffConfig,
    schedules: DashMap<IntentKey, ExponentialBackoff>,
}

impl BackoffTracker {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            schedules: DashMap::new(),
        }
    }

    fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.initial_interval)
            .with_max_interval(self.config.max_interval)
            .with_multiplier(self.config.multiplier)
            .with_randomization_factor(self.config.randomization_factor)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Delay before the next retry of `key`; grows on every call
    pub fn next_delay(&self, key: &IntentKey) -> Duration {
        let mut schedule = self
            .schedules
            .entry(key.clone())
            .or_insert_with(|| self.schedule());
        schedule
            .next_backoff()
            .unwrap_or(self.config.max_interval)
            .min(self.config.max_interval)
    }

    /// Forget the schedule of `key` after a successful pass
    pub fn reset(&self, key: &IntentKey) {
        self.schedules.remove(key);
    }

    /// Number of intents currently backing off
    pub fn pending(&self) -> usize {
        self.schedules.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::IntentKind;

    fn tracker() -> BackoffTracker {
        BackoffTracker::new(BackoffConfig {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(8),
            multiplier: 2.0,
            randomization_factor: 0.0,
        })
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let tracker = tracker();
        let key = IntentKey::new(IntentKind::Volume, "apps", "db");

        let delays: Vec<u128> = (0..6)
            .map(|_| tracker.next_delay(&key).as_millis())
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 8000, 8000]);
    }

    #[test]
    fn test_reset_restarts_schedule() {
        let tracker = tracker();
        let key = IntentKey::new(IntentKind::Group, "apps", "db");

        tracker.next_delay(&key);
        tracker.next_delay(&key);
        assert_eq!(tracker.pending(), 1);

        tracker.reset(&key);
        assert_eq!(tracker.pending(), 0);
        assert_eq!(tracker.next_delay(&key).as_millis(), 1000);
    }

    #[test]
    fn test_schedules_are_per_key() {
        let tracker = tracker();
        let a = IntentKey::new(IntentKind::Volume, "apps", "a");
        let b = IntentKey::new(IntentKind::Volume, "apps", "b");

        tracker.next_delay(&a);
        tracker.next_delay(&a);
        assert_eq!(tracker.next_delay(&b).as_millis(), 1000);
    }
}
