//! Retry backoff schedule

use std::time::Duration;

/// Exponential backoff: `base * multiplier^(retry_count - 1)`, capped at `max`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    base: Duration,
    multiplier: f64,
    max: Duration,
}

impl BackoffPolicy {
    #[must_use]
    pub const fn new(base: Duration, multiplier: f64, max: Duration) -> Self {
        Self {
            base,
            multiplier,
            max,
        }
    }

    /// Delay before the next attempt after `retry_count` failures
    #[must_use]
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        if retry_count == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(retry_count - 1).unwrap_or(i32::MAX);
        let seconds = self.base.as_secs_f64() * self.multiplier.powi(exponent);
        if !seconds.is_finite() || seconds >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::from_secs_f64(seconds.max(0.0))
    }

    /// [`Self::delay_for`] in whole milliseconds
    #[must_use]
    pub fn delay_millis(&self, retry_count: u32) -> i64 {
        i64::try_from(self.delay_for(retry_count).as_millis()).unwrap_or(i64::MAX)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 2.0, Duration::from_secs(300))
    }
}
