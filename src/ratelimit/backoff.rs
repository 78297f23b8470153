//! Exponential backoff after consecutive failures.

use std::time::Duration;

/// Backoff curve constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Delay while no failure is outstanding.
    pub base: Duration,
    /// Growth factor per consecutive failure.
    pub multiplier: f64,
    /// Upper bound on any delay.
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(3),
            multiplier: 1.5,
            max: Duration::from_secs(120),
        }
    }
}

/// Tracks consecutive failures and turns them into a wait.
///
/// `next_delay` is `base` with no failures outstanding, otherwise
/// `min(base * multiplier^failures, max)`. The counter itself is unbounded;
/// only the resulting delay is capped.
#[derive(Debug, Clone)]
pub struct BackoffController {
    config: BackoffConfig,
    failures: u32,
}

impl BackoffController {
    /// Creates a controller with no failures recorded.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: 0,
        }
    }

    /// Consecutive failures since the last success.
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }

    /// Delay to wait before the next remote attempt.
    #[must_use]
    pub fn next_delay(&self) -> Duration {
        if self.failures == 0 {
            return self.config.base.min(self.config.max);
        }
        let exponent = i32::try_from(self.failures).unwrap_or(i32::MAX);
        let secs = self.config.base.as_secs_f64() * self.config.multiplier.powi(exponent);
        let max_secs = self.config.max.as_secs_f64();
        if !secs.is_finite() || secs >= max_secs {
            return self.config.max;
        }
        Duration::from_secs_f64(secs)
    }

    /// Records a failed attempt (including explicit throttling).
    pub const fn on_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    /// Records a successful call.
    pub const fn on_success(&mut self) {
        self.failures = 0;
    }
}

impl Default for BackoffController {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}
