//! Backoff schedules

use std::time::Duration;

use crate::config::SyncSettings;

/// How long to wait before attempt `attempt + 1`.
pub trait Backoff {
    /// Attempts allowed in total, the first included
    fn max_attempts(&self) -> u32;

    /// Delay after the failed attempt `attempt` (1-based)
    fn delay_after(&self, attempt: u32) -> Duration;
}

/// `attempt * step`, used by sync cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearBackoff {
    pub max_attempts: u32,
    pub step: Duration,
}

impl LinearBackoff {
    #[must_use]
    pub const fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            step: settings.retry_step,
        }
    }
}

impl Backoff for LinearBackoff {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay_after(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt)
    }
}

/// `base * 2^(attempt - 1)` capped at `cap`, used by realtime subscription setup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl ExponentialBackoff {
    #[must_use]
    pub const fn realtime(settings: &SyncSettings) -> Self {
        Self {
            max_attempts: settings.realtime_retry_attempts,
            base: settings.realtime_retry_base,
            cap: settings.realtime_retry_cap,
        }
    }
}

impl Backoff for ExponentialBackoff {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base.saturating_mul(1_u32 << exponent).min(self.cap)
    }
}
