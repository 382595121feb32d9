//! Sync engine configuration.
//!
//! Every field has a default, so a configuration file only needs to mention
//! the values it overrides. Durations are written in milliseconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing and retry knobs of the sync engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    /// Quiet period before a local change triggers a sync
    #[serde(rename = "debounce_ms", with = "duration_ms")]
    pub debounce: Duration,
    /// Attempts per sync cycle, including the first
    pub max_attempts: u32,
    /// Linear backoff step: attempt `n` waits `n * retry_step`
    #[serde(rename = "retry_step_ms", with = "duration_ms")]
    pub retry_step: Duration,
    /// Polls for a live session before giving up
    pub auth_wait_attempts: u32,
    #[serde(rename = "auth_wait_interval_ms", with = "duration_ms")]
    pub auth_wait_interval: Duration,
    /// Remote notifications closer together than this are ignored
    #[serde(rename = "realtime_min_spacing_ms", with = "duration_ms")]
    pub realtime_min_spacing: Duration,
    #[serde(rename = "realtime_retry_base_ms", with = "duration_ms")]
    pub realtime_retry_base: Duration,
    #[serde(rename = "realtime_retry_cap_ms", with = "duration_ms")]
    pub realtime_retry_cap: Duration,
    pub realtime_retry_attempts: u32,
    /// Deadline for every remote call
    #[serde(rename = "request_timeout_ms", with = "duration_ms")]
    pub request_timeout: Duration,
    /// How often the HTTP subscription polls for changes
    #[serde(rename = "poll_interval_ms", with = "duration_ms")]
    pub poll_interval: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(2),
            max_attempts: 3,
            retry_step: Duration::from_millis(500),
            auth_wait_attempts: 6,
            auth_wait_interval: Duration::from_millis(500),
            realtime_min_spacing: Duration::from_secs(2),
            realtime_retry_base: Duration::from_secs(1),
            realtime_retry_cap: Duration::from_secs(10),
            realtime_retry_attempts: 5,
            request_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(5),
        }
    }
}

impl SyncSettings {
    /// Clamp values that would disable the engine's guarantees.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.max_attempts = self.max_attempts.max(1);
        self.auth_wait_attempts = self.auth_wait_attempts.max(1);
        self.realtime_retry_attempts = self.realtime_retry_attempts.max(1);
        if self.realtime_retry_cap < self.realtime_retry_base {
            self.realtime_retry_cap = self.realtime_retry_base;
        }
        if self.request_timeout.is_zero() {
            self.request_timeout = Self::default().request_timeout;
        }
        if self.poll_interval.is_zero() {
            self.poll_interval = Self::default().poll_interval;
        }
        self
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn defaults_match_engine_constants() {
        let settings = SyncSettings::default();
        assert_eq!(settings.debounce, Duration::from_secs(2));
        assert_eq!(settings.max_attempts, 3);
        assert_eq!(settings.retry_step, Duration::from_millis(500));
        assert_eq!(settings.auth_wait_attempts, 6);
        assert_eq!(settings.realtime_retry_cap, Duration::from_secs(10));
        assert_eq!(settings.realtime_retry_attempts, 5);
    }

    #[test]
    fn partial_config_keeps_remaining_defaults() {
        let settings: SyncSettings =
            serde_json::from_value(json!({"debounce_ms": 250, "max_attempts": 5})).unwrap();
        assert_eq!(settings.debounce, Duration::from_millis(250));
        assert_eq!(settings.max_attempts, 5);
        assert_eq!(settings.retry_step, Duration::from_millis(500));
    }

    #[test]
    fn durations_serialize_as_milliseconds() {
        let value = serde_json::to_value(SyncSettings::default()).unwrap();
        assert_eq!(value["debounce_ms"], json!(2000));
        assert_eq!(value["request_timeout_ms"], json!(30_000));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result = serde_json::from_value::<SyncSettings>(json!({"debounce": 1}));
        assert!(result.is_err());
    }

    #[test]
    fn normalized_clamps_degenerate_values() {
        let settings = SyncSettings {
            max_attempts: 0,
            realtime_retry_cap: Duration::from_millis(10),
            request_timeout: Duration::ZERO,
            ..SyncSettings::default()
        }
        .normalized();
        assert_eq!(settings.max_attempts, 1);
        assert_eq!(settings.realtime_retry_cap, settings.realtime_retry_base);
        assert_eq!(settings.request_timeout, Duration::from_secs(30));
    }
}
