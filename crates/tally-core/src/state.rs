//! Sync state shared with host applications.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Conflict;

/// Step of the pull, merge, push cycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncPhase {
    #[default]
    Idle,
    AuthCheck,
    TokenRefresh,
    FirstSyncCheck,
    Pull,
    LocalRead,
    Merge,
    PersistLocal,
    Push,
    Retry,
    Fatal,
}

impl SyncPhase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AuthCheck => "auth-check",
            Self::TokenRefresh => "token-refresh",
            Self::FirstSyncCheck => "first-sync-check",
            Self::Pull => "pull",
            Self::LocalRead => "local-read",
            Self::Merge => "merge",
            Self::PersistLocal => "persist-local",
            Self::Push => "push",
            Self::Retry => "retry",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot returned by `SyncEngine::status`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub enabled: bool,
    #[serde(with = "crate::wire::timestamp_option")]
    pub last_sync_time: Option<DateTime<Utc>>,
    pub in_progress: bool,
    pub conflict_count: usize,
    pub phase: SyncPhase,
}

/// Outcome of one sync request, shown to the user
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
}

impl SyncResult {
    pub(crate) fn synced(conflicts: Vec<Conflict>) -> Self {
        let message = if conflicts.is_empty() {
            "Synced".to_string()
        } else {
            format!("Synced with {} conflict(s)", conflicts.len())
        };
        Self {
            success: true,
            message,
            conflicts,
        }
    }

    pub(crate) fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            conflicts: Vec::new(),
        }
    }

    pub(crate) fn already_syncing() -> Self {
        Self::failed("Already syncing")
    }

    pub(crate) fn disabled() -> Self {
        Self::failed("Sync is disabled")
    }

    pub(crate) fn session_expired() -> Self {
        Self::failed("Session expired. Please sign in again.")
    }
}

/// Notification published on the engine's event channel
#[derive(Clone, Debug, PartialEq)]
pub enum SyncEvent {
    PhaseChanged(SyncPhase),
    StatusChanged(SyncStatus),
    ConflictsDetected(Vec<Conflict>),
    Completed(SyncResult),
    /// The session is gone; the host must ask the user to sign in again
    SessionInvalidated,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn phase_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_value(SyncPhase::FirstSyncCheck).unwrap(),
            json!("first-sync-check")
        );
        assert_eq!(SyncPhase::PersistLocal.to_string(), "persist-local");
    }

    #[test]
    fn synced_message_counts_conflicts() {
        assert_eq!(SyncResult::synced(Vec::new()).message, "Synced");
        assert!(SyncResult::synced(Vec::new()).success);
        assert!(!SyncResult::already_syncing().success);
    }

    #[test]
    fn status_serializes_camel_case() {
        let status = SyncStatus {
            enabled: true,
            last_sync_time: None,
            in_progress: false,
            conflict_count: 2,
            phase: SyncPhase::Idle,
        };
        let value = serde_json::to_value(status).unwrap();
        assert_eq!(value["conflictCount"], json!(2));
        assert_eq!(value["lastSyncTime"], serde_json::Value::Null);
    }
}
