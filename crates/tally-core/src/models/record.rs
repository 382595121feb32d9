//! Sync metadata shared by every entity kind

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::ConflictField;
use crate::util::now_millis;
use crate::Result;

/// Kind of synchronized entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Book,
    Entry,
    Category,
}

impl EntityKind {
    /// Every kind, in the order they are reconciled.
    pub const ALL: [Self; 3] = [Self::Book, Self::Entry, Self::Category];

    /// Storage key used by local and remote stores.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Book => "book",
            Self::Entry => "entry",
            Self::Category => "category",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of money for entries and categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Income,
    #[default]
    Expense,
}

/// Generate a new record id (UUID v7, time-sortable)
#[must_use]
pub fn new_record_id() -> String {
    Uuid::now_v7().to_string()
}

/// Versioning and tombstone metadata carried by every synchronized record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMeta {
    /// Incremented by exactly one on every local mutation
    pub version: u64,
    /// `version` at the moment of the last reconciliation with remote
    #[serde(default)]
    pub last_synced_version: Option<u64>,
    /// Device or user that made the last local mutation
    #[serde(default)]
    pub last_modified_by: Option<String>,
    /// Creation timestamp
    #[serde(with = "crate::wire::timestamp")]
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp
    #[serde(default, with = "crate::wire::timestamp_option")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Tombstone marker
    #[serde(default)]
    pub deleted: bool,
    /// Set once when `deleted` first becomes true
    #[serde(default, with = "crate::wire::timestamp_option")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SyncMeta {
    /// Metadata for a freshly created record.
    #[must_use]
    pub fn new(device: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            version: 1,
            last_synced_version: None,
            last_modified_by: Some(device.into()),
            created_at: now,
            updated_at: Some(now),
            deleted: false,
            deleted_at: None,
        }
    }

    /// Timestamp used to order concurrent edits.
    ///
    /// Records that were never updated fall back to their creation time.
    #[must_use]
    pub fn effective_updated_at(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }

    /// Timestamp used to order two tombstones.
    #[must_use]
    pub fn effective_deleted_at(&self) -> DateTime<Utc> {
        self.deleted_at.unwrap_or_else(|| self.effective_updated_at())
    }

    /// Record a local mutation.
    pub fn touch(&mut self, device: &str) {
        let now = now_millis();
        let floor = self.effective_updated_at() + TimeDelta::milliseconds(1);
        self.version += 1;
        self.updated_at = Some(now.max(floor));
        self.last_modified_by = Some(device.to_string());
    }

    /// Turn the record into a tombstone; a repeated delete keeps the first `deleted_at`.
    pub fn mark_deleted(&mut self, device: &str) {
        self.touch(device);
        if !self.deleted {
            self.deleted = true;
            self.deleted_at = self.updated_at;
        }
    }

    /// Record that this version has been reconciled against remote.
    pub fn mark_synced(&mut self) {
        self.last_synced_version = Some(self.version);
    }

    /// Both sides moved past the shared base independently.
    #[must_use]
    pub fn diverged_from(&self, other: &Self) -> bool {
        self.last_synced_version
            .is_some_and(|base| self.version > base && other.version > base)
    }
}

/// A record that participates in three-way sync
pub trait Syncable: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Entity kind stored in this record type
    const KIND: EntityKind;

    /// Stable record identity
    fn id(&self) -> &str;

    fn meta(&self) -> &SyncMeta;

    fn meta_mut(&mut self) -> &mut SyncMeta;

    /// User-editable fields that can diverge between replicas
    fn conflict_fields() -> &'static [ConflictField];

    /// Current value of a conflict field as JSON
    fn field_value(&self, field: ConflictField) -> Result<Value>;

    /// Overwrite a conflict field from a JSON value
    fn set_field_value(&mut self, field: ConflictField, value: Value) -> Result<()>;

    fn is_deleted(&self) -> bool {
        self.meta().deleted
    }

    /// Apply a local mutation: bump version and refresh `updated_at`.
    fn touch(&mut self, device: &str) {
        self.meta_mut().touch(device);
    }

    fn mark_deleted(&mut self, device: &str) {
        self.meta_mut().mark_deleted(device);
    }

    fn mark_synced(&mut self) {
        self.meta_mut().mark_synced();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_meta_starts_at_version_one() {
        let meta = SyncMeta::new("device-a");
        assert_eq!(meta.version, 1);
        assert_eq!(meta.last_synced_version, None);
        assert_eq!(meta.updated_at, Some(meta.created_at));
        assert!(!meta.deleted);
    }

    #[test]
    fn touch_strictly_increases_version_and_timestamp() {
        let mut meta = SyncMeta::new("device-a");
        let before = meta.clone();

        meta.touch("device-b");
        meta.touch("device-b");

        assert_eq!(meta.version, before.version + 2);
        assert!(meta.effective_updated_at() > before.effective_updated_at());
        assert_eq!(meta.last_modified_by.as_deref(), Some("device-b"));
    }

    #[test]
    fn touch_refreshes_timestamp_even_when_clock_lags() {
        let mut meta = SyncMeta::new("device-a");
        let future = meta.created_at + TimeDelta::hours(1);
        meta.updated_at = Some(future);

        meta.touch("device-a");

        assert_eq!(meta.updated_at, Some(future + TimeDelta::milliseconds(1)));
    }

    #[test]
    fn mark_deleted_sets_deleted_at_once() {
        let mut meta = SyncMeta::new("device-a");
        meta.mark_deleted("device-a");
        let first = meta.deleted_at;
        assert!(meta.deleted);
        assert!(first.is_some());

        meta.mark_deleted("device-a");
        assert_eq!(meta.deleted_at, first);
        assert_eq!(meta.version, 3);
    }

    #[test]
    fn effective_updated_at_falls_back_to_created_at() {
        let mut meta = SyncMeta::new("device-a");
        meta.updated_at = None;
        assert_eq!(meta.effective_updated_at(), meta.created_at);
        assert_eq!(meta.effective_deleted_at(), meta.created_at);
    }

    #[test]
    fn divergence_requires_both_sides_past_base() {
        let mut local = SyncMeta::new("device-a");
        local.version = 3;
        local.last_synced_version = Some(2);
        let mut cloud = local.clone();

        cloud.version = 2;
        assert!(!local.diverged_from(&cloud));

        cloud.version = 3;
        assert!(local.diverged_from(&cloud));

        local.last_synced_version = None;
        assert!(!local.diverged_from(&cloud));
    }
}
