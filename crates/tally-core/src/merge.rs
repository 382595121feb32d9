//! Three-way record merge.
//!
//! Reconciles the local record set of one entity kind with the remote copy.
//! Each record is resolved independently by id, in this order:
//!
//! 1. both tombstoned: the later `deleted_at` wins
//! 2. exactly one side tombstoned: the tombstone wins over any update
//! 3. neither tombstoned: the later `updated_at` wins, equal timestamps go to cloud
//!
//! Records only present locally are kept (tombstones included, so deletions
//! still propagate). Field-level conflicts are reported only when both sides
//! advanced past the local `last_synced_version` and their timestamps cannot
//! order the edits.

use std::collections::btree_map::Entry as MapEntry;
use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::models::{Conflict, Syncable};

/// Which replica a merge input came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Local,
    Cloud,
}

/// Why the merge refused its input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("duplicate {side:?} record id '{id}'")]
    DuplicateId { side: Side, id: String },
    #[error("{side:?} record with empty id")]
    EmptyId { side: Side },
    #[error("unreadable field value: {0}")]
    Field(String),
}

/// Where the merged copy of a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeSource {
    /// Remote copy kept: remote-only, or timestamps tied
    Cloud,
    /// Remote copy had the later timestamp
    CloudNewer,
    /// Local copy had the later timestamp
    LocalNewer,
    /// Record absent remotely
    LocalOnly,
    /// Remote tombstone won
    CloudTombstone,
    /// Local tombstone won
    LocalTombstone,
}

impl MergeSource {
    /// Whether the merged record carries state the remote does not have yet.
    #[must_use]
    pub const fn is_local_change(self) -> bool {
        matches!(self, Self::LocalNewer | Self::LocalOnly | Self::LocalTombstone)
    }
}

/// A merged record tagged with its origin
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRecord<T> {
    pub record: T,
    pub source: MergeSource,
}

/// Result of merging one entity kind
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome<T> {
    /// Merged records ordered by id
    pub records: Vec<MergedRecord<T>>,
    pub conflicts: Vec<Conflict>,
}

impl<T> MergeOutcome<T> {
    /// Drop source tags.
    #[must_use]
    pub fn into_records(self) -> Vec<T> {
        self.records.into_iter().map(|merged| merged.record).collect()
    }

    /// Whether any merged record still has to be pushed.
    #[must_use]
    pub fn has_local_changes(&self) -> bool {
        self.records
            .iter()
            .any(|merged| merged.source.is_local_change())
    }
}

/// Merge `local` and `remote` records of one entity kind.
///
/// Pure: the inputs are not modified and no I/O is performed.
pub fn merge_records<T: Syncable>(
    local: &[T],
    remote: &[T],
) -> Result<MergeOutcome<T>, MergeError> {
    validate_ids(local, Side::Local)?;
    validate_ids(remote, Side::Cloud)?;

    let mut merged: BTreeMap<String, MergedRecord<T>> = remote
        .iter()
        .map(|record| {
            (
                record.id().to_string(),
                MergedRecord {
                    record: record.clone(),
                    source: MergeSource::Cloud,
                },
            )
        })
        .collect();
    let mut conflicts = Vec::new();

    for local_record in local {
        match merged.entry(local_record.id().to_string()) {
            MapEntry::Vacant(slot) => {
                slot.insert(MergedRecord {
                    record: local_record.clone(),
                    source: MergeSource::LocalOnly,
                });
            }
            MapEntry::Occupied(mut slot) => {
                let cloud_record = &slot.get().record;
                let (winner, source) = resolve_pair(local_record, cloud_record);
                conflicts.extend(field_conflicts(local_record, cloud_record)?);
                let record = match winner {
                    Side::Local => local_record.clone(),
                    Side::Cloud => cloud_record.clone(),
                };
                slot.insert(MergedRecord { record, source });
            }
        }
    }

    Ok(MergeOutcome {
        records: merged.into_values().collect(),
        conflicts,
    })
}

/// Decide which copy of a record present on both sides survives.
fn resolve_pair<T: Syncable>(local: &T, cloud: &T) -> (Side, MergeSource) {
    let (local_meta, cloud_meta) = (local.meta(), cloud.meta());
    match (local_meta.deleted, cloud_meta.deleted) {
        (true, true) => {
            if local_meta.effective_deleted_at() > cloud_meta.effective_deleted_at() {
                (Side::Local, MergeSource::LocalTombstone)
            } else {
                (Side::Cloud, MergeSource::CloudTombstone)
            }
        }
        (false, true) => (Side::Cloud, MergeSource::CloudTombstone),
        (true, false) => (Side::Local, MergeSource::LocalTombstone),
        (false, false) => {
            let local_at = local_meta.effective_updated_at();
            let cloud_at = cloud_meta.effective_updated_at();
            if local_at > cloud_at {
                (Side::Local, MergeSource::LocalNewer)
            } else if cloud_at > local_at {
                (Side::Cloud, MergeSource::CloudNewer)
            } else {
                (Side::Cloud, MergeSource::Cloud)
            }
        }
    }
}

/// Field-level conflicts between two active copies of the same record.
///
/// Empty unless both copies moved past the shared base and their timestamps
/// are identical. Fields whose values are equivalent after serialization are
/// never reported.
pub fn field_conflicts<T: Syncable>(local: &T, cloud: &T) -> Result<Vec<Conflict>, MergeError> {
    let (local_meta, cloud_meta) = (local.meta(), cloud.meta());
    if local_meta.deleted || cloud_meta.deleted {
        return Ok(Vec::new());
    }
    if !local_meta.diverged_from(cloud_meta)
        || local_meta.effective_updated_at() != cloud_meta.effective_updated_at()
    {
        return Ok(Vec::new());
    }

    let mut conflicts = Vec::new();
    for &field in T::conflict_fields() {
        let local_value = local
            .field_value(field)
            .map_err(|error| MergeError::Field(error.to_string()))?;
        let cloud_value = cloud
            .field_value(field)
            .map_err(|error| MergeError::Field(error.to_string()))?;
        if values_equivalent(&local_value, &cloud_value) {
            continue;
        }
        conflicts.push(Conflict {
            entity_type: T::KIND,
            entity_id: local.id().to_string(),
            field,
            local_value,
            cloud_value,
        });
    }
    Ok(conflicts)
}

/// Structural equality that ignores representation differences.
///
/// Numbers compare numerically (`5` equals `5.0`) and strings that are both
/// RFC 3339 timestamps compare as instants.
#[must_use]
pub fn values_equivalent(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(left), Value::Number(right)) => {
            if let (Some(left), Some(right)) = (left.as_i64(), right.as_i64()) {
                return left == right;
            }
            match (left.as_f64(), right.as_f64()) {
                (Some(left), Some(right)) => (left - right).abs() <= f64::EPSILON,
                _ => left == right,
            }
        }
        (Value::String(left), Value::String(right)) => {
            left == right
                || matches!(
                    (parse_instant(left), parse_instant(right)),
                    (Some(left), Some(right)) if left == right
                )
        }
        (Value::Array(left), Value::Array(right)) => {
            left.len() == right.len()
                && left
                    .iter()
                    .zip(right)
                    .all(|(left, right)| values_equivalent(left, right))
        }
        (Value::Object(left), Value::Object(right)) => {
            left.len() == right.len()
                && left.iter().all(|(key, value)| {
                    right
                        .get(key)
                        .is_some_and(|other| values_equivalent(value, other))
                })
        }
        _ => left == right,
    }
}

fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|value| value.with_timezone(&Utc))
}

fn validate_ids<T: Syncable>(records: &[T], side: Side) -> Result<(), MergeError> {
    let mut seen = HashSet::with_capacity(records.len());
    for record in records {
        let id = record.id();
        if id.trim().is_empty() {
            return Err(MergeError::EmptyId { side });
        }
        if !seen.insert(id) {
            return Err(MergeError::DuplicateId {
                side,
                id: id.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Book, BookField, ConflictField, Entry, EntryType, SyncMeta};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn at(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + millis).unwrap()
    }

    fn book(id: &str, name: &str, version: u64, updated: i64) -> Book {
        Book {
            id: id.to_string(),
            name: name.to_string(),
            currency: "EUR".to_string(),
            archived: false,
            archived_at: None,
            meta: SyncMeta {
                version,
                last_synced_version: None,
                last_modified_by: Some("device-a".to_string()),
                created_at: at(0),
                updated_at: Some(at(updated)),
                deleted: false,
                deleted_at: None,
            },
        }
    }

    fn tombstone(mut record: Book, deleted: i64) -> Book {
        record.meta.deleted = true;
        record.meta.deleted_at = Some(at(deleted));
        record.meta.updated_at = Some(at(deleted));
        record
    }

    fn sorted(records: Vec<Book>) -> Vec<Book> {
        let mut records = records;
        records.sort_by(|left, right| left.id.cmp(&right.id));
        records
    }

    #[test]
    fn merging_identical_sets_is_identity() {
        let records = vec![
            book("b2", "Groceries", 3, 20),
            book("b1", "Trip", 1, 10),
            tombstone(book("b3", "Old", 2, 5), 30),
        ];

        let outcome = merge_records(&records, &records).unwrap();

        assert!(outcome.conflicts.is_empty());
        assert!(!outcome.has_local_changes());
        assert_eq!(outcome.into_records(), sorted(records));
    }

    #[test]
    fn cloud_newer_wins_without_conflict() {
        let mut local = book("b1", "Trip", 2, 10);
        local.meta.last_synced_version = Some(1);
        let cloud = book("b1", "Trip-Cloud", 2, 20);

        let outcome = merge_records(&[local], &[cloud]).unwrap();

        assert!(outcome.conflicts.is_empty());
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].record.name, "Trip-Cloud");
        assert_eq!(outcome.records[0].source, MergeSource::CloudNewer);
    }

    #[test]
    fn local_newer_wins() {
        let local = book("b1", "Trip-Local", 3, 30);
        let cloud = book("b1", "Trip", 2, 20);

        let outcome = merge_records(&[local.clone()], &[cloud]).unwrap();

        assert_eq!(outcome.records[0].record, local);
        assert_eq!(outcome.records[0].source, MergeSource::LocalNewer);
        assert!(outcome.has_local_changes());
    }

    #[test]
    fn equal_timestamps_default_to_cloud() {
        let local = book("b1", "Local", 2, 10);
        let cloud = book("b1", "Cloud", 2, 10);

        let outcome = merge_records(&[local], &[cloud.clone()]).unwrap();

        assert_eq!(outcome.records[0].record, cloud);
        assert_eq!(outcome.records[0].source, MergeSource::Cloud);
        assert!(outcome.conflicts.is_empty());
    }

    #[test]
    fn missing_updated_at_falls_back_to_created_at() {
        let mut local = book("b1", "Local", 2, 0);
        local.meta.updated_at = None;
        local.meta.created_at = at(50);
        let mut cloud = book("b1", "Cloud", 2, 0);
        cloud.meta.updated_at = None;
        cloud.meta.created_at = at(40);

        let outcome = merge_records(&[local], &[cloud]).unwrap();

        assert_eq!(outcome.records[0].record.name, "Local");
        assert_eq!(outcome.records[0].source, MergeSource::LocalNewer);
    }

    #[test]
    fn cloud_tombstone_beats_newer_local_update() {
        let local = book("b1", "Edited later", 5, 100);
        let cloud = tombstone(book("b1", "Trip", 2, 10), 10);

        let outcome = merge_records(&[local], &[cloud.clone()]).unwrap();

        assert_eq!(outcome.records[0].record, cloud);
        assert_eq!(outcome.records[0].source, MergeSource::CloudTombstone);
        assert!(outcome.conflicts.is_empty());
    }

    #[test]
    fn local_tombstone_beats_newer_cloud_update() {
        let local = tombstone(book("b1", "Trip", 2, 10), 10);
        let cloud = book("b1", "Edited later", 7, 500);

        let outcome = merge_records(&[local.clone()], &[cloud]).unwrap();

        assert_eq!(outcome.records[0].record, local);
        assert_eq!(outcome.records[0].source, MergeSource::LocalTombstone);
    }

    #[test]
    fn local_entry_deletion_wins_over_older_cloud_copy() {
        let mut local = Entry::new("b1", EntryType::Expense, 1200, at(0), "device-a");
        local.id = "e1".to_string();
        let mut cloud = local.clone();
        cloud.meta.updated_at = Some(at(2));
        local.meta.deleted = true;
        local.meta.deleted_at = Some(at(3));

        let outcome = merge_records(&[local], &[cloud]).unwrap();

        assert!(outcome.records[0].record.meta.deleted);
        assert_eq!(outcome.records[0].record.meta.deleted_at, Some(at(3)));
    }

    #[test]
    fn both_tombstoned_keeps_later_deletion() {
        let local = tombstone(book("b1", "Local", 3, 0), 30);
        let cloud = tombstone(book("b1", "Cloud", 3, 0), 20);

        let outcome = merge_records(&[local.clone()], &[cloud]).unwrap();

        assert_eq!(outcome.records[0].record, local);
        assert!(outcome.conflicts.is_empty());
    }

    #[test]
    fn both_tombstoned_without_deleted_at_uses_updated_at() {
        let mut local = tombstone(book("b1", "Local", 3, 0), 0);
        local.meta.deleted_at = None;
        local.meta.updated_at = Some(at(10));
        let mut cloud = tombstone(book("b1", "Cloud", 3, 0), 0);
        cloud.meta.deleted_at = None;
        cloud.meta.updated_at = Some(at(20));

        let outcome = merge_records(&[local], &[cloud.clone()]).unwrap();

        assert_eq!(outcome.records[0].record, cloud);
    }

    #[test]
    fn local_tombstone_without_remote_copy_is_kept() {
        let local = tombstone(book("b9", "Gone", 2, 0), 5);

        let outcome = merge_records(&[local.clone()], &[]).unwrap();

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].record, local);
        assert_eq!(outcome.records[0].source, MergeSource::LocalOnly);
    }

    #[test]
    fn remote_only_records_are_kept() {
        let cloud = book("b7", "From phone", 1, 0);

        let outcome = merge_records(&[], &[cloud.clone()]).unwrap();

        assert_eq!(outcome.records[0].record, cloud);
        assert_eq!(outcome.records[0].source, MergeSource::Cloud);
    }

    #[test]
    fn merge_is_symmetric_without_conflicts() {
        let left = vec![
            book("b1", "Trip", 2, 10),
            book("b2", "Groceries", 4, 40),
            tombstone(book("b3", "Old", 2, 0), 15),
            book("b4", "Only left", 1, 0),
        ];
        let right = vec![
            book("b1", "Trip-Cloud", 3, 20),
            book("b2", "Food", 3, 30),
            book("b3", "Old", 3, 60),
            book("b5", "Only right", 1, 0),
        ];

        let forward = merge_records(&left, &right).unwrap();
        let backward = merge_records(&right, &left).unwrap();

        assert!(forward.conflicts.is_empty());
        assert!(backward.conflicts.is_empty());
        assert_eq!(forward.into_records(), backward.into_records());
    }

    #[test]
    fn concurrent_edits_with_ambiguous_order_emit_field_conflicts() {
        let mut local = book("b1", "Trip", 3, 10);
        local.meta.last_synced_version = Some(2);
        local.currency = "USD".to_string();
        let cloud = book("b1", "Trip-Cloud", 3, 10);

        let outcome = merge_records(&[local], &[cloud]).unwrap();

        assert_eq!(
            outcome.conflicts,
            vec![
                Conflict {
                    entity_type: crate::models::EntityKind::Book,
                    entity_id: "b1".to_string(),
                    field: ConflictField::Book(BookField::Name),
                    local_value: json!("Trip"),
                    cloud_value: json!("Trip-Cloud"),
                },
                Conflict {
                    entity_type: crate::models::EntityKind::Book,
                    entity_id: "b1".to_string(),
                    field: ConflictField::Book(BookField::Currency),
                    local_value: json!("USD"),
                    cloud_value: json!("EUR"),
                },
            ]
        );
        assert_eq!(outcome.records[0].record.name, "Trip-Cloud");
    }

    #[test]
    fn one_side_behind_is_not_a_conflict() {
        let mut local = book("b1", "Trip", 2, 10);
        local.meta.last_synced_version = Some(2);
        let cloud = book("b1", "Trip-Cloud", 3, 10);

        let outcome = merge_records(&[local], &[cloud]).unwrap();

        assert!(outcome.conflicts.is_empty());
    }

    #[test]
    fn equal_values_in_different_representations_do_not_conflict() {
        let mut local = Entry::new("b1", EntryType::Expense, 1200, at(0), "device-a");
        local.id = "e1".to_string();
        local.meta.version = 3;
        local.meta.last_synced_version = Some(1);
        local.meta.updated_at = Some(at(10));
        let mut cloud = local.clone();
        cloud.meta.version = 2;

        let outcome = merge_records(&[local], &[cloud]).unwrap();

        assert!(outcome.conflicts.is_empty());
        assert!(values_equivalent(&json!(5), &json!(5.0)));
        assert!(values_equivalent(
            &json!("2024-01-01T00:00:00Z"),
            &json!("2024-01-01T00:00:00.000Z")
        ));
        assert!(!values_equivalent(&json!("5"), &json!(5)));
        assert!(values_equivalent(
            &json!({"a": [1, 2.0]}),
            &json!({"a": [1.0, 2]})
        ));
    }

    #[test]
    fn rejects_duplicate_and_empty_ids() {
        let record = book("b1", "Trip", 1, 0);
        let duplicate = merge_records(&[record.clone(), record.clone()], &[]).unwrap_err();
        assert_eq!(
            duplicate,
            MergeError::DuplicateId {
                side: Side::Local,
                id: "b1".to_string()
            }
        );

        let empty = book("  ", "Nameless", 1, 0);
        assert_eq!(
            merge_records(&[], &[empty]).unwrap_err(),
            MergeError::EmptyId { side: Side::Cloud }
        );
    }

    #[test]
    fn inputs_are_left_untouched() {
        let local = vec![book("b1", "Trip", 2, 10)];
        let remote = vec![tombstone(book("b1", "Trip", 2, 0), 5)];
        let (local_before, remote_before) = (local.clone(), remote.clone());

        merge_records(&local, &remote).unwrap();

        assert_eq!(local, local_before);
        assert_eq!(remote, remote_before);
    }
}
