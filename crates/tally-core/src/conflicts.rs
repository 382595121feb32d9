//! Unresolved conflict set and resolution application

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::models::{
    Book, Category, Conflict, ConflictKey, EntityKind, Entry, Resolution, Syncable,
};
use crate::store::{CloudDocument, DocumentRecord};
use crate::{Error, Result};

/// Resolutions keyed by record id and field
pub type Resolutions = BTreeMap<ConflictKey, Resolution>;

/// Holds the conflicts waiting for a user decision
#[derive(Debug, Default)]
pub struct ConflictTracker {
    conflicts: Mutex<Vec<Conflict>>,
}

impl ConflictTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn conflicts(&self) -> MutexGuard<'_, Vec<Conflict>> {
        self.conflicts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn list(&self) -> Vec<Conflict> {
        self.conflicts().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.conflicts().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conflicts().is_empty()
    }

    /// Add newly detected conflicts; a conflict on the same record field
    /// replaces the older one
    pub fn record(&self, detected: &[Conflict]) {
        let mut conflicts = self.conflicts();
        for conflict in detected {
            let key = conflict.key();
            match conflicts.iter_mut().find(|existing| existing.key() == key) {
                Some(existing) => existing.clone_from(conflict),
                None => conflicts.push(conflict.clone()),
            }
        }
    }

    /// Replace the whole set, e.g. with conflicts restored from disk
    pub fn replace(&self, conflicts: Vec<Conflict>) {
        *self.conflicts() = conflicts;
    }

    pub fn clear(&self) {
        self.conflicts().clear();
    }

    /// Write the chosen values into `document`.
    ///
    /// `document` must be the full local record set, tombstones included.
    /// Every resolved record is touched and marked synced, since the caller
    /// pushes the result right away. Returns the number of records changed.
    pub fn apply(
        &self,
        document: &mut CloudDocument,
        resolutions: &Resolutions,
        device: &str,
    ) -> Result<usize> {
        let conflicts = self.list();
        let mut applied = 0;

        for (key, resolution) in resolutions {
            let conflict = conflicts
                .iter()
                .find(|conflict| &conflict.key() == key)
                .ok_or_else(|| {
                    Error::NotFound(format!("conflict on {} of {}", key.field, key.entity_id))
                })?;
            let value = resolution.value_for(conflict);

            match conflict.entity_type {
                EntityKind::Book => apply_value::<Book>(document, conflict, value, device)?,
                EntityKind::Entry => apply_value::<Entry>(document, conflict, value, device)?,
                EntityKind::Category => {
                    apply_value::<Category>(document, conflict, value, device)?;
                }
            }
            applied += 1;
        }

        Ok(applied)
    }
}

fn apply_value<T: DocumentRecord>(
    document: &mut CloudDocument,
    conflict: &Conflict,
    value: Value,
    device: &str,
) -> Result<()> {
    let record = T::slot_mut(document)
        .iter_mut()
        .find(|record| record.id() == conflict.entity_id)
        .ok_or_else(|| Error::NotFound(format!("{} {}", T::KIND, conflict.entity_id)))?;

    record.set_field_value(conflict.field, value)?;
    record.touch(device);
    record.mark_synced();
    tracing::debug!("Resolved {} on {}", conflict.field, conflict.entity_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BookField, ConflictField};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn name_conflict(book: &Book) -> Conflict {
        Conflict {
            entity_type: EntityKind::Book,
            entity_id: book.id.clone(),
            field: ConflictField::Book(BookField::Name),
            local_value: json!("Trip"),
            cloud_value: json!("Trip-Cloud"),
        }
    }

    #[test]
    fn record_replaces_conflicts_on_same_field() {
        let tracker = ConflictTracker::new();
        let book = Book::new("Trip", "EUR", "device-a");
        let mut conflict = name_conflict(&book);
        tracker.record(&[conflict.clone()]);

        conflict.cloud_value = json!("Journey");
        tracker.record(&[conflict.clone()]);

        assert_eq!(tracker.list(), vec![conflict]);
    }

    #[test]
    fn apply_uses_cloud_value_and_bumps_version() {
        let tracker = ConflictTracker::new();
        let book = Book::new("Trip", "EUR", "device-a");
        let conflict = name_conflict(&book);
        tracker.record(&[conflict.clone()]);
        let mut document = CloudDocument {
            books: vec![book.clone()],
            ..CloudDocument::default()
        };

        let resolutions = Resolutions::from([(conflict.key(), Resolution::UseCloud)]);
        let applied = tracker.apply(&mut document, &resolutions, "device-a").unwrap();

        let resolved = &document.books[0];
        assert_eq!(applied, 1);
        assert_eq!(resolved.name, "Trip-Cloud");
        assert_eq!(resolved.meta.version, book.meta.version + 1);
        assert_eq!(resolved.meta.last_synced_version, Some(resolved.meta.version));
    }

    #[test]
    fn apply_reaches_tombstoned_records() {
        let tracker = ConflictTracker::new();
        let mut book = Book::new("Trip", "EUR", "device-a");
        book.mark_deleted("device-a");
        let conflict = name_conflict(&book);
        tracker.record(&[conflict.clone()]);
        let mut document = CloudDocument {
            books: vec![book],
            ..CloudDocument::default()
        };

        let resolutions =
            Resolutions::from([(conflict.key(), Resolution::Explicit(json!("Holiday")))]);
        tracker.apply(&mut document, &resolutions, "device-a").unwrap();

        assert_eq!(document.books[0].name, "Holiday");
        assert!(document.books[0].is_deleted());
    }

    #[test]
    fn apply_rejects_unknown_conflicts() {
        let tracker = ConflictTracker::new();
        let book = Book::new("Trip", "EUR", "device-a");
        let mut document = CloudDocument::default();

        let resolutions = Resolutions::from([(name_conflict(&book).key(), Resolution::UseLocal)]);
        let error = tracker
            .apply(&mut document, &resolutions, "device-a")
            .unwrap_err();
        assert!(matches!(error, Error::NotFound(_)));
    }

    #[test]
    fn apply_rejects_values_of_the_wrong_type() {
        let tracker = ConflictTracker::new();
        let book = Book::new("Trip", "EUR", "device-a");
        let conflict = name_conflict(&book);
        tracker.record(&[conflict.clone()]);
        let mut document = CloudDocument {
            books: vec![book],
            ..CloudDocument::default()
        };

        let resolutions = Resolutions::from([(conflict.key(), Resolution::Explicit(json!(42)))]);
        assert!(tracker.apply(&mut document, &resolutions, "device-a").is_err());
        assert!(!tracker.is_empty());
    }
}
