//! `SQLite`-backed local store

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{ChangeHook, LocalStore, PersistedSyncState};
use crate::db::{
    Database, RecordRepository, RecordRow, SqliteRecordRepository, SqliteSyncStateRepository,
    SyncStateRepository,
};
use crate::models::{EntityKind, Syncable};
use crate::Result;

/// Local store persisting every record as a JSON row
pub struct SqliteLocalStore {
    db: Mutex<Database>,
    hook: Mutex<Option<ChangeHook>>,
}

impl SqliteLocalStore {
    /// Open (or create) the store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::with_database(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::with_database(Database::open_in_memory()?))
    }

    #[must_use]
    pub fn with_database(db: Database) -> Self {
        Self {
            db: Mutex::new(db),
            hook: Mutex::new(None),
        }
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fire(&self, kind: EntityKind) {
        let hook = self
            .hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(hook) = hook {
            hook(kind);
        }
    }
}

impl LocalStore for SqliteLocalStore {
    fn get_all<T: Syncable>(&self, user_id: &str) -> Result<Vec<T>> {
        let mut db = self.db();
        let repo = SqliteRecordRepository::new(db.connection_mut());
        repo.list(user_id, T::KIND)?
            .into_iter()
            .map(|row| serde_json::from_str(&row.payload).map_err(Into::into))
            .collect()
    }

    fn replace_all<T: Syncable>(&self, user_id: &str, records: &[T]) -> Result<()> {
        let rows = records
            .iter()
            .map(|record| -> Result<RecordRow> {
                Ok(RecordRow {
                    id: record.id().to_string(),
                    payload: serde_json::to_string(record)?,
                    deleted: record.is_deleted(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        {
            let mut db = self.db();
            let mut repo = SqliteRecordRepository::new(db.connection_mut());
            repo.replace(user_id, T::KIND, &rows)?;
        }
        tracing::debug!("Stored {} {} record(s)", rows.len(), T::KIND);
        self.fire(T::KIND);
        Ok(())
    }

    fn on_changed(&self, hook: Option<ChangeHook>) {
        *self.hook.lock().unwrap_or_else(PoisonError::into_inner) = hook;
    }

    fn upsert<T: Syncable>(&self, user_id: &str, record: T) -> Result<()> {
        let row = RecordRow {
            id: record.id().to_string(),
            payload: serde_json::to_string(&record)?,
            deleted: record.is_deleted(),
        };
        {
            let mut db = self.db();
            let repo = SqliteRecordRepository::new(db.connection_mut());
            repo.upsert(user_id, T::KIND, &row)?;
        }
        self.fire(T::KIND);
        Ok(())
    }

    fn load_sync_state(&self, user_id: &str) -> Result<Option<PersistedSyncState>> {
        let db = self.db();
        let repo = SqliteSyncStateRepository::new(db.connection());
        repo.load(user_id)?
            .map(|payload| serde_json::from_str(&payload).map_err(Into::into))
            .transpose()
    }

    fn save_sync_state(&self, user_id: &str, state: &PersistedSyncState) -> Result<()> {
        let payload = serde_json::to_string(state)?;
        let db = self.db();
        SqliteSyncStateRepository::new(db.connection()).save(user_id, &payload)
    }

    fn wipe_user(&self, user_id: &str) -> Result<()> {
        {
            let mut db = self.db();
            SqliteSyncStateRepository::new(db.connection()).clear(user_id)?;
            SqliteRecordRepository::new(db.connection_mut()).wipe(user_id)?;
        }
        tracing::info!("Wiped local data");
        for kind in EntityKind::ALL {
            self.fire(kind);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Book, Conflict, ConflictField, Entry, EntryType};
    use crate::store::CloudDocument;
    use crate::util::now_millis;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_records_survive_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("tally.db");

        let mut book = Book::new("Trip", "EUR", "device-a");
        let entry = Entry::new(book.id.clone(), EntryType::Expense, 4200, now_millis(), "device-a");
        book.mark_deleted("device-a");
        {
            let store = SqliteLocalStore::open(&path).unwrap();
            store.replace_all("u1", &[book.clone()]).unwrap();
            store.replace_all("u1", &[entry.clone()]).unwrap();
        }

        let store = SqliteLocalStore::open(&path).unwrap();
        let document = CloudDocument::load(&store, "u1").unwrap();
        assert_eq!(document.books, vec![book]);
        assert_eq!(document.entries, vec![entry]);
        assert!(document.categories.is_empty());
    }

    #[test]
    fn test_upsert_fires_hook() {
        let store = SqliteLocalStore::open_in_memory().unwrap();
        let fired = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&fired);
        store.on_changed(Some(Arc::new(move |kind| seen.lock().unwrap().push(kind))));

        let mut book = Book::new("Trip", "EUR", "device-a");
        store.upsert("u1", book.clone()).unwrap();
        book.rename("Holiday", "device-a");
        store.upsert("u1", book.clone()).unwrap();

        assert_eq!(store.get_all::<Book>("u1").unwrap(), vec![book]);
        assert_eq!(fired.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_sync_state_round_trip() {
        let store = SqliteLocalStore::open_in_memory().unwrap();
        assert_eq!(store.load_sync_state("u1").unwrap(), None);

        let state = PersistedSyncState {
            enabled: true,
            last_sync_time: Some(now_millis()),
            conflicts: vec![Conflict {
                entity_type: EntityKind::Book,
                entity_id: "b1".to_string(),
                field: "book.name".parse::<ConflictField>().unwrap(),
                local_value: json!("Trip"),
                cloud_value: json!("Trip-Cloud"),
            }],
        };
        store.save_sync_state("u1", &state).unwrap();

        assert_eq!(store.load_sync_state("u1").unwrap(), Some(state));
    }

    #[test]
    fn test_wipe_user_clears_records_and_state() {
        let store = SqliteLocalStore::open_in_memory().unwrap();
        store
            .upsert("u1", Book::new("Trip", "EUR", "device-a"))
            .unwrap();
        store
            .save_sync_state("u1", &PersistedSyncState::default())
            .unwrap();

        store.wipe_user("u1").unwrap();

        assert!(store.get_all::<Book>("u1").unwrap().is_empty());
        assert_eq!(store.load_sync_state("u1").unwrap(), None);
    }
}
