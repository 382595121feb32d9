//! Local and remote store adapters.
//!
//! The local store holds the full record set of a user, tombstones and
//! archived records included. The remote store holds one document per user.

mod http;
mod memory;
mod sqlite;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::models::{Book, Category, Conflict, EntityKind, Entry, Syncable};
use crate::Result;

pub use http::HttpRemoteStore;
pub use memory::{MemoryLocalStore, MemoryRemoteStore};
pub use sqlite::SqliteLocalStore;

/// Data-change hook; receives the kind that was written
pub type ChangeHook = Arc<dyn Fn(EntityKind) + Send + Sync>;

/// Sync bookkeeping that outlives a process
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedSyncState {
    pub enabled: bool,
    #[serde(with = "crate::wire::timestamp_option")]
    pub last_sync_time: Option<DateTime<Utc>>,
    pub conflicts: Vec<Conflict>,
}

/// Synchronous local persistence
pub trait LocalStore: Send + Sync + 'static {
    /// Every record of one kind, tombstones included
    fn get_all<T: Syncable>(&self, user_id: &str) -> Result<Vec<T>>;

    /// Replace every record of one kind. Fires the change hook.
    fn replace_all<T: Syncable>(&self, user_id: &str, records: &[T]) -> Result<()>;

    /// Register or, with `None`, deregister the single change hook
    fn on_changed(&self, hook: Option<ChangeHook>);

    /// Insert or overwrite one record
    fn upsert<T: Syncable>(&self, user_id: &str, record: T) -> Result<()> {
        let mut records = self.get_all::<T>(user_id)?;
        match records.iter_mut().find(|existing| existing.id() == record.id()) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        self.replace_all(user_id, &records)
    }

    fn load_sync_state(&self, _user_id: &str) -> Result<Option<PersistedSyncState>> {
        Ok(None)
    }

    fn save_sync_state(&self, _user_id: &str, _state: &PersistedSyncState) -> Result<()> {
        Ok(())
    }

    /// Remove every record of a user. Only manual sign-out calls this.
    fn wipe_user(&self, user_id: &str) -> Result<()> {
        self.replace_all::<Book>(user_id, &[])?;
        self.replace_all::<Entry>(user_id, &[])?;
        self.replace_all::<Category>(user_id, &[])
    }
}

/// The engine-owned part of the per-user remote document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudDocument {
    pub books: Vec<Book>,
    pub entries: Vec<Entry>,
    pub categories: Vec<Category>,
}

impl CloudDocument {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.books.is_empty() && self.entries.is_empty() && self.categories.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.books.len() + self.entries.len() + self.categories.len()
    }

    /// Read the full record set of a user from a local store
    pub fn load<L: LocalStore>(local: &L, user_id: &str) -> Result<Self> {
        Ok(Self {
            books: local.get_all(user_id)?,
            entries: local.get_all(user_id)?,
            categories: local.get_all(user_id)?,
        })
    }

    /// Write every kind back to a local store
    pub fn persist<L: LocalStore>(&self, local: &L, user_id: &str) -> Result<()> {
        local.replace_all(user_id, &self.books)?;
        local.replace_all(user_id, &self.entries)?;
        local.replace_all(user_id, &self.categories)
    }

    pub fn mark_synced(&mut self) {
        self.books.iter_mut().for_each(Syncable::mark_synced);
        self.entries.iter_mut().for_each(Syncable::mark_synced);
        self.categories.iter_mut().for_each(Syncable::mark_synced);
    }
}

/// A record type that has a slot in [`CloudDocument`]
pub trait DocumentRecord: Syncable {
    fn slot(document: &CloudDocument) -> &Vec<Self>;

    fn slot_mut(document: &mut CloudDocument) -> &mut Vec<Self>;
}

impl DocumentRecord for Book {
    fn slot(document: &CloudDocument) -> &Vec<Self> {
        &document.books
    }

    fn slot_mut(document: &mut CloudDocument) -> &mut Vec<Self> {
        &mut document.books
    }
}

impl DocumentRecord for Entry {
    fn slot(document: &CloudDocument) -> &Vec<Self> {
        &document.entries
    }

    fn slot_mut(document: &mut CloudDocument) -> &mut Vec<Self> {
        &mut document.entries
    }
}

impl DocumentRecord for Category {
    fn slot(document: &CloudDocument) -> &Vec<Self> {
        &document.categories
    }

    fn slot_mut(document: &mut CloudDocument) -> &mut Vec<Self> {
        &mut document.categories
    }
}

/// Failures reported by a remote store
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("{0}")]
    Network(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed remote document: {0}")]
    Malformed(String),
    #[error("{0}")]
    Other(String),
}

impl RemoteError {
    /// Whether the error means the session is no longer usable
    #[must_use]
    pub const fn is_session(&self) -> bool {
        matches!(self, Self::PermissionDenied(_) | Self::Unauthenticated(_))
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Notification delivered through a remote subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEvent {
    /// Fresh snapshot of the document; `None` when it no longer exists
    Changed(Option<CloudDocument>),
    Failed(RemoteError),
}

/// Live change stream of one remote document; dropping it unsubscribes
pub struct RemoteSubscription {
    events: mpsc::UnboundedReceiver<RemoteEvent>,
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl RemoteSubscription {
    pub fn new(
        events: mpsc::UnboundedReceiver<RemoteEvent>,
        cancel: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            events,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Wait for the next event; `None` once the store closed the stream
    pub async fn next(&mut self) -> Option<RemoteEvent> {
        self.events.recv().await
    }

    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for RemoteSubscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for RemoteSubscription {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RemoteSubscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Asynchronous per-user document store
pub trait RemoteStore: Send + Sync + 'static {
    /// Read the user's document; `None` if it was never written
    fn download(
        &self,
        user_id: &str,
    ) -> impl Future<Output = RemoteResult<Option<CloudDocument>>> + Send;

    /// Merge-write the engine-owned keys, leaving unrelated fields alone
    fn upload(
        &self,
        user_id: &str,
        document: &CloudDocument,
    ) -> impl Future<Output = RemoteResult<()>> + Send;

    /// Subscribe to changes of the user's document
    fn subscribe(
        &self,
        user_id: &str,
    ) -> impl Future<Output = RemoteResult<RemoteSubscription>> + Send;

    /// Whether subscriptions report this client's own uploads. Stores that
    /// filter them out return `false`.
    fn echoes_uploads(&self) -> bool {
        true
    }
}
