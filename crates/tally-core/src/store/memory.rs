//! In-process store implementations.
//!
//! `MemoryRemoteStore` is cheap to clone; clones share one document space so
//! several engines can play separate devices of the same user.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use super::{
    ChangeHook, CloudDocument, LocalStore, PersistedSyncState, RemoteError, RemoteEvent,
    RemoteResult, RemoteStore, RemoteSubscription,
};
use crate::models::{EntityKind, Syncable};
use crate::wire::{decode_document, encode_document, merge_into_document};
use crate::Result;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Local store kept in memory, records held as JSON values
#[derive(Default)]
pub struct MemoryLocalStore {
    records: Mutex<HashMap<(String, EntityKind), Vec<Value>>>,
    sync_state: Mutex<HashMap<String, PersistedSyncState>>,
    hook: Mutex<Option<ChangeHook>>,
    writes: AtomicUsize,
}

impl MemoryLocalStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `replace_all` calls
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn fire(&self, kind: EntityKind) {
        let hook = lock(&self.hook).clone();
        if let Some(hook) = hook {
            hook(kind);
        }
    }
}

impl LocalStore for MemoryLocalStore {
    fn get_all<T: Syncable>(&self, user_id: &str) -> Result<Vec<T>> {
        let values = lock(&self.records)
            .get(&(user_id.to_string(), T::KIND))
            .cloned()
            .unwrap_or_default();
        values
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(Into::into))
            .collect()
    }

    fn replace_all<T: Syncable>(&self, user_id: &str, records: &[T]) -> Result<()> {
        let values = records
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        lock(&self.records).insert((user_id.to_string(), T::KIND), values);
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.fire(T::KIND);
        Ok(())
    }

    fn on_changed(&self, hook: Option<ChangeHook>) {
        *lock(&self.hook) = hook;
    }

    fn load_sync_state(&self, user_id: &str) -> Result<Option<PersistedSyncState>> {
        Ok(lock(&self.sync_state).get(user_id).cloned())
    }

    fn save_sync_state(&self, user_id: &str, state: &PersistedSyncState) -> Result<()> {
        lock(&self.sync_state).insert(user_id.to_string(), state.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Faults {
    offline: bool,
    uploads_failing: bool,
    permission_denied: bool,
    failures_remaining: usize,
    delay: Option<Duration>,
}

type Subscribers = HashMap<String, Vec<(u64, mpsc::UnboundedSender<RemoteEvent>)>>;

#[derive(Default)]
struct RemoteInner {
    documents: Mutex<HashMap<String, Value>>,
    subscribers: Mutex<Subscribers>,
    next_subscriber: AtomicU64,
    faults: Mutex<Faults>,
    downloads: AtomicUsize,
    uploads: AtomicUsize,
    quiet_uploads: AtomicBool,
}

/// Shared in-process document store with fault injection
#[derive(Clone, Default)]
pub struct MemoryRemoteStore {
    inner: Arc<RemoteInner>,
}

impl MemoryRemoteStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails with a network error while offline
    pub fn set_offline(&self, offline: bool) {
        lock(&self.inner.faults).offline = offline;
    }

    /// The next `count` calls fail with a network error
    pub fn fail_next(&self, count: usize) {
        lock(&self.inner.faults).failures_remaining = count;
    }

    /// Every upload fails with a network error; downloads still succeed
    pub fn fail_uploads(&self, failing: bool) {
        lock(&self.inner.faults).uploads_failing = failing;
    }

    /// With `false`, uploads are not reported to subscribers, as with a
    /// store that filters out its own writes
    pub fn set_upload_echo(&self, echo: bool) {
        self.inner.quiet_uploads.store(!echo, Ordering::SeqCst);
    }

    /// Every call, subscribing included, fails with a permission error
    pub fn deny_permission(&self, denied: bool) {
        lock(&self.inner.faults).permission_denied = denied;
    }

    /// Delay every download and upload
    pub fn set_delay(&self, delay: Option<Duration>) {
        lock(&self.inner.faults).delay = delay;
    }

    /// Push an error through every subscription of a user
    pub fn emit_error(&self, user_id: &str, error: RemoteError) {
        self.notify(user_id, &RemoteEvent::Failed(error));
    }

    /// Write a raw document as another client would, notifying subscribers
    pub fn put_raw(&self, user_id: &str, document: Value) -> RemoteResult<()> {
        let decoded = decode(&document)?;
        lock(&self.inner.documents).insert(user_id.to_string(), document);
        self.notify(user_id, &RemoteEvent::Changed(Some(decoded)));
        Ok(())
    }

    /// Raw stored document, unrelated fields included
    #[must_use]
    pub fn raw(&self, user_id: &str) -> Option<Value> {
        lock(&self.inner.documents).get(user_id).cloned()
    }

    /// Decoded stored document
    #[must_use]
    pub fn document(&self, user_id: &str) -> Option<CloudDocument> {
        self.raw(user_id).and_then(|raw| decode(&raw).ok())
    }

    pub fn download_count(&self) -> usize {
        self.inner.downloads.load(Ordering::SeqCst)
    }

    pub fn upload_count(&self) -> usize {
        self.inner.uploads.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn subscriber_count(&self, user_id: &str) -> usize {
        lock(&self.inner.subscribers)
            .get(user_id)
            .map_or(0, |senders| {
                senders.iter().filter(|(_, sender)| !sender.is_closed()).count()
            })
    }

    async fn before_call(&self) -> RemoteResult<()> {
        let delay = lock(&self.inner.faults).delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut faults = lock(&self.inner.faults);
        if faults.permission_denied {
            return Err(RemoteError::PermissionDenied(
                "missing or insufficient permissions".to_string(),
            ));
        }
        if faults.offline {
            return Err(RemoteError::Network("remote store is offline".to_string()));
        }
        if faults.failures_remaining > 0 {
            faults.failures_remaining -= 1;
            return Err(RemoteError::Network("simulated network failure".to_string()));
        }
        Ok(())
    }

    fn notify(&self, user_id: &str, event: &RemoteEvent) {
        let senders: Vec<_> = {
            let mut subscribers = lock(&self.inner.subscribers);
            let Some(senders) = subscribers.get_mut(user_id) else {
                return;
            };
            senders.retain(|(_, sender)| !sender.is_closed());
            senders.iter().map(|(_, sender)| sender.clone()).collect()
        };
        for sender in senders {
            // A closed receiver just means the subscriber went away
            let _ = sender.send(event.clone());
        }
    }
}

fn decode(raw: &Value) -> RemoteResult<CloudDocument> {
    decode_document(raw.clone()).map_err(|error| RemoteError::Malformed(error.to_string()))
}

fn unsubscribe(inner: &Weak<RemoteInner>, user_id: &str, id: u64) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let mut subscribers = lock(&inner.subscribers);
    if let Some(senders) = subscribers.get_mut(user_id) {
        senders.retain(|(subscriber, _)| *subscriber != id);
    }
}

impl RemoteStore for MemoryRemoteStore {
    async fn download(&self, user_id: &str) -> RemoteResult<Option<CloudDocument>> {
        self.inner.downloads.fetch_add(1, Ordering::SeqCst);
        self.before_call().await?;
        self.raw(user_id).as_ref().map(decode).transpose()
    }

    async fn upload(&self, user_id: &str, document: &CloudDocument) -> RemoteResult<()> {
        self.inner.uploads.fetch_add(1, Ordering::SeqCst);
        self.before_call().await?;
        if lock(&self.inner.faults).uploads_failing {
            return Err(RemoteError::Network("upload rejected".to_string()));
        }
        let update =
            encode_document(document).map_err(|error| RemoteError::Other(error.to_string()))?;
        let snapshot = {
            let mut documents = lock(&self.inner.documents);
            let merged = merge_into_document(documents.remove(user_id), update);
            documents.insert(user_id.to_string(), merged.clone());
            merged
        };
        if self.echoes_uploads() {
            self.notify(user_id, &RemoteEvent::Changed(Some(decode(&snapshot)?)));
        }
        Ok(())
    }

    async fn subscribe(&self, user_id: &str) -> RemoteResult<RemoteSubscription> {
        if lock(&self.inner.faults).permission_denied {
            return Err(RemoteError::PermissionDenied(
                "missing or insufficient permissions".to_string(),
            ));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.subscribers)
            .entry(user_id.to_string())
            .or_default()
            .push((id, sender));

        let inner = Arc::downgrade(&self.inner);
        let user_id = user_id.to_string();
        Ok(RemoteSubscription::new(receiver, move || {
            unsubscribe(&inner, &user_id, id);
        }))
    }

    fn echoes_uploads(&self) -> bool {
        !self.inner.quiet_uploads.load(Ordering::SeqCst)
    }
}
