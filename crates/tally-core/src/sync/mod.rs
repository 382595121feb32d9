//! Sync orchestrator.
//!
//! A [`SyncEngine`] drives the pull, merge, push cycle between a local store
//! and the user's remote document. Cycles are single-flight: a trigger that
//! arrives while a cycle runs is rejected, never queued. The same guard
//! covers merges started by the realtime listener, so the two can never
//! interleave their local writes.

mod debounce;
mod realtime;
mod retry;


use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::auth::{AuthProvider, AuthSession};
use crate::config::SyncSettings;
use crate::conflicts::{ConflictTracker, Resolutions};
use crate::merge::merge_records;
use crate::models::{Book, Category, Conflict, EntityKind, Entry, Syncable};
use crate::state::{SyncEvent, SyncPhase, SyncResult, SyncStatus};
use crate::store::{
    CloudDocument, DocumentRecord, LocalStore, PersistedSyncState, RemoteError, RemoteResult,
    RemoteStore,
};
use crate::util::now_millis;
use crate::{Error, Result};

pub use debounce::Debouncer;
pub use realtime::RealtimeListener;
pub use retry::{Backoff, ExponentialBackoff, LinearBackoff};

const EVENT_CAPACITY: usize = 64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears a flag when dropped
struct FlagGuard<'a>(&'a AtomicBool);

impl<'a> FlagGuard<'a> {
    /// Set `flag`, failing if it was already set
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }

    /// Set `flag` regardless of its current value
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Merged record set of all kinds
#[derive(Debug, Default)]
struct Reconciled {
    document: CloudDocument,
    conflicts: Vec<Conflict>,
    local_changes: bool,
}

/// Merge both sides. Only records taken from the remote copy get their sync
/// base advanced; local changes keep theirs until an upload carries them.
fn reconcile(local: &CloudDocument, remote: &CloudDocument) -> Reconciled {
    let mut reconciled = Reconciled::default();
    reconcile_kind::<Book>(local, remote, &mut reconciled);
    reconcile_kind::<Entry>(local, remote, &mut reconciled);
    reconcile_kind::<Category>(local, remote, &mut reconciled);
    reconciled
}

fn reconcile_kind<T: DocumentRecord>(
    local: &CloudDocument,
    remote: &CloudDocument,
    reconciled: &mut Reconciled,
) {
    let records = match merge_records(T::slot(local), T::slot(remote)) {
        Ok(outcome) => {
            reconciled.local_changes |= outcome.has_local_changes();
            reconciled.conflicts.extend(outcome.conflicts);
            outcome
                .records
                .into_iter()
                .map(|merged| {
                    let mut record = merged.record;
                    if !merged.source.is_local_change() {
                        record.mark_synced();
                    }
                    record
                })
                .collect()
        }
        Err(error) => {
            tracing::warn!("Degraded merge of {} records, keeping remote: {error}", T::KIND);
            let mut records = distinct_by_id(T::slot(remote));
            records.iter_mut().for_each(T::mark_synced);
            records
        }
    };
    *T::slot_mut(&mut reconciled.document) = records;
}

/// Drop records without an id and keep the most recently updated copy of
/// each duplicated id
fn distinct_by_id<T: Syncable>(records: &[T]) -> Vec<T> {
    let mut latest: BTreeMap<&str, &T> = BTreeMap::new();
    for record in records.iter().filter(|record| !record.id().is_empty()) {
        latest
            .entry(record.id())
            .and_modify(|kept| {
                if record.meta().effective_updated_at() > kept.meta().effective_updated_at() {
                    *kept = record;
                }
            })
            .or_insert(record);
    }
    latest.into_values().cloned().collect()
}

/// Advance the sync base of local records still at the version `pushed`
/// carried. Returns whether anything changed.
fn advance_synced(local: &mut CloudDocument, pushed: &CloudDocument) -> bool {
    let books = advance_kind::<Book>(local, pushed);
    let entries = advance_kind::<Entry>(local, pushed);
    let categories = advance_kind::<Category>(local, pushed);
    books || entries || categories
}

fn advance_kind<T: DocumentRecord>(local: &mut CloudDocument, pushed: &CloudDocument) -> bool {
    let versions: HashMap<&str, u64> = T::slot(pushed)
        .iter()
        .map(|record| (record.id(), record.meta().version))
        .collect();
    let mut changed = false;
    for record in T::slot_mut(local) {
        let meta = record.meta();
        let at_pushed = versions.get(record.id()) == Some(&meta.version);
        if at_pushed && meta.last_synced_version != Some(meta.version) {
            record.mark_synced();
            changed = true;
        }
    }
    changed
}

fn failure_message(error: &Error) -> String {
    match error {
        Error::Network(message) => format!("Network error: {message}"),
        error if error.is_retryable() => format!("Network error: {error}"),
        error => format!("Sync failed: {error}"),
    }
}

struct EngineInner<L, R, A> {
    local: Arc<L>,
    remote: Arc<R>,
    auth: Arc<A>,
    settings: SyncSettings,
    device_id: String,
    user_id: Mutex<Option<String>>,
    enabled: AtomicBool,
    in_progress: AtomicBool,
    writing_local: AtomicBool,
    expect_echo: AtomicBool,
    listening: AtomicBool,
    started: AtomicBool,
    phase: Mutex<SyncPhase>,
    last_sync_time: Mutex<Option<DateTime<Utc>>>,
    conflicts: ConflictTracker,
    debouncer: Debouncer,
    runtime: Mutex<Option<Handle>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<SyncEvent>,
}

/// Offline-first sync orchestrator; cheap to clone
pub struct SyncEngine<L, R, A> {
    inner: Arc<EngineInner<L, R, A>>,
}

impl<L, R, A> Clone for SyncEngine<L, R, A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L, R, A> std::fmt::Debug for SyncEngine<L, R, A> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SyncEngine")
            .field("device_id", &self.inner.device_id)
            .field("enabled", &self.inner.enabled.load(Ordering::Acquire))
            .field("in_progress", &self.inner.in_progress.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl<L: LocalStore, R: RemoteStore, A: AuthProvider> SyncEngine<L, R, A> {
    /// Build an engine. Persisted sync state of the signed-in user, if any,
    /// is restored right away.
    pub fn new(
        local: Arc<L>,
        remote: Arc<R>,
        auth: Arc<A>,
        settings: SyncSettings,
        device_id: impl Into<String>,
    ) -> Self {
        let settings = settings.normalized();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let engine = Self {
            inner: Arc::new(EngineInner {
                local,
                remote,
                auth,
                debouncer: Debouncer::new(settings.debounce),
                settings,
                device_id: device_id.into(),
                user_id: Mutex::new(None),
                enabled: AtomicBool::new(false),
                in_progress: AtomicBool::new(false),
                writing_local: AtomicBool::new(false),
                expect_echo: AtomicBool::new(false),
                listening: AtomicBool::new(false),
                started: AtomicBool::new(false),
                phase: Mutex::new(SyncPhase::Idle),
                last_sync_time: Mutex::new(None),
                conflicts: ConflictTracker::new(),
                runtime: Mutex::new(None),
                listener: Mutex::new(None),
                events,
            }),
        };
        if let Err(error) = engine.restore_state() {
            tracing::warn!("Failed to restore sync state: {error}");
        }
        engine
    }

    fn from_inner(inner: Arc<EngineInner<L, R, A>>) -> Self {
        Self { inner }
    }

    fn downgrade(&self) -> Weak<EngineInner<L, R, A>> {
        Arc::downgrade(&self.inner)
    }

    pub fn local_store(&self) -> &Arc<L> {
        &self.inner.local
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.inner.settings
    }

    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    /// Subscribe to phase, status and outcome notifications
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    pub fn is_in_progress(&self) -> bool {
        self.inner.in_progress.load(Ordering::Acquire)
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            enabled: self.is_enabled(),
            last_sync_time: *lock(&self.inner.last_sync_time),
            in_progress: self.is_in_progress(),
            conflict_count: self.inner.conflicts.len(),
            phase: *lock(&self.inner.phase),
        }
    }

    /// Conflicts waiting for a decision
    pub fn conflicts(&self) -> Vec<Conflict> {
        self.inner.conflicts.list()
    }

    /// User the engine works for: the last synced user, else the session's
    pub fn current_user(&self) -> Option<String> {
        lock(&self.inner.user_id).clone().or_else(|| {
            self.inner
                .auth
                .current_session()
                .map(|session| session.user.id)
        })
    }

    /// Load the enabled flag, last sync time and conflicts persisted for
    /// the signed-in user
    pub fn restore_state(&self) -> Result<()> {
        let Some(user_id) = self.current_user() else {
            return Ok(());
        };
        let Some(state) = self.inner.local.load_sync_state(&user_id)? else {
            return Ok(());
        };
        self.inner.enabled.store(state.enabled, Ordering::Release);
        *lock(&self.inner.last_sync_time) = state.last_sync_time;
        self.inner.conflicts.replace(state.conflicts);
        tracing::debug!("Restored sync state (enabled: {})", state.enabled);
        Ok(())
    }

    /// Register the local change hook and, when sync is enabled, start the
    /// realtime listener. Must be called inside a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let runtime = Handle::try_current().map_err(|_| {
            Error::InvalidInput("the sync engine must be started inside a tokio runtime".into())
        })?;
        *lock(&self.inner.runtime) = Some(runtime);

        let engine = self.downgrade();
        self.inner.local.on_changed(Some(Arc::new(move |kind| {
            if let Some(inner) = engine.upgrade() {
                SyncEngine::from_inner(inner).notify_local_change(kind);
            }
        })));
        self.inner.started.store(true, Ordering::Release);

        if self.is_enabled() {
            self.start_listener();
        }
        tracing::info!("Sync engine started");
        Ok(())
    }

    /// Deregister the change hook, cancel the debounce timer and tear down
    /// the realtime listener. An in-flight cycle runs to completion.
    pub fn shutdown(&self) {
        self.inner.local.on_changed(None);
        self.inner.debouncer.cancel();
        self.stop_listener();
        self.inner.started.store(false, Ordering::Release);
        tracing::info!("Sync engine stopped");
    }

    /// Local data-change notification; schedules a debounced auto-sync
    pub fn notify_local_change(&self, kind: EntityKind) {
        if self.inner.writing_local.load(Ordering::Acquire) {
            return;
        }
        if !self.is_enabled() {
            return;
        }
        tracing::debug!("Local {kind} records changed");
        self.schedule_sync();
    }

    /// Arm (or re-arm) the debounce timer for an automatic sync
    fn schedule_sync(&self) {
        let runtime = lock(&self.inner.runtime)
            .clone()
            .or_else(|| Handle::try_current().ok());
        let Some(runtime) = runtime else {
            tracing::debug!("No runtime available, auto-sync not scheduled");
            return;
        };

        let engine = self.downgrade();
        self.inner.debouncer.trigger(&runtime, move || async move {
            let Some(inner) = engine.upgrade() else {
                return;
            };
            let engine = SyncEngine::from_inner(inner);
            if engine.is_in_progress() {
                tracing::debug!("Debounced sync skipped, a cycle is already running");
                return;
            }
            engine.sync_now(false).await;
        });
    }

    /// Turn sync on and run one full cycle so edits made while disabled
    /// are merged rather than overwritten
    pub async fn enable_sync(&self) -> SyncResult {
        self.inner.enabled.store(true, Ordering::Release);
        self.persist_state();
        tracing::info!("Sync enabled");
        if self.inner.started.load(Ordering::Acquire) {
            self.start_listener();
        }
        self.emit_status();
        self.sync_now(true).await
    }

    pub fn disable_sync(&self) {
        self.inner.enabled.store(false, Ordering::Release);
        self.inner.debouncer.cancel();
        self.stop_listener();
        self.persist_state();
        tracing::info!("Sync disabled");
        self.emit_status();
    }

    pub fn clear_conflicts(&self) {
        self.inner.conflicts.clear();
        self.persist_state();
        self.emit_status();
    }

    /// Run one pull, merge, push cycle.
    ///
    /// Automatic triggers (`manual == false`) are ignored while sync is
    /// disabled. A cycle already in flight makes this return at once.
    pub async fn sync_now(&self, manual: bool) -> SyncResult {
        if !manual && !self.is_enabled() {
            tracing::debug!("Auto-sync suppressed, sync is disabled");
            return SyncResult::disabled();
        }
        let Some(guard) = FlagGuard::acquire(&self.inner.in_progress) else {
            tracing::debug!("Sync requested while another cycle is running");
            return SyncResult::already_syncing();
        };
        self.emit_status();

        let result = self.run_with_retry().await;

        drop(guard);
        self.set_phase(SyncPhase::Idle);
        self.emit(SyncEvent::Completed(result.clone()));
        self.emit_status();
        result
    }

    async fn run_with_retry(&self) -> SyncResult {
        self.set_phase(SyncPhase::AuthCheck);
        let Some(session) = self.wait_for_session().await else {
            tracing::warn!("No authenticated session, aborting sync");
            self.set_phase(SyncPhase::Fatal);
            self.invalidate_session();
            return SyncResult::session_expired();
        };
        let user_id = session.user.id;
        *lock(&self.inner.user_id) = Some(user_id.clone());

        let backoff = LinearBackoff::from_settings(&self.inner.settings);
        let mut attempt = 1;
        loop {
            match self.run_cycle(&user_id).await {
                Ok(conflicts) => return self.finish_success(&user_id, conflicts),
                Err(error) if error.is_session() => {
                    tracing::error!("Sync rejected the session: {error}");
                    self.set_phase(SyncPhase::Fatal);
                    self.force_sign_out().await;
                    return SyncResult::session_expired();
                }
                Err(error) if error.is_retryable() && attempt < backoff.max_attempts() => {
                    let delay = backoff.delay_after(attempt);
                    tracing::warn!(
                        "Sync attempt {attempt}/{} failed, retrying in {delay:?}: {error}",
                        backoff.max_attempts()
                    );
                    self.set_phase(SyncPhase::Retry);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    tracing::error!("Sync failed after {attempt} attempt(s): {error}");
                    return SyncResult::failed(failure_message(&error));
                }
            }
        }
    }

    /// Poll for a live session; `None` when the wait is exhausted
    async fn wait_for_session(&self) -> Option<AuthSession> {
        let attempts = self.inner.settings.auth_wait_attempts;
        for attempt in 1..=attempts {
            if let Some(session) = self.inner.auth.current_session() {
                return Some(session);
            }
            if attempt < attempts {
                tracing::debug!("Waiting for session ({attempt}/{attempts})");
                tokio::time::sleep(self.inner.settings.auth_wait_interval).await;
            }
        }
        None
    }

    /// One attempt: refresh, pull, merge, persist, push. Returns the
    /// conflicts the merge detected.
    async fn run_cycle(&self, user_id: &str) -> Result<Vec<Conflict>> {
        self.set_phase(SyncPhase::TokenRefresh);
        self.refresh_token().await?;

        self.set_phase(SyncPhase::FirstSyncCheck);
        let remote = self.remote_call(self.inner.remote.download(user_id)).await?;
        let Some(remote) = remote else {
            self.first_sync(user_id).await?;
            return Ok(Vec::new());
        };

        self.set_phase(SyncPhase::Pull);
        tracing::debug!("Pulled {} remote record(s)", remote.len());

        self.set_phase(SyncPhase::LocalRead);
        let local = CloudDocument::load(self.inner.local.as_ref(), user_id)?;

        self.set_phase(SyncPhase::Merge);
        let reconciled = reconcile(&local, &remote);

        self.set_phase(SyncPhase::PersistLocal);
        self.write_local(user_id, &reconciled.document)?;

        self.set_phase(SyncPhase::Push);
        self.push_merged(user_id, reconciled.document).await?;

        Ok(reconciled.conflicts)
    }

    /// Remote document is missing: upload the local set as its initial state
    async fn first_sync(&self, user_id: &str) -> Result<()> {
        self.set_phase(SyncPhase::LocalRead);
        let local = CloudDocument::load(self.inner.local.as_ref(), user_id)?;

        self.set_phase(SyncPhase::Push);
        self.push(user_id, &local).await?;
        tracing::info!("First sync: uploaded {} local record(s)", local.len());
        Ok(())
    }

    fn finish_success(&self, user_id: &str, conflicts: Vec<Conflict>) -> SyncResult {
        *lock(&self.inner.last_sync_time) = Some(now_millis());
        if !conflicts.is_empty() {
            tracing::warn!("Sync detected {} conflict(s)", conflicts.len());
            self.inner.conflicts.record(&conflicts);
            self.emit(SyncEvent::ConflictsDetected(conflicts.clone()));
        }
        self.persist_state_for(user_id);
        tracing::info!("Sync completed");
        SyncResult::synced(conflicts)
    }

    async fn refresh_token(&self) -> Result<AuthSession> {
        let timeout = self.inner.settings.request_timeout;
        match tokio::time::timeout(timeout, self.inner.auth.refresh_session()).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(Error::TokenRefresh(format!("timed out after {timeout:?}"))),
        }
    }

    /// Bound a remote call by the request timeout
    async fn remote_call<T>(&self, call: impl Future<Output = RemoteResult<T>>) -> Result<T> {
        let timeout = self.inner.settings.request_timeout;
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(RemoteError::Timeout(timeout).into()),
        }
    }

    /// Upload the full record set; a subscribed listener swallows the echo
    /// when the store reports our own uploads
    async fn push(&self, user_id: &str, document: &CloudDocument) -> Result<()> {
        let arm_echo =
            self.inner.listening.load(Ordering::Acquire) && self.inner.remote.echoes_uploads();
        if arm_echo {
            self.inner.expect_echo.store(true, Ordering::Release);
        }
        let result = self
            .remote_call(self.inner.remote.upload(user_id, document))
            .await;
        if result.is_err() && arm_echo {
            self.inner.expect_echo.store(false, Ordering::Release);
        }
        result
    }

    /// Upload a merged set as synced, then advance the local sync base of
    /// the records the upload carried
    async fn push_merged(&self, user_id: &str, mut document: CloudDocument) -> Result<()> {
        document.mark_synced();
        self.push(user_id, &document).await?;

        let mut local = CloudDocument::load(self.inner.local.as_ref(), user_id)?;
        if advance_synced(&mut local, &document) {
            self.write_local(user_id, &local)?;
        }
        Ok(())
    }

    /// Write all kinds without re-triggering the debounced auto-sync
    fn write_local(&self, user_id: &str, document: &CloudDocument) -> Result<()> {
        let _writing = FlagGuard::raise(&self.inner.writing_local);
        document.persist(self.inner.local.as_ref(), user_id)
    }

    /// Apply resolutions to the full local record set, merge with the
    /// current remote copy, persist and push. The tracker then holds only
    /// the conflicts that merge found.
    pub async fn resolve_conflicts(&self, resolutions: &Resolutions) -> Result<usize> {
        let Some(_guard) = FlagGuard::acquire(&self.inner.in_progress) else {
            return Err(Error::Busy);
        };
        let user_id = self
            .current_user()
            .ok_or_else(|| Error::Session("not signed in".to_string()))?;

        let mut document = CloudDocument::load(self.inner.local.as_ref(), &user_id)?;
        let applied = self
            .inner
            .conflicts
            .apply(&mut document, resolutions, &self.inner.device_id)?;

        let mut conflicts = Vec::new();
        if let Some(remote) = self.remote_call(self.inner.remote.download(&user_id)).await? {
            let reconciled = reconcile(&document, &remote);
            document = reconciled.document;
            conflicts = reconciled.conflicts;
        }
        self.write_local(&user_id, &document)?;
        self.push_merged(&user_id, document).await?;

        self.inner.conflicts.clear();
        if !conflicts.is_empty() {
            tracing::warn!("Resolving left {} new conflict(s)", conflicts.len());
            self.inner.conflicts.record(&conflicts);
            self.emit(SyncEvent::ConflictsDetected(conflicts));
        }
        *lock(&self.inner.last_sync_time) = Some(now_millis());
        self.persist_state_for(&user_id);
        tracing::info!("Resolved {applied} conflict(s)");
        self.emit_status();
        Ok(applied)
    }

    /// Merge a snapshot delivered by the realtime listener into the local
    /// store. Runs under the single-flight guard; if a cycle is running the
    /// change is picked up by a debounced sync instead.
    fn apply_remote_snapshot(&self, user_id: &str, remote: &CloudDocument) {
        let Some(_guard) = FlagGuard::acquire(&self.inner.in_progress) else {
            tracing::debug!("Remote change arrived during a sync cycle, rescheduling");
            self.schedule_sync();
            return;
        };

        let local = match CloudDocument::load(self.inner.local.as_ref(), user_id) {
            Ok(local) => local,
            Err(error) => {
                tracing::error!("Failed to read local records for remote change: {error}");
                return;
            }
        };
        let reconciled = reconcile(&local, remote);
        if let Err(error) = self.write_local(user_id, &reconciled.document) {
            tracing::error!("Failed to persist remote change: {error}");
            return;
        }
        tracing::debug!("Applied remote change ({} record(s))", reconciled.document.len());

        if !reconciled.conflicts.is_empty() {
            tracing::warn!("Remote change produced {} conflict(s)", reconciled.conflicts.len());
            self.inner.conflicts.record(&reconciled.conflicts);
            self.emit(SyncEvent::ConflictsDetected(reconciled.conflicts));
            self.persist_state_for(user_id);
        }
        if reconciled.local_changes {
            self.schedule_sync();
        }
        self.emit_status();
    }

    /// Swallow the notification caused by our own upload
    fn take_echo(&self) -> bool {
        self.inner.expect_echo.swap(false, Ordering::AcqRel)
    }

    fn start_listener(&self) {
        let Some(user_id) = self.current_user() else {
            tracing::debug!("No signed-in user, realtime listener not started");
            return;
        };
        let runtime = lock(&self.inner.runtime).clone();
        let Some(runtime) = runtime else {
            return;
        };

        let mut listener = lock(&self.inner.listener);
        if listener.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let task = RealtimeListener::new(self.clone(), user_id);
        *listener = Some(runtime.spawn(task.run()));
    }

    fn stop_listener(&self) {
        if let Some(handle) = lock(&self.inner.listener).take() {
            handle.abort();
        }
        self.inner.listening.store(false, Ordering::Release);
        self.inner.expect_echo.store(false, Ordering::Release);
    }

    /// Session is gone: tear down subscriptions and forget the user.
    /// Local records are kept.
    fn invalidate_session(&self) {
        tracing::warn!("Session invalidated, sign-in required");
        self.inner.debouncer.cancel();
        self.stop_listener();
        lock(&self.inner.user_id).take();
        self.emit(SyncEvent::SessionInvalidated);
        self.emit_status();
    }

    async fn force_sign_out(&self) {
        if let Err(error) = self.inner.auth.sign_out().await {
            tracing::warn!("Sign-out after session failure failed: {error}");
        }
        self.invalidate_session();
    }

    /// Manual sign-out. Only this path may wipe local data.
    pub async fn sign_out_and_reset(&self, wipe_local: bool) -> Result<()> {
        let user_id = self.current_user();
        self.shutdown();
        self.inner.auth.sign_out().await?;

        if let Some(user_id) = &user_id {
            if wipe_local {
                self.inner.local.wipe_user(user_id)?;
            }
        }
        lock(&self.inner.user_id).take();
        lock(&self.inner.last_sync_time).take();
        self.inner.conflicts.clear();
        self.inner.enabled.store(false, Ordering::Release);
        tracing::info!("Signed out (local data wiped: {wipe_local})");
        self.emit_status();
        Ok(())
    }

    fn persist_state(&self) {
        if let Some(user_id) = self.current_user() {
            self.persist_state_for(&user_id);
        }
    }

    fn persist_state_for(&self, user_id: &str) {
        let state = PersistedSyncState {
            enabled: self.is_enabled(),
            last_sync_time: *lock(&self.inner.last_sync_time),
            conflicts: self.inner.conflicts.list(),
        };
        if let Err(error) = self.inner.local.save_sync_state(user_id, &state) {
            tracing::warn!("Failed to save sync state: {error}");
        }
    }

    fn set_phase(&self, phase: SyncPhase) {
        let changed = {
            let mut current = lock(&self.inner.phase);
            let changed = *current != phase;
            *current = phase;
            changed
        };
        if changed {
            tracing::debug!("Sync phase: {phase}");
            self.emit(SyncEvent::PhaseChanged(phase));
        }
    }

    fn emit_status(&self) {
        self.emit(SyncEvent::StatusChanged(self.status()));
    }

    fn emit(&self, event: SyncEvent) {
        // No receivers is fine
        let _ = self.inner.events.send(event);
    }
}
