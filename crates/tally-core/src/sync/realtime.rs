//! Realtime listener: applies remote document changes as they arrive.

use std::sync::atomic::Ordering;

use tokio::time::Instant;

use super::{Backoff, ExponentialBackoff, SyncEngine};
use crate::auth::AuthProvider;
use crate::store::{
    CloudDocument, LocalStore, RemoteError, RemoteEvent, RemoteStore, RemoteSubscription,
};

/// Subscription loop for one user's remote document.
///
/// Echo suppression and the single-flight guard live on the engine, which
/// owns the push side; the notification spacing is tracked here.
pub struct RealtimeListener<L, R, A> {
    engine: SyncEngine<L, R, A>,
    user_id: String,
    last_processed: Option<Instant>,
}

impl<L: LocalStore, R: RemoteStore, A: AuthProvider> RealtimeListener<L, R, A> {
    pub fn new(engine: SyncEngine<L, R, A>, user_id: impl Into<String>) -> Self {
        Self {
            engine,
            user_id: user_id.into(),
            last_processed: None,
        }
    }

    /// Subscribe and process notifications until the subscription ends or
    /// the session is rejected
    pub async fn run(mut self) {
        let Some(mut subscription) = self.connect().await else {
            return;
        };
        self.set_listening(true);
        tracing::info!("Realtime listener subscribed");

        while let Some(event) = subscription.next().await {
            match event {
                RemoteEvent::Changed(snapshot) => self.on_change(snapshot.as_ref()),
                RemoteEvent::Failed(error) if error.is_session() => {
                    tracing::warn!("Realtime subscription rejected the session: {error}");
                    drop(subscription);
                    self.set_listening(false);
                    // No sign-out from here: the engine tears the listener down
                    self.engine.invalidate_session();
                    return;
                }
                RemoteEvent::Failed(error) => {
                    tracing::warn!("Realtime subscription error: {error}");
                }
            }
        }
        self.set_listening(false);
        tracing::debug!("Realtime subscription closed");
    }

    fn set_listening(&self, listening: bool) {
        self.engine.inner.listening.store(listening, Ordering::Release);
    }

    /// Set up the subscription, waiting for auth with capped exponential
    /// backoff
    async fn connect(&self) -> Option<RemoteSubscription> {
        let inner = &self.engine.inner;
        let backoff = ExponentialBackoff::realtime(&inner.settings);

        for attempt in 1..=backoff.max_attempts() {
            if inner.auth.current_session().is_some() {
                match inner.remote.subscribe(&self.user_id).await {
                    Ok(subscription) => return Some(subscription),
                    Err(RemoteError::PermissionDenied(message)) => {
                        tracing::warn!("Realtime subscription denied: {message}");
                        self.engine.invalidate_session();
                        return None;
                    }
                    Err(error) => {
                        tracing::warn!("Realtime subscribe attempt {attempt} failed: {error}");
                    }
                }
            } else {
                tracing::debug!("Realtime listener waiting for auth (attempt {attempt})");
            }

            if attempt < backoff.max_attempts() {
                tokio::time::sleep(backoff.delay_after(attempt)).await;
            }
        }

        tracing::warn!(
            "Realtime listener gave up after {} attempt(s)",
            backoff.max_attempts()
        );
        None
    }

    fn on_change(&mut self, snapshot: Option<&CloudDocument>) {
        if self.engine.take_echo() {
            tracing::debug!("Ignoring echo of our own upload");
            return;
        }

        let now = Instant::now();
        let spacing = self.engine.inner.settings.realtime_min_spacing;
        if let Some(previous) = self.last_processed {
            if now.duration_since(previous) < spacing {
                tracing::warn!("Ignoring remote change within {spacing:?} of the previous one");
                return;
            }
        }
        self.last_processed = Some(now);

        let Some(snapshot) = snapshot else {
            tracing::debug!("Remote document removed, nothing to merge");
            return;
        };
        self.engine.apply_remote_snapshot(&self.user_id, snapshot);
    }
}
