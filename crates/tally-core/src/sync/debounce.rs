//! Cancellable delayed trigger

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Runs a task once no new trigger arrived for `delay`.
///
/// Each trigger cancels the pending timer and starts a new one. The task
/// itself is spawned separately when the timer fires, so a later trigger
/// never cancels work that already started.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    fn pending(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Restart the quiet period; `task` runs when it elapses
    pub fn trigger<F, Fut>(&self, runtime: &Handle, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        let spawner = runtime.clone();
        let timer = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            spawner.spawn(task());
        });

        if let Some(previous) = self.pending().replace(timer) {
            previous.abort();
        }
    }

    pub fn cancel(&self) {
        if let Some(previous) = self.pending().take() {
            previous.abort();
        }
    }

    /// Whether a timer is armed and has not fired yet
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending()
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_task(counter: &Arc<AtomicUsize>) -> impl FnOnce() -> std::future::Ready<()> {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_quiet_period() {
        let debouncer = Debouncer::new(Duration::from_secs(2));
        let fired = Arc::new(AtomicUsize::new(0));
        let handle = Handle::current();

        debouncer.trigger(&handle, counting_task(&fired));
        tokio::time::sleep(Duration::from_millis(1999)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(debouncer.is_pending());

        tokio::time::sleep(Duration::from_millis(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn each_trigger_restarts_the_timer() {
        let debouncer = Debouncer::new(Duration::from_secs(2));
        let fired = Arc::new(AtomicUsize::new(0));
        let handle = Handle::current();

        for _ in 0..5 {
            debouncer.trigger(&handle, counting_task(&fired));
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_drops_pending_trigger() {
        let debouncer = Debouncer::new(Duration::from_secs(2));
        let fired = Arc::new(AtomicUsize::new(0));

        debouncer.trigger(&Handle::current(), counting_task(&fired));
        debouncer.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!debouncer.is_pending());
    }
}
