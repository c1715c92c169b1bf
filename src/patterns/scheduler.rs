//! Per-key cancellable timer table
//!
//! At most one timer exists per key. Scheduling a key replaces (and
//! cancels) its previous timer. A fired timer stays in the table until its
//! task finishes, so `cancel` or a new `schedule` also stops a task that is
//! already running. The task may schedule its own key again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

#[derive(Debug)]
struct Timer {
    generation: u64,
    fire_at: Instant,
    token: CancellationToken,
}

/// Cancellable one-shot timers keyed by cache key
#[derive(Debug, Default)]
pub struct RefreshScheduler {
    timers: Arc<Mutex<HashMap<String, Timer>>>,
    generation: AtomicU64,
    tasks: TaskTracker,
    closed: AtomicBool,
}

impl RefreshScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay`, replacing any timer already set for `key`.
    ///
    /// Returns `false` once the scheduler has been shut down.
    pub fn schedule(&self, key: &str, delay: Duration, task: BoxFuture<'static, ()>) -> bool {
        self.schedule_with(key, delay, move |_| task)
    }

    /// Like [`schedule`](Self::schedule), handing the timer's token to the task.
    ///
    /// The token is cancelled when the key is cancelled or rescheduled, which
    /// lets a running task check whether it has been superseded.
    pub fn schedule_with<F>(&self, key: &str, delay: Duration, make_task: F) -> bool
    where
        F: FnOnce(CancellationToken) -> BoxFuture<'static, ()> + Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            debug!(key, "Scheduler closed, dropping timer");
            return false;
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let fire_at = Instant::now() + delay;
        let token = CancellationToken::new();
        let previous = self.timers.lock().insert(
            key.to_string(),
            Timer {
                generation,
                fire_at,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
        }

        let timers = Arc::clone(&self.timers);
        let key = key.to_string();
        self.tasks.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = sleep_until(fire_at) => {}
            }
            debug!(key = %key, "Refresh timer fired");
            tokio::select! {
                biased;
                _ = token.cancelled() => debug!(key = %key, "Running refresh superseded"),
                _ = make_task(token.clone()) => {}
            }
            let mut timers = timers.lock();
            if timers.get(&key).map(|t| t.generation) == Some(generation) {
                timers.remove(&key);
            }
        });
        true
    }

    /// Cancel the timer for `key`, stopping its task if it already fired.
    /// Returns whether one was set.
    pub fn cancel(&self, key: &str) -> bool {
        match self.timers.lock().remove(key) {
            Some(timer) => {
                timer.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every pending timer
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Timer> = self.timers.lock().drain().map(|(_, t)| t).collect();
        for timer in &drained {
            timer.token.cancel();
        }
        drained.len()
    }

    /// When the timer for `key` fires
    pub fn scheduled_at(&self, key: &str) -> Option<Instant> {
        self.timers.lock().get(key).map(|t| t.fire_at)
    }

    /// Timers pending or running
    pub fn len(&self) -> usize {
        self.timers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.lock().is_empty()
    }

    /// Refuse new timers, cancel every timer and wait for their tasks
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let cancelled = self.cancel_all();
        self.tasks.close();
        self.tasks.wait().await;
        debug!(cancelled, "Refresh scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::AtomicU32;

    fn counting(counter: &Arc<AtomicU32>) -> BoxFuture<'static, ()> {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        .boxed()
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once_after_delay() {
        let scheduler = RefreshScheduler::new();
        let fired = Arc::new(AtomicU32::new(0));
        assert!(scheduler.schedule("k", Duration::from_secs(5), counting(&fired)));
        assert_eq!(scheduler.len(), 1);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(scheduler.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_previous_timer() {
        let scheduler = RefreshScheduler::new();
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));

        let start = Instant::now();
        scheduler.schedule("k", Duration::from_secs(5), counting(&first));
        tokio::time::sleep(Duration::from_secs(2)).await;
        scheduler.schedule("k", Duration::from_secs(5), counting(&second));
        assert_eq!(scheduler.scheduled_at("k"), Some(start + Duration::from_secs(7)));
        assert_eq!(scheduler.len(), 1);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_shutdown() {
        let scheduler = RefreshScheduler::new();
        let fired = Arc::new(AtomicU32::new(0));
        scheduler.schedule("a", Duration::from_secs(1), counting(&fired));
        scheduler.schedule("b", Duration::from_secs(1), counting(&fired));

        assert!(scheduler.cancel("a"));
        assert!(!scheduler.cancel("a"));

        scheduler.shutdown().await;
        assert!(scheduler.is_empty());
        assert!(!scheduler.schedule("c", Duration::from_secs(1), counting(&fired)));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_running_task() {
        let scheduler = RefreshScheduler::new();
        let finished = Arc::new(AtomicU32::new(0));
        let counter = finished.clone();
        scheduler.schedule_with("k", Duration::from_secs(1), move |_| {
            async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(scheduler.len(), 1);
        assert!(scheduler.cancel("k"));

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        assert!(scheduler.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_supersedes_running_task() {
        let scheduler = RefreshScheduler::new();
        let seen_cancel = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));
        let flag = seen_cancel.clone();
        scheduler.schedule_with("k", Duration::from_secs(1), move |token| {
            async move {
                token.cancelled().await;
                flag.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        scheduler.schedule("k", Duration::from_secs(5), counting(&second));

        tokio::time::sleep(Duration::from_secs(6)).await;
        // The running task is dropped, never resumed past its cancel point
        assert_eq!(seen_cancel.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert!(scheduler.is_empty());
    }
}
