//! Owned-timer bookkeeping.
//!
//! Every task the subsystem spawns (delayed timers, event pumps, generator
//! loops) is registered here so that disconnect/destroy can cancel the whole
//! set in one sweep. Relying on reference-count collection of closures is not
//! enough: it does not abort in-flight runtime timers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;

/// Unique identifier for an owned timer or task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

impl std::fmt::Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// Cancellation arena for every task the subsystem schedules.
///
/// An entry removes itself when its task completes and is aborted and removed
/// on [`cancel`](TimerArena::cancel) or [`cancel_all`](TimerArena::cancel_all).
/// The arena is empty immediately after a full sweep, which is the subsystem's
/// central resource-safety property.
pub struct TimerArena {
    tasks: Mutex<HashMap<TimerId, JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl TimerArena {
    /// Create a new empty arena.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tasks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Run `fut` after `delay`, tracked by the arena.
    ///
    /// The entry is removed when the future completes or the timer is
    /// cancelled, whichever comes first.
    pub fn schedule<F>(self: &Arc<Self>, delay: Duration, fut: F) -> TimerId
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_timer_id();
        let arena = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fut.await;
            if let Some(arena) = arena.upgrade() {
                arena.remove(id);
            }
        });
        self.lock_tasks().insert(id, handle);
        id
    }

    /// Run `fut` immediately, tracked by the arena.
    ///
    /// Used for long-running work such as event pumps that must be cancelled
    /// alongside the timers.
    pub fn spawn<F>(self: &Arc<Self>, fut: F) -> TimerId
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.schedule(Duration::ZERO, fut)
    }

    /// Cancel one entry, aborting its task.
    ///
    /// Returns `false` if the id is unknown (already fired or cancelled).
    pub fn cancel(&self, id: TimerId) -> bool {
        match self.lock_tasks().remove(&id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every entry, returning how many were swept.
    pub fn cancel_all(&self) -> usize {
        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.lock_tasks();
            tasks.drain().map(|(_, handle)| handle).collect()
        };
        for handle in &handles {
            handle.abort();
        }
        handles.len()
    }

    /// Number of entries still pending.
    pub fn len(&self) -> usize {
        let mut tasks = self.lock_tasks();
        // Prune entries whose task completed but has not self-removed yet
        tasks.retain(|_, handle| !handle.is_finished());
        tasks.len()
    }

    /// Whether no entries are pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn next_timer_id(&self) -> TimerId {
        TimerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn remove(&self, id: TimerId) {
        self.lock_tasks().remove(&id);
    }

    fn lock_tasks(&self) -> MutexGuard<'_, HashMap<TimerId, JoinHandle<()>>> {
        match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for TimerArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerArena")
            .field("pending", &self.lock_tasks().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_and_self_removes() {
        let arena = TimerArena::new();
        let fired = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&fired);
        arena.schedule(Duration::from_millis(100), async move {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(arena.len(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::Relaxed), 1);
        assert!(arena.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let arena = TimerArena::new();
        let fired = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&fired);
        let id = arena.schedule(Duration::from_millis(100), async move {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        assert!(arena.cancel(id));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(fired.load(Ordering::Relaxed), 0);
        assert!(arena.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_unknown_id_is_idempotent() {
        let arena = TimerArena::new();
        let id = arena.schedule(Duration::from_millis(10), async {});

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!arena.cancel(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_sweeps_everything() {
        let arena = TimerArena::new();
        let fired = Arc::new(AtomicU32::new(0));

        for _ in 0..4 {
            let counter = Arc::clone(&fired);
            arena.schedule(Duration::from_secs(1), async move {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        // A long-running pump is swept too
        arena.spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        assert_eq!(arena.len(), 5);

        assert_eq!(arena.cancel_all(), 5);
        assert!(arena.is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ids_are_unique() {
        let arena = TimerArena::new();
        let a = arena.schedule(Duration::from_secs(1), async {});
        let b = arena.schedule(Duration::from_secs(1), async {});
        assert_ne!(a, b);
        arena.cancel_all();
    }
}
