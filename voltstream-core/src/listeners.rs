//! Connection-state observer registry.
//!
//! Listeners are notified once at registration with the current state and on
//! every subsequent transition. Notifications deduplicate: delivering the
//! same boolean twice in a row would let callers observe a transition that
//! never happened.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Callback observing connected/disconnected transitions.
pub type ListenerCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Unique identifier for a connection listener.
///
/// `ListenerId::INVALID` is handed out by a destroyed manager; removing it is
/// a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Sentinel id never held by a registered listener.
    pub const INVALID: ListenerId = ListenerId(0);
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Registry of connection-state observers.
pub struct ConnectionListeners {
    listeners: RwLock<Vec<(ListenerId, ListenerCallback)>>,
    next_id: AtomicU64,
    last_notified: Mutex<bool>,
}

impl ConnectionListeners {
    /// Create an empty registry; the initial observed state is disconnected.
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            last_notified: Mutex::new(false),
        }
    }

    /// Register a listener and replay the current state to it synchronously.
    pub fn add(&self, callback: ListenerCallback) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let current = *self.lock_last();
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push((id, Arc::clone(&callback)));
        }
        Self::invoke(&callback, current);
        id
    }

    /// Remove one listener; unknown ids are ignored.
    pub fn remove(&self, id: ListenerId) -> bool {
        if let Ok(mut listeners) = self.listeners.write() {
            let before = listeners.len();
            listeners.retain(|(listener_id, _)| *listener_id != id);
            return listeners.len() < before;
        }
        false
    }

    /// Notify every listener of a transition.
    ///
    /// Repeating the previous value is a no-op, so callers can report state
    /// unconditionally and listeners still only see real transitions.
    pub fn notify(&self, connected: bool) {
        {
            let mut last = self.lock_last();
            if *last == connected {
                return;
            }
            *last = connected;
        }

        let snapshot: Vec<ListenerCallback> = match self.listeners.read() {
            Ok(listeners) => listeners.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
            Err(_) => return,
        };
        for callback in snapshot {
            Self::invoke(&callback, connected);
        }
    }

    /// Drop every listener.
    pub fn clear(&self) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.clear();
        }
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.read().map(|l| l.len()).unwrap_or(0)
    }

    /// Whether no listeners are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn invoke(callback: &ListenerCallback, connected: bool) {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            callback(connected);
        }));
        if result.is_err() {
            tracing::warn!(connected, "connection listener panicked");
        }
    }

    fn lock_last(&self) -> std::sync::MutexGuard<'_, bool> {
        match self.last_notified.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for ConnectionListeners {
    fn default() -> Self {
        Self::new()
    }
}
