//! Topic subscription registry with per-callback failure isolation.
//!
//! Subscriber callbacks are supplied by callers but owned by the registry:
//! teardown nulls every callback slot before dropping it, so a dispatch that
//! is already in flight cannot invoke a callback whose consumer has been torn
//! down.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use uuid::Uuid;

/// Callback invoked with the payload of every envelope on a subscribed topic.
pub type SubscriberCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// Unique identifier for a topic subscription.
///
/// Combines the topic, a time component, and a random suffix so ids created
/// in the same tick never collide. The empty sentinel is returned by
/// a destroyed manager.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    fn generate(topic: &str) -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        let suffix: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
        Self(format!("{topic}-{millis}-{suffix}"))
    }

    /// The empty sentinel returned by mutators on a destroyed manager.
    pub fn sentinel() -> Self {
        Self(String::new())
    }

    /// Whether this id is the empty sentinel.
    pub fn is_sentinel(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of removing a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedSubscription {
    /// Topic the subscription was registered on
    pub topic: String,
    /// Whether it was the last registration for that topic
    pub last_for_topic: bool,
}

struct SubscriberSlot {
    topic: String,
    callback: RwLock<Option<SubscriberCallback>>,
}

struct SubscriptionEntry {
    id: SubscriptionId,
    slot: Arc<SubscriberSlot>,
}

/// Topic → subscriber-set mapping.
///
/// Entries are kept in registration order so subscribers on a topic fire in
/// the order they were added.
pub struct SubscriptionRegistry {
    entries: RwLock<Vec<SubscriptionEntry>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Register a callback for a topic.
    pub fn add(&self, topic: &str, callback: SubscriberCallback) -> SubscriptionId {
        let id = SubscriptionId::generate(topic);
        let entry = SubscriptionEntry {
            id: id.clone(),
            slot: Arc::new(SubscriberSlot {
                topic: topic.to_string(),
                callback: RwLock::new(Some(callback)),
            }),
        };
        self.write_entries().push(entry);
        id
    }

    /// Invoke every registered callback for `topic` with `payload`.
    ///
    /// Each invocation is isolated: a panicking subscriber is logged with
    /// topic context and does not block delivery to the rest. Returns how
    /// many callbacks completed.
    pub fn dispatch(&self, topic: &str, payload: &Value) -> usize {
        let matching: Vec<Arc<SubscriberSlot>> = self
            .read_entries()
            .iter()
            .filter(|entry| entry.slot.topic == topic)
            .map(|entry| Arc::clone(&entry.slot))
            .collect();

        let mut delivered = 0;
        for slot in matching {
            // A nulled slot means the consumer was torn down mid-flight
            let callback = match slot.callback.read() {
                Ok(guard) => guard.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            };
            let Some(callback) = callback else { continue };

            let payload = payload.clone();
            match catch_unwind(AssertUnwindSafe(|| callback(payload))) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    tracing::error!(topic, "subscriber panicked during dispatch");
                }
            }
        }
        delivered
    }

    /// Remove one subscription.
    ///
    /// Unknown or stale ids return `None`. The result reports whether the
    /// removed subscription was the last one for its topic.
    pub fn remove(&self, id: &SubscriptionId) -> Option<RemovedSubscription> {
        let mut entries = self.write_entries();
        let index = entries.iter().position(|entry| &entry.id == id)?;
        let entry = entries.remove(index);

        Self::null_slot(&entry.slot);
        let topic = entry.slot.topic.clone();
        let last_for_topic = !entries.iter().any(|entry| entry.slot.topic == topic);

        Some(RemovedSubscription {
            topic,
            last_for_topic,
        })
    }

    /// Null every callback slot, then drop all entries.
    pub fn remove_all(&self) {
        let mut entries = self.write_entries();
        for entry in entries.iter() {
            Self::null_slot(&entry.slot);
        }
        entries.clear();
    }

    /// Distinct topics with at least one live subscription.
    pub fn topics(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.read_entries()
            .iter()
            .filter(|entry| seen.insert(entry.slot.topic.clone()))
            .map(|entry| entry.slot.topic.clone())
            .collect()
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    /// Whether no subscriptions are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn null_slot(slot: &SubscriberSlot) {
        let mut callback = match slot.callback.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *callback = None;
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, Vec<SubscriptionEntry>> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, Vec<SubscriptionEntry>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("subscriptions", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_callback(counter: &Arc<AtomicU32>) -> SubscriberCallback {
        let counter = Arc::clone(counter);
        Arc::new(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        })
    }

    #[test]
    fn test_fan_out_exactly_once_per_subscriber() {
        let registry = SubscriptionRegistry::new();
        let counter = Arc::new(AtomicU32::new(0));

        registry.add("energy_update", counting_callback(&counter));
        registry.add("energy_update", counting_callback(&counter));
        registry.add("energy_update", counting_callback(&counter));

        let delivered = registry.dispatch("energy_update", &json!({"totalEnergy": 1.0}));
        assert_eq!(delivered, 3);
        assert_eq!(counter.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_other_topics_are_untouched() {
        let registry = SubscriptionRegistry::new();
        let counter = Arc::new(AtomicU32::new(0));

        registry.add("energy_update", counting_callback(&counter));

        let delivered = registry.dispatch("device_status", &json!({}));
        assert_eq!(delivered, 0);
        assert_eq!(counter.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_panicking_subscriber_does_not_block_siblings() {
        let registry = SubscriptionRegistry::new();
        let counter = Arc::new(AtomicU32::new(0));

        registry.add("alerts", Arc::new(|_| panic!("subscriber bug")));
        registry.add("alerts", counting_callback(&counter));
        registry.add("alerts", counting_callback(&counter));

        // Dispatch itself must not panic
        let delivered = registry.dispatch("alerts", &json!({"severity": "warning"}));
        assert_eq!(delivered, 2);
        assert_eq!(counter.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_subscribers_receive_the_payload() {
        let registry = SubscriptionRegistry::new();
        let received = Arc::new(std::sync::Mutex::new(None));

        let sink = Arc::clone(&received);
        registry.add(
            "energy_update",
            Arc::new(move |payload| {
                *sink.lock().unwrap() = Some(payload);
            }),
        );

        registry.dispatch("energy_update", &json!({"totalEnergy": 2847.5}));
        let payload = received.lock().unwrap().take().unwrap();
        assert_eq!(payload["totalEnergy"], 2847.5);
    }

    #[test]
    fn test_remove_reports_last_for_topic() {
        let registry = SubscriptionRegistry::new();
        let counter = Arc::new(AtomicU32::new(0));

        let first = registry.add("energy_update", counting_callback(&counter));
        let second = registry.add("energy_update", counting_callback(&counter));

        let removed = registry.remove(&first).unwrap();
        assert_eq!(removed.topic, "energy_update");
        assert!(!removed.last_for_topic);

        let removed = registry.remove(&second).unwrap();
        assert!(removed.last_for_topic);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_unknown_id_is_silent() {
        let registry = SubscriptionRegistry::new();
        let id = registry.add("energy_update", Arc::new(|_| {}));

        assert!(registry.remove(&id).is_some());
        // Second removal of the same id is a no-op
        assert!(registry.remove(&id).is_none());
        assert!(registry.remove(&SubscriptionId::sentinel()).is_none());
    }

    #[test]
    fn test_remove_all_clears_and_nulls() {
        let registry = SubscriptionRegistry::new();
        let counter = Arc::new(AtomicU32::new(0));

        registry.add("a", counting_callback(&counter));
        registry.add("b", counting_callback(&counter));
        registry.remove_all();

        assert!(registry.is_empty());
        assert_eq!(registry.dispatch("a", &json!({})), 0);
        assert_eq!(counter.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_ids_are_unique_and_carry_the_topic() {
        let registry = SubscriptionRegistry::new();
        let a = registry.add("energy_update", Arc::new(|_| {}));
        let b = registry.add("energy_update", Arc::new(|_| {}));

        assert_ne!(a, b);
        assert!(a.as_str().starts_with("energy_update-"));
        assert!(!a.is_sentinel());
        assert!(SubscriptionId::sentinel().is_sentinel());
    }

    #[test]
    fn test_topics_are_distinct() {
        let registry = SubscriptionRegistry::new();
        registry.add("a", Arc::new(|_| {}));
        registry.add("a", Arc::new(|_| {}));
        registry.add("b", Arc::new(|_| {}));

        let mut topics = registry.topics();
        topics.sort();
        assert_eq!(topics, vec!["a".to_string(), "b".to_string()]);
    }
}
