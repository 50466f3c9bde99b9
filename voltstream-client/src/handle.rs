//! Consumer-side topic handle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use voltstream_core::{
    ConnectionManager, ConnectionState, ListenerId, MessageEnvelope, SubscriptionId,
};

/// Configuration for attaching a [`TopicHandle`].
#[derive(Debug, Clone)]
pub struct HandleConfig {
    /// Topic the handle subscribes to
    pub topic: String,
    /// Connect automatically after `connect_debounce`
    pub auto_connect: bool,
    /// Delay before the automatic connect, coalescing simultaneous attaches
    pub connect_debounce: Duration,
    /// Capacity of the consumer's event buffer
    pub event_buffer: usize,
}

impl HandleConfig {
    /// Defaults: auto-connect after 100ms, 32-envelope buffer.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            auto_connect: true,
            connect_debounce: Duration::from_millis(100),
            event_buffer: 32,
        }
    }

    /// Leave connecting to the caller.
    pub fn manual_connect(mut self) -> Self {
        self.auto_connect = false;
        self
    }

    /// Replace the auto-connect debounce delay.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.connect_debounce = debounce;
        self
    }

    /// Replace the event buffer capacity.
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }
}

/// One consumer's attachment to a topic.
///
/// Holds exactly one topic subscription and one connection listener; both are
/// always removed on [`detach`](TopicHandle::detach), and best-effort on drop.
/// Inbound payloads are normalized back into [`MessageEnvelope`]s and buffered
/// until the consumer drains them; when the buffer is full the newest event is
/// dropped with a log line, since the feed is eventually consistent.
pub struct TopicHandle {
    manager: Arc<ConnectionManager>,
    topic: String,
    subscription: SubscriptionId,
    listener: ListenerId,
    events: mpsc::Receiver<MessageEnvelope>,
    state_rx: watch::Receiver<bool>,
    detached: bool,
}

impl TopicHandle {
    /// Register the subscription and state observer, optionally scheduling an
    /// automatic connect.
    ///
    /// Simultaneous attaches each schedule a debounced connect, but the
    /// manager treats a connect while one is in flight as a no-op, so they
    /// coalesce into a single channel.
    pub async fn attach(manager: Arc<ConnectionManager>, config: HandleConfig) -> Self {
        let (event_tx, events) = mpsc::channel(config.event_buffer);
        let (state_tx, state_rx) = watch::channel(manager.is_connected());

        let listener = manager.on_connection_change(Arc::new(move |connected| {
            state_tx.send_if_modified(|state| {
                if *state != connected {
                    *state = connected;
                    true
                } else {
                    false
                }
            });
        }));

        let topic = config.topic.clone();
        let forward_topic = config.topic.clone();
        let subscription = manager
            .subscribe(
                &config.topic,
                Arc::new(move |payload| {
                    let envelope = MessageEnvelope::new(forward_topic.clone(), payload);
                    if event_tx.try_send(envelope).is_err() {
                        tracing::warn!(
                            topic = %forward_topic,
                            "dropping event: consumer buffer full"
                        );
                    }
                }),
            )
            .await;

        if config.auto_connect && manager.connection_state() != ConnectionState::Destroyed {
            let debounced = Arc::clone(&manager);
            manager.timers().schedule(config.connect_debounce, async move {
                debounced.connect().await;
            });
        }

        Self {
            manager,
            topic,
            subscription,
            listener,
            events,
            state_rx,
            detached: false,
        }
    }

    /// Wait for the next envelope on this topic.
    pub async fn recv(&mut self) -> Option<MessageEnvelope> {
        self.events.recv().await
    }

    /// Take a buffered envelope without waiting.
    pub fn try_recv(&mut self) -> Option<MessageEnvelope> {
        self.events.try_recv().ok()
    }

    /// Current connection state.
    pub fn connected(&self) -> bool {
        *self.state_rx.borrow()
    }

    /// A watch receiver that wakes only on real connection-state changes.
    pub fn state_receiver(&self) -> watch::Receiver<bool> {
        self.state_rx.clone()
    }

    /// Topic this handle is attached to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The manager this handle is attached to.
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Remove the subscription and the state observer.
    pub async fn detach(mut self) {
        self.detached = true;
        self.manager.remove_connection_listener(self.listener);
        self.manager.unsubscribe(&self.subscription).await;
        tracing::debug!(topic = %self.topic, "topic handle detached");
    }
}

impl Drop for TopicHandle {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        // Listener removal is synchronous; releasing the subscription needs a
        // runtime, so a handle dropped outside one leaks the registration
        // until the manager is torn down
        self.manager.remove_connection_listener(self.listener);
        let manager = Arc::clone(&self.manager);
        let subscription = self.subscription.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    manager.unsubscribe(&subscription).await;
                });
            }
            Err(_) => {
                tracing::warn!(
                    topic = %self.topic,
                    "topic handle dropped outside a runtime; subscription released on manager teardown"
                );
            }
        }
    }
}
