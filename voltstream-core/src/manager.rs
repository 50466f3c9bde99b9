//! Connection lifecycle management.
//!
//! The manager owns the channel, the reconnection policy, and the single
//! choke-point for state notifications. Nothing here panics or returns an
//! error for misuse: mutating a destroyed manager, unsubscribing an unknown
//! id, or sending while disconnected are logged no-ops, because callers
//! routinely race consumer teardown against in-flight async work.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::json;
use tokio::sync::mpsc;

use crate::channel::{
    is_clean_close, Channel, ChannelEvent, ABNORMAL_CLOSE_CODE, CLEAN_CLOSE_CODE,
};
use crate::credentials::CredentialProvider;
use crate::listeners::{ConnectionListeners, ListenerCallback, ListenerId};
use crate::registry::{SubscriberCallback, SubscriptionId, SubscriptionRegistry};
use crate::socket::WebSocketChannel;
use crate::timers::TimerArena;
use crate::types::{control, ConnectionState, ManagerConfig, MessageEnvelope};

type ChannelFactory = Box<dyn FnOnce(Arc<TimerArena>) -> Box<dyn Channel>>;

/// Builder for [`ConnectionManager`].
///
/// The channel implementation is selected here, once; there is no runtime
/// transport switching. The factory receives the manager's timer arena so
/// channel implementations register their tasks in the same set the manager
/// sweeps on disconnect.
pub struct ConnectionManagerBuilder {
    config: ManagerConfig,
    credentials: Option<Arc<dyn CredentialProvider>>,
    channel_factory: Option<ChannelFactory>,
}

impl ConnectionManagerBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: ManagerConfig::default(),
            credentials: None,
            channel_factory: None,
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Inject the credential collaborator used for the authenticate envelope.
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Select the channel implementation.
    ///
    /// Defaults to a [`WebSocketChannel`] targeting the configured url.
    pub fn with_channel<F>(mut self, factory: F) -> Self
    where
        F: FnOnce(Arc<TimerArena>) -> Box<dyn Channel> + 'static,
    {
        self.channel_factory = Some(Box::new(factory));
        self
    }

    /// Build the manager.
    pub fn build(self) -> ConnectionManager {
        let timers = TimerArena::new();
        let channel = match self.channel_factory {
            Some(factory) => factory(Arc::clone(&timers)),
            None => Box::new(WebSocketChannel::new(
                self.config.url.clone(),
                Arc::clone(&timers),
            )) as Box<dyn Channel>,
        };

        ConnectionManager {
            inner: Arc::new(ManagerInner {
                config: self.config,
                channel,
                credentials: self.credentials,
                timers,
                state: Mutex::new(ConnectionState::Disconnected),
                subscriptions: SubscriptionRegistry::new(),
                listeners: ConnectionListeners::new(),
                reconnect_attempts: AtomicU32::new(0),
                destroyed: AtomicBool::new(false),
            }),
        }
    }
}

impl Default for ConnectionManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Manager for one logical channel to the server.
///
/// Create one per logical connection and inject it into consumers; there is
/// no process-wide instance. No method blocks waiting for connection
/// progress: reaching `Connected` is observed through
/// [`on_connection_change`](ConnectionManager::on_connection_change).
///
/// Call [`destroy`](ConnectionManager::destroy) for a complete teardown; the
/// `Drop` implementation only cancels pending timers best-effort, since async
/// cleanup in `Drop` is limited.
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: ManagerConfig,
    /// Exclusively owned; never handed out
    channel: Box<dyn Channel>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    timers: Arc<TimerArena>,
    state: Mutex<ConnectionState>,
    subscriptions: SubscriptionRegistry,
    listeners: ConnectionListeners,
    reconnect_attempts: AtomicU32,
    destroyed: AtomicBool,
}

impl ConnectionManager {
    /// Start building a manager.
    pub fn builder() -> ConnectionManagerBuilder {
        ConnectionManagerBuilder::new()
    }

    /// Open the channel.
    ///
    /// No-op when a connect is already in flight, the channel is open, or the
    /// manager is destroyed. Completion is observed via the connection
    /// listeners, not a return value.
    pub async fn connect(&self) {
        self.inner.connect().await;
    }

    /// Close the channel intentionally.
    ///
    /// Cancels every pending timer (reconnects included), clears all
    /// subscriptions, resets the attempt counter, and notifies listeners of
    /// the disconnect. Idempotent.
    pub async fn disconnect(&self) {
        if self.inner.destroyed.load(Ordering::Relaxed) {
            tracing::debug!("disconnect ignored: manager destroyed");
            return;
        }
        self.inner.shutdown_channel().await;
    }

    /// Tear the manager down permanently.
    ///
    /// Performs a disconnect, clears the listener set, and marks the manager
    /// destroyed. Every subsequent mutator is a logged no-op; the channel can
    /// never be reopened.
    pub async fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::Relaxed) {
            tracing::debug!("destroy ignored: already destroyed");
            return;
        }
        self.inner.shutdown_channel().await;
        *self.inner.lock_state() = ConnectionState::Destroyed;
        self.inner.listeners.clear();
        tracing::info!("connection manager destroyed");
    }

    /// Register a callback for every envelope on `topic`.
    ///
    /// While connected, announces the topic to the server with a "subscribe"
    /// control envelope so it can filter its fan-out. Returns the empty
    /// sentinel id when the manager is destroyed.
    pub async fn subscribe(&self, topic: &str, callback: SubscriberCallback) -> SubscriptionId {
        if self.inner.destroyed.load(Ordering::Relaxed) {
            tracing::warn!(topic, "subscribe ignored: manager destroyed");
            return SubscriptionId::sentinel();
        }

        let id = self.inner.subscriptions.add(topic, callback);
        tracing::debug!(topic, id = %id, "subscriber registered");

        if self.inner.channel.is_open() {
            self.inner
                .transmit(&MessageEnvelope::new(
                    control::SUBSCRIBE,
                    json!({ "topic": topic }),
                ))
                .await;
        }
        id
    }

    /// Remove one subscription; unknown or stale ids are silently ignored.
    ///
    /// When the last subscription for a topic goes away, the server is told
    /// with an "unsubscribe" control envelope.
    pub async fn unsubscribe(&self, id: &SubscriptionId) {
        if self.inner.destroyed.load(Ordering::Relaxed) {
            tracing::debug!(id = %id, "unsubscribe ignored: manager destroyed");
            return;
        }

        match self.inner.subscriptions.remove(id) {
            Some(removed) => {
                tracing::debug!(topic = %removed.topic, id = %id, "subscriber removed");
                if removed.last_for_topic && self.inner.channel.is_open() {
                    self.inner
                        .transmit(&MessageEnvelope::new(
                            control::UNSUBSCRIBE,
                            json!({ "topic": removed.topic }),
                        ))
                        .await;
                }
            }
            None => {
                tracing::debug!(id = %id, "unsubscribe ignored: unknown subscription id");
            }
        }
    }

    /// Transmit an envelope, fire-and-forget.
    ///
    /// Dropped with a log line when the channel is not open; nothing is
    /// queued and no error surfaces.
    pub async fn send(&self, envelope: MessageEnvelope) {
        if self.inner.destroyed.load(Ordering::Relaxed) {
            tracing::debug!("send ignored: manager destroyed");
            return;
        }
        if !self.inner.channel.is_open() {
            tracing::debug!(
                message_type = %envelope.message_type,
                "dropping outbound envelope: channel not open"
            );
            return;
        }
        self.inner.transmit(&envelope).await;
    }

    /// Observe connected/disconnected transitions.
    ///
    /// The listener is invoked synchronously once at registration with the
    /// current boolean state, then on every transition.
    pub fn on_connection_change(&self, listener: ListenerCallback) -> ListenerId {
        if self.inner.destroyed.load(Ordering::Relaxed) {
            tracing::debug!("listener ignored: manager destroyed");
            return ListenerId::INVALID;
        }
        self.inner.listeners.add(listener)
    }

    /// Remove a connection listener registered with `on_connection_change`.
    pub fn remove_connection_listener(&self, id: ListenerId) {
        self.inner.listeners.remove(id);
    }

    /// Whether the channel is currently connected.
    pub fn is_connected(&self) -> bool {
        *self.inner.lock_state() == ConnectionState::Connected
    }

    /// Current lifecycle state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.lock_state()
    }

    /// The timer arena shared by the manager and its channel.
    pub fn timers(&self) -> Arc<TimerArena> {
        Arc::clone(&self.inner.timers)
    }

    /// Number of timers and tasks still pending in the arena.
    pub fn pending_timers(&self) -> usize {
        self.inner.timers.len()
    }

    /// Number of live topic subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.len()
    }

    /// Number of registered connection listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if !self.inner.destroyed.load(Ordering::Relaxed) {
            tracing::debug!("connection manager dropped without destroy; cancelling pending timers");
            self.inner.timers.cancel_all();
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.connection_state())
            .field("subscriptions", &self.subscription_count())
            .field("pending_timers", &self.pending_timers())
            .finish()
    }
}

impl ManagerInner {
    async fn connect(self: &Arc<Self>) {
        if self.destroyed.load(Ordering::Relaxed) {
            tracing::debug!("connect ignored: manager destroyed");
            return;
        }
        {
            let mut state = self.lock_state();
            match *state {
                ConnectionState::Connecting | ConnectionState::Connected => {
                    tracing::debug!(state = %*state, "connect ignored: channel already active");
                    return;
                }
                ConnectionState::Destroyed => return,
                _ => *state = ConnectionState::Connecting,
            }
        }

        tracing::info!("opening channel");
        let (tx, rx) = mpsc::channel(self.config.event_buffer_size);
        let inner = Arc::clone(self);
        self.timers.spawn(async move {
            inner.run_session(tx, rx).await;
        });
    }

    /// One channel session: open, then pump events until closure.
    ///
    /// This task is the manager's single attachment to the channel; aborting
    /// it through the arena is what "detaching the handlers" means here.
    async fn run_session(
        self: Arc<Self>,
        tx: mpsc::Sender<ChannelEvent>,
        mut rx: mpsc::Receiver<ChannelEvent>,
    ) {
        if let Err(e) = self.channel.open(tx).await {
            tracing::warn!(error = %e, "channel open failed");
            self.handle_closed(ABNORMAL_CLOSE_CODE, "open failed");
            return;
        }

        while let Some(event) = rx.recv().await {
            match event {
                ChannelEvent::Open => self.handle_open().await,
                ChannelEvent::Message(text) => self.handle_message(&text),
                ChannelEvent::Closed { code, reason } => {
                    self.handle_closed(code, &reason);
                    break;
                }
                ChannelEvent::Error(error) => self.handle_error(&error),
            }
        }
    }

    async fn handle_open(self: &Arc<Self>) {
        self.reconnect_attempts.store(0, Ordering::Relaxed);
        *self.lock_state() = ConnectionState::Connected;
        tracing::info!("channel connected");
        self.listeners.notify(true);

        if let Some(credentials) = &self.credentials {
            if let Some(token) = credentials.bearer_token() {
                self.transmit(&MessageEnvelope::new(
                    control::AUTHENTICATE,
                    json!({ "token": token }),
                ))
                .await;
            }
        }

        // Re-announce retained topics; a filtering server forgot them with
        // the previous connection
        for topic in self.subscriptions.topics() {
            self.transmit(&MessageEnvelope::new(
                control::SUBSCRIBE,
                json!({ "topic": topic }),
            ))
            .await;
        }
    }

    fn handle_message(&self, text: &str) {
        let envelope: MessageEnvelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed inbound frame");
                return;
            }
        };
        let delivered = self
            .subscriptions
            .dispatch(&envelope.message_type, &envelope.payload);
        tracing::trace!(
            topic = %envelope.message_type,
            delivered,
            "dispatched inbound envelope"
        );
    }

    fn handle_closed(self: &Arc<Self>, code: u16, reason: &str) {
        if self.destroyed.load(Ordering::Relaxed) {
            return;
        }
        *self.lock_state() = ConnectionState::Disconnected;
        self.listeners.notify(false);

        if is_clean_close(code) {
            tracing::info!(code, reason, "channel closed cleanly");
            return;
        }
        tracing::warn!(code, reason, "channel closed unexpectedly");
        self.schedule_reconnect();
    }

    fn handle_error(&self, error: &str) {
        tracing::warn!(error, "channel error");
        self.listeners.notify(false);
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let attempts = self.reconnect_attempts.load(Ordering::Relaxed);
        if attempts >= self.config.max_reconnect_attempts {
            tracing::warn!(
                attempts,
                "reconnect attempts exhausted; waiting for a manual connect"
            );
            return;
        }

        let attempt = attempts + 1;
        self.reconnect_attempts.store(attempt, Ordering::Relaxed);
        let delay = self.config.backoff_delay(attempt);
        tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");

        let inner = Arc::clone(self);
        self.timers.schedule(delay, async move {
            inner.connect().await;
        });
    }

    /// Shared teardown for disconnect and destroy.
    async fn shutdown_channel(&self) {
        let cancelled = self.timers.cancel_all();
        if cancelled > 0 {
            tracing::debug!(cancelled, "cancelled pending timers");
        }
        if self.channel.is_open() {
            self.channel.close(CLEAN_CLOSE_CODE, "client disconnect").await;
        }
        self.subscriptions.remove_all();
        self.reconnect_attempts.store(0, Ordering::Relaxed);

        let changed = {
            let mut state = self.lock_state();
            if *state == ConnectionState::Closed {
                false
            } else {
                *state = ConnectionState::Closed;
                true
            }
        };
        if changed {
            tracing::info!("disconnected");
        }
        self.listeners.notify(false);
    }

    async fn transmit(&self, envelope: &MessageEnvelope) {
        let text = match serde_json::to_string(envelope) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode outbound envelope");
                return;
            }
        };
        if let Err(e) = self.channel.send(&text).await {
            tracing::warn!(
                message_type = %envelope.message_type,
                error = %e,
                "failed to transmit envelope"
            );
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
