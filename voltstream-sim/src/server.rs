//! Simulated server channel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rand::Rng;
use serde_json::json;
use tokio::sync::mpsc;
use voltstream_core::{
    Channel, ChannelError, ChannelEvent, ChannelResult, MessageEnvelope, TimerArena,
    ABNORMAL_CLOSE_CODE,
};

use crate::config::SimConfig;

const SOURCE: &str = "simulated-server";

/// Channel backed by a synthetic event generator instead of a server.
///
/// Cloning yields another handle to the same simulated endpoint, so a test
/// can keep one handle for [`simulate_connection_loss`] after handing the
/// other to the manager builder.
///
/// The central invariant: every timer this channel creates is registered in
/// the arena shared with the manager, so disconnect/destroy sweeps generator
/// ticks and pending acknowledgements together with the manager's own timers.
#[derive(Clone)]
pub struct SimulatedChannel {
    inner: Arc<SimInner>,
}

struct SimInner {
    config: SimConfig,
    timers: Arc<TimerArena>,
    open: AtomicBool,
    // Bumped on every open and close so a timer from a previous session
    // that fires after a reconnect cannot restart a second generator
    epoch: AtomicU64,
    events: Mutex<Option<mpsc::Sender<ChannelEvent>>>,
}

impl SimulatedChannel {
    /// Create a simulated channel registering its timers in `timers`.
    pub fn new(config: SimConfig, timers: Arc<TimerArena>) -> Self {
        Self {
            inner: Arc::new(SimInner {
                config,
                timers,
                open: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                events: Mutex::new(None),
            }),
        }
    }

    /// Force an abnormal closure.
    ///
    /// The manager observes it exactly like a dropped server connection and
    /// drives the automatic reconnect through its own backoff, which is the
    /// churn this exists to exercise.
    pub async fn simulate_connection_loss(&self) {
        if !self.is_open() {
            tracing::debug!("connection loss ignored: channel not open");
            return;
        }
        tracing::info!("simulating connection loss");
        self.inner.open.store(false, Ordering::Relaxed);
        self.inner.epoch.fetch_add(1, Ordering::Relaxed);
        self.inner
            .emit(ChannelEvent::Closed {
                code: ABNORMAL_CLOSE_CODE,
                reason: "simulated connection loss".to_string(),
            })
            .await;
    }
}

#[async_trait]
impl Channel for SimulatedChannel {
    async fn open(&self, events: mpsc::Sender<ChannelEvent>) -> ChannelResult<()> {
        *self.inner.lock_events() = Some(events);

        let latency = self.inner.config.sample_connect_latency();
        tracing::debug!(latency_ms = latency.as_millis() as u64, "simulated connect in flight");

        let inner = Arc::clone(&self.inner);
        self.inner.timers.schedule(latency, async move {
            let epoch = inner.epoch.fetch_add(1, Ordering::Relaxed) + 1;
            inner.open.store(true, Ordering::Relaxed);
            inner.emit(ChannelEvent::Open).await;
            inner.schedule_tick(epoch);
        });
        Ok(())
    }

    async fn send(&self, text: &str) -> ChannelResult<()> {
        if !self.is_open() {
            return Err(ChannelError::NotOpen);
        }

        match serde_json::from_str::<MessageEnvelope>(text) {
            Ok(envelope) if envelope.is_control() => {
                tracing::debug!(message_type = %envelope.message_type, "control envelope received");
            }
            Ok(envelope) => {
                // Data envelopes get a delayed acknowledgement
                let delay = self.inner.config.sample_ack_delay();
                let acknowledged = envelope.message_type.clone();
                let epoch = self.inner.epoch.load(Ordering::Relaxed);
                let inner = Arc::clone(&self.inner);
                self.inner.timers.schedule(delay, async move {
                    if !inner.is_current(epoch) {
                        return;
                    }
                    let ack = MessageEnvelope::new("ack", json!({ "acknowledged": acknowledged }))
                        .with_source(SOURCE);
                    inner.emit_envelope(&ack).await;
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "simulated server received an undecodable frame");
            }
        }
        Ok(())
    }

    async fn close(&self, code: u16, reason: &str) {
        tracing::debug!(code, reason, "simulated channel closed");
        self.inner.open.store(false, Ordering::Relaxed);
        self.inner.epoch.fetch_add(1, Ordering::Relaxed);
        self.inner.lock_events().take();
    }

    fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Relaxed)
    }
}

impl SimInner {
    /// Emit one synthetic event, maybe an alert, and rearm the generator.
    ///
    /// Rearming from inside the tick keeps exactly one generator timer
    /// pending per session.
    fn schedule_tick(self: &Arc<Self>, epoch: u64) {
        let delay = self.config.sample_tick_interval();
        let inner = Arc::clone(self);
        self.timers.schedule(delay, async move {
            if !inner.is_current(epoch) {
                return;
            }
            let envelope = inner.synthetic_event();
            inner.emit_envelope(&envelope).await;
            if let Some(alert) = inner.maybe_alert() {
                inner.emit_envelope(&alert).await;
            }
            inner.schedule_tick(epoch);
        });
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.open.load(Ordering::Relaxed) && self.epoch.load(Ordering::Relaxed) == epoch
    }

    fn synthetic_event(&self) -> MessageEnvelope {
        let mut rng = rand::rng();
        let envelope = match rng.random_range(0..3) {
            0 => MessageEnvelope::new(
                "energy_update",
                json!({
                    "totalEnergy": round2(rng.random_range(2400.0..3200.0)),
                    "currentPower": round2(rng.random_range(80.0..450.0)),
                }),
            ),
            1 => {
                let devices = ["inverter-01", "meter-02", "battery-01"];
                MessageEnvelope::new(
                    "device_status",
                    json!({
                        "deviceId": devices[rng.random_range(0..devices.len())],
                        "online": rng.random_bool(0.9),
                    }),
                )
            }
            _ => MessageEnvelope::new(
                "grid_frequency",
                json!({ "hz": round2(rng.random_range(49.85..50.15)) }),
            ),
        };
        envelope.with_source(SOURCE)
    }

    fn maybe_alert(&self) -> Option<MessageEnvelope> {
        if self.config.alert_probability <= 0.0 {
            return None;
        }
        let mut rng = rand::rng();
        if !rng.random_bool(self.config.alert_probability) {
            return None;
        }
        Some(
            MessageEnvelope::new(
                "alert",
                json!({
                    "severity": "warning",
                    "message": "consumption spike detected",
                }),
            )
            .with_source(SOURCE),
        )
    }

    async fn emit_envelope(&self, envelope: &MessageEnvelope) {
        match serde_json::to_string(envelope) {
            Ok(text) => self.emit(ChannelEvent::Message(text)).await,
            Err(e) => tracing::warn!(error = %e, "failed to encode synthetic envelope"),
        }
    }

    async fn emit(&self, event: ChannelEvent) {
        let sender = self.lock_events().clone();
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }

    fn lock_events(&self) -> MutexGuard<'_, Option<mpsc::Sender<ChannelEvent>>> {
        match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
