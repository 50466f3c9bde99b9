//! Mock channel implementation for exercising the manager without a server.
//!
//! The mock records every frame the manager transmits and lets tests inject
//! channel events (open, messages, closes) at controlled points, including a
//! refuse-on-open mode for driving the reconnection path.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use voltstream_core::{
    Channel, ChannelError, ChannelEvent, ChannelResult, ABNORMAL_CLOSE_CODE,
};

#[derive(Clone)]
pub struct MockChannel {
    inner: Arc<MockInner>,
}

struct MockInner {
    events: Mutex<Option<mpsc::Sender<ChannelEvent>>>,
    open: AtomicBool,
    open_calls: AtomicU32,
    refuse_connections: AtomicBool,
    sent: Mutex<Vec<String>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MockInner {
                events: Mutex::new(None),
                open: AtomicBool::new(false),
                open_calls: AtomicU32::new(0),
                refuse_connections: AtomicBool::new(false),
                sent: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Make every subsequent open fail with an immediate abnormal close.
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.refuse_connections.store(refuse, Ordering::Relaxed);
    }

    /// How many times the manager opened the channel.
    pub fn open_calls(&self) -> u32 {
        self.inner.open_calls.load(Ordering::Relaxed)
    }

    /// Every frame the manager transmitted, in order.
    pub fn sent(&self) -> Vec<String> {
        self.inner.sent.lock().unwrap().clone()
    }

    /// The envelope types of every transmitted frame, in order.
    pub fn sent_types(&self) -> Vec<String> {
        self.sent()
            .iter()
            .filter_map(|text| serde_json::from_str::<Value>(text).ok())
            .filter_map(|value| value["type"].as_str().map(str::to_string))
            .collect()
    }

    pub async fn emit(&self, event: ChannelEvent) {
        match &event {
            ChannelEvent::Open => self.inner.open.store(true, Ordering::Relaxed),
            ChannelEvent::Closed { .. } => self.inner.open.store(false, Ordering::Relaxed),
            _ => {}
        }
        let sender = self.inner.events.lock().unwrap().clone();
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }

    pub async fn emit_open(&self) {
        self.emit(ChannelEvent::Open).await;
    }

    pub async fn emit_message(&self, text: &str) {
        self.emit(ChannelEvent::Message(text.to_string())).await;
    }

    pub async fn emit_abnormal_close(&self) {
        self.emit(ChannelEvent::Closed {
            code: ABNORMAL_CLOSE_CODE,
            reason: "connection lost".to_string(),
        })
        .await;
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn open(&self, events: mpsc::Sender<ChannelEvent>) -> ChannelResult<()> {
        self.inner.open_calls.fetch_add(1, Ordering::Relaxed);
        *self.inner.events.lock().unwrap() = Some(events.clone());

        if self.inner.refuse_connections.load(Ordering::Relaxed) {
            let _ = events
                .send(ChannelEvent::Closed {
                    code: ABNORMAL_CLOSE_CODE,
                    reason: "mock refused".to_string(),
                })
                .await;
        }
        Ok(())
    }

    async fn send(&self, text: &str) -> ChannelResult<()> {
        if !self.is_open() {
            return Err(ChannelError::NotOpen);
        }
        self.inner.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn close(&self, _code: u16, _reason: &str) {
        self.inner.open.store(false, Ordering::Relaxed);
        *self.inner.events.lock().unwrap() = None;
    }

    fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Relaxed)
    }
}

/// Let the manager's event pump drain whatever was just emitted.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// A listener that appends every notification to a shared log.
pub fn recording_listener(
    log: &Arc<Mutex<Vec<bool>>>,
) -> Arc<dyn Fn(bool) + Send + Sync> {
    let log = Arc::clone(log);
    Arc::new(move |connected| {
        log.lock().unwrap().push(connected);
    })
}
