//! Core types for the voltstream-core crate.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of a connection manager.
///
/// `Destroyed` is terminal: once a manager reaches it, no mutator can
/// re-open a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No channel is active and no connect is in flight
    Disconnected,
    /// A channel is being opened
    Connecting,
    /// The channel is open and envelopes flow
    Connected,
    /// The channel was shut down intentionally
    Closed,
    /// The manager has been torn down permanently
    Destroyed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
            ConnectionState::Destroyed => "destroyed",
        };
        write!(f, "{name}")
    }
}

/// Reserved control envelope types exchanged with the server.
pub mod control {
    /// Client asks the server to include a topic in its fan-out
    pub const SUBSCRIBE: &str = "subscribe";
    /// Client asks the server to stop sending a topic
    pub const UNSUBSCRIBE: &str = "unsubscribe";
    /// Sent automatically after open when a credential is available
    pub const AUTHENTICATE: &str = "authenticate";

    /// Whether an envelope type is one of the reserved control types.
    pub fn is_control(message_type: &str) -> bool {
        matches!(message_type, SUBSCRIBE | UNSUBSCRIBE | AUTHENTICATE)
    }
}

/// Structured wrapper around every exchanged message.
///
/// The envelope `type` doubles as the topic used to route inbound messages
/// to subscribers. `payload` is opaque to this subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Topic or control type
    #[serde(rename = "type")]
    pub message_type: String,
    /// Opaque payload, owned by the producer
    pub payload: Value,
    /// ISO-8601 creation timestamp
    pub timestamp: String,
    /// Optional producer tag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl MessageEnvelope {
    /// Create an envelope stamped with the current time.
    pub fn new(message_type: impl Into<String>, payload: Value) -> Self {
        Self {
            message_type: message_type.into(),
            payload,
            timestamp: chrono::Utc::now().to_rfc3339(),
            source: None,
        }
    }

    /// Attach a producer tag to the envelope.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Whether this envelope carries one of the reserved control types.
    pub fn is_control(&self) -> bool {
        control::is_control(&self.message_type)
    }
}

/// Configuration for a connection manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Endpoint address for the default WebSocket channel
    pub url: String,
    /// Automatic reconnect attempts before waiting for a manual connect
    pub max_reconnect_attempts: u32,
    /// Base delay for exponential backoff between reconnect attempts
    pub reconnect_base_delay: Duration,
    /// Upper bound on the backoff delay
    pub reconnect_max_delay: Duration,
    /// Size of the channel event buffer
    pub event_buffer_size: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".to_string(),
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_millis(1000),
            reconnect_max_delay: Duration::from_millis(30_000),
            event_buffer_size: 100,
        }
    }
}

impl ManagerConfig {
    /// Backoff delay for the given attempt number (1-based).
    ///
    /// `base * 2^(attempt-1)`, capped at `reconnect_max_delay`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .reconnect_base_delay
            .saturating_mul(2u32.saturating_pow(exponent));
        delay.min(self.reconnect_max_delay)
    }
}
