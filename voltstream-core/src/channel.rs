//! Channel abstraction over the transport.
//!
//! A channel is a bidirectional message endpoint. The manager owns exactly one
//! channel, selected at construction, and observes it through the events it
//! pushes on the sender handed to [`Channel::open`]. The real WebSocket
//! endpoint and the simulated server both implement this trait.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ChannelResult;

/// Close code carried by an intentional shutdown.
pub const CLEAN_CLOSE_CODE: u16 = 1000;

/// Close code used when the transport drops without a close handshake.
pub const ABNORMAL_CLOSE_CODE: u16 = 1006;

/// Whether a close code indicates an intentional shutdown.
pub fn is_clean_close(code: u16) -> bool {
    code == CLEAN_CLOSE_CODE
}

/// Lifecycle and data events emitted by a channel.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// The endpoint finished its handshake and is ready
    Open,
    /// An inbound text frame
    Message(String),
    /// The endpoint closed; `code` distinguishes clean from abnormal closure
    Closed { code: u16, reason: String },
    /// A transport error; does not itself imply closure
    Error(String),
}

/// Bidirectional message endpoint.
///
/// Implementations own their underlying transport resources. Any task an
/// implementation spawns must be registered in the timer arena shared with
/// the manager so a single sweep cancels everything.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Establish the endpoint.
    ///
    /// Lifecycle events arrive on `events`, starting with
    /// [`ChannelEvent::Open`] once the endpoint is ready. Connection failures
    /// after this call returns are reported as events, not errors, so the
    /// caller's recovery path is uniform.
    async fn open(&self, events: mpsc::Sender<ChannelEvent>) -> ChannelResult<()>;

    /// Transmit one text frame.
    async fn send(&self, text: &str) -> ChannelResult<()>;

    /// Close the endpoint with the given code and reason.
    async fn close(&self, code: u16, reason: &str);

    /// Whether the endpoint is currently open.
    fn is_open(&self) -> bool;
}
