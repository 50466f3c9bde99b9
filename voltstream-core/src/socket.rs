//! WebSocket channel implementation.
//!
//! Translates socket frames into [`ChannelEvent`]s. A failed connect is
//! reported as an error followed by an abnormal close, so the manager's
//! recovery path is the same whether the handshake or an established
//! connection failed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::channel::{Channel, ChannelEvent, ABNORMAL_CLOSE_CODE, CLEAN_CLOSE_CODE};
use crate::error::{ChannelError, ChannelResult};
use crate::timers::TimerArena;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Channel over a WebSocket endpoint.
///
/// The reader task lives in the timer arena shared with the manager, so a
/// disconnect sweep detaches it together with every pending timer.
pub struct WebSocketChannel {
    inner: Arc<SocketInner>,
}

struct SocketInner {
    url: String,
    timers: Arc<TimerArena>,
    writer: Mutex<Option<WsSink>>,
    open: AtomicBool,
}

impl WebSocketChannel {
    /// Create a channel targeting `url`, registering its tasks in `timers`.
    pub fn new(url: impl Into<String>, timers: Arc<TimerArena>) -> Self {
        Self {
            inner: Arc::new(SocketInner {
                url: url.into(),
                timers,
                writer: Mutex::new(None),
                open: AtomicBool::new(false),
            }),
        }
    }
}

#[async_trait]
impl Channel for WebSocketChannel {
    async fn open(&self, events: mpsc::Sender<ChannelEvent>) -> ChannelResult<()> {
        url::Url::parse(&self.inner.url)
            .map_err(|e| ChannelError::InvalidUrl(format!("{}: {e}", self.inner.url)))?;

        let inner = Arc::clone(&self.inner);
        self.inner.timers.spawn(async move {
            inner.run(events).await;
        });
        Ok(())
    }

    async fn send(&self, text: &str) -> ChannelResult<()> {
        let mut writer = self.inner.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            return Err(ChannelError::NotOpen);
        };
        sink.send(Message::Text(text.into()))
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))
    }

    async fn close(&self, code: u16, reason: &str) {
        self.inner.open.store(false, Ordering::Relaxed);
        let mut writer = self.inner.writer.lock().await;
        if let Some(mut sink) = writer.take() {
            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: reason.to_string().into(),
            };
            if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                tracing::debug!(error = %e, "close frame was not delivered");
            }
        }
    }

    fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Relaxed)
    }
}

impl SocketInner {
    async fn run(self: Arc<Self>, events: mpsc::Sender<ChannelEvent>) {
        let stream = match connect_async(self.url.as_str()).await {
            Ok((stream, _response)) => stream,
            Err(e) => {
                tracing::warn!(url = %self.url, error = %e, "websocket connect failed");
                let _ = events.send(ChannelEvent::Error(e.to_string())).await;
                let _ = events
                    .send(ChannelEvent::Closed {
                        code: ABNORMAL_CLOSE_CODE,
                        reason: "connect failed".to_string(),
                    })
                    .await;
                return;
            }
        };

        let (sink, mut source) = stream.split();
        *self.writer.lock().await = Some(sink);
        self.open.store(true, Ordering::Relaxed);
        let _ = events.send(ChannelEvent::Open).await;

        let (code, reason) = loop {
            match source.next().await {
                Some(Ok(Message::Text(text))) => {
                    let _ = events
                        .send(ChannelEvent::Message(text.as_str().to_string()))
                        .await;
                }
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.as_str().to_string()),
                        None => (CLEAN_CLOSE_CODE, String::new()),
                    };
                }
                // Binary and ping/pong frames are not part of the protocol
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events.send(ChannelEvent::Error(e.to_string())).await;
                    break (ABNORMAL_CLOSE_CODE, e.to_string());
                }
                None => break (ABNORMAL_CLOSE_CODE, "connection dropped".to_string()),
            }
        };

        self.open.store(false, Ordering::Relaxed);
        *self.writer.lock().await = None;
        let _ = events.send(ChannelEvent::Closed { code, reason }).await;
    }
}
