//! Framed WebSocket connections.

use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_tungstenite::WebSocketStream;
use tungstenite::protocol::{Role, WebSocketConfig};
use uuid::Uuid;

use crate::error::{WsError, WsResult};
use crate::message::Message;

/// A unique identifier for a WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Create a new time-ordered connection ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ConnectionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Socket limits.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Largest accepted message (default: 1 MiB).
    pub max_message_size: usize,
    /// Largest accepted frame (default: 1 MiB).
    pub max_frame_size: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            max_message_size: 1024 * 1024,
            max_frame_size: 1024 * 1024,
        }
    }
}

impl WsConfig {
    fn protocol(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.max_message_size);
        config.max_frame_size = Some(self.max_frame_size);
        config
    }
}

type Sink<S> = SplitSink<WebSocketStream<S>, tungstenite::Message>;

/// An open WebSocket.
///
/// Receiving happens on the socket itself; sending goes through
/// [`WsSender`] handles so other tasks can push frames concurrently.
pub struct WsSocket<S> {
    id: ConnectionId,
    sender: WsSender<S>,
    receiver: SplitStream<WebSocketStream<S>>,
    closed: bool,
}

impl<S> WsSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Completes a server-side upgrade on `io`.
    ///
    /// Call this after the `101` response from
    /// [`upgrade_response`](crate::upgrade::upgrade_response) was sent.
    pub async fn accept(io: S, config: &WsConfig) -> Self {
        Self::from_raw(io, Role::Server, config).await
    }

    /// Wraps an already upgraded stream in the given role.
    pub async fn from_raw(io: S, role: Role, config: &WsConfig) -> Self {
        let stream = WebSocketStream::from_raw_socket(io, role, Some(config.protocol())).await;
        let (sink, receiver) = stream.split();
        let id = ConnectionId::new();
        Self {
            id,
            sender: WsSender {
                id,
                sink: Arc::new(Mutex::new(sink)),
            },
            receiver,
            closed: false,
        }
    }

    /// The connection ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// A cloneable send handle.
    pub fn sender(&self) -> WsSender<S> {
        self.sender.clone()
    }

    /// Receives the next data or close frame, answering pings on the way.
    ///
    /// Returns `None` once the connection has ended.
    pub async fn recv(&mut self) -> Option<WsResult<Message>> {
        while !self.closed {
            match self.receiver.next().await {
                Some(Ok(tungstenite::Message::Ping(data))) => {
                    if let Err(err) = self.sender.send_raw(tungstenite::Message::Pong(data)).await {
                        tracing::debug!(connection_id = %self.id, error = %err, "failed to send pong");
                    }
                }
                Some(Ok(frame)) => {
                    if let Some(message) = Message::from_wire(frame) {
                        self.closed = message.is_close();
                        return Some(Ok(message));
                    }
                }
                Some(Err(err)) => {
                    self.closed = true;
                    return Some(Err(err.into()));
                }
                None => self.closed = true,
            }
        }
        None
    }
}

/// A handle for sending frames to a WebSocket from any task.
pub struct WsSender<S> {
    id: ConnectionId,
    sink: Arc<Mutex<Sink<S>>>,
}

impl<S> Clone for WsSender<S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            sink: Arc::clone(&self.sink),
        }
    }
}

impl<S> WsSender<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// The connection ID.
    pub fn connection_id(&self) -> ConnectionId {
        self.id
    }

    /// Sends a frame.
    pub async fn send(&self, message: Message) -> WsResult<()> {
        self.send_raw(message.into_wire()).await
    }

    /// Sends a text frame.
    pub async fn send_text(&self, text: impl Into<String>) -> WsResult<()> {
        self.send(Message::text(text)).await
    }

    /// Sends `value` as a JSON text frame.
    pub async fn send_json<T: Serialize>(&self, value: &T) -> WsResult<()> {
        self.send(Message::json(value)?).await
    }

    /// Sends a close frame and flushes the sink.
    pub async fn close(&self) -> WsResult<()> {
        let mut sink = self.sink.lock().await;
        match sink.close().await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn send_raw(&self, frame: tungstenite::Message) -> WsResult<()> {
        let mut sink = self.sink.lock().await;
        sink.send(frame).await.map_err(|err| match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                WsError::ConnectionClosed
            }
            other => WsError::send_failed(other),
        })
    }
}

impl<S> std::fmt::Debug for WsSender<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsSender").field("id", &self.id).finish_non_exhaustive()
    }
}
