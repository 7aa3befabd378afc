//! Error types for WebSocket operations.

use thiserror::Error;

/// Result type for WebSocket operations.
pub type WsResult<T> = Result<T, WsError>;

/// Errors raised by the handshake and the socket.
#[derive(Debug, Error)]
pub enum WsError {
    /// The HTTP request is not a valid upgrade request.
    #[error("not a WebSocket upgrade request: {reason}")]
    NotWebSocketRequest {
        /// What was missing or wrong.
        reason: String,
    },

    /// The upgrade response could not be built.
    #[error("WebSocket handshake failed: {0}")]
    HandshakeFailed(String),

    /// The socket is closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Writing a frame failed.
    #[error("failed to send message: {0}")]
    SendFailed(String),

    /// A frame could not be encoded.
    #[error("failed to encode message: {0}")]
    EncodeFailed(String),

    /// Protocol or IO failure reported by tungstenite.
    #[error("tungstenite error: {0}")]
    Tungstenite(#[from] tungstenite::Error),
}

impl WsError {
    /// Create a "not a WebSocket request" error.
    pub fn not_websocket(reason: impl Into<String>) -> Self {
        Self::NotWebSocketRequest {
            reason: reason.into(),
        }
    }

    /// Create a handshake failed error.
    pub fn handshake_failed(reason: impl ToString) -> Self {
        Self::HandshakeFailed(reason.to_string())
    }

    /// Create a send failed error.
    pub fn send_failed(reason: impl ToString) -> Self {
        Self::SendFailed(reason.to_string())
    }
}

impl From<serde_json::Error> for WsError {
    fn from(err: serde_json::Error) -> Self {
        Self::EncodeFailed(err.to_string())
    }
}
