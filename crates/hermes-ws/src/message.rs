//! Application-level WebSocket frames.
//!
//! Control frames (ping, pong) are answered by [`WsSocket`](crate::WsSocket)
//! and never surface here.

use bytes::Bytes;
use serde::Serialize;

use crate::error::WsResult;

/// A data or close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Binary(Bytes),
    /// The peer closed, or the socket is being closed.
    Close,
}

impl Message {
    /// Text frame.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Text frame holding `value` as JSON.
    pub fn json<T: Serialize>(value: &T) -> WsResult<Self> {
        Ok(Self::Text(serde_json::to_string(value)?))
    }

    /// Returns the text payload of a text frame.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Returns `true` for a close frame.
    pub fn is_close(&self) -> bool {
        matches!(self, Self::Close)
    }

    pub(crate) fn from_wire(message: tungstenite::Message) -> Option<Self> {
        match message {
            tungstenite::Message::Text(text) => Some(Self::Text(text.as_str().to_owned())),
            tungstenite::Message::Binary(data) => Some(Self::Binary(data)),
            tungstenite::Message::Close(_) => Some(Self::Close),
            tungstenite::Message::Ping(_)
            | tungstenite::Message::Pong(_)
            | tungstenite::Message::Frame(_) => None,
        }
    }

    pub(crate) fn into_wire(self) -> tungstenite::Message {
        match self {
            Self::Text(text) => tungstenite::Message::Text(text.into()),
            Self::Binary(data) => tungstenite::Message::Binary(data),
            Self::Close => tungstenite::Message::Close(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_frame() {
        let frame = Message::json(&json!({ "subject": "news", "code": 200 })).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(frame.as_text().unwrap()).unwrap();
        assert_eq!(parsed["code"], 200);
    }

    #[test]
    fn test_control_frames_are_hidden() {
        assert_eq!(Message::from_wire(tungstenite::Message::Ping(Bytes::new())), None);
        assert_eq!(
            Message::from_wire(tungstenite::Message::Text("hi".into())),
            Some(Message::text("hi"))
        );
        assert!(Message::from_wire(tungstenite::Message::Close(None)).unwrap().is_close());
    }
}
