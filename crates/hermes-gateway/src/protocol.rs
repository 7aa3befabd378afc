//! Client-facing message shapes.
//!
//! | Direction | Transport | Shape |
//! |-----------|-----------|-------|
//! | in | HTTP body | `{data}` |
//! | out | HTTP body | `{code, body?}` |
//! | in | WS frame | `{subject, action, headers?}` |
//! | out | WS frame | `{subject, code, body?}` |

use hermes_core::{codec, status, Headers, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::GatewayError;

/// HTTP header naming the target subject.
pub const SUBJECT_HEADER: &str = "nats-subject";

/// HTTP header carrying the caller's trace id.
pub const TRACE_ID_HEADER: &str = "trace-id";

/// Body of an HTTP gateway request.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HttpRequestBody {
    /// Request body forwarded to the handler.
    #[serde(default)]
    pub data: Option<Value>,
}

/// Body of an HTTP gateway response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpReply {
    /// Handler code.
    pub code: u16,
    /// Handler body, or the error payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl HttpReply {
    /// Reshapes a bus response.
    pub fn from_response(response: Response) -> Self {
        Self {
            code: response.code,
            body: response.body,
        }
    }

    /// Reply for a gateway-side failure.
    pub fn from_error(error: &GatewayError) -> Self {
        Self {
            code: error.code(),
            body: Some(error.body()),
        }
    }
}

/// What a WebSocket client asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Start receiving events on a subject.
    Subscribe,
    /// Stop receiving events on a subject.
    Unsubscribe,
}

impl Action {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// A WebSocket client frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientFrame {
    /// Target subject.
    pub subject: String,
    /// Requested action.
    pub action: Action,
    /// Headers forwarded to the auth and namespace steps.
    #[serde(default)]
    pub headers: Headers,
}

impl ClientFrame {
    /// Parses a text frame.
    ///
    /// On failure the error carries whatever subject could be recovered so
    /// the error frame can name it.
    pub fn parse(text: &str) -> Result<Self, (String, GatewayError)> {
        serde_json::from_str(text).map_err(|err| {
            let subject = serde_json::from_str::<Value>(text)
                .ok()
                .and_then(|value| value.get("subject")?.as_str().map(str::to_string))
                .unwrap_or_default();
            (subject, GatewayError::malformed(err))
        })
    }
}

/// A frame pushed to a WebSocket client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerFrame {
    /// Subject the frame concerns, without any namespace suffix.
    pub subject: String,
    /// Event or error code.
    pub code: u16,
    /// Event body or error payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl ServerFrame {
    /// Frame for a bus event published on `subject`.
    ///
    /// Events are normally response envelopes; a bare request envelope is
    /// delivered with code 200.
    pub fn from_event(subject: &str, payload: &[u8]) -> Self {
        if let Ok(Some(response)) = codec::decode_response(payload) {
            return Self {
                subject: subject.to_string(),
                code: response.code,
                body: response.body,
            };
        }
        match codec::decode_request(payload) {
            Ok(Some(request)) => Self {
                subject: subject.to_string(),
                code: status::OK,
                body: request.body,
            },
            _ => Self::error(
                subject,
                status::INTERNAL_SERVER_ERROR,
                json!({ "message": "malformed event" }),
            ),
        }
    }

    /// Error frame.
    pub fn error(subject: &str, code: u16, body: Value) -> Self {
        Self {
            subject: subject.to_string(),
            code,
            body: Some(body),
        }
    }

    /// Error frame for a gateway failure.
    pub fn from_error(subject: &str, error: &GatewayError) -> Self {
        Self::error(subject, error.code(), error.body())
    }

    /// Acknowledgement of a subscribe or unsubscribe.
    pub fn ack(subject: &str, action: Action) -> Self {
        Self {
            subject: subject.to_string(),
            code: status::OK,
            body: Some(json!({ "action": action.as_str() })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hermes_core::Request;

    #[test]
    fn test_parse_client_frame() {
        let frame = ClientFrame::parse(
            r#"{"subject":"chat.room","action":"subscribe","headers":{"token":"t"}}"#,
        )
        .unwrap();
        assert_eq!(frame.subject, "chat.room");
        assert_eq!(frame.action, Action::Subscribe);
        assert_eq!(frame.headers.get("token"), Some(&json!("t")));

        let bare = ClientFrame::parse(r#"{"subject":"a","action":"unsubscribe"}"#).unwrap();
        assert!(bare.headers.is_empty());
    }

    #[test]
    fn test_parse_failure_recovers_subject() {
        let (subject, err) = ClientFrame::parse(r#"{"subject":"chat","action":"shout"}"#).unwrap_err();
        assert_eq!(subject, "chat");
        assert_eq!(err.code(), 400);

        let (subject, _) = ClientFrame::parse("not json").unwrap_err();
        assert_eq!(subject, "");
    }

    #[test]
    fn test_event_frames() {
        let response = codec::encode_response(&Response::error(404, json!({ "id": 7 }))).unwrap();
        let frame = ServerFrame::from_event("orders", &response);
        assert_eq!(frame.code, 404);
        assert_eq!(frame.body, Some(json!({ "id": 7 })));

        let request = codec::encode_request(&Request::new("tick")).unwrap();
        let frame = ServerFrame::from_event("clock", &request);
        assert_eq!((frame.code, frame.body), (200, Some(json!("tick"))));

        assert_eq!(ServerFrame::from_event("x", b"\x00garbage").code, 500);
    }

    #[test]
    fn test_wire_shapes() {
        let ack = serde_json::to_value(ServerFrame::ack("news", Action::Unsubscribe)).unwrap();
        assert_eq!(
            ack,
            json!({ "subject": "news", "code": 200, "body": { "action": "unsubscribe" } })
        );

        let reply = serde_json::to_value(HttpReply { code: 200, body: None }).unwrap();
        assert_eq!(reply, json!({ "code": 200 }));
    }
}
