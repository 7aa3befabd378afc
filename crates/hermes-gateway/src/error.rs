//! Gateway error types.

use hermes_core::{status, BusError, SubjectError};
use hermes_ws::WsError;
use serde_json::{json, Value};
use thiserror::Error;

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors raised while serving a gateway request or connection.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The request named no subject.
    #[error("missing {0} header")]
    MissingSubject(&'static str),

    /// The subject failed the ingress syntax check.
    #[error(transparent)]
    InvalidSubject(#[from] SubjectError),

    /// The request was not `application/json`.
    #[error("unsupported content type {0:?}")]
    UnsupportedContentType(String),

    /// The HTTP body exceeded the configured limit.
    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge {
        /// Configured limit.
        limit: usize,
    },

    /// The HTTP body or WebSocket frame could not be parsed.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// An auth or namespace step answered with a non-200 code.
    #[error("{step} rejected the request with code {code}")]
    Rejected {
        /// Subject of the step that failed.
        step: String,
        /// Code it answered with.
        code: u16,
        /// Error payload it answered with.
        body: Option<Value>,
    },

    /// Namespace resolution is required but produced no namespace.
    #[error("namespace lookup for {0:?} returned no namespace")]
    MissingNamespace(String),

    /// The bus failed.
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// The WebSocket failed.
    #[error("websocket error: {0}")]
    Ws(#[from] WsError),

    /// Listener IO failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Creates a malformed request error.
    pub fn malformed(reason: impl ToString) -> Self {
        Self::Malformed(reason.to_string())
    }

    /// Creates a rejection by the step on `step`.
    pub fn rejected(step: impl Into<String>, code: u16, body: Option<Value>) -> Self {
        Self::Rejected {
            step: step.into(),
            code,
            body,
        }
    }

    /// Wire code this error is reported with.
    pub fn code(&self) -> u16 {
        match self {
            Self::MissingSubject(_)
            | Self::InvalidSubject(_)
            | Self::UnsupportedContentType(_)
            | Self::BodyTooLarge { .. }
            | Self::Malformed(_)
            | Self::Bus(BusError::Codec(_)) => status::BAD_REQUEST,
            Self::Rejected { code, .. } => *code,
            Self::MissingNamespace(_) | Self::Bus(_) | Self::Ws(_) | Self::Io(_) => {
                status::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Error payload reported to the client.
    ///
    /// Rejections pass the upstream payload through; internal failures are
    /// not described to the client.
    pub fn body(&self) -> Value {
        match self {
            Self::Rejected { body, .. } => body.clone().unwrap_or(Value::Null),
            Self::Bus(BusError::Codec(_)) => json!({ "message": "malformed reply" }),
            Self::MissingNamespace(_) | Self::Bus(_) | Self::Ws(_) | Self::Io(_) => {
                json!({ "message": "Internal server error" })
            }
            other => json!({ "message": other.to_string() }),
        }
    }
}
