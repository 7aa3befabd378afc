//! Request and response envelopes.
//!
//! Every payload on the bus travels inside an envelope: a header map that is
//! propagated (and mutated) through the pipeline, an optional JSON body, and
//! on responses a numeric status code.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope headers: an ordered JSON object.
pub type Headers = serde_json::Map<String, Value>;

/// Numeric status codes carried on the wire.
pub mod status {
    /// Success.
    pub const OK: u16 = 200;
    /// Validation failure or malformed input.
    pub const BAD_REQUEST: u16 = 400;
    /// Missing or invalid credentials.
    pub const UNAUTHORIZED: u16 = 401;
    /// Authenticated but not permitted.
    pub const FORBIDDEN: u16 = 403;
    /// Target does not exist.
    pub const NOT_FOUND: u16 = 404;
    /// Unhandled fault.
    pub const INTERNAL_SERVER_ERROR: u16 = 500;

    /// Returns `true` for the success code.
    #[must_use]
    pub const fn is_ok(code: u16) -> bool {
        code == OK
    }
}

/// Error classes with their default wire code.
///
/// # Example
///
/// ```
/// use hermes_core::ErrorCategory;
///
/// assert_eq!(ErrorCategory::Validation.code(), 400);
/// assert_eq!(ErrorCategory::Internal.code(), 500);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Input failed validation (400).
    Validation,
    /// Caller is not authenticated (401).
    Unauthorized,
    /// Caller is not allowed (403).
    Forbidden,
    /// Requested entity is missing (404).
    NotFound,
    /// Server-side failure (500).
    Internal,
}

impl ErrorCategory {
    /// Returns the wire code for this category.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::Validation => status::BAD_REQUEST,
            Self::Unauthorized => status::UNAUTHORIZED,
            Self::Forbidden => status::FORBIDDEN,
            Self::NotFound => status::NOT_FOUND,
            Self::Internal => status::INTERNAL_SERVER_ERROR,
        }
    }

    /// Maps a wire code back onto a category, if it is one of the known error codes.
    #[must_use]
    pub const fn from_code(code: u16) -> Option<Self> {
        match code {
            status::BAD_REQUEST => Some(Self::Validation),
            status::UNAUTHORIZED => Some(Self::Unauthorized),
            status::FORBIDDEN => Some(Self::Forbidden),
            status::NOT_FOUND => Some(Self::NotFound),
            status::INTERNAL_SERVER_ERROR => Some(Self::Internal),
            _ => None,
        }
    }
}

/// Inbound envelope: `{headers, body?}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Headers forwarded through every stage.
    #[serde(default)]
    pub headers: Headers,

    /// Request body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Request {
    /// Creates a request carrying `body` and no headers.
    #[must_use]
    pub fn new(body: impl Into<Value>) -> Self {
        Self {
            headers: Headers::new(),
            body: Some(body.into()),
        }
    }

    /// Creates a request with neither headers nor body.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Sets a header, returning the request.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Replaces every header.
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Returns a header as a string slice, if present and a string.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(Value::as_str)
    }
}

/// Outbound envelope: `{headers, body?, code}`.
///
/// Error responses carry the stage's `errors` payload in `body`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Headers as they stood when the pipeline finished.
    #[serde(default)]
    pub headers: Headers,

    /// Response body, or the error payload on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,

    /// Wire status code.
    pub code: u16,
}

impl Response {
    /// Creates a `200` response.
    #[must_use]
    pub fn ok(headers: Headers, body: Option<Value>) -> Self {
        Self {
            headers,
            body,
            code: status::OK,
        }
    }

    /// Creates an error response carrying `errors` as its body.
    #[must_use]
    pub fn error(code: u16, errors: Value) -> Self {
        Self {
            headers: Headers::new(),
            body: Some(errors),
            code,
        }
    }

    /// Creates the standard `500` reply used for unhandled faults.
    #[must_use]
    pub fn internal_error() -> Self {
        Self::error(
            status::INTERNAL_SERVER_ERROR,
            serde_json::json!({ "message": "Internal server error" }),
        )
    }

    /// Returns `true` when the code is `200`.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        status::is_ok(self.code)
    }
}
