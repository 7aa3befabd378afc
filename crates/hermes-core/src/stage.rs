//! Stage results.
//!
//! Stages distinguish two ways of failing:
//!
//! - a [`Rejection`] is an expected outcome (bad input, missing credentials,
//!   a business rule) and carries a wire code plus an `errors` payload;
//! - a [`Fault`] is anything unexpected (an I/O error, a panic) and always
//!   maps to code 500.
//!
//! Any `std::error::Error` converts into a fault, so `?` works inside stages.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::bus::BoxFuture;
use crate::context::{AuthorizationContext, HandleContext, Injection, ValidationContext};
use crate::envelope::{status, ErrorCategory, Headers, Request};

/// Result type returned by every stage.
pub type StageResult<T> = Result<T, StageError>;

/// Validate stage function.
pub type ValidateFn = Arc<
    dyn for<'a> Fn(ValidationContext<'a>, &'a Request) -> BoxFuture<'a, StageResult<Outcome>>
        + Send
        + Sync,
>;

/// Authorize stage function.
pub type AuthorizeFn = Arc<
    dyn for<'a> Fn(AuthorizationContext<'a>, &'a Request) -> BoxFuture<'a, StageResult<Outcome>>
        + Send
        + Sync,
>;

/// Handle stage function.
pub type HandleFn = Arc<
    dyn for<'a> Fn(HandleContext<'a>, &'a Request) -> BoxFuture<'a, StageResult<Outcome>>
        + Send
        + Sync,
>;

/// Observer invoked before a rejection is replied.
pub type RespondErrorFn =
    Arc<dyn for<'a> Fn(&'a Injection, &'a Rejection) -> BoxFuture<'a, ()> + Send + Sync>;

/// Observer invoked before a fault is replied.
pub type RespondUnhandledFn =
    Arc<dyn for<'a> Fn(&'a Injection, &'a Fault) -> BoxFuture<'a, ()> + Send + Sync>;

/// Successful result of validate, authorize, or handle.
///
/// For validate and authorize, `headers` are merged onto the request and a
/// `Some` body replaces the request body. For handle, `body` becomes the
/// response body and `headers` are merged onto the outbound headers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    /// Headers to merge; these win over existing ones.
    pub headers: Option<Headers>,
    /// Body to carry forward.
    pub body: Option<Value>,
}

impl Outcome {
    /// An outcome that changes nothing.
    pub fn ok() -> Self {
        Self::default()
    }

    /// An outcome carrying `body`.
    pub fn body(body: impl Into<Value>) -> Self {
        Self {
            headers: None,
            body: Some(body.into()),
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers
            .get_or_insert_with(Headers::new)
            .insert(name.into(), value.into());
        self
    }

    /// Adds every header in `headers`.
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers.get_or_insert_with(Headers::new).extend(headers);
        self
    }

    /// Applies this outcome to `request`.
    pub fn apply(self, mut request: Request) -> Request {
        if let Some(headers) = self.headers {
            request.headers.extend(headers);
        }
        if self.body.is_some() {
            request.body = self.body;
        }
        request
    }
}

/// A typed, expected failure.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    code: u16,
    errors: Value,
    stage: Option<String>,
}

impl Rejection {
    /// Creates a rejection with an explicit code.
    pub fn new(code: u16, errors: impl Into<Value>) -> Self {
        Self {
            code,
            errors: errors.into(),
            stage: None,
        }
    }

    /// Creates a rejection for `category`.
    pub fn category(category: ErrorCategory, errors: impl Into<Value>) -> Self {
        Self::new(category.code(), errors)
    }

    /// 400.
    pub fn bad_request(errors: impl Into<Value>) -> Self {
        Self::new(status::BAD_REQUEST, errors)
    }

    /// 401.
    pub fn unauthorized(errors: impl Into<Value>) -> Self {
        Self::new(status::UNAUTHORIZED, errors)
    }

    /// 403.
    pub fn forbidden(errors: impl Into<Value>) -> Self {
        Self::new(status::FORBIDDEN, errors)
    }

    /// 404.
    pub fn not_found(errors: impl Into<Value>) -> Self {
        Self::new(status::NOT_FOUND, errors)
    }

    /// 500 raised deliberately by a stage.
    pub fn internal(errors: impl Into<Value>) -> Self {
        Self::new(status::INTERNAL_SERVER_ERROR, errors)
    }

    /// Records the stage that rejected. The first recorded stage sticks.
    #[must_use]
    pub fn at(mut self, stage: impl Into<String>) -> Self {
        if self.stage.is_none() {
            self.stage = Some(stage.into());
        }
        self
    }

    /// Wire code.
    pub fn code(&self) -> u16 {
        self.code
    }

    /// Error payload.
    pub fn errors(&self) -> &Value {
        &self.errors
    }

    /// Stage that rejected, once known.
    pub fn stage(&self) -> Option<&str> {
        self.stage.as_deref()
    }

    /// Consumes the rejection, returning its payload.
    pub fn into_errors(self) -> Value {
        self.errors
    }
}

/// Where a fault was raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultOrigin {
    /// Not yet attributed.
    Unknown,
    /// Inside a middleware hook.
    Middleware {
        /// Middleware id.
        id: String,
        /// Hook label, e.g. `before`.
        hook: String,
    },
    /// Inside validate, authorize, handle, or a response observer.
    Stage(String),
}

/// An unexpected failure.
pub struct Fault {
    error: anyhow::Error,
    origin: FaultOrigin,
    panicked: bool,
}

impl Fault {
    /// Wraps an error.
    pub fn new(error: impl Into<anyhow::Error>) -> Self {
        Self {
            error: error.into(),
            origin: FaultOrigin::Unknown,
            panicked: false,
        }
    }

    /// Creates a fault from a message.
    pub fn msg(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        Self::new(anyhow::Error::msg(message))
    }

    /// Creates a fault from a caught panic payload.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self {
            error: anyhow::anyhow!("panicked: {message}"),
            origin: FaultOrigin::Unknown,
            panicked: true,
        }
    }

    /// Attributes the fault to a middleware hook, unless already attributed.
    #[must_use]
    pub fn in_middleware(mut self, id: &str, hook: &str) -> Self {
        if self.origin == FaultOrigin::Unknown {
            self.origin = FaultOrigin::Middleware {
                id: id.to_string(),
                hook: hook.to_string(),
            };
        }
        self
    }

    /// Attributes the fault to a named stage, unless already attributed.
    #[must_use]
    pub fn at_stage(mut self, stage: &str) -> Self {
        if self.origin == FaultOrigin::Unknown {
            self.origin = FaultOrigin::Stage(stage.to_string());
        }
        self
    }

    /// Where the fault was raised.
    pub fn origin(&self) -> &FaultOrigin {
        &self.origin
    }

    /// Returns `true` when a middleware hook raised the fault.
    pub fn is_middleware(&self) -> bool {
        matches!(self.origin, FaultOrigin::Middleware { .. })
    }

    /// Returns `true` when the fault came from a panic.
    pub fn is_panic(&self) -> bool {
        self.panicked
    }

    /// Underlying error.
    pub fn error(&self) -> &anyhow::Error {
        &self.error
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.error)
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fault")
            .field("error", &self.error)
            .field("origin", &self.origin)
            .field("panicked", &self.panicked)
            .finish()
    }
}

/// Failure of a stage.
#[derive(Debug)]
pub enum StageError {
    /// Expected failure; replied with its own code.
    Rejected(Rejection),
    /// Unexpected failure; replied with 500.
    Unhandled(Fault),
}

impl StageError {
    /// Wire code this failure is replied with.
    pub fn code(&self) -> u16 {
        match self {
            Self::Rejected(rejection) => rejection.code(),
            Self::Unhandled(_) => status::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Rejection> for StageError {
    fn from(rejection: Rejection) -> Self {
        Self::Rejected(rejection)
    }
}

impl From<Fault> for StageError {
    fn from(fault: Fault) -> Self {
        Self::Unhandled(fault)
    }
}

impl<E> From<E> for StageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self::Unhandled(Fault::new(error))
    }
}
