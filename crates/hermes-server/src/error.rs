//! Runtime error types.

use hermes_core::{BusError, SubjectError};
use thiserror::Error;

/// Errors returned by [`Runtime`](crate::Runtime) lifecycle operations.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// `register` or `start` was called on a running runtime.
    #[error("runtime is already started")]
    AlreadyStarted,

    /// `stop` was called on a runtime that is not running.
    #[error("runtime is not started")]
    NotStarted,

    /// Two handlers were declared for one subject.
    #[error("a handler is already registered for subject {0:?}")]
    DuplicateSubject(String),

    /// `start` was called with no handlers registered.
    #[error("no handlers registered")]
    NoHandlers,

    /// The builder was not given a bus connector.
    #[error("no bus connector configured")]
    MissingConnector,

    /// A handler subject is not a valid subject.
    #[error(transparent)]
    InvalidSubject(#[from] SubjectError),

    /// Connecting, subscribing, or draining failed.
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
}

impl RuntimeError {
    /// Create a duplicate subject error.
    pub fn duplicate_subject(subject: impl Into<String>) -> Self {
        Self::DuplicateSubject(subject.into())
    }
}
