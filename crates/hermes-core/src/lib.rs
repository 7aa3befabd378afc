//! # Hermes Core
//!
//! Core types shared by every Hermes crate.
//!
//! - [`Request`] / [`Response`] - the envelopes exchanged over the bus
//! - [`codec`] - wire encoding of envelopes
//! - [`subject`] - subject syntax accepted at the gateway boundary
//! - [`Bus`] - the abstract messaging capability, with [`MemoryBus`] for tests
//! - [`Injection`] and the per-stage contexts handed to pipeline stages
//! - [`StageError`] - typed rejections versus unhandled faults
//! - [`LogService`] - prefixed, scoped logging used by the pipeline

#![doc(html_root_url = "https://docs.rs/hermes-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod bus;
pub mod codec;
mod context;
mod envelope;
mod log;
mod memory;
mod services;
mod stage;
pub mod subject;

pub use bus::{
    BoxFuture, BoxSubscription, Bus, BusClient, BusConnector, BusError, BusMessage, Subscription,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use codec::CodecError;
pub use context::{
    AfterContext, AuthorizationContext, BeforeContext, Extensions, HandleContext, Injection,
    ValidationContext,
};
pub use envelope::{status, ErrorCategory, Headers, Request, Response};
pub use log::{LogLevel, LogLine, LogService, LogSink, MemorySink, TracingSink};
pub use memory::MemoryBus;
pub use services::{ServiceError, Services};
pub use stage::{
    AuthorizeFn, Fault, FaultOrigin, HandleFn, Outcome, Rejection, RespondErrorFn,
    RespondUnhandledFn, StageError, StageResult, ValidateFn,
};
pub use subject::{Subject, SubjectError};
