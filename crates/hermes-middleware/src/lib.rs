//! # Hermes Middleware
//!
//! Middleware composition and the pipeline executor.
//!
//! A handler's pipeline runs these stages in order, stopping at the first
//! rejection or fault:
//!
//! ```text
//! before_all -> before_validate -> validate -> after_validate
//!   -> before_authorize -> authorize -> after_authorize
//!   -> before_handle -> handle -> after_handle -> after_all
//! ```
//!
//! `before_*` hooks run in declaration order; `after_*` hooks run in reverse
//! declaration order, so the first declared middleware wraps everything else.
//!
//! ## Modules
//!
//! - [`middleware`] - the [`Middleware`] trait, hooks, and the collapsed adapter
//! - [`chain`] - [`MiddlewareChain`], the per-handler composer
//! - [`pipeline`] - [`Pipeline`], the per-message state machine

#![doc(html_root_url = "https://docs.rs/hermes-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod chain;
pub mod middleware;
pub mod pipeline;

pub use chain::{DynMiddleware, MiddlewareChain, MiddlewareStates};
pub use middleware::{
    Collapsed, Hook, HookSet, InitContext, Middleware, MiddlewareFactory, SimpleMiddleware,
};
pub use pipeline::{Pipeline, PipelineBuilder, Stages, Terminal, NO_DATA};
