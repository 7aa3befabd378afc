//! Core middleware trait and types.
//!
//! A [`Middleware`] contributes hooks to some of the eight pipeline hook
//! points. Each handler builds its own instances through a
//! [`MiddlewareFactory`] when it is registered, and each message gets a fresh
//! [`Middleware::State`] shared by that middleware's hooks for the message.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Instant;
//! use hermes_core::{AfterContext, BeforeContext, BoxFuture, Request, Response, StageResult};
//! use hermes_middleware::{Hook, HookSet, Middleware};
//!
//! struct Timing;
//!
//! impl Middleware for Timing {
//!     type State = Option<Instant>;
//!
//!     fn id(&self) -> &str {
//!         "timing"
//!     }
//!
//!     fn hooks(&self) -> HookSet {
//!         HookSet::new().with(Hook::BeforeAll).with(Hook::AfterAll)
//!     }
//!
//!     fn before_all<'a>(
//!         &'a self,
//!         _ctx: BeforeContext<'a>,
//!         started: &'a mut Self::State,
//!         request: Request,
//!     ) -> BoxFuture<'a, StageResult<Request>> {
//!         *started = Some(Instant::now());
//!         Box::pin(async move { Ok(request) })
//!     }
//!
//!     fn after_all<'a>(
//!         &'a self,
//!         ctx: AfterContext<'a>,
//!         started: &'a mut Self::State,
//!         response: Response,
//!     ) -> BoxFuture<'a, StageResult<Response>> {
//!         if let Some(started) = started {
//!             ctx.log().info(format!("took {:?}", started.elapsed()));
//!         }
//!         Box::pin(async move { Ok(response) })
//!     }
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use hermes_core::{
    AfterContext, BeforeContext, BoxFuture, LogService, Request, Response, Services, StageResult,
};

use crate::chain::DynMiddleware;

/// A hook point in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    /// First stage of every message.
    BeforeAll,
    /// Right before validate.
    BeforeValidate,
    /// Right after validate.
    AfterValidate,
    /// Right before authorize.
    BeforeAuthorize,
    /// Right after authorize.
    AfterAuthorize,
    /// Right before handle.
    BeforeHandle,
    /// Right after handle; sees the response.
    AfterHandle,
    /// Last stage of every message; sees the response.
    AfterAll,
}

impl Hook {
    /// Every hook, in pipeline order.
    pub const ALL: [Hook; 8] = [
        Hook::BeforeAll,
        Hook::BeforeValidate,
        Hook::AfterValidate,
        Hook::BeforeAuthorize,
        Hook::AfterAuthorize,
        Hook::BeforeHandle,
        Hook::AfterHandle,
        Hook::AfterAll,
    ];

    /// Label used in log prefixes.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::BeforeAll => "before",
            Self::BeforeValidate => "before_validate",
            Self::AfterValidate => "after_validate",
            Self::BeforeAuthorize => "before_authorize",
            Self::AfterAuthorize => "after_authorize",
            Self::BeforeHandle => "before_handle",
            Self::AfterHandle => "after_handle",
            Self::AfterAll => "after",
        }
    }

    /// `true` for hooks that run in declaration order.
    #[must_use]
    pub const fn is_before(self) -> bool {
        matches!(
            self,
            Self::BeforeAll | Self::BeforeValidate | Self::BeforeAuthorize | Self::BeforeHandle
        )
    }

    /// `true` for hooks whose payload is the response.
    #[must_use]
    pub const fn sees_response(self) -> bool {
        matches!(self, Self::AfterHandle | Self::AfterAll)
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            Self::BeforeAll => 0,
            Self::BeforeValidate => 1,
            Self::AfterValidate => 2,
            Self::BeforeAuthorize => 3,
            Self::AfterAuthorize => 4,
            Self::BeforeHandle => 5,
            Self::AfterHandle => 6,
            Self::AfterAll => 7,
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The hooks a middleware implements.
///
/// Only hooks in the set are invoked (and logged) by the chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookSet(u8);

impl HookSet {
    /// The empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Every hook.
    #[must_use]
    pub const fn all() -> Self {
        Self(u8::MAX)
    }

    /// Adds `hook`.
    #[must_use]
    pub const fn with(self, hook: Hook) -> Self {
        Self(self.0 | (1 << hook.index()))
    }

    /// Returns `true` if `hook` is in the set.
    #[must_use]
    pub const fn contains(self, hook: Hook) -> bool {
        self.0 & (1 << hook.index()) != 0
    }

    /// Returns `true` if no hook is in the set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Hooks in the set, in pipeline order.
    pub fn iter(self) -> impl Iterator<Item = Hook> {
        Hook::ALL.into_iter().filter(move |h| self.contains(*h))
    }
}

impl FromIterator<Hook> for HookSet {
    fn from_iter<I: IntoIterator<Item = Hook>>(iter: I) -> Self {
        iter.into_iter().fold(Self::new(), Self::with)
    }
}

/// The staged middleware trait.
///
/// Every hook has a pass-through default; [`hooks`](Self::hooks) declares
/// which ones the pipeline should call.
///
/// # Invariants
///
/// - `before_*` hooks receive the previous middleware's output request
/// - `after_*` hooks run in reverse declaration order
/// - returning an error stops the pipeline; no further hook runs
pub trait Middleware: Send + Sync + 'static {
    /// Per-message state, created with `Default` for each message.
    type State: Default + Send + Sync + 'static;

    /// Identifier used in log prefixes.
    fn id(&self) -> &str;

    /// Hooks this middleware implements.
    fn hooks(&self) -> HookSet;

    /// Runs first for every message.
    fn before_all<'a>(
        &'a self,
        _ctx: BeforeContext<'a>,
        _state: &'a mut Self::State,
        request: Request,
    ) -> BoxFuture<'a, StageResult<Request>> {
        Box::pin(async move { Ok(request) })
    }

    /// Runs right before validate.
    fn before_validate<'a>(
        &'a self,
        _ctx: BeforeContext<'a>,
        _state: &'a mut Self::State,
        request: Request,
    ) -> BoxFuture<'a, StageResult<Request>> {
        Box::pin(async move { Ok(request) })
    }

    /// Runs right after validate with the validated request.
    fn after_validate<'a>(
        &'a self,
        _ctx: AfterContext<'a>,
        _state: &'a mut Self::State,
        request: Request,
    ) -> BoxFuture<'a, StageResult<Request>> {
        Box::pin(async move { Ok(request) })
    }

    /// Runs right before authorize.
    fn before_authorize<'a>(
        &'a self,
        _ctx: BeforeContext<'a>,
        _state: &'a mut Self::State,
        request: Request,
    ) -> BoxFuture<'a, StageResult<Request>> {
        Box::pin(async move { Ok(request) })
    }

    /// Runs right after authorize with the authorized request.
    fn after_authorize<'a>(
        &'a self,
        _ctx: AfterContext<'a>,
        _state: &'a mut Self::State,
        request: Request,
    ) -> BoxFuture<'a, StageResult<Request>> {
        Box::pin(async move { Ok(request) })
    }

    /// Runs right before handle.
    fn before_handle<'a>(
        &'a self,
        _ctx: BeforeContext<'a>,
        _state: &'a mut Self::State,
        request: Request,
    ) -> BoxFuture<'a, StageResult<Request>> {
        Box::pin(async move { Ok(request) })
    }

    /// Runs right after handle with the response.
    fn after_handle<'a>(
        &'a self,
        _ctx: AfterContext<'a>,
        _state: &'a mut Self::State,
        response: Response,
    ) -> BoxFuture<'a, StageResult<Response>> {
        Box::pin(async move { Ok(response) })
    }

    /// Runs last for every message that got this far.
    fn after_all<'a>(
        &'a self,
        _ctx: AfterContext<'a>,
        _state: &'a mut Self::State,
        response: Response,
    ) -> BoxFuture<'a, StageResult<Response>> {
        Box::pin(async move { Ok(response) })
    }
}

/// What a middleware factory sees when a handler is registered.
pub struct InitContext<'a> {
    subject: &'a str,
    services: &'a Services,
    log: LogService,
}

impl<'a> InitContext<'a> {
    /// Creates the context for the handler bound to `subject`.
    pub fn new(subject: &'a str, services: &'a Services, log: &LogService) -> Self {
        Self {
            subject,
            services,
            log: log.scope(subject),
        }
    }

    /// Subject of the handler being registered.
    pub fn subject(&self) -> &str {
        self.subject
    }

    /// Shared services.
    pub fn services(&self) -> &Services {
        self.services
    }

    /// Subject-scoped log.
    pub fn log(&self) -> &LogService {
        &self.log
    }
}

/// Builds one middleware instance per handler.
///
/// # Example
///
/// ```ignore
/// // fresh instance per handler, configured from the handler's subject
/// let factory = MiddlewareFactory::new(|init| Audit::for_subject(init.subject()));
///
/// // a cloneable value shared as a template
/// let factory = MiddlewareFactory::instance(Timing);
/// ```
#[derive(Clone)]
pub struct MiddlewareFactory {
    init: Arc<dyn Fn(&InitContext<'_>) -> Arc<dyn DynMiddleware> + Send + Sync>,
}

impl MiddlewareFactory {
    /// Creates a factory from an init function.
    pub fn new<M, F>(init: F) -> Self
    where
        M: Middleware,
        F: Fn(&InitContext<'_>) -> M + Send + Sync + 'static,
    {
        Self {
            init: Arc::new(move |ctx: &InitContext<'_>| {
                Arc::new(init(ctx)) as Arc<dyn DynMiddleware>
            }),
        }
    }

    /// Creates a factory that clones `middleware` for every handler.
    pub fn instance<M: Middleware + Clone>(middleware: M) -> Self {
        Self::new(move |_| middleware.clone())
    }

    /// Builds the instance for one handler.
    pub fn build(&self, ctx: &InitContext<'_>) -> Arc<dyn DynMiddleware> {
        (self.init)(ctx)
    }
}

impl fmt::Debug for MiddlewareFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareFactory").finish_non_exhaustive()
    }
}

/// The collapsed middleware interface: one `before` and one `after` hook.
pub trait SimpleMiddleware: Send + Sync + 'static {
    /// Per-message state shared by `before` and `after`.
    type State: Default + Send + Sync + 'static;

    /// Identifier used in log prefixes.
    fn id(&self) -> &str;

    /// Whether `before` should run.
    fn has_before(&self) -> bool {
        true
    }

    /// Whether `after` should run.
    fn has_after(&self) -> bool {
        true
    }

    /// Runs before everything else.
    fn before<'a>(
        &'a self,
        _ctx: BeforeContext<'a>,
        _state: &'a mut Self::State,
        request: Request,
    ) -> BoxFuture<'a, StageResult<Request>> {
        Box::pin(async move { Ok(request) })
    }

    /// Runs after everything else.
    fn after<'a>(
        &'a self,
        _ctx: AfterContext<'a>,
        _state: &'a mut Self::State,
        response: Response,
    ) -> BoxFuture<'a, StageResult<Response>> {
        Box::pin(async move { Ok(response) })
    }
}

/// Runs a [`SimpleMiddleware`] in the staged pipeline.
///
/// `before` maps to [`Hook::BeforeAll`] and `after` to [`Hook::AfterAll`].
#[derive(Debug, Clone)]
pub struct Collapsed<T>(pub T);

impl<T: SimpleMiddleware> Middleware for Collapsed<T> {
    type State = T::State;

    fn id(&self) -> &str {
        self.0.id()
    }

    fn hooks(&self) -> HookSet {
        let mut hooks = HookSet::new();
        if self.0.has_before() {
            hooks = hooks.with(Hook::BeforeAll);
        }
        if self.0.has_after() {
            hooks = hooks.with(Hook::AfterAll);
        }
        hooks
    }

    fn before_all<'a>(
        &'a self,
        ctx: BeforeContext<'a>,
        state: &'a mut Self::State,
        request: Request,
    ) -> BoxFuture<'a, StageResult<Request>> {
        self.0.before(ctx, state, request)
    }

    fn after_all<'a>(
        &'a self,
        ctx: AfterContext<'a>,
        state: &'a mut Self::State,
        response: Response,
    ) -> BoxFuture<'a, StageResult<Response>> {
        self.0.after(ctx, state, response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_ordering_kinds() {
        let before: Vec<Hook> = Hook::ALL.into_iter().filter(|h| h.is_before()).collect();
        assert_eq!(
            before,
            vec![Hook::BeforeAll, Hook::BeforeValidate, Hook::BeforeAuthorize, Hook::BeforeHandle]
        );
        assert!(Hook::AfterAll.sees_response());
        assert!(!Hook::AfterValidate.sees_response());
        assert_eq!(Hook::AfterAll.to_string(), "after");
    }

    #[test]
    fn test_hook_set() {
        let set: HookSet = [Hook::AfterAll, Hook::BeforeAll].into_iter().collect();
        assert!(set.contains(Hook::BeforeAll));
        assert!(!set.contains(Hook::BeforeHandle));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![Hook::BeforeAll, Hook::AfterAll]);
        assert!(HookSet::new().is_empty());
        assert_eq!(HookSet::all().iter().count(), 8);
    }

    struct Noop;

    impl SimpleMiddleware for Noop {
        type State = ();

        fn id(&self) -> &str {
            "noop"
        }

        fn has_after(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_collapsed_maps_to_outer_hooks() {
        let collapsed = Collapsed(Noop);
        assert_eq!(collapsed.id(), "noop");
        assert_eq!(collapsed.hooks(), HookSet::new().with(Hook::BeforeAll));
    }
}
