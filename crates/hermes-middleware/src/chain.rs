//! The middleware composer.
//!
//! A [`MiddlewareChain`] is built once per handler from its middleware
//! instances. For each [`Hook`] it precomputes the run order: declaration
//! order for `before_*` hooks, reverse declaration order for `after_*` hooks.
//! Running a hook feeds each middleware the previous one's output, logs a
//! `[subject][id][hook]Handling` line per middleware, and turns errors and
//! panics into attributed [`StageError`]s.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use hermes_core::{
    AfterContext, BeforeContext, BoxFuture, Fault, Injection, LogService, Request, Response,
    StageError, StageResult,
};

use crate::middleware::{Hook, HookSet, Middleware};

/// Per-message middleware state slot.
pub type StateSlot = dyn Any + Send + Sync + 'static;

/// Object-safe form of [`Middleware`], implemented for every middleware.
pub trait DynMiddleware: Send + Sync {
    /// Middleware id.
    fn name(&self) -> &str;

    /// Hooks the middleware implements.
    fn enabled_hooks(&self) -> HookSet;

    /// Fresh per-message state.
    fn new_state(&self) -> Box<StateSlot>;

    /// Invokes a `before_*` hook.
    fn call_before<'a>(
        &'a self,
        hook: Hook,
        ctx: BeforeContext<'a>,
        state: &'a mut StateSlot,
        request: Request,
    ) -> BoxFuture<'a, StageResult<Request>>;

    /// Invokes `after_validate` or `after_authorize`.
    fn call_after_request<'a>(
        &'a self,
        hook: Hook,
        ctx: AfterContext<'a>,
        state: &'a mut StateSlot,
        request: Request,
    ) -> BoxFuture<'a, StageResult<Request>>;

    /// Invokes `after_handle` or `after_all`.
    fn call_after_response<'a>(
        &'a self,
        hook: Hook,
        ctx: AfterContext<'a>,
        state: &'a mut StateSlot,
        response: Response,
    ) -> BoxFuture<'a, StageResult<Response>>;
}

fn state_mismatch<'a, T: Send + 'a>(id: &str) -> BoxFuture<'a, StageResult<T>> {
    let fault = Fault::msg(format!("state type mismatch for middleware '{id}'"));
    Box::pin(async move { Err(StageError::Unhandled(fault)) })
}

impl<M: Middleware> DynMiddleware for M {
    fn name(&self) -> &str {
        Middleware::id(self)
    }

    fn enabled_hooks(&self) -> HookSet {
        Middleware::hooks(self)
    }

    fn new_state(&self) -> Box<StateSlot> {
        Box::new(M::State::default())
    }

    fn call_before<'a>(
        &'a self,
        hook: Hook,
        ctx: BeforeContext<'a>,
        state: &'a mut StateSlot,
        request: Request,
    ) -> BoxFuture<'a, StageResult<Request>> {
        let Some(state) = state.downcast_mut::<M::State>() else {
            return state_mismatch(Middleware::id(self));
        };
        match hook {
            Hook::BeforeAll => self.before_all(ctx, state, request),
            Hook::BeforeValidate => self.before_validate(ctx, state, request),
            Hook::BeforeAuthorize => self.before_authorize(ctx, state, request),
            Hook::BeforeHandle => self.before_handle(ctx, state, request),
            _ => Box::pin(async move { Ok(request) }),
        }
    }

    fn call_after_request<'a>(
        &'a self,
        hook: Hook,
        ctx: AfterContext<'a>,
        state: &'a mut StateSlot,
        request: Request,
    ) -> BoxFuture<'a, StageResult<Request>> {
        let Some(state) = state.downcast_mut::<M::State>() else {
            return state_mismatch(Middleware::id(self));
        };
        match hook {
            Hook::AfterValidate => self.after_validate(ctx, state, request),
            Hook::AfterAuthorize => self.after_authorize(ctx, state, request),
            _ => Box::pin(async move { Ok(request) }),
        }
    }

    fn call_after_response<'a>(
        &'a self,
        hook: Hook,
        ctx: AfterContext<'a>,
        state: &'a mut StateSlot,
        response: Response,
    ) -> BoxFuture<'a, StageResult<Response>> {
        let Some(state) = state.downcast_mut::<M::State>() else {
            return state_mismatch(Middleware::id(self));
        };
        match hook {
            Hook::AfterHandle => self.after_handle(ctx, state, response),
            Hook::AfterAll => self.after_all(ctx, state, response),
            _ => Box::pin(async move { Ok(response) }),
        }
    }
}

/// Runs `call` and awaits its future, catching panics from either.
pub(crate) async fn catch<'f, T, F>(call: F) -> Result<T, Box<dyn Any + Send>>
where
    F: FnOnce() -> BoxFuture<'f, T>,
{
    match std::panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
        Err(panic) => Err(panic),
    }
}

/// Per-message state for every middleware in a chain.
pub struct MiddlewareStates(Vec<Box<StateSlot>>);

impl MiddlewareStates {
    fn slot(&mut self, index: usize) -> StageResult<&mut StateSlot> {
        self.0
            .get_mut(index)
            .map(|slot| &mut **slot)
            .ok_or_else(|| StageError::Unhandled(Fault::msg(format!("no state slot {index}"))))
    }
}

impl fmt::Debug for MiddlewareStates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MiddlewareStates").field(&self.0.len()).finish()
    }
}

/// The composed middleware of one handler.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    entries: Vec<Arc<dyn DynMiddleware>>,
    order: [Vec<usize>; 8],
}

impl MiddlewareChain {
    /// Composes `entries`, given in declaration order.
    pub fn new(entries: Vec<Arc<dyn DynMiddleware>>) -> Self {
        let order = Hook::ALL.map(|hook| {
            let mut indices: Vec<usize> = entries
                .iter()
                .enumerate()
                .filter(|(_, m)| m.enabled_hooks().contains(hook))
                .map(|(i, _)| i)
                .collect();
            if !hook.is_before() {
                indices.reverse();
            }
            indices
        });
        Self { entries, order }
    }

    /// Number of middleware.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the chain has no middleware.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids of the middleware that run for `hook`, in run order.
    pub fn run_order(&self, hook: Hook) -> Vec<&str> {
        self.order[hook.index()]
            .iter()
            .map(|&i| self.entries[i].name())
            .collect()
    }

    /// Fresh state for one message.
    pub fn new_states(&self) -> MiddlewareStates {
        MiddlewareStates(self.entries.iter().map(|m| m.new_state()).collect())
    }

    fn scoped(injection: &Injection, middleware: &dyn DynMiddleware, hook: Hook) -> LogService {
        let log = injection.log().scope(middleware.name()).scope(hook.label());
        log.info("Handling");
        log
    }

    /// Runs a `before_*` hook across the chain.
    pub async fn run_before(
        &self,
        hook: Hook,
        injection: &mut Injection,
        states: &mut MiddlewareStates,
        mut request: Request,
    ) -> StageResult<Request> {
        for &index in &self.order[hook.index()] {
            let middleware = self.entries[index].as_ref();
            let log = Self::scoped(injection, middleware, hook);
            let state = states.slot(index)?;
            let ctx = BeforeContext::new(injection, log.clone());
            let result = catch(move || middleware.call_before(hook, ctx, state, request)).await;
            request = settle(middleware.name(), hook, &log, result)?;
        }
        Ok(request)
    }

    /// Runs `after_validate` or `after_authorize` across the chain.
    ///
    /// `seen` is the request the unwound stage received.
    pub async fn run_after_request(
        &self,
        hook: Hook,
        injection: &mut Injection,
        states: &mut MiddlewareStates,
        seen: &Request,
        mut request: Request,
    ) -> StageResult<Request> {
        for &index in &self.order[hook.index()] {
            let middleware = self.entries[index].as_ref();
            let log = Self::scoped(injection, middleware, hook);
            let state = states.slot(index)?;
            let ctx = AfterContext::new(injection, seen, log.clone());
            let result =
                catch(move || middleware.call_after_request(hook, ctx, state, request)).await;
            request = settle(middleware.name(), hook, &log, result)?;
        }
        Ok(request)
    }

    /// Runs `after_handle` or `after_all` across the chain.
    pub async fn run_after_response(
        &self,
        hook: Hook,
        injection: &mut Injection,
        states: &mut MiddlewareStates,
        seen: &Request,
        mut response: Response,
    ) -> StageResult<Response> {
        for &index in &self.order[hook.index()] {
            let middleware = self.entries[index].as_ref();
            let log = Self::scoped(injection, middleware, hook);
            let state = states.slot(index)?;
            let ctx = AfterContext::new(injection, seen, log.clone());
            let result =
                catch(move || middleware.call_after_response(hook, ctx, state, response)).await;
            response = settle(middleware.name(), hook, &log, result)?;
        }
        Ok(response)
    }
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<&str> = self.entries.iter().map(|m| m.name()).collect();
        f.debug_struct("MiddlewareChain").field("middleware", &ids).finish()
    }
}

fn settle<T>(
    id: &str,
    hook: Hook,
    log: &LogService,
    result: Result<StageResult<T>, Box<dyn Any + Send>>,
) -> StageResult<T> {
    let fault = match result {
        Ok(Ok(value)) => return Ok(value),
        Ok(Err(StageError::Rejected(rejection))) => {
            log.error(rejection.errors());
            return Err(StageError::Rejected(
                rejection.at(format!("{id}.{}", hook.label())),
            ));
        }
        Ok(Err(StageError::Unhandled(fault))) => fault,
        Err(panic) => Fault::from_panic(panic),
    };
    let fault = fault.in_middleware(id, hook.label());
    log.error(format_args!("Unhandled middleware error: {fault}"));
    tracing::error!(middleware = id, hook = %hook, error = %fault, "middleware fault");
    Err(StageError::Unhandled(fault))
}
