//! Handler declarations and the handler registry.
//!
//! A [`Handler`] names a subject, its staged functions, and the middleware
//! factories to instantiate for it. The registry turns each declaration into
//! a [`Pipeline`] once, at registration, so every handler owns its own
//! middleware instances.
//!
//! # Example
//!
//! ```rust,ignore
//! use hermes_server::Handler;
//!
//! let echo = Handler::new("echo")
//!     .validate(|ctx, _req| Box::pin(async move { ctx.ok() }))
//!     .handle(|ctx, req| Box::pin(async move { ctx.ok_with(req.body.clone()) }));
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use hermes_core::{
    subject, AuthorizationContext, BoxFuture, Fault, HandleContext, Injection, LogService,
    Outcome, Rejection, Request, Services, StageResult, ValidationContext,
};
use hermes_middleware::{InitContext, Middleware, MiddlewareFactory, Pipeline, Stages};

use crate::error::RuntimeError;

/// A handler declaration.
#[derive(Debug, Clone)]
#[must_use]
pub struct Handler {
    subject: String,
    middleware: Vec<MiddlewareFactory>,
    stages: Stages,
}

impl Handler {
    /// Declares a handler for `subject`.
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            middleware: Vec::new(),
            stages: Stages::default(),
        }
    }

    /// Subject the handler serves.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Appends a middleware factory. Declaration order is onion order.
    pub fn middleware(mut self, factory: MiddlewareFactory) -> Self {
        self.middleware.push(factory);
        self
    }

    /// Appends a cloneable middleware value.
    pub fn layer<M: Middleware + Clone>(self, middleware: M) -> Self {
        self.middleware(MiddlewareFactory::instance(middleware))
    }

    /// Sets the validate stage.
    pub fn validate<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(ValidationContext<'a>, &'a Request) -> BoxFuture<'a, StageResult<Outcome>>
            + Send
            + Sync
            + 'static,
    {
        self.stages.validate = Some(Arc::new(f));
        self
    }

    /// Sets the authorize stage.
    pub fn authorize<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(AuthorizationContext<'a>, &'a Request) -> BoxFuture<'a, StageResult<Outcome>>
            + Send
            + Sync
            + 'static,
    {
        self.stages.authorize = Some(Arc::new(f));
        self
    }

    /// Sets the handle stage.
    pub fn handle<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(HandleContext<'a>, &'a Request) -> BoxFuture<'a, StageResult<Outcome>>
            + Send
            + Sync
            + 'static,
    {
        self.stages.handle = Some(Arc::new(f));
        self
    }

    /// Sets the observer invoked before a rejection is replied.
    pub fn respond_error<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a Injection, &'a Rejection) -> BoxFuture<'a, ()> + Send + Sync + 'static,
    {
        self.stages.respond_error = Some(Arc::new(f));
        self
    }

    /// Sets the observer invoked before a fault is replied.
    pub fn respond_unhandled_error<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a Injection, &'a Fault) -> BoxFuture<'a, ()> + Send + Sync + 'static,
    {
        self.stages.respond_unhandled_error = Some(Arc::new(f));
        self
    }

    /// Instantiates the handler's middleware and composes its pipeline.
    pub fn build(&self, services: &Services, log: &LogService) -> Pipeline {
        let init = InitContext::new(&self.subject, services, log);
        self.middleware
            .iter()
            .fold(
                Pipeline::builder(self.subject.clone()).stages(self.stages.clone()),
                |builder, factory| builder.middleware(factory.build(&init)),
            )
            .build()
    }
}

/// Subject to pipeline bindings.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    pipelines: BTreeMap<String, Arc<Pipeline>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a batch of handlers.
    ///
    /// The batch is checked as a whole first: a subject that is not a
    /// literal bus subject, or one already registered or repeated within the
    /// batch, fails the call and registers nothing.
    pub fn register(
        &mut self,
        handlers: Vec<Handler>,
        services: &Services,
        log: &LogService,
    ) -> Result<(), RuntimeError> {
        let mut batch: Vec<&str> = Vec::with_capacity(handlers.len());
        for handler in &handlers {
            subject::check_literal(handler.subject())?;
            if self.pipelines.contains_key(handler.subject()) || batch.contains(&handler.subject()) {
                return Err(RuntimeError::duplicate_subject(handler.subject()));
            }
            batch.push(handler.subject());
        }

        for handler in &handlers {
            let pipeline = handler.build(services, log);
            tracing::debug!(
                subject = %handler.subject(),
                middleware = pipeline.chain().len(),
                "handler registered"
            );
            self.pipelines
                .insert(handler.subject().to_string(), Arc::new(pipeline));
        }
        Ok(())
    }

    /// Looks up the pipeline for `subject`.
    pub fn get(&self, subject: &str) -> Option<Arc<Pipeline>> {
        self.pipelines.get(subject).cloned()
    }

    /// Registered subjects, sorted.
    pub fn subjects(&self) -> Vec<String> {
        self.pipelines.keys().cloned().collect()
    }

    /// Every registered pipeline.
    pub fn pipelines(&self) -> Vec<Arc<Pipeline>> {
        self.pipelines.values().cloned().collect()
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Removes every handler.
    pub fn clear(&mut self) {
        self.pipelines.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hermes_core::{BeforeContext, MemorySink};
    use hermes_middleware::{Hook, HookSet};

    fn log() -> LogService {
        LogService::new(Arc::new(MemorySink::new()))
    }

    fn echo(subject: &str) -> Handler {
        Handler::new(subject).handle(|ctx, req| Box::pin(async move { ctx.ok_with(req.body.clone()) }))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = HandlerRegistry::new();
        registry
            .register(vec![echo("b.echo"), echo("a.echo")], &Services::new(), &log())
            .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.subjects(), vec!["a.echo", "b.echo"]);
        assert_eq!(registry.get("a.echo").unwrap().subject(), "a.echo");
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_duplicate_subject_rejected() {
        let mut registry = HandlerRegistry::new();
        registry.register(vec![echo("echo")], &Services::new(), &log()).unwrap();

        let err = registry
            .register(vec![echo("other"), echo("echo")], &Services::new(), &log())
            .unwrap_err();
        assert!(matches!(err, RuntimeError::DuplicateSubject(s) if s == "echo"));
        // nothing from the failed batch was kept
        assert_eq!(registry.subjects(), vec!["echo"]);
    }

    #[test]
    fn test_duplicate_within_batch_rejected() {
        let mut registry = HandlerRegistry::new();
        let err = registry
            .register(vec![echo("echo"), echo("echo")], &Services::new(), &log())
            .unwrap_err();
        assert!(matches!(err, RuntimeError::DuplicateSubject(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_service_style_subjects_accepted() {
        let mut registry = HandlerRegistry::new();
        registry
            .register(vec![echo("user-service.get"), echo("billing_v2.charge")], &Services::new(), &log())
            .unwrap();
        assert_eq!(registry.subjects(), vec!["billing_v2.charge", "user-service.get"]);
    }

    #[test]
    fn test_invalid_subject_rejected() {
        let mut registry = HandlerRegistry::new();
        let err = registry
            .register(vec![echo("orders.*")], &Services::new(), &log())
            .unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidSubject(_)));
    }

    #[derive(Clone)]
    struct Noop;

    impl Middleware for Noop {
        type State = ();

        fn id(&self) -> &str {
            "noop"
        }

        fn hooks(&self) -> HookSet {
            HookSet::new().with(Hook::BeforeAll)
        }

        fn before_all<'a>(
            &'a self,
            ctx: BeforeContext<'a>,
            _state: &'a mut (),
            request: Request,
        ) -> BoxFuture<'a, StageResult<Request>> {
            Box::pin(async move { ctx.ok(request) })
        }
    }

    #[test]
    fn test_each_handler_gets_its_own_middleware() {
        let built = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        let factory = MiddlewareFactory::new(move |_init| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Noop
        });

        let mut registry = HandlerRegistry::new();
        registry
            .register(
                vec![
                    echo("a").middleware(factory.clone()),
                    echo("b").middleware(factory).layer(Noop),
                ],
                &Services::new(),
                &log(),
            )
            .unwrap();
        assert_eq!(built.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(registry.get("b").unwrap().chain().len(), 2);
    }
}
