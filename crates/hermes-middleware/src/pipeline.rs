//! The per-message pipeline executor.
//!
//! # Stage Order
//!
//! | # | Stage | Runs |
//! |---|-------|------|
//! | 1 | `before_all` hooks | declaration order |
//! | 2 | `before_validate` hooks | declaration order |
//! | 3 | validate | if declared |
//! | 4 | `after_validate` hooks | reverse order |
//! | 5 | `before_authorize` hooks | declaration order |
//! | 6 | authorize | if declared |
//! | 7 | `after_authorize` hooks | reverse order |
//! | 8 | `before_handle` hooks | declaration order |
//! | 9 | handle | if declared |
//! | 10 | `after_handle` hooks | reverse order |
//! | 11 | `after_all` hooks | reverse order |
//!
//! The first rejection or fault ends the run. Rejections reach
//! `respond_error`, faults reach `respond_unhandled_error`, and either way
//! the run produces exactly one [`Terminal`].

use std::sync::Arc;

use hermes_core::{
    status, AuthorizationContext, AuthorizeFn, BoxFuture, Fault, HandleContext, HandleFn,
    Injection, LogService, Outcome, Rejection, Request, RespondErrorFn, RespondUnhandledFn,
    Response, StageError, StageResult, ValidateFn, ValidationContext,
};
use serde_json::json;

use crate::chain::{catch, DynMiddleware, MiddlewareChain, MiddlewareStates};
use crate::middleware::Hook;

/// Log line emitted when a message carries no payload.
pub const NO_DATA: &str = "Incoming message has no data";

/// How a message's run ended.
#[derive(Debug)]
pub enum Terminal {
    /// Every stage succeeded.
    Completed(Response),
    /// A stage rejected the message.
    Rejected(Rejection),
    /// A stage faulted.
    Faulted(Fault),
    /// The message had no payload; no stage ran.
    NoData,
}

impl Terminal {
    /// Wire code of the reply.
    pub fn code(&self) -> u16 {
        match self {
            Self::Completed(response) => response.code,
            Self::Rejected(rejection) => rejection.code(),
            Self::Faulted(_) => status::INTERNAL_SERVER_ERROR,
            Self::NoData => status::BAD_REQUEST,
        }
    }

    /// Converts the terminal state into the reply envelope.
    pub fn into_response(self) -> Response {
        match self {
            Self::Completed(response) => response,
            Self::Rejected(rejection) => {
                let code = rejection.code();
                Response::error(code, rejection.into_errors())
            }
            Self::Faulted(_) => Response::internal_error(),
            Self::NoData => Response::error(status::BAD_REQUEST, json!({ "message": NO_DATA })),
        }
    }
}

/// The non-middleware stages of a handler.
#[derive(Clone, Default)]
pub struct Stages {
    /// Validate stage.
    pub validate: Option<ValidateFn>,
    /// Authorize stage.
    pub authorize: Option<AuthorizeFn>,
    /// Handle stage.
    pub handle: Option<HandleFn>,
    /// Observer for rejections.
    pub respond_error: Option<RespondErrorFn>,
    /// Observer for faults.
    pub respond_unhandled_error: Option<RespondUnhandledFn>,
}

impl std::fmt::Debug for Stages {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stages")
            .field("validate", &self.validate.is_some())
            .field("authorize", &self.authorize.is_some())
            .field("handle", &self.handle.is_some())
            .field("respond_error", &self.respond_error.is_some())
            .field("respond_unhandled_error", &self.respond_unhandled_error.is_some())
            .finish()
    }
}

/// A handler's composed pipeline.
#[derive(Debug, Clone)]
pub struct Pipeline {
    subject: String,
    chain: MiddlewareChain,
    stages: Stages,
}

impl Pipeline {
    /// Assembles a pipeline.
    pub fn new(subject: impl Into<String>, chain: MiddlewareChain, stages: Stages) -> Self {
        Self {
            subject: subject.into(),
            chain,
            stages,
        }
    }

    /// Starts a builder for `subject`.
    pub fn builder(subject: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(subject)
    }

    /// Subject the pipeline serves.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// The composed middleware.
    pub fn chain(&self) -> &MiddlewareChain {
        &self.chain
    }

    /// Runs one message through every stage.
    ///
    /// `request` is `None` when the message carried no payload.
    pub async fn run(&self, injection: &mut Injection, request: Option<Request>) -> Terminal {
        let log = injection.log().clone();
        log.info("Begin");

        let terminal = match request {
            None => {
                log.warn(NO_DATA);
                Terminal::NoData
            }
            Some(request) => {
                let mut states = self.chain.new_states();
                match self.execute(injection, &mut states, request).await {
                    Ok(response) => Terminal::Completed(response),
                    Err(StageError::Rejected(rejection)) => {
                        self.report_rejection(injection, &rejection, &log).await;
                        Terminal::Rejected(rejection)
                    }
                    Err(StageError::Unhandled(fault)) => {
                        self.report_fault(injection, &fault, &log).await;
                        Terminal::Faulted(fault)
                    }
                }
            }
        };

        log.info("End");
        terminal
    }

    async fn execute(
        &self,
        injection: &mut Injection,
        states: &mut MiddlewareStates,
        request: Request,
    ) -> StageResult<Response> {
        let chain = &self.chain;

        let request = chain.run_before(Hook::BeforeAll, injection, states, request).await?;

        let request = chain
            .run_before(Hook::BeforeValidate, injection, states, request)
            .await?;
        let seen = request.clone();
        let request = match &self.stages.validate {
            Some(validate) => {
                let shared: &Injection = injection;
                let log = shared.log().scope("validate");
                let stage_log = log.clone();
                let input = &seen;
                guard("validate", &log, move || {
                    validate(ValidationContext::new(shared, stage_log), input)
                })
                .await?
                .apply(request)
            }
            None => request,
        };
        let request = chain
            .run_after_request(Hook::AfterValidate, injection, states, &seen, request)
            .await?;

        let request = chain
            .run_before(Hook::BeforeAuthorize, injection, states, request)
            .await?;
        let seen = request.clone();
        let request = match &self.stages.authorize {
            Some(authorize) => {
                let shared: &Injection = injection;
                let log = shared.log().scope("authorize");
                let stage_log = log.clone();
                let input = &seen;
                guard("authorize", &log, move || {
                    authorize(AuthorizationContext::new(shared, stage_log), input)
                })
                .await?
                .apply(request)
            }
            None => request,
        };
        let request = chain
            .run_after_request(Hook::AfterAuthorize, injection, states, &seen, request)
            .await?;

        let request = chain
            .run_before(Hook::BeforeHandle, injection, states, request)
            .await?;
        let response = match &self.stages.handle {
            Some(handle) => {
                let shared: &Injection = injection;
                let log = shared.log().scope("handle");
                let stage_log = log.clone();
                let input = &request;
                let outcome = guard("handle", &log, move || {
                    handle(HandleContext::new(shared, stage_log), input)
                })
                .await?;
                respond(&request, outcome)
            }
            None => Response::ok(request.headers.clone(), None),
        };

        let response = chain
            .run_after_response(Hook::AfterHandle, injection, states, &request, response)
            .await?;
        chain
            .run_after_response(Hook::AfterAll, injection, states, &request, response)
            .await
    }

    async fn report_rejection(&self, injection: &Injection, rejection: &Rejection, log: &LogService) {
        tracing::debug!(
            subject = %self.subject,
            code = rejection.code(),
            stage = rejection.stage().unwrap_or("unknown"),
            "message rejected"
        );
        if let Some(respond_error) = &self.stages.respond_error {
            if catch(move || respond_error(injection, rejection)).await.is_err() {
                log.scope("respond_error").error("Observer panicked");
            }
        }
    }

    async fn report_fault(&self, injection: &Injection, fault: &Fault, log: &LogService) {
        // middleware faults were already logged by the chain
        if !fault.is_middleware() {
            log.error(format_args!("Unhandled error: {fault}"));
            tracing::error!(subject = %self.subject, error = %fault, "unhandled stage fault");
        }
        if let Some(respond_unhandled) = &self.stages.respond_unhandled_error {
            if catch(move || respond_unhandled(injection, fault)).await.is_err() {
                log.scope("respond_unhandled_error").error("Observer panicked");
            }
        }
    }
}

/// Builds the handle response: request headers overlaid with handler headers.
fn respond(request: &Request, outcome: Outcome) -> Response {
    let mut headers = request.headers.clone();
    if let Some(overrides) = outcome.headers {
        headers.extend(overrides);
    }
    Response::ok(headers, outcome.body)
}

async fn guard<'f, T, F>(stage: &'static str, log: &LogService, call: F) -> StageResult<T>
where
    F: FnOnce() -> BoxFuture<'f, StageResult<T>>,
{
    log.info("Handling");
    let fault = match catch(call).await {
        Ok(Ok(value)) => return Ok(value),
        Ok(Err(StageError::Rejected(rejection))) => {
            log.error(rejection.errors());
            return Err(StageError::Rejected(rejection.at(stage)));
        }
        Ok(Err(StageError::Unhandled(fault))) => fault,
        Err(panic) => Fault::from_panic(panic),
    };
    Err(StageError::Unhandled(fault.at_stage(stage)))
}

/// Builder for [`Pipeline`].
///
/// # Example
///
/// ```ignore
/// let pipeline = Pipeline::builder("echo")
///     .validate(|ctx, _req| Box::pin(async move { ctx.ok() }))
///     .handle(|_ctx, req| Box::pin(async move { Ok(Outcome { headers: None, body: req.body.clone() }) }))
///     .build();
/// ```
#[must_use]
pub struct PipelineBuilder {
    subject: String,
    middleware: Vec<Arc<dyn DynMiddleware>>,
    stages: Stages,
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("subject", &self.subject)
            .field("middleware", &self.middleware.len())
            .field("stages", &self.stages)
            .finish()
    }
}

impl PipelineBuilder {
    /// Creates a builder for `subject`.
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            middleware: Vec::new(),
            stages: Stages::default(),
        }
    }

    /// Appends a middleware instance.
    pub fn middleware(mut self, middleware: Arc<dyn DynMiddleware>) -> Self {
        self.middleware.push(middleware);
        self
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

    /// Sets the rejection observer.
    pub fn respond_error<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a Injection, &'a Rejection) -> BoxFuture<'a, ()> + Send + Sync + 'static,
    {
        self.stages.respond_error = Some(Arc::new(f));
        self
    }

    /// Sets the fault observer.
    pub fn respond_unhandled_error<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a Injection, &'a Fault) -> BoxFuture<'a, ()> + Send + Sync + 'static,
    {
        self.stages.respond_unhandled_error = Some(Arc::new(f));
        self
    }

    /// Replaces every non-middleware stage.
    pub fn stages(mut self, stages: Stages) -> Self {
        self.stages = stages;
        self
    }

    /// Builds the pipeline.
    pub fn build(self) -> Pipeline {
        Pipeline::new(self.subject, MiddlewareChain::new(self.middleware), self.stages)
    }
}
