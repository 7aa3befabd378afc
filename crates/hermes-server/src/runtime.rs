//! The message runtime.
//!
//! A [`Runtime`] owns its bus connection and handler table. Handlers are
//! registered before [`start`](Runtime::start); once started, every inbound
//! message on a registered subject is dispatched in its own task through
//! that subject's pipeline and answered at most once.
//!
//! # Example
//!
//! ```rust,ignore
//! use hermes_server::{Handler, Runtime};
//!
//! let runtime = Runtime::builder().connector(nats).service(Arc::new(db)).build()?;
//! runtime.register([Handler::new("echo").handle(echo)])?;
//! runtime.run().await?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use hermes_core::{
    codec, status, BoxSubscription, Bus, BusClient, BusConnector, BusMessage, Injection,
    LogService, Response, Services, DEFAULT_REQUEST_TIMEOUT,
};
use hermes_middleware::Pipeline;
use hermes_telemetry::{record_message, InFlightGuard};
use parking_lot::RwLock;
use serde_json::json;
use tokio::task::JoinHandle;

use crate::error::RuntimeError;
use crate::handler::{Handler, HandlerRegistry};
use crate::reply::ReplyDispatcher;
use crate::shutdown::{InFlightTracker, ShutdownSignal};

/// Default time [`Runtime::stop`] waits for in-flight messages.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// A handler runtime bound to one bus connection.
///
/// Cloning yields another handle to the same runtime.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<Inner>,
}

struct Inner {
    connector: Arc<dyn BusConnector>,
    services: Arc<Services>,
    log: LogService,
    request_timeout: Duration,
    shutdown_timeout: Duration,
    registry: RwLock<HandlerRegistry>,
    started: AtomicBool,
    client: RwLock<Option<BusClient>>,
    running: tokio::sync::Mutex<Option<Running>>,
}

struct Running {
    bus: Arc<dyn Bus>,
    shutdown: ShutdownSignal,
    listeners: Vec<JoinHandle<()>>,
    tracker: InFlightTracker,
}

/// What every dispatch task for a subject shares.
#[derive(Clone)]
struct Dispatch {
    pipeline: Arc<Pipeline>,
    client: BusClient,
    services: Arc<Services>,
    log: LogService,
}

impl Runtime {
    /// Starts a builder.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Registers handlers.
    ///
    /// Fails with [`RuntimeError::AlreadyStarted`] once the runtime is
    /// started, and with [`RuntimeError::DuplicateSubject`] if a subject is
    /// already bound.
    pub fn register(&self, handlers: impl IntoIterator<Item = Handler>) -> Result<(), RuntimeError> {
        let mut registry = self.inner.registry.write();
        if self.inner.started.load(Ordering::SeqCst) {
            return Err(RuntimeError::AlreadyStarted);
        }
        registry.register(
            handlers.into_iter().collect(),
            &self.inner.services,
            &self.inner.log,
        )
    }

    /// Connects to the bus and subscribes every registered subject.
    pub async fn start(&self) -> Result<(), RuntimeError> {
        let mut running = self.inner.running.lock().await;
        let pipelines = {
            let registry = self.inner.registry.write();
            if self.inner.started.load(Ordering::SeqCst) {
                return Err(RuntimeError::AlreadyStarted);
            }
            if registry.is_empty() {
                return Err(RuntimeError::NoHandlers);
            }
            self.inner.started.store(true, Ordering::SeqCst);
            registry.pipelines()
        };

        match self.launch(pipelines).await {
            Ok(started) => {
                *running = Some(started);
                Ok(())
            }
            Err(err) => {
                self.inner.started.store(false, Ordering::SeqCst);
                tracing::error!(error = %err, "runtime failed to start");
                Err(err)
            }
        }
    }

    async fn launch(&self, pipelines: Vec<Arc<Pipeline>>) -> Result<Running, RuntimeError> {
        let bus = self.inner.connector.connect().await?;
        let client = BusClient::new(Arc::clone(&bus)).with_timeout(self.inner.request_timeout);

        let mut subscriptions = Vec::with_capacity(pipelines.len());
        for pipeline in &pipelines {
            match bus.subscribe(pipeline.subject()).await {
                Ok(subscription) => subscriptions.push(subscription),
                Err(err) => {
                    drop(subscriptions);
                    if let Err(drain) = bus.drain().await {
                        tracing::warn!(error = %drain, "failed to drain bus after subscribe failure");
                    }
                    return Err(err.into());
                }
            }
        }

        let shutdown = ShutdownSignal::new();
        let tracker = InFlightTracker::new();
        let listeners = pipelines
            .into_iter()
            .zip(subscriptions)
            .map(|(pipeline, subscription)| {
                let dispatch = Dispatch {
                    pipeline,
                    client: client.clone(),
                    services: Arc::clone(&self.inner.services),
                    log: self.inner.log.clone(),
                };
                tokio::spawn(listen(dispatch, subscription, shutdown.clone(), tracker.clone()))
            })
            .collect::<Vec<_>>();

        tracing::info!(subjects = listeners.len(), "runtime started");
        *self.inner.client.write() = Some(client);
        Ok(Running {
            bus,
            shutdown,
            listeners,
            tracker,
        })
    }

    /// Stops listening, waits for in-flight messages, drains the bus, and
    /// clears the registry so handlers can be registered again.
    pub async fn stop(&self) -> Result<(), RuntimeError> {
        let mut running = self.inner.running.lock().await;
        let Some(run) = running.take() else {
            return Err(RuntimeError::NotStarted);
        };

        run.shutdown.trigger();
        for listener in run.listeners {
            if let Err(err) = listener.await {
                tracing::warn!(error = %err, "subscription listener ended abnormally");
            }
        }

        if tokio::time::timeout(self.inner.shutdown_timeout, run.tracker.wait_idle())
            .await
            .is_err()
        {
            tracing::warn!(
                in_flight = run.tracker.active(),
                timeout = ?self.inner.shutdown_timeout,
                "shutdown timeout elapsed with messages still in flight"
            );
        }

        *self.inner.client.write() = None;
        let drained = run.bus.drain().await;
        {
            let mut registry = self.inner.registry.write();
            registry.clear();
            self.inner.started.store(false, Ordering::SeqCst);
        }
        tracing::info!("runtime stopped");
        drained.map_err(RuntimeError::from)
    }

    /// Starts, waits for SIGINT or SIGTERM, then stops.
    pub async fn run(&self) -> Result<(), RuntimeError> {
        self.start().await?;
        ShutdownSignal::with_os_signals().recv().await;
        tracing::info!("shutdown signal received");
        self.stop().await
    }

    /// Client for the running bus connection, if started.
    pub fn bus_client(&self) -> Option<BusClient> {
        self.inner.client.read().clone()
    }

    /// Returns `true` between a successful `start` and `stop`.
    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Registered subjects, sorted.
    pub fn subjects(&self) -> Vec<String> {
        self.inner.registry.read().subjects()
    }

    /// Shared services handed to every stage.
    pub fn services(&self) -> &Arc<Services> {
        &self.inner.services
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("subjects", &self.subjects())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

async fn listen(
    dispatch: Dispatch,
    mut subscription: BoxSubscription,
    shutdown: ShutdownSignal,
    tracker: InFlightTracker,
) {
    let stopped = shutdown.recv();
    tokio::pin!(stopped);

    loop {
        tokio::select! {
            () = &mut stopped => break,
            message = subscription.next() => match message {
                Some(message) => {
                    let token = tracker.acquire();
                    let dispatch = dispatch.clone();
                    tokio::spawn(async move {
                        dispatch.handle(message).await;
                        drop(token);
                    });
                }
                None => break,
            },
        }
    }

    if let Err(err) = subscription.unsubscribe().await {
        tracing::warn!(
            subject = %dispatch.pipeline.subject(),
            error = %err,
            "failed to unsubscribe"
        );
    }
}

impl Dispatch {
    async fn handle(&self, message: BusMessage) {
        let _in_flight = InFlightGuard::new();
        let started = Instant::now();
        let subject = self.pipeline.subject();

        let response = match codec::decode_request(&message.payload) {
            Ok(request) => {
                let mut injection = Injection::new(
                    subject,
                    self.client.clone(),
                    Arc::clone(&self.services),
                    &self.log,
                )
                .with_reply(message.reply.clone());
                self.pipeline.run(&mut injection, request).await.into_response()
            }
            Err(err) => {
                self.log
                    .scope(subject)
                    .warn(format_args!("Malformed message: {err}"));
                Response::error(status::BAD_REQUEST, json!({ "message": err.to_string() }))
            }
        };

        record_message(subject, response.code, started.elapsed());
        match ReplyDispatcher::new(self.client.clone(), message.reply).send(&response).await {
            Ok(_) => {}
            Err(err) => tracing::warn!(subject = %subject, error = %err, "failed to send reply"),
        }
    }
}

/// Builder for [`Runtime`].
#[must_use]
pub struct RuntimeBuilder {
    connector: Option<Arc<dyn BusConnector>>,
    services: Services,
    log: Option<LogService>,
    request_timeout: Duration,
    shutdown_timeout: Duration,
}

impl RuntimeBuilder {
    /// Creates a builder with default timeouts.
    pub fn new() -> Self {
        Self {
            connector: None,
            services: Services::new(),
            log: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Sets the bus connector.
    pub fn connector(mut self, connector: impl BusConnector) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Sets an already shared bus connector.
    pub fn shared_connector(mut self, connector: Arc<dyn BusConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Adds a shared service, looked up by type.
    pub fn service<T: Send + Sync + 'static>(mut self, service: Arc<T>) -> Self {
        self.services.insert(service);
        self
    }

    /// Adds a shared service, looked up by type and name.
    pub fn named_service<T: Send + Sync + 'static>(
        mut self,
        name: impl Into<String>,
        service: Arc<T>,
    ) -> Self {
        self.services.insert_named(name, service);
        self
    }

    /// Sets the pipeline log service. Defaults to [`LogService::tracing`].
    pub fn log(mut self, log: LogService) -> Self {
        self.log = Some(log);
        self
    }

    /// Sets the default timeout of outbound bus requests.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets how long `stop` waits for in-flight messages.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Builds the runtime.
    pub fn build(self) -> Result<Runtime, RuntimeError> {
        let connector = self.connector.ok_or(RuntimeError::MissingConnector)?;
        Ok(Runtime {
            inner: Arc::new(Inner {
                connector,
                services: Arc::new(self.services),
                log: self.log.unwrap_or_else(LogService::tracing),
                request_timeout: self.request_timeout,
                shutdown_timeout: self.shutdown_timeout,
                registry: RwLock::new(HandlerRegistry::new()),
                started: AtomicBool::new(false),
                client: RwLock::new(None),
                running: tokio::sync::Mutex::new(None),
            }),
        })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
