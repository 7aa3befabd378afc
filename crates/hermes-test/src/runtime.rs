//! A runtime over the in-memory bus.

use std::sync::Arc;
use std::time::Duration;

use hermes_core::{BusClient, Headers, LogService, MemoryBus, MemorySink, Request};
use hermes_server::{Handler, Runtime, RuntimeBuilder};
use serde_json::Value;

use crate::error::TestError;
use crate::response::TestResponse;

/// Default timeout for every bus call made by the harness.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(2);

/// A started [`Runtime`] on a [`MemoryBus`], with captured pipeline logs.
///
/// # Example
///
/// ```ignore
/// let runtime = TestRuntime::start([echo_handler()]).await?;
/// runtime.request("echo").body(json!("hi")).send().await?.assert_ok();
/// assert_eq!(runtime.logs()[0], "[echo]Begin");
/// ```
pub struct TestRuntime {
    bus: MemoryBus,
    runtime: Runtime,
    sink: Arc<MemorySink>,
    client: BusClient,
}

impl TestRuntime {
    /// Starts a runtime serving `handlers` on a fresh bus.
    pub async fn start(handlers: impl IntoIterator<Item = Handler>) -> Result<Self, TestError> {
        Self::builder().handlers(handlers).start().await
    }

    /// Creates a builder for runtimes needing services or a shared bus.
    pub fn builder() -> TestRuntimeBuilder {
        TestRuntimeBuilder::new()
    }

    /// The bus the runtime listens on.
    pub fn bus(&self) -> &MemoryBus {
        &self.bus
    }

    /// The runtime under test.
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// A client on the same bus.
    pub fn client(&self) -> &BusClient {
        &self.client
    }

    /// Every pipeline log line so far, oldest first.
    pub fn logs(&self) -> Vec<String> {
        self.sink.texts()
    }

    /// Forgets the captured log lines.
    pub fn clear_logs(&self) {
        self.sink.clear();
    }

    /// Starts building a request to `subject`.
    pub fn request(&self, subject: impl Into<String>) -> TestRequest<'_> {
        TestRequest::new(&self.client, subject)
    }

    /// Publishes `request` on `subject` without a reply address.
    pub async fn publish(&self, subject: &str, request: &Request) -> Result<(), TestError> {
        Ok(self.client.publish(subject, request).await?)
    }

    /// Stops the runtime.
    pub async fn stop(self) -> Result<(), TestError> {
        Ok(self.runtime.stop().await?)
    }
}

/// Builder for [`TestRuntime`].
#[must_use]
pub struct TestRuntimeBuilder {
    inner: RuntimeBuilder,
    bus: MemoryBus,
    handlers: Vec<Handler>,
}

impl TestRuntimeBuilder {
    fn new() -> Self {
        Self {
            inner: Runtime::builder()
                .request_timeout(TEST_TIMEOUT)
                .shutdown_timeout(TEST_TIMEOUT),
            bus: MemoryBus::new(),
            handlers: Vec::new(),
        }
    }

    /// Uses an existing bus, e.g. one a gateway is also attached to.
    pub fn bus(mut self, bus: &MemoryBus) -> Self {
        self.bus = bus.clone();
        self
    }

    /// Adds handlers.
    pub fn handlers(mut self, handlers: impl IntoIterator<Item = Handler>) -> Self {
        self.handlers.extend(handlers);
        self
    }

    /// Adds a shared service.
    pub fn service<T: Send + Sync + 'static>(mut self, service: Arc<T>) -> Self {
        self.inner = self.inner.service(service);
        self
    }

    /// Adds a named shared service.
    pub fn named_service<T: Send + Sync + 'static>(mut self, name: impl Into<String>, service: Arc<T>) -> Self {
        self.inner = self.inner.named_service(name, service);
        self
    }

    /// Builds, registers the handlers, and starts the runtime.
    pub async fn start(self) -> Result<TestRuntime, TestError> {
        let sink = Arc::new(MemorySink::new());
        let runtime = self
            .inner
            .connector(self.bus.clone())
            .log(LogService::new(sink.clone()))
            .build()?;
        runtime.register(self.handlers)?;
        runtime.start().await?;

        let client = BusClient::new(Arc::new(self.bus.clone())).with_timeout(TEST_TIMEOUT);
        Ok(TestRuntime {
            bus: self.bus,
            runtime,
            sink,
            client,
        })
    }
}

/// A request being built.
#[must_use]
pub struct TestRequest<'a> {
    client: &'a BusClient,
    subject: String,
    request: Request,
}

impl<'a> TestRequest<'a> {
    /// Starts a request to `subject` through `client`.
    pub fn new(client: &'a BusClient, subject: impl Into<String>) -> Self {
        Self {
            client,
            subject: subject.into(),
            request: Request::empty(),
        }
    }

    /// Sets a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.request.headers.insert(name.into(), value.into());
        self
    }

    /// Merges `headers` into the request headers.
    pub fn headers(mut self, headers: Headers) -> Self {
        self.request.headers.extend(headers);
        self
    }

    /// Sets the body.
    pub fn body(mut self, body: impl Into<Value>) -> Self {
        self.request.body = Some(body.into());
        self
    }

    /// Sends the request and waits for the reply.
    pub async fn send(self) -> Result<TestResponse, TestError> {
        let response = self.client.request(&self.subject, &self.request).await?;
        Ok(TestResponse::new(response))
    }
}
