//! Fake services answering on the bus.

use std::sync::Arc;

use futures_util::StreamExt;
use hermes_core::{codec, Bus, MemoryBus, Request, Response};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::error::TestError;

/// A subject answered by a closure instead of a real handler.
///
/// Useful for standing in for auth and namespace services in gateway tests.
///
/// ```ignore
/// let auth = FakeService::spawn(&bus, "auth.session", |_req| {
///     Response::ok(Headers::new(), None)
/// }).await?;
/// assert_eq!(auth.calls(), 1);
/// ```
pub struct FakeService {
    subject: String,
    calls: Arc<Mutex<Vec<Request>>>,
    task: JoinHandle<()>,
}

impl FakeService {
    /// Subscribes `subject` on `bus` and answers every request through `answer`.
    ///
    /// Returns once the subscription is live.
    pub async fn spawn<F>(bus: &MemoryBus, subject: &str, answer: F) -> Result<Self, TestError>
    where
        F: Fn(&Request) -> Response + Send + Sync + 'static,
    {
        let mut subscription = bus.subscribe(subject).await?;
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&calls);
        let bus = bus.clone();

        let task = tokio::spawn(async move {
            while let Some(message) = subscription.next().await {
                let request = match codec::decode_request(&message.payload) {
                    Ok(request) => request.unwrap_or_default(),
                    Err(_) => Request::empty(),
                };
                let response = answer(&request);
                seen.lock().push(request);
                let (Some(reply), Ok(payload)) = (message.reply, codec::encode_response(&response)) else {
                    continue;
                };
                if bus.publish(&reply, payload).await.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            subject: subject.to_string(),
            calls,
            task,
        })
    }

    /// The subject served.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Number of requests answered.
    pub fn calls(&self) -> usize {
        self.calls.lock().len()
    }

    /// Every request answered, oldest first.
    pub fn requests(&self) -> Vec<Request> {
        self.calls.lock().clone()
    }
}

impl Drop for FakeService {
    fn drop(&mut self) {
        self.task.abort();
    }
}
