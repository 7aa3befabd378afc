//! One WebSocket connection.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use hermes_core::subject::Subject;
use hermes_core::{status, Headers};
use hermes_ws::{ConnectionId, Message, WsSender, WsSocket};
use serde_json::json;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{Action, ClientFrame, ServerFrame};
use crate::resolver::{Resolved, Resolver};
use crate::subscription::{OnHandle, SubscriptionKey, SubscriptionManager};

/// A subscription waiting on the auth chain and namespace lookup.
type Resolution = BoxFuture<'static, (String, GatewayResult<Resolved>)>;

enum Flow {
    Continue,
    Close,
    Resolve(Resolution),
}

async fn resolving(pending: &mut Option<Resolution>) -> (String, GatewayResult<Resolved>) {
    match pending {
        Some(resolution) => resolution.await,
        None => std::future::pending().await,
    }
}

/// Drives a WebSocket connection until it closes.
///
/// Every frame sent to the client goes through one queue, so events,
/// acknowledgements and errors reach it in the order they were produced.
///
/// Client frames are handled one at a time. While a subscribe is resolving,
/// events keep flowing and later client frames wait in a backlog.
pub struct Session<S> {
    socket: WsSocket<S>,
    manager: SubscriptionManager,
    resolver: Resolver,
    headers: Headers,
    subscribed: HashMap<String, SubscriptionKey>,
    outgoing: mpsc::UnboundedSender<ServerFrame>,
    queue: mpsc::UnboundedReceiver<ServerFrame>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Creates a session.
    ///
    /// `headers` are taken from the upgrade request and sent along with the
    /// headers of every subscribe frame.
    pub fn new(socket: WsSocket<S>, manager: SubscriptionManager, resolver: Resolver, headers: Headers) -> Self {
        let (outgoing, queue) = mpsc::unbounded_channel();
        Self {
            socket,
            manager,
            resolver,
            headers,
            subscribed: HashMap::new(),
            outgoing,
            queue,
        }
    }

    /// The connection ID.
    pub fn id(&self) -> ConnectionId {
        self.socket.id()
    }

    /// Serves the connection, then releases every subscription it held.
    pub async fn run(self) {
        self.run_until(std::future::pending()).await;
    }

    /// Like [`run`](Self::run), closing the connection once `stop` completes.
    pub async fn run_until<F>(mut self, stop: F)
    where
        F: Future<Output = ()>,
    {
        let id = self.id();
        let sender = self.socket.sender();
        hermes_telemetry::ws_connection_opened();
        tracing::debug!(connection_id = %id, "websocket connected");

        tokio::pin!(stop);
        let mut pending: Option<Resolution> = None;
        let mut backlog: VecDeque<String> = VecDeque::new();
        loop {
            let flow = tokio::select! {
                () = &mut stop => {
                    let _ = sender.close().await;
                    break;
                }
                incoming = self.socket.recv() => match incoming {
                    Some(Ok(Message::Text(text))) if pending.is_some() => {
                        backlog.push_back(text);
                        Flow::Continue
                    }
                    Some(Ok(Message::Text(text))) => self.on_text(&text).await,
                    Some(Ok(Message::Binary(_))) => {
                        self.push(ServerFrame::error("", status::BAD_REQUEST, json!({
                            "message": "binary frames are not supported",
                        })));
                        Flow::Continue
                    }
                    Some(Ok(Message::Close)) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!(connection_id = %id, error = %err, "websocket receive failed");
                        break;
                    }
                },
                (subject, resolved) = resolving(&mut pending), if pending.is_some() => {
                    pending = None;
                    self.subscribe_resolved(subject, resolved).await
                }
                Some(frame) = self.queue.recv() => {
                    if let Err(err) = sender.send_json(&frame).await {
                        tracing::debug!(connection_id = %id, error = %err, "websocket send failed");
                        break;
                    }
                    Flow::Continue
                }
            };

            if !self.settle(flow, &mut pending, &mut backlog).await {
                self.flush(&sender).await;
                let _ = sender.close().await;
                break;
            }
        }

        let released = self.manager.unsubscribe_all_subjects(id).await;
        hermes_telemetry::ws_connection_closed();
        tracing::debug!(connection_id = %id, released, "websocket disconnected");
    }

    /// Applies `flow`, replaying backlogged frames once nothing is resolving.
    /// Returns `false` when the connection must close.
    async fn settle(
        &mut self,
        mut flow: Flow,
        pending: &mut Option<Resolution>,
        backlog: &mut VecDeque<String>,
    ) -> bool {
        loop {
            match flow {
                Flow::Close => return false,
                Flow::Resolve(resolution) => {
                    *pending = Some(resolution);
                    return true;
                }
                Flow::Continue if pending.is_some() => return true,
                Flow::Continue => match backlog.pop_front() {
                    Some(text) => flow = self.on_text(&text).await,
                    None => return true,
                },
            }
        }
    }

    async fn on_text(&mut self, text: &str) -> Flow {
        let frame = match ClientFrame::parse(text) {
            Ok(frame) => frame,
            Err((subject, err)) => {
                self.push(ServerFrame::from_error(&subject, &err));
                return Flow::Continue;
            }
        };
        if let Err(err) = Subject::parse(frame.subject.as_str()) {
            self.push(ServerFrame::from_error(&frame.subject, &GatewayError::from(err)));
            return Flow::Continue;
        }

        match frame.action {
            Action::Subscribe => self.subscribe(frame),
            Action::Unsubscribe => {
                self.unsubscribe(&frame.subject).await;
                Flow::Continue
            }
        }
    }

    fn subscribe(&self, frame: ClientFrame) -> Flow {
        let subject = frame.subject;
        if self.subscribed.contains_key(&subject) {
            self.push(ServerFrame::ack(&subject, Action::Subscribe));
            return Flow::Continue;
        }

        let mut headers = self.headers.clone();
        headers.extend(frame.headers);
        let resolver = self.resolver.clone();
        Flow::Resolve(Box::pin(async move {
            let resolved = resolver.resolve(&subject, headers).await;
            (subject, resolved)
        }))
    }

    async fn subscribe_resolved(&mut self, subject: String, resolved: GatewayResult<Resolved>) -> Flow {
        let resolved = match resolved {
            Ok(resolved) => resolved,
            Err(err) => {
                tracing::info!(
                    connection_id = %self.id(),
                    subject = %subject,
                    code = err.code(),
                    error = %err,
                    "subscription refused, closing connection"
                );
                return Flow::Close;
            }
        };

        let key = resolved.key(&subject);
        let outgoing = self.outgoing.clone();
        let on_handle: OnHandle = Arc::new(move |frame: &ServerFrame| {
            outgoing
                .send(frame.clone())
                .map_err(|_| anyhow::anyhow!("connection closed"))
        });

        match self.manager.subscribe(self.id(), &key, on_handle).await {
            Ok(()) => {
                self.push(ServerFrame::ack(&subject, Action::Subscribe));
                self.subscribed.insert(subject, key);
            }
            Err(err) => {
                tracing::warn!(connection_id = %self.id(), subject = %subject, error = %err, "subscribe failed");
                self.push(ServerFrame::from_error(&subject, &GatewayError::from(err)));
            }
        }
        Flow::Continue
    }

    async fn unsubscribe(&mut self, subject: &str) {
        let Some(key) = self.subscribed.remove(subject) else {
            self.push(ServerFrame::error(
                subject,
                status::NOT_FOUND,
                json!({ "message": format!("not subscribed to {subject}") }),
            ));
            return;
        };

        match self.manager.unsubscribe(self.id(), &key).await {
            Ok(_) => self.push(ServerFrame::ack(subject, Action::Unsubscribe)),
            Err(err) => {
                tracing::warn!(connection_id = %self.id(), subject, error = %err, "unsubscribe failed");
                self.push(ServerFrame::from_error(subject, &GatewayError::from(err)));
            }
        }
    }

    fn push(&self, frame: ServerFrame) {
        // the session owns the receiver, so this cannot fail while it runs
        let _ = self.outgoing.send(frame);
    }

    async fn flush(&mut self, sender: &WsSender<S>) {
        while let Ok(frame) = self.queue.try_recv() {
            if sender.send_json(&frame).await.is_err() {
                return;
            }
        }
    }
}
