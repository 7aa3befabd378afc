//! A live gateway on a loopback port.

use std::net::SocketAddr;

use bytes::Bytes;
use hermes_config::GatewayConfig;
use hermes_core::{BusClient, MemoryBus};
use hermes_gateway::{Gateway, HttpReply, ServerFrame, SubscriptionManager, SUBJECT_HEADER};
use hermes_server::ShutdownSignal;
use hermes_ws::{Message, Role, WsConfig, WsSocket};
use http::{header, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::error::TestError;
use crate::runtime::TEST_TIMEOUT;

/// A gateway served over real TCP, attached to a [`MemoryBus`].
///
/// Dropping it without [`shutdown`](Self::shutdown) leaves the listener
/// task to be torn down with the test runtime.
pub struct TestGateway {
    addr: SocketAddr,
    config: GatewayConfig,
    subscriptions: SubscriptionManager,
    shutdown: ShutdownSignal,
    task: JoinHandle<Result<(), hermes_gateway::GatewayError>>,
}

impl TestGateway {
    /// Serves a gateway for `bus` on `127.0.0.1` with an ephemeral port.
    pub async fn start(bus: &MemoryBus, config: GatewayConfig) -> Result<Self, TestError> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = ShutdownSignal::new();

        let client = BusClient::new(std::sync::Arc::new(bus.clone())).with_timeout(TEST_TIMEOUT);
        let gateway = Gateway::new(client, config.clone());
        let subscriptions = gateway.subscriptions().clone();
        let task = tokio::spawn(gateway.serve(listener, shutdown.clone()));

        Ok(Self {
            addr,
            config,
            subscriptions,
            shutdown,
            task,
        })
    }

    /// The bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The gateway's subscription table.
    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    /// Sends a raw HTTP request.
    pub async fn send(&self, request: Request<Full<Bytes>>) -> Result<Response<Incoming>, TestError> {
        let stream = TcpStream::connect(self.addr).await?;
        let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(TestError::http)?;
        tokio::spawn(async move {
            let _ = connection.with_upgrades().await;
        });
        sender.send_request(request).await.map_err(TestError::http)
    }

    /// `GET path`, returning the status and body.
    pub async fn get(&self, path: &str) -> Result<(StatusCode, Bytes), TestError> {
        let request = Request::get(path)
            .header(header::HOST, self.addr.to_string())
            .body(Full::new(Bytes::new()))
            .map_err(TestError::http)?;
        let response = self.send(request).await?;
        let status = response.status();
        let body = response.into_body().collect().await.map_err(TestError::http)?.to_bytes();
        Ok((status, body))
    }

    /// Calls `subject` through the HTTP endpoint with `{data}`.
    pub async fn call(
        &self,
        subject: &str,
        data: Value,
        headers: &[(&str, &str)],
    ) -> Result<(StatusCode, HttpReply), TestError> {
        let mut builder = Request::post(self.config.http_path.as_str())
            .header(header::HOST, self.addr.to_string())
            .header(header::CONTENT_TYPE, "application/json")
            .header(SUBJECT_HEADER, subject);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let body = serde_json::to_vec(&serde_json::json!({ "data": data }))?;
        let request = builder.body(Full::new(Bytes::from(body))).map_err(TestError::http)?;

        let response = self.send(request).await?;
        let status = response.status();
        let body = response.into_body().collect().await.map_err(TestError::http)?.to_bytes();
        Ok((status, serde_json::from_slice(&body)?))
    }

    /// Opens a WebSocket to the gateway.
    pub async fn connect(&self, headers: &[(&str, &str)]) -> Result<TestSocket, TestError> {
        let mut builder = Request::get(self.config.ws_path.as_str())
            .header(header::HOST, self.addr.to_string())
            .header(header::CONNECTION, "Upgrade")
            .header(header::UPGRADE, "websocket")
            .header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
            .header(header::SEC_WEBSOCKET_VERSION, "13");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(Full::new(Bytes::new())).map_err(TestError::http)?;

        let response = self.send(request).await?;
        if response.status() != StatusCode::SWITCHING_PROTOCOLS {
            return Err(TestError::Http(format!("upgrade refused with {}", response.status())));
        }
        let upgraded = hyper::upgrade::on(response).await.map_err(TestError::http)?;
        let socket = WsSocket::from_raw(TokioIo::new(upgraded), Role::Client, &WsConfig::default()).await;
        Ok(TestSocket { socket })
    }

    /// Stops accepting connections and waits for the listener to exit.
    pub async fn shutdown(self) -> Result<(), TestError> {
        self.shutdown.trigger();
        match tokio::time::timeout(TEST_TIMEOUT, self.task).await {
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(err)) => Err(TestError::http(err)),
            Err(_) => Err(TestError::Timeout("gateway shutdown")),
        }
    }
}

/// Client end of a gateway WebSocket.
pub struct TestSocket {
    socket: WsSocket<TokioIo<Upgraded>>,
}

impl TestSocket {
    /// Sends a JSON frame.
    pub async fn send(&self, frame: &Value) -> Result<(), TestError> {
        Ok(self.socket.sender().send_json(frame).await?)
    }

    /// Sends `{subject, action: "subscribe"}`.
    pub async fn subscribe(&self, subject: &str) -> Result<(), TestError> {
        self.send(&serde_json::json!({ "subject": subject, "action": "subscribe" }))
            .await
    }

    /// Sends `{subject, action: "unsubscribe"}`.
    pub async fn unsubscribe(&self, subject: &str) -> Result<(), TestError> {
        self.send(&serde_json::json!({ "subject": subject, "action": "unsubscribe" }))
            .await
    }

    /// Waits for the next server frame.
    pub async fn frame(&mut self) -> Result<ServerFrame, TestError> {
        loop {
            let message = tokio::time::timeout(TEST_TIMEOUT, self.socket.recv())
                .await
                .map_err(|_| TestError::Timeout("websocket frame"))?;
            match message {
                Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
                Some(Ok(Message::Binary(_))) => {}
                Some(Ok(Message::Close)) | None => return Err(TestError::Ws(hermes_ws::WsError::ConnectionClosed)),
                Some(Err(err)) => return Err(err.into()),
            }
        }
    }

    /// Returns `true` if the server closes the connection before the timeout.
    pub async fn closed(&mut self) -> bool {
        loop {
            match tokio::time::timeout(TEST_TIMEOUT, self.socket.recv()).await {
                Ok(Some(Ok(Message::Close)) | None | Some(Err(_))) => return true,
                Ok(Some(Ok(_))) => {}
                Err(_) => return false,
            }
        }
    }

    /// Closes the connection.
    pub async fn close(self) -> Result<(), TestError> {
        Ok(self.socket.sender().close().await?)
    }
}
