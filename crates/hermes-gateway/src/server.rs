//! HTTP listener and routing.
//!
//! One listener serves every gateway endpoint:
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | `GET` | `/health` | liveness |
//! | `GET` | `/metrics` | Prometheus text |
//! | `POST` | `http_path` | [`HttpGateway`] |
//! | `GET` (upgrade) | `ws_path` | [`Session`] |

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use hermes_config::GatewayConfig;
use hermes_core::BusClient;
use hermes_server::ShutdownSignal;
use hermes_ws::{upgrade, WsConfig, WsSocket};
use http::{header, HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Body;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde_json::json;
use tokio::net::TcpListener;

use crate::error::GatewayResult;
use crate::http::{forwarded_headers, json_response, HttpGateway};
use crate::protocol::HttpReply;
use crate::resolver::{Resolver, ResolverConfig};
use crate::session::Session;
use crate::subscription::SubscriptionManager;

/// The gateway: HTTP request/reply plus WebSocket subscriptions.
#[derive(Debug, Clone)]
pub struct Gateway {
    config: GatewayConfig,
    http: HttpGateway,
    resolver: Resolver,
    manager: SubscriptionManager,
    ws: WsConfig,
}

impl Gateway {
    /// Creates a gateway on top of `client`.
    pub fn new(client: BusClient, config: GatewayConfig) -> Self {
        let resolver = Resolver::new(client.clone(), ResolverConfig::from(&config));
        let manager = SubscriptionManager::new(Arc::clone(client.bus()));
        let http = HttpGateway::new(client, resolver.clone(), config.max_body_bytes);
        Self {
            config,
            http,
            resolver,
            manager,
            ws: WsConfig::default(),
        }
    }

    /// Overrides the WebSocket limits.
    #[must_use]
    pub fn with_ws_config(mut self, ws: WsConfig) -> Self {
        self.ws = ws;
        self
    }

    /// The shared subscription table.
    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.manager
    }

    /// Accepts connections on `listener` until `shutdown` triggers.
    ///
    /// Open connections finish their in-progress exchange; WebSocket
    /// sessions are closed.
    pub async fn serve(self, listener: TcpListener, shutdown: ShutdownSignal) -> GatewayResult<()> {
        let gateway = Arc::new(self);
        tracing::info!(
            addr = %listener.local_addr()?,
            http_path = %gateway.config.http_path,
            ws_path = %gateway.config.ws_path,
            "gateway listening"
        );

        loop {
            let (stream, peer) = tokio::select! {
                () = shutdown.recv() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        tracing::error!(error = %err, "failed to accept connection");
                        continue;
                    }
                },
            };
            tokio::spawn(Arc::clone(&gateway).serve_connection(stream, peer, shutdown.clone()));
        }

        tracing::info!("gateway stopped");
        Ok(())
    }

    async fn serve_connection(self: Arc<Self>, stream: tokio::net::TcpStream, peer: SocketAddr, shutdown: ShutdownSignal) {
        let gateway = Arc::clone(&self);
        let signal = shutdown.clone();
        let service = service_fn(move |request: Request<hyper::body::Incoming>| {
            let gateway = Arc::clone(&gateway);
            let signal = signal.clone();
            async move { Ok::<_, Infallible>(gateway.route(request, &signal).await) }
        });

        let connection = http1::Builder::new()
            .serve_connection(TokioIo::new(stream), service)
            .with_upgrades();
        tokio::pin!(connection);

        let result = tokio::select! {
            result = connection.as_mut() => result,
            () = shutdown.recv() => {
                connection.as_mut().graceful_shutdown();
                connection.await
            }
        };
        if let Err(err) = result {
            tracing::debug!(%peer, error = %err, "connection error");
        }
    }

    /// Routes one request.
    pub async fn route<B>(&self, request: Request<B>, shutdown: &ShutdownSignal) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: std::error::Error + Send + Sync + 'static,
    {
        let path = request.uri().path();
        tracing::debug!(method = %request.method(), path, "gateway request");

        if path == "/health" && request.method() == Method::GET {
            return plain(StatusCode::OK, "application/json", json!({ "status": "ok" }).to_string());
        }
        if path == "/metrics" && request.method() == Method::GET {
            return match hermes_telemetry::render_metrics() {
                Some(text) => plain(StatusCode::OK, "text/plain; version=0.0.4", text),
                None => not_found(),
            };
        }
        if path == self.config.http_path {
            if request.method() != Method::POST {
                return method_not_allowed();
            }
            return self.http.handle(request).await;
        }
        if path == self.config.ws_path {
            return self.upgrade(request, shutdown);
        }
        not_found()
    }

    fn upgrade<B>(&self, request: Request<B>, shutdown: &ShutdownSignal) -> Response<Full<Bytes>>
    where
        B: Send + 'static,
    {
        let response = match upgrade::upgrade_response(&request) {
            Ok(response) => response,
            Err(err) => {
                let reply = HttpReply {
                    code: StatusCode::BAD_REQUEST.as_u16(),
                    body: Some(json!({ "message": err.to_string() })),
                };
                return json_response(&reply, None);
            }
        };

        let headers = forwarded_headers(request.headers());
        let manager = self.manager.clone();
        let resolver = self.resolver.clone();
        let ws = self.ws.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match hyper::upgrade::on(request).await {
                Ok(upgraded) => {
                    let socket = WsSocket::accept(TokioIo::new(upgraded), &ws).await;
                    Session::new(socket, manager, resolver, headers)
                        .run_until(shutdown.recv())
                        .await;
                }
                Err(err) => tracing::warn!(error = %err, "websocket upgrade failed"),
            }
        });
        response
    }
}

fn plain(status: StatusCode, content_type: &'static str, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn not_found() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}

fn method_not_allowed() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
    response
        .headers_mut()
        .insert(header::ALLOW, HeaderValue::from_static("POST"));
    response
}
