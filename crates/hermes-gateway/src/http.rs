//! HTTP request/reply gateway.
//!
//! `POST <http_path>` with a `nats-subject` header and a `{data}` JSON body
//! becomes a bus request on that subject. The bus response is returned as
//! `{code, body}` with the HTTP status set to the same code.

use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderValue};
use http::{Response, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use serde_json::Value;

use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{HttpReply, HttpRequestBody, SUBJECT_HEADER, TRACE_ID_HEADER};
use crate::resolver::Resolver;
use hermes_core::{subject::Subject, BusClient, Headers, Request};

/// Headers that describe the HTTP hop and are not forwarded.
const HOP_BY_HOP: [&str; 4] = ["host", "content-length", "connection", "transfer-encoding"];

/// Serves HTTP requests onto the bus.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: BusClient,
    resolver: Resolver,
    max_body_bytes: usize,
}

impl HttpGateway {
    /// Creates an HTTP gateway.
    pub fn new(client: BusClient, resolver: Resolver, max_body_bytes: usize) -> Self {
        Self {
            client,
            resolver,
            max_body_bytes,
        }
    }

    /// Handles one HTTP request end to end, never failing.
    pub async fn handle<B>(&self, request: http::Request<B>) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes>,
        B::Error: std::error::Error + Send + Sync + 'static,
    {
        let (parts, body) = request.into_parts();
        let trace_id = parts.headers.get(TRACE_ID_HEADER).cloned();

        let reply = match self.read_body(&parts.headers, body).await {
            Ok(bytes) => self.dispatch(&parts.headers, &bytes).await,
            Err(err) => Err(err),
        };
        let reply = match reply {
            Ok(reply) => reply,
            Err(err) => {
                tracing::debug!(error = %err, code = err.code(), "http gateway request failed");
                HttpReply::from_error(&err)
            }
        };

        hermes_telemetry::record_gateway_request(reply.code);
        json_response(&reply, trace_id)
    }

    /// Forwards an already read body.
    ///
    /// HTTP requests run the auth chain but not the namespace lookup.
    pub async fn dispatch(&self, headers: &HeaderMap, body: &[u8]) -> GatewayResult<HttpReply> {
        let subject = headers
            .get(SUBJECT_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or(GatewayError::MissingSubject(SUBJECT_HEADER))?;
        let subject = Subject::parse(subject.trim())?;

        let HttpRequestBody { data } = serde_json::from_slice(body).map_err(GatewayError::malformed)?;

        let forwarded = self
            .resolver
            .authorize(subject.as_str(), forwarded_headers(headers))
            .await?;
        let request = Request {
            headers: forwarded,
            body: data,
        };

        let response = self.client.request(subject.as_str(), &request).await?;
        Ok(HttpReply::from_response(response))
    }

    async fn read_body<B>(&self, headers: &HeaderMap, body: B) -> GatewayResult<Bytes>
    where
        B: Body<Data = Bytes>,
        B::Error: std::error::Error + Send + Sync + 'static,
    {
        check_content_type(headers)?;

        match Limited::new(body, self.max_body_bytes).collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => Err(GatewayError::BodyTooLarge {
                limit: self.max_body_bytes,
            }),
            Err(err) => Err(GatewayError::malformed(err)),
        }
    }
}

fn check_content_type(headers: &HeaderMap) -> GatewayResult<()> {
    let value = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let mime = value.split(';').next().unwrap_or_default().trim();
    if mime.eq_ignore_ascii_case("application/json") {
        Ok(())
    } else {
        Err(GatewayError::UnsupportedContentType(value.to_string()))
    }
}

/// Converts HTTP headers into envelope headers, dropping hop-by-hop ones.
pub fn forwarded_headers(headers: &HeaderMap) -> Headers {
    headers
        .iter()
        .filter(|(name, _)| !HOP_BY_HOP.contains(&name.as_str()))
        .filter_map(|(name, value)| {
            let value = value.to_str().ok()?;
            Some((name.as_str().to_string(), Value::String(value.to_string())))
        })
        .collect()
}

/// Builds a JSON response whose status mirrors the reply code.
pub(crate) fn json_response(reply: &HttpReply, trace_id: Option<HeaderValue>) -> Response<Full<Bytes>> {
    let status = StatusCode::from_u16(reply.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = serde_json::to_vec(reply).unwrap_or_default();

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some(trace_id) = trace_id {
        headers.insert(TRACE_ID_HEADER, trace_id);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolverConfig;
    use futures_util::StreamExt;
    use hermes_core::{codec, Bus, MemoryBus, Response as BusResponse};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn gateway(bus: &MemoryBus, config: ResolverConfig, limit: usize) -> HttpGateway {
        let client = BusClient::new(Arc::new(bus.clone())).with_timeout(Duration::from_secs(2));
        HttpGateway::new(client.clone(), Resolver::new(client, config), limit)
    }

    /// Replies to requests on `subject` with `{code, body: request}` echoing headers and body.
    async fn echo(bus: &MemoryBus, subject: &'static str, code: u16) {
        let mut subscription = bus.subscribe(subject).await.unwrap();
        let bus = bus.clone();
        tokio::spawn(async move {
            while let Some(message) = subscription.next().await {
                let request = codec::decode_request(&message.payload).unwrap().unwrap_or_default();
                let body = json!({ "headers": request.headers, "body": request.body });
                let response = if code == 200 {
                    BusResponse::ok(Headers::new(), Some(body))
                } else {
                    BusResponse::error(code, body)
                };
                let payload = codec::encode_response(&response).unwrap();
                bus.publish(message.reply.as_deref().unwrap(), payload).await.unwrap();
            }
        });
    }

    fn request(subject: Option<&str>, content_type: &str, body: &str) -> http::Request<Full<Bytes>> {
        let mut builder = http::Request::post("/api")
            .header(header::CONTENT_TYPE, content_type)
            .header(TRACE_ID_HEADER, "trace-1")
            .header("x-custom", "yes");
        if let Some(subject) = subject {
            builder = builder.header(SUBJECT_HEADER, subject);
        }
        builder.body(Full::new(Bytes::from(body.to_string()))).unwrap()
    }

    async fn reply_of(response: Response<Full<Bytes>>) -> (StatusCode, HttpReply) {
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_forwards_data_and_headers() {
        let bus = MemoryBus::new();
        echo(&bus, "orders.create", 200).await;
        let gateway = gateway(&bus, ResolverConfig::default(), 1024);

        let response = gateway
            .handle(request(Some("orders.create"), "application/json; charset=utf-8", r#"{"data":{"qty":2}}"#))
            .await;
        assert_eq!(response.headers().get(TRACE_ID_HEADER).unwrap(), "trace-1");

        let (status, reply) = reply_of(response).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply.code, 200);
        let body = reply.body.unwrap();
        assert_eq!(body["body"], json!({ "qty": 2 }));
        assert_eq!(body["headers"]["x-custom"], json!("yes"));
        assert_eq!(body["headers"][TRACE_ID_HEADER], json!("trace-1"));
        assert!(body["headers"].get("content-length").is_none());
    }

    #[tokio::test]
    async fn test_error_code_becomes_status() {
        let bus = MemoryBus::new();
        echo(&bus, "orders.get", 404).await;
        let gateway = gateway(&bus, ResolverConfig::default(), 1024);

        let (status, reply) = reply_of(
            gateway
                .handle(request(Some("orders.get"), "application/json", r#"{"data":1}"#))
                .await,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(reply.code, 404);
    }

    #[tokio::test]
    async fn test_rejects_bad_input_with_400() {
        let bus = MemoryBus::new();
        let gateway = gateway(&bus, ResolverConfig::default(), 16);

        let cases = [
            request(None, "application/json", r#"{"data":1}"#),
            request(Some("orders.*"), "application/json", r#"{"data":1}"#),
            request(Some("orders"), "text/plain", r#"{"data":1}"#),
            request(Some("orders"), "application/json", "not json"),
            request(Some("orders"), "application/json", r#"{"data":"this body is too long"}"#),
        ];
        for case in cases {
            let (status, reply) = reply_of(gateway.handle(case).await).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(reply.code, 400);
        }
        assert_eq!(bus.published("orders"), 0);
    }

    #[tokio::test]
    async fn test_auth_rejection_is_returned() {
        let bus = MemoryBus::new();
        echo(&bus, "auth.check", 403).await;
        let config = ResolverConfig {
            auth_subjects: vec!["auth.check".into()],
            ..ResolverConfig::default()
        };
        let gateway = gateway(&bus, config, 1024);

        let (status, reply) = reply_of(
            gateway
                .handle(request(Some("orders"), "application/json", r#"{"data":1}"#))
                .await,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(reply.body.unwrap()["body"], json!({ "subject": "orders" }));
        assert_eq!(bus.published("orders"), 0);
    }

    #[tokio::test]
    async fn test_no_responders_is_500() {
        let gateway = gateway(&MemoryBus::new(), ResolverConfig::default(), 1024);
        let (status, reply) = reply_of(
            gateway
                .handle(request(Some("nobody"), "application/json", r#"{"data":null}"#))
                .await,
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(reply.body, Some(json!({ "message": "Internal server error" })));
    }

    #[test]
    fn test_forwarded_headers_skip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("localhost"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert("authorization", HeaderValue::from_static("Bearer t"));
        let forwarded = forwarded_headers(&headers);
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded["authorization"], json!("Bearer t"));
    }
}
