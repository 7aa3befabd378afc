//! The gateway served over TCP in front of a runtime on the in-memory bus.

use std::sync::Arc;

use hermes_config::GatewayConfig;
use hermes_core::{BusClient, Headers, MemoryBus, Response};
use hermes_gateway::{Action, ServerFrame, SubscriptionKey};
use hermes_server::Handler;
use hermes_test::{eventually, FakeService, TestGateway, TestRuntime};
use http::StatusCode;
use serde_json::{json, Value};

/// `news.post` republishes its body as an event on `news`.
fn newsroom() -> Handler {
    Handler::new("news.post").handle(|ctx, req| {
        Box::pin(async move {
            let event = Response::ok(Headers::new(), req.body.clone());
            ctx.bus().publish_response("news", &event).await?;
            ctx.ok()
        })
    })
}

fn echo() -> Handler {
    Handler::new("echo").handle(|ctx, req| {
        Box::pin(async move {
            let user = req.header_str("x-user").map(str::to_string);
            ctx.ok_with(json!({ "body": req.body, "user": user }))
        })
    })
}

#[tokio::test]
async fn test_health_over_tcp() {
    let bus = MemoryBus::new();
    let gateway = TestGateway::start(&bus, GatewayConfig::default()).await.unwrap();

    let (status, body) = gateway.get("/health").await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!({ "status": "ok" }));

    gateway.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_http_call_reaches_handler() {
    let bus = MemoryBus::new();
    let _runtime = TestRuntime::builder().bus(&bus).handlers([echo()]).start().await.unwrap();
    let gateway = TestGateway::start(&bus, GatewayConfig::default()).await.unwrap();

    let (status, reply) = gateway
        .call("echo", json!("hi"), &[("x-user", "ada")])
        .await
        .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply.code, 200);
    assert_eq!(reply.body, Some(json!({ "body": "hi", "user": "ada" })));
}

#[tokio::test]
async fn test_http_handler_rejection_sets_status() {
    let bus = MemoryBus::new();
    let strict = Handler::new("strict")
        .validate(|ctx, req| {
            Box::pin(async move {
                if req.body.as_ref().is_some_and(Value::is_number) {
                    ctx.ok()
                } else {
                    ctx.error(400, json!({ "message": "expected a number" }))
                }
            })
        })
        .handle(|ctx, _req| Box::pin(async move { ctx.ok() }));
    let _runtime = TestRuntime::builder().bus(&bus).handlers([strict]).start().await.unwrap();
    let gateway = TestGateway::start(&bus, GatewayConfig::default()).await.unwrap();

    let (status, reply) = gateway.call("strict", json!("seven"), &[]).await.unwrap();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body, Some(json!({ "message": "expected a number" })));
}

#[tokio::test]
async fn test_http_auth_chain() {
    let bus = MemoryBus::new();
    let _runtime = TestRuntime::builder().bus(&bus).handlers([echo()]).start().await.unwrap();
    let session = FakeService::spawn(&bus, "auth.session", |req| match req.header_str("authorization") {
        Some("Bearer good") => {
            let mut headers = Headers::new();
            headers.insert("x-user".into(), json!("ada"));
            Response::ok(headers, None)
        }
        _ => Response::error(401, json!({ "message": "bad token" })),
    })
    .await
    .unwrap();

    let config = GatewayConfig {
        auth_subjects: vec!["auth.session".into()],
        ..GatewayConfig::default()
    };
    let gateway = TestGateway::start(&bus, config).await.unwrap();

    let (status, reply) = gateway
        .call("echo", json!(1), &[("authorization", "Bearer good")])
        .await
        .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply.body.unwrap()["user"], json!("ada"));

    let (status, reply) = gateway
        .call("echo", json!(1), &[("authorization", "Bearer bad")])
        .await
        .unwrap();
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body, Some(json!({ "message": "bad token" })));

    assert_eq!(session.calls(), 2);
    assert_eq!(session.requests()[0].body, Some(json!({ "subject": "echo" })));
}

#[tokio::test]
async fn test_ws_subscribe_receives_events() {
    let bus = MemoryBus::new();
    let runtime = TestRuntime::builder().bus(&bus).handlers([newsroom()]).start().await.unwrap();
    let gateway = TestGateway::start(&bus, GatewayConfig::default()).await.unwrap();

    let mut socket = gateway.connect(&[]).await.unwrap();
    socket.subscribe("news").await.unwrap();
    assert_eq!(socket.frame().await.unwrap(), ServerFrame::ack("news", Action::Subscribe));

    runtime
        .request("news.post")
        .body(json!({ "headline": "rust 2.0" }))
        .send()
        .await
        .unwrap()
        .assert_ok();

    let event = socket.frame().await.unwrap();
    assert_eq!((event.subject.as_str(), event.code), ("news", 200));
    assert_eq!(event.body, Some(json!({ "headline": "rust 2.0" })));

    socket.unsubscribe("news").await.unwrap();
    assert_eq!(socket.frame().await.unwrap(), ServerFrame::ack("news", Action::Unsubscribe));
}

#[tokio::test]
async fn test_shared_broker_subscription() {
    let bus = MemoryBus::new();
    let runtime = TestRuntime::builder().bus(&bus).handlers([newsroom()]).start().await.unwrap();
    let gateway = TestGateway::start(&bus, GatewayConfig::default()).await.unwrap();

    let mut first = gateway.connect(&[]).await.unwrap();
    let mut second = gateway.connect(&[]).await.unwrap();
    for socket in [&mut first, &mut second] {
        socket.subscribe("news").await.unwrap();
        assert_eq!(socket.frame().await.unwrap().code, 200);
    }
    assert_eq!(bus.subscribe_calls("news"), 1);
    assert_eq!(gateway.subscriptions().subscriber_count(&SubscriptionKey::new("news", None)), 2);

    first.unsubscribe("news").await.unwrap();
    first.frame().await.unwrap();
    runtime.request("news.post").body("one left").send().await.unwrap().assert_ok();
    assert_eq!(second.frame().await.unwrap().body, Some(json!("one left")));
    assert_eq!(bus.subscriber_count("news"), 1);

    second.unsubscribe("news").await.unwrap();
    second.frame().await.unwrap();
    eventually(|| bus.subscriber_count("news") == 0).await;
    assert!(gateway.subscriptions().keys().is_empty());
}

#[tokio::test]
async fn test_closing_socket_releases_subscriptions() {
    let bus = MemoryBus::new();
    let gateway = TestGateway::start(&bus, GatewayConfig::default()).await.unwrap();

    let mut socket = gateway.connect(&[]).await.unwrap();
    for subject in ["news", "sports"] {
        socket.subscribe(subject).await.unwrap();
        socket.frame().await.unwrap();
    }
    assert_eq!(gateway.subscriptions().keys().len(), 2);

    socket.close().await.unwrap();
    eventually(|| gateway.subscriptions().keys().is_empty()).await;
    assert_eq!(bus.subscriber_count("news"), 0);
    assert_eq!(bus.subscriber_count("sports"), 0);
}

#[tokio::test]
async fn test_namespaced_subscriptions_are_isolated() {
    let bus = MemoryBus::new();
    let _lookup = FakeService::spawn(&bus, "namespace.lookup", |req| {
        let team = req.header_str("x-team").unwrap_or_default().to_string();
        Response::ok(Headers::new(), Some(json!({ "namespace": team })))
    })
    .await
    .unwrap();

    let config = GatewayConfig {
        namespace_subjects: vec!["chat".into()],
        namespace_subject: Some("namespace.lookup".into()),
        ..GatewayConfig::default()
    };
    let gateway = TestGateway::start(&bus, config).await.unwrap();

    let mut red = gateway.connect(&[("x-team", "red")]).await.unwrap();
    let mut blue = gateway.connect(&[("x-team", "blue")]).await.unwrap();
    for socket in [&mut red, &mut blue] {
        socket.subscribe("chat").await.unwrap();
        assert_eq!(socket.frame().await.unwrap().code, 200);
    }
    assert_eq!(bus.subscriber_count("chat.red"), 1);
    assert_eq!(bus.subscriber_count("chat.blue"), 1);
    assert_eq!(bus.subscriber_count("chat"), 0);

    BusClient::new(Arc::new(bus.clone()))
        .publish_response("chat.red", &Response::ok(Headers::new(), Some(json!("for red"))))
        .await
        .unwrap();

    let event = red.frame().await.unwrap();
    // clients see the subject they subscribed to, not the namespaced one
    assert_eq!(event.subject, "chat");
    assert_eq!(event.body, Some(json!("for red")));
    assert_eq!(gateway.subscriptions().subscriber_count(&SubscriptionKey::new("chat", Some("blue".into()))), 1);
}

#[tokio::test]
async fn test_failed_ws_auth_closes_socket() {
    let bus = MemoryBus::new();
    let _session = FakeService::spawn(&bus, "auth.session", |_req| {
        Response::error(403, json!({ "message": "forbidden" }))
    })
    .await
    .unwrap();

    let config = GatewayConfig {
        auth_subjects: vec!["auth.session".into()],
        non_auth_subjects: vec!["public".into()],
        ..GatewayConfig::default()
    };
    let gateway = TestGateway::start(&bus, config).await.unwrap();

    let mut open = gateway.connect(&[]).await.unwrap();
    open.subscribe("public").await.unwrap();
    assert_eq!(open.frame().await.unwrap(), ServerFrame::ack("public", Action::Subscribe));

    let mut socket = gateway.connect(&[]).await.unwrap();
    socket.subscribe("private").await.unwrap();
    assert!(socket.closed().await);
    assert_eq!(bus.subscriber_count("private"), 0);
}

#[tokio::test]
async fn test_invalid_subject_gets_error_frame() {
    let bus = MemoryBus::new();
    let gateway = TestGateway::start(&bus, GatewayConfig::default()).await.unwrap();

    let mut socket = gateway.connect(&[]).await.unwrap();
    socket.subscribe("news.*").await.unwrap();
    let frame = socket.frame().await.unwrap();
    assert_eq!((frame.subject.as_str(), frame.code), ("news.*", 400));

    // the connection stays usable
    socket.subscribe("news").await.unwrap();
    assert_eq!(socket.frame().await.unwrap().code, 200);
}
