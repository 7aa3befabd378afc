//! End-to-end pipeline scenarios over the in-memory bus.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use hermes_core::{
    AfterContext, BeforeContext, BoxFuture, Rejection, Request, Response, StageResult,
};
use hermes_middleware::{Collapsed, Hook, HookSet, Middleware, SimpleMiddleware};
use hermes_server::Handler;
use hermes_test::{eventually, TestRuntime};
use proptest::prelude::*;
use serde_json::{json, Value};

fn echo() -> Handler {
    Handler::new("echo")
        .validate(|ctx, _req| Box::pin(async move { ctx.ok() }))
        .authorize(|ctx, _req| Box::pin(async move { ctx.ok() }))
        .handle(|ctx, req| Box::pin(async move { ctx.ok_with(req.body.clone()) }))
}

/// Rejects every message before validation.
#[derive(Clone)]
struct Closed;

impl Middleware for Closed {
    type State = ();

    fn id(&self) -> &str {
        "closed"
    }

    fn hooks(&self) -> HookSet {
        HookSet::new().with(Hook::BeforeAll)
    }

    fn before_all<'a>(
        &'a self,
        _ctx: BeforeContext<'a>,
        _state: &'a mut (),
        _request: Request,
    ) -> BoxFuture<'a, StageResult<Request>> {
        Box::pin(async move { Err(Rejection::bad_request(json!({ "message": "closed" })).into()) })
    }
}

/// Appends its tag to a string body on the way in and on the way out.
#[derive(Clone)]
struct Tag(String);

impl Middleware for Tag {
    type State = ();

    fn id(&self) -> &str {
        &self.0
    }

    fn hooks(&self) -> HookSet {
        HookSet::new().with(Hook::BeforeHandle).with(Hook::AfterAll)
    }

    fn before_handle<'a>(
        &'a self,
        ctx: BeforeContext<'a>,
        _state: &'a mut (),
        mut request: Request,
    ) -> BoxFuture<'a, StageResult<Request>> {
        Box::pin(async move {
            let body = request.body.as_ref().and_then(Value::as_str).unwrap_or_default();
            request.body = Some(json!(format!("{body}>{}", self.0)));
            ctx.ok(request)
        })
    }

    fn after_all<'a>(
        &'a self,
        ctx: AfterContext<'a>,
        _state: &'a mut (),
        mut response: Response,
    ) -> BoxFuture<'a, StageResult<Response>> {
        Box::pin(async move {
            let body = response.body.as_ref().and_then(Value::as_str).unwrap_or_default();
            response.body = Some(json!(format!("{body}<{}", self.0)));
            ctx.ok(response)
        })
    }
}

/// Stamps the elapsed time, carried in middleware state.
#[derive(Clone)]
struct Timing;

impl SimpleMiddleware for Timing {
    type State = Option<Instant>;

    fn id(&self) -> &str {
        "timing"
    }

    fn before<'a>(
        &'a self,
        ctx: BeforeContext<'a>,
        state: &'a mut Option<Instant>,
        request: Request,
    ) -> BoxFuture<'a, StageResult<Request>> {
        *state = Some(Instant::now());
        Box::pin(async move { ctx.ok(request) })
    }

    fn after<'a>(
        &'a self,
        ctx: AfterContext<'a>,
        state: &'a mut Option<Instant>,
        mut response: Response,
    ) -> BoxFuture<'a, StageResult<Response>> {
        Box::pin(async move {
            let elapsed = state.map(|start| start.elapsed().as_micros()).unwrap_or_default();
            response.headers.insert("x-elapsed-us".into(), json!(elapsed.to_string()));
            ctx.ok(response)
        })
    }
}

#[tokio::test]
async fn test_echo_round_trip() {
    let runtime = TestRuntime::start([echo()]).await.unwrap();

    runtime
        .request("echo")
        .body("hi")
        .send()
        .await
        .unwrap()
        .assert_ok()
        .assert_body(&json!("hi"));

    eventually(|| runtime.logs().last().map(String::as_str) == Some("[echo]End")).await;
    assert_eq!(
        runtime.logs(),
        vec![
            "[echo]Begin",
            "[echo][validate]Handling",
            "[echo][authorize]Handling",
            "[echo][handle]Handling",
            "[echo]End",
        ]
    );
    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn test_before_rejection_never_reaches_handle() {
    let handled = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&handled);
    let handler = Handler::new("guarded").layer(Closed).handle(move |ctx, _req| {
        counter.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { ctx.ok() })
    });
    let runtime = TestRuntime::start([handler]).await.unwrap();

    let response = runtime.request("guarded").body(json!({ "any": 1 })).send().await.unwrap();
    response.assert_code(400).assert_body(&json!({ "message": "closed" }));
    assert_eq!(handled.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_onion_order_across_stages() {
    let handler = Handler::new("onion")
        .layer(Tag("a".into()))
        .layer(Tag("b".into()))
        .layer(Tag("c".into()))
        .handle(|ctx, req| Box::pin(async move { ctx.ok_with(req.body.clone()) }));
    let runtime = TestRuntime::start([handler]).await.unwrap();

    let response = runtime.request("onion").body("x").send().await.unwrap();
    // before hooks in declaration order, after hooks reversed
    response.assert_ok().assert_body(&json!("x>a>b>c<c<b<a"));
}

#[tokio::test]
async fn test_collapsed_middleware_state_reaches_after() {
    let handler = Handler::new("timed")
        .layer(Collapsed(Timing))
        .handle(|ctx, _req| Box::pin(async move { ctx.ok_with("done") }));
    let runtime = TestRuntime::start([handler]).await.unwrap();

    let response = runtime.request("timed").body(1).send().await.unwrap();
    response.assert_ok();
    assert!(response.header("x-elapsed-us").is_some());
}

#[tokio::test]
async fn test_concurrent_messages_do_not_block_each_other() {
    let handler = Handler::new("slow").handle(|ctx, req| {
        Box::pin(async move {
            let ms = req.body.as_ref().and_then(Value::as_u64).unwrap_or_default();
            tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
            ctx.ok_with(ms)
        })
    });
    let runtime = TestRuntime::start([handler]).await.unwrap();

    let started = Instant::now();
    let (a, b, c) = tokio::join!(
        runtime.request("slow").body(200).send(),
        runtime.request("slow").body(200).send(),
        runtime.request("slow").body(200).send(),
    );
    for response in [a, b, c] {
        response.unwrap().assert_ok();
    }
    assert!(started.elapsed() < std::time::Duration::from_millis(550));
}

#[tokio::test]
async fn test_services_and_nested_calls() {
    struct Prices;
    impl Prices {
        fn of(&self, item: &str) -> u64 {
            if item == "apple" { 3 } else { 0 }
        }
    }

    let price = Handler::new("price").handle(|ctx, req| {
        Box::pin(async move {
            let prices = ctx.service::<Prices>().ok_or_else(|| Rejection::internal(json!("no prices")))?;
            let item = req.body.as_ref().and_then(Value::as_str).unwrap_or_default();
            ctx.ok_with(prices.of(item))
        })
    });
    let basket = Handler::new("basket").handle(|ctx, req| {
        Box::pin(async move {
            let mut total = 0;
            for item in req.body.as_ref().and_then(Value::as_array).cloned().unwrap_or_default() {
                let reply = ctx.bus().request("price", &Request::new(item)).await?;
                total += reply.body.as_ref().and_then(Value::as_u64).unwrap_or_default();
            }
            ctx.ok_with(total)
        })
    });

    let runtime = TestRuntime::builder()
        .service(Arc::new(Prices))
        .handlers([price, basket])
        .start()
        .await
        .unwrap();

    runtime
        .request("basket")
        .body(json!(["apple", "apple", "pear"]))
        .send()
        .await
        .unwrap()
        .assert_ok()
        .assert_body(&json!(6));
}

#[tokio::test]
async fn test_handler_headers_win_over_request_headers() {
    let handler = Handler::new("headers").handle(|ctx, _req| {
        Box::pin(async move { ctx.ok_with(json!(null)).map(|outcome| outcome.with_header("role", "admin")) })
    });
    let runtime = TestRuntime::start([handler]).await.unwrap();

    let response = runtime
        .request("headers")
        .header("role", "guest")
        .header("user", "ada")
        .body(1)
        .send()
        .await
        .unwrap();
    assert_eq!(response.header("role"), Some("admin"));
    assert_eq!(response.header("user"), Some("ada"));
}

#[tokio::test]
async fn test_publish_without_reply_runs_pipeline() {
    let runtime = TestRuntime::start([echo()]).await.unwrap();
    runtime.publish("echo", &Request::new("fire and forget")).await.unwrap();

    eventually(|| runtime.logs().iter().any(|line| line == "[echo]End")).await;
    assert!(runtime.logs().contains(&"[echo][handle]Handling".to_string()));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_tags_wrap_in_onion_order(tags in proptest::collection::vec("[a-z]{1,3}", 1..5)) {
        let expected = {
            let inward: String = tags.iter().map(|tag| format!(">{tag}")).collect();
            let outward: String = tags.iter().rev().map(|tag| format!("<{tag}")).collect();
            format!("x{inward}{outward}")
        };

        let body = tokio_test::block_on(async {
            let handler = tags
                .iter()
                .fold(Handler::new("wrapped"), |handler, tag| handler.layer(Tag(tag.clone())))
                .handle(|ctx, req| Box::pin(async move { ctx.ok_with(req.body.clone()) }));
            let runtime = TestRuntime::start([handler]).await.unwrap();
            let response = runtime.request("wrapped").body("x").send().await.unwrap();
            runtime.stop().await.unwrap();
            response.body().cloned()
        });
        prop_assert_eq!(body, Some(json!(expected)));
    }
}
