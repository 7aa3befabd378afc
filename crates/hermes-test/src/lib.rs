//! # Hermes Test
//!
//! Test utilities for Hermes services and the gateway. Everything runs on
//! the in-memory bus; no broker is needed.
//!
//! - [`TestRuntime`] starts a [`Runtime`](hermes_server::Runtime) with
//!   captured pipeline logs and a fluent request builder
//! - [`FakeService`] answers a subject with a closure, standing in for auth
//!   or namespace services
//! - [`TestGateway`] serves the gateway on a loopback port and speaks HTTP
//!   and WebSocket to it
//!
//! ## Example
//!
//! ```ignore
//! use hermes_test::TestRuntime;
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn test_echo() {
//!     let runtime = TestRuntime::start([echo()]).await.unwrap();
//!
//!     let response = runtime.request("echo").body(json!("hi")).send().await.unwrap();
//!     response.assert_ok().assert_body(&json!("hi"));
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/hermes-test/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
mod gateway;
mod response;
mod runtime;
mod service;

pub use error::TestError;
pub use gateway::{TestGateway, TestSocket};
pub use response::TestResponse;
pub use runtime::{TestRequest, TestRuntime, TestRuntimeBuilder, TEST_TIMEOUT};
pub use service::FakeService;

/// Polls `check` until it holds, panicking after [`TEST_TIMEOUT`].
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(TEST_TIMEOUT, async {
        while !check() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not met within {TEST_TIMEOUT:?}");
}
