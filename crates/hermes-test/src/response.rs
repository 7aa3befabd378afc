//! Reply wrapper with assertion helpers.

use hermes_core::{status, Headers, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::TestError;

/// A bus reply under test.
#[derive(Debug, Clone, PartialEq)]
pub struct TestResponse {
    response: Response,
}

impl TestResponse {
    /// Wraps a response envelope.
    pub fn new(response: Response) -> Self {
        Self { response }
    }

    /// The reply code.
    #[must_use]
    pub fn code(&self) -> u16 {
        self.response.code
    }

    /// Returns `true` for a `200` reply.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.response.is_ok()
    }

    /// The reply body, or the error payload.
    #[must_use]
    pub fn body(&self) -> Option<&Value> {
        self.response.body.as_ref()
    }

    /// The reply headers.
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.response.headers
    }

    /// A header as a string.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.response.headers.get(name).and_then(Value::as_str)
    }

    /// Deserializes the body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TestError> {
        let body = self.response.body.clone().unwrap_or(Value::Null);
        Ok(serde_json::from_value(body)?)
    }

    /// The wrapped envelope.
    #[must_use]
    pub fn into_inner(self) -> Response {
        self.response
    }

    /// Panics unless the reply code is `200`.
    pub fn assert_ok(&self) -> &Self {
        self.assert_code(status::OK)
    }

    /// Panics unless the reply carries `code`.
    pub fn assert_code(&self, code: u16) -> &Self {
        assert_eq!(
            self.response.code, code,
            "expected code {code}, got {} with body {:?}",
            self.response.code, self.response.body
        );
        self
    }

    /// Panics unless the body equals `expected`.
    pub fn assert_body(&self, expected: &Value) -> &Self {
        assert_eq!(self.response.body.as_ref(), Some(expected), "unexpected body");
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_assertions_chain() {
        let response = TestResponse::new(Response::ok(Headers::new(), Some(json!({ "n": 1 }))));
        response.assert_ok().assert_body(&json!({ "n": 1 }));

        #[derive(serde::Deserialize)]
        struct Body {
            n: u32,
        }
        assert_eq!(response.json::<Body>().unwrap().n, 1);
    }

    #[test]
    #[should_panic(expected = "expected code 200")]
    fn test_assert_ok_panics_on_error() {
        TestResponse::new(Response::error(400, json!({}))).assert_ok();
    }
}
