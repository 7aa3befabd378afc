//! Wire encoding of envelopes.
//!
//! Envelopes are JSON documents. An empty payload decodes to `None` so the
//! runtime can tell "no data" apart from malformed data.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::envelope::{Request, Response};

/// Errors raised while encoding or decoding envelopes.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Payload could not be serialized.
    #[error("failed to encode {what}: {source}")]
    Encode {
        /// What was being encoded.
        what: &'static str,
        /// Underlying serializer error.
        #[source]
        source: serde_json::Error,
    },

    /// Payload was not a valid envelope.
    #[error("failed to decode {what}: {source}")]
    Decode {
        /// What was being decoded.
        what: &'static str,
        /// Underlying deserializer error.
        #[source]
        source: serde_json::Error,
    },
}

fn encode<T: Serialize>(what: &'static str, value: &T) -> Result<Bytes, CodecError> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|source| CodecError::Encode { what, source })
}

fn decode<T: DeserializeOwned>(what: &'static str, payload: &[u8]) -> Result<Option<T>, CodecError> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(payload)
        .map(Some)
        .map_err(|source| CodecError::Decode { what, source })
}

/// Encodes a request envelope.
pub fn encode_request(request: &Request) -> Result<Bytes, CodecError> {
    encode("request", request)
}

/// Decodes a request envelope. Returns `Ok(None)` for an empty payload.
pub fn decode_request(payload: &[u8]) -> Result<Option<Request>, CodecError> {
    decode("request", payload)
}

/// Encodes a response envelope.
pub fn encode_response(response: &Response) -> Result<Bytes, CodecError> {
    encode("response", response)
}

/// Decodes a response envelope. Returns `Ok(None)` for an empty payload.
pub fn decode_response(payload: &[u8]) -> Result<Option<Response>, CodecError> {
    decode("response", payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_payload_is_none() {
        assert!(decode_request(b"").unwrap().is_none());
        assert!(decode_request(b"  \n").unwrap().is_none());
        assert!(decode_response(b"").unwrap().is_none());
    }

    #[test]
    fn test_decode_request_defaults_headers() {
        let request = decode_request(br#"{"body":"hi"}"#).unwrap().unwrap();
        assert!(request.headers.is_empty());
        assert_eq!(request.body, Some(json!("hi")));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode_request(b"not json").unwrap_err();
        assert!(matches!(err, CodecError::Decode { what: "request", .. }));
    }

    #[test]
    fn test_response_requires_code() {
        assert!(decode_response(br#"{"headers":{},"body":1}"#).is_err());
        let response = decode_response(br#"{"headers":{},"code":404}"#)
            .unwrap()
            .unwrap();
        assert_eq!(response.code, 404);
        assert!(response.body.is_none());
    }

    #[test]
    fn test_encoded_response_carries_code() {
        let bytes = encode_response(&Response::ok(Default::default(), Some(json!("hi")))).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, json!({ "headers": {}, "body": "hi", "code": 200 }));
    }
}
