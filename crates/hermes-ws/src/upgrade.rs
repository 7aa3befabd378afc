//! WebSocket HTTP upgrade handling (RFC 6455).

use base64::Engine;
use bytes::Bytes;
use http::{header, HeaderValue, Request, Response, StatusCode};
use http_body_util::Full;
use sha1::{Digest, Sha1};

use crate::error::{WsError, WsResult};

/// The WebSocket magic GUID used in the handshake.
const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

fn header_str<'r, B>(request: &'r Request<B>, name: impl header::AsHeaderName) -> Option<&'r str> {
    request.headers().get(name).and_then(|v| v.to_str().ok())
}

/// Check if a request is a WebSocket upgrade request.
pub fn is_websocket_request<B>(request: &Request<B>) -> bool {
    validate_upgrade_request(request).is_ok()
}

/// Validates the upgrade headers and returns the `Sec-WebSocket-Accept` value.
pub fn validate_upgrade_request<B>(request: &Request<B>) -> WsResult<String> {
    let connection = header_str(request, header::CONNECTION).unwrap_or_default();
    if !connection
        .split(',')
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
    {
        return Err(WsError::not_websocket("missing Connection: Upgrade header"));
    }

    if !header_str(request, header::UPGRADE).is_some_and(|v| v.eq_ignore_ascii_case("websocket")) {
        return Err(WsError::not_websocket("missing Upgrade: websocket header"));
    }

    let key = header_str(request, header::SEC_WEBSOCKET_KEY)
        .filter(|key| !key.is_empty())
        .ok_or_else(|| WsError::not_websocket("missing Sec-WebSocket-Key header"))?;

    if header_str(request, header::SEC_WEBSOCKET_VERSION) != Some("13") {
        return Err(WsError::not_websocket(
            "missing or invalid Sec-WebSocket-Version header (must be 13)",
        ));
    }

    Ok(accept_key(key))
}

/// Compute the Sec-WebSocket-Accept value from the key.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Builds the `101 Switching Protocols` response for `request`.
///
/// The caller sends this response, then completes the upgrade on the
/// connection's IO with [`WsSocket::accept`](crate::WsSocket::accept).
pub fn upgrade_response<B>(request: &Request<B>) -> WsResult<Response<Full<Bytes>>> {
    let accept = validate_upgrade_request(request)?;
    let accept = HeaderValue::from_str(&accept).map_err(WsError::handshake_failed)?;

    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = response.headers_mut();
    headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(header::SEC_WEBSOCKET_ACCEPT, accept);
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_ws_request() -> Request<()> {
        Request::builder()
            .header(header::CONNECTION, "keep-alive, Upgrade")
            .header(header::UPGRADE, "websocket")
            .header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==")
            .header("Sec-WebSocket-Version", "13")
            .body(())
            .unwrap()
    }

    #[test]
    fn test_is_websocket_request_valid() {
        assert!(is_websocket_request(&make_ws_request()));
    }

    #[test]
    fn test_compute_accept_key() {
        // RFC 6455 example
        assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn test_missing_headers_rejected() {
        let cases = [
            (None, Some("websocket"), Some("k"), Some("13"), "Connection"),
            (Some("Upgrade"), None, Some("k"), Some("13"), "Upgrade"),
            (Some("Upgrade"), Some("websocket"), None, Some("13"), "Key"),
            (Some("Upgrade"), Some("websocket"), Some("k"), Some("12"), "Version"),
        ];
        for (connection, upgrade, key, version, expected) in cases {
            let mut builder = Request::builder();
            if let Some(v) = connection {
                builder = builder.header(header::CONNECTION, v);
            }
            if let Some(v) = upgrade {
                builder = builder.header(header::UPGRADE, v);
            }
            if let Some(v) = key {
                builder = builder.header("Sec-WebSocket-Key", v);
            }
            if let Some(v) = version {
                builder = builder.header("Sec-WebSocket-Version", v);
            }
            let request = builder.body(()).unwrap();
            let err = validate_upgrade_request(&request).unwrap_err();
            assert!(err.to_string().contains(expected), "{err}");
        }
    }

    #[test]
    fn test_upgrade_response() {
        let response = upgrade_response(&make_ws_request()).unwrap();
        assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert_eq!(response.headers()[header::UPGRADE], "websocket");
        assert_eq!(
            response.headers()[header::SEC_WEBSOCKET_ACCEPT],
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_upgrade_response_rejects_plain_request() {
        let request = Request::builder().body(()).unwrap();
        assert!(matches!(
            upgrade_response(&request),
            Err(WsError::NotWebSocketRequest { .. })
        ));
    }
}
