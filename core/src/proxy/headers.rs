//! Hop-by-hop header filtering shared by the HTTP and WebSocket paths

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method};

/// Connection-specific headers that never cross the proxy, in either direction.
pub const STRIPPED_HEADERS: [&str; 8] = [
    "connection",
    "host",
    "content-length",
    "transfer-encoding",
    "upgrade",
    "sec-websocket-key",
    "sec-websocket-version",
    "sec-websocket-extensions",
];

/// Header carrying the upstream credential on HTTP requests.
pub const API_KEY_HEADER: HeaderName = HeaderName::from_static("x-goog-api-key");

pub fn is_stripped(name: &HeaderName) -> bool {
    // HeaderName is always lowercase
    STRIPPED_HEADERS.contains(&name.as_str())
}

/// Copy every header except the connection-specific ones.
pub fn sanitize(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_stripped(name) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

/// Methods whose body is forwarded upstream.
pub fn carries_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// Build the header set for an upstream HTTP request: sanitized, with the
/// per-method `Content-Type` policy and an `Accept` default applied.
///
/// The credential is added separately, see [`super::credentials`].
pub fn outbound_request_headers(method: &Method, inbound: &HeaderMap) -> HeaderMap {
    let mut headers = sanitize(inbound);

    if carries_body(method) {
        if !headers.contains_key(header::CONTENT_TYPE) {
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
        }
    } else if *method == Method::GET || *method == Method::DELETE {
        headers.remove(header::CONTENT_TYPE);
    }

    if !headers.contains_key(header::ACCEPT) {
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
    }

    headers
}

/// Upstream response headers as relayed to the client. The body is
/// re-streamed, so framing headers are dropped and hyper re-derives them.
pub fn outbound_response_headers(upstream: &HeaderMap) -> HeaderMap {
    sanitize(upstream)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound() -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in [
            ("Connection", "keep-alive"),
            ("Host", "shop.example"),
            ("Content-Length", "12"),
            ("Transfer-Encoding", "chunked"),
            ("Upgrade", "websocket"),
            ("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ=="),
            ("Sec-WebSocket-Version", "13"),
            ("Sec-WebSocket-Extensions", "permessage-deflate"),
            ("Sec-WebSocket-Protocol", "chat"),
            ("X-Custom", "kept"),
            ("Accept-Language", "de-CH"),
        ] {
            headers.insert(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_static(value),
            );
        }
        headers
    }

    #[test]
    fn removes_exactly_the_designated_headers() {
        let source = inbound();
        let out = sanitize(&source);

        for name in STRIPPED_HEADERS {
            assert!(!out.contains_key(name), "{} should be stripped", name);
        }
        assert_eq!(out.len(), source.len() - STRIPPED_HEADERS.len());
        assert_eq!(out["x-custom"], "kept");
        assert_eq!(out["accept-language"], "de-CH");
        assert_eq!(out["sec-websocket-protocol"], "chat");
    }

    #[test]
    fn repeated_values_survive() {
        let mut source = HeaderMap::new();
        source.append("x-trace", HeaderValue::from_static("a"));
        source.append("x-trace", HeaderValue::from_static("b"));
        let out = sanitize(&source);
        let values: Vec<&str> = out
            .get_all("x-trace")
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(values, ["a", "b"]);
    }

    #[test]
    fn get_and_delete_never_carry_content_type() {
        let mut source = HeaderMap::new();
        source.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        for method in [Method::GET, Method::DELETE] {
            let out = outbound_request_headers(&method, &source);
            assert!(!out.contains_key(header::CONTENT_TYPE), "{}", method);
        }
    }

    #[test]
    fn body_methods_default_to_json() {
        for method in [Method::POST, Method::PUT, Method::PATCH] {
            let out = outbound_request_headers(&method, &HeaderMap::new());
            assert_eq!(out[header::CONTENT_TYPE], "application/json", "{}", method);
        }

        let mut source = HeaderMap::new();
        source.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        let out = outbound_request_headers(&Method::POST, &source);
        assert_eq!(out[header::CONTENT_TYPE], "text/plain");
    }

    #[test]
    fn accept_default_only_when_absent() {
        let out = outbound_request_headers(&Method::GET, &HeaderMap::new());
        assert_eq!(out[header::ACCEPT], "*/*");

        let mut source = HeaderMap::new();
        source.insert(header::ACCEPT, HeaderValue::from_static("text/event-stream"));
        let out = outbound_request_headers(&Method::GET, &source);
        assert_eq!(out[header::ACCEPT], "text/event-stream");
    }
}
