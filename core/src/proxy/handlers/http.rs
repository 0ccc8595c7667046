//! Reverse proxy handler
//! Handles ANY /api-proxy/** and hands WebSocket upgrades to the relay

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Method, Request, StatusCode},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;

use crate::error::ProxyError;
use crate::proxy::headers::{carries_body, outbound_request_headers, outbound_response_headers};
use crate::proxy::relay;
use crate::proxy::server::AppState;
use crate::proxy::upstream_path;

/// Largest request body forwarded upstream.
pub const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

/// Handle every request under the proxy prefix
pub async fn handle_proxy(State(state): State<AppState>, request: Request<Body>) -> Response {
    if is_websocket_upgrade(request.headers()) {
        return relay::handle_upgrade(state, request).await;
    }

    if request.method() == Method::OPTIONS {
        return preflight_response();
    }

    match forward(&state, request).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("Proxy error: {}", e);
            e.into_response()
        }
    }
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

/// CORS preflight answered locally, upstream is never contacted.
pub fn preflight_response() -> Response {
    (
        StatusCode::OK,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (
                header::ACCESS_CONTROL_ALLOW_METHODS,
                "GET, POST, PUT, PATCH, DELETE, OPTIONS",
            ),
            (
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                "Content-Type, Authorization, X-Goog-Api-Key",
            ),
            (header::ACCESS_CONTROL_MAX_AGE, "86400"),
        ],
        "OK",
    )
        .into_response()
}

/// Forward one request upstream and stream the response back.
///
/// Status and headers pass through unchanged apart from connection-level
/// headers. The body is relayed chunk by chunk; if upstream fails mid-body
/// the stream errors and the client connection is dropped.
pub async fn forward(state: &AppState, request: Request<Body>) -> Result<Response, ProxyError> {
    let credential = state
        .credential
        .as_ref()
        .ok_or(ProxyError::MissingCredential)?;

    let (parts, body) = request.into_parts();
    let path = upstream_path(parts.uri.path());
    let url = state.upstream.build_url(path, parts.uri.query());

    let mut headers = outbound_request_headers(&parts.method, &parts.headers);
    credential.apply(&mut headers)?;

    let body = if carries_body(&parts.method) {
        let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
            .await
            .map_err(|e| ProxyError::RequestBody(e.to_string()))?;
        Some(bytes)
    } else {
        None
    };

    tracing::debug!("Forwarding {} {}", parts.method, path);

    let upstream = state
        .upstream
        .forward(parts.method, &url, headers, body)
        .await?;

    let status = upstream.status();
    let headers = outbound_response_headers(upstream.headers());
    let stream = upstream
        .bytes_stream()
        .inspect_err(|e| tracing::error!("Upstream body aborted: {}", e));

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}
