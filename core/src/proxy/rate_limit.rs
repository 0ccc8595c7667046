//! Per-client fixed-window rate limiting for the proxy surface

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;

use crate::proxy::server::AppState;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Outcome of counting one request against a client's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
}

pub struct RateLimiter {
    /// client key -> current window
    windows: DashMap<String, Window>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            max_requests,
            window,
        }
    }

    /// Count a request for `key`, starting a fresh window if the previous
    /// one has elapsed.
    pub fn check(&self, key: &str) -> RateDecision {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> RateDecision {
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert(Window { started: now, count: 0 });

        if now.saturating_duration_since(entry.started) >= self.window {
            *entry = Window { started: now, count: 0 };
        }

        let allowed = entry.count < self.max_requests;
        if allowed {
            entry.count += 1;
        }

        RateDecision {
            allowed,
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(entry.count),
            reset_after: self
                .window
                .saturating_sub(now.saturating_duration_since(entry.started)),
        }
    }

    /// Cleanup expired windows
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.windows.retain(|_, w| {
            if now.saturating_duration_since(w.started) >= self.window {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

/// Resolve the client address used as the rate-limit key.
///
/// With `trusted_hops == 0` the peer address is used. Otherwise the
/// `X-Forwarded-For` chain is walked from the right, skipping one entry per
/// trusted proxy, so a client cannot choose its own key by prepending values.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>, trusted_hops: usize) -> String {
    let peer = peer
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    if trusted_hops == 0 {
        return peer;
    }

    let mut chain: Vec<String> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    chain.push(peer);

    let idx = chain.len().saturating_sub(1 + trusted_hops);
    chain.swap_remove(idx)
}

/// Middleware enforcing the limiter on every request routed through it.
pub async fn enforce(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = client_key(request.headers(), peer, state.trust_proxy_hops);
    let decision = state.rate_limiter.check(&key);

    if !decision.allowed {
        tracing::warn!(
            "Rate limit exceeded for IP: {}. Path: {}",
            key,
            request.uri().path()
        );
        let minutes = state.rate_limiter.window().as_secs().div_ceil(60);
        let message = format!(
            "Too many requests from this IP, please try again after {} minutes",
            minutes
        );
        let mut response = (StatusCode::TOO_MANY_REQUESTS, message).into_response();
        apply_headers(response.headers_mut(), &decision);
        response.headers_mut().insert(
            "retry-after",
            HeaderValue::from(decision.reset_after.as_secs().max(1)),
        );
        return response;
    }

    let mut response = next.run(request).await;
    apply_headers(response.headers_mut(), &decision);
    response
}

fn apply_headers(headers: &mut HeaderMap, decision: &RateDecision) {
    headers.insert("ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert(
        "ratelimit-reset",
        HeaderValue::from(decision.reset_after.as_secs()),
    );
}
