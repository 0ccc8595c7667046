//! Proxy module - HTTP reverse proxy and WebSocket relay to the upstream API

pub mod credentials;
pub mod handlers;
pub mod headers;
pub mod rate_limit;
pub mod relay;
pub mod server;
pub mod upstream;

pub use credentials::ApiCredential;
pub use server::{build_router, AppState, ProxyServer};

/// Local path prefix under which the upstream API is exposed.
pub const PROXY_PREFIX: &str = "/api-proxy";

/// Path relative to the proxy prefix, as sent upstream.
pub fn upstream_path(path: &str) -> &str {
    path.strip_prefix(PROXY_PREFIX).unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_only_the_prefix() {
        assert_eq!(upstream_path("/api-proxy/v1beta/models"), "/v1beta/models");
        assert_eq!(upstream_path("/api-proxy"), "");
        assert_eq!(upstream_path("/other"), "/other");
    }
}
