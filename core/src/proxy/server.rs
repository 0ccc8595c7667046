//! Gateway Server - Axum HTTP server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{StatusCode, Uri},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{any, get},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::auth::{self, oidc::OidcProvider, session::SessionStore, VerificationTarget};
use crate::config::Config;
use crate::proxy::handlers::http::handle_proxy;
use crate::proxy::rate_limit::{self, RateLimiter};
use crate::proxy::upstream::client::UpstreamClient;
use crate::proxy::{ApiCredential, PROXY_PREFIX};

/// How often expired rate-limit windows and sessions are purged.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub upstream: Arc<UpstreamClient>,
    pub credential: Option<ApiCredential>,
    pub ws_base_url: Arc<str>,
    pub ws_connect_timeout: Duration,
    pub pending_queue_limit: usize,
    pub rate_limiter: Arc<RateLimiter>,
    pub trust_proxy_hops: usize,
    pub sessions: Arc<SessionStore>,
    pub oidc: Option<Arc<OidcProvider>>,
    pub verification: Arc<VerificationTarget>,
}

impl AppState {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let credential = ApiCredential::from_config(&config.upstream.api_key);
        if credential.is_none() {
            tracing::warn!("Upstream API key is not set! Proxy functionality will be disabled.");
        }

        let oidc = if config.oidc.is_configured() {
            Some(Arc::new(OidcProvider::new(&config.oidc)?))
        } else {
            tracing::warn!("Identity provider client is not configured; /auth routes will fail.");
            None
        };

        Ok(Self {
            upstream: Arc::new(UpstreamClient::new(&config.upstream)?),
            credential,
            ws_base_url: Arc::from(config.upstream.ws_base_url.as_str()),
            ws_connect_timeout: Duration::from_secs(config.upstream.connect_timeout),
            pending_queue_limit: config.upstream.pending_queue_limit,
            rate_limiter: Arc::new(RateLimiter::new(
                config.rate_limit.max_requests,
                Duration::from_secs(config.rate_limit.window_seconds),
            )),
            trust_proxy_hops: config.server.trust_proxy_hops,
            sessions: Arc::new(SessionStore::new(&config.session, config.is_production())?),
            oidc,
            verification: Arc::new(VerificationTarget {
                redirect_base: config.verification_redirect().to_string(),
                minimum_age: config.verification.minimum_age,
            }),
        })
    }
}

/// Build the gateway router. Static assets are served by another component;
/// everything outside the proxy and auth prefixes answers 404 here.
pub fn build_router(state: AppState) -> Router {
    let proxy = Router::new()
        .route(PROXY_PREFIX, any(handle_proxy))
        .route(&format!("{}/", PROXY_PREFIX), any(handle_proxy))
        .route(&format!("{}/*path", PROXY_PREFIX), any(handle_proxy))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::enforce,
        ));

    Router::new()
        .route("/healthz", get(health_check_handler))
        .route("/auth/start", get(auth::handlers::start))
        .route("/auth/swissid", get(auth::handlers::start))
        .route("/auth/callback", get(auth::handlers::callback))
        .merge(proxy)
        .fallback(fallback_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Gateway server instance
pub struct ProxyServer {
    host: String,
    port: u16,
    state: AppState,
}

impl ProxyServer {
    pub fn new(host: String, port: u16, state: AppState) -> Self {
        Self { host, port, state }
    }

    /// Run the gateway (blocking)
    pub async fn run(self) -> anyhow::Result<()> {
        let sweeper = tokio::spawn(sweep_expired(self.state.clone()));
        let app = build_router(self.state);

        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        tracing::info!("Gateway listening on {}", addr);
        tracing::info!("HTTP/WS proxy active on {}/**", PROXY_PREFIX);
        tracing::info!("Auth routes active on /auth/start and /auth/callback");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        sweeper.abort();
        tracing::info!("Gateway stopped");
        Ok(())
    }
}

async fn sweep_expired(state: AppState) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        ticker.tick().await;
        let windows = state.rate_limiter.cleanup_expired();
        let sessions = state.sessions.cleanup_expired();
        if windows + sessions > 0 {
            tracing::debug!(
                "Swept {} rate-limit window(s) and {} session(s)",
                windows,
                sessions
            );
        }
    }
}

/// Health check handler
async fn health_check_handler() -> Response {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response()
}

async fn fallback_handler(uri: Uri) -> Response {
    let path = uri.path();
    if path.starts_with(PROXY_PREFIX) || path.starts_with(auth::AUTH_PREFIX) {
        (StatusCode::NOT_FOUND, "Endpoint not found").into_response()
    } else {
        (StatusCode::NOT_FOUND, "Not found").into_response()
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
