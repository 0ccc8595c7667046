//! Shared fixtures for the router tests: a configurable gateway plus mock
//! upstream and identity-provider servers on ephemeral ports.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::{to_bytes, Body, Bytes},
    extract::State,
    http::{header, HeaderMap, HeaderName, Request, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Form, Router,
};
use serde_json::json;
use tokio::net::TcpListener;

use crate::config::Config;
use crate::proxy::{build_router, AppState};

/// Authorization code the mock identity provider accepts.
pub const MOCK_AUTH_CODE: &str = "mock-auth-code";
const MOCK_ACCESS_TOKEN: &str = "mock-access-token";

pub struct TestGatewayBuilder {
    config: Config,
}

pub struct TestGateway {
    pub addr: SocketAddr,
}

impl TestGateway {
    pub fn builder() -> TestGatewayBuilder {
        let mut config = Config::default();
        config.session.secret = "test-secret".to_string();
        TestGatewayBuilder { config }
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }
}

impl TestGatewayBuilder {
    pub fn api_key(mut self, key: &str) -> Self {
        self.config.upstream.api_key = key.to_string();
        self
    }

    pub fn http_base_url(mut self, url: &str) -> Self {
        self.config.upstream.http_base_url = url.to_string();
        self
    }

    pub fn ws_base_url(mut self, url: &str) -> Self {
        self.config.upstream.ws_base_url = url.to_string();
        self
    }

    pub fn oidc(mut self, issuer: &str) -> Self {
        self.config.oidc.issuer_url = issuer.to_string();
        self.config.oidc.client_id = "gateway-client".to_string();
        self.config.oidc.client_secret = "gateway-secret".to_string();
        self
    }

    pub fn rate_limit(mut self, max_requests: u32, window_seconds: u64) -> Self {
        self.config.rate_limit.max_requests = max_requests;
        self.config.rate_limit.window_seconds = window_seconds;
        self
    }

    pub fn trust_proxy_hops(mut self, hops: usize) -> Self {
        self.config.server.trust_proxy_hops = hops;
        self
    }

    pub fn state(&self) -> AppState {
        AppState::from_config(&self.config).unwrap()
    }

    pub fn router(self) -> Router {
        build_router(self.state())
    }

    /// Serve the gateway on an ephemeral port with peer addresses attached.
    pub async fn spawn(self) -> TestGateway {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = self.router();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });
        TestGateway { addr }
    }
}

/// URL of a local port that nothing listens on.
pub async fn closed_port_url(scheme: &str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("{}://{}", scheme, addr)
}

async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: String,
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

#[derive(Clone, Default)]
struct UpstreamRecorder {
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<SeenRequest>>>,
}

pub struct MockUpstream {
    pub base_url: String,
    pub calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<SeenRequest>>>,
}

impl MockUpstream {
    pub fn last_request(&self) -> SeenRequest {
        self.requests
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("mock upstream received no request")
    }
}

/// Mock upstream API. `/status/404` answers with an upstream error, `/stream`
/// with a chunked event stream, everything else with `{"ok":true}`.
pub async fn spawn_mock_upstream() -> MockUpstream {
    let recorder = UpstreamRecorder::default();
    let router = Router::new()
        .fallback(mock_upstream_handler)
        .with_state(recorder.clone());

    MockUpstream {
        base_url: serve(router).await,
        calls: recorder.calls,
        requests: recorder.requests,
    }
}

async fn mock_upstream_handler(
    State(recorder): State<UpstreamRecorder>,
    request: Request<Body>,
) -> Response {
    let (parts, body) = request.into_parts();
    let body = to_bytes(body, usize::MAX).await.unwrap_or_default();

    recorder.calls.fetch_add(1, Ordering::SeqCst);
    recorder.requests.lock().unwrap().push(SeenRequest {
        method: parts.method.to_string(),
        path_and_query: parts
            .uri
            .path_and_query()
            .map(|p| p.to_string())
            .unwrap_or_default(),
        headers: parts.headers,
        body: body.to_vec(),
    });

    match parts.uri.path() {
        "/status/404" => (
            StatusCode::NOT_FOUND,
            [
                (HeaderName::from_static("x-upstream"), "mock"),
                (header::CONTENT_TYPE, "application/json"),
            ],
            r#"{"error":{"code":404}}"#,
        )
            .into_response(),
        "/stream" => {
            let chunks = futures::stream::iter(
                (0..3).map(|i| Ok::<_, Infallible>(Bytes::from(format!("data: {}\n\n", i)))),
            );
            (
                [(header::CONTENT_TYPE, "text/event-stream")],
                Body::from_stream(chunks),
            )
                .into_response()
        }
        _ => Json(json!({"ok": true})).into_response(),
    }
}

#[derive(Clone)]
struct IdpState {
    issuer: String,
    birthdate: Option<String>,
    discovery_calls: Arc<AtomicUsize>,
    token_calls: Arc<AtomicUsize>,
    token_forms: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

pub struct MockIdp {
    pub issuer: String,
    pub discovery_calls: Arc<AtomicUsize>,
    pub token_calls: Arc<AtomicUsize>,
    token_forms: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

impl MockIdp {
    pub fn last_token_form(&self) -> HashMap<String, String> {
        self.token_forms
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("token endpoint was not called")
    }
}

/// Mock OpenID provider whose userinfo returns `birthdate` (or omits it).
pub async fn spawn_mock_idp(birthdate: Option<&str>) -> MockIdp {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let issuer = format!("http://{}", listener.local_addr().unwrap());

    let state = IdpState {
        issuer: issuer.clone(),
        birthdate: birthdate.map(str::to_string),
        discovery_calls: Arc::default(),
        token_calls: Arc::default(),
        token_forms: Arc::default(),
    };
    let idp = MockIdp {
        issuer,
        discovery_calls: state.discovery_calls.clone(),
        token_calls: state.token_calls.clone(),
        token_forms: state.token_forms.clone(),
    };

    let router = Router::new()
        .route("/.well-known/openid-configuration", get(idp_discovery))
        .route("/token", post(idp_token))
        .route("/userinfo", get(idp_userinfo))
        .with_state(state);
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    idp
}

async fn idp_discovery(State(idp): State<IdpState>) -> Response {
    idp.discovery_calls.fetch_add(1, Ordering::SeqCst);
    // slow enough for concurrent first requests to overlap
    tokio::time::sleep(Duration::from_millis(50)).await;
    Json(json!({
        "issuer": idp.issuer,
        "authorization_endpoint": format!("{}/authorize", idp.issuer),
        "token_endpoint": format!("{}/token", idp.issuer),
        "userinfo_endpoint": format!("{}/userinfo", idp.issuer),
    }))
    .into_response()
}

async fn idp_token(
    State(idp): State<IdpState>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    idp.token_calls.fetch_add(1, Ordering::SeqCst);
    let accepted = form.get("code").map(String::as_str) == Some(MOCK_AUTH_CODE);
    idp.token_forms.lock().unwrap().push(form);

    if !accepted {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid_grant"})),
        )
            .into_response();
    }
    Json(json!({
        "access_token": MOCK_ACCESS_TOKEN,
        "token_type": "Bearer",
        "expires_in": 300,
    }))
    .into_response()
}

async fn idp_userinfo(State(idp): State<IdpState>, headers: HeaderMap) -> Response {
    let expected = format!("Bearer {}", MOCK_ACCESS_TOKEN);
    if headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) != Some(expected.as_str()) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let mut profile = json!({"sub": "user-1"});
    if let Some(birthdate) = &idp.birthdate {
        profile["birthdate"] = json!(birthdate);
    }
    Json(profile).into_response()
}
