//! Error types for the proxy and verification surfaces

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;

use crate::auth::age::{FailureReason, VerificationVerdict};

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("upstream API key is not configured")]
    MissingCredential,

    #[error("{0}")]
    Upstream(#[from] reqwest::Error),

    #[error("invalid upstream target: {0}")]
    InvalidTarget(String),

    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] axum::http::header::InvalidHeaderValue),

    #[error("failed to read request body: {0}")]
    RequestBody(String),

    #[error("upstream websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("timed out connecting to upstream websocket")]
    ConnectTimeout,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            ProxyError::MissingCredential => (StatusCode::SERVICE_UNAVAILABLE, "Proxy disabled"),
            ProxyError::RequestBody(_) => (StatusCode::PAYLOAD_TOO_LARGE, "Request rejected"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "Proxy error"),
        };
        (
            status,
            Json(json!({
                "error": error,
                "message": self.to_string(),
            })),
        )
            .into_response()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("identity provider is not configured")]
    NotConfigured,

    #[error("identity provider discovery failed: {0}")]
    Discovery(String),

    #[error("session cookie could not be issued: {0}")]
    Session(String),

    #[error("no pending code verifier in session")]
    MissingVerifier,

    #[error("state parameter does not match the pending login")]
    StateMismatch,

    #[error("identity provider returned error: {0}")]
    ProviderRejected(String),

    #[error("callback is missing the authorization code")]
    MissingCode,

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("userinfo request failed: {0}")]
    UserInfo(String),

    #[error("identity provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("no date of birth available")]
    MissingBirthdate,

    #[error("unparseable date of birth {0:?}")]
    InvalidBirthdate(String),
}

impl AuthError {
    /// Configuration problems surface as a 500 on the affected route instead
    /// of a verdict redirect.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AuthError::NotConfigured | AuthError::Discovery(_) | AuthError::Session(_)
        )
    }

    /// Verdict reported to the front end for a failed callback.
    pub fn verdict(&self) -> VerificationVerdict {
        match self {
            AuthError::MissingBirthdate => VerificationVerdict::Failed(FailureReason::NoDate),
            AuthError::InvalidBirthdate(_) => VerificationVerdict::Failed(FailureReason::InvalidDate),
            _ => VerificationVerdict::Error,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, "Auth configuration error").into_response()
    }
}
