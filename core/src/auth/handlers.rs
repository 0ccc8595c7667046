//! `/auth/start` and `/auth/callback`

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::auth::age::{self, VerificationVerdict};
use crate::auth::oidc::OidcProvider;
use crate::auth::pkce;
use crate::auth::session::PendingLogin;
use crate::error::AuthError;
use crate::proxy::AppState;

const STATE_BYTES: usize = 16;

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Begin a verification: store a fresh PKCE verifier and send the browser to
/// the identity provider.
pub async fn start(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match begin_login(&state, &headers).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("Failed to start age verification: {}", e);
            e.into_response()
        }
    }
}

async fn begin_login(state: &AppState, headers: &HeaderMap) -> Result<Response, AuthError> {
    let provider = state.oidc.as_ref().ok_or(AuthError::NotConfigured)?;
    let metadata = provider.metadata().await?;

    let pair = pkce::generate();
    let csrf_state = pkce::random_token(STATE_BYTES);
    let authorization_url = provider.authorization_url(metadata, &pair.challenge, &csrf_state)?;

    let session_id = state.sessions.begin_login(
        state.sessions.session_id(headers),
        PendingLogin {
            code_verifier: pair.verifier,
            state: csrf_state,
        },
    );
    let cookie = state.sessions.cookie_header(&session_id)?;

    let mut response = found(authorization_url.as_str());
    response.headers_mut().insert(header::SET_COOKIE, cookie);
    Ok(response)
}

/// Finish a verification and redirect to the front end with the verdict.
pub async fn callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Response {
    let Some(provider) = state.oidc.as_deref() else {
        tracing::error!("Callback received but identity provider is not configured");
        return AuthError::NotConfigured.into_response();
    };

    // Consumed before anything else so the verifier can never be reused.
    let pending = state
        .sessions
        .session_id(&headers)
        .and_then(|id| state.sessions.take_pending(&id));

    let verdict = match verify(provider, pending, &params, state.verification.minimum_age).await {
        Ok(verdict) => verdict,
        Err(e) if e.is_configuration() => {
            tracing::error!("Age verification unavailable: {}", e);
            return e.into_response();
        }
        Err(e) => {
            tracing::warn!("Age verification did not complete: {}", e);
            e.verdict()
        }
    };

    tracing::info!("Age verification verdict: {}", verdict.as_str());
    found(&verdict.redirect_url(&state.verification.redirect_base))
}

async fn verify(
    provider: &OidcProvider,
    pending: Option<PendingLogin>,
    params: &CallbackParams,
    minimum_age: i32,
) -> Result<VerificationVerdict, AuthError> {
    let pending = pending.ok_or(AuthError::MissingVerifier)?;

    if let Some(error) = &params.error {
        let detail = params.error_description.as_deref().unwrap_or_default();
        return Err(AuthError::ProviderRejected(format!("{} {}", error, detail).trim_end().to_string()));
    }
    if params.state.as_deref() != Some(pending.state.as_str()) {
        return Err(AuthError::StateMismatch);
    }
    let code = params.code.as_deref().ok_or(AuthError::MissingCode)?;

    let metadata = provider.metadata().await?;
    let tokens = provider
        .exchange_code(metadata, code, &pending.code_verifier)
        .await?;
    let profile = provider.userinfo(metadata, &tokens.access_token).await?;

    let raw = profile
        .birthdate
        .filter(|b| !b.trim().is_empty())
        .ok_or(AuthError::MissingBirthdate)?;
    let birthdate = age::parse_birthdate(&raw)?;
    let years = age::age_on(birthdate, age::today());
    Ok(VerificationVerdict::for_age(years, minimum_age))
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}
