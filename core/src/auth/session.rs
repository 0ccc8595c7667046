//! Short-lived per-browser sessions holding the pending PKCE verifier
//!
//! The browser only ever sees an opaque, HMAC-signed session id in a cookie.
//! The verifier stays server-side and is removed the moment a callback
//! reads it.

use std::time::{Duration, Instant};

use axum::http::{header, HeaderMap, HeaderValue};
use base64::Engine;
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::auth::pkce::random_token;
use crate::config::SessionConfig;
use crate::error::AuthError;

const SESSION_ID_BYTES: usize = 32;

/// Login started by `/auth/start`, waiting for the provider callback.
#[derive(Debug, Clone)]
pub struct PendingLogin {
    pub code_verifier: String,
    pub state: String,
}

#[derive(Debug)]
struct AuthSession {
    pending: PendingLogin,
    created_at: Instant,
}

pub struct SessionStore {
    sessions: DashMap<String, AuthSession>,
    mac: Hmac<Sha256>,
    cookie_name: String,
    ttl: Duration,
    secure: bool,
}

impl SessionStore {
    pub fn new(config: &SessionConfig, secure: bool) -> anyhow::Result<Self> {
        let secret = if config.secret.is_empty() {
            tracing::warn!("SESSION_SECRET is not set; using a random per-process secret");
            random_token(32)
        } else {
            config.secret.clone()
        };

        let mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .map_err(|e| anyhow::anyhow!("Invalid session secret: {}", e))?;

        Ok(Self {
            sessions: DashMap::new(),
            mac,
            cookie_name: config.cookie_name.clone(),
            ttl: Duration::from_secs(config.ttl_seconds),
            secure,
        })
    }

    /// Session id from the request cookie, if present and correctly signed.
    pub fn session_id(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.cookie_name)
            .and_then(|(_, value)| self.verify(value))
    }

    /// Store a pending login, replacing any earlier one for the same browser.
    /// Returns the session id to put in the cookie.
    pub fn begin_login(&self, existing: Option<String>, pending: PendingLogin) -> String {
        let id = existing.unwrap_or_else(|| random_token(SESSION_ID_BYTES));
        self.sessions.insert(
            id.clone(),
            AuthSession {
                pending,
                created_at: Instant::now(),
            },
        );
        id
    }

    /// Consume the pending login. The session is removed whether or not the
    /// rest of the callback succeeds, so a verifier is never usable twice.
    pub fn take_pending(&self, session_id: &str) -> Option<PendingLogin> {
        let (_, session) = self.sessions.remove(session_id)?;
        if session.created_at.elapsed() >= self.ttl {
            return None;
        }
        Some(session.pending)
    }

    pub fn cookie_header(&self, session_id: &str) -> Result<HeaderValue, AuthError> {
        let mut cookie = format!(
            "{}={}.{}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
            self.cookie_name,
            session_id,
            self.sign(session_id),
            self.ttl.as_secs()
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie).map_err(|e| AuthError::Session(e.to_string()))
    }

    /// Cleanup expired sessions
    pub fn cleanup_expired(&self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.created_at.elapsed() < self.ttl);
        before.saturating_sub(self.sessions.len())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn sign(&self, session_id: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(session_id.as_bytes());
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }

    fn verify(&self, cookie_value: &str) -> Option<String> {
        let (id, signature) = cookie_value.rsplit_once('.')?;
        let signature = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(signature)
            .ok()?;
        let mut mac = self.mac.clone();
        mac.update(id.as_bytes());
        mac.verify_slice(&signature).ok()?;
        Some(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(ttl_seconds: u64) -> SessionStore {
        SessionStore::new(
            &SessionConfig {
                secret: "test-secret".to_string(),
                cookie_name: "gateway.sid".to_string(),
                ttl_seconds,
            },
            false,
        )
        .unwrap()
    }

    fn pending(verifier: &str) -> PendingLogin {
        PendingLogin {
            code_verifier: verifier.to_string(),
            state: "state".to_string(),
        }
    }

    fn cookie_request(store: &SessionStore, id: &str) -> HeaderMap {
        let set_cookie = store.cookie_header(id).unwrap();
        let pair = set_cookie.to_str().unwrap().split(';').next().unwrap().to_string();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("theme=dark; {}", pair)).unwrap(),
        );
        headers
    }

    #[test]
    fn cookie_round_trip_identifies_session() {
        let store = store(600);
        let id = store.begin_login(None, pending("v1"));
        let headers = cookie_request(&store, &id);
        assert_eq!(store.session_id(&headers), Some(id));
    }

    #[test]
    fn tampered_cookie_is_ignored() {
        let store = store(600);
        let id = store.begin_login(None, pending("v1"));
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("gateway.sid={}.forged", id)).unwrap(),
        );
        assert_eq!(store.session_id(&headers), None);

        let other = SessionStore::new(
            &SessionConfig {
                secret: "another-secret".to_string(),
                ..SessionConfig::default()
            },
            false,
        )
        .unwrap();
        assert_eq!(other.session_id(&cookie_request(&store, &id)), None);
    }

    #[test]
    fn verifier_is_single_use() {
        let store = store(600);
        let id = store.begin_login(None, pending("v1"));
        assert_eq!(store.take_pending(&id).unwrap().code_verifier, "v1");
        assert!(store.take_pending(&id).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn last_start_wins() {
        let store = store(600);
        let id = store.begin_login(None, pending("v1"));
        let same = store.begin_login(Some(id.clone()), pending("v2"));
        assert_eq!(id, same);
        assert_eq!(store.take_pending(&id).unwrap().code_verifier, "v2");
    }

    #[test]
    fn expired_sessions_do_not_yield_verifier() {
        let store = store(0);
        let id = store.begin_login(None, pending("v1"));
        assert!(store.take_pending(&id).is_none());

        store.begin_login(None, pending("v2"));
        assert_eq!(store.cleanup_expired(), 1);
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn secure_flag_follows_mode() {
        let config = SessionConfig::default();
        let prod = SessionStore::new(&config, true).unwrap();
        let header = prod.cookie_header("abc").unwrap();
        let cookie = header.to_str().unwrap();
        assert!(cookie.starts_with("gateway.sid=abc."));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.ends_with("; Secure"));
    }
}
