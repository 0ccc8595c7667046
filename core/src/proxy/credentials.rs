//! Upstream credential handling
//!
//! The key is attached server-side only: as a header on HTTP requests and as
//! a `key` query parameter on WebSocket targets, since browsers cannot set
//! custom headers on an upgrade request.

use std::fmt;
use std::sync::Arc;

use axum::http::{HeaderMap, HeaderValue};
use url::Url;

use crate::error::ProxyError;
use crate::proxy::headers::API_KEY_HEADER;

const WS_KEY_PARAM: &str = "key";

#[derive(Clone)]
pub struct ApiCredential(Arc<str>);

impl ApiCredential {
    /// Returns `None` for an empty key, which disables the proxy surface.
    pub fn from_config(api_key: &str) -> Option<Self> {
        let key = api_key.trim();
        if key.is_empty() {
            None
        } else {
            Some(Self(Arc::from(key)))
        }
    }

    /// Set the credential header, replacing any client-supplied value.
    pub fn apply(&self, headers: &mut HeaderMap) -> Result<(), ProxyError> {
        let mut value = HeaderValue::from_str(&self.0)?;
        value.set_sensitive(true);
        headers.insert(API_KEY_HEADER, value);
        Ok(())
    }

    /// Build the upstream WebSocket URL: `base` + `path`, the client's query
    /// string preserved and the credential set as the `key` parameter.
    pub fn websocket_url(
        &self,
        base: &str,
        path: &str,
        query: Option<&str>,
    ) -> Result<Url, ProxyError> {
        let joined = format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let mut url = Url::parse(&joined).map_err(|e| ProxyError::InvalidTarget(e.to_string()))?;

        let preserved: Vec<(String, String)> = query
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .filter(|(k, _)| k != WS_KEY_PARAM)
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default();

        url.query_pairs_mut()
            .clear()
            .extend_pairs(preserved)
            .append_pair(WS_KEY_PARAM, &self.0);

        Ok(url)
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiCredential(<redacted>)")
    }
}
