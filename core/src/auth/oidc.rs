//! OpenID Connect client for the identity provider
//!
//! Discovery runs once, lazily, on the first `/auth/*` request. Concurrent
//! first requests share the same discovery call; a failed discovery is
//! retried by the next request.

use std::time::Duration;

use serde::Deserialize;
use tokio::sync::OnceCell;
use url::Url;

use crate::auth::pkce::CHALLENGE_METHOD;
use crate::config::OidcConfig;
use crate::error::AuthError;

const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
}

/// Only the claim the verdict depends on is kept.
#[derive(Debug, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub birthdate: Option<String>,
}

pub struct OidcProvider {
    http_client: reqwest::Client,
    issuer_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    scopes: String,
    resource: Option<String>,
    metadata: OnceCell<ProviderMetadata>,
}

impl OidcProvider {
    pub fn new(config: &OidcConfig) -> Result<Self, AuthError> {
        if !config.is_configured() {
            return Err(AuthError::NotConfigured);
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout))
            .user_agent("edge-gateway")
            .build()?;

        Ok(Self {
            http_client,
            issuer_url: config.issuer_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            scopes: config.scopes.clone(),
            resource: config.resource.clone().filter(|r| !r.is_empty()),
            metadata: OnceCell::new(),
        })
    }

    /// Provider metadata, discovered on first use.
    pub async fn metadata(&self) -> Result<&ProviderMetadata, AuthError> {
        self.metadata
            .get_or_try_init(|| async {
                match self.discover().await {
                    Ok(metadata) => {
                        tracing::info!("Discovered identity provider {}", metadata.issuer);
                        Ok(metadata)
                    }
                    Err(e) => {
                        tracing::error!("Identity provider discovery failed: {}", e);
                        Err(e)
                    }
                }
            })
            .await
    }

    async fn discover(&self) -> Result<ProviderMetadata, AuthError> {
        let url = format!("{}{}", self.issuer_url, DISCOVERY_PATH);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| AuthError::Discovery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::Discovery(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        let metadata: ProviderMetadata = response
            .json()
            .await
            .map_err(|e| AuthError::Discovery(e.to_string()))?;

        if metadata.issuer.trim_end_matches('/') != self.issuer_url {
            return Err(AuthError::Discovery(format!(
                "issuer mismatch: expected {}, got {}",
                self.issuer_url, metadata.issuer
            )));
        }

        Ok(metadata)
    }

    pub fn authorization_url(
        &self,
        metadata: &ProviderMetadata,
        code_challenge: &str,
        state: &str,
    ) -> Result<Url, AuthError> {
        let mut url = Url::parse(&metadata.authorization_endpoint)
            .map_err(|e| AuthError::Discovery(format!("authorization endpoint: {}", e)))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", &self.redirect_uri)
                .append_pair("scope", &self.scopes);
            if let Some(resource) = &self.resource {
                query.append_pair("resource", resource);
            }
            query
                .append_pair("code_challenge", code_challenge)
                .append_pair("code_challenge_method", CHALLENGE_METHOD)
                .append_pair("state", state);
        }
        Ok(url)
    }

    /// Redeem the authorization code together with the PKCE verifier.
    pub async fn exchange_code(
        &self,
        metadata: &ProviderMetadata,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse, AuthError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("code_verifier", code_verifier),
            ("client_id", self.client_id.as_str()),
        ];

        let response = self
            .http_client
            .post(&metadata.token_endpoint)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::TokenExchange(format!("{}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::TokenExchange(e.to_string()))
    }

    pub async fn userinfo(
        &self,
        metadata: &ProviderMetadata,
        access_token: &str,
    ) -> Result<UserInfo, AuthError> {
        let endpoint = metadata
            .userinfo_endpoint
            .as_deref()
            .ok_or_else(|| AuthError::UserInfo("provider has no userinfo endpoint".into()))?;

        let response = self
            .http_client
            .get(endpoint)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::UserInfo(format!("{} returned {}", endpoint, status)));
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::UserInfo(e.to_string()))
    }
}
