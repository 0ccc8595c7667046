use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub oidc: OidcConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub verification: VerificationConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentMode {
    Development,
    Production,
}

impl Default for DeploymentMode {
    fn default() -> Self {
        Self::Development
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Number of reverse proxies in front of the gateway whose
    /// `X-Forwarded-For` entries are trusted when keying the rate limiter.
    #[serde(default = "default_trust_proxy_hops")]
    pub trust_proxy_hops: usize,

    #[serde(default)]
    pub mode: DeploymentMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            trust_proxy_hops: default_trust_proxy_hops(),
            mode: DeploymentMode::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_http_base_url")]
    pub http_base_url: String,

    #[serde(default = "default_ws_base_url")]
    pub ws_base_url: String,

    /// Upstream API key. Empty disables the proxy surface.
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Maximum number of client messages held while the upstream
    /// WebSocket is still connecting.
    #[serde(default = "default_pending_queue_limit")]
    pub pending_queue_limit: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            http_base_url: default_http_base_url(),
            ws_base_url: default_ws_base_url(),
            api_key: String::new(),
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
            pending_queue_limit: default_pending_queue_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcConfig {
    #[serde(default = "default_issuer_url")]
    pub issuer_url: String,

    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub client_secret: String,

    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,

    #[serde(default = "default_scopes")]
    pub scopes: String,

    /// Optional `resource` parameter sent with the authorization request.
    #[serde(default = "default_resource")]
    pub resource: Option<String>,

    #[serde(default = "default_oidc_timeout")]
    pub http_timeout: u64,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            issuer_url: default_issuer_url(),
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: default_redirect_uri(),
            scopes: default_scopes(),
            resource: default_resource(),
            http_timeout: default_oidc_timeout(),
        }
    }
}

impl OidcConfig {
    /// Age verification is only offered when the client is registered.
    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty() && !self.issuer_url.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub secret: String,

    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    #[serde(default = "default_session_ttl")]
    pub ttl_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            cookie_name: default_cookie_name(),
            ttl_seconds: default_session_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,

    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_seconds: default_window_seconds(),
            max_requests: default_max_requests(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    #[serde(default = "default_production_redirect")]
    pub production_redirect: String,

    #[serde(default = "default_development_redirect")]
    pub development_redirect: String,

    #[serde(default = "default_minimum_age")]
    pub minimum_age: i32,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            production_redirect: default_production_redirect(),
            development_redirect: default_development_redirect(),
            minimum_age: default_minimum_age(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions
fn default_port() -> u16 { 3000 }
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_trust_proxy_hops() -> usize { 1 }
fn default_http_base_url() -> String { "https://generativelanguage.googleapis.com".to_string() }
fn default_ws_base_url() -> String { "wss://generativelanguage.googleapis.com".to_string() }
fn default_request_timeout() -> u64 { 600 }
fn default_connect_timeout() -> u64 { 20 }
fn default_pending_queue_limit() -> usize { 1024 }
fn default_issuer_url() -> String { "https://login.sandbox.swissid.ch".to_string() }
fn default_redirect_uri() -> String { "http://localhost:3000/auth/callback".to_string() }
fn default_scopes() -> String { "openid profile birthdate".to_string() }
fn default_resource() -> Option<String> { Some("https://login.swissid.ch".to_string()) }
fn default_oidc_timeout() -> u64 { 15 }
fn default_cookie_name() -> String { "gateway.sid".to_string() }
fn default_session_ttl() -> u64 { 600 }
fn default_window_seconds() -> u64 { 15 * 60 }
fn default_max_requests() -> u32 { 100 }
fn default_production_redirect() -> String { "/checkout".to_string() }
fn default_development_redirect() -> String { "http://localhost:5173/checkout".to_string() }
fn default_minimum_age() -> i32 { 18 }
fn default_log_level() -> String { "info".to_string() }

impl Config {
    /// Overlay secrets and deployment settings from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Overlay values from an arbitrary key lookup. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("GEMINI_API_KEY").or_else(|| get("API_KEY")) {
            self.upstream.api_key = key;
        }
        if let Some(secret) = get("SESSION_SECRET") {
            self.session.secret = secret;
        }
        if let Some(id) = get("SWISSID_CLIENT_ID") {
            self.oidc.client_id = id;
        }
        if let Some(secret) = get("SWISSID_CLIENT_SECRET") {
            self.oidc.client_secret = secret;
        }
        if let Some(issuer) = get("OIDC_ISSUER_URL") {
            self.oidc.issuer_url = issuer;
        }
        if let Some(uri) = get("OIDC_REDIRECT_URI") {
            self.oidc.redirect_uri = uri;
        }
        if let Some(port) = get("PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!("Ignoring invalid PORT value {:?}", port),
            }
        }
        if let Some(mode) = get("GATEWAY_MODE").or_else(|| get("NODE_ENV")) {
            self.server.mode = if mode.eq_ignore_ascii_case("production") {
                DeploymentMode::Production
            } else {
                DeploymentMode::Development
            };
        }
    }

    /// Whether the proxy surface will run, using the same key check as startup.
    pub fn proxy_enabled(&self) -> bool {
        crate::proxy::ApiCredential::from_config(&self.upstream.api_key).is_some()
    }

    pub fn is_production(&self) -> bool {
        self.server.mode == DeploymentMode::Production
    }

    /// Where the browser lands after the verification flow.
    pub fn verification_redirect(&self) -> &str {
        if self.is_production() {
            &self.verification.production_redirect
        } else {
            &self.verification.development_redirect
        }
    }

    /// Copy of the configuration with every secret masked, for display.
    pub fn redacted(&self) -> Config {
        let mut copy = self.clone();
        for secret in [
            &mut copy.upstream.api_key,
            &mut copy.oidc.client_secret,
            &mut copy.session.secret,
        ] {
            if !secret.is_empty() {
                *secret = "<redacted>".to_string();
            }
        }
        copy
    }
}

/// Get default config file path
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("edge-gateway")
        .join("config.toml")
}

/// Load config from file, or return defaults if not found.
///
/// Loading order:
/// 1. Specified path (if provided)
/// 2. ./config.toml (if exists)
/// 3. default_config_path() (usually ~/.config/edge-gateway/config.toml)
pub fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    if let Some(config_path) = path {
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            tracing::info!("Loaded config from specified path {:?}", config_path);
            return Ok(config);
        } else {
            anyhow::bail!("Specified config file not found: {:?}", config_path);
        }
    }

    let local_config = PathBuf::from("config.toml");
    if local_config.exists() {
        match std::fs::read_to_string(&local_config) {
            Ok(content) => match toml::from_str::<Config>(&content) {
                Ok(config) => {
                    tracing::info!("Loaded config from current directory {:?}", local_config);
                    return Ok(config);
                }
                Err(e) => {
                    tracing::error!("Failed to parse ./config.toml: {}. Falling back to default path.", e);
                }
            },
            Err(e) => {
                tracing::error!("Failed to read ./config.toml: {}. Falling back to default path.", e);
            }
        }
    }

    let default_path = default_config_path();
    if default_path.exists() {
        let content = std::fs::read_to_string(&default_path)?;
        let config: Config = toml::from_str(&content)?;
        tracing::info!("Loaded config from default path {:?}", default_path);
        Ok(config)
    } else {
        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }
}
