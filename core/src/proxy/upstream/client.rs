//! Upstream client for forwarding requests to the generative-language API

use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use reqwest::{Client, Response};
use tokio::time::Duration;

use crate::config::UpstreamConfig;
use crate::error::ProxyError;

#[derive(Clone)]
pub struct UpstreamClient {
    http_client: Client,
    base_url: String,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, ProxyError> {
        let http_client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(Duration::from_secs(config.request_timeout))
            .build()?;

        Ok(Self {
            http_client,
            base_url: config.http_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Map a proxy-relative path onto the upstream base URL. The raw query
    /// string is appended untouched.
    pub fn build_url(&self, path: &str, query_string: Option<&str>) -> String {
        let path = path.trim_start_matches('/');
        match query_string {
            Some(qs) if !qs.is_empty() => format!("{}/{}?{}", self.base_url, path, qs),
            _ => format!("{}/{}", self.base_url, path),
        }
    }

    /// Send one request upstream. Non-2xx statuses are returned as-is; only
    /// transport failures are errors.
    pub async fn forward(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Option<Bytes>,
    ) -> Result<Response, ProxyError> {
        let mut request = self.http_client.request(method, url).headers(headers);
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await?;
        tracing::debug!("Upstream {} responded {}", url, response.status());
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> UpstreamClient {
        UpstreamClient::new(&UpstreamConfig {
            http_base_url: base.to_string(),
            ..UpstreamConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn joins_path_onto_base() {
        let upstream = client("https://generativelanguage.googleapis.com/");
        assert_eq!(
            upstream.build_url("/v1beta/models/gemini-2.5-flash:generateContent", None),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn keeps_raw_query() {
        let upstream = client("http://127.0.0.1:9");
        assert_eq!(
            upstream.build_url("v1beta/models", Some("pageSize=5&alt=sse")),
            "http://127.0.0.1:9/v1beta/models?pageSize=5&alt=sse"
        );
        assert_eq!(upstream.build_url("v1beta/models", Some("")), "http://127.0.0.1:9/v1beta/models");
    }
}
