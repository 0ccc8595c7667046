use edge_gateway_core::config::Config;
use edge_gateway_core::proxy::{AppState, ProxyServer};

pub async fn run(mut config: Config, port_override: Option<u16>) -> anyhow::Result<()> {
    // Apply port override if provided
    if let Some(port) = port_override {
        config.server.port = port;
    }

    tracing::info!("Starting Edge Gateway...");
    tracing::info!("  Port: {}", config.server.port);
    tracing::info!("  Host: {}", config.server.host);
    tracing::info!("  Mode: {:?}", config.server.mode);
    tracing::info!("  Upstream: {}", config.upstream.http_base_url);
    tracing::info!(
        "  Upstream API key: {}",
        if config.proxy_enabled() { "present" } else { "missing" }
    );
    tracing::info!(
        "  Identity provider: {}",
        if config.oidc.is_configured() { config.oidc.issuer_url.as_str() } else { "not configured" }
    );
    tracing::info!(
        "  Rate limit: {} requests per {}s",
        config.rate_limit.max_requests,
        config.rate_limit.window_seconds
    );
    tracing::info!("  Verification redirect: {}", config.verification_redirect());

    let state = AppState::from_config(&config)?;
    let server = ProxyServer::new(config.server.host.clone(), config.server.port, state);

    tracing::info!("Gateway starting on http://{}:{}", config.server.host, config.server.port);
    tracing::info!("Press Ctrl+C to stop");

    // Run server (blocks until shutdown)
    server.run().await?;

    Ok(())
}
