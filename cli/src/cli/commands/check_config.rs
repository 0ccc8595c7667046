use edge_gateway_core::config::Config;

pub fn run(config: &Config) -> anyhow::Result<()> {
    println!("{}", toml::to_string_pretty(&config.redacted())?);

    let surface = |enabled: bool| if enabled { "enabled" } else { "disabled" };
    println!("# HTTP/WebSocket proxy: {}", surface(config.proxy_enabled()));
    println!("# Age verification:     {}", surface(config.oidc.is_configured()));
    if config.session.secret.is_empty() {
        println!("# Warning: no session secret, a random one is generated at startup");
    }

    Ok(())
}
