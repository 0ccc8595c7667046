use clap::Parser;

mod cli;

use cli::{Cli, Commands};
use edge_gateway_core::config::load_config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config)?;
    config.apply_env_overrides();

    // Initialize logging at the configured level
    let level = &config.logging.level;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("edge_gateway={}", level).parse()?)
                .add_directive(format!("edge_gateway_core={}", level).parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    match cli.command {
        Commands::Start { port } => {
            cli::commands::start::run(config, port).await?;
        }
        Commands::CheckConfig => {
            cli::commands::check_config::run(&config)?;
        }
    }

    Ok(())
}
