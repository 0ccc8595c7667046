pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "edge-gateway")]
#[command(author, version, about = "Gateway CLI - Proxy the Gemini API and verify customer age via OpenID Connect")]
pub struct Cli {
    /// Path to config file (checked in order: local config.toml, ~/.config/edge-gateway/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway server
    Start {
        /// Port to listen on (overrides config and PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the effective configuration with secrets redacted
    CheckConfig,
}
