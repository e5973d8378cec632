//! `kirogate` binary entrypoint.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use kirogate_proxy::auth::Credentials;
use kirogate_proxy::{serve, Config};

/// Anthropic-compatible gateway over the Kiro streaming backend.
#[derive(Debug, Parser)]
#[command(name = "kirogate", version, about)]
struct Cli {
    /// Path to the gateway config file.
    #[arg(short = 'c', long, default_value = "./config.json")]
    config: PathBuf,

    /// Path to the credentials file (rewritten on token refresh).
    #[arg(short = 'C', long, default_value = "./credentials.json")]
    credentials: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Respect `RUST_LOG` if set; otherwise default to info.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;
    let credentials = Credentials::load(&cli.credentials).with_context(|| {
        format!(
            "failed to load credentials from {}",
            cli.credentials.display()
        )
    })?;

    serve(config, credentials, cli.credentials).await
}
