use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tollgate::config::{Config, default_config_path};
use tollgate::server::Server;

#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about = "Reverse proxy with per-upstream request spacing")]
struct Args {
    /// Configuration file (YAML or JSON)
    #[arg(short = 'c', long = "config", env = "TOLLGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .init();

    let path = match args.config {
        Some(path) => path,
        None => default_config_path().context("no config directory on this platform, pass -c <file>")?,
    };
    let cfg = Config::from_file(&path)?;
    tracing::info!(config = %path.display(), sites = cfg.sites.len(), "Loaded configuration");

    let server = Server::from_config(&cfg).await?;

    tokio::select! {
        res = server.run() => {
            res?;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
