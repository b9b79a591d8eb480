//! Rudder daemon
//!
//! Serves the REST API and runs the task workers that resolve release
//! targets, evaluate releases and dispatch jobs.

use anyhow::Context;
use clap::Parser;
use rudder_daemon::{DaemonConfig, Server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Rudder daemon CLI
#[derive(Parser)]
#[command(name = "rudderd")]
#[command(about = "Rudder - continuous deployment orchestration daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "RUDDER_CONFIG")]
    config: Option<String>,

    /// Listen address, overriding the configuration file
    #[arg(short, long, env = "RUDDER_LISTEN_ADDR")]
    listen: Option<String>,

    /// Log level
    #[arg(long, env = "RUDDER_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "RUDDER_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = DaemonConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen
            .parse()
            .with_context(|| format!("Invalid listen address: {}", listen))?;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen_addr = %config.server.listen_addr,
        workers = config.worker.concurrency,
        "Starting rudderd"
    );

    let server = Server::new(config)?;
    server.run().await?;
    Ok(())
}
