//! backchannel server daemon

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use backchannel_core::config::Config;
use backchannel_core::core_store::JsonFileStore;
use backchannel_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use backchannel_core::{CredentialHasher, ShutdownCoordinator, WsServer};

#[derive(Parser, Debug)]
#[command(name = "backchannel-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(args.config.as_deref()).context("failed to load configuration")?;

    let level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.logging.level)
        .parse::<LogLevel>()
        .unwrap_or_else(|e| {
            eprintln!("{e}, using 'info'");
            LogLevel::Info
        });
    let log_config = LogConfig::new(level)
        .with_target(config.logging.with_target)
        .json_format(args.json_logs || config.logging.json_format);
    init_logging_with_config(log_config).context("failed to initialize logging")?;

    info!("Initializing database...");
    let store = JsonFileStore::open(config.store.data_path.clone())
        .context("failed to open account store")?;

    let hasher = CredentialHasher::new().context("failed to construct credential hasher")?;
    // one self-timed hash so a badly sized host shows up in the logs now,
    // not as login latency later
    hasher.calibrate().await;

    let shutdown = Arc::new(ShutdownCoordinator::new());
    let server = WsServer::bind(
        &config.server,
        Arc::new(store),
        Arc::new(hasher),
        shutdown.clone(),
    )
    .await
    .context("failed to bind WebSocket listener")?;

    info!(
        "Starting WS server on {}",
        server.local_addr().context("listener has no local addr")?
    );
    let server_task = tokio::spawn(server.run());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown requested");
    shutdown.trigger();

    server_task
        .await
        .context("server task panicked")?
        .context("server exited with error")?;

    Ok(())
}
