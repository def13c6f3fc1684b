//! Argus Binary Entry Point
//!
//! This binary runs the complete Argus monitoring engine.
//! Core functionality is provided by the `argus` library crate.

use argus::{
    config::{EngineConfig, parse_duration},
    connector::ConnectorStore,
    extension::ExtensionRegistry,
    strategy::{Engine, build_store},
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Argus - Connector-Driven Monitoring Engine
#[derive(Parser, Debug)]
#[command(name = "argus", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/argus.yaml",
        env = "ARGUS_CONFIG"
    )]
    config: String,

    /// Connector directory (overrides config file)
    #[arg(long, env = "ARGUS_CONNECTOR_DIR")]
    connector_dir: Option<String>,

    /// Collect interval such as "30s" (overrides config file)
    #[arg(long, value_parser = parse_duration)]
    interval: Option<Duration>,

    /// Run this many collect cycles then exit (overrides config file)
    #[arg(long)]
    cycles: Option<u64>,

    /// Write the final telemetry snapshot to this file instead of stdout
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing; logs go to stderr, the final snapshot owns stdout
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("ARGUS_LOG")
                .unwrap_or_else(|_| "info,argus=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Argus - Connector-Driven Monitoring Engine");

    let cli = Cli::parse();

    tracing::info!("Loading configuration from: {}", cli.config);
    let mut config = EngineConfig::load(&cli.config)?;

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(dir) = cli.connector_dir {
        config.connector_dir = dir;
    }
    if let Some(interval) = cli.interval {
        config.collect_interval = interval;
    }
    if let Some(cycles) = cli.cycles {
        config.cycles = Some(cycles);
    }
    config.validate()?;

    tracing::info!(
        "Host: {} ({}), connectors from: {}, interval: {}",
        config.host.hostname,
        config.host.device_kind,
        config.connector_dir,
        humantime::format_duration(config.collect_interval),
    );

    // Build the extension registry and the telemetry store
    let registry = Arc::new(ExtensionRegistry::builtin());
    let store = build_store(&config, &registry)?;

    // Load connectors
    let connectors = ConnectorStore::load_from_dir(&config.connector_dir)?;
    if connectors.is_empty() {
        tracing::warn!("No connectors loaded; only the host monitor will be populated");
    }

    let mut engine = Engine::new(store, registry, &connectors);

    // Detection, then the first discovery
    engine.detect_and_discover().await;
    if engine.detected_ids().is_empty() {
        tracing::warn!("No connector matched the host");
    }

    tracing::info!("Press Ctrl+C to shutdown");

    // Collect on the configured cadence until the cycle limit is reached or a
    // shutdown signal arrives. The first tick fires immediately.
    let mut interval = tokio::time::interval(config.collect_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut completed: u64 = 0;
    loop {
        if config.cycles.is_some_and(|limit| completed >= limit) {
            tracing::info!(cycles = completed, "Cycle limit reached");
            break;
        }
        tokio::select! {
            _ = interval.tick() => {
                engine.collect().await;
                completed += 1;
            }
            _ = &mut shutdown => {
                break;
            }
        }
    }

    // Export the final snapshot
    let json = serde_json::to_string_pretty(&engine.snapshot().await)?;
    match &cli.snapshot {
        Some(path) => {
            std::fs::write(path, &json)?;
            tracing::info!(file = %path.display(), "Snapshot written");
        }
        None => println!("{json}"),
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Setup graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
