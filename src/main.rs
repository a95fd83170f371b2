use anyhow::Context;
use argus::config::Config;
use argus::detector::IssueDetector;
use argus::monitor::{LogMonitor, NotificationDispatcher};
use argus::store::{MemoryStore, MetricStore};
use argus::tracker::PerformanceTracker;
use clap::Parser;
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Command-line arguments for the telemetry pipeline
#[derive(Parser)]
#[command(
    name = "argus",
    about = "Telemetry pipeline for monitoring the AI behavior of tenant applications",
    long_about = "Ingests execution logs from monitored AI applications, detects quality \
                  issues with rule- and model-assisted analysis, derives performance \
                  metrics, and raises alerts and notifications when behavior degrades."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,
}

impl Cli {
    /// Validate the CLI arguments
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            // Missing files are handled gracefully by load_config, which
            // warns and falls back to defaults
            if config_path.exists() {
                if !config_path.is_file() {
                    return Err(format!(
                        "Configuration path is not a file: {}",
                        config_path.display()
                    ));
                }
                if let Some(extension) = config_path.extension() {
                    if extension != "toml" {
                        warn!(
                            "Configuration file does not have .toml extension: {}",
                            config_path.display()
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

/// Load configuration from file or use defaults
///
/// A missing file warns and falls back to defaults; an invalid file reports
/// the error and falls back to defaults rather than aborting startup.
fn load_config(config_path: Option<&Path>) -> Config {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            match Config::from_file(path) {
                Ok(config) => config,
                Err(argus::ConfigError::ReadError(_)) => {
                    warn!(
                        "Configuration file '{}' not found or unreadable, using defaults",
                        path.display()
                    );
                    Config::default()
                }
                Err(e) => {
                    error!("Configuration error in '{}': {}", path.display(), e);
                    warn!("Using default configuration due to invalid config file");
                    Config::default()
                }
            }
        }
        None => {
            info!("Using default configuration");
            Config::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose && std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    cli.validate().map_err(anyhow::Error::msg)?;
    let config = load_config(cli.config.as_deref());

    let store: Arc<dyn MetricStore> = Arc::new(MemoryStore::new());
    let detector = Arc::new(IssueDetector::from_config(&config.model));
    let tracker = Arc::new(PerformanceTracker::with_flush_threshold(
        Arc::clone(&store),
        config.tracker.flush_threshold,
    ));
    let dispatcher = Arc::new(NotificationDispatcher::new(
        config.notifications.rate_limit_per_minute,
    ));
    let monitor = Arc::new(LogMonitor::with_queue_limit(
        Arc::clone(&store),
        detector,
        Arc::clone(&tracker),
        dispatcher,
        config.ingest.max_queue_size,
    ));

    let restored = monitor
        .restore_configs()
        .await
        .context("failed to restore monitoring configs")?;
    info!("telemetry pipeline starting with {} configs", restored);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let drain_task = Arc::clone(&monitor).spawn_drain_loop(
        Duration::from_secs(config.ingest.drain_interval_seconds),
        config.ingest.drain_batch_size,
        shutdown_rx.clone(),
    );
    let flush_task = Arc::clone(&tracker).spawn_flush_loop(
        Duration::from_secs(config.tracker.flush_interval_seconds),
        shutdown_rx,
    );

    info!("pipeline running; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received, stopping background tasks");

    shutdown_tx
        .send(true)
        .context("failed to signal shutdown")?;
    drain_task.await.context("drain task panicked")?;
    flush_task.await.context("flush task panicked")?;

    info!("pipeline stopped");
    Ok(())
}
