//! sqlgate - backend registry and replica balancing for a database proxy
//!
//! Usage:
//!     sqlgate --config <path>
//!
//! See --help for more options.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use sqlgate::config::{load_config, Config, ConfigWatcher, ReloadCallback};
use sqlgate::metrics::MetricsServer;
use sqlgate::util::init_logging;
use sqlgate::AppState;

/// Backend registry and replica balancing for a database proxy.
#[derive(Parser, Debug)]
#[command(name = "sqlgate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Validate configuration, register backends and exit
    #[arg(long)]
    validate: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config).with_context(|| {
        format!(
            "failed to load configuration from '{}'",
            cli.config.display()
        )
    })?;

    // CLI overrides config
    let log_level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.global.log_level);

    init_logging(log_level, &config.global.log_format).context("failed to initialize logging")?;

    if cli.validate {
        let state = AppState::new(config).context("failed to register backends")?;
        let registry = state.registry();

        info!("Configuration is valid");
        println!("Configuration is valid.");
        println!("  Worker threads: {}", registry.thread_count());
        println!("  Backends: {}", registry.count());
        for (index, backend) in registry.snapshot().iter().enumerate() {
            println!("    [{}] {}", index, backend);
        }
        return Ok(());
    }

    info!(
        config_path = %cli.config.display(),
        read_write = config.backends.read_write.len(),
        read_only = config.backends.read_only.len(),
        worker_threads = config.global.worker_threads,
        "sqlgate starting"
    );

    run(cli.config, config)
}

/// Run the registry service with the given configuration.
fn run(config_path: PathBuf, config: Config) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(async { run_async(config_path, config).await })
}

/// Async entry point.
async fn run_async(config_path: PathBuf, config: Config) -> Result<()> {
    let watch_interval = config.global.watch_interval;
    let metrics_config = config.global.metrics.clone();

    let state = AppState::new(config).context("failed to register backends")?;

    for (index, backend) in state.registry().snapshot().iter().enumerate() {
        info!(index, backend = %backend.address, role = %backend.role, weight = backend.weight, "configured backend");
    }

    let mut handles = Vec::new();

    if metrics_config.enabled {
        let server = MetricsServer::new(
            metrics_config.address,
            metrics_config.path,
            state.metrics().clone(),
            state.registry().clone(),
        );
        let shutdown_rx = state.shutdown().subscribe();
        handles.push(tokio::spawn(async move {
            server.run(shutdown_rx).await;
        }));
    }

    let reload_state = state.clone();
    let callback: ReloadCallback = Box::new(move |new_config| {
        let report = reload_state.apply_config(new_config);
        info!(
            added = report.added.len(),
            removed = report.removed.len(),
            unchanged = report.unchanged,
            "applied reloaded backends"
        );
    });
    let watcher = ConfigWatcher::new(config_path, watch_interval, callback);
    let shutdown_rx = state.shutdown().subscribe();
    handles.push(tokio::spawn(async move {
        watcher.run(shutdown_rx).await;
    }));

    info!("sqlgate is running");
    info!("press Ctrl+C to stop");

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("received shutdown signal");
        }
        Err(e) => {
            error!(error = %e, "failed to listen for shutdown signal");
        }
    }

    state.trigger_shutdown();

    for handle in handles {
        let _ = handle.await;
    }

    // Last handle to the registry; dropping it closes every pooled connection.
    drop(state);

    info!("sqlgate shut down complete");
    Ok(())
}
