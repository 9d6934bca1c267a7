//! postrelay-agent - spreadsheet-driven media relay
//!
//! Reads scheduled posts from the task spreadsheet, pushes each task's media
//! folder to the mapped device and publishes at the scheduled time.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use postrelay_agent::app::build_from_config;
use postrelay_common::config::{resolve_config_path, AppConfig, CONFIG_ENV_VAR};
use postrelay_common::time;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for postrelay-agent
#[derive(Parser, Debug)]
#[command(name = "postrelay-agent")]
#[command(about = "Spreadsheet-driven media relay and post scheduler")]
#[command(version)]
struct Args {
    /// Configuration file (falls back to POSTRELAY_CONFIG, then the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Task spreadsheet, overriding `sheet.path`
    #[arg(long, env = "POSTRELAY_SHEET")]
    sheet: Option<PathBuf>,

    /// Uploads root, overriding `uploads_root`
    #[arg(long, env = "POSTRELAY_UPLOADS_ROOT")]
    uploads_root: Option<PathBuf>,

    /// Log level when RUST_LOG is unset, overriding `logging.level`
    #[arg(long, env = "POSTRELAY_LOG_LEVEL")]
    log_level: Option<String>,

    /// Run a single dispatch tick and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref(), CONFIG_ENV_VAR);
    let mut config = AppConfig::load(config_path.as_deref()).context("Failed to load configuration")?;
    if let Some(sheet) = args.sheet {
        config.sheet.path = sheet;
    }
    if let Some(root) = args.uploads_root {
        config.uploads_root = root;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    init_tracing(&config)?;
    config.validate().context("Invalid configuration")?;

    info!("Starting postrelay-agent v{}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &config_path {
        info!(path = %path.display(), "Configuration file");
    }
    info!(
        sheet = %config.sheet.path.display(),
        uploads = %config.uploads_root.display(),
        devices = config.devices.len(),
        "Configured"
    );

    let agent = build_from_config(&config)
        .await
        .context("Failed to initialize scheduler")?;
    info!(ledger = %config.ledger_db_path().display(), "Ledger ready");

    agent.prepare(&config.sheet.path).await;

    let mut dispatcher = agent.dispatcher;
    if args.once {
        agent.watcher.force_refresh().await;
        let summary = dispatcher.tick_at(time::now()).await;
        info!(?summary, "Single tick complete");
        return Ok(());
    }

    agent
        .watcher
        .start()
        .await
        .context("Failed to start source watcher")?;

    let cancel = agent.cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        cancel.cancel();
    });

    dispatcher.run().await;

    info!("Shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) -> Result<()> {
    let level = config.logging.level.to_lowercase();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("postrelay_agent={level},postrelay_common={level}").into()
    });

    let file_layer = match &config.logging.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
