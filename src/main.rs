//! CLI entry point for cleanarr.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cleanarr_core::config::{ConfigProvider, SharedConfig, load_config, resolve_default_config_path};
use cleanarr_core::notifications::{LoggingPublisher, NotificationPublisher};
use cleanarr_core::runtime::{Runtime, RuntimeOptions};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let path = match args.config.clone() {
        Some(path) => path,
        None => resolve_default_config_path()
            .context("cannot locate a config file: set --config, XDG_CONFIG_HOME or HOME")?,
    };
    let config = load_config(&path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;

    if args.check_config {
        info!(path = %path.display(), "configuration is valid");
        return Ok(());
    }

    info!(path = %path.display(), "cleanarr starting");

    let shared: Arc<dyn ConfigProvider> = Arc::new(SharedConfig::new(config));
    let publishers: Vec<Arc<dyn NotificationPublisher>> = vec![Arc::new(LoggingPublisher)];
    let runtime = Runtime::start(
        shared,
        RuntimeOptions {
            force_dry_run: args.dry_run,
        },
        publishers,
    )
    .await
    .context("failed to start runtime")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown requested");
                on_signal.cancel();
            }
            Err(error) => warn!(error = %error, "cannot listen for ctrl-c"),
        }
    });

    if args.once {
        runtime.run_once(&cancel).await;
    } else {
        runtime.run(&cancel).await;
    }

    runtime.shutdown().await;
    Ok(())
}
