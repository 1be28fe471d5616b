//! credrotor Daemon
//!
//! Background service that keeps one application's client secret rotated.
//!
//! # Running
//!
//! ```bash
//! cargo run -p credrotor-daemon -- --config /etc/credrotor.toml
//! # or after install:
//! credrotord
//! ```
//!
//! `SIGINT`/`SIGTERM` stop the daemon after the current step; `SIGHUP`
//! reloads the identity section of the configuration.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use credrotor_daemon::{resolve_config_path, Daemon};

/// credrotor daemon - rotates an application's client secret
#[derive(Parser, Debug)]
#[command(name = "credrotord")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config_path = resolve_config_path(args.config)?;
    let daemon = Daemon::from_path(&config_path)?;

    init_logging(&daemon.services().config().log_level);

    info!("Starting credrotor daemon...");
    info!("Loaded configuration from {:?}", config_path);

    let shutdown = CancellationToken::new();
    let (reload_tx, reload_rx) = mpsc::channel(1);
    spawn_signal_handlers(shutdown.clone(), reload_tx)?;

    daemon.run(shutdown, reload_rx).await?;

    info!("Daemon stopped");
    Ok(())
}

fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[cfg(unix)]
fn spawn_signal_handlers(shutdown: CancellationToken, reload: mpsc::Sender<()>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = terminate.recv() => break,
                _ = hangup.recv() => {
                    info!("SIGHUP received, reloading configuration");
                    // a reload already queued covers this one
                    let _ = reload.try_send(());
                }
            }
        }
        info!("Shutdown signal received, stopping...");
        shutdown.cancel();
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_signal_handlers(shutdown: CancellationToken, _reload: mpsc::Sender<()>) -> Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received, stopping...");
        }
        shutdown.cancel();
    });
    Ok(())
}
