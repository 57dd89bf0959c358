//! seislink Daemon
//!
//! Keeps the device's hub tokens fresh and supervises one streamer process
//! per configured ringserver.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use seislink_core::config::load_config;
use seislink_daemon::DeviceAgent;

#[derive(Parser, Debug)]
#[command(name = "seislink-daemon")]
#[command(version, about = "seislink daemon - hub token lifecycle and streamer supervision")]
struct Args {
    /// Settings file (JSON). Defaults to `<config dir>/seislink/settings.json`.
    #[arg(long, env = "SEISLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the local JSON documents.
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// Path to the streaming binary.
    #[arg(long)]
    streamer_bin: Option<PathBuf>,

    /// Log level filter for the seislink crates (e.g. "info", "debug").
    #[arg(long, default_value = "info", env = "SEISLINK_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "SEISLINK_LOG_JSON")]
    log_json: bool,

    /// Do not start streams at boot or when new endpoints appear.
    #[arg(long, env = "SEISLINK_NO_AUTOSTART")]
    no_autostart: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    seislink_core::tracing_init::init_tracing(&args.log_level, args.log_json);

    let config_path = args.config.clone().or_else(default_config_path);
    let mut config = load_config(config_path.as_deref())?;
    if let Some(dir) = args.store_dir {
        config.store.dir = dir;
    }
    if let Some(bin) = args.streamer_bin {
        config.streamer.bin = bin;
    }
    let autostart = !args.no_autostart;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        store = %config.store.dir.display(),
        hub = %config.hub.base_url(),
        streamer = %config.streamer.bin.display(),
        autostart,
        "Starting seislink-daemon"
    );

    let agent = Arc::new(DeviceAgent::new(&config)?);
    let report = agent.bootstrap(autostart).await?;
    info!(
        endpoints = report.added_count(),
        linked = agent.is_linked(),
        "Bootstrap complete"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let background = agent.spawn_background(autostart, &shutdown_rx);
    drop(shutdown_rx);

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    // Ready once the background tasks are running. `true` unsets
    // $NOTIFY_SOCKET so streamer processes cannot notify systemd.
    #[cfg(unix)]
    if let Err(e) = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]) {
        warn!(error = %e, "Failed to notify systemd");
    }

    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
        }
    }

    let _ = shutdown_tx.send(true);
    for handle in background {
        if let Err(e) = handle.await {
            warn!(error = %e, "Background task failed");
        }
    }
    let stopped = agent.shutdown().await;

    info!(streams_stopped = stopped, "Daemon stopped");
    Ok(())
}

/// Default settings file: `<config dir>/seislink/settings.json`.
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("seislink").join("settings.json"))
}
