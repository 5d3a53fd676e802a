//! # stationd
//!
//! Headless station process.
//!
//! ## Startup
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. tracing (RUST_LOG, default info)                                   │
//! │  2. StationConfig: defaults → station.toml → STATION_* → CLI flags     │
//! │  3. UdpDiscovery on the discovery port                                 │
//! │  4. StationCoordinator applies the configured mode                     │
//! │  5. Log role changes until Ctrl+C / SIGTERM, then shut down cleanly    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stationlink_core::StationMode;
use stationlink_net::{
    LoggingAuth, StationConfig, StationCoordinator, UdpDiscovery, UdpSettings,
};

#[derive(Parser, Debug)]
#[command(name = "stationd", version, about = "POS station coordination daemon")]
struct Args {
    /// Path to station.toml (defaults to the platform config directory).
    #[arg(long, env = "STATION_CONFIG")]
    config: Option<PathBuf>,

    /// Requested role: sub, main or single.
    #[arg(long)]
    mode: Option<StationMode>,

    /// Store to host when running as main.
    #[arg(long)]
    store_id: Option<String>,

    /// Port of the local REST service.
    #[arg(long)]
    port: Option<u16>,

    /// Write the effective configuration to the config path and exit.
    #[arg(long)]
    write_config: bool,
}

impl Args {
    fn apply(&self, config: &mut StationConfig) {
        if let Some(mode) = self.mode {
            config.station.mode = mode;
        }
        if let Some(ref store_id) = self.store_id {
            config.station.store_id = Some(store_id.clone());
        }
        if let Some(port) = self.port {
            config.host.port = port;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = StationConfig::load(args.config.clone()).context("Failed to load station config")?;
    args.apply(&mut config);
    config.validate().context("Invalid station config")?;

    if args.write_config {
        config
            .save(args.config.clone())
            .context("Failed to write station config")?;
        info!("Configuration written");
        return Ok(());
    }

    info!(
        device = %config.device.name,
        mode = %config.mode(),
        port = config.host.port,
        discovery_port = config.discovery.udp_port,
        "Starting station daemon"
    );

    let backend = Arc::new(UdpDiscovery::new(UdpSettings::from_config(&config)));
    let coordinator = StationCoordinator::new(config, backend)
        .with_auth(Arc::new(LoggingAuth))
        .start();

    let mut changes = coordinator.subscribe();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            change = changes.recv() => match change {
                Ok(change) => {
                    let snapshot = coordinator.snapshot();
                    info!(
                        role = %change.current,
                        label = %snapshot.label,
                        main = snapshot.main.as_ref().map(|m| m.url.as_str()).unwrap_or("-"),
                        "Station role"
                    );
                }
                Err(RecvError::Lagged(missed)) => warn!(missed, "Missed role changes"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    coordinator.shutdown().await?;
    info!("Station daemon stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping station...");
}
