//! # blemonitor-server
//!
//! HTTP daemon for the blemonitor machine status recorder.
//!
//! This binary provides:
//! - REST API for status statistics, connection control and thresholds
//! - OpenAPI documentation via Swagger UI
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development, without a Bluetooth adapter
//! BLEMONITOR__BLUETOOTH__DEVICE_ADDRESS=AA:BB:CC:DD:EE:FF \
//!     cargo run --package blemonitor-server --features mock-bluetooth
//!
//! # Production
//! BLEMONITOR_ENV=production ./blemonitor-server
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::path::PathBuf;

use anyhow::Context;
use blemonitor_core::{MonitorConfig, SqliteStore};
use blemonitor_server::state::AppState;
use blemonitor_server::transport::Transport;
use blemonitor_server::{api, logging};
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Overrides the configuration file location.
const CONFIG_PATH_ENV: &str = "BLEMONITOR_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(logging::is_production())?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting blemonitor-server");

    let config_path = std::env::var_os(CONFIG_PATH_ENV)
        .map_or_else(MonitorConfig::default_path, PathBuf::from);
    let config = MonitorConfig::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    info!(path = %config_path.display(), "configuration loaded");

    let store = SqliteStore::open(&config.storage.database_path)
        .with_context(|| format!("opening {}", config.storage.database_path.display()))?;
    let transport = Transport::from_config(&config).await?;
    let bind_address = config.server.bind_address.clone();
    let connect_on_start = config.bluetooth.connect_on_start;

    let state = AppState::start(config, store, transport).await?;

    if connect_on_start {
        if let Err(e) = state.connect_configured().await {
            warn!(error = %e, "initial connect failed; use POST /api/connection/connect to retry");
        }
    }

    let app = api::create_router(std::sync::Arc::clone(&state));
    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("binding {bind_address}"))?;

    info!("Listening on {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.shutdown().await;
    info!("blemonitor-server stopped");

    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
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
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received");
}
