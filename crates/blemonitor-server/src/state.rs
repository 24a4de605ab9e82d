//! Application state shared across handlers.

use std::sync::Arc;

use anyhow::Context;
use blemonitor_core::{
    ConnectionManager, DeviceIdentity, MonitorConfig, MonitorService, SqliteStore,
    ThresholdEditor,
};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::info;

use crate::transport::Transport;

/// Connection manager over the selected transport.
pub type Connection = ConnectionManager<Transport>;

/// Monitor persisting to SQLite.
pub type Monitor = MonitorService<SqliteStore>;

/// State handle passed to every handler.
pub type SharedState = Arc<AppState>;

/// Everything the daemon runs.
pub struct AppState {
    /// Loaded configuration.
    pub config: MonitorConfig,
    /// The sensor this daemon records for.
    pub device: DeviceIdentity,
    /// Session store.
    pub store: SqliteStore,
    /// Status session state.
    pub monitor: Monitor,
    /// GATT link to the sensor.
    pub connection: Connection,
    /// Live thresholds. Held across a commit so commits do not interleave.
    pub thresholds: RwLock<ThresholdEditor>,
    /// When the daemon started.
    pub started_at: DateTime<Utc>,
    event_pump: JoinHandle<()>,
}

impl AppState {
    /// Wires the monitor to the connection and starts recording.
    ///
    /// # Errors
    ///
    /// Returns an error if no sensor address is configured.
    pub async fn start(
        config: MonitorConfig,
        store: SqliteStore,
        transport: impl Into<Transport>,
    ) -> anyhow::Result<SharedState> {
        let device = config
            .device_identity()
            .context("bluetooth.device_address is not configured")?;

        let transport = transport.into();
        info!(transport = transport.kind(), "transport selected");
        let connection = ConnectionManager::new(transport, config.connection_settings());
        let monitor = MonitorService::new(device.clone(), store.clone(), config.tick_interval());
        let thresholds = ThresholdEditor::load(&store, config.thresholds.feature_index).await;

        monitor.start().await;
        let event_pump = monitor.spawn_event_pump(connection.subscribe());

        info!(device = %device, thresholds = ?thresholds.thresholds().values(), "monitor started");

        Ok(Arc::new(Self {
            config,
            device,
            store,
            monitor,
            connection,
            thresholds: RwLock::new(thresholds),
            started_at: Utc::now(),
            event_pump,
        }))
    }

    /// Connects to the configured sensor.
    ///
    /// # Errors
    ///
    /// Returns the connection error, if any.
    pub async fn connect_configured(&self) -> blemonitor_core::BluetoothResult<()> {
        self.connection.connect(&self.device.address).await
    }

    /// Flushes open sessions and drops the link.
    pub async fn shutdown(&self) {
        let flushed = self.monitor.pause().await;
        self.connection.close().await;
        self.event_pump.abort();
        info!(flushed, "monitor stopped");
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use axum_test::TestServer;
    use blemonitor_core::MockGattAdapter;
    use tempfile::TempDir;

    pub const DEVICE_ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

    /// A running state over a responsive mock and a throwaway database.
    ///
    /// Keep the `TempDir` alive for the duration of the test.
    pub async fn test_state(adapter: MockGattAdapter) -> (SharedState, TempDir) {
        let dir = TempDir::new().unwrap();
        let mut config = MonitorConfig::default();
        config.bluetooth.device_address = Some(DEVICE_ADDRESS.to_string());
        config.storage.database_path = dir.path().join("blemonitor.db");

        let store = SqliteStore::open(&config.storage.database_path).unwrap();
        let state = AppState::start(config, store, adapter).await.unwrap();
        (state, dir)
    }

    pub async fn test_server(adapter: MockGattAdapter) -> (TestServer, SharedState, TempDir) {
        let (state, dir) = test_state(adapter).await;
        let server = TestServer::new(crate::api::create_router(Arc::clone(&state))).unwrap();
        (server, state, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use blemonitor_core::{MockGattAdapter, PersistenceGateway, Status};

    #[tokio::test]
    async fn test_start_requires_device_address() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path().join("db.sqlite")).unwrap();
        let result = AppState::start(MonitorConfig::default(), store, MockGattAdapter::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_persists_open_session() {
        let (state, _dir) = test_state(MockGattAdapter::new()).await;
        state.monitor.record_status(Status::Warning).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        state.shutdown().await;

        assert_eq!(state.store.session_count(&state.device).await.unwrap(), 1);
        let totals = state.store.load_durations(&state.device).await.unwrap();
        assert!(totals.get(Status::Warning) > 0);
    }
}
