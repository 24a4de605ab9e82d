//! # blemonitor-core
//!
//! Core logic for monitoring a BLE tool-state sensor.
//!
//! The sensor streams short text frames ("Idle", "Normal Cutting", "Warning",
//! "Danger") over a UART-style GATT service. This crate turns that stream into
//! per-status time totals and keeps the sensor's alarm thresholds in sync.
//!
//! ## Architecture
//!
//! - [`connection`] - connection lifecycle, RSSI polling, dual mode watchdog
//! - [`decoder`] - raw payload to [`Status`]
//! - [`tracker`] - statuses to contiguous sessions
//! - [`aggregator`] - per-status durations and percentages
//! - [`thresholds`] - threshold editing and the firmware command
//! - [`storage`] - SQLite persistence behind [`PersistenceGateway`]
//! - [`monitor`] - the session object wiring the above together
//! - [`config`] - configuration loading, saving and validation
//! - [`error`] - unified error type
//! - [`types`] - shared data types

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod aggregator;
pub mod config;
pub mod connection;
pub mod decoder;
pub mod error;
pub mod monitor;
pub mod storage;
pub mod thresholds;
pub mod tracker;
pub mod types;

// Re-export primary types for convenience
pub use aggregator::{Aggregator, StatusSnapshot, StatusStat};
#[cfg(feature = "bluetooth")]
pub use connection::bluez::BluezAdapter;
pub use connection::mock::{MockCall, MockGattAdapter};
pub use connection::{
    BluetoothError, BluetoothResult, ConnectionEvent, ConnectionManager, ConnectionSettings,
    ConnectionState, ConnectionStatus, GattAdapter, GattLink, LinkEvent, LinkEventSender,
    UartProfile, NORDIC_UART_RX, NORDIC_UART_SERVICE, NORDIC_UART_TX,
};
pub use config::{is_valid_mac_address, ConfigError, ConfigResult, MonitorConfig};
pub use error::{MonitorError, Result};
pub use monitor::{Clock, MonitorService, SystemClock};
pub use storage::{default_database_path, PersistenceGateway, SqliteStore, StorageError};
pub use thresholds::{
    PeripheralWriter, ThresholdCommit, ThresholdEditor, ThresholdError, ThresholdSet,
    DEFAULT_THRESHOLDS, MAX_VALUE, MIN_GAP,
};
pub use tracker::SessionTracker;
pub use types::{DeviceIdentity, DurationTable, Status, StatusSession};
