//! Application configuration management.
//!
//! Handles loading, saving, and validating blemonitor configuration:
//! - Bluetooth adapter, target device and UART profile
//! - Ticker, RSSI and dual mode timing
//! - Threshold command feature index
//! - Database location and HTTP bind address
//!
//! Values come from a TOML file layered with `BLEMONITOR__SECTION__KEY`
//! environment overrides, e.g. `BLEMONITOR__BLUETOOTH__DUAL_MODE=true`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::connection::{ConnectionSettings, UartProfile, NORDIC_UART_RX, NORDIC_UART_SERVICE, NORDIC_UART_TX};
use crate::storage::default_database_path;
use crate::types::DeviceIdentity;

static MAC_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i)[0-9A-F]{2}(:[0-9A-F]{2}){5}$").expect("MAC address pattern compiles")
});

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "BLEMONITOR";

/// Errors raised while loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required configuration file does not exist.
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// The file exists but could not be read.
    #[error("Failed to read {path}: {source}")]
    ReadError {
        /// File path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file could not be written.
    #[error("Failed to write {path}: {source}")]
    WriteError {
        /// File path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The layered sources could not be merged or deserialized.
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// The configuration could not be turned into TOML.
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// One field holds an invalid value.
    #[error("Invalid value for '{field}': {message}")]
    ValidationError {
        /// Dotted field path.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields hold invalid values.
    #[error("{} configuration errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Returns `true` for `XX:XX:XX:XX:XX:XX` with hex digits in either case.
#[must_use]
pub fn is_valid_mac_address(address: &str) -> bool {
    MAC_ADDRESS.is_match(address)
}

/// Main application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MonitorConfig {
    /// Bluetooth settings.
    pub bluetooth: BluetoothConfig,
    /// Timer periods.
    pub timing: TimingConfig,
    /// Threshold command settings.
    pub thresholds: ThresholdConfig,
    /// Persistence settings.
    pub storage: StorageConfig,
    /// HTTP server settings.
    pub server: ServerConfig,
}

/// Bluetooth settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Adapter name such as `hci0`. The system default when unset.
    pub adapter: Option<String>,
    /// Sensor MAC address.
    pub device_address: Option<String>,
    /// Sensor name, part of the history key.
    pub device_name: String,
    /// Use the reconnect watchdog for new links.
    pub dual_mode: bool,
    /// Connect to `device_address` when the daemon starts.
    pub connect_on_start: bool,
    /// UART service UUID.
    pub uart_service: Uuid,
    /// UART notify characteristic UUID.
    pub uart_tx: Uuid,
    /// UART write characteristic UUID.
    pub uart_rx: Uuid,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            adapter: None,
            device_address: None,
            device_name: "IDP-Monitor".to_string(),
            dual_mode: false,
            connect_on_start: true,
            uart_service: NORDIC_UART_SERVICE,
            uart_tx: NORDIC_UART_TX,
            uart_rx: NORDIC_UART_RX,
        }
    }
}

/// Timer periods in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Session ticker period.
    pub tick_interval_ms: u64,
    /// RSSI poll period.
    pub rssi_interval_ms: u64,
    /// Dual mode service discovery deadline.
    pub dual_mode_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            rssi_interval_ms: 1000,
            dual_mode_timeout_ms: 5000,
        }
    }
}

/// Threshold command settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Feature index prefixed to every threshold command.
    pub feature_index: u16,
}

/// Persistence settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file.
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
        }
    }
}

impl MonitorConfig {
    /// Loads `path` layered with environment overrides. The file must exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unparsable or invalid.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        Self::build(path, true)
    }

    /// Like [`Self::load`], but a missing file means "all defaults".
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file is unparsable or the result is
    /// invalid.
    pub fn load_or_default(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "no configuration file, using defaults");
        }
        Self::build(path, false)
    }

    fn build(path: &Path, required: bool) -> ConfigResult<Self> {
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(required),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the configuration to `path` as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::WriteError {
            path: path.display().to_string(),
            source,
        })
    }

    /// Checks every field and reports all problems at once.
    ///
    /// # Errors
    ///
    /// Returns a single [`ConfigError::ValidationError`] or
    /// [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut invalid = |field: &str, message: &str| {
            errors.push(ConfigError::ValidationError {
                field: field.to_string(),
                message: message.to_string(),
            });
        };

        if let Some(address) = &self.bluetooth.device_address {
            if !is_valid_mac_address(address) {
                invalid(
                    "bluetooth.device_address",
                    "must be in format XX:XX:XX:XX:XX:XX",
                );
            }
        }
        if self.bluetooth.device_name.trim().is_empty() {
            invalid("bluetooth.device_name", "must not be empty");
        }
        if self.bluetooth.uart_tx == self.bluetooth.uart_rx {
            invalid("bluetooth.uart_rx", "must differ from bluetooth.uart_tx");
        }
        if self.timing.tick_interval_ms == 0 {
            invalid("timing.tick_interval_ms", "must be greater than 0");
        }
        if self.timing.rssi_interval_ms == 0 {
            invalid("timing.rssi_interval_ms", "must be greater than 0");
        }
        if self.timing.dual_mode_timeout_ms == 0 {
            invalid("timing.dual_mode_timeout_ms", "must be greater than 0");
        }
        if self.thresholds.feature_index > 9999 {
            invalid("thresholds.feature_index", "must fit in four digits");
        }
        if self.server.bind_address.parse::<SocketAddr>().is_err() {
            invalid("server.bind_address", "must be a socket address like 0.0.0.0:3000");
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Default configuration file location.
    ///
    /// On Linux: `/etc/blemonitor/config.toml`
    /// Elsewhere: the platform config directory.
    #[must_use]
    pub fn default_path() -> PathBuf {
        #[cfg(target_os = "linux")]
        {
            PathBuf::from("/etc/blemonitor/config.toml")
        }
        #[cfg(not(target_os = "linux"))]
        {
            directories::ProjectDirs::from("", "", "blemonitor").map_or_else(
                || PathBuf::from("./config.toml"),
                |dirs| dirs.config_dir().join("config.toml"),
            )
        }
    }

    /// Identity of the configured sensor, if an address is set.
    #[must_use]
    pub fn device_identity(&self) -> Option<DeviceIdentity> {
        self.bluetooth
            .device_address
            .as_ref()
            .map(|addr| DeviceIdentity::new(self.bluetooth.device_name.clone(), addr.to_uppercase()))
    }

    /// Settings for the connection manager.
    #[must_use]
    pub const fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            uart: UartProfile {
                service: self.bluetooth.uart_service,
                tx: self.bluetooth.uart_tx,
                rx: self.bluetooth.uart_rx,
            },
            rssi_interval: Duration::from_millis(self.timing.rssi_interval_ms),
            dual_mode_timeout: Duration::from_millis(self.timing.dual_mode_timeout_ms),
            dual_mode: self.bluetooth.dual_mode,
        }
    }

    /// Session ticker period.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.timing.tick_interval_ms)
    }
}
