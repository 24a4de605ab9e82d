//! Unified error type for the blemonitor core library.
//!
//! Each module keeps its own error type ([`BluetoothError`], [`StorageError`],
//! [`ConfigError`], [`ThresholdError`]); [`MonitorError`] folds them into one
//! enum carrying an HTTP status and a machine-readable code, which is what the
//! server reports.
//!
//! [`BluetoothError`]: crate::connection::BluetoothError
//! [`StorageError`]: crate::storage::StorageError
//! [`ConfigError`]: crate::config::ConfigError
//! [`ThresholdError`]: crate::thresholds::ThresholdError
//!
//! # Example
//!
//! ```rust
//! use blemonitor_core::error::{MonitorError, Result};
//!
//! fn pick(index: usize) -> Result<usize> {
//!     if index >= 3 {
//!         return Err(MonitorError::ThresholdIndexOutOfRange(index));
//!     }
//!     Ok(index)
//! }
//!
//! assert_eq!(pick(5).unwrap_err().http_status_code(), 400);
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// Every failure a blemonitor operation can report.
#[derive(Debug, Error)]
pub enum MonitorError {
    // =========================================================================
    // BLUETOOTH ERRORS
    // =========================================================================
    /// No powered adapter.
    #[error("No usable Bluetooth adapter. Run 'bluetoothctl power on' or check the adapter name.")]
    AdapterUnavailable,

    /// A connect request named a malformed address.
    #[error("Invalid Bluetooth address: '{0}'. Expected format XX:XX:XX:XX:XX:XX.")]
    InvalidAddress(String),

    /// An operation needs an established link.
    #[error("Not connected to a device")]
    NotConnected,

    /// The peripheral lacks the UART service or characteristic.
    #[error("Device does not support the required capability: {0}")]
    CapabilityUnsupported(String),

    /// The BLE stack reported a failure.
    #[error("Bluetooth transport error: {0}")]
    BluetoothTransport(String),

    // =========================================================================
    // THRESHOLD ERRORS
    // =========================================================================
    /// A threshold index outside `0..3`.
    #[error("Threshold index {0} out of range (expected 0, 1 or 2)")]
    ThresholdIndexOutOfRange(usize),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration holds invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// The database could not be read or written.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// The database is locked by another writer.
    #[error("Database is busy: {0}")]
    PersistenceBusy(String),

    /// A low-level I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result alias for blemonitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;

impl MonitorError {
    /// Returns `true` if this error comes from the Bluetooth layer.
    #[inline]
    #[must_use]
    pub fn is_bluetooth_error(&self) -> bool {
        matches!(
            self,
            Self::AdapterUnavailable
                | Self::InvalidAddress(_)
                | Self::NotConnected
                | Self::CapabilityUnsupported(_)
                | Self::BluetoothTransport(_)
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is related to persistence or I/O.
    #[inline]
    #[must_use]
    pub fn is_persistence_error(&self) -> bool {
        matches!(
            self,
            Self::PersistenceError(_) | Self::PersistenceBusy(_) | Self::IoError(_)
        )
    }

    /// Returns `true` if retrying later may succeed.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::BluetoothTransport(_) | Self::PersistenceBusy(_)
        )
    }

    /// HTTP status code for this error.
    #[inline]
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - malformed input
            Self::InvalidAddress(_) | Self::ThresholdIndexOutOfRange(_) => 400,

            // 404 Not Found
            Self::ConfigNotFound(_) => 404,

            // 409 Conflict - valid request, wrong link state
            Self::NotConnected => 409,

            // 422 Unprocessable Entity
            Self::ConfigParseError(_) | Self::ConfigValidationError(_) => 422,

            // 424 Failed Dependency - the peripheral cannot do it
            Self::CapabilityUnsupported(_) => 424,

            // 500 Internal Server Error
            Self::PersistenceError(_) | Self::IoError(_) => 500,

            // 503 Service Unavailable
            Self::AdapterUnavailable | Self::BluetoothTransport(_) | Self::PersistenceBusy(_) => {
                503
            }
        }
    }

    /// Machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AdapterUnavailable => "ADAPTER_UNAVAILABLE",
            Self::InvalidAddress(_) => "INVALID_ADDRESS",
            Self::NotConnected => "NOT_CONNECTED",
            Self::CapabilityUnsupported(_) => "CAPABILITY_UNSUPPORTED",
            Self::BluetoothTransport(_) => "BLUETOOTH_TRANSPORT_ERROR",
            Self::ThresholdIndexOutOfRange(_) => "THRESHOLD_INDEX_OUT_OF_RANGE",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::PersistenceBusy(_) => "PERSISTENCE_BUSY",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::connection::BluetoothError> for MonitorError {
    fn from(err: crate::connection::BluetoothError) -> Self {
        use crate::connection::BluetoothError;
        match err {
            BluetoothError::AdapterUnavailable => Self::AdapterUnavailable,
            BluetoothError::InvalidAddress { address } => Self::InvalidAddress(address),
            BluetoothError::NotConnected => Self::NotConnected,
            BluetoothError::CapabilityUnsupported {
                service,
                characteristic,
            } => Self::CapabilityUnsupported(format!(
                "service {service}, characteristic {characteristic}"
            )),
            BluetoothError::Transport { message } => Self::BluetoothTransport(message),
        }
    }
}

impl From<crate::storage::StorageError> for MonitorError {
    fn from(err: crate::storage::StorageError) -> Self {
        if err.is_locked() {
            Self::PersistenceBusy(err.to_string())
        } else {
            Self::PersistenceError(err.to_string())
        }
    }
}

impl From<crate::config::ConfigError> for MonitorError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path.into()),
            ConfigError::ReadError { path, source } => {
                Self::PersistenceError(format!("Failed to read {path}: {source}"))
            }
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {path}: {source}"))
            }
            ConfigError::ParseError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<crate::thresholds::ThresholdError> for MonitorError {
    fn from(err: crate::thresholds::ThresholdError) -> Self {
        use crate::thresholds::ThresholdError;
        match err {
            ThresholdError::IndexOutOfRange { index } => Self::ThresholdIndexOutOfRange(index),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use crate::connection::{BluetoothError, NORDIC_UART_SERVICE, NORDIC_UART_TX};
    use crate::storage::StorageError;
    use crate::thresholds::ThresholdError;
    use std::io::{Error as IoErr, ErrorKind};

    #[test]
    fn test_bluetooth_error_classification() {
        assert!(MonitorError::AdapterUnavailable.is_bluetooth_error());
        assert!(MonitorError::NotConnected.is_bluetooth_error());
        assert!(MonitorError::CapabilityUnsupported("uart".into()).is_bluetooth_error());
        assert!(!MonitorError::PersistenceError("x".into()).is_bluetooth_error());
    }

    #[test]
    fn test_config_error_classification() {
        assert!(MonitorError::ConfigNotFound(PathBuf::from("/x")).is_config_error());
        assert!(MonitorError::ConfigValidationError("bad".into()).is_config_error());
        assert!(!MonitorError::NotConnected.is_config_error());
    }

    #[test]
    fn test_persistence_error_classification() {
        assert!(MonitorError::PersistenceError("disk full".into()).is_persistence_error());
        assert!(MonitorError::IoError(IoErr::new(ErrorKind::NotFound, "x")).is_persistence_error());
        assert!(!MonitorError::AdapterUnavailable.is_persistence_error());
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(MonitorError::NotConnected.is_recoverable());
        assert!(MonitorError::PersistenceBusy("locked".into()).is_recoverable());
        assert!(!MonitorError::InvalidAddress("x".into()).is_recoverable());
    }

    #[test]
    fn test_http_status_codes() {
        assert_eq!(MonitorError::InvalidAddress("x".into()).http_status_code(), 400);
        assert_eq!(MonitorError::ThresholdIndexOutOfRange(3).http_status_code(), 400);
        assert_eq!(MonitorError::NotConnected.http_status_code(), 409);
        assert_eq!(
            MonitorError::CapabilityUnsupported("uart".into()).http_status_code(),
            424
        );
        assert_eq!(MonitorError::PersistenceError("x".into()).http_status_code(), 500);
        assert_eq!(MonitorError::AdapterUnavailable.http_status_code(), 503);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(MonitorError::AdapterUnavailable.error_code(), "ADAPTER_UNAVAILABLE");
        assert_eq!(MonitorError::NotConnected.error_code(), "NOT_CONNECTED");
        assert_eq!(
            MonitorError::ThresholdIndexOutOfRange(7).error_code(),
            "THRESHOLD_INDEX_OUT_OF_RANGE"
        );
    }

    #[test]
    fn test_from_bluetooth_error() {
        let err: MonitorError = BluetoothError::InvalidAddress {
            address: "zz".into(),
        }
        .into();
        assert!(matches!(err, MonitorError::InvalidAddress(ref a) if a == "zz"));

        let err: MonitorError = BluetoothError::CapabilityUnsupported {
            service: NORDIC_UART_SERVICE,
            characteristic: NORDIC_UART_TX,
        }
        .into();
        assert!(err.to_string().contains("6e400003"));
    }

    #[test]
    fn test_from_storage_error() {
        let err: MonitorError = StorageError::WorkerGone.into();
        assert!(matches!(err, MonitorError::PersistenceError(_)));
    }

    #[test]
    fn test_from_config_error() {
        let err: MonitorError = ConfigError::MultipleValidationErrors(vec![
            ConfigError::ValidationError {
                field: "a".into(),
                message: "bad".into(),
            },
            ConfigError::ValidationError {
                field: "b".into(),
                message: "worse".into(),
            },
        ])
        .into();
        match err {
            MonitorError::ConfigValidationError(msg) => {
                assert!(msg.contains("'a'"));
                assert!(msg.contains("; "));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_from_threshold_error() {
        let err: MonitorError = ThresholdError::IndexOutOfRange { index: 4 }.into();
        assert!(matches!(err, MonitorError::ThresholdIndexOutOfRange(4)));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MonitorError>();
    }
}
