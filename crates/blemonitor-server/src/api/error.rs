//! API error type and its JSON rendering.
//!
//! Every handler returns [`ApiResult`]; core errors convert through
//! [`MonitorError`] so status codes and error codes stay in one place.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use blemonitor_core::{BluetoothError, MonitorError, StorageError, ThresholdError};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type.
#[derive(Debug, Clone)]
pub enum ApiError {
    /// 400 Bad Request - invalid input.
    BadRequest {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable message.
        message: String,
    },

    /// 404 Not Found.
    NotFound {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable message.
        message: String,
    },

    /// 409 Conflict - the link is not in a state that allows the request.
    Conflict {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable message.
        message: String,
        /// Optional context, e.g. the current connection state.
        details: Option<serde_json::Value>,
    },

    /// 424 Failed Dependency - the peripheral cannot do what was asked.
    FailedDependency {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable message.
        message: String,
        /// Optional details.
        details: Option<String>,
    },

    /// 500 Internal Server Error.
    InternalError {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable message.
        message: String,
        /// Optional details.
        details: Option<String>,
    },

    /// 503 Service Unavailable - Bluetooth or the database is unavailable.
    ServiceUnavailable {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable message.
        message: String,
        /// Optional details.
        details: Option<String>,
    },
}

/// Standard JSON error body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "not_connected",
    "message": "Not connected to a device",
    "details": null
}))]
pub struct ErrorResponse {
    /// Machine-readable error code.
    #[schema(example = "not_connected")]
    pub error: String,

    /// Human-readable message.
    #[schema(example = "Not connected to a device")]
    pub message: String,

    /// Optional details for debugging.
    #[schema(nullable)]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::FailedDependency { .. } => StatusCode::FAILED_DEPENDENCY,
            Self::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match self {
            Self::BadRequest {
                error_code,
                message,
            }
            | Self::NotFound {
                error_code,
                message,
            } => ErrorResponse {
                error: error_code,
                message,
                details: None,
            },

            Self::Conflict {
                error_code,
                message,
                details,
            } => ErrorResponse {
                error: error_code,
                message,
                details,
            },

            Self::InternalError {
                error_code,
                message,
                details,
            } => {
                tracing::error!(
                    error_code = %error_code,
                    message = %message,
                    details = ?details,
                    "internal server error"
                );
                ErrorResponse {
                    error: error_code,
                    message,
                    details: details.map(serde_json::Value::String),
                }
            }

            Self::FailedDependency {
                error_code,
                message,
                details,
            }
            | Self::ServiceUnavailable {
                error_code,
                message,
                details,
            } => ErrorResponse {
                error: error_code,
                message,
                details: details.map(serde_json::Value::String),
            },
        };

        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest { message, .. } => write!(f, "Bad Request: {message}"),
            Self::NotFound { message, .. } => write!(f, "Not Found: {message}"),
            Self::Conflict { message, .. } => write!(f, "Conflict: {message}"),
            Self::FailedDependency { message, .. } => write!(f, "Failed Dependency: {message}"),
            Self::InternalError { message, .. } => write!(f, "Internal Error: {message}"),
            Self::ServiceUnavailable { message, .. } => {
                write!(f, "Service Unavailable: {message}")
            }
        }
    }
}

impl std::error::Error for ApiError {}

/// Which layer an error came from.
fn error_source(err: &MonitorError) -> &'static str {
    if err.is_bluetooth_error() {
        "bluetooth"
    } else if err.is_config_error() {
        "config"
    } else if err.is_persistence_error() {
        "persistence"
    } else {
        "request"
    }
}

/// `"<source> error"`, with a retry hint when the condition is transient.
fn error_details(err: &MonitorError) -> String {
    if err.is_recoverable() {
        format!("{} error, retry later", error_source(err))
    } else {
        format!("{} error", error_source(err))
    }
}

impl From<MonitorError> for ApiError {
    fn from(err: MonitorError) -> Self {
        let error_code = err.error_code().to_ascii_lowercase();
        let message = err.to_string();
        let details = error_details(&err);

        match err.http_status_code() {
            400 => Self::BadRequest {
                error_code,
                message,
            },
            404 => Self::NotFound {
                error_code,
                message,
            },
            409 => Self::Conflict {
                error_code,
                message,
                details: Some(serde_json::json!({
                    "source": error_source(&err),
                    "retryable": err.is_recoverable(),
                })),
            },
            424 => Self::FailedDependency {
                error_code,
                message,
                details: Some(details),
            },
            503 => Self::ServiceUnavailable {
                error_code,
                message,
                details: Some(details),
            },
            _ => Self::InternalError {
                error_code,
                message,
                details: Some(details),
            },
        }
    }
}

impl From<BluetoothError> for ApiError {
    fn from(err: BluetoothError) -> Self {
        Self::from(MonitorError::from(err))
    }
}

impl From<ThresholdError> for ApiError {
    fn from(err: ThresholdError) -> Self {
        Self::from(MonitorError::from(err))
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        Self::from(MonitorError::from(err))
    }
}
