//! Sensor connection endpoints.
//!
//! Connecting is asynchronous: a successful `connect` means the link was
//! requested and the state is `connecting`; poll `GET /api/connection` to see
//! it reach `connected`.

use axum::extract::State;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use blemonitor_core::ConnectionStatus;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Creates the connection router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_connection))
        .route("/connect", post(connect))
        .route("/disconnect", post(disconnect))
        .route("/dual-mode", put(set_dual_mode))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Connect request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "address": "AA:BB:CC:DD:EE:FF" }))]
pub struct ConnectRequest {
    /// Sensor address. Defaults to the configured sensor and must match it.
    #[schema(example = "AA:BB:CC:DD:EE:FF")]
    #[serde(default)]
    pub address: Option<String>,
}

/// Dual mode toggle.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "enabled": true }))]
pub struct DualModeRequest {
    /// Use the service discovery watchdog for new links.
    pub enabled: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the connection state.
#[utoipa::path(
    get,
    path = "/api/connection",
    tag = "connection",
    operation_id = "getConnection",
    summary = "Get sensor connection state",
    responses(
        (status = 200, description = "Current connection state", body = ConnectionStatus)
    )
)]
pub async fn get_connection(State(state): State<SharedState>) -> Json<ConnectionStatus> {
    Json(state.connection.status().await)
}

/// Connect to the sensor.
#[utoipa::path(
    post,
    path = "/api/connection/connect",
    tag = "connection",
    operation_id = "connect",
    summary = "Connect to the sensor",
    description = "Requests a link to the configured sensor. Reuses the existing link \
        when one is open for the same address. History is keyed on the configured sensor, \
        so other addresses are rejected.",
    request_body = ConnectRequest,
    responses(
        (status = 200, description = "Connection requested", body = ConnectionStatus),
        (status = 400, description = "Malformed address or not the configured sensor", body = ErrorResponse),
        (status = 503, description = "Bluetooth adapter unavailable", body = ErrorResponse)
    )
)]
pub async fn connect(
    State(state): State<SharedState>,
    Json(request): Json<ConnectRequest>,
) -> ApiResult<Json<ConnectionStatus>> {
    if let Some(address) = request.address.as_deref() {
        if !address.trim().eq_ignore_ascii_case(&state.device.address) {
            return Err(ApiError::BadRequest {
                error_code: "device_mismatch".to_string(),
                message: format!(
                    "This daemon records for {}; reconfigure bluetooth.device_address to monitor {address}",
                    state.device.address
                ),
            });
        }
    }

    state.connect_configured().await?;
    Ok(Json(state.connection.status().await))
}

/// Disconnect from the sensor.
#[utoipa::path(
    post,
    path = "/api/connection/disconnect",
    tag = "connection",
    operation_id = "disconnect",
    summary = "Disconnect from the sensor",
    description = "Drops the link. The open status session is closed and flushed once \
        the transport confirms the disconnect. A no-op when not connected.",
    responses(
        (status = 200, description = "Disconnect requested", body = ConnectionStatus),
        (status = 503, description = "Transport error", body = ErrorResponse)
    )
)]
pub async fn disconnect(State(state): State<SharedState>) -> ApiResult<Json<ConnectionStatus>> {
    state.connection.disconnect().await?;
    Ok(Json(state.connection.status().await))
}

/// Toggle dual mode.
#[utoipa::path(
    put,
    path = "/api/connection/dual-mode",
    tag = "connection",
    operation_id = "setDualMode",
    summary = "Enable or disable dual mode",
    description = "In dual mode every new link arms a watchdog: if services are not \
        discovered in time the link is disconnected and reconnected once. Applies to the \
        next connect.",
    request_body = DualModeRequest,
    responses(
        (status = 200, description = "Dual mode updated", body = ConnectionStatus)
    )
)]
pub async fn set_dual_mode(
    State(state): State<SharedState>,
    Json(request): Json<DualModeRequest>,
) -> Json<ConnectionStatus> {
    state.connection.set_dual_mode(request.enabled).await;
    Json(state.connection.status().await)
}
