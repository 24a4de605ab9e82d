//! OpenAPI document for the blemonitor API.
//!
//! Served at `/api/openapi.json`, browsable at `/swagger-ui`, and written to
//! `openapi.json` in the workspace root by the `gen-openapi` binary.

use axum::Json;
use blemonitor_core::{ConnectionState, ConnectionStatus, Status, StatusStat, ThresholdCommit};
use utoipa::OpenApi;

use super::connection::{ConnectRequest, DualModeRequest};
use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::status::{SessionEntry, SessionsResponse, StatusResponse};
use super::thresholds::{
    DragRequest, SetThresholdRequest, ThresholdUpdateResponse, ThresholdsResponse,
};

/// Serve the OpenAPI document.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// The OpenAPI document as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> serde_json::Result<String> {
    ApiDoc::openapi().to_pretty_json()
}

/// OpenAPI document.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "blemonitor API",
        version = "0.1.0",
        description = r#"
# blemonitor API

blemonitor watches a machine-tool sensor over Bluetooth Low Energy and records
how long the machine spends in each state.

## Overview

1. **Status**: time spent Idle, Normal Cutting, Warning and Danger, each state's
   share of the total, and utilization (everything except Idle)
2. **Connection**: connect to the sensor, disconnect, and toggle dual mode, which
   reconnects once when service discovery stalls
3. **Thresholds**: the three reading boundaries the sensor classifies against,
   kept at least `min_gap` apart and pushed to the sensor on every commit

Status sessions are written to the database when the sensor disconnects and on
shutdown; the status endpoint always includes sessions still in memory.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local blemonitor daemon")
    ),
    tags(
        (name = "system", description = "Health checks"),
        (name = "status", description = "Machine status statistics and session history"),
        (name = "connection", description = "Sensor connection control"),
        (name = "thresholds", description = "Alarm threshold editing")
    ),
    paths(
        super::health::health_check,
        super::status::get_status,
        super::status::get_sessions,
        super::connection::get_connection,
        super::connection::connect,
        super::connection::disconnect,
        super::connection::set_dual_mode,
        super::thresholds::get_thresholds,
        super::thresholds::drag_threshold,
        super::thresholds::set_threshold,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            Status,
            StatusStat,
            StatusResponse,
            SessionEntry,
            SessionsResponse,
            ConnectionState,
            ConnectionStatus,
            ConnectRequest,
            DualModeRequest,
            ThresholdsResponse,
            DragRequest,
            SetThresholdRequest,
            ThresholdCommit,
            ThresholdUpdateResponse,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_generation() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "blemonitor API");
        assert!(spec.paths.paths.contains_key("/api/status"));
        assert!(spec.paths.paths.contains_key("/api/thresholds/{index}"));
    }

    #[test]
    fn test_openapi_json_serialization() {
        let json = get_openapi_json().unwrap();
        assert!(json.contains("\"openapi\":"));
        assert!(json.contains("\"blemonitor API\""));
        assert!(json.contains("setDualMode"));
    }

    #[tokio::test]
    async fn test_openapi_is_served() {
        let (server, _state, _dir) =
            crate::state::test_support::test_server(blemonitor_core::MockGattAdapter::new()).await;

        let body: serde_json::Value = server.get("/api/openapi.json").await.json();
        assert_eq!(body["info"]["title"], "blemonitor API");
    }
}
