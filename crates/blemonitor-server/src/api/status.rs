//! Machine status endpoints.
//!
//! The status snapshot is what the dashboard polls: per-status durations,
//! shares of total time and utilization, combining persisted history with the
//! unflushed sessions of the running monitor.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use blemonitor_core::{Status, StatusSession, StatusStat};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Default number of sessions returned by the history endpoint.
const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// Upper bound on the history page size.
const MAX_HISTORY_LIMIT: u32 = 1000;

/// Creates the status router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_status))
        .route("/sessions", get(get_sessions))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Aggregated status statistics for the monitored sensor.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "device_name": "IDP-Monitor",
    "device_address": "AA:BB:CC:DD:EE:FF",
    "current": "normal_cutting",
    "total_ms": 7_200_000,
    "utilization_percent": 62,
    "statuses": [
        { "status": "idle", "duration_ms": 2_736_000, "percent": 38 },
        { "status": "normal_cutting", "duration_ms": 3_960_000, "percent": 55 },
        { "status": "warning", "duration_ms": 432_000, "percent": 6 },
        { "status": "danger", "duration_ms": 72_000, "percent": 1 }
    ],
    "generated_at_utc": "2025-01-15T03:30:00Z"
}))]
pub struct StatusResponse {
    /// Sensor name.
    pub device_name: String,

    /// Sensor MAC address.
    pub device_address: String,

    /// Status of the open session, `none` before the first frame.
    pub current: Status,

    /// Total recorded time in milliseconds.
    pub total_ms: u64,

    /// `100 - idle percent`, 0 with no history.
    pub utilization_percent: u8,

    /// Per-status breakdown.
    pub statuses: Vec<StatusStat>,

    /// When this snapshot was taken.
    pub generated_at_utc: String,
}

/// Query parameters for the session history.
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct SessionsQuery {
    /// Maximum number of sessions, newest first (default 50, max 1000).
    pub limit: Option<u32>,
}

/// One stored session.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionEntry {
    /// Reported status.
    pub status: Status,

    /// Session start.
    #[schema(example = "2025-01-15T03:00:00Z")]
    pub start_utc: String,

    /// Session end.
    #[schema(example = "2025-01-15T03:12:30Z")]
    pub end_utc: String,

    /// Length in milliseconds.
    #[schema(example = 750_000)]
    pub duration_ms: u64,
}

impl From<&StatusSession> for SessionEntry {
    fn from(session: &StatusSession) -> Self {
        Self {
            status: session.status(),
            start_utc: session.start().to_rfc3339(),
            end_utc: session.end().to_rfc3339(),
            duration_ms: session.duration_ms(),
        }
    }
}

/// Stored session history.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionsResponse {
    /// Sessions, newest first.
    pub sessions: Vec<SessionEntry>,

    /// Total number of stored sessions for this sensor.
    pub total_stored: u64,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the status snapshot.
#[utoipa::path(
    get,
    path = "/api/status",
    tag = "status",
    operation_id = "getStatus",
    summary = "Get machine status statistics",
    description = "Returns accumulated time per status (Idle, Normal Cutting, Warning, \
        Danger), each status's share of the total, utilization and the current status. \
        Includes sessions not yet written to the database.",
    responses(
        (status = 200, description = "Snapshot taken", body = StatusResponse)
    )
)]
pub async fn get_status(State(state): State<SharedState>) -> Json<StatusResponse> {
    let snapshot = state.monitor.snapshot().await;

    Json(StatusResponse {
        device_name: state.device.name.clone(),
        device_address: state.device.address.clone(),
        current: snapshot.current,
        total_ms: snapshot.total_ms,
        utilization_percent: snapshot.utilization_percent,
        statuses: snapshot.statuses,
        generated_at_utc: Utc::now().to_rfc3339(),
    })
}

/// Get stored session history.
#[utoipa::path(
    get,
    path = "/api/status/sessions",
    tag = "status",
    operation_id = "getSessions",
    summary = "List stored status sessions",
    description = "Returns the most recent status sessions written to the database, \
        newest first. Sessions still being recorded are not included until the next flush \
        (disconnect or shutdown).",
    params(SessionsQuery),
    responses(
        (status = 200, description = "History retrieved", body = SessionsResponse),
        (status = 500, description = "Database error"),
        (status = 503, description = "Database busy")
    )
)]
pub async fn get_sessions(
    State(state): State<SharedState>,
    Query(query): Query<SessionsQuery>,
) -> ApiResult<Json<SessionsResponse>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);

    let sessions = state.store.recent_sessions(&state.device, limit).await?;
    let total_stored = state.store.session_count(&state.device).await?;

    Ok(Json(SessionsResponse {
        sessions: sessions.iter().map(SessionEntry::from).collect(),
        total_stored,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_server;
    use blemonitor_core::MockGattAdapter;

    #[tokio::test]
    async fn test_status_starts_empty() {
        let (server, _state, _dir) = test_server(MockGattAdapter::new()).await;

        let body: StatusResponse = server.get("/api/status").await.json();
        assert_eq!(body.current, Status::None);
        assert_eq!(body.total_ms, 0);
        assert_eq!(body.utilization_percent, 0);
        assert_eq!(body.statuses.len(), 4);
        assert_eq!(body.device_address, "AA:BB:CC:DD:EE:FF");
    }

    #[tokio::test]
    async fn test_status_reflects_recorded_frames() {
        let (server, state, _dir) = test_server(MockGattAdapter::new()).await;
        state.monitor.record_status(Status::Danger).await;

        let body: StatusResponse = server.get("/api/status").await.json();
        assert_eq!(body.current, Status::Danger);
    }

    #[tokio::test]
    async fn test_sessions_after_flush() {
        let (server, state, _dir) = test_server(MockGattAdapter::new()).await;
        state.monitor.record_status(Status::Idle).await;
        state.monitor.record_status(Status::Warning).await;
        state.monitor.pause().await;

        let body: SessionsResponse = server
            .get("/api/status/sessions")
            .add_query_param("limit", 1)
            .await
            .json();
        assert_eq!(body.total_stored, 2);
        assert_eq!(body.sessions.len(), 1);
    }
}
