//! Alarm threshold endpoints.
//!
//! The three boundaries split sensor readings into Idle, Normal Cutting,
//! Warning and Danger. Edits are clamped rather than rejected so the
//! boundaries always stay at least `min_gap` apart inside `0..=max_value`.
//! A committed edit is saved and sent to the sensor as
//! `"FFFF-AAAA-BBBB-CCCC;"`.

use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use blemonitor_core::{ThresholdCommit, ThresholdEditor, MAX_VALUE, MIN_GAP};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Creates the thresholds router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_thresholds))
        .route("/drag", post(drag_threshold))
        .route("/{index}", put(set_threshold))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Current thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "values": [100, 750, 1500],
    "min_gap": 50,
    "max_value": 1800,
    "feature_index": 0,
    "command": "0000-0100-0750-1500;"
}))]
pub struct ThresholdsResponse {
    /// Boundaries in ascending order.
    pub values: Vec<u16>,

    /// Minimum distance between neighbouring boundaries.
    pub min_gap: u16,

    /// Largest value the top boundary may take.
    pub max_value: u16,

    /// Feature index sent with the command.
    pub feature_index: u16,

    /// Command the sensor receives for these values.
    pub command: String,
}

impl From<&ThresholdEditor> for ThresholdsResponse {
    fn from(editor: &ThresholdEditor) -> Self {
        let set = editor.thresholds();
        Self {
            values: set.values().to_vec(),
            min_gap: MIN_GAP,
            max_value: MAX_VALUE,
            feature_index: editor.feature_index(),
            command: set.encode(editor.feature_index()),
        }
    }
}

/// Relative move of one boundary.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "index": 1, "delta": -25, "commit": true }))]
pub struct DragRequest {
    /// Boundary index, 0..=2.
    pub index: usize,

    /// Signed change in reading units.
    pub delta: i32,

    /// Save and send the result. Send `false` while a drag is in progress
    /// and `true` on release.
    #[serde(default = "default_commit")]
    pub commit: bool,
}

const fn default_commit() -> bool {
    true
}

/// Absolute placement of one boundary.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "value": 900 }))]
pub struct SetThresholdRequest {
    /// Requested value; neighbours are pushed to keep the minimum gap.
    pub value: u16,
}

/// Result of an edit.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ThresholdUpdateResponse {
    /// Thresholds after the edit.
    pub thresholds: ThresholdsResponse,

    /// Outcome of the commit, absent when the edit was not committed.
    pub commit: Option<ThresholdCommit>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the thresholds.
#[utoipa::path(
    get,
    path = "/api/thresholds",
    tag = "thresholds",
    operation_id = "getThresholds",
    summary = "Get alarm thresholds",
    responses(
        (status = 200, description = "Current thresholds", body = ThresholdsResponse)
    )
)]
pub async fn get_thresholds(State(state): State<SharedState>) -> Json<ThresholdsResponse> {
    Json(ThresholdsResponse::from(&*state.thresholds.read().await))
}

/// Move a boundary by a delta.
#[utoipa::path(
    post,
    path = "/api/thresholds/drag",
    tag = "thresholds",
    operation_id = "dragThreshold",
    summary = "Move a threshold by a delta",
    description = "Moves one boundary, clamped between its neighbours with the minimum \
        gap kept. With `commit` the result is saved and sent to the sensor; a failed save \
        or send is reported in `commit` rather than as an error.",
    request_body = DragRequest,
    responses(
        (status = 200, description = "Threshold moved", body = ThresholdUpdateResponse),
        (status = 400, description = "Index out of range", body = ErrorResponse)
    )
)]
pub async fn drag_threshold(
    State(state): State<SharedState>,
    Json(request): Json<DragRequest>,
) -> ApiResult<Json<ThresholdUpdateResponse>> {
    let mut editor = state.thresholds.write().await;
    editor.drag(request.index, request.delta)?;

    let commit = if request.commit {
        Some(editor.finish(&state.store, &state.connection).await)
    } else {
        None
    };

    Ok(Json(ThresholdUpdateResponse {
        thresholds: ThresholdsResponse::from(&*editor),
        commit,
    }))
}

/// Place a boundary at a value.
#[utoipa::path(
    put,
    path = "/api/thresholds/{index}",
    tag = "thresholds",
    operation_id = "setThreshold",
    summary = "Set a threshold",
    description = "Places one boundary at the given value, pushing neighbours outwards \
        to keep the minimum gap, then saves and sends the result.",
    params(
        ("index" = usize, Path, description = "Boundary index, 0..=2")
    ),
    request_body = SetThresholdRequest,
    responses(
        (status = 200, description = "Threshold set", body = ThresholdUpdateResponse),
        (status = 400, description = "Index out of range", body = ErrorResponse)
    )
)]
pub async fn set_threshold(
    State(state): State<SharedState>,
    Path(index): Path<usize>,
    Json(request): Json<SetThresholdRequest>,
) -> ApiResult<Json<ThresholdUpdateResponse>> {
    let mut editor = state.thresholds.write().await;
    editor.set(index, request.value)?;
    let commit = editor.finish(&state.store, &state.connection).await;

    Ok(Json(ThresholdUpdateResponse {
        thresholds: ThresholdsResponse::from(&*editor),
        commit: Some(commit),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_server;
    use axum::http::StatusCode;
    use blemonitor_core::{MockCall, MockGattAdapter, PersistenceGateway, NORDIC_UART_RX};
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_defaults() {
        let (server, _state, _dir) = test_server(MockGattAdapter::new()).await;

        let body: ThresholdsResponse = server.get("/api/thresholds").await.json();
        assert_eq!(body.values, vec![100, 750, 1500]);
        assert_eq!(body.command, "0000-0100-0750-1500;");
    }

    #[tokio::test]
    async fn test_drag_without_commit_is_not_saved() {
        let (server, state, _dir) = test_server(MockGattAdapter::new()).await;

        let body: ThresholdUpdateResponse = server
            .post("/api/thresholds/drag")
            .json(&json!({ "index": 1, "delta": 100, "commit": false }))
            .await
            .json();
        assert_eq!(body.thresholds.values, vec![100, 850, 1500]);
        assert!(body.commit.is_none());
        assert_eq!(state.store.load_threshold(2).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_drag_is_clamped() {
        let (server, _state, _dir) = test_server(MockGattAdapter::new()).await;

        let body: ThresholdUpdateResponse = server
            .post("/api/thresholds/drag")
            .json(&json!({ "index": 0, "delta": 5000 }))
            .await
            .json();
        assert_eq!(body.thresholds.values, vec![700, 750, 1500]);
    }

    #[tokio::test]
    async fn test_set_persists_without_link() {
        let (server, state, _dir) = test_server(MockGattAdapter::new()).await;

        let body: ThresholdUpdateResponse = server
            .put("/api/thresholds/2")
            .json(&json!({ "value": 760 }))
            .await
            .json();
        assert_eq!(body.thresholds.values, vec![100, 710, 760]);

        let commit = body.commit.unwrap();
        assert!(commit.persisted);
        assert!(!commit.pushed);
        assert_eq!(state.store.load_threshold(2).await.unwrap(), Some(710));
        assert_eq!(state.store.load_threshold(3).await.unwrap(), Some(760));
    }

    #[tokio::test]
    async fn test_commit_reaches_connected_sensor() {
        let adapter = MockGattAdapter::responsive();
        let (server, state, _dir) = test_server(adapter.clone()).await;
        tokio_test::assert_ok!(state.connect_configured().await);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let body: ThresholdUpdateResponse = server
            .put("/api/thresholds/1")
            .json(&json!({ "value": 900 }))
            .await
            .json();
        assert!(body.commit.unwrap().pushed);

        let writes = adapter
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                MockCall::Write {
                    characteristic,
                    payload,
                } if characteristic == NORDIC_UART_RX => Some(payload),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(writes, vec![b"0000-0100-0900-1500;".to_vec()]);
    }

    #[tokio::test]
    async fn test_index_out_of_range() {
        let (server, _state, _dir) = test_server(MockGattAdapter::new()).await;

        let response = server
            .put("/api/thresholds/3")
            .json(&json!({ "value": 900 }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }
}
