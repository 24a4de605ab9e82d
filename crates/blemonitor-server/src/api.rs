//! HTTP API routes and handlers.
//!
//! - `health` - service health
//! - `status` - status statistics and stored sessions
//! - `connection` - sensor link control
//! - `thresholds` - alarm threshold editing
//! - `error` - API error type
//! - `openapi` - OpenAPI document

use axum::routing::get;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::SharedState;

pub mod connection;
pub mod error;
pub mod health;
pub mod openapi;
pub mod status;
pub mod thresholds;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Creates the full router.
///
/// ```text
/// /health                     - Health check
/// /api
/// ├── /status                 - Status snapshot and stored sessions
/// ├── /connection             - Link state, connect, disconnect, dual mode
/// ├── /thresholds             - Threshold read, drag and set
/// └── /openapi.json           - OpenAPI document
/// /swagger-ui                 - Interactive API docs
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .route("/openapi.json", get(openapi::get_openapi_spec))
                .nest("/status", status::router())
                .nest("/connection", connection::router())
                .nest("/thresholds", thresholds::router()),
        )
        .with_state(state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}
