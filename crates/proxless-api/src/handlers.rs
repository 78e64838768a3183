//! REST API handlers.
//!
//! Reads go straight to the route index; writes go through its
//! `RouteSink` semantics (validation, ownership checks).

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use proxless_core::RouteSpec;
use proxless_state::{StateError, UpsertOutcome};
use tracing::{info, warn};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn state_error_response(err: &StateError) -> axum::response::Response {
    let status = match err {
        StateError::Validation(_) => StatusCode::BAD_REQUEST,
        StateError::OwnershipConflict { .. } => StatusCode::CONFLICT,
        StateError::NotFound(_) => StatusCode::NOT_FOUND,
    };
    error_response(&err.to_string(), status).into_response()
}

/// GET /healthz
pub async fn healthz() -> &'static str {
    "ok"
}

// ── Routes ─────────────────────────────────────────────────────

/// GET /api/v1/routes
pub async fn list_routes(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.index.list())
}

/// GET /api/v1/routes/{id}
pub async fn get_route(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.index.get_by_id(&id) {
        Ok(route) => ApiResponse::ok(route).into_response(),
        Err(e) => state_error_response(&e),
    }
}

/// PUT /api/v1/routes/{id}
///
/// The path id overrides any id in the body.
pub async fn put_route(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(mut spec): Json<RouteSpec>,
) -> impl IntoResponse {
    spec.id = id.clone();
    let outcome = match state.index.upsert(spec) {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(route_id = %id, error = %e, "route rejected");
            return state_error_response(&e);
        }
    };

    match state.index.get_by_id(&id) {
        Ok(route) => {
            info!(route_id = %id, ?outcome, "route stored via API");
            let status = match outcome {
                UpsertOutcome::Created => StatusCode::CREATED,
                UpsertOutcome::Updated => StatusCode::OK,
            };
            (status, ApiResponse::ok(route)).into_response()
        }
        // Deleted concurrently.
        Err(e) => state_error_response(&e),
    }
}

/// DELETE /api/v1/routes/{id}
pub async fn delete_route(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.index.delete(&id) {
        Ok(_) => {
            info!(route_id = %id, "route deleted via API");
            ApiResponse::ok("deleted").into_response()
        }
        Err(e) => state_error_response(&e),
    }
}
