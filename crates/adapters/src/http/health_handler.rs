use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use super::error::{ApiError, ErrorBody};
use super::state::AppState;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
}

/// `GET /healthz` — process liveness.
#[utoipa::path(
    get, path = "/healthz",
    tag = "Health",
    responses((status = 200, description = "Process is alive", body = HealthResponse))
)]
pub async fn healthz(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: state.version,
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// `GET /readyz` — readiness: the engine must answer a ping.
#[utoipa::path(
    get, path = "/readyz",
    tag = "Health",
    responses(
        (status = 200, description = "Engine reachable", body = HealthResponse),
        (status = 503, description = "Engine unreachable", body = ErrorBody),
    )
)]
pub async fn readyz(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, ApiError> {
    state
        .engine
        .ping()
        .await
        .map_err(|e| ApiError::ServiceUnavailable {
            message: format!("engine unreachable: {e}"),
        })?;
    Ok(Json(HealthResponse {
        status: "ready",
        version: state.version,
        uptime_secs: state.start_time.elapsed().as_secs(),
    }))
}
