use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;
use tracing::{debug, error};

use crate::app::AppState;
use crate::models::{ErrorResponse, HealthResponse, StatsResponse};

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    debug!("Health check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Server is running".to_string(),
    })
}

/// Readiness check endpoint. Ready once the document store answers.
pub async fn ready_check(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HealthResponse>, (StatusCode, Json<ErrorResponse>)> {
    debug!("Readiness check requested");
    match state.relay.documents().ping().await {
        Ok(()) => Ok(Json(HealthResponse {
            status: "ok".to_string(),
            message: "Service is ready".to_string(),
        })),
        Err(e) => {
            error!("Readiness check failed: {}", e);
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse {
                    code: StatusCode::SERVICE_UNAVAILABLE.as_u16(),
                    status: "error".to_string(),
                    error: e.to_string(),
                }),
            ))
        }
    }
}

/// Room and session counts
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let rooms = state.relay.rooms();
    Json(StatsResponse {
        active_rooms: rooms.room_count().await,
        active_sessions: rooms.session_count().await,
    })
}
