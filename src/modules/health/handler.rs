use super::dto::HealthResponse;
use crate::state::AppState;
use axum::{extract::State, Json};

/// Worker liveness and the job it is working on
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Worker is up", body = HealthResponse)
    ),
    tag = "Health"
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        current_job: state.scheduler.current_job(),
        is_shutting_down: state.scheduler.is_shutting_down(),
    })
}
