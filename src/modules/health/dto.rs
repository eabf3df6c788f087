use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    /// Job being processed right now, if any.
    pub current_job: Option<Uuid>,
    pub is_shutting_down: bool,
}
