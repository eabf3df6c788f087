use utoipa::OpenApi;
use crate::modules::health::dto::HealthResponse;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::modules::health::handler::health,
    ),
    components(
        schemas(HealthResponse)
    ),
    tags(
        (name = "Health", description = "Transcoding worker status")
    )
)]
pub struct ApiDoc;
