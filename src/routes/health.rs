use axum::{Json, Router, extract::State, routing::get};
use tracing::warn;

use crate::{dao::store::PlaybackStore, dto::health::HealthResponse, state::SharedState};

#[utoipa::path(
    get,
    path = "/healthcheck",
    tag = "health",
    responses((status = 200, description = "Service is healthy", body = HealthResponse))
)]
/// Return the current health status of the backend and ping the stores.
pub async fn healthcheck(State(state): State<SharedState>) -> Json<HealthResponse> {
    match state.playback_store().get_current().await {
        Ok(_) => Json(HealthResponse::ok()),
        Err(err) => {
            warn!(error = %err, "storage health check failed");
            Json(HealthResponse::degraded())
        }
    }
}

/// Configure the health routes subtree.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/healthcheck", get(healthcheck))
}
