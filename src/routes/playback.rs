//! Admin playback command entry points into the playback controller.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::post,
};
use validator::Validate;

use crate::{
    dto::playback::VolumeRequest,
    error::AppError,
    services::playback,
    state::SharedState,
};

/// Routes handling admin playback commands.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/playback/next", post(play_next))
        .route("/playback/play/{song_id}", post(play_song))
        .route("/playback/pause", post(pause_playback))
        .route("/playback/resume", post(resume_playback))
        .route("/playback/stop", post(stop_playback))
        .route("/playback/volume", post(set_volume))
}

#[utoipa::path(
    post,
    path = "/playback/next",
    tag = "playback",
    responses((status = 204, description = "Playing the locked slot or the live top"))
)]
/// Play the next song immediately (locked slot wins over the live top).
pub async fn play_next(State(state): State<SharedState>) -> StatusCode {
    playback::play_top_now(&state).await;
    StatusCode::NO_CONTENT
}

#[utoipa::path(
    post,
    path = "/playback/play/{song_id}",
    tag = "playback",
    params(("song_id" = i64, Path, description = "Song to play")),
    responses(
        (status = 204, description = "Playing the requested song"),
        (status = 404, description = "Unknown song"),
        (status = 409, description = "Song already broadcast")
    )
)]
/// Play one explicit song immediately.
pub async fn play_song(
    State(state): State<SharedState>,
    Path(song_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    playback::play_specific(&state, song_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/playback/pause",
    tag = "playback",
    responses((status = 204, description = "Playback paused"))
)]
/// Pause the broadcast.
pub async fn pause_playback(State(state): State<SharedState>) -> StatusCode {
    playback::pause(&state).await;
    StatusCode::NO_CONTENT
}

#[utoipa::path(
    post,
    path = "/playback/resume",
    tag = "playback",
    responses((status = 204, description = "Playback resumed"))
)]
/// Resume the broadcast.
pub async fn resume_playback(State(state): State<SharedState>) -> StatusCode {
    playback::resume(&state).await;
    StatusCode::NO_CONTENT
}

#[utoipa::path(
    post,
    path = "/playback/stop",
    tag = "playback",
    responses((status = 204, description = "Playback stopped"))
)]
/// Stop the broadcast and clear playing state.
pub async fn stop_playback(State(state): State<SharedState>) -> StatusCode {
    playback::stop(&state).await;
    StatusCode::NO_CONTENT
}

#[utoipa::path(
    post,
    path = "/playback/volume",
    tag = "playback",
    request_body = VolumeRequest,
    responses(
        (status = 204, description = "Volume changed"),
        (status = 400, description = "Volume out of range")
    )
)]
/// Change the broadcast volume.
pub async fn set_volume(
    State(state): State<SharedState>,
    Json(payload): Json<VolumeRequest>,
) -> Result<StatusCode, AppError> {
    payload
        .validate()
        .map_err(|errors| AppError::BadRequest(errors.to_string()))?;
    playback::set_volume(&state, payload.volume).await;
    Ok(StatusCode::NO_CONTENT)
}
