//! Read-only song views consumed alongside the `recently-played-updated`
//! signal.

use axum::{Json, Router, extract::State, routing::get};

use crate::{
    dao::store::SongStore, dto::ws::SongDescriptor, error::AppError, state::SharedState,
};

/// How many aired songs the recently-played view returns.
const RECENTLY_PLAYED_LIMIT: usize = 10;

/// Routes serving read-only song projections.
pub fn router() -> Router<SharedState> {
    Router::new().route("/recently-played", get(recently_played))
}

#[utoipa::path(
    get,
    path = "/recently-played",
    tag = "songs",
    responses((status = 200, description = "Most recently aired songs, newest first", body = [SongDescriptor]))
)]
/// List the most recently aired songs.
pub async fn recently_played(
    State(state): State<SharedState>,
) -> Result<Json<Vec<SongDescriptor>>, AppError> {
    let songs = state.songs().recently_played(RECENTLY_PLAYED_LIMIT).await?;
    Ok(Json(songs.iter().map(SongDescriptor::from).collect()))
}
