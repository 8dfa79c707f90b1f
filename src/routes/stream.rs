//! Audio streaming endpoints consumed by listener audio elements.

use axum::{
    Router,
    extract::{Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::warn;

use crate::dao::store::SongStore;
use crate::services::library::resolve_within;
use crate::services::resolver;
use crate::state::SharedState;

/// Routes serving audio: extractor redirects and local files.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/stream/{song_id}", get(stream_song))
        .route("/stream-offline/{filename}", get(stream_offline))
        .route("/announcements/{filename}", get(announcement_audio))
}

#[utoipa::path(
    get,
    path = "/stream/{song_id}",
    tag = "stream",
    params(("song_id" = i64, Path, description = "Song to stream")),
    responses(
        (status = 302, description = "Redirect to the direct audio URL, or to an offline fallback"),
        (status = 404, description = "Unknown song and empty library")
    )
)]
/// Resolve a song's stream URL (cache-first) and redirect the client to it.
/// On extractor failure the broadcast stays alive via a random library track.
pub async fn stream_song(State(state): State<SharedState>, Path(song_id): Path<i64>) -> Response {
    let song = match state.songs().find_song(song_id).await {
        Ok(Some(song)) => Some(song),
        Ok(None) => None,
        Err(err) => {
            warn!(song_id, error = %err, "song store unavailable");
            None
        }
    };

    if let Some(song) = song {
        match resolver::resolve_cached(state.url_cache(), state.resolver(), &song.url).await {
            Ok(url) => return Redirect::temporary(&url).into_response(),
            Err(err) => {
                warn!(song_id, error = %err, "stream resolution failed; falling back to library");
            }
        }
    }

    match state.library().random_track() {
        Some(track) => {
            Redirect::temporary(&format!("/stream-offline/{}", track.filename)).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/stream-offline/{filename}",
    tag = "stream",
    params(("filename" = String, Path, description = "Library file name")),
    responses(
        (status = 200, description = "Local library audio with byte-range support"),
        (status = 404, description = "Not a library file")
    )
)]
/// Serve a local library file. The resolved path must stay inside the
/// library directory.
pub async fn stream_offline(
    State(state): State<SharedState>,
    Path(filename): Path<String>,
    request: Request,
) -> Response {
    match state.library().resolve(&filename) {
        Some(path) => serve_file(path, request).await,
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/announcements/{filename}",
    tag = "stream",
    params(("filename" = String, Path, description = "Cached announcement file name")),
    responses(
        (status = 200, description = "Synthesized announcement audio"),
        (status = 404, description = "Not a cached announcement")
    )
)]
/// Serve synthesized announcement audio from the TTS cache directory.
pub async fn announcement_audio(
    State(state): State<SharedState>,
    Path(filename): Path<String>,
    request: Request,
) -> Response {
    match resolve_within(&state.config().announcement_cache_dir(), &filename) {
        Some(path) => serve_file(path, request).await,
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn serve_file(path: std::path::PathBuf, request: Request) -> Response {
    match ServeFile::new(path).oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(err) => {
            warn!(error = %err, "failed to serve local file");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
