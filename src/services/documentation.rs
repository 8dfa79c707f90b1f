use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the Wavecast backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::websocket::ws_handler,
        crate::routes::schedules::list_schedules,
        crate::routes::schedules::create_schedule,
        crate::routes::schedules::update_schedule,
        crate::routes::schedules::delete_schedule,
        crate::routes::schedules::reload_schedules,
        crate::routes::playback::play_next,
        crate::routes::playback::play_song,
        crate::routes::playback::pause_playback,
        crate::routes::playback::resume_playback,
        crate::routes::playback::stop_playback,
        crate::routes::playback::set_volume,
        crate::routes::songs::recently_played,
        crate::routes::stream::stream_song,
        crate::routes::stream::stream_offline,
        crate::routes::stream::announcement_audio,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::schedule::ScheduleRequest,
            crate::dto::schedule::ScheduleSummary,
            crate::dto::playback::VolumeRequest,
            crate::dto::ws::ClientMessage,
            crate::dto::ws::ServerMessage,
            crate::dto::ws::SongDescriptor,
            crate::dto::ws::PlaySongPayload,
            crate::dto::ws::PlayAnnouncementPayload,
            crate::dto::ws::NextSongLockedPayload,
            crate::dto::ws::SongStartedPayload,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "schedules", description = "Broadcast schedule administration"),
        (name = "playback", description = "Admin playback commands"),
        (name = "songs", description = "Read-only song views"),
        (name = "stream", description = "Audio streaming endpoints"),
        (name = "ws", description = "Listener/admin WebSocket")
    )
)]
pub struct ApiDoc;
