/// DJ announcement scripts, TTS boundary, and the audio cache.
pub mod announcer;
/// OpenAPI documentation generation.
pub mod documentation;
/// Offline fallback music library.
pub mod library;
/// Playback controller: scheduled firings, admin commands, auto-next.
pub mod playback;
/// Pre-fetch pipeline preparing locked slots.
pub mod prefetch;
/// Stream URL extraction and the TTL cache.
pub mod resolver;
/// Cron job registration and timers.
pub mod scheduler;
/// WebSocket connection and message handling service.
pub mod websocket_service;
