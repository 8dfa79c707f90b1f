use chrono::NaiveDateTime;

/// Health check data structures.
pub mod health;
/// Admin playback command payloads.
pub mod playback;
/// Schedule CRUD data structures.
pub mod schedule;
/// Request validation utilities.
pub mod validation;
/// WebSocket message data structures.
pub mod ws;

/// Formats a local wall-clock timestamp for DTO fields.
fn format_local_timestamp(time: NaiveDateTime) -> String {
    time.format("%Y-%m-%dT%H:%M:%S").to_string()
}
