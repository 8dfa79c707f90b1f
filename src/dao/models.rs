use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A queue entry as held by the external song store.
///
/// `played` means "has been broadcast" and implies `played_at` is set.
/// `reserved` is the temporary pre-fetch lock that hides a song from the
/// voting queue without counting it as aired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongEntity {
    pub id: i64,
    pub title: String,
    pub artist: String,
    /// External video platform URL as submitted (may carry playlist params).
    pub url: String,
    /// External platform video identifier.
    pub video_id: String,
    #[serde(default)]
    pub duration_seconds: Option<u32>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    /// Optional dedication text read out by the DJ announcement.
    #[serde(default)]
    pub dedication: Option<String>,
    #[serde(default)]
    pub starred: bool,
    #[serde(default)]
    pub vote_count: u32,
    pub added_at: NaiveDateTime,
    #[serde(default)]
    pub played: bool,
    #[serde(default)]
    pub played_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub reserved: bool,
}

/// A recurring broadcast slot created through the admin CRUD surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntity {
    pub id: Uuid,
    pub name: String,
    /// Five-field cron expression, validated at the CRUD boundary.
    pub cron: String,
    pub volume: u8,
    /// Number of songs aired per firing (burst length), 1-10.
    pub song_count: u8,
    pub active: bool,
    pub last_run: Option<NaiveDateTime>,
    pub next_run: Option<NaiveDateTime>,
}

/// The persisted playback singleton. Exactly one row exists; reads go through
/// the store's find-or-create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackStateEntity {
    pub current_song_id: Option<i64>,
    pub playing: bool,
    pub volume: u8,
    pub position_seconds: f64,
}

impl Default for PlaybackStateEntity {
    fn default() -> Self {
        Self {
            current_song_id: None,
            playing: false,
            volume: 70,
            position_seconds: 0.0,
        }
    }
}

/// Listener chat message; the core only ever deletes old rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessageEntity {
    pub id: i64,
    pub author: String,
    pub body: String,
    pub sent_at: NaiveDateTime,
}
