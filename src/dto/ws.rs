//! The typed WebSocket wire protocol.
//!
//! One internally-tagged enum per direction; tags are kebab-case event names.
//! Unknown inbound tags collapse onto [`ClientMessage::Unknown`] so a
//! misbehaving client cannot break the read loop.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::dao::models::SongEntity;

/// Compact song descriptor carried by playback events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SongDescriptor {
    /// Song store id; absent for offline library tracks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub title: String,
    pub artist: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedication: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_offline: bool,
}

impl From<&SongEntity> for SongDescriptor {
    fn from(song: &SongEntity) -> Self {
        Self {
            id: Some(song.id),
            title: song.title.clone(),
            artist: song.artist.clone(),
            duration_seconds: song.duration_seconds,
            thumbnail_url: song.thumbnail_url.clone(),
            dedication: song.dedication.clone(),
            is_offline: false,
        }
    }
}

/// Payload of the `play-song` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PlaySongPayload {
    pub song: SongDescriptor,
    pub stream_url: String,
    pub volume: u8,
    /// Whether more burst songs follow this one.
    pub auto_next: bool,
    /// Set on replays to a reconnecting admin so the client resumes rather
    /// than restarting.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_reconnect: bool,
    /// Last reported position, only present on reconnect replays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<f64>,
}

/// Payload of the `play-announcement` event: a `play-song` plus the spoken
/// introduction. Clients fall back to speech synthesis when no audio URL is
/// present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PlayAnnouncementPayload {
    #[serde(flatten)]
    pub play: PlaySongPayload,
    pub announcement_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub announcement_audio_url: Option<String>,
}

/// Payload of the `next-song-locked` notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NextSongLockedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub song: Option<SongDescriptor>,
    /// Local `HH:MM` of the schedule firing the slot is locked for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_time: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub has_announcement: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_offline: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub download_failed: bool,
}

/// Events pushed from the server to connected clients.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    PlaySong(PlaySongPayload),
    PlayAnnouncement(PlayAnnouncementPayload),
    QueueUpdated,
    RecentlyPlayedUpdated,
    PlaybackPaused,
    PlaybackResumed,
    VolumeChanged {
        volume: u8,
    },
    PlaybackStopped,
    SongEnded,
    NextSongLocked(NextSongLockedPayload),
    SongPlayingUpdate {
        song: SongDescriptor,
    },
    CurrentSong {
        song: Option<SongDescriptor>,
    },
    AdminActive,
    AdminRejected {
        song_playing: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        current_song: Option<SongDescriptor>,
    },
    TakeoverWarning {
        #[serde(skip_serializing_if = "Option::is_none")]
        current_song: Option<SongDescriptor>,
    },
    ForceDisconnect,
}

/// The broadcaster's echo of the play event it started rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SongStartedPayload {
    pub song: SongDescriptor,
    pub stream_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub announcement_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub announcement_url: Option<String>,
    pub volume: u8,
    pub auto_next: bool,
}

/// Stage of an individual airing as reported by the broadcaster client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStage {
    Announcement,
    Music,
}

/// Messages accepted from WebSocket clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Request to become the broadcaster. Identity fields are filled by the
    /// session layer in front of the core.
    JoinAdminRoom {
        #[serde(default)]
        takeover: bool,
        user_id: String,
        session_id: String,
    },
    SongStarted(SongStartedPayload),
    SongEndedNotify,
    PlaybackStopped,
    GetCurrentSong,
    GetPlaybackState,
    PlaybackStateUpdate {
        stage: PlaybackStage,
        #[serde(default)]
        position: f64,
    },
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Parse a raw text frame into a typed message.
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> SongDescriptor {
        SongDescriptor {
            id: Some(42),
            title: "Take Five".into(),
            artist: "Dave Brubeck".into(),
            duration_seconds: Some(324),
            thumbnail_url: None,
            dedication: None,
            is_offline: false,
        }
    }

    #[test]
    fn play_song_serialises_with_kebab_tag() {
        let message = ServerMessage::PlaySong(PlaySongPayload {
            song: descriptor(),
            stream_url: "https://cdn.example/a.m4a".into(),
            volume: 70,
            auto_next: false,
            is_reconnect: false,
            position: None,
        });

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "play-song");
        assert_eq!(value["song"]["title"], "Take Five");
        assert_eq!(value["volume"], 70);
        assert_eq!(value["auto_next"], false);
        assert!(value.get("is_reconnect").is_none(), "false flag is omitted");
    }

    #[test]
    fn play_announcement_flattens_the_play_payload() {
        let message = ServerMessage::PlayAnnouncement(PlayAnnouncementPayload {
            play: PlaySongPayload {
                song: descriptor(),
                stream_url: "https://cdn.example/a.m4a".into(),
                volume: 55,
                auto_next: true,
                is_reconnect: false,
                position: None,
            },
            announcement_text: "This one goes out to Sam".into(),
            announcement_audio_url: Some("/announcements/42-abc.mp3".into()),
        });

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "play-announcement");
        assert_eq!(value["stream_url"], "https://cdn.example/a.m4a");
        assert_eq!(value["announcement_text"], "This one goes out to Sam");
    }

    #[test]
    fn unit_events_carry_only_the_tag() {
        let value = serde_json::to_value(ServerMessage::QueueUpdated).unwrap();
        assert_eq!(value, serde_json::json!({"type": "queue-updated"}));

        let value = serde_json::to_value(ServerMessage::SongEnded).unwrap();
        assert_eq!(value, serde_json::json!({"type": "song-ended"}));
    }

    #[test]
    fn locked_notice_marks_offline_failures() {
        let message = ServerMessage::NextSongLocked(NextSongLockedPayload {
            song: None,
            schedule_time: Some("17:00".into()),
            has_announcement: false,
            is_offline: true,
            download_failed: true,
        });

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "next-song-locked");
        assert_eq!(value["is_offline"], true);
        assert_eq!(value["download_failed"], true);
        assert!(value.get("song").is_none());
    }

    #[test]
    fn join_admin_room_defaults_takeover_to_false() {
        let message = ClientMessage::from_json_str(
            r#"{"type": "join-admin-room", "user_id": "u1", "session_id": "s1"}"#,
        )
        .unwrap();
        assert_eq!(
            message,
            ClientMessage::JoinAdminRoom {
                takeover: false,
                user_id: "u1".into(),
                session_id: "s1".into(),
            }
        );
    }

    #[test]
    fn unknown_client_messages_fold_into_unknown() {
        let message =
            ClientMessage::from_json_str(r#"{"type": "frobnicate", "anything": 1}"#).unwrap();
        assert_eq!(message, ClientMessage::Unknown);
    }

    #[test]
    fn song_ended_notify_round_trips() {
        let message = ClientMessage::from_json_str(r#"{"type": "song-ended-notify"}"#).unwrap();
        assert_eq!(message, ClientMessage::SongEndedNotify);
    }

    #[test]
    fn playback_state_update_parses_stage() {
        let message = ClientMessage::from_json_str(
            r#"{"type": "playback-state-update", "stage": "music", "position": 41.2}"#,
        )
        .unwrap();
        assert_eq!(
            message,
            ClientMessage::PlaybackStateUpdate {
                stage: PlaybackStage::Music,
                position: 41.2,
            }
        );
    }
}
