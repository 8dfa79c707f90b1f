//! WebSocket connection lifecycle and inbound message dispatch.
//!
//! Listeners and the broadcaster share one socket endpoint; a
//! `join-admin-room` message upgrades a connection through the arbiter.
//! Admin-intent messages are gated on the active admin connection and
//! silently ignored otherwise.

use axum::extract::ws::{Message, WebSocket};
use chrono::NaiveDateTime;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dao::store::{PlaybackStore, ScheduleStore};
use crate::dto::ws::{
    ClientMessage, NextSongLockedPayload, PlayAnnouncementPayload, PlaySongPayload, PlaybackStage,
    ServerMessage, SongStartedPayload,
};
use crate::services::{playback, prefetch};
use crate::state::{ClaimOutcome, ListenerConnection, SharedState};

/// Handle the full lifecycle for one WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound events flowing in FIFO order even
    // while we await inbound frames.
    let writer_task: JoinHandle<()> = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let connection_id = Uuid::new_v4();
    state.hub().register(ListenerConnection {
        id: connection_id,
        tx: outbound_tx.clone(),
    });
    info!(connection = %connection_id, "listener connected");

    send_snapshot(&state, connection_id).await;

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match ClientMessage::from_json_str(&text) {
                Ok(inbound) => handle_message(&state, connection_id, inbound).await,
                Err(err) => {
                    warn!(connection = %connection_id, error = %err, "failed to parse client message");
                }
            },
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(connection = %connection_id, error = %err, "websocket error");
                break;
            }
        }
    }

    state.hub().unregister(connection_id);
    if state
        .arbiter()
        .on_disconnect(state.clone(), connection_id)
        .await
    {
        info!(connection = %connection_id, "broadcaster disconnected; grace window started");
    } else {
        info!(connection = %connection_id, "listener disconnected");
    }

    drop(outbound_tx);
    let _ = writer_task.await;
}

/// Send the attach snapshot: what is playing and any locked slot, so clients
/// need no separate REST round-trip.
pub(crate) async fn send_snapshot(state: &SharedState, connection_id: Uuid) {
    let song = state.currently_playing().await;
    state
        .hub()
        .send_to(connection_id, &ServerMessage::CurrentSong { song });

    if let Some(locked) = locked_snapshot(state).await {
        state
            .hub()
            .send_to(connection_id, &ServerMessage::NextSongLocked(locked));
    }
}

/// The most recently locked slot, if any.
async fn locked_snapshot(state: &SharedState) -> Option<NextSongLockedPayload> {
    let mut best: Option<(NaiveDateTime, NextSongLockedPayload)> = None;
    for schedule_id in state.slots().schedule_ids() {
        let Some(slot) = state.slots().get(schedule_id) else {
            continue;
        };
        let Ok(Some(schedule)) = state.schedules().find_schedule(schedule_id).await else {
            continue;
        };
        let payload = prefetch::locked_payload(state, &schedule, &slot);
        match &best {
            Some((newest, _)) if *newest >= slot.prepared_at => {}
            _ => best = Some((slot.prepared_at, payload)),
        }
    }
    best.map(|(_, payload)| payload)
}

/// Dispatch one inbound message.
pub(crate) async fn handle_message(
    state: &SharedState,
    connection_id: Uuid,
    message: ClientMessage,
) {
    match message {
        ClientMessage::JoinAdminRoom {
            takeover,
            user_id,
            session_id,
        } => handle_join_admin(state, connection_id, takeover, &user_id, &session_id).await,
        ClientMessage::SongStarted(payload) => {
            if ensure_admin(state, connection_id, "song-started").await {
                handle_song_started(state, payload).await;
            }
        }
        ClientMessage::SongEndedNotify => {
            if ensure_admin(state, connection_id, "song-ended-notify").await {
                playback::on_song_ended(state).await;
            }
        }
        ClientMessage::PlaybackStopped => {
            if ensure_admin(state, connection_id, "playback-stopped").await {
                playback::stop(state).await;
            }
        }
        ClientMessage::GetCurrentSong => {
            let song = state.currently_playing().await;
            state
                .hub()
                .send_to(connection_id, &ServerMessage::CurrentSong { song });
        }
        ClientMessage::GetPlaybackState => {
            if ensure_admin(state, connection_id, "get-playback-state").await {
                handle_get_playback_state(state, connection_id).await;
            }
        }
        ClientMessage::PlaybackStateUpdate { stage, position } => {
            if ensure_admin(state, connection_id, "playback-state-update").await {
                handle_state_update(state, stage, position).await;
            }
        }
        ClientMessage::Unknown => {
            warn!(connection = %connection_id, "ignoring unknown client message");
        }
    }
}

/// Run the arbiter's upgrade protocol and surface its outcome.
async fn handle_join_admin(
    state: &SharedState,
    connection_id: Uuid,
    takeover: bool,
    user_id: &str,
    session_id: &str,
) {
    let current_song = state.currently_playing().await;

    match state
        .arbiter()
        .claim(connection_id, user_id, session_id, takeover)
        .await
    {
        ClaimOutcome::Installed { reattached } => {
            debug!(connection = %connection_id, reattached, "admin connection active");
            state
                .hub()
                .send_to(connection_id, &ServerMessage::AdminActive);
        }
        ClaimOutcome::Rejected => {
            state.hub().send_to(
                connection_id,
                &ServerMessage::AdminRejected {
                    song_playing: current_song.is_some(),
                    current_song,
                },
            );
        }
        ClaimOutcome::Takeover { evicted } => {
            if current_song.is_some() {
                state.hub().send_to(
                    connection_id,
                    &ServerMessage::TakeoverWarning {
                        current_song: current_song.clone(),
                    },
                );
            }
            if let Some(incumbent) = evicted {
                state
                    .hub()
                    .send_to(incumbent, &ServerMessage::ForceDisconnect);
                state.hub().kick(incumbent);
            }
            state
                .hub()
                .send_to(connection_id, &ServerMessage::AdminActive);
        }
    }
}

/// The broadcaster confirmed it started rendering a play event: remember the
/// song, cache the event for reconnects, and nudge listeners. Re-broadcasting
/// the play event itself would loop playback.
async fn handle_song_started(state: &SharedState, payload: SongStartedPayload) {
    state
        .set_currently_playing(Some(payload.song.clone()))
        .await;

    let play = PlaySongPayload {
        song: payload.song.clone(),
        stream_url: payload.stream_url,
        volume: payload.volume,
        auto_next: payload.auto_next,
        is_reconnect: false,
        position: None,
    };
    let message = match payload.announcement_text {
        Some(announcement_text) => ServerMessage::PlayAnnouncement(PlayAnnouncementPayload {
            play,
            announcement_text,
            announcement_audio_url: payload.announcement_url,
        }),
        None => ServerMessage::PlaySong(play),
    };
    state.cache_play_event(message).await;

    state.hub().broadcast(&ServerMessage::SongPlayingUpdate {
        song: payload.song,
    });
}

/// Replay the cached play event to a reconnecting admin, or answer idle.
async fn handle_get_playback_state(state: &SharedState, connection_id: Uuid) {
    let cache = state.cached_play_event().await;
    let persisted = state.playback_store().get_current().await.ok();
    let playing = persisted.as_ref().is_some_and(|playback| playback.playing);
    let fresh = cache.as_ref().is_some_and(|cache| {
        state.clock().now() - cache.cached_at <= playback::cache_replay_window()
    });

    match cache {
        Some(cache) if playing && fresh => {
            let position = persisted.map(|playback| playback.position_seconds);
            let replay = mark_reconnect(cache.message, position);
            state.hub().send_to(connection_id, &replay);
        }
        _ => {
            state
                .hub()
                .send_to(connection_id, &ServerMessage::PlaybackStopped);
        }
    }
}

/// Persist the broadcaster's reported position so a reconnect resumes nearby.
async fn handle_state_update(state: &SharedState, stage: PlaybackStage, position: f64) {
    debug!(?stage, position, "playback state update");
    let Ok(mut playback) = state.playback_store().get_current().await else {
        return;
    };
    playback.position_seconds = position;
    if let Err(err) = state.playback_store().save_playback(playback).await {
        warn!(error = %err, "failed to persist playback position");
    }
}

fn mark_reconnect(message: ServerMessage, position: Option<f64>) -> ServerMessage {
    match message {
        ServerMessage::PlaySong(mut play) => {
            play.is_reconnect = true;
            play.position = position;
            ServerMessage::PlaySong(play)
        }
        ServerMessage::PlayAnnouncement(mut payload) => {
            payload.play.is_reconnect = true;
            payload.play.position = position;
            ServerMessage::PlayAnnouncement(payload)
        }
        other => other,
    }
}

async fn ensure_admin(state: &SharedState, connection_id: Uuid, context: &str) -> bool {
    if state.arbiter().is_active(connection_id).await {
        return true;
    }
    warn!(connection = %connection_id, context, "ignoring admin message from non-admin connection");
    false
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::dao::store::{PlaybackStore, ScheduleStore};
    use crate::dto::ws::SongDescriptor;
    use crate::state::testing::{
        attach_listener, drain, drain_types, make_schedule, make_song, state_for_tests,
    };

    fn started(song_id: i64) -> SongStartedPayload {
        SongStartedPayload {
            song: SongDescriptor {
                id: Some(song_id),
                title: format!("song-{song_id}"),
                artist: "artist".into(),
                duration_seconds: Some(180),
                thumbnail_url: None,
                dedication: None,
                is_offline: false,
            },
            stream_url: "https://cdn.example/stream.m4a".into(),
            announcement_text: None,
            announcement_url: None,
            volume: 70,
            auto_next: false,
        }
    }

    async fn join(state: &crate::state::SharedState, connection: Uuid, user: &str, takeover: bool) {
        handle_message(
            state,
            connection,
            ClientMessage::JoinAdminRoom {
                takeover,
                user_id: user.into(),
                session_id: format!("session-{user}"),
            },
        )
        .await;
    }

    #[tokio::test]
    async fn admin_contention_rejects_then_takes_over() {
        let (state, _store) = state_for_tests();
        let (x, mut rx_x) = attach_listener(&state);
        let (y, mut rx_y) = attach_listener(&state);

        // X becomes broadcaster and starts a song.
        join(&state, x, "alex", false).await;
        assert_eq!(drain_types(&mut rx_x), vec!["admin-active"]);
        handle_message(&state, x, ClientMessage::SongStarted(started(1))).await;
        drain(&mut rx_x);
        drain(&mut rx_y);

        // Y without takeover is rejected with the playing song attached.
        join(&state, y, "bobby", false).await;
        let events = drain(&mut rx_y);
        assert_eq!(events[0]["type"], "admin-rejected");
        assert_eq!(events[0]["song_playing"], true);
        assert_eq!(events[0]["current_song"]["id"], 1);
        assert!(state.arbiter().is_active(x).await);

        // Y with takeover is warned, X is force-disconnected and closed.
        join(&state, y, "bobby", true).await;
        let events = drain(&mut rx_y);
        assert_eq!(events[0]["type"], "takeover-warning");
        assert_eq!(events[0]["current_song"]["id"], 1);
        assert_eq!(events[1]["type"], "admin-active");

        let x_events = drain(&mut rx_x);
        assert_eq!(x_events[0]["type"], "force-disconnect");
        assert!(state.arbiter().is_active(y).await);
        assert!(!state.arbiter().is_active(x).await);
    }

    #[tokio::test]
    async fn song_started_updates_caches_and_nudges_listeners() {
        let (state, _store) = state_for_tests();
        let (admin, mut rx_admin) = attach_listener(&state);
        let (_listener, mut rx_listener) = attach_listener(&state);

        join(&state, admin, "alex", false).await;
        drain(&mut rx_admin);
        drain(&mut rx_listener);

        handle_message(&state, admin, ClientMessage::SongStarted(started(7))).await;

        let events = drain(&mut rx_listener);
        assert_eq!(events.len(), 1, "play-song is not re-broadcast");
        assert_eq!(events[0]["type"], "song-playing-update");
        assert_eq!(events[0]["song"]["id"], 7);

        assert_eq!(state.currently_playing().await.unwrap().id, Some(7));
        assert!(state.cached_play_event().await.is_some());
    }

    #[tokio::test]
    async fn non_admin_messages_are_ignored() {
        let (state, _store) = state_for_tests();
        let (stranger, mut rx_stranger) = attach_listener(&state);
        let (_listener, mut rx_listener) = attach_listener(&state);

        handle_message(&state, stranger, ClientMessage::SongStarted(started(7))).await;
        handle_message(&state, stranger, ClientMessage::SongEndedNotify).await;
        handle_message(&state, stranger, ClientMessage::PlaybackStopped).await;

        assert!(drain(&mut rx_listener).is_empty());
        assert!(drain(&mut rx_stranger).is_empty());
        assert!(state.currently_playing().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn admin_refresh_replays_the_cached_play_event() {
        let (state, store) = state_for_tests();
        let (first, _rx_first) = attach_listener(&state);

        join(&state, first, "alex", false).await;
        handle_message(&state, first, ClientMessage::SongStarted(started(3))).await;
        handle_message(
            &state,
            first,
            ClientMessage::PlaybackStateUpdate {
                stage: PlaybackStage::Music,
                position: 41.5,
            },
        )
        .await;
        // The controller persisted a playing state when the song aired; mimic it.
        let mut playback = store.get_current().await.unwrap();
        playback.playing = true;
        playback.current_song_id = Some(3);
        store.save_playback(playback).await.unwrap();

        // Refresh: disconnect, come back 3 seconds later.
        state.hub().unregister(first);
        state.arbiter().on_disconnect(state.clone(), first).await;
        tokio::time::advance(Duration::from_secs(3)).await;

        let (second, mut rx_second) = attach_listener(&state);
        join(&state, second, "alex", false).await;
        handle_message(&state, second, ClientMessage::GetPlaybackState).await;

        let events = drain(&mut rx_second);
        assert_eq!(events[0]["type"], "admin-active");
        assert_eq!(events[1]["type"], "play-song");
        assert_eq!(events[1]["is_reconnect"], true);
        assert_eq!(events[1]["position"], 41.5);
        assert_eq!(events[1]["song"]["id"], 3);
    }

    #[tokio::test]
    async fn stale_cache_answers_idle() {
        let (state, store) = state_for_tests();
        let (admin, mut rx_admin) = attach_listener(&state);

        join(&state, admin, "alex", false).await;
        handle_message(&state, admin, ClientMessage::SongStarted(started(3))).await;
        let mut playback = store.get_current().await.unwrap();
        playback.playing = true;
        store.save_playback(playback).await.unwrap();
        drain(&mut rx_admin);

        // Eleven minutes later the cache is too old to replay.
        state.clock().advance(chrono::Duration::minutes(11));
        handle_message(&state, admin, ClientMessage::GetPlaybackState).await;

        assert_eq!(drain_types(&mut rx_admin), vec!["playback-stopped"]);
    }

    #[tokio::test]
    async fn snapshot_carries_current_song_and_locked_slot() {
        let (state, store) = state_for_tests();
        store.put_song(make_song(1, 3, false));
        let schedule = make_schedule("0 17 * * 1-5", 70, 1);
        store.insert_schedule(schedule.clone()).await.unwrap();
        crate::services::prefetch::prepare_scheduled_song(state.clone(), schedule.id, 70).await;
        state
            .set_currently_playing(Some(SongDescriptor {
                id: Some(9),
                title: "now".into(),
                artist: "playing".into(),
                duration_seconds: None,
                thumbnail_url: None,
                dedication: None,
                is_offline: false,
            }))
            .await;

        let (fresh, mut rx) = attach_listener(&state);
        send_snapshot(&state, fresh).await;

        let events = drain(&mut rx);
        assert_eq!(events[0]["type"], "current-song");
        assert_eq!(events[0]["song"]["id"], 9);
        assert_eq!(events[1]["type"], "next-song-locked");
        assert_eq!(events[1]["song"]["id"], 1);
    }

    #[tokio::test]
    async fn get_current_song_answers_any_client() {
        let (state, _store) = state_for_tests();
        let (listener, mut rx) = attach_listener(&state);

        handle_message(&state, listener, ClientMessage::GetCurrentSong).await;

        let events = drain(&mut rx);
        assert_eq!(events[0]["type"], "current-song");
        assert!(events[0].get("song").map(|s| s.is_null()).unwrap_or(true));
    }
}
