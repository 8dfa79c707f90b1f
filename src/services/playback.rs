//! Playback controller: the authoritative source of "what plays next".
//!
//! Scheduled firings and admin commands both land here; every operation runs
//! under the command gate so mutations of `last_run`, the burst run state,
//! and the playback singleton are serialized. Failures never escape the
//! public operations; they become events and state.

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cron::CronExpr;
use crate::dao::models::{PlaybackStateEntity, ScheduleEntity};
use crate::dao::store::{PlaybackStore, ScheduleStore, SongStore};
use crate::dto::ws::{
    PlayAnnouncementPayload, PlaySongPayload, ServerMessage, SongDescriptor,
};
use crate::error::ServiceError;
use crate::services::prefetch;
use crate::state::{PendingPrefetch, PreparedSlot, SharedState};

/// A firing arriving within this many minutes of the previous one is skipped
/// (the admin already aired the locked slot via "Next").
const RERUN_GUARD_MINUTES: i64 = 10;
/// A cached play event older than this is not replayed to a reconnecting
/// admin.
const CACHE_REPLAY_MINUTES: i64 = 10;
/// Locked slots count as "imminent" for admin "Next" within the pre-fetch
/// lead, since slots only exist inside it.
const IMMINENT_HORIZON_MINUTES: i64 = 5;

/// Window inside which a cached play event may be replayed to a reconnecting
/// admin.
pub fn cache_replay_window() -> chrono::Duration {
    chrono::Duration::minutes(CACHE_REPLAY_MINUTES)
}

/// Scheduled firing entry point.
pub async fn execute_schedule(state: &SharedState, schedule_id: Uuid, volume: u8, song_count: u8) {
    let _gate = state.command_gate().lock().await;

    let schedule = match state.schedules().find_schedule(schedule_id).await {
        Ok(Some(schedule)) => schedule,
        Ok(None) => {
            warn!(%schedule_id, "firing for unknown schedule ignored");
            return;
        }
        Err(err) => {
            warn!(%schedule_id, error = %err, "schedule lookup failed at firing");
            return;
        }
    };
    if !schedule.active {
        debug!(schedule = %schedule.name, "firing for inactive schedule ignored");
        return;
    }

    let now = state.clock().now();
    if let Some(last_run) = schedule.last_run {
        if now - last_run < chrono::Duration::minutes(RERUN_GUARD_MINUTES) {
            info!(
                schedule = %schedule.name,
                "skipping firing inside the re-run guard window"
            );
            advance_next_run(state, &schedule, now).await;
            return;
        }
    }

    if let Err(err) = state.schedules().set_last_run(schedule_id, now).await {
        warn!(schedule = %schedule.name, error = %err, "failed to persist last_run");
    }

    let remaining = u32::from(song_count.saturating_sub(1));
    reset_run(state).await;
    state.run_state().lock().await.remaining_in_burst = remaining;

    let slot = match state.slots().take(schedule_id) {
        Some(slot) => slot,
        // No slot: minute-wildcard schedule, or one created inside the
        // pre-fetch window. Select live.
        None => prefetch::prepare_burst_song(state, false).await,
    };
    air_slot(state, slot, volume, remaining > 0).await;

    if remaining > 0 {
        spawn_burst_refill(state).await;
    }

    advance_next_run(state, &schedule, now).await;
}

/// Admin "Next": play the locked slot when one is about to fire, otherwise
/// the live top of the queue. Always cancels any running burst.
pub async fn play_top_now(state: &SharedState) {
    let _gate = state.command_gate().lock().await;
    reset_run(state).await;
    let now = state.clock().now();

    if let Some((schedule, slot)) = take_imminent_slot(state, now).await {
        info!(schedule = %schedule.name, "airing locked slot early");
        if let Err(err) = state.schedules().set_last_run(schedule.id, now).await {
            warn!(schedule = %schedule.name, error = %err, "failed to persist last_run");
        }
        air_slot(state, slot, schedule.volume, false).await;
        return;
    }

    // A pre-fetch still in flight loses to the live selection.
    for schedule_id in state.slots().pending_ids() {
        if let Some(song_id) = state.slots().cancel_pending(schedule_id) {
            release_reservation(state, song_id).await;
        }
    }

    let volume = current_volume(state).await;
    let slot = prefetch::prepare_burst_song(state, false).await;
    air_slot(state, slot, volume, false).await;
}

/// Admin command: play one explicit song immediately.
pub async fn play_specific(state: &SharedState, song_id: i64) -> Result<(), ServiceError> {
    let _gate = state.command_gate().lock().await;
    reset_run(state).await;

    let song = state
        .songs()
        .find_song(song_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("song `{song_id}` not found")))?;
    if song.played {
        return Err(ServiceError::InvalidState(format!(
            "song `{song_id}` has already been broadcast"
        )));
    }

    // If a locked slot already holds this song, consume it instead of
    // resolving twice.
    for schedule_id in state.slots().schedule_ids() {
        let holds_song = state
            .slots()
            .get(schedule_id)
            .and_then(|slot| slot.song.as_ref().map(|held| held.id))
            == Some(song_id);
        if holds_song {
            if let Some(slot) = state.slots().take(schedule_id) {
                let volume = current_volume(state).await;
                air_slot(state, slot, volume, false).await;
                return Ok(());
            }
        }
    }

    let reserved = state.songs().reserve(song_id).await?;
    if reserved {
        state.hub().broadcast(&ServerMessage::QueueUpdated);
    }

    let now = state.clock().now();
    let volume = current_volume(state).await;
    let slot =
        match crate::services::resolver::resolve_cached(state.url_cache(), state.resolver(), &song.url)
            .await
        {
            Ok(stream_url) => {
                let announcement = state.announcer().announce(&song).await;
                PreparedSlot::ready(song, stream_url, announcement, now)
            }
            Err(err) => {
                warn!(song_id, error = %err, "explicit play failed to resolve; going offline");
                release_reservation(state, song_id).await;
                PreparedSlot::offline(now)
            }
        };
    air_slot(state, slot, volume, false).await;
    Ok(())
}

/// Admin command: pause playback.
pub async fn pause(state: &SharedState) {
    let _gate = state.command_gate().lock().await;
    let mut playback = current_playback(state).await;
    playback.playing = false;
    persist_playback(state, playback).await;
    state.hub().broadcast(&ServerMessage::PlaybackPaused);
}

/// Admin command: resume playback.
pub async fn resume(state: &SharedState) {
    let _gate = state.command_gate().lock().await;
    let mut playback = current_playback(state).await;
    playback.playing = true;
    persist_playback(state, playback).await;
    state.hub().broadcast(&ServerMessage::PlaybackResumed);
}

/// Admin command: change the broadcast volume. The value is validated at the
/// CRUD boundary.
pub async fn set_volume(state: &SharedState, volume: u8) {
    let _gate = state.command_gate().lock().await;
    let mut playback = current_playback(state).await;
    playback.volume = volume;
    persist_playback(state, playback).await;
    state
        .hub()
        .broadcast(&ServerMessage::VolumeChanged { volume });
}

/// Admin command: stop the broadcast and clear every playing trace.
pub async fn stop(state: &SharedState) {
    let _gate = state.command_gate().lock().await;
    let volume = current_volume(state).await;
    persist_playback(
        state,
        PlaybackStateEntity {
            current_song_id: None,
            playing: false,
            volume,
            position_seconds: 0.0,
        },
    )
    .await;
    state.clear_broadcast_caches().await;
    reset_run(state).await;
    state.hub().broadcast(&ServerMessage::PlaybackStopped);
}

/// The broadcaster reported the current song finished. Chain the burst or
/// close it out.
pub async fn on_song_ended(state: &SharedState) {
    let _gate = state.command_gate().lock().await;

    let (chaining, prepared, auto_next, to_release) = {
        let mut run = state.run_state().lock().await;
        if run.remaining_in_burst == 0 {
            (false, None, false, Vec::new())
        } else {
            run.remaining_in_burst -= 1;
            let prepared = run.next_prepared.take();
            // A refill that has not finished by now loses to a synchronous
            // selection.
            let mut to_release = Vec::new();
            if let Some(pending) = run.pending.take() {
                pending.abort.abort();
                if let Some(song_id) = pending.reserved_song {
                    to_release.push(song_id);
                }
            }
            (true, prepared, run.remaining_in_burst > 0, to_release)
        }
    };

    for song_id in to_release {
        release_reservation(state, song_id).await;
    }

    if !chaining {
        let mut playback = current_playback(state).await;
        playback.playing = false;
        playback.current_song_id = None;
        playback.position_seconds = 0.0;
        persist_playback(state, playback).await;
        state.hub().broadcast(&ServerMessage::SongEnded);
        return;
    }

    let slot = match prepared {
        Some(slot) => slot,
        None => prefetch::prepare_burst_song(state, false).await,
    };

    let volume = current_volume(state).await;
    air_slot(state, slot, volume, auto_next).await;

    if auto_next {
        spawn_burst_refill(state).await;
    }
}

/// Air a prepared slot: mark the song played, persist the playback
/// singleton, and fan the play event out.
async fn air_slot(state: &SharedState, slot: PreparedSlot, volume: u8, auto_next: bool) {
    let now = state.clock().now();

    let (song, stream_url) = match (slot.is_offline_fallback, slot.song, slot.stream_url) {
        (false, Some(song), Some(stream_url)) => (song, stream_url),
        _ => {
            air_offline(state, volume, auto_next).await;
            return;
        }
    };

    if let Err(err) = state.songs().mark_played(song.id, now).await {
        warn!(song_id = song.id, error = %err, "failed to mark song as played");
    }
    persist_playback(
        state,
        PlaybackStateEntity {
            current_song_id: Some(song.id),
            playing: true,
            volume,
            position_seconds: 0.0,
        },
    )
    .await;

    let payload = PlaySongPayload {
        song: SongDescriptor::from(&song),
        stream_url,
        volume,
        auto_next,
        is_reconnect: false,
        position: None,
    };
    let message = match slot.announcement {
        Some(announcement) => ServerMessage::PlayAnnouncement(PlayAnnouncementPayload {
            play: payload,
            announcement_text: announcement.text,
            announcement_audio_url: announcement.audio_url,
        }),
        None => ServerMessage::PlaySong(payload),
    };

    info!(song = %song.title, volume, auto_next, "airing song");
    state.hub().broadcast(&message);
    state.hub().broadcast(&ServerMessage::QueueUpdated);
    state.hub().broadcast(&ServerMessage::RecentlyPlayedUpdated);
}

/// Air a random local library track in place of a failed slot.
async fn air_offline(state: &SharedState, volume: u8, auto_next: bool) {
    let Some(track) = state.library().random_track() else {
        warn!("offline fallback requested but the library is empty; stopping");
        persist_playback(
            state,
            PlaybackStateEntity {
                current_song_id: None,
                playing: false,
                volume,
                position_seconds: 0.0,
            },
        )
        .await;
        state.hub().broadcast(&ServerMessage::PlaybackStopped);
        return;
    };

    persist_playback(
        state,
        PlaybackStateEntity {
            current_song_id: None,
            playing: true,
            volume,
            position_seconds: 0.0,
        },
    )
    .await;

    info!(track = %track.filename, "airing offline library track");
    state
        .hub()
        .broadcast(&ServerMessage::PlaySong(PlaySongPayload {
            song: SongDescriptor {
                id: None,
                title: track.title,
                artist: "Local library".into(),
                duration_seconds: None,
                thumbnail_url: None,
                dedication: None,
                is_offline: true,
            },
            stream_url: format!("/stream-offline/{}", track.filename),
            volume,
            auto_next,
            is_reconnect: false,
            position: None,
        }));
}

/// Kick off a background pre-fetch of the next burst song.
async fn spawn_burst_refill(state: &SharedState) {
    let mut run = state.run_state().lock().await;
    let task = tokio::spawn({
        let state = state.clone();
        async move {
            let slot = prefetch::prepare_burst_song(&state, true).await;
            let leftover = {
                let mut run = state.run_state().lock().await;
                let still_wanted = run.pending.is_some() && run.remaining_in_burst > 0;
                run.pending = None;
                if still_wanted {
                    run.next_prepared = Some(slot);
                    None
                } else {
                    slot.reserved_song_id()
                }
            };
            // The burst was reset while we prepared; give the song back.
            if let Some(song_id) = leftover {
                release_reservation(&state, song_id).await;
            }
        }
    });
    run.pending = Some(PendingPrefetch {
        abort: task.abort_handle(),
        reserved_song: None,
    });
}

/// Find the locked slot, if any, whose main firing is imminent. Orphaned
/// slots (their schedule vanished) are discarded with an offline notice.
async fn take_imminent_slot(
    state: &SharedState,
    now: chrono::NaiveDateTime,
) -> Option<(ScheduleEntity, PreparedSlot)> {
    let mut best: Option<(chrono::NaiveDateTime, ScheduleEntity)> = None;

    for schedule_id in state.slots().schedule_ids() {
        let schedule = match state.schedules().find_schedule(schedule_id).await {
            Ok(Some(schedule)) => schedule,
            Ok(None) => {
                warn!(%schedule_id, "locked slot for a non-existent schedule; discarding");
                if let Some(slot) = state.slots().discard(schedule_id) {
                    if let Some(song_id) = slot.reserved_song_id() {
                        release_reservation(state, song_id).await;
                    }
                }
                state.hub().broadcast(&ServerMessage::NextSongLocked(
                    crate::dto::ws::NextSongLockedPayload {
                        song: None,
                        schedule_time: None,
                        has_announcement: false,
                        is_offline: true,
                        download_failed: false,
                    },
                ));
                continue;
            }
            Err(_) => continue,
        };

        let Ok(expr) = CronExpr::parse(&schedule.cron) else {
            continue;
        };
        let Some(next) = expr.next_after(now) else {
            continue;
        };
        if next - now > chrono::Duration::minutes(IMMINENT_HORIZON_MINUTES) {
            continue;
        }
        match &best {
            Some((soonest, _)) if *soonest <= next => {}
            _ => best = Some((next, schedule)),
        }
    }

    let (_, schedule) = best?;
    let slot = state.slots().take(schedule.id)?;
    Some((schedule, slot))
}

/// Persist `next_run` to the next firing strictly after `after`.
async fn advance_next_run(state: &SharedState, schedule: &ScheduleEntity, after: chrono::NaiveDateTime) {
    let Ok(expr) = CronExpr::parse(&schedule.cron) else {
        warn!(schedule = %schedule.name, "stored cron no longer parses");
        return;
    };
    if let Err(err) = state
        .schedules()
        .set_next_run(schedule.id, expr.next_after(after))
        .await
    {
        warn!(schedule = %schedule.name, error = %err, "failed to persist next_run");
    }
}

/// Reset the burst run state, restoring any reservations it held.
async fn reset_run(state: &SharedState) {
    let to_release = state.run_state().lock().await.reset();
    for song_id in to_release {
        release_reservation(state, song_id).await;
    }
}

async fn release_reservation(state: &SharedState, song_id: i64) {
    if let Err(err) = state.songs().release(song_id).await {
        warn!(song_id, error = %err, "failed to restore reservation");
    }
}

async fn current_playback(state: &SharedState) -> PlaybackStateEntity {
    match state.playback_store().get_current().await {
        Ok(playback) => playback,
        Err(err) => {
            warn!(error = %err, "playback state read failed; using defaults");
            PlaybackStateEntity::default()
        }
    }
}

async fn current_volume(state: &SharedState) -> u8 {
    current_playback(state).await.volume
}

async fn persist_playback(state: &SharedState, playback: PlaybackStateEntity) {
    if let Err(err) = state.playback_store().save_playback(playback).await {
        warn!(error = %err, "failed to persist playback state");
    }
}
