//! Pre-fetch pipeline: reserves and prepares the next song ahead of airtime.
//!
//! Five minutes before a schedule fires, the pipeline locks the top-voted
//! song (so concurrent voting cannot change the outcome), resolves its
//! stream URL, optionally synthesizes the DJ announcement, and publishes a
//! locked notice. Every failure leaves the system in one of two consistent
//! states: "song reserved and streamable" or "offline fallback", never
//! "reserved but unplayable".

use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::cron::CronExpr;
use crate::dao::models::{ScheduleEntity, SongEntity};
use crate::dao::store::{ScheduleStore, SongStore};
use crate::dto::ws::{NextSongLockedPayload, ServerMessage, SongDescriptor};
use crate::services::announcer::Announcement;
use crate::services::resolver::{self, ResolveError};
use crate::state::{PreparedSlot, SharedState};

/// Pre-fetch jobs fire this long before the main firing.
pub const PREFETCH_LEAD: Duration = Duration::from_secs(5 * 60);
/// A preparation still running after this budget is failed and replaced by
/// the offline fallback (the T-1m rule).
pub const PREFETCH_BUDGET: Duration = Duration::from_secs(4 * 60);

/// Sole entry point of the pipeline.
pub async fn prepare_scheduled_song(state: SharedState, schedule_id: Uuid, _volume: u8) {
    let schedule = match state.schedules().find_schedule(schedule_id).await {
        Ok(Some(schedule)) if schedule.active => schedule,
        Ok(_) => {
            warn!(%schedule_id, "pre-fetch aborted: schedule missing or inactive");
            state.slots().clear_pending(schedule_id);
            return;
        }
        Err(err) => {
            warn!(%schedule_id, error = %err, "pre-fetch aborted: schedule lookup failed");
            state.slots().clear_pending(schedule_id);
            return;
        }
    };

    let song = match state.songs().top_unplayed().await {
        Ok(Some(song)) => song,
        Ok(None) => {
            info!(schedule = %schedule.name, "queue empty; locking offline fallback");
            install_offline(&state, &schedule, false, false).await;
            return;
        }
        Err(err) => {
            warn!(schedule = %schedule.name, error = %err, "queue read failed; locking offline fallback");
            install_offline(&state, &schedule, true, false).await;
            return;
        }
    };

    // Note the reservation before taking it so a cancellation mid-reserve
    // can always restore it.
    state.slots().note_reservation(schedule_id, song.id);
    match state.songs().reserve(song.id).await {
        Ok(true) => {}
        Ok(false) => {
            warn!(song_id = song.id, "top song already reserved; locking offline fallback");
            install_offline(&state, &schedule, false, false).await;
            return;
        }
        Err(err) => {
            warn!(song_id = song.id, error = %err, "reservation failed; locking offline fallback");
            install_offline(&state, &schedule, true, false).await;
            return;
        }
    }

    match tokio::time::timeout(PREFETCH_BUDGET, prepare_reserved(&state, &song)).await {
        Ok(Ok((stream_url, announcement))) => {
            let slot = PreparedSlot::ready(
                song.clone(),
                stream_url,
                announcement,
                state.clock().now(),
            );
            let payload = locked_payload(&state, &schedule, &slot);
            state.slots().install(schedule_id, slot);
            info!(schedule = %schedule.name, song = %song.title, "next song locked");
            state
                .hub()
                .broadcast(&ServerMessage::NextSongLocked(payload));
            state.hub().broadcast(&ServerMessage::QueueUpdated);
        }
        outcome => {
            let error = match outcome {
                Ok(Err(err)) => err,
                _ => ResolveError::Timeout(PREFETCH_BUDGET),
            };
            warn!(
                schedule = %schedule.name,
                song = %song.title,
                error = %error,
                "pre-fetch failed; restoring reservation"
            );
            if let Err(release_err) = state.songs().release(song.id).await {
                // Invariant violation: a reservation we could not restore.
                warn!(song_id = song.id, error = %release_err, "failed to restore reservation");
            }
            install_offline(&state, &schedule, true, true).await;
        }
    }
}

/// Reduced pipeline used by burst auto-next chaining and live selection:
/// reserve the current top, resolve, announce. No locked notice is
/// published, but the reservation still redraws the queue. Failures degrade
/// to an offline-fallback slot.
///
/// With `note_in_run_state`, the reservation is recorded in the burst run
/// state so an abort can restore it.
pub async fn prepare_burst_song(state: &SharedState, note_in_run_state: bool) -> PreparedSlot {
    let now = state.clock().now();

    let song = match state.songs().top_unplayed().await {
        Ok(Some(song)) => song,
        Ok(None) => return PreparedSlot::offline(now),
        Err(err) => {
            warn!(error = %err, "queue read failed during burst selection");
            return PreparedSlot::offline(now);
        }
    };

    if note_in_run_state {
        let mut run = state.run_state().lock().await;
        if let Some(pending) = run.pending.as_mut() {
            pending.reserved_song = Some(song.id);
        }
    }

    match state.songs().reserve(song.id).await {
        Ok(true) => {}
        Ok(false) | Err(_) => return PreparedSlot::offline(now),
    }
    state.hub().broadcast(&ServerMessage::QueueUpdated);

    match resolver::resolve_cached(state.url_cache(), state.resolver(), &song.url).await {
        Ok(stream_url) => {
            let announcement = state.announcer().announce(&song).await;
            PreparedSlot::ready(song, stream_url, announcement, now)
        }
        Err(err) => {
            warn!(song = %song.title, error = %err, "burst pre-fetch failed; restoring reservation");
            if let Err(release_err) = state.songs().release(song.id).await {
                warn!(song_id = song.id, error = %release_err, "failed to restore reservation");
            }
            state.hub().broadcast(&ServerMessage::QueueUpdated);
            PreparedSlot::offline(now)
        }
    }
}

/// Resolve the stream URL and synthesize the announcement for a reserved
/// song. Each step carries its own deadline; the caller wraps the whole run
/// in [`PREFETCH_BUDGET`].
async fn prepare_reserved(
    state: &SharedState,
    song: &SongEntity,
) -> Result<(String, Option<Announcement>), ResolveError> {
    let stream_url =
        resolver::resolve_cached(state.url_cache(), state.resolver(), &song.url).await?;
    let announcement = state.announcer().announce(song).await;
    Ok((stream_url, announcement))
}

/// Install an offline-fallback slot and tell listeners about it.
async fn install_offline(
    state: &SharedState,
    schedule: &ScheduleEntity,
    download_failed: bool,
    queue_changed: bool,
) {
    let slot = PreparedSlot::offline(state.clock().now());
    let mut payload = locked_payload(state, schedule, &slot);
    payload.download_failed = download_failed;
    state.slots().install(schedule.id, slot);
    state
        .hub()
        .broadcast(&ServerMessage::NextSongLocked(payload));
    if queue_changed {
        state.hub().broadcast(&ServerMessage::QueueUpdated);
    }
}

/// Build the locked notice for a slot: compact descriptor, the schedule's
/// next firing as local `HH:MM`, and whether an announcement will play.
pub(crate) fn locked_payload(
    state: &SharedState,
    schedule: &ScheduleEntity,
    slot: &PreparedSlot,
) -> NextSongLockedPayload {
    NextSongLockedPayload {
        song: slot.song.as_ref().map(SongDescriptor::from),
        schedule_time: next_firing_display(state, schedule),
        has_announcement: slot.announcement.is_some(),
        is_offline: slot.is_offline_fallback,
        download_failed: false,
    }
}

fn next_firing_display(state: &SharedState, schedule: &ScheduleEntity) -> Option<String> {
    let expr = CronExpr::parse(&schedule.cron).ok()?;
    let next = expr.next_after(state.clock().now())?;
    Some(next.format("%H:%M").to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clock::Clock;
    use crate::dao::store::{ScheduleStore, SongStore};
    use crate::state::testing::{
        FakeResolver, attach_listener, base_time, drain, drain_types, make_schedule, make_song,
        state_for_tests, state_with,
    };

    #[tokio::test]
    async fn locks_the_top_voted_song_and_notifies_listeners() {
        let (state, store) = state_for_tests();
        store.put_song(make_song(1, 3, false));
        store.put_song(make_song(2, 1, false));
        let schedule = make_schedule("0 17 * * 1-5", 70, 1);
        store.insert_schedule(schedule.clone()).await.unwrap();
        let (_, mut rx) = attach_listener(&state);

        prepare_scheduled_song(state.clone(), schedule.id, 70).await;

        let slot = state.slots().get(schedule.id).expect("slot installed");
        assert_eq!(slot.song.as_ref().unwrap().id, 1);
        assert_eq!(
            slot.stream_url.as_deref(),
            Some("https://cdn.example/stream.m4a")
        );
        assert!(!slot.is_offline_fallback);
        assert!(store.find_song(1).await.unwrap().unwrap().reserved);

        let events = drain(&mut rx);
        assert_eq!(events[0]["type"], "next-song-locked");
        assert_eq!(events[0]["song"]["title"], "song-1");
        assert_eq!(events[0]["schedule_time"], "17:00");
        assert_eq!(events[1]["type"], "queue-updated");
    }

    #[tokio::test]
    async fn extractor_failure_restores_the_reservation() {
        let (state, store) = state_with(
            Arc::new(FakeResolver::failing()),
            Clock::fixed(base_time()),
        );
        store.put_song(make_song(1, 3, false));
        let schedule = make_schedule("0 17 * * 1-5", 70, 1);
        store.insert_schedule(schedule.clone()).await.unwrap();
        let (_, mut rx) = attach_listener(&state);

        prepare_scheduled_song(state.clone(), schedule.id, 70).await;

        let song = store.find_song(1).await.unwrap().unwrap();
        assert!(!song.reserved, "reservation restored after failure");
        assert!(!song.played);

        let slot = state.slots().get(schedule.id).unwrap();
        assert!(slot.is_offline_fallback);

        let events = drain(&mut rx);
        assert_eq!(events[0]["type"], "next-song-locked");
        assert_eq!(events[0]["is_offline"], true);
        assert_eq!(events[0]["download_failed"], true);
        assert_eq!(events[1]["type"], "queue-updated");
    }

    #[tokio::test]
    async fn empty_queue_locks_an_offline_slot() {
        let (state, store) = state_for_tests();
        let schedule = make_schedule("0 17 * * 1-5", 70, 1);
        store.insert_schedule(schedule.clone()).await.unwrap();
        let (_, mut rx) = attach_listener(&state);

        prepare_scheduled_song(state.clone(), schedule.id, 70).await;

        let slot = state.slots().get(schedule.id).unwrap();
        assert!(slot.is_offline_fallback);

        let events = drain(&mut rx);
        assert_eq!(events[0]["type"], "next-song-locked");
        assert_eq!(events[0]["is_offline"], true);
        assert!(events[0].get("download_failed").is_none());
        assert_eq!(events.len(), 1, "no queue change to announce");
    }

    #[tokio::test]
    async fn missing_schedule_aborts_without_a_slot() {
        let (state, store) = state_for_tests();
        store.put_song(make_song(1, 3, false));
        let ghost = Uuid::new_v4();

        prepare_scheduled_song(state.clone(), ghost, 70).await;

        assert!(state.slots().get(ghost).is_none());
        assert!(!store.find_song(1).await.unwrap().unwrap().reserved);
    }

    #[tokio::test]
    async fn inactive_schedule_aborts() {
        let (state, store) = state_for_tests();
        store.put_song(make_song(1, 3, false));
        let mut schedule = make_schedule("0 17 * * 1-5", 70, 1);
        schedule.active = false;
        store.insert_schedule(schedule.clone()).await.unwrap();

        prepare_scheduled_song(state.clone(), schedule.id, 70).await;

        assert!(state.slots().get(schedule.id).is_none());
    }

    #[tokio::test]
    async fn burst_selection_reserves_and_redraws_the_queue() {
        let (state, store) = state_for_tests();
        store.put_song(make_song(1, 3, false));
        let (_, mut rx) = attach_listener(&state);

        let slot = prepare_burst_song(&state, false).await;

        assert_eq!(slot.song.as_ref().unwrap().id, 1);
        assert!(!slot.is_offline_fallback);
        assert_eq!(drain_types(&mut rx), vec!["queue-updated"]);
    }

    #[tokio::test]
    async fn burst_selection_degrades_to_offline_on_failure() {
        let (state, store) = state_with(
            Arc::new(FakeResolver::failing()),
            Clock::fixed(base_time()),
        );
        store.put_song(make_song(1, 3, false));

        let slot = prepare_burst_song(&state, false).await;

        assert!(slot.is_offline_fallback);
        assert!(!store.find_song(1).await.unwrap().unwrap().reserved);
    }

    #[tokio::test]
    async fn burst_selection_with_empty_queue_is_offline() {
        let (state, _store) = state_for_tests();
        let slot = prepare_burst_song(&state, false).await;
        assert!(slot.is_offline_fallback);
    }
}
