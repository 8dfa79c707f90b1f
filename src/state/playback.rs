//! Playback-side in-memory state: prepared slots, burst run state, and the
//! reconnect cache.

use chrono::NaiveDateTime;
use dashmap::DashMap;
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::dao::models::SongEntity;
use crate::dto::ws::ServerMessage;
use crate::services::announcer::Announcement;

/// A song prepared ahead of its airtime, or the offline marker when
/// preparation failed.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedSlot {
    pub song: Option<SongEntity>,
    pub stream_url: Option<String>,
    pub announcement: Option<Announcement>,
    pub is_offline_fallback: bool,
    pub prepared_at: NaiveDateTime,
}

impl PreparedSlot {
    pub fn ready(
        song: SongEntity,
        stream_url: String,
        announcement: Option<Announcement>,
        prepared_at: NaiveDateTime,
    ) -> Self {
        Self {
            song: Some(song),
            stream_url: Some(stream_url),
            announcement,
            is_offline_fallback: false,
            prepared_at,
        }
    }

    pub fn offline(prepared_at: NaiveDateTime) -> Self {
        Self {
            song: None,
            stream_url: None,
            announcement: None,
            is_offline_fallback: true,
            prepared_at,
        }
    }

    /// The reservation this slot holds, if it carries an un-aired song.
    pub fn reserved_song_id(&self) -> Option<i64> {
        self.song.as_ref().filter(|song| !song.played).map(|song| song.id)
    }
}

/// Bookkeeping for an in-flight pre-fetch so it can be cancelled cleanly.
///
/// The reservation is noted *before* the store call that takes it; cancelling
/// releases it unconditionally, which is an idempotent no-op when the abort
/// landed earlier.
#[derive(Debug)]
pub struct PendingPrefetch {
    pub abort: AbortHandle,
    pub reserved_song: Option<i64>,
}

/// Prepared slots keyed by schedule id, plus their in-flight tasks.
///
/// Mutated only by the pre-fetch pipeline and, for cancellation and
/// consumption, by the playback controller.
#[derive(Default)]
pub struct SlotStore {
    slots: DashMap<Uuid, PreparedSlot>,
    pending: DashMap<Uuid, PendingPrefetch>,
}

impl SlotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a finished slot, retiring any pending marker.
    pub fn install(&self, schedule_id: Uuid, slot: PreparedSlot) {
        self.pending.remove(&schedule_id);
        self.slots.insert(schedule_id, slot);
    }

    /// Consume the slot for a schedule firing.
    pub fn take(&self, schedule_id: Uuid) -> Option<PreparedSlot> {
        self.slots.remove(&schedule_id).map(|(_, slot)| slot)
    }

    pub fn get(&self, schedule_id: Uuid) -> Option<PreparedSlot> {
        self.slots.get(&schedule_id).map(|slot| slot.clone())
    }

    /// Drop a slot without consuming it, returning it so reservations can be
    /// released.
    pub fn discard(&self, schedule_id: Uuid) -> Option<PreparedSlot> {
        self.slots.remove(&schedule_id).map(|(_, slot)| slot)
    }

    pub fn schedule_ids(&self) -> Vec<Uuid> {
        self.slots.iter().map(|entry| *entry.key()).collect()
    }

    /// Record a pre-fetch task starting for a schedule.
    pub fn begin_pending(&self, schedule_id: Uuid, abort: AbortHandle) {
        if let Some(old) = self.pending.insert(
            schedule_id,
            PendingPrefetch {
                abort,
                reserved_song: None,
            },
        ) {
            old.abort.abort();
        }
    }

    /// Note which song the in-flight pre-fetch is about to reserve.
    pub fn note_reservation(&self, schedule_id: Uuid, song_id: i64) {
        if let Some(mut pending) = self.pending.get_mut(&schedule_id) {
            pending.reserved_song = Some(song_id);
        }
    }

    pub fn clear_pending(&self, schedule_id: Uuid) {
        self.pending.remove(&schedule_id);
    }

    /// Abort an in-flight pre-fetch; returns the reservation to release.
    pub fn cancel_pending(&self, schedule_id: Uuid) -> Option<i64> {
        let (_, pending) = self.pending.remove(&schedule_id)?;
        pending.abort.abort();
        pending.reserved_song
    }

    pub fn pending_ids(&self) -> Vec<Uuid> {
        self.pending.iter().map(|entry| *entry.key()).collect()
    }
}

/// Multi-song burst tracking, reset by any manual admin command or stop.
#[derive(Default)]
pub struct ScheduleRunState {
    pub remaining_in_burst: u32,
    pub next_prepared: Option<PreparedSlot>,
    pub pending: Option<PendingPrefetch>,
}

impl ScheduleRunState {
    /// Clear the burst, aborting any in-flight pre-fetch. Returns song ids
    /// whose reservations the caller must release.
    pub fn reset(&mut self) -> Vec<i64> {
        let mut to_release = Vec::new();
        if let Some(pending) = self.pending.take() {
            pending.abort.abort();
            if let Some(song_id) = pending.reserved_song {
                to_release.push(song_id);
            }
        }
        if let Some(slot) = self.next_prepared.take() {
            if let Some(song_id) = slot.reserved_song_id() {
                to_release.push(song_id);
            }
        }
        self.remaining_in_burst = 0;
        to_release
    }
}

/// Cached copy of the last play event, replayed to a reconnecting admin.
#[derive(Debug, Clone)]
pub struct PlaybackCache {
    pub message: ServerMessage,
    pub cached_at: NaiveDateTime,
}
