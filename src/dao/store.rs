use std::sync::Arc;

use chrono::NaiveDateTime;
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::models::{PlaybackStateEntity, ScheduleEntity, SongEntity};
use crate::dao::storage::StorageResult;

/// Abstraction over the external voted song queue.
///
/// Queue visibility is `!played && !reserved`; selection order is
/// `starred DESC, vote_count DESC, added_at ASC`.
pub trait SongStore: Send + Sync {
    /// Top-voted song still visible in the queue.
    fn top_unplayed(&self) -> BoxFuture<'static, StorageResult<Option<SongEntity>>>;
    fn find_song(&self, id: i64) -> BoxFuture<'static, StorageResult<Option<SongEntity>>>;
    /// Take the pre-fetch reservation. Returns `false` when the song is
    /// missing or already reserved.
    fn reserve(&self, id: i64) -> BoxFuture<'static, StorageResult<bool>>;
    /// Drop a reservation without marking the song as aired. Idempotent, so
    /// a cancelled pre-fetch can always restore safely.
    fn release(&self, id: i64) -> BoxFuture<'static, StorageResult<()>>;
    /// Record that the song actually aired: sets `played`/`played_at` and
    /// clears any reservation. Errors when the row is gone.
    fn mark_played(&self, id: i64, at: NaiveDateTime) -> BoxFuture<'static, StorageResult<()>>;
    /// Most recently aired songs, newest first.
    fn recently_played(&self, limit: usize)
    -> BoxFuture<'static, StorageResult<Vec<SongEntity>>>;
}

/// Abstraction over the schedule store. The core writes `last_run` and
/// `next_run`; everything else is admin CRUD.
pub trait ScheduleStore: Send + Sync {
    fn list_schedules(&self) -> BoxFuture<'static, StorageResult<Vec<ScheduleEntity>>>;
    fn list_active(&self) -> BoxFuture<'static, StorageResult<Vec<ScheduleEntity>>>;
    fn find_schedule(&self, id: Uuid)
    -> BoxFuture<'static, StorageResult<Option<ScheduleEntity>>>;
    fn insert_schedule(&self, schedule: ScheduleEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Replace an existing row. Returns `false` when the id is unknown.
    fn update_schedule(&self, schedule: ScheduleEntity)
    -> BoxFuture<'static, StorageResult<bool>>;
    fn delete_schedule(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>>;
    /// Stamp the last firing. Errors when the row is gone.
    fn set_last_run(&self, id: Uuid, at: NaiveDateTime) -> BoxFuture<'static, StorageResult<()>>;
    /// Stamp (or clear) the next planned firing. Errors when the row is gone.
    fn set_next_run(
        &self,
        id: Uuid,
        at: Option<NaiveDateTime>,
    ) -> BoxFuture<'static, StorageResult<()>>;
}

/// Abstraction over the persisted playback singleton.
pub trait PlaybackStore: Send + Sync {
    /// Find-or-create of the single playback row.
    fn get_current(&self) -> BoxFuture<'static, StorageResult<PlaybackStateEntity>>;
    fn save_playback(&self, state: PlaybackStateEntity)
    -> BoxFuture<'static, StorageResult<()>>;
}

/// Abstraction over the external chat store; only pruning is needed here.
pub trait ChatStore: Send + Sync {
    /// Delete messages sent strictly before `cutoff`; returns how many went.
    fn delete_messages_older_than(
        &self,
        cutoff: NaiveDateTime,
    ) -> BoxFuture<'static, StorageResult<u64>>;
}

/// Bundle of store handles wired into the application state at startup.
#[derive(Clone)]
pub struct Stores {
    pub songs: Arc<dyn SongStore>,
    pub schedules: Arc<dyn ScheduleStore>,
    pub playback: Arc<dyn PlaybackStore>,
    pub chat: Arc<dyn ChatStore>,
}
