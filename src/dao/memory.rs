//! In-memory store backend used for development and tests.
//!
//! Production deployments plug their own backends into the [`Stores`] bundle;
//! this one keeps everything behind plain mutexes and answers through ready
//! futures, which is enough for a single-process radio.

use std::collections::HashMap;
use std::future::ready;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::NaiveDateTime;
use futures::future::BoxFuture;
use serde::Deserialize;
use uuid::Uuid;

use crate::dao::models::{ChatMessageEntity, PlaybackStateEntity, ScheduleEntity, SongEntity};
use crate::dao::storage::{StorageError, StorageResult};
use crate::dao::store::{ChatStore, PlaybackStore, ScheduleStore, SongStore, Stores};

/// Single-process store backing all four store traits.
#[derive(Default)]
pub struct MemoryStore {
    songs: Mutex<HashMap<i64, SongEntity>>,
    schedules: Mutex<HashMap<Uuid, ScheduleEntity>>,
    playback: Mutex<Option<PlaybackStateEntity>>,
    chat: Mutex<Vec<ChatMessageEntity>>,
}

/// Optional JSON seed loaded at startup for development setups.
#[derive(Debug, Default, Deserialize)]
pub struct MemorySeed {
    #[serde(default)]
    pub songs: Vec<SongEntity>,
    #[serde(default)]
    pub schedules: Vec<ScheduleEntity>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a seed file and populate a fresh store from it.
    pub fn from_seed_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let seed: MemorySeed = serde_json::from_str(&contents)?;
        let store = Self::new();
        store.apply_seed(seed);
        Ok(store)
    }

    pub fn apply_seed(&self, seed: MemorySeed) {
        let mut songs = self.songs.lock().expect("songs mutex poisoned");
        for song in seed.songs {
            songs.insert(song.id, song);
        }
        drop(songs);

        let mut schedules = self.schedules.lock().expect("schedules mutex poisoned");
        for schedule in seed.schedules {
            schedules.insert(schedule.id, schedule);
        }
    }

    /// Insert or replace a song row (test and seed helper).
    pub fn put_song(&self, song: SongEntity) {
        self.songs
            .lock()
            .expect("songs mutex poisoned")
            .insert(song.id, song);
    }

    /// Insert a chat message row (test helper).
    pub fn put_chat_message(&self, message: ChatMessageEntity) {
        self.chat
            .lock()
            .expect("chat mutex poisoned")
            .push(message);
    }

    /// Assemble a [`Stores`] bundle where every trait is served by `self`.
    pub fn stores(self: &Arc<Self>) -> Stores {
        Stores {
            songs: self.clone(),
            schedules: self.clone(),
            playback: self.clone(),
            chat: self.clone(),
        }
    }

    fn queue_snapshot(&self) -> Vec<SongEntity> {
        let songs = self.songs.lock().expect("songs mutex poisoned");
        let mut visible: Vec<SongEntity> = songs
            .values()
            .filter(|song| !song.played && !song.reserved)
            .cloned()
            .collect();
        // starred DESC, vote_count DESC, added_at ASC; id breaks exact ties.
        visible.sort_by(|a, b| {
            b.starred
                .cmp(&a.starred)
                .then(b.vote_count.cmp(&a.vote_count))
                .then(a.added_at.cmp(&b.added_at))
                .then(a.id.cmp(&b.id))
        });
        visible
    }
}

fn done<T: Send + 'static>(value: StorageResult<T>) -> BoxFuture<'static, StorageResult<T>> {
    Box::pin(ready(value))
}

impl SongStore for MemoryStore {
    fn top_unplayed(&self) -> BoxFuture<'static, StorageResult<Option<SongEntity>>> {
        done(Ok(self.queue_snapshot().into_iter().next()))
    }

    fn find_song(&self, id: i64) -> BoxFuture<'static, StorageResult<Option<SongEntity>>> {
        let songs = self.songs.lock().expect("songs mutex poisoned");
        done(Ok(songs.get(&id).cloned()))
    }

    fn reserve(&self, id: i64) -> BoxFuture<'static, StorageResult<bool>> {
        let mut songs = self.songs.lock().expect("songs mutex poisoned");
        let reserved = match songs.get_mut(&id) {
            Some(song) if !song.reserved => {
                song.reserved = true;
                true
            }
            _ => false,
        };
        done(Ok(reserved))
    }

    fn release(&self, id: i64) -> BoxFuture<'static, StorageResult<()>> {
        let mut songs = self.songs.lock().expect("songs mutex poisoned");
        if let Some(song) = songs.get_mut(&id) {
            song.reserved = false;
        }
        done(Ok(()))
    }

    fn mark_played(&self, id: i64, at: NaiveDateTime) -> BoxFuture<'static, StorageResult<()>> {
        let mut songs = self.songs.lock().expect("songs mutex poisoned");
        let result = match songs.get_mut(&id) {
            Some(song) => {
                song.played = true;
                song.played_at = Some(at);
                song.reserved = false;
                Ok(())
            }
            None => Err(StorageError::row_gone("song", id)),
        };
        done(result)
    }

    fn recently_played(
        &self,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<SongEntity>>> {
        let songs = self.songs.lock().expect("songs mutex poisoned");
        let mut played: Vec<SongEntity> = songs
            .values()
            .filter(|song| song.played && song.played_at.is_some())
            .cloned()
            .collect();
        played.sort_by(|a, b| b.played_at.cmp(&a.played_at));
        played.truncate(limit);
        done(Ok(played))
    }
}

impl ScheduleStore for MemoryStore {
    fn list_schedules(&self) -> BoxFuture<'static, StorageResult<Vec<ScheduleEntity>>> {
        let schedules = self.schedules.lock().expect("schedules mutex poisoned");
        let mut all: Vec<ScheduleEntity> = schedules.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        done(Ok(all))
    }

    fn list_active(&self) -> BoxFuture<'static, StorageResult<Vec<ScheduleEntity>>> {
        let schedules = self.schedules.lock().expect("schedules mutex poisoned");
        let mut active: Vec<ScheduleEntity> = schedules
            .values()
            .filter(|schedule| schedule.active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.name.cmp(&b.name));
        done(Ok(active))
    }

    fn find_schedule(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<ScheduleEntity>>> {
        let schedules = self.schedules.lock().expect("schedules mutex poisoned");
        done(Ok(schedules.get(&id).cloned()))
    }

    fn insert_schedule(&self, schedule: ScheduleEntity) -> BoxFuture<'static, StorageResult<()>> {
        let mut schedules = self.schedules.lock().expect("schedules mutex poisoned");
        schedules.insert(schedule.id, schedule);
        done(Ok(()))
    }

    fn update_schedule(
        &self,
        schedule: ScheduleEntity,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let mut schedules = self.schedules.lock().expect("schedules mutex poisoned");
        let known = schedules.contains_key(&schedule.id);
        if known {
            schedules.insert(schedule.id, schedule);
        }
        done(Ok(known))
    }

    fn delete_schedule(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        let mut schedules = self.schedules.lock().expect("schedules mutex poisoned");
        done(Ok(schedules.remove(&id).is_some()))
    }

    fn set_last_run(&self, id: Uuid, at: NaiveDateTime) -> BoxFuture<'static, StorageResult<()>> {
        let mut schedules = self.schedules.lock().expect("schedules mutex poisoned");
        let result = match schedules.get_mut(&id) {
            Some(schedule) => {
                schedule.last_run = Some(at);
                Ok(())
            }
            None => Err(StorageError::row_gone("schedule", id)),
        };
        done(result)
    }

    fn set_next_run(
        &self,
        id: Uuid,
        at: Option<NaiveDateTime>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let mut schedules = self.schedules.lock().expect("schedules mutex poisoned");
        let result = match schedules.get_mut(&id) {
            Some(schedule) => {
                schedule.next_run = at;
                Ok(())
            }
            None => Err(StorageError::row_gone("schedule", id)),
        };
        done(result)
    }
}

impl PlaybackStore for MemoryStore {
    fn get_current(&self) -> BoxFuture<'static, StorageResult<PlaybackStateEntity>> {
        let mut playback = self.playback.lock().expect("playback mutex poisoned");
        let state = playback.get_or_insert_with(PlaybackStateEntity::default).clone();
        done(Ok(state))
    }

    fn save_playback(
        &self,
        state: PlaybackStateEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let mut playback = self.playback.lock().expect("playback mutex poisoned");
        *playback = Some(state);
        done(Ok(()))
    }
}

impl ChatStore for MemoryStore {
    fn delete_messages_older_than(
        &self,
        cutoff: NaiveDateTime,
    ) -> BoxFuture<'static, StorageResult<u64>> {
        let mut chat = self.chat.lock().expect("chat mutex poisoned");
        let before = chat.len();
        chat.retain(|message| message.sent_at >= cutoff);
        done(Ok((before - chat.len()) as u64))
    }
}
