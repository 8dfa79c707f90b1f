pub mod admin;
pub mod hub;
pub mod playback;

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::config::AppConfig;
use crate::dao::store::{ChatStore, PlaybackStore, ScheduleStore, SongStore, Stores};
use crate::dto::ws::{ServerMessage, SongDescriptor};
use crate::services::announcer::{Announcer, SpeechSynthesizer};
use crate::services::library::Library;
use crate::services::resolver::{StreamResolver, StreamUrlCache};
use crate::services::scheduler::Scheduler;

pub use self::admin::{ADMIN_GRACE, AdminArbiter, ClaimOutcome};
pub use self::hub::{BroadcastHub, ListenerConnection};
pub use self::playback::{
    PendingPrefetch, PlaybackCache, PreparedSlot, ScheduleRunState, SlotStore,
};

pub type SharedState = Arc<AppState>;

/// Central application state.
///
/// Each field has exactly one owning component: the scheduler owns the job
/// map, the pre-fetch pipeline owns slots and reservations, the playback
/// controller owns run state and the playing caches, the hub owns
/// connections, the arbiter owns the admin session. Everyone else reads
/// through the accessors below.
pub struct AppState {
    config: AppConfig,
    stores: Stores,
    clock: Clock,
    hub: BroadcastHub,
    arbiter: AdminArbiter,
    slots: SlotStore,
    run_state: Mutex<ScheduleRunState>,
    /// Serializes playback controller operations (scheduled firings and
    /// admin commands mutate the same rows).
    command_gate: Mutex<()>,
    currently_playing: Mutex<Option<SongDescriptor>>,
    playback_cache: Mutex<Option<PlaybackCache>>,
    url_cache: Arc<StreamUrlCache>,
    resolver: Arc<dyn StreamResolver>,
    announcer: Announcer,
    library: Library,
    scheduler: Scheduler,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned
    /// cheaply into spawned tasks.
    pub fn new(
        config: AppConfig,
        stores: Stores,
        resolver: Arc<dyn StreamResolver>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        clock: Clock,
    ) -> SharedState {
        let announcer = Announcer::new(synthesizer, config.announcement_cache_dir());
        let library = Library::new(config.library_dir.clone());
        let url_cache = Arc::new(StreamUrlCache::new(config.stream_url_ttl));

        Arc::new(Self {
            config,
            stores,
            clock,
            hub: BroadcastHub::new(),
            arbiter: AdminArbiter::new(),
            slots: SlotStore::new(),
            run_state: Mutex::new(ScheduleRunState::default()),
            command_gate: Mutex::new(()),
            currently_playing: Mutex::new(None),
            playback_cache: Mutex::new(None),
            url_cache,
            resolver,
            announcer,
            library,
            scheduler: Scheduler::new(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn songs(&self) -> Arc<dyn SongStore> {
        self.stores.songs.clone()
    }

    pub fn schedules(&self) -> Arc<dyn ScheduleStore> {
        self.stores.schedules.clone()
    }

    pub fn playback_store(&self) -> Arc<dyn PlaybackStore> {
        self.stores.playback.clone()
    }

    pub fn chat(&self) -> Arc<dyn ChatStore> {
        self.stores.chat.clone()
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    pub fn arbiter(&self) -> &AdminArbiter {
        &self.arbiter
    }

    pub fn slots(&self) -> &SlotStore {
        &self.slots
    }

    pub fn run_state(&self) -> &Mutex<ScheduleRunState> {
        &self.run_state
    }

    pub fn command_gate(&self) -> &Mutex<()> {
        &self.command_gate
    }

    pub fn url_cache(&self) -> &StreamUrlCache {
        &self.url_cache
    }

    /// Owned handle for the background sweeper task.
    pub fn url_cache_handle(&self) -> Arc<StreamUrlCache> {
        self.url_cache.clone()
    }

    pub fn resolver(&self) -> &dyn StreamResolver {
        self.resolver.as_ref()
    }

    pub fn announcer(&self) -> &Announcer {
        &self.announcer
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Song metadata the broadcaster most recently reported as playing.
    pub async fn currently_playing(&self) -> Option<SongDescriptor> {
        self.currently_playing.lock().await.clone()
    }

    pub async fn set_currently_playing(&self, song: Option<SongDescriptor>) {
        *self.currently_playing.lock().await = song;
    }

    /// Remember the last play event for reconnect replays.
    pub async fn cache_play_event(&self, message: ServerMessage) {
        *self.playback_cache.lock().await = Some(PlaybackCache {
            message,
            cached_at: self.clock.now(),
        });
    }

    pub async fn cached_play_event(&self) -> Option<PlaybackCache> {
        self.playback_cache.lock().await.clone()
    }

    pub async fn clear_playback_cache(&self) {
        *self.playback_cache.lock().await = None;
    }

    /// Forget what was playing; used on stop and when the admin truly left.
    pub async fn clear_broadcast_caches(&self) {
        self.set_currently_playing(None).await;
        self.clear_playback_cache().await;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for service and state tests.

    use std::sync::Arc;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use axum::extract::ws::Message;
    use chrono::{NaiveDate, NaiveDateTime};
    use futures::future::BoxFuture;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::{AppState, ListenerConnection, SharedState};
    use crate::clock::Clock;
    use crate::config::AppConfig;
    use crate::dao::memory::MemoryStore;
    use crate::dao::models::{ScheduleEntity, SongEntity};
    use crate::services::announcer::NullSynthesizer;
    use crate::services::resolver::{ResolveError, StreamResolver};

    /// Scenario base time: Monday 2024-03-11 16:55 local.
    pub fn base_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 11)
            .unwrap()
            .and_hms_opt(16, 55, 0)
            .unwrap()
    }

    /// Resolver double with a configurable outcome and optional delay.
    pub struct FakeResolver {
        result: StdMutex<Result<String, String>>,
        delay: StdMutex<Option<Duration>>,
    }

    impl FakeResolver {
        pub fn ok(url: &str) -> Self {
            Self {
                result: StdMutex::new(Ok(url.to_string())),
                delay: StdMutex::new(None),
            }
        }

        pub fn failing() -> Self {
            Self {
                result: StdMutex::new(Err("fake extractor failure".to_string())),
                delay: StdMutex::new(None),
            }
        }

        pub fn set_delay(&self, delay: Duration) {
            *self.delay.lock().unwrap() = Some(delay);
        }
    }

    impl StreamResolver for FakeResolver {
        fn resolve(&self, _url: &str) -> BoxFuture<'static, Result<String, ResolveError>> {
            let result = self.result.lock().unwrap().clone();
            let delay = *self.delay.lock().unwrap();
            Box::pin(async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                result.map_err(ResolveError::Extractor)
            })
        }
    }

    fn scratch_config() -> AppConfig {
        let scratch = std::env::temp_dir().join(format!("wavecast-state-{}", Uuid::new_v4()));
        AppConfig {
            library_dir: scratch.join("library"),
            cache_dir: scratch.join("cache"),
            ..AppConfig::default()
        }
    }

    /// State wired with a fake resolver, null synthesizer, empty memory
    /// store, and a fixed clock at [`base_time`].
    pub fn state_for_tests() -> (SharedState, Arc<MemoryStore>) {
        state_with(
            Arc::new(FakeResolver::ok("https://cdn.example/stream.m4a")),
            Clock::fixed(base_time()),
        )
    }

    pub fn state_with(
        resolver: Arc<dyn StreamResolver>,
        clock: Clock,
    ) -> (SharedState, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let state = AppState::new(
            scratch_config(),
            store.stores(),
            resolver,
            Arc::new(NullSynthesizer),
            clock,
        );
        (state, store)
    }

    pub fn make_song(id: i64, votes: u32, starred: bool) -> SongEntity {
        SongEntity {
            id,
            title: format!("song-{id}"),
            artist: format!("artist-{id}"),
            url: format!("https://video.example/watch?v=v{id}"),
            video_id: format!("v{id}"),
            duration_seconds: Some(180),
            thumbnail_url: None,
            dedication: None,
            starred,
            vote_count: votes,
            added_at: base_time() - chrono::Duration::hours(24) + chrono::Duration::seconds(id),
            played: false,
            played_at: None,
            reserved: false,
        }
    }

    pub fn make_schedule(cron: &str, volume: u8, song_count: u8) -> ScheduleEntity {
        ScheduleEntity {
            id: Uuid::new_v4(),
            name: "test schedule".into(),
            cron: cron.into(),
            volume,
            song_count,
            active: true,
            last_run: None,
            next_run: None,
        }
    }

    /// Register a fake listener connection and return its inbox.
    pub fn attach_listener(state: &SharedState) -> (Uuid, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        state.hub().register(ListenerConnection { id, tx });
        (id, rx)
    }

    /// Drain everything currently queued for a listener, returning the
    /// decoded text payloads in delivery order. Control frames (e.g. the
    /// close sent by a kick) are skipped.
    pub fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<serde_json::Value> {
        let mut events = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let Message::Text(text) = frame {
                events.push(serde_json::from_str(text.as_str()).unwrap());
            }
        }
        events
    }

    /// Like [`drain`] but reduced to the event type tags.
    pub fn drain_types(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<String> {
        drain(rx)
            .into_iter()
            .map(|event| event["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}
