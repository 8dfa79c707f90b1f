//! Time-triggered scheduler.
//!
//! Every active schedule gets a pair of tokio jobs: the main job firing at
//! the cron expression into the playback controller, and a pre-fetch job
//! firing exactly five minutes earlier into the pre-fetch pipeline. A daily
//! maintenance job prunes old chat messages. The scheduler exclusively owns
//! the job map; schedule CRUD re-registers jobs through it.

use std::sync::Mutex as StdMutex;

use chrono::NaiveDateTime;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cron::CronExpr;
use crate::dao::models::ScheduleEntity;
use crate::dao::store::{ChatStore, ScheduleStore, SongStore};
use crate::error::ServiceError;
use crate::services::{playback, prefetch};
use crate::state::SharedState;

/// Local firing time of the daily maintenance job.
const MAINTENANCE_CRON: &str = "30 4 * * *";
/// Chat messages older than this many days are pruned.
const CHAT_RETENTION_DAYS: i64 = 3;

struct ScheduleJobs {
    main: JoinHandle<()>,
    prefetch: Option<JoinHandle<()>>,
}

/// Owns the cron job map and the schedule timers.
#[derive(Default)]
pub struct Scheduler {
    jobs: DashMap<Uuid, ScheduleJobs>,
    maintenance: StdMutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register jobs for every active schedule plus the maintenance job.
    /// A schedule row whose stored cron no longer parses is fatal here:
    /// the CRUD boundary never lets one in, so the store is corrupt.
    pub async fn initialize(&self, state: &SharedState) -> Result<(), ServiceError> {
        let schedules = state.schedules().list_active().await?;
        let count = schedules.len();
        for schedule in schedules {
            self.add_job(state, &schedule).await?;
        }
        self.register_maintenance(state);
        info!(schedules = count, "scheduler initialized");
        Ok(())
    }

    /// Register (or re-register) the job pair for one schedule and persist
    /// its next firing.
    pub async fn add_job(
        &self,
        state: &SharedState,
        schedule: &ScheduleEntity,
    ) -> Result<(), ServiceError> {
        let expr = CronExpr::parse(&schedule.cron).map_err(|err| {
            ServiceError::InvalidInput(format!("schedule `{}`: {err}", schedule.name))
        })?;

        self.cancel_jobs(schedule.id);

        let main = tokio::spawn(run_main_job(state.clone(), schedule.id, expr.clone()));
        let prefetch_job = if expr.fires_every_minute() {
            info!(
                schedule = %schedule.name,
                "minute-wildcard cron; skipping pre-fetch job"
            );
            None
        } else {
            Some(tokio::spawn(run_prefetch_job(
                state.clone(),
                schedule.id,
                expr.clone(),
            )))
        };
        self.jobs.insert(
            schedule.id,
            ScheduleJobs {
                main,
                prefetch: prefetch_job,
            },
        );

        state
            .schedules()
            .set_next_run(schedule.id, expr.next_after(state.clock().now()))
            .await?;
        debug!(schedule = %schedule.name, cron = %expr, "schedule jobs registered");
        Ok(())
    }

    /// Cancel the job pair and discard any prepared slot for a schedule.
    pub async fn remove_job(&self, state: &SharedState, schedule_id: Uuid) {
        self.cancel_jobs(schedule_id);

        if let Some(song_id) = state.slots().cancel_pending(schedule_id) {
            if let Err(err) = state.songs().release(song_id).await {
                warn!(song_id, error = %err, "failed to restore reservation");
            }
        }
        if let Some(slot) = state.slots().discard(schedule_id) {
            if let Some(song_id) = slot.reserved_song_id() {
                if let Err(err) = state.songs().release(song_id).await {
                    warn!(song_id, error = %err, "failed to restore reservation");
                }
            }
        }
    }

    /// Cancel everything and re-run [`Scheduler::initialize`].
    pub async fn reload(&self, state: &SharedState) -> Result<(), ServiceError> {
        let ids: Vec<Uuid> = self.jobs.iter().map(|entry| *entry.key()).collect();
        for schedule_id in ids {
            self.remove_job(state, schedule_id).await;
        }
        if let Some(job) = self.maintenance.lock().expect("maintenance mutex poisoned").take() {
            job.abort();
        }
        self.initialize(state).await
    }

    /// Number of schedules with registered jobs.
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Whether a schedule has a pre-fetch job registered.
    pub fn has_prefetch_job(&self, schedule_id: Uuid) -> bool {
        self.jobs
            .get(&schedule_id)
            .is_some_and(|jobs| jobs.prefetch.is_some())
    }

    fn cancel_jobs(&self, schedule_id: Uuid) {
        if let Some((_, jobs)) = self.jobs.remove(&schedule_id) {
            jobs.main.abort();
            if let Some(job) = jobs.prefetch {
                job.abort();
            }
        }
    }

    fn register_maintenance(&self, state: &SharedState) {
        let handle = tokio::spawn(run_maintenance_job(state.clone()));
        let mut guard = self.maintenance.lock().expect("maintenance mutex poisoned");
        if let Some(old) = guard.replace(handle) {
            old.abort();
        }
    }
}

/// The pre-fetch firing for a main firing T is T minus the lead; borrowing
/// across hour and day boundaries falls out of the date arithmetic.
pub(crate) fn next_prefetch_instant(
    expr: &CronExpr,
    after: NaiveDateTime,
) -> Option<NaiveDateTime> {
    let lead = chrono::Duration::from_std(prefetch::PREFETCH_LEAD).ok()?;
    expr.next_after(after + lead).map(|firing| firing - lead)
}

async fn run_main_job(state: SharedState, schedule_id: Uuid, expr: CronExpr) {
    let mut cursor = state.clock().now();
    loop {
        let Some(firing) = expr.next_after(cursor) else {
            warn!(%schedule_id, cron = %expr, "no future firing; stopping main job");
            break;
        };
        sleep_until(&state, firing).await;

        let schedule = match state.schedules().find_schedule(schedule_id).await {
            Ok(Some(schedule)) if schedule.active => schedule,
            Ok(_) => {
                debug!(%schedule_id, "schedule gone or inactive; stopping main job");
                break;
            }
            Err(err) => {
                warn!(%schedule_id, error = %err, "schedule lookup failed at firing");
                cursor = firing;
                continue;
            }
        };

        playback::execute_schedule(&state, schedule_id, schedule.volume, schedule.song_count)
            .await;
        cursor = firing;
    }
}

async fn run_prefetch_job(state: SharedState, schedule_id: Uuid, expr: CronExpr) {
    let mut cursor = state.clock().now();
    loop {
        let Some(firing) = next_prefetch_instant(&expr, cursor) else {
            warn!(%schedule_id, cron = %expr, "no future pre-fetch firing; stopping job");
            break;
        };
        sleep_until(&state, firing).await;

        let schedule = match state.schedules().find_schedule(schedule_id).await {
            Ok(Some(schedule)) if schedule.active => schedule,
            Ok(_) => {
                debug!(%schedule_id, "schedule gone or inactive; stopping pre-fetch job");
                break;
            }
            Err(err) => {
                warn!(%schedule_id, error = %err, "schedule lookup failed at pre-fetch");
                cursor = firing;
                continue;
            }
        };

        // The pipeline may run for minutes; keep the job timing clean and
        // register the task so an admin command can cancel it.
        let task = tokio::spawn(prefetch::prepare_scheduled_song(
            state.clone(),
            schedule_id,
            schedule.volume,
        ));
        state.slots().begin_pending(schedule_id, task.abort_handle());
        cursor = firing;
    }
}

async fn run_maintenance_job(state: SharedState) {
    let expr = CronExpr::parse(MAINTENANCE_CRON).expect("maintenance cron is valid");
    let mut cursor = state.clock().now();
    loop {
        let Some(firing) = expr.next_after(cursor) else {
            break;
        };
        sleep_until(&state, firing).await;

        let cutoff = state.clock().now() - chrono::Duration::days(CHAT_RETENTION_DAYS);
        match state.chat().delete_messages_older_than(cutoff).await {
            Ok(deleted) if deleted > 0 => info!(deleted, "pruned old chat messages"),
            Ok(_) => debug!("no chat messages to prune"),
            Err(err) => warn!(error = %err, "chat pruning failed"),
        }
        cursor = firing;
    }
}

/// Sleep until the wall-clock target, re-reading the injected clock so fixed
/// test clocks behave sensibly.
async fn sleep_until(state: &SharedState, target: NaiveDateTime) {
    let now = state.clock().now();
    let wait = (target - now).to_std().unwrap_or_default();
    if !wait.is_zero() {
        tokio::time::sleep(wait).await;
    }
}
