//! DTO definitions for the admin schedule CRUD surface.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::dao::models::ScheduleEntity;
use crate::dto::format_local_timestamp;

/// Payload creating or replacing a broadcast schedule.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct ScheduleRequest {
    /// Display name of the schedule.
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    /// Five-field cron expression evaluated in the server's local zone.
    #[validate(custom(function = crate::dto::validation::validate_cron_expression))]
    pub cron: String,
    /// Broadcast volume, 0-100.
    #[validate(range(max = 100))]
    pub volume: u8,
    /// Songs aired per firing, 1-10.
    #[validate(range(min = 1, max = 10))]
    pub song_count: u8,
    /// Whether the schedule's jobs should be registered.
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl ScheduleRequest {
    /// Build the persisted entity for this request under the given id.
    pub fn into_entity(self, id: Uuid) -> ScheduleEntity {
        ScheduleEntity {
            id,
            name: self.name,
            cron: self.cron,
            volume: self.volume,
            song_count: self.song_count,
            active: self.active,
            last_run: None,
            next_run: None,
        }
    }
}

/// Projection of a schedule returned to administrators.
#[derive(Debug, Serialize, ToSchema)]
pub struct ScheduleSummary {
    pub id: Uuid,
    pub name: String,
    pub cron: String,
    pub volume: u8,
    pub song_count: u8,
    pub active: bool,
    /// Local timestamp of the last firing, if any.
    pub last_run: Option<String>,
    /// Local timestamp of the next planned firing, if any.
    pub next_run: Option<String>,
}

impl From<ScheduleEntity> for ScheduleSummary {
    fn from(entity: ScheduleEntity) -> Self {
        Self {
            id: entity.id,
            name: entity.name,
            cron: entity.cron,
            volume: entity.volume,
            song_count: entity.song_count,
            active: entity.active,
            last_run: entity.last_run.map(format_local_timestamp),
            next_run: entity.next_run.map(format_local_timestamp),
        }
    }
}
