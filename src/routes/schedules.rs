//! Admin CRUD surface for broadcast schedules.
//!
//! Validation happens here, before anything reaches the scheduler: cron
//! dialect, volume in [0,100], song count in [1,10].

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::store::ScheduleStore,
    dto::schedule::{ScheduleRequest, ScheduleSummary},
    error::AppError,
    state::SharedState,
};

/// Routes handling schedule administration.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/schedules", get(list_schedules).post(create_schedule))
        .route("/schedules/reload", post(reload_schedules))
        .route("/schedules/{id}", put(update_schedule).delete(delete_schedule))
}

#[utoipa::path(
    get,
    path = "/schedules",
    tag = "schedules",
    responses((status = 200, description = "All schedules", body = [ScheduleSummary]))
)]
/// List every schedule with its last and next firing.
pub async fn list_schedules(
    State(state): State<SharedState>,
) -> Result<Json<Vec<ScheduleSummary>>, AppError> {
    let schedules = state.schedules().list_schedules().await?;
    Ok(Json(schedules.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    post,
    path = "/schedules",
    tag = "schedules",
    request_body = ScheduleRequest,
    responses(
        (status = 200, description = "Schedule created", body = ScheduleSummary),
        (status = 400, description = "Invalid cron, volume, or song count")
    )
)]
/// Create a schedule and register its cron jobs.
pub async fn create_schedule(
    State(state): State<SharedState>,
    Json(payload): Json<ScheduleRequest>,
) -> Result<Json<ScheduleSummary>, AppError> {
    payload
        .validate()
        .map_err(|errors| AppError::BadRequest(errors.to_string()))?;

    let entity = payload.into_entity(Uuid::new_v4());
    state.schedules().insert_schedule(entity.clone()).await?;

    if entity.active {
        state.scheduler().add_job(&state, &entity).await?;
    }

    summary(&state, entity.id).await
}

#[utoipa::path(
    put,
    path = "/schedules/{id}",
    tag = "schedules",
    params(("id" = String, Path, description = "Identifier of the schedule")),
    request_body = ScheduleRequest,
    responses(
        (status = 200, description = "Schedule replaced", body = ScheduleSummary),
        (status = 404, description = "Unknown schedule")
    )
)]
/// Replace a schedule and re-register its jobs.
pub async fn update_schedule(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ScheduleRequest>,
) -> Result<Json<ScheduleSummary>, AppError> {
    payload
        .validate()
        .map_err(|errors| AppError::BadRequest(errors.to_string()))?;

    let existing = state
        .schedules()
        .find_schedule(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("schedule `{id}` not found")))?;

    let mut entity = payload.into_entity(id);
    entity.last_run = existing.last_run;
    state.schedules().update_schedule(entity.clone()).await?;

    if entity.active {
        state.scheduler().add_job(&state, &entity).await?;
    } else {
        state.scheduler().remove_job(&state, id).await;
    }

    summary(&state, id).await
}

#[utoipa::path(
    delete,
    path = "/schedules/{id}",
    tag = "schedules",
    params(("id" = String, Path, description = "Identifier of the schedule")),
    responses(
        (status = 204, description = "Schedule deleted"),
        (status = 404, description = "Unknown schedule")
    )
)]
/// Delete a schedule, cancelling its jobs and discarding its locked slot.
pub async fn delete_schedule(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let deleted = state.schedules().delete_schedule(id).await?;
    if !deleted {
        return Err(AppError::NotFound(format!("schedule `{id}` not found")));
    }

    state.scheduler().remove_job(&state, id).await;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/schedules/reload",
    tag = "schedules",
    responses((status = 204, description = "All jobs re-registered"))
)]
/// Cancel every job and re-register from the store.
pub async fn reload_schedules(State(state): State<SharedState>) -> Result<StatusCode, AppError> {
    state.scheduler().reload(&state).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn summary(state: &SharedState, id: Uuid) -> Result<Json<ScheduleSummary>, AppError> {
    let entity = state
        .schedules()
        .find_schedule(id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("schedule `{id}` vanished")))?;
    Ok(Json(entity.into()))
}
