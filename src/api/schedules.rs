//! Schedule lifecycle handlers. All mutations go through the engine so
//! timers and rows never drift apart.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::model::{Cadence, Schedule, ScheduleId, ScheduleStatus, TargetId};
use crate::scheduler::{CreateSchedule, UpdateSchedule};
use crate::storage::ScheduleStore;

#[derive(Debug, Deserialize)]
pub struct CreateScheduleRequest {
    pub name: String,
    pub target_id: TargetId,
    #[serde(flatten)]
    pub cadence: Cadence,
}

/// Renames and/or replaces the cadence. Changing timing requires the
/// whole cadence (`schedule_type` plus its fields) so an update can never
/// leave a window without a duration.
#[derive(Debug, Deserialize)]
pub struct UpdateScheduleRequest {
    pub name: Option<String>,
    #[serde(flatten)]
    pub cadence: Option<Cadence>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ListQuery {
    pub status: Option<ScheduleStatus>,
}

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateScheduleRequest>,
) -> ApiResult<(StatusCode, Json<Schedule>)> {
    super::validate_name(&req.name)?;
    let schedule = state
        .engine
        .create(CreateSchedule {
            name: req.name,
            target_id: req.target_id,
            cadence: req.cadence,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(schedule)))
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Schedule>>> {
    Ok(Json(
        ScheduleStore::new(state.pool.clone()).list(query.status)?,
    ))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<ScheduleId>,
) -> ApiResult<Json<Schedule>> {
    ScheduleStore::new(state.pool.clone())
        .get(id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("schedule", id))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<ScheduleId>,
    Json(req): Json<UpdateScheduleRequest>,
) -> ApiResult<Json<Schedule>> {
    if let Some(name) = &req.name {
        super::validate_name(name)?;
    }
    let schedule = state
        .engine
        .update(
            id,
            UpdateSchedule {
                name: req.name,
                cadence: req.cadence,
            },
        )
        .await?;
    Ok(Json(schedule))
}

pub async fn pause(
    State(state): State<AppState>,
    Path(id): Path<ScheduleId>,
) -> ApiResult<Json<Schedule>> {
    Ok(Json(state.engine.pause(id).await?))
}

pub async fn resume(
    State(state): State<AppState>,
    Path(id): Path<ScheduleId>,
) -> ApiResult<Json<Schedule>> {
    Ok(Json(state.engine.resume(id).await?))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<ScheduleId>,
) -> ApiResult<Json<Value>> {
    state.engine.delete(id).await?;
    Ok(Json(json!({ "message": format!("schedule {id} deleted") })))
}
