//! Run history handlers. Read-only; runs are written by the executor.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::model::{Attempt, Run, RunId, RunStatus, ScheduleId};
use crate::storage::{RunFilter, RunStore};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ListRunsQuery {
    pub schedule_id: Option<ScheduleId>,
    pub status: Option<RunStatus>,
    /// Only runs started at or after this instant (RFC 3339).
    pub start_time: Option<DateTime<Utc>>,
    /// Only runs started at or before this instant (RFC 3339).
    pub end_time: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RunDetail {
    #[serde(flatten)]
    pub run: Run,
    pub attempts: Vec<Attempt>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListRunsQuery>,
) -> ApiResult<Json<Vec<Run>>> {
    let runs = RunStore::new(state.pool.clone()).list(&RunFilter {
        schedule_id: query.schedule_id,
        status: query.status,
        started_after: query.start_time,
        started_before: query.end_time,
        limit: query.limit,
    })?;
    Ok(Json(runs))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<RunId>,
) -> ApiResult<Json<RunDetail>> {
    let store = RunStore::new(state.pool.clone());
    let run = store.get(id)?.ok_or_else(|| ApiError::not_found("run", id))?;
    let attempts = store.attempts(id)?;
    Ok(Json(RunDetail { run, attempts }))
}
