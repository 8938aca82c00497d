//! Metrics handlers, thin wrappers over the aggregator.

use axum::extract::State;
use axum::Json;

use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::metrics::{MetricsStore, ScheduleMetrics, SystemMetrics};

pub async fn system(State(state): State<AppState>) -> ApiResult<Json<SystemMetrics>> {
    Ok(Json(MetricsStore::new(state.pool.clone()).system()?))
}

pub async fn per_schedule(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<ScheduleMetrics>>> {
    Ok(Json(MetricsStore::new(state.pool.clone()).per_schedule()?))
}
