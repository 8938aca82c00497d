//! Target CRUD handlers.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::model::{HttpMethod, Target, TargetId};
use crate::storage::{NewTarget, ScheduleStore, TargetPatch, TargetStore};

#[derive(Debug, Deserialize)]
pub struct CreateTargetRequest {
    pub name: String,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub body_template: Option<String>,
}

fn default_method() -> HttpMethod {
    HttpMethod::Get
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UpdateTargetRequest {
    pub name: Option<String>,
    pub url: Option<String>,
    pub method: Option<HttpMethod>,
    pub headers: Option<HashMap<String, String>>,
    pub body_template: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateTargetRequest>,
) -> ApiResult<(StatusCode, Json<Target>)> {
    super::validate_name(&req.name)?;
    validate_url(&req.url)?;

    let store = TargetStore::new(state.pool.clone());
    if store.get_by_name(&req.name)?.is_some() {
        return Err(ApiError::validation(format!(
            "target name '{}' is already taken",
            req.name
        )));
    }

    let target = store.create(&NewTarget {
        name: req.name,
        url: req.url,
        method: req.method,
        headers: req.headers,
        body_template: req.body_template,
    })?;
    info!(target = %target.name, id = target.id, "target registered");
    Ok((StatusCode::CREATED, Json(target)))
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<Target>>> {
    Ok(Json(TargetStore::new(state.pool.clone()).list()?))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<TargetId>,
) -> ApiResult<Json<Target>> {
    TargetStore::new(state.pool.clone())
        .get(id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("target", id))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<TargetId>,
    Json(req): Json<UpdateTargetRequest>,
) -> ApiResult<Json<Target>> {
    let store = TargetStore::new(state.pool.clone());
    if let Some(name) = &req.name {
        super::validate_name(name)?;
        if let Some(existing) = store.get_by_name(name)? {
            if existing.id != id {
                return Err(ApiError::validation(format!(
                    "target name '{name}' is already taken"
                )));
            }
        }
    }
    if let Some(url) = &req.url {
        validate_url(url)?;
    }

    let updated = store
        .update(
            id,
            &TargetPatch {
                name: req.name,
                url: req.url,
                method: req.method,
                headers: req.headers,
                body_template: req.body_template,
            },
        )?
        .ok_or_else(|| ApiError::not_found("target", id))?;
    info!(target = %updated.name, id, "target updated");
    Ok(Json(updated))
}

/// Deleting a target takes its schedules with it, which means tearing
/// down their timers through the engine rather than leaning on the
/// foreign-key cascade alone.
pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<TargetId>,
) -> ApiResult<Json<Value>> {
    let store = TargetStore::new(state.pool.clone());
    if store.get(id)?.is_none() {
        return Err(ApiError::not_found("target", id));
    }

    let schedules = ScheduleStore::new(state.pool.clone()).list(None)?;
    for schedule in schedules.iter().filter(|s| s.target_id == id) {
        state.engine.delete(schedule.id).await?;
    }

    store.delete(id)?;
    info!(id, "target deleted");
    Ok(Json(json!({ "message": format!("target {id} deleted") })))
}

fn validate_url(url: &str) -> Result<(), ApiError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ApiError::validation(
            "url must start with http:// or https://",
        ));
    }
    Ok(())
}
