//! API layer -- axum routes, handlers, and middleware.

pub mod error;
mod metrics;
mod runs;
mod schedules;
pub mod state;
mod targets;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use self::state::AppState;

/// Build the application router with all API routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_routes())
        .fallback(fallback)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/targets", post(targets::create).get(targets::list))
        .route(
            "/targets/{id}",
            get(targets::get).put(targets::update).delete(targets::remove),
        )
        .route("/schedules", post(schedules::create).get(schedules::list))
        .route(
            "/schedules/{id}",
            get(schedules::get)
                .put(schedules::update)
                .delete(schedules::remove),
        )
        .route("/schedules/{id}/pause", post(schedules::pause))
        .route("/schedules/{id}/resume", post(schedules::resume))
        .route("/runs", get(runs::list))
        .route("/runs/{id}", get(runs::get))
        .route("/metrics", get(metrics::system))
        .route("/metrics/schedules", get(metrics::per_schedule))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "live_timers": state.engine.live_timers().await,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn fallback() -> (axum::http::StatusCode, &'static str) {
    (axum::http::StatusCode::NOT_FOUND, "not found")
}

/// Shared name rule for targets and schedules.
fn validate_name(name: &str) -> Result<(), error::ApiError> {
    if name.is_empty() || name.len() > 255 {
        return Err(error::ApiError::validation(
            "name must be between 1 and 255 characters",
        ));
    }
    Ok(())
}
