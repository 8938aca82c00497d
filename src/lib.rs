//! apipulse -- Self-hosted scheduler that fires HTTP requests on a cadence
//! and keeps a durable history of every run.
//!
//! This crate provides the schedule engine, the HTTP executor, SQLite
//! persistence, and the REST API.

pub mod api;
pub mod config;
pub mod executor;
pub mod metrics;
pub mod model;
pub mod scheduler;
pub mod storage;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::state::AppState;
use crate::config::AppConfig;
use crate::executor::HttpExecutor;
use crate::scheduler::ScheduleEngine;

/// Start the apipulse daemon: open storage, rebuild timers from persisted
/// schedules, and serve the REST API until the process is stopped.
pub async fn serve(config: AppConfig) -> Result<()> {
    if let Some(parent) = config.database.path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let pool = storage::open_pool(&config.database.path)?;
    tracing::info!(path = %config.database.path.display(), "database ready");

    let executor = Arc::new(HttpExecutor::new(pool.clone(), &config.http)?);
    let engine = ScheduleEngine::new(pool.clone(), executor);
    engine.recover().await?;

    let app = api::router(AppState { pool, engine });

    let addr: std::net::SocketAddr = config
        .server
        .listen_address
        .parse()
        .with_context(|| format!("invalid listen address: {}", config.server.listen_address))?;
    tracing::info!(%addr, "apipulse listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
