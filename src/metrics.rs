//! Aggregate statistics derived from the run history.
//!
//! Nothing here is cached; every call computes fresh numbers from SQLite
//! so the figures always reflect the table contents at request time.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use serde::Serialize;

use crate::model::ScheduleId;
use crate::storage::{parse_opt_ts, Pool};

/// System-wide counters and rates.
#[derive(Debug, Clone, Serialize)]
pub struct SystemMetrics {
    pub total_targets: i64,
    pub total_schedules: i64,
    pub active_schedules: i64,
    pub paused_schedules: i64,
    pub stopped_schedules: i64,
    pub total_runs: i64,
    pub runs_last_hour: i64,
    /// SUCCESS runs over all runs, percent, two decimals. 0 when empty.
    pub success_rate: f64,
    /// Mean latency over SUCCESS runs, two decimals.
    pub avg_latency_ms: Option<f64>,
}

/// Per-schedule counters and rates.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleMetrics {
    pub schedule_id: ScheduleId,
    pub schedule_name: String,
    pub total_runs: i64,
    pub successful_runs: i64,
    pub failed_runs: i64,
    pub avg_latency_ms: Option<f64>,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Read-only aggregator over the shared pool.
#[derive(Clone)]
pub struct MetricsStore {
    pool: Pool,
}

impl MetricsStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn system(&self) -> Result<SystemMetrics> {
        let conn = self.pool.get().context("checkout for system metrics")?;

        let total_targets: i64 =
            conn.query_row("SELECT COUNT(*) FROM targets", [], |row| row.get(0))?;
        let total_runs: i64 = conn.query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))?;

        let mut total_schedules = 0i64;
        let mut active_schedules = 0i64;
        let mut paused_schedules = 0i64;
        let mut stopped_schedules = 0i64;
        {
            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM schedules GROUP BY status")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (status, count) = row?;
                total_schedules += count;
                match status.as_str() {
                    "ACTIVE" => active_schedules = count,
                    "PAUSED" => paused_schedules = count,
                    "STOPPED" => stopped_schedules = count,
                    _ => {}
                }
            }
        }

        let cutoff = (Utc::now() - Duration::hours(1)).to_rfc3339();
        let runs_last_hour: i64 = conn.query_row(
            "SELECT COUNT(*) FROM runs WHERE started_at >= ?1",
            params![cutoff],
            |row| row.get(0),
        )?;

        let successful_runs: i64 = conn.query_row(
            "SELECT COUNT(*) FROM runs WHERE status = 'SUCCESS'",
            [],
            |row| row.get(0),
        )?;
        let success_rate = if total_runs > 0 {
            round2(successful_runs as f64 / total_runs as f64 * 100.0)
        } else {
            0.0
        };

        let avg_latency_ms: Option<f64> = conn.query_row(
            "SELECT AVG(latency_ms) FROM runs WHERE status = 'SUCCESS'",
            [],
            |row| row.get(0),
        )?;

        Ok(SystemMetrics {
            total_targets,
            total_schedules,
            active_schedules,
            paused_schedules,
            stopped_schedules,
            total_runs,
            runs_last_hour,
            success_rate,
            avg_latency_ms: avg_latency_ms.map(round2),
        })
    }

    /// One row per schedule, including schedules that have never fired.
    pub fn per_schedule(&self) -> Result<Vec<ScheduleMetrics>> {
        let conn = self.pool.get().context("checkout for schedule metrics")?;

        let mut stmt = conn.prepare(
            "SELECT s.id, s.name,
                    COUNT(r.id),
                    SUM(CASE WHEN r.status = 'SUCCESS' THEN 1 ELSE 0 END),
                    AVG(CASE WHEN r.status = 'SUCCESS' THEN r.latency_ms END),
                    MAX(r.started_at)
             FROM schedules s
             LEFT JOIN runs r ON r.schedule_id = s.id
             GROUP BY s.id
             ORDER BY s.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<i64>>(3)?,
                row.get::<_, Option<f64>>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })?;

        let mut metrics = Vec::new();
        for row in rows {
            let (schedule_id, schedule_name, total_runs, successful, avg_latency, last_run) =
                row?;
            let successful_runs = successful.unwrap_or(0);
            metrics.push(ScheduleMetrics {
                schedule_id,
                schedule_name,
                total_runs,
                successful_runs,
                failed_runs: total_runs - successful_runs,
                avg_latency_ms: avg_latency.map(round2),
                last_run_at: parse_opt_ts(last_run.as_deref())?,
            });
        }
        Ok(metrics)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
