//! Append-only run history. A run is inserted as a RUNNING marker before
//! the network call and finalized together with its single attempt in one
//! transaction afterwards.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};

use crate::model::{Attempt, HttpMethod, Run, RunId, RunStatus, ScheduleId};
use crate::storage::{parse_opt_ts, parse_ts, Pool};

/// Fields written with the RUNNING marker, before the network call.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub schedule_id: ScheduleId,
    pub started_at: DateTime<Utc>,
    pub request_url: String,
    pub request_method: HttpMethod,
}

/// Everything known once the call has returned or failed.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub finished_at: DateTime<Utc>,
    pub latency_ms: f64,
    pub http_status: Option<u16>,
    pub response_size_bytes: Option<u64>,
    pub response_snippet: Option<String>,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

/// Narrowing for [`RunStore::list`]. The limit defaults to 100 and is
/// capped at 1000.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub schedule_id: Option<ScheduleId>,
    pub status: Option<RunStatus>,
    pub started_after: Option<DateTime<Utc>>,
    pub started_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

#[derive(Clone)]
pub struct RunStore {
    pool: Pool,
}

const COLUMNS: &str = "id, schedule_id, status, started_at, finished_at, latency_ms, \
                       http_status, response_size_bytes, response_snippet, error_type, \
                       error_message, request_url, request_method";

impl RunStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Insert the intermediate marker row and return its id.
    pub fn begin(&self, new: &NewRun) -> Result<RunId> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO runs (schedule_id, status, started_at, request_url, request_method)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                new.schedule_id,
                RunStatus::Running.to_string(),
                new.started_at.to_rfc3339(),
                new.request_url,
                new.request_method.to_string(),
            ],
        )
        .context("insert run marker")?;
        Ok(conn.last_insert_rowid())
    }

    /// Finalize the run and write its single attempt in one transaction.
    pub fn finalize(&self, run_id: RunId, outcome: &RunOutcome) -> Result<()> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        tx.execute(
            "UPDATE runs
             SET status = ?1, finished_at = ?2, latency_ms = ?3, http_status = ?4,
                 response_size_bytes = ?5, response_snippet = ?6, error_type = ?7,
                 error_message = ?8
             WHERE id = ?9",
            params![
                outcome.status.to_string(),
                outcome.finished_at.to_rfc3339(),
                outcome.latency_ms,
                outcome.http_status,
                outcome.response_size_bytes,
                outcome.response_snippet,
                outcome.error_type,
                outcome.error_message,
                run_id,
            ],
        )
        .context("finalize run")?;

        let started_at: String = tx.query_row(
            "SELECT started_at FROM runs WHERE id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;

        tx.execute(
            "INSERT INTO attempts
                 (run_id, attempt_number, status, started_at, finished_at, latency_ms,
                  http_status, error_type, error_message)
             VALUES (?1, 1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run_id,
                outcome.status.to_string(),
                started_at,
                outcome.finished_at.to_rfc3339(),
                outcome.latency_ms,
                outcome.http_status,
                outcome.error_type,
                outcome.error_message,
            ],
        )
        .context("insert attempt")?;

        tx.commit()?;
        Ok(())
    }

    pub fn get(&self, id: RunId) -> Result<Option<Run>> {
        let conn = self.pool.get()?;
        let raw = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM runs WHERE id = ?1"),
                params![id],
                RawRun::from_row,
            )
            .optional()?;
        raw.map(RawRun::hydrate).transpose()
    }

    /// Newest-first snapshot matching the filter.
    pub fn list(&self, filter: &RunFilter) -> Result<Vec<Run>> {
        let mut sql = format!("SELECT {COLUMNS} FROM runs WHERE 1=1");
        let mut values: Vec<Value> = Vec::new();

        if let Some(schedule_id) = filter.schedule_id {
            sql.push_str(" AND schedule_id = ?");
            values.push(schedule_id.into());
        }
        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            values.push(status.to_string().into());
        }
        if let Some(after) = filter.started_after {
            sql.push_str(" AND started_at >= ?");
            values.push(after.to_rfc3339().into());
        }
        if let Some(before) = filter.started_before {
            sql.push_str(" AND started_at <= ?");
            values.push(before.to_rfc3339().into());
        }
        sql.push_str(" ORDER BY started_at DESC, id DESC LIMIT ?");
        let limit = filter.limit.unwrap_or(100).clamp(1, 1000);
        values.push((limit as i64).into());

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), RawRun::from_row)?;

        let mut runs = Vec::new();
        for raw in rows {
            runs.push(raw?.hydrate()?);
        }
        Ok(runs)
    }

    /// Attempts for one run, in attempt order.
    pub fn attempts(&self, run_id: RunId) -> Result<Vec<Attempt>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, run_id, attempt_number, status, started_at, finished_at,
                    latency_ms, http_status, error_type, error_message
             FROM attempts WHERE run_id = ?1 ORDER BY attempt_number",
        )?;
        let rows = stmt.query_map(params![run_id], RawAttempt::from_row)?;

        let mut attempts = Vec::new();
        for raw in rows {
            attempts.push(raw?.hydrate()?);
        }
        Ok(attempts)
    }
}

struct RawRun {
    id: RunId,
    schedule_id: ScheduleId,
    status: String,
    started_at: String,
    finished_at: Option<String>,
    latency_ms: Option<f64>,
    http_status: Option<u16>,
    response_size_bytes: Option<u64>,
    response_snippet: Option<String>,
    error_type: Option<String>,
    error_message: Option<String>,
    request_url: String,
    request_method: String,
}

impl RawRun {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            schedule_id: row.get(1)?,
            status: row.get(2)?,
            started_at: row.get(3)?,
            finished_at: row.get(4)?,
            latency_ms: row.get(5)?,
            http_status: row.get(6)?,
            response_size_bytes: row.get(7)?,
            response_snippet: row.get(8)?,
            error_type: row.get(9)?,
            error_message: row.get(10)?,
            request_url: row.get(11)?,
            request_method: row.get(12)?,
        })
    }

    fn hydrate(self) -> Result<Run> {
        Ok(Run {
            id: self.id,
            schedule_id: self.schedule_id,
            status: self.status.parse()?,
            started_at: parse_ts(&self.started_at)?,
            finished_at: parse_opt_ts(self.finished_at.as_deref())?,
            latency_ms: self.latency_ms,
            http_status: self.http_status,
            response_size_bytes: self.response_size_bytes,
            response_snippet: self.response_snippet,
            error_type: self.error_type,
            error_message: self.error_message,
            request_url: self.request_url,
            request_method: self.request_method.parse()?,
        })
    }
}

struct RawAttempt {
    id: i64,
    run_id: RunId,
    attempt_number: u32,
    status: String,
    started_at: String,
    finished_at: Option<String>,
    latency_ms: Option<f64>,
    http_status: Option<u16>,
    error_type: Option<String>,
    error_message: Option<String>,
}

impl RawAttempt {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            run_id: row.get(1)?,
            attempt_number: row.get(2)?,
            status: row.get(3)?,
            started_at: row.get(4)?,
            finished_at: row.get(5)?,
            latency_ms: row.get(6)?,
            http_status: row.get(7)?,
            error_type: row.get(8)?,
            error_message: row.get(9)?,
        })
    }

    fn hydrate(self) -> Result<Attempt> {
        Ok(Attempt {
            id: self.id,
            run_id: self.run_id,
            attempt_number: self.attempt_number,
            status: self.status.parse()?,
            started_at: parse_ts(&self.started_at)?,
            finished_at: parse_opt_ts(self.finished_at.as_deref())?,
            latency_ms: self.latency_ms,
            http_status: self.http_status,
            error_type: self.error_type,
            error_message: self.error_message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Cadence;
    use crate::storage::{open_pool, NewSchedule, NewTarget, ScheduleStore, TargetStore};
    use tempfile::TempDir;

    fn seeded() -> (TempDir, RunStore, ScheduleId) {
        let dir = TempDir::new().unwrap();
        let pool = open_pool(&dir.path().join("test.db")).unwrap();

        let target = TargetStore::new(pool.clone())
            .create(&NewTarget {
                name: "t".into(),
                url: "http://localhost:9/".into(),
                method: HttpMethod::Get,
                headers: Default::default(),
                body_template: None,
            })
            .unwrap();
        let schedule = ScheduleStore::new(pool.clone())
            .create(&NewSchedule {
                name: "s".into(),
                target_id: target.id,
                cadence: Cadence::Interval {
                    interval_seconds: 5,
                },
                window_started_at: None,
            })
            .unwrap();

        (dir, RunStore::new(pool), schedule.id)
    }

    fn new_run(schedule_id: ScheduleId) -> NewRun {
        NewRun {
            schedule_id,
            started_at: Utc::now(),
            request_url: "http://localhost:9/".into(),
            request_method: HttpMethod::Get,
        }
    }

    fn success_outcome() -> RunOutcome {
        RunOutcome {
            status: RunStatus::Success,
            finished_at: Utc::now(),
            latency_ms: 12.5,
            http_status: Some(200),
            response_size_bytes: Some(42),
            response_snippet: Some("ok".into()),
            error_type: None,
            error_message: None,
        }
    }

    #[test]
    fn begin_leaves_running_marker() {
        let (_dir, runs, schedule_id) = seeded();
        let run_id = runs.begin(&new_run(schedule_id)).unwrap();

        let run = runs.get(run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.finished_at.is_none());
        assert!(run.http_status.is_none());
        assert!(runs.attempts(run_id).unwrap().is_empty());
    }

    #[test]
    fn finalize_writes_run_and_attempt_together() {
        let (_dir, runs, schedule_id) = seeded();
        let run_id = runs.begin(&new_run(schedule_id)).unwrap();
        runs.finalize(run_id, &success_outcome()).unwrap();

        let run = runs.get(run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.http_status, Some(200));
        assert_eq!(run.latency_ms, Some(12.5));

        let attempts = runs.attempts(run_id).unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].attempt_number, 1);
        assert_eq!(attempts[0].status, RunStatus::Success);
        assert_eq!(attempts[0].started_at, run.started_at);
    }

    #[test]
    fn list_is_newest_first_and_filtered() {
        let (_dir, runs, schedule_id) = seeded();

        let first = runs.begin(&new_run(schedule_id)).unwrap();
        runs.finalize(first, &success_outcome()).unwrap();

        let second = runs.begin(&new_run(schedule_id)).unwrap();
        let mut failed = success_outcome();
        failed.status = RunStatus::Failed;
        failed.http_status = Some(500);
        failed.error_type = Some("http_5xx".into());
        runs.finalize(second, &failed).unwrap();

        let all = runs.list(&RunFilter::default()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, second, "newest first");

        let only_failed = runs
            .list(&RunFilter {
                status: Some(RunStatus::Failed),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(only_failed.len(), 1);
        assert_eq!(only_failed[0].id, second);

        let limited = runs
            .list(&RunFilter {
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn list_honors_time_bounds() {
        let (_dir, runs, schedule_id) = seeded();
        let run_id = runs.begin(&new_run(schedule_id)).unwrap();
        runs.finalize(run_id, &success_outcome()).unwrap();

        let past_only = runs
            .list(&RunFilter {
                started_before: Some(Utc::now() - chrono::Duration::hours(1)),
                ..Default::default()
            })
            .unwrap();
        assert!(past_only.is_empty());

        let recent = runs
            .list(&RunFilter {
                started_after: Some(Utc::now() - chrono::Duration::hours(1)),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(recent.len(), 1);
    }
}
