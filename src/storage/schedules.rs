//! Durable schedule rows. The engine owns every status transition; this
//! store just persists them.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::model::{Cadence, Schedule, ScheduleId, ScheduleStatus, TargetId};
use crate::storage::{parse_opt_ts, parse_ts, Pool};

/// Fields accepted when installing a schedule.
#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub name: String,
    pub target_id: TargetId,
    pub cadence: Cadence,
    pub window_started_at: Option<DateTime<Utc>>,
}

/// Partial update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct SchedulePatch {
    pub name: Option<String>,
    pub cadence: Option<Cadence>,
    pub window_started_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct ScheduleStore {
    pool: Pool,
}

const COLUMNS: &str = "id, name, target_id, schedule_type, interval_seconds, duration_seconds, \
                       status, created_at, window_started_at, stopped_at";

impl ScheduleStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Insert a new row with status ACTIVE.
    pub fn create(&self, new: &NewSchedule) -> Result<Schedule> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO schedules
                 (name, target_id, schedule_type, interval_seconds, duration_seconds,
                  status, created_at, window_started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                new.name,
                new.target_id,
                new.cadence.kind(),
                new.cadence.interval_seconds(),
                new.cadence.duration_seconds(),
                ScheduleStatus::Active.to_string(),
                Utc::now().to_rfc3339(),
                new.window_started_at.map(|t| t.to_rfc3339()),
            ],
        )
        .context("insert schedule")?;

        let id = conn.last_insert_rowid();
        drop(conn);
        self.get(id)?
            .context("schedule row missing immediately after insert")
    }

    pub fn get(&self, id: ScheduleId) -> Result<Option<Schedule>> {
        let conn = self.pool.get()?;
        let raw = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM schedules WHERE id = ?1"),
                params![id],
                RawSchedule::from_row,
            )
            .optional()?;
        raw.map(RawSchedule::hydrate).transpose()
    }

    pub fn get_by_name(&self, name: &str) -> Result<Option<Schedule>> {
        let conn = self.pool.get()?;
        let raw = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM schedules WHERE name = ?1"),
                params![name],
                RawSchedule::from_row,
            )
            .optional()?;
        raw.map(RawSchedule::hydrate).transpose()
    }

    /// All schedules, optionally narrowed to one status.
    pub fn list(&self, status: Option<ScheduleStatus>) -> Result<Vec<Schedule>> {
        let conn = self.pool.get()?;
        let (sql, filter) = match status {
            Some(s) => (
                format!("SELECT {COLUMNS} FROM schedules WHERE status = ?1 ORDER BY id"),
                Some(s.to_string()),
            ),
            None => (
                format!("SELECT {COLUMNS} FROM schedules ORDER BY id"),
                None,
            ),
        };

        let mut stmt = conn.prepare(&sql)?;
        let mut schedules = Vec::new();
        match filter {
            Some(s) => {
                let rows = stmt.query_map(params![s], RawSchedule::from_row)?;
                for raw in rows {
                    schedules.push(raw?.hydrate()?);
                }
            }
            None => {
                let rows = stmt.query_map([], RawSchedule::from_row)?;
                for raw in rows {
                    schedules.push(raw?.hydrate()?);
                }
            }
        }
        Ok(schedules)
    }

    /// Persist a pause/resume transition. Does not touch stopped_at.
    pub fn set_status(&self, id: ScheduleId, status: ScheduleStatus) -> Result<bool> {
        let conn = self.pool.get()?;
        let affected = conn.execute(
            "UPDATE schedules SET status = ?1 WHERE id = ?2",
            params![status.to_string(), id],
        )?;
        Ok(affected > 0)
    }

    /// Terminal stop: status STOPPED plus the stop timestamp.
    pub fn mark_stopped(&self, id: ScheduleId, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.pool.get()?;
        let affected = conn.execute(
            "UPDATE schedules SET status = ?1, stopped_at = ?2 WHERE id = ?3",
            params![ScheduleStatus::Stopped.to_string(), at.to_rfc3339(), id],
        )?;
        Ok(affected > 0)
    }

    /// Rename and/or swap the cadence fields. Status is not touched here.
    pub fn update(&self, id: ScheduleId, patch: &SchedulePatch) -> Result<Option<Schedule>> {
        let Some(current) = self.get(id)? else {
            return Ok(None);
        };

        let name = patch.name.as_ref().unwrap_or(&current.name);
        let cadence = patch.cadence.unwrap_or(current.cadence);
        let window_started_at = patch.window_started_at.or(current.window_started_at);

        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE schedules
             SET name = ?1, schedule_type = ?2, interval_seconds = ?3, duration_seconds = ?4,
                 window_started_at = ?5
             WHERE id = ?6",
            params![
                name,
                cadence.kind(),
                cadence.interval_seconds(),
                cadence.duration_seconds(),
                window_started_at.map(|t| t.to_rfc3339()),
                id
            ],
        )
        .context("update schedule")?;
        drop(conn);

        self.get(id)
    }

    /// Returns false when the id does not exist. Cascades to runs/attempts.
    pub fn delete(&self, id: ScheduleId) -> Result<bool> {
        let conn = self.pool.get()?;
        let affected = conn.execute("DELETE FROM schedules WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }
}

struct RawSchedule {
    id: ScheduleId,
    name: String,
    target_id: TargetId,
    schedule_type: String,
    interval_seconds: u32,
    duration_seconds: Option<u32>,
    status: String,
    created_at: String,
    window_started_at: Option<String>,
    stopped_at: Option<String>,
}

impl RawSchedule {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            target_id: row.get(2)?,
            schedule_type: row.get(3)?,
            interval_seconds: row.get(4)?,
            duration_seconds: row.get(5)?,
            status: row.get(6)?,
            created_at: row.get(7)?,
            window_started_at: row.get(8)?,
            stopped_at: row.get(9)?,
        })
    }

    fn hydrate(self) -> Result<Schedule> {
        let cadence = match self.schedule_type.as_str() {
            "INTERVAL" => Cadence::Interval {
                interval_seconds: self.interval_seconds,
            },
            "WINDOW" => Cadence::Window {
                interval_seconds: self.interval_seconds,
                duration_seconds: self
                    .duration_seconds
                    .with_context(|| format!("window schedule {} has no duration", self.id))?,
            },
            other => anyhow::bail!("unknown schedule type in database: {other}"),
        };

        Ok(Schedule {
            id: self.id,
            name: self.name,
            target_id: self.target_id,
            cadence,
            status: self.status.parse()?,
            created_at: parse_ts(&self.created_at)?,
            window_started_at: parse_opt_ts(self.window_started_at.as_deref())?,
            stopped_at: parse_opt_ts(self.stopped_at.as_deref())?,
        })
    }
}
