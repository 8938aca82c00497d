//! SQLite storage layer -- schema, stores, migrations.

pub mod runs;
pub mod schedules;
pub mod schema;
pub mod targets;

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;

pub use runs::{NewRun, RunFilter, RunOutcome, RunStore};
pub use schedules::{NewSchedule, SchedulePatch, ScheduleStore};
pub use targets::{NewTarget, TargetPatch, TargetStore};

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &Path) -> Result<Pool> {
    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Parse an RFC 3339 timestamp column back into UTC.
pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("malformed timestamp in database: {raw}"))
}

/// Same as [`parse_ts`] for nullable columns.
pub(crate) fn parse_opt_ts(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(parse_ts).transpose()
}
