//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS targets (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            url TEXT NOT NULL,
            method TEXT NOT NULL DEFAULT 'GET',
            headers_json TEXT,
            body_template TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS schedules (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            target_id INTEGER NOT NULL REFERENCES targets(id) ON DELETE CASCADE,
            schedule_type TEXT NOT NULL,
            interval_seconds INTEGER NOT NULL,
            duration_seconds INTEGER,
            status TEXT NOT NULL DEFAULT 'ACTIVE',
            created_at TEXT NOT NULL,
            window_started_at TEXT
        );

        CREATE TABLE IF NOT EXISTS runs (
            id INTEGER PRIMARY KEY,
            schedule_id INTEGER NOT NULL REFERENCES schedules(id) ON DELETE CASCADE,
            status TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            latency_ms REAL,
            http_status INTEGER,
            response_size_bytes INTEGER,
            response_snippet TEXT,
            error_type TEXT,
            error_message TEXT,
            request_url TEXT NOT NULL,
            request_method TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS attempts (
            id INTEGER PRIMARY KEY,
            run_id INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
            attempt_number INTEGER NOT NULL,
            status TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            latency_ms REAL,
            http_status INTEGER,
            error_type TEXT,
            error_message TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_schedules_status ON schedules(status);
        CREATE INDEX IF NOT EXISTS idx_runs_schedule ON runs(schedule_id);
        CREATE INDEX IF NOT EXISTS idx_runs_started ON runs(started_at);
        CREATE INDEX IF NOT EXISTS idx_attempts_run ON attempts(run_id);",
    )?;

    // Migration: add 'stopped_at' to schedules if missing
    let has_stopped_at: i32 = conn
        .query_row(
            "SELECT count(*) FROM pragma_table_info('schedules') WHERE name='stopped_at'",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if has_stopped_at == 0 {
        conn.execute("ALTER TABLE schedules ADD COLUMN stopped_at TEXT", [])?;
    }

    Ok(())
}
