//! Target registry: lookup and CRUD of configured HTTP endpoints.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use crate::model::{HttpMethod, Target, TargetId};
use crate::storage::{parse_ts, Pool};

/// Fields accepted when registering a target.
#[derive(Debug, Clone)]
pub struct NewTarget {
    pub name: String,
    pub url: String,
    pub method: HttpMethod,
    pub headers: HashMap<String, String>,
    pub body_template: Option<String>,
}

/// Partial update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct TargetPatch {
    pub name: Option<String>,
    pub url: Option<String>,
    pub method: Option<HttpMethod>,
    pub headers: Option<HashMap<String, String>>,
    pub body_template: Option<String>,
}

#[derive(Clone)]
pub struct TargetStore {
    pool: Pool,
}

const COLUMNS: &str =
    "id, name, url, method, headers_json, body_template, created_at, updated_at";

impl TargetStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn create(&self, new: &NewTarget) -> Result<Target> {
        let conn = self.pool.get()?;
        let now = Utc::now().to_rfc3339();
        let headers_json = serde_json::to_string(&new.headers)?;

        conn.execute(
            "INSERT INTO targets (name, url, method, headers_json, body_template, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                new.name,
                new.url,
                new.method.to_string(),
                headers_json,
                new.body_template,
                now
            ],
        )
        .context("insert target")?;

        let id = conn.last_insert_rowid();
        drop(conn);
        self.get(id)?
            .context("target row missing immediately after insert")
    }

    pub fn get(&self, id: TargetId) -> Result<Option<Target>> {
        let conn = self.pool.get()?;
        let raw = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM targets WHERE id = ?1"),
                params![id],
                RawTarget::from_row,
            )
            .optional()?;
        raw.map(RawTarget::hydrate).transpose()
    }

    pub fn get_by_name(&self, name: &str) -> Result<Option<Target>> {
        let conn = self.pool.get()?;
        let raw = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM targets WHERE name = ?1"),
                params![name],
                RawTarget::from_row,
            )
            .optional()?;
        raw.map(RawTarget::hydrate).transpose()
    }

    pub fn list(&self) -> Result<Vec<Target>> {
        let conn = self.pool.get()?;
        let mut stmt =
            conn.prepare(&format!("SELECT {COLUMNS} FROM targets ORDER BY id"))?;
        let rows = stmt.query_map([], RawTarget::from_row)?;

        let mut targets = Vec::new();
        for raw in rows {
            targets.push(raw?.hydrate()?);
        }
        Ok(targets)
    }

    pub fn update(&self, id: TargetId, patch: &TargetPatch) -> Result<Option<Target>> {
        let Some(current) = self.get(id)? else {
            return Ok(None);
        };

        let name = patch.name.as_ref().unwrap_or(&current.name);
        let url = patch.url.as_ref().unwrap_or(&current.url);
        let method = patch.method.unwrap_or(current.method);
        let headers = patch.headers.as_ref().unwrap_or(&current.headers);
        let body_template = patch
            .body_template
            .as_ref()
            .or(current.body_template.as_ref());
        let headers_json = serde_json::to_string(headers)?;

        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE targets
             SET name = ?1, url = ?2, method = ?3, headers_json = ?4, body_template = ?5, updated_at = ?6
             WHERE id = ?7",
            params![
                name,
                url,
                method.to_string(),
                headers_json,
                body_template,
                Utc::now().to_rfc3339(),
                id
            ],
        )
        .context("update target")?;
        drop(conn);

        self.get(id)
    }

    /// Returns false when the id does not exist.
    pub fn delete(&self, id: TargetId) -> Result<bool> {
        let conn = self.pool.get()?;
        let affected = conn.execute("DELETE FROM targets WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }
}

struct RawTarget {
    id: TargetId,
    name: String,
    url: String,
    method: String,
    headers_json: Option<String>,
    body_template: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawTarget {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            url: row.get(2)?,
            method: row.get(3)?,
            headers_json: row.get(4)?,
            body_template: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn hydrate(self) -> Result<Target> {
        let headers = match self.headers_json.as_deref() {
            Some(json) => serde_json::from_str(json)
                .with_context(|| format!("malformed headers for target {}", self.id))?,
            None => HashMap::new(),
        };
        Ok(Target {
            id: self.id,
            name: self.name,
            url: self.url,
            method: self.method.parse()?,
            headers,
            body_template: self.body_template,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}
