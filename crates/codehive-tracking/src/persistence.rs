//! SQLite-backed status table. Implements [`Reporter`] so it can sit behind a
//! [`Cooldown`](crate::Cooldown) and persist every delivered status.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use codehive_core::{CodehiveError, Operation, Result, TrackableType};

use crate::reporter::Reporter;
use crate::status::Status;

const STATUS_COLUMNS: &str = "id, operation, parent_id, trackable_type, trackable_id, state, \
     total, current, message, error, created_at, updated_at";

/// Persists the latest value of every status, keyed by status ID.
pub struct SqliteStatusStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteStatusStore {
    /// Open or create the status database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = rusqlite::Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::with_connection(conn)
    }

    /// In-memory store, mostly for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(rusqlite::Connection::open_in_memory()?)
    }

    fn with_connection(conn: rusqlite::Connection) -> Result<Self> {
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        self.conn().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS task_status (
                id TEXT PRIMARY KEY,
                operation TEXT NOT NULL,
                parent_id TEXT,
                trackable_type TEXT,
                trackable_id INTEGER,
                state TEXT NOT NULL,
                total INTEGER NOT NULL DEFAULT 0,
                current INTEGER NOT NULL DEFAULT 0,
                message TEXT NOT NULL DEFAULT '',
                error TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_task_status_trackable
                ON task_status (trackable_type, trackable_id);
            ",
        )?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, rusqlite::Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace the stored value for `status.id`.
    pub fn save(&self, status: &Status) -> Result<()> {
        self.conn().execute(
            "INSERT INTO task_status (id, operation, parent_id, trackable_type, trackable_id,
                 state, total, current, message, error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(id) DO UPDATE SET
                 state = excluded.state,
                 total = excluded.total,
                 current = excluded.current,
                 message = excluded.message,
                 error = excluded.error,
                 updated_at = excluded.updated_at",
            rusqlite::params![
                status.id,
                status.operation.as_str(),
                status.parent_id,
                status.trackable_type.map(|t| t.as_str()),
                status.trackable_id,
                status.state.as_str(),
                status.total as i64,
                status.current as i64,
                status.message,
                status.error,
                status.created_at.to_rfc3339(),
                status.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn find(&self, id: &str) -> Result<Option<Status>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare(&format!("SELECT {STATUS_COLUMNS} FROM task_status WHERE id = ?1"))?;
        let raw = stmt.query_map([id], row_to_raw)?.next().transpose()?;
        raw.map(RawStatus::into_status).transpose()
    }

    /// Every status recorded for one entity, oldest first.
    pub fn find_by_trackable(
        &self,
        trackable_type: TrackableType,
        trackable_id: i64,
    ) -> Result<Vec<Status>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {STATUS_COLUMNS} FROM task_status
             WHERE trackable_type = ?1 AND trackable_id = ?2
             ORDER BY created_at, id"
        ))?;
        let rows = stmt.query_map(
            rusqlite::params![trackable_type.as_str(), trackable_id],
            row_to_raw,
        )?;
        let statuses = rows
            .map(|raw| raw?.into_status())
            .collect::<Result<Vec<_>>>()?;
        Ok(statuses)
    }

    /// Remove every status recorded for one entity. Returns the number removed.
    pub fn delete_by_trackable(
        &self,
        trackable_type: TrackableType,
        trackable_id: i64,
    ) -> Result<usize> {
        let removed = self.conn().execute(
            "DELETE FROM task_status WHERE trackable_type = ?1 AND trackable_id = ?2",
            rusqlite::params![trackable_type.as_str(), trackable_id],
        )?;
        Ok(removed)
    }
}

#[async_trait]
impl Reporter for SqliteStatusStore {
    async fn on_change(&self, status: &Status) -> Result<()> {
        self.save(status)
    }
}

/// A row as stored, before parsing enums and timestamps.
struct RawStatus {
    id: String,
    operation: String,
    parent_id: Option<String>,
    trackable_type: Option<String>,
    trackable_id: Option<i64>,
    state: String,
    total: i64,
    current: i64,
    message: String,
    error: String,
    created_at: String,
    updated_at: String,
}

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawStatus> {
    Ok(RawStatus {
        id: row.get(0)?,
        operation: row.get(1)?,
        parent_id: row.get(2)?,
        trackable_type: row.get(3)?,
        trackable_id: row.get(4)?,
        state: row.get(5)?,
        total: row.get(6)?,
        current: row.get(7)?,
        message: row.get(8)?,
        error: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

impl RawStatus {
    fn into_status(self) -> Result<Status> {
        Ok(Status {
            id: self.id,
            operation: self.operation.parse::<Operation>()?,
            parent_id: self.parent_id,
            trackable_type: self
                .trackable_type
                .map(|t| t.parse::<TrackableType>())
                .transpose()?,
            trackable_id: self.trackable_id,
            state: self.state.parse()?,
            total: self.total.max(0) as u64,
            current: self.current.max(0) as u64,
            message: self.message,
            error: self.error,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
        })
    }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| CodehiveError::Store(format!("Bad timestamp '{s}': {e}")))
}
