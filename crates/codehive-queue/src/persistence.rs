//! SQLite-backed task and repository stores. Survives restarts and lets
//! several worker processes share one queue file.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use codehive_core::{CodehiveError, Operation, Result};
use rusqlite::TransactionBehavior;

use crate::queue::ListParams;
use crate::repository::{Repository, RepositoryStore};
use crate::store::TaskStore;
use crate::task::{Payload, Task};

const TASK_COLUMNS: &str = "id, operation, dedup_key, priority, payload, created_at, updated_at";

fn open_connection(path: &Path) -> Result<rusqlite::Connection> {
    let conn = rusqlite::Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| CodehiveError::Store(format!("Bad timestamp '{s}': {e}")))
}

// ─── Tasks ──────────────────────────────────────────────────

/// SQLite task queue.
pub struct SqliteTaskStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteTaskStore {
    /// Open or create the queue database.
    pub fn open(path: &Path) -> Result<Self> {
        Self::with_connection(open_connection(path)?)
    }

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
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                operation TEXT NOT NULL,
                dedup_key TEXT NOT NULL UNIQUE,
                priority INTEGER NOT NULL,
                payload TEXT NOT NULL DEFAULT '{}',
                claimed_at TEXT,                 -- set by dequeue, row deleted when done
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_pending
                ON tasks (claimed_at, priority DESC, id);
            ",
        )?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, rusqlite::Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return tasks claimed by a process that died before finishing them.
    /// Only call this when no other worker shares the database.
    pub fn release_stale_claims(&self) -> Result<usize> {
        let released = self
            .conn()
            .execute("UPDATE tasks SET claimed_at = NULL WHERE claimed_at IS NOT NULL", [])?;
        if released > 0 {
            tracing::warn!("♻️ Released {released} task(s) claimed by a previous run");
        }
        Ok(released)
    }

    /// Claim the next pending row without decoding it.
    fn claim_next(&self) -> Result<Option<RawTask>> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let next = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE claimed_at IS NULL
                 ORDER BY priority DESC, id ASC LIMIT 1"
            ))?;
            let mut rows = stmt.query_map([], row_to_raw)?;
            rows.next().transpose()?
        };

        if let Some(raw) = &next {
            let now = Utc::now().to_rfc3339();
            tx.execute(
                "UPDATE tasks SET claimed_at = ?1, updated_at = ?1 WHERE id = ?2",
                rusqlite::params![now, raw.id],
            )?;
        }
        tx.commit()?;
        Ok(next)
    }

    fn query_tasks(
        conn: &rusqlite::Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Task>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, row_to_raw)?;
        let tasks = rows
            .map(|raw| raw?.into_task())
            .collect::<Result<Vec<_>>>()?;
        Ok(tasks)
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn save(&self, task: &Task) -> Result<Task> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO tasks (operation, dedup_key, priority, payload, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(dedup_key) DO UPDATE SET
                 priority = excluded.priority,
                 updated_at = excluded.updated_at",
            rusqlite::params![
                task.operation.as_str(),
                task.dedup_key,
                task.priority,
                task.payload.to_json()?,
                now,
            ],
        )?;
        let mut saved = Self::query_tasks(
            &conn,
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE dedup_key = ?1"),
            [&task.dedup_key],
        )?;
        saved
            .pop()
            .ok_or_else(|| CodehiveError::Store(format!("Task '{}' vanished after save", task.dedup_key)))
    }

    async fn dequeue(&self) -> Result<Option<Task>> {
        loop {
            let Some(raw) = self.claim_next()? else {
                return Ok(None);
            };
            let id = raw.id;
            match raw.into_task() {
                Ok(task) => return Ok(Some(task)),
                Err(e) => {
                    // Already claimed, so dropping it cannot race another worker.
                    tracing::error!(task_id = id, "❌ Dropping unreadable task: {e}");
                    self.conn().execute("DELETE FROM tasks WHERE id = ?1", [id])?;
                }
            }
        }
    }

    async fn find_pending(&self, params: &ListParams) -> Result<Vec<Task>> {
        let limit = params.limit.map(|l| l as i64).unwrap_or(-1);
        Self::query_tasks(
            &self.conn(),
            &format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE claimed_at IS NULL
                 ORDER BY priority DESC, id ASC LIMIT ?1 OFFSET ?2"
            ),
            rusqlite::params![limit, params.offset as i64],
        )
    }

    async fn find_all(&self) -> Result<Vec<Task>> {
        Self::query_tasks(
            &self.conn(),
            &format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY id"),
            [],
        )
    }

    async fn count_pending(&self) -> Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM tasks WHERE claimed_at IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    async fn delete(&self, task: &Task) -> Result<()> {
        self.conn()
            .execute("DELETE FROM tasks WHERE id = ?1", [task.id])?;
        Ok(())
    }

    async fn delete_all(&self) -> Result<usize> {
        Ok(self.conn().execute("DELETE FROM tasks", [])?)
    }

    async fn exists(&self, id: i64) -> Result<bool> {
        let found: i64 = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM tasks WHERE id = ?1)",
            [id],
            |row| row.get(0),
        )?;
        Ok(found != 0)
    }
}

struct RawTask {
    id: i64,
    operation: String,
    dedup_key: String,
    priority: i64,
    payload: String,
    created_at: String,
    updated_at: String,
}

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawTask> {
    Ok(RawTask {
        id: row.get(0)?,
        operation: row.get(1)?,
        dedup_key: row.get(2)?,
        priority: row.get(3)?,
        payload: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

impl RawTask {
    fn into_task(self) -> Result<Task> {
        Ok(Task {
            id: self.id,
            operation: self.operation.parse::<Operation>()?,
            dedup_key: self.dedup_key,
            priority: self.priority,
            payload: Payload::from_json(&self.payload)?,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
        })
    }
}

// ─── Repositories ───────────────────────────────────────────

/// SQLite repository table.
pub struct SqliteRepositoryStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteRepositoryStore {
    pub fn open(path: &Path) -> Result<Self> {
        Self::with_connection(open_connection(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(rusqlite::Connection::open_in_memory()?)
    }

    fn with_connection(conn: rusqlite::Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS repositories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                remote_uri TEXT NOT NULL UNIQUE,
                last_synced_at TEXT,
                created_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> MutexGuard<'_, rusqlite::Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a repository, or return the existing one with the same URI.
    pub fn create(&self, remote_uri: &str) -> Result<Repository> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO repositories (remote_uri, created_at) VALUES (?1, ?2)
             ON CONFLICT(remote_uri) DO NOTHING",
            rusqlite::params![remote_uri, Utc::now().to_rfc3339()],
        )?;
        Self::query_repos(
            &conn,
            "SELECT id, remote_uri, last_synced_at, created_at FROM repositories WHERE remote_uri = ?1",
            [remote_uri],
        )?
        .pop()
        .ok_or_else(|| CodehiveError::Store(format!("Repository '{remote_uri}' vanished after insert")))
    }

    pub fn get(&self, id: i64) -> Result<Option<Repository>> {
        Ok(Self::query_repos(
            &self.conn(),
            "SELECT id, remote_uri, last_synced_at, created_at FROM repositories WHERE id = ?1",
            [id],
        )?
        .pop())
    }

    pub fn list(&self) -> Result<Vec<Repository>> {
        Self::query_repos(
            &self.conn(),
            "SELECT id, remote_uri, last_synced_at, created_at FROM repositories ORDER BY id",
            [],
        )
    }

    pub fn mark_synced(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "UPDATE repositories SET last_synced_at = ?1 WHERE id = ?2",
            rusqlite::params![at.to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn delete(&self, id: i64) -> Result<bool> {
        Ok(self.conn().execute("DELETE FROM repositories WHERE id = ?1", [id])? > 0)
    }

    fn query_repos(
        conn: &rusqlite::Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Repository>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut repos = Vec::new();
        for row in rows {
            let (id, remote_uri, last_synced_at, created_at) = row?;
            repos.push(Repository {
                id,
                remote_uri,
                last_synced_at: last_synced_at.as_deref().map(parse_time).transpose()?,
                created_at: parse_time(&created_at)?,
            });
        }
        Ok(repos)
    }
}

#[async_trait]
impl RepositoryStore for SqliteRepositoryStore {
    async fn find_due_for_sync(&self, cutoff: DateTime<Utc>) -> Result<Vec<Repository>> {
        // RFC 3339 strings in UTC compare in time order
        Self::query_repos(
            &self.conn(),
            "SELECT id, remote_uri, last_synced_at, created_at FROM repositories
             WHERE last_synced_at IS NOT NULL AND last_synced_at < ?1
             ORDER BY id",
            [cutoff.to_rfc3339()],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(op: Operation, repo: i64, priority: i64) -> Task {
        Task::new(op, priority, Payload::for_repository(repo))
    }

    #[tokio::test]
    async fn test_save_upserts_priority() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let a = task(Operation::CloneRepository, 42, 100).with_dedup_key("clone:42");
        let first = store.save(&a).await.unwrap();

        let mut again = a.clone();
        again.priority = 150;
        let second = store.save(&again).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.count_pending().await.unwrap(), 1);
        let claimed = store.dequeue().await.unwrap().unwrap();
        assert_eq!(claimed.priority, 150);
        assert_eq!(claimed.payload.repository_id(), Some(42));
    }

    #[tokio::test]
    async fn test_dequeue_claims_once() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        store.save(&task(Operation::SyncRepository, 1, 10)).await.unwrap();
        store.save(&task(Operation::SyncRepository, 2, 20)).await.unwrap();

        let first = store.dequeue().await.unwrap().unwrap();
        let second = store.dequeue().await.unwrap().unwrap();
        assert_eq!(first.payload.repository_id(), Some(2));
        assert_eq!(second.payload.repository_id(), Some(1));
        assert!(store.dequeue().await.unwrap().is_none());
        assert_eq!(store.find_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unreadable_row_does_not_block_queue() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        store.save(&task(Operation::SyncRepository, 1, 10)).await.unwrap();
        {
            // Rows written by a newer build or damaged by hand.
            let conn = store.conn();
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO tasks (operation, dedup_key, priority, payload, created_at, updated_at)
                 VALUES ('repository.future_op', 'future:1', 999, '{}', ?1, ?1),
                        ('repository.sync', 'broken:1', 500, 'not json', ?1, ?1)",
                [now],
            )
            .unwrap();
        }
        assert_eq!(store.count_pending().await.unwrap(), 3);

        let next = store.dequeue().await.unwrap().unwrap();
        assert_eq!(next.operation, Operation::SyncRepository);
        assert_eq!(next.payload.repository_id(), Some(1));
        assert!(store.dequeue().await.unwrap().is_none());
        assert_eq!(store.count_pending().await.unwrap(), 0);
        // Only the claimed readable task is left.
        assert_eq!(store.find_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_release_stale_claims() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        store.save(&task(Operation::SyncRepository, 1, 10)).await.unwrap();
        store.dequeue().await.unwrap().unwrap();
        assert_eq!(store.count_pending().await.unwrap(), 0);

        assert_eq!(store.release_stale_claims().unwrap(), 1);
        assert_eq!(store.count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pagination_and_delete() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        for repo in 1..=4 {
            store.save(&task(Operation::SyncRepository, repo, repo)).await.unwrap();
        }
        let page = store
            .find_pending(&ListParams {
                limit: Some(2),
                offset: 0,
                operation: None,
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].payload.repository_id(), Some(4));

        store.delete(&page[0]).await.unwrap();
        assert!(!store.exists(page[0].id).await.unwrap());
        assert!(store.exists(page[1].id).await.unwrap());
        assert_eq!(store.delete_all().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = std::env::temp_dir().join("codehive-test-queue-reopen");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("queue.db");
        {
            let store = SqliteTaskStore::open(&path).unwrap();
            store.delete_all().await.unwrap();
            store.save(&task(Operation::CloneRepository, 5, 1)).await.unwrap();
        }
        let store = SqliteTaskStore::open(&path).unwrap();
        assert_eq!(store.count_pending().await.unwrap(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_repositories_due_for_sync() {
        let store = SqliteRepositoryStore::open_in_memory().unwrap();
        let stale = store.create("https://example.com/a.git").unwrap();
        let fresh = store.create("https://example.com/b.git").unwrap();
        store.create("https://example.com/c.git").unwrap();

        let now = Utc::now();
        store.mark_synced(stale.id, now - chrono::Duration::hours(3)).unwrap();
        store.mark_synced(fresh.id, now).unwrap();

        let due = store
            .find_due_for_sync(now - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, stale.id);
    }

    #[test]
    fn test_create_is_idempotent() {
        let store = SqliteRepositoryStore::open_in_memory().unwrap();
        let a = store.create("https://example.com/a.git").unwrap();
        let again = store.create("https://example.com/a.git").unwrap();
        assert_eq!(a.id, again.id);
        assert_eq!(store.list().unwrap().len(), 1);
        assert!(store.delete(a.id).unwrap());
        assert!(store.get(a.id).unwrap().is_none());
    }
}
