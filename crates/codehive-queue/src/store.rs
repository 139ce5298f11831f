//! TaskStore: durable storage behind the queue.
//!
//! Contract every implementation honours:
//! - `save` upserts by dedup key: an unseen key inserts a row, a seen key
//!   only updates the priority of the existing row.
//! - `dequeue` atomically claims the highest-priority unclaimed task
//!   (oldest first among equals). A claimed task is invisible to
//!   `find_pending`, `count_pending` and later `dequeue` calls until deleted.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use codehive_core::Result;
use tokio::sync::Mutex;

use crate::queue::ListParams;
use crate::task::Task;

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Upsert by dedup key. Returns the stored row.
    async fn save(&self, task: &Task) -> Result<Task>;
    /// Claim at most one task.
    async fn dequeue(&self) -> Result<Option<Task>>;
    /// Unclaimed tasks in dequeue order, paginated.
    async fn find_pending(&self, params: &ListParams) -> Result<Vec<Task>>;
    /// Every stored task, claimed or not.
    async fn find_all(&self) -> Result<Vec<Task>>;
    async fn count_pending(&self) -> Result<usize>;
    async fn delete(&self, task: &Task) -> Result<()>;
    async fn delete_all(&self) -> Result<usize>;
    async fn exists(&self, id: i64) -> Result<bool>;
}

struct StoredTask {
    task: Task,
    claimed: bool,
}

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    tasks: BTreeMap<i64, StoredTask>,
}

impl MemoryState {
    /// Unclaimed tasks ordered by priority desc, then ID asc.
    fn pending(&self) -> Vec<&Task> {
        let mut pending: Vec<&Task> = self
            .tasks
            .values()
            .filter(|t| !t.claimed)
            .map(|t| &t.task)
            .collect();
        pending.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        pending
    }
}

/// In-process task store. Same semantics as the SQLite store, nothing survives a restart.
#[derive(Default)]
pub struct MemoryTaskStore {
    state: Mutex<MemoryState>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn save(&self, task: &Task) -> Result<Task> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        if let Some(existing) = state
            .tasks
            .values_mut()
            .find(|t| t.task.dedup_key == task.dedup_key)
        {
            existing.task.priority = task.priority;
            existing.task.updated_at = now;
            return Ok(existing.task.clone());
        }

        state.next_id += 1;
        let mut stored = task.clone();
        stored.id = state.next_id;
        stored.created_at = now;
        stored.updated_at = now;
        state.tasks.insert(
            stored.id,
            StoredTask {
                task: stored.clone(),
                claimed: false,
            },
        );
        Ok(stored)
    }

    async fn dequeue(&self) -> Result<Option<Task>> {
        let mut state = self.state.lock().await;
        let Some(id) = state.pending().first().map(|t| t.id) else {
            return Ok(None);
        };
        Ok(state.tasks.get_mut(&id).map(|stored| {
            stored.claimed = true;
            stored.task.updated_at = Utc::now();
            stored.task.clone()
        }))
    }

    async fn find_pending(&self, params: &ListParams) -> Result<Vec<Task>> {
        let state = self.state.lock().await;
        Ok(state
            .pending()
            .into_iter()
            .skip(params.offset)
            .take(params.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn find_all(&self) -> Result<Vec<Task>> {
        let state = self.state.lock().await;
        Ok(state.tasks.values().map(|t| t.task.clone()).collect())
    }

    async fn count_pending(&self) -> Result<usize> {
        let state = self.state.lock().await;
        Ok(state.tasks.values().filter(|t| !t.claimed).count())
    }

    async fn delete(&self, task: &Task) -> Result<()> {
        self.state.lock().await.tasks.remove(&task.id);
        Ok(())
    }

    async fn delete_all(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        let removed = state.tasks.len();
        state.tasks.clear();
        Ok(removed)
    }

    async fn exists(&self, id: i64) -> Result<bool> {
        Ok(self.state.lock().await.tasks.contains_key(&id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Payload;
    use codehive_core::Operation;

    fn task(op: Operation, repo: i64, priority: i64) -> Task {
        Task::new(op, priority, Payload::for_repository(repo))
    }

    #[tokio::test]
    async fn test_save_upserts_by_dedup_key() {
        let store = MemoryTaskStore::new();
        let first = store.save(&task(Operation::CloneRepository, 1, 100)).await.unwrap();
        let second = store.save(&task(Operation::CloneRepository, 1, 150)).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.priority, 150);
        assert_eq!(store.count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dequeue_highest_priority_then_oldest() {
        let store = MemoryTaskStore::new();
        store.save(&task(Operation::SyncRepository, 1, 10)).await.unwrap();
        store.save(&task(Operation::SyncRepository, 2, 50)).await.unwrap();
        store.save(&task(Operation::SyncRepository, 3, 50)).await.unwrap();

        let order: Vec<i64> = [
            store.dequeue().await.unwrap().unwrap(),
            store.dequeue().await.unwrap().unwrap(),
            store.dequeue().await.unwrap().unwrap(),
        ]
        .iter()
        .map(|t| t.payload.repository_id().unwrap())
        .collect();
        assert_eq!(order, vec![2, 3, 1]);
        assert!(store.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claimed_task_hidden_until_deleted() {
        let store = MemoryTaskStore::new();
        store.save(&task(Operation::CloneRepository, 1, 10)).await.unwrap();

        let claimed = store.dequeue().await.unwrap().unwrap();
        assert_eq!(store.count_pending().await.unwrap(), 0);
        assert!(store.exists(claimed.id).await.unwrap());
        assert_eq!(store.find_all().await.unwrap().len(), 1);

        store.delete(&claimed).await.unwrap();
        assert!(!store.exists(claimed.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_find_pending_paginates() {
        let store = MemoryTaskStore::new();
        for repo in 1..=5 {
            store.save(&task(Operation::SyncRepository, repo, repo * 10)).await.unwrap();
        }
        let page = store
            .find_pending(&ListParams {
                limit: Some(2),
                offset: 1,
                operation: None,
            })
            .await
            .unwrap();
        let repos: Vec<_> = page.iter().map(|t| t.payload.repository_id().unwrap()).collect();
        assert_eq!(repos, vec![4, 3]);
    }

    #[tokio::test]
    async fn test_delete_all() {
        let store = MemoryTaskStore::new();
        store.save(&task(Operation::CloneRepository, 1, 1)).await.unwrap();
        store.save(&task(Operation::CloneRepository, 2, 1)).await.unwrap();
        assert_eq!(store.delete_all().await.unwrap(), 2);
        assert_eq!(store.count_pending().await.unwrap(), 0);
    }
}
