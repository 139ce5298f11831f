//! Repository records, as far as the re-sync scheduler needs them.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use codehive_core::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// An indexed Git repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub remote_uri: String,
    /// None until the first sync finished.
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait RepositoryStore: Send + Sync {
    /// Repositories whose last sync happened before `cutoff`. Repositories
    /// that never synced are still owned by their creation pipeline and are
    /// not returned.
    async fn find_due_for_sync(&self, cutoff: DateTime<Utc>) -> Result<Vec<Repository>>;
}

/// In-process repository store.
#[derive(Default)]
pub struct MemoryRepositoryStore {
    repos: Mutex<BTreeMap<i64, Repository>>,
}

impl MemoryRepositoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, repo: Repository) {
        self.repos.lock().await.insert(repo.id, repo);
    }

    pub async fn mark_synced(&self, id: i64, at: DateTime<Utc>) {
        if let Some(repo) = self.repos.lock().await.get_mut(&id) {
            repo.last_synced_at = Some(at);
        }
    }
}

#[async_trait]
impl RepositoryStore for MemoryRepositoryStore {
    async fn find_due_for_sync(&self, cutoff: DateTime<Utc>) -> Result<Vec<Repository>> {
        Ok(self
            .repos
            .lock()
            .await
            .values()
            .filter(|r| r.last_synced_at.is_some_and(|at| at < cutoff))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(id: i64, last_synced_at: Option<DateTime<Utc>>) -> Repository {
        Repository {
            id,
            remote_uri: format!("https://example.com/repo-{id}.git"),
            last_synced_at,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_due_excludes_recent_and_never_synced() {
        let store = MemoryRepositoryStore::new();
        let now = Utc::now();
        store.insert(repo(1, Some(now - chrono::Duration::hours(2)))).await;
        store.insert(repo(2, Some(now))).await;
        store.insert(repo(3, None)).await;

        let due = store
            .find_due_for_sync(now - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(due.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1]);
    }

    #[tokio::test]
    async fn test_mark_synced_removes_from_due() {
        let store = MemoryRepositoryStore::new();
        let now = Utc::now();
        store.insert(repo(1, Some(now - chrono::Duration::hours(2)))).await;
        store.mark_synced(1, now).await;

        let due = store
            .find_due_for_sync(now - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert!(due.is_empty());
    }
}
