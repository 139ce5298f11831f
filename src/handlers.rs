//! Repository bookkeeping handlers the `run` command registers by default.
//! Git and indexing work is registered by the embedding application.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use codehive_core::{Operation, TrackableType};
use codehive_queue::{Queue, Registry, RepositoryPayload, SqliteRepositoryStore, Typed, TypedHandler};
use codehive_tracking::SqliteStatusStore;

/// Records the sync time so periodic sync waits a full interval again.
pub struct MarkSynced {
    pub repositories: Arc<SqliteRepositoryStore>,
}

#[async_trait]
impl TypedHandler for MarkSynced {
    type Payload = RepositoryPayload;

    async fn handle(&self, payload: RepositoryPayload) -> anyhow::Result<()> {
        self.repositories.mark_synced(payload.repository_id, Utc::now())?;
        Ok(())
    }
}

/// Drops a repository with its queued work and recorded statuses.
pub struct ForgetRepository {
    pub repositories: Arc<SqliteRepositoryStore>,
    pub statuses: Arc<SqliteStatusStore>,
    pub queue: Queue,
}

#[async_trait]
impl TypedHandler for ForgetRepository {
    type Payload = RepositoryPayload;

    async fn handle(&self, payload: RepositoryPayload) -> anyhow::Result<()> {
        let id = payload.repository_id;
        self.queue.drain_for_repository(id).await?;
        self.statuses.delete_by_trackable(TrackableType::Repository, id)?;
        if !self.repositories.delete(id)? {
            tracing::warn!(repository_id = id, "⚠️ Repository already gone");
        }
        Ok(())
    }
}

/// Registry with the bookkeeping handlers above.
pub fn registry(
    repositories: Arc<SqliteRepositoryStore>,
    statuses: Arc<SqliteStatusStore>,
    queue: Queue,
) -> Registry {
    let registry = Registry::new();
    registry.register(
        Operation::SyncRepository,
        Arc::new(Typed::new(MarkSynced {
            repositories: repositories.clone(),
        })),
    );
    registry.register(
        Operation::DeleteRepository,
        Arc::new(Typed::new(ForgetRepository {
            repositories,
            statuses,
            queue,
        })),
    );
    registry
}
