//! Queue: the enqueue-side facade over a [`TaskStore`].

use std::sync::Arc;

use codehive_core::{Operation, Result};

use crate::store::TaskStore;
use crate::task::{Payload, Task};

/// Priority gap between consecutive operations of one pipeline.
const PIPELINE_STEP: i64 = 10;

/// Pagination and filtering for [`Queue::list`].
#[derive(Debug, Clone, Default)]
pub struct ListParams {
    /// None means no limit.
    pub limit: Option<usize>,
    pub offset: usize,
    /// Only tasks of this operation.
    pub operation: Option<Operation>,
}

/// Cloneable handle shared by every producer.
#[derive(Clone)]
pub struct Queue {
    store: Arc<dyn TaskStore>,
}

impl Queue {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Add a task, or bump the priority of the pending task with the same
    /// dedup key.
    pub async fn enqueue(&self, task: Task) -> Result<Task> {
        let saved = self.store.save(&task).await?;
        if saved.created_at == saved.updated_at {
            tracing::info!(
                "📥 Queued {} (id={}, priority={})",
                saved.operation,
                saved.id,
                saved.priority
            );
        } else {
            tracing::debug!(
                "🔁 Re-queued {} (id={}, priority={})",
                saved.operation,
                saved.id,
                saved.priority
            );
        }
        Ok(saved)
    }

    /// Enqueue a pipeline. Earlier operations get strictly higher priority so
    /// they are dequeued first: operation `i` of `n` gets
    /// `base_priority + 10 * (n - i)`.
    pub async fn enqueue_operations(
        &self,
        operations: &[Operation],
        base_priority: i64,
        payload: &Payload,
    ) -> Result<Vec<Task>> {
        let n = operations.len() as i64;
        let mut tasks = Vec::with_capacity(operations.len());
        for (i, op) in operations.iter().enumerate() {
            let priority = base_priority + PIPELINE_STEP * (n - i as i64);
            tasks.push(self.enqueue(Task::new(*op, priority, payload.clone())).await?);
        }
        Ok(tasks)
    }

    /// Pending tasks in dequeue order.
    pub async fn list(&self, params: &ListParams) -> Result<Vec<Task>> {
        let Some(operation) = params.operation else {
            return self.store.find_pending(params).await;
        };
        // Filter first, then paginate the filtered view.
        let all = self.store.find_pending(&ListParams::default()).await?;
        Ok(all
            .into_iter()
            .filter(|t| t.operation == operation)
            .skip(params.offset)
            .take(params.limit.unwrap_or(usize::MAX))
            .collect())
    }

    /// Number of pending tasks.
    pub async fn count(&self) -> Result<usize> {
        self.store.count_pending().await
    }

    /// Delete every pending task that targets `repository_id`. Returns the
    /// number deleted. A task already claimed by a worker is left to finish.
    pub async fn drain_for_repository(&self, repository_id: i64) -> Result<usize> {
        let pending = self.store.find_pending(&ListParams::default()).await?;
        let mut drained = 0;
        for task in pending
            .iter()
            .filter(|t| t.payload.repository_id() == Some(repository_id))
        {
            self.store.delete(task).await?;
            drained += 1;
        }
        if drained > 0 {
            tracing::info!("🧹 Drained {drained} task(s) for repository {repository_id}");
        }
        Ok(drained)
    }
}
