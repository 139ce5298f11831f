//! Engine: wires the worker, periodic sync and status reporting from one
//! config, and shuts them down in order.

use std::sync::Arc;

use codehive_core::CodehiveConfig;
use codehive_tracking::{Cooldown, LoggingReporter, Reporter, ReporterTrackerFactory};

use crate::queue::Queue;
use crate::registry::Registry;
use crate::repository::RepositoryStore;
use crate::store::TaskStore;
use crate::sync::PeriodicSync;
use crate::worker::Worker;

pub struct Engine {
    queue: Queue,
    worker: Worker,
    sync: PeriodicSync,
    cooldown: Cooldown,
}

impl Engine {
    /// `statuses` receives every status change, throttled per status ID by
    /// `reporting.cooldown_ms`. Handlers must already be in `registry` or be
    /// registered before the first task is claimed.
    pub fn new(
        config: &CodehiveConfig,
        tasks: Arc<dyn TaskStore>,
        repositories: Arc<dyn RepositoryStore>,
        statuses: Arc<dyn Reporter>,
        registry: Arc<Registry>,
    ) -> Self {
        let cooldown = Cooldown::new(statuses, config.reporting.cooldown());
        let mut reporters: Vec<Arc<dyn Reporter>> = vec![Arc::new(cooldown.clone())];
        if config.reporting.log_progress {
            reporters.push(Arc::new(LoggingReporter::new()));
        }

        let queue = Queue::new(tasks.clone());
        let worker = Worker::new(tasks, registry, Arc::new(ReporterTrackerFactory::new(reporters)))
            .with_config(&config.worker);
        let sync = PeriodicSync::new(&config.sync, repositories, queue.clone());

        Self {
            queue,
            worker,
            sync,
            cooldown,
        }
    }

    /// Producer handle onto the engine's queue.
    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    pub fn start(&mut self) {
        self.worker.start();
        self.sync.start();
        tracing::info!("🚀 Engine started");
    }

    /// Stop producing, let the in-flight task finish, then flush throttled
    /// statuses so the last value of every status reaches the store.
    pub async fn shutdown(&mut self) {
        self.sync.stop().await;
        self.worker.stop().await;
        self.cooldown.close().await;
        tracing::info!("🛑 Engine stopped");
    }
}
