//! Worker: single background loop that claims one task per tick and runs
//! its handler.
//!
//! Every claimed task is deleted once its handler returns, whatever the
//! outcome. A task whose operation has no handler is logged and dropped so a
//! misconfigured deployment never wedges the queue. Failures and recovered
//! panics surface as a Failed status on the task's tracker.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use codehive_core::config::WorkerConfig;
use codehive_core::{Result, TrackableType};
use codehive_tracking::{Tracker, TrackerFactory};
use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::registry::Registry;
use crate::store::TaskStore;
use crate::task::Task;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Everything one dispatch needs. Shared with the background loop.
struct Dispatcher {
    store: Arc<dyn TaskStore>,
    registry: Arc<Registry>,
    trackers: Arc<dyn TrackerFactory>,
}

pub struct Worker {
    dispatcher: Arc<Dispatcher>,
    poll_interval: Duration,
    shutdown_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: Arc<Registry>,
        trackers: Arc<dyn TrackerFactory>,
    ) -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher {
                store,
                registry,
                trackers,
            }),
            poll_interval: DEFAULT_POLL_INTERVAL,
            shutdown_tx: None,
            handle: None,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_config(self, config: &WorkerConfig) -> Self {
        self.with_poll_interval(config.poll_interval())
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Spawn the polling loop. Calling this while running does nothing.
    pub fn start(&mut self) {
        if self.is_running() {
            tracing::warn!("⚠️ Worker already running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let dispatcher = self.dispatcher.clone();
        let poll_interval = self.poll_interval;
        self.handle = Some(tokio::spawn(run(dispatcher, poll_interval, shutdown_rx)));
        self.shutdown_tx = Some(shutdown_tx);
    }

    /// Signal the loop and wait for it to exit. A task already being
    /// processed finishes first; no new task is claimed afterwards.
    pub async fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Some(tx) = self.shutdown_tx.take() {
            tx.send(true).ok();
        }
        if let Err(e) = handle.await {
            tracing::error!("❌ Worker loop ended abnormally: {e}");
        }
        tracing::info!("🛑 Worker stopped");
    }

    /// Claim and process at most one task. Returns whether a task was found.
    pub async fn process_one(&self) -> Result<bool> {
        self.dispatcher.process_one().await
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            tx.send(true).ok();
        }
    }
}

async fn run(dispatcher: Arc<Dispatcher>, poll_interval: Duration, mut shutdown: watch::Receiver<bool>) {
    tracing::info!("⚙️ Worker started (poll every {}ms)", poll_interval.as_millis());

    let mut ticker = tokio::time::interval(poll_interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                if let Err(e) = dispatcher.process_one().await {
                    tracing::error!("❌ Failed to process next task: {e}");
                }
            }
        }
    }
}

impl Dispatcher {
    async fn process_one(&self) -> Result<bool> {
        let Some(task) = self.store.dequeue().await? else {
            return Ok(false);
        };
        self.process(&task).await;
        self.store.delete(&task).await?;
        Ok(true)
    }

    async fn process(&self, task: &Task) {
        let Some(handler) = self.registry.handler(task.operation) else {
            tracing::error!(
                task_id = task.id,
                "❌ No handler registered for {}, dropping task",
                task.operation
            );
            return;
        };

        let tracker = self.tracker_for(task);
        tracing::debug!(task_id = task.id, "▶️ Running {}", task.operation);

        let outcome = match AssertUnwindSafe(handler.execute(&task.payload))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(anyhow::anyhow!("handler panicked: {}", panic_message(&*panic))),
        };

        match outcome {
            Ok(()) => {
                tracing::info!(task_id = task.id, "✅ {} done", task.operation);
                if let Some(tracker) = &tracker {
                    tracker.complete().await;
                }
            }
            Err(e) => {
                tracing::error!(task_id = task.id, "❌ {} failed: {e:#}", task.operation);
                if let Some(tracker) = &tracker {
                    tracker.fail(&format!("{e:#}")).await;
                }
            }
        }
    }

    /// Tasks without a usable `repository_id` run untracked.
    fn tracker_for(&self, task: &Task) -> Option<Tracker> {
        let repository_id = task.payload.repository_id().filter(|id| *id != 0)?;
        Some(
            self.trackers
                .for_operation(task.operation, TrackableType::Repository, repository_id),
        )
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
