//! PeriodicSync: re-queues a sync for every repository whose last sync is
//! older than the configured interval.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use codehive_core::config::SyncConfig;
use codehive_core::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::queue::Queue;
use crate::repository::RepositoryStore;
use crate::task::{Payload, PrescribedOperations, Priority};

pub struct PeriodicSync {
    enabled: bool,
    check_interval: Duration,
    job: Arc<SyncJob>,
    shutdown_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicSync {
    pub fn new(config: &SyncConfig, repositories: Arc<dyn RepositoryStore>, queue: Queue) -> Self {
        Self {
            enabled: config.enabled,
            check_interval: config.check_interval(),
            job: Arc::new(SyncJob {
                interval: config.interval(),
                repositories,
                queue,
            }),
            shutdown_tx: None,
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Sync once now, then on every check interval. Does nothing when
    /// disabled or already running.
    pub fn start(&mut self) {
        if !self.enabled {
            tracing::info!("⏸️ Periodic sync disabled");
            return;
        }
        if self.is_running() {
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let job = self.job.clone();
        self.handle = Some(tokio::spawn(job.run(self.check_interval, shutdown_rx)));
        self.shutdown_tx = Some(shutdown_tx);
    }

    /// Signal the loop and wait for it to exit. A sync pass in progress
    /// finishes first.
    pub async fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Some(tx) = self.shutdown_tx.take() {
            tx.send(true).ok();
        }
        if let Err(e) = handle.await {
            tracing::error!("❌ Periodic sync loop ended abnormally: {e}");
        }
        tracing::info!("🛑 Periodic sync stopped");
    }

    /// One sync pass. Returns the number of repositories queued.
    pub async fn sync_now(&self) -> Result<usize> {
        self.job.sync().await
    }
}

impl Drop for PeriodicSync {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            tx.send(true).ok();
        }
    }
}

struct SyncJob {
    interval: Duration,
    repositories: Arc<dyn RepositoryStore>,
    queue: Queue,
}

impl SyncJob {
    async fn run(self: Arc<Self>, check_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "🔄 Periodic sync started (every {}s, due after {}s)",
            check_interval.as_secs(),
            self.interval.as_secs()
        );

        let mut ticker = tokio::time::interval(check_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sync().await {
                        if *shutdown.borrow() {
                            tracing::debug!("Sync pass interrupted by shutdown: {e}");
                        } else {
                            tracing::error!("❌ Periodic sync failed: {e}");
                        }
                    }
                }
            }
        }
    }

    async fn sync(&self) -> Result<usize> {
        let elapsed = chrono::Duration::from_std(self.interval)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let cutoff = Utc::now() - elapsed;
        let due = self.repositories.find_due_for_sync(cutoff).await?;

        for repo in &due {
            tracing::debug!(repository_id = repo.id, "Queueing sync for {}", repo.remote_uri);
            self.queue
                .enqueue_operations(
                    &PrescribedOperations::sync_repository(),
                    Priority::Normal.value(),
                    &Payload::for_repository(repo.id),
                )
                .await?;
        }
        if !due.is_empty() {
            tracing::info!("🔄 Queued sync for {} repositories", due.len());
        }
        Ok(due.len())
    }
}
