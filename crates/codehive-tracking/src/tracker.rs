//! Tracker: holds the current Status of one operation and publishes every
//! change to its subscribed reporters.
//!
//! Mutators swap in the new Status under the lock, release it, then call
//! each reporter in subscription order. A reporter error is logged and the
//! remaining reporters still receive the update.

use std::sync::{Arc, PoisonError, RwLock};

use codehive_core::{Operation, TrackableType};

use crate::reporter::Reporter;
use crate::status::Status;

pub struct Tracker {
    status: RwLock<Status>,
    subscribers: RwLock<Vec<Arc<dyn Reporter>>>,
}

impl Tracker {
    /// Create a tracker for an operation on a trackable entity.
    pub fn new(operation: Operation, trackable_type: TrackableType, trackable_id: i64) -> Self {
        Self::from_status(Status::new(
            operation,
            None,
            Some(trackable_type),
            Some(trackable_id),
        ))
    }

    /// Create a tracker starting from an existing status value.
    pub fn from_status(status: Status) -> Self {
        Self {
            status: RwLock::new(status),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Add a reporter. It receives every change published after this call.
    pub fn subscribe(&self, reporter: Arc<dyn Reporter>) {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(reporter);
    }

    /// Snapshot of the current status.
    pub fn status(&self) -> Status {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Create a tracker for a sub-operation. It shares this tracker's
    /// reporters and trackable identity, and links to the current status.
    pub fn child(&self, operation: Operation) -> Tracker {
        let parent = self.status();
        let status = Status::new(
            operation,
            Some(&parent),
            parent.trackable_type,
            parent.trackable_id,
        );
        Tracker {
            status: RwLock::new(status),
            subscribers: RwLock::new(self.subscribers_snapshot()),
        }
    }

    /// Re-broadcast the current status without changing it.
    pub async fn notify(&self) {
        let status = self.status();
        self.publish(&status).await;
    }

    pub async fn set_total(&self, total: u64) {
        self.apply(|s| s.set_total(total)).await;
    }

    pub async fn set_current(&self, current: u64, message: &str) {
        self.apply(|s| s.set_current(current, message)).await;
    }

    pub async fn skip(&self, message: &str) {
        self.apply(|s| s.skip(message)).await;
    }

    pub async fn fail(&self, error: &str) {
        self.apply(|s| s.fail(error)).await;
    }

    pub async fn complete(&self) {
        self.apply(|s| s.complete()).await;
    }

    async fn apply(&self, transform: impl FnOnce(&Status) -> Option<Status>) {
        let next = {
            let mut current = self.status.write().unwrap_or_else(PoisonError::into_inner);
            match transform(&current) {
                Some(next) => {
                    *current = next.clone();
                    next
                }
                None => {
                    tracing::debug!(
                        status_id = %current.id,
                        state = %current.state,
                        "Ignoring update to terminal status"
                    );
                    return;
                }
            }
        };
        self.publish(&next).await;
    }

    async fn publish(&self, status: &Status) {
        for reporter in self.subscribers_snapshot() {
            if let Err(e) = reporter.on_change(status).await {
                tracing::warn!(status_id = %status.id, "⚠️ Reporter failed: {e}");
            }
        }
    }

    fn subscribers_snapshot(&self) -> Vec<Arc<dyn Reporter>> {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Hands out trackers bound to an operation and trackable entity.
pub trait TrackerFactory: Send + Sync {
    fn for_operation(
        &self,
        operation: Operation,
        trackable_type: TrackableType,
        trackable_id: i64,
    ) -> Tracker;
}

/// Builds trackers subscribed to a fixed list of reporters.
#[derive(Clone, Default)]
pub struct ReporterTrackerFactory {
    reporters: Vec<Arc<dyn Reporter>>,
}

impl ReporterTrackerFactory {
    pub fn new(reporters: Vec<Arc<dyn Reporter>>) -> Self {
        Self { reporters }
    }
}

impl TrackerFactory for ReporterTrackerFactory {
    fn for_operation(
        &self,
        operation: Operation,
        trackable_type: TrackableType,
        trackable_id: i64,
    ) -> Tracker {
        let tracker = Tracker::new(operation, trackable_type, trackable_id);
        for reporter in &self.reporters {
            tracker.subscribe(reporter.clone());
        }
        tracker
    }
}
