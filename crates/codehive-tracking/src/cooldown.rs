//! Cooldown: a reporter decorator that rate-limits status deliveries.
//!
//! Per status ID, non-terminal updates reach the wrapped reporter at most
//! once per `interval`. Updates arriving inside the window replace a single
//! pending value, which a timer flushes when the window closes. Terminal
//! updates cancel that timer and are delivered immediately, always.
//!
//! ```text
//! t=0      update#1  → delivered
//! t=10ms   update#2  → pending, timer armed for 490ms
//! t=20ms   update#3  → replaces pending
//! t=500ms  timer     → update#3 delivered
//! t=600ms  completed → delivered immediately
//! ```
//!
//! Deliveries for one ID never overlap: each holds the entry's gate for the
//! whole `on_change` call, so a terminal update that arrives while a flush
//! is still awaiting the next reporter lands after it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use codehive_core::Result;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::reporter::Reporter;
use crate::status::Status;

/// Serializes deliveries for one status ID.
type Gate = Arc<tokio::sync::Mutex<()>>;

/// Per-status throttle state. Created lazily, dropped on terminal delivery.
#[derive(Default)]
struct Entry {
    last_flush: Option<Instant>,
    pending: Option<Status>,
    timer: Option<JoinHandle<()>>,
    gate: Gate,
}

struct Inner {
    interval: Duration,
    next: Arc<dyn Reporter>,
    entries: Mutex<HashMap<String, Entry>>,
}

/// Rate-limiting [`Reporter`] wrapper.
#[derive(Clone)]
pub struct Cooldown {
    inner: Arc<Inner>,
}

impl Cooldown {
    pub fn new(next: Arc<dyn Reporter>, interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                interval,
                next,
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Stop every timer and deliver whatever is still pending.
    pub async fn close(&self) {
        let entries = std::mem::take(&mut *self.inner.lock_entries());

        let mut pending = Vec::new();
        for (_, entry) in entries {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
            if let Some(status) = entry.pending {
                pending.push((entry.gate, status));
            }
        }

        for (gate, status) in pending {
            let _delivering = gate.lock().await;
            if let Err(e) = self.inner.next.on_change(&status).await {
                tracing::warn!(status_id = %status.id, "⚠️ Final status flush failed: {e}");
            }
        }
    }
}

impl Inner {
    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Timer body: deliver the latest pending value for `id`, if any is left.
    async fn flush_pending(self: Arc<Self>, id: String, delay: Duration) {
        tokio::time::sleep(delay).await;

        let Some(gate) = self.lock_entries().get(&id).map(|entry| entry.gate.clone()) else {
            return;
        };
        let _delivering = gate.lock().await;

        // Re-read under the gate: a terminal update may have removed the entry
        // while this timer waited.
        let pending = {
            let mut entries = self.lock_entries();
            match entries.get_mut(&id) {
                Some(entry) => {
                    entry.timer = None;
                    let pending = entry.pending.take();
                    if pending.is_some() {
                        entry.last_flush = Some(Instant::now());
                    }
                    pending
                }
                None => None,
            }
        };

        if let Some(status) = pending {
            if let Err(e) = self.next.on_change(&status).await {
                tracing::warn!(status_id = %status.id, "⚠️ Throttled status flush failed: {e}");
            }
        }
    }
}

#[async_trait]
impl Reporter for Cooldown {
    async fn on_change(&self, status: &Status) -> Result<()> {
        if status.is_terminal() {
            let removed = self.inner.lock_entries().remove(&status.id);
            let Some(entry) = removed else {
                return self.inner.next.on_change(status).await;
            };
            // A timer still waiting for the gate is cancelled here. One that
            // already holds it has cleared its handle and finishes first.
            if let Some(timer) = entry.timer {
                timer.abort();
            }
            let _delivering = entry.gate.lock().await;
            return self.inner.next.on_change(status).await;
        }

        let gate = {
            let now = Instant::now();
            let mut entries = self.inner.lock_entries();
            let entry = entries.entry(status.id.clone()).or_default();
            let elapsed = entry.last_flush.map(|at| now.duration_since(at));

            match elapsed {
                Some(elapsed) if elapsed < self.inner.interval => {
                    entry.pending = Some(status.clone());
                    if entry.timer.is_none() {
                        let delay = self.inner.interval - elapsed;
                        entry.timer = Some(tokio::spawn(
                            self.inner.clone().flush_pending(status.id.clone(), delay),
                        ));
                    }
                    None
                }
                _ => {
                    if let Some(timer) = entry.timer.take() {
                        timer.abort();
                    }
                    entry.pending = None;
                    entry.last_flush = Some(now);
                    Some(entry.gate.clone())
                }
            }
        };

        match gate {
            Some(gate) => {
                let _delivering = gate.lock().await;
                self.inner.next.on_change(status).await
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::ReportingState;
    use codehive_core::{Operation, TrackableType};

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<Status>>,
    }

    impl Recording {
        fn count(&self) -> usize {
            self.seen.lock().unwrap().len()
        }

        fn last(&self) -> Status {
            self.seen.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl Reporter for Recording {
        async fn on_change(&self, status: &Status) -> Result<()> {
            self.seen.lock().unwrap().push(status.clone());
            Ok(())
        }
    }

    fn status(repo: i64) -> Status {
        Status::new(
            Operation::SyncRepository,
            None,
            Some(TrackableType::Repository),
            Some(repo),
        )
        .set_total(100)
        .unwrap()
    }

    fn cooldown(ms: u64) -> (Cooldown, Arc<Recording>) {
        let rec = Arc::new(Recording::default());
        (Cooldown::new(rec.clone(), Duration::from_millis(ms)), rec)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_to_latest_value() {
        let (cd, rec) = cooldown(500);
        let base = status(1);

        cd.on_change(&base).await.unwrap();
        for i in 1..=19 {
            let update = base.set_current(i, &format!("file {i}")).unwrap();
            cd.on_change(&update).await.unwrap();
        }
        assert_eq!(rec.count(), 1);

        tokio::time::sleep(Duration::from_millis(700)).await;

        assert_eq!(rec.count(), 2);
        assert_eq!(rec.last().current, 19);
        assert_eq!(rec.last().message, "file 19");
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_bypasses_cooldown() {
        let (cd, rec) = cooldown(500);
        let base = status(1);

        cd.on_change(&base).await.unwrap();
        cd.on_change(&base.set_current(3, "").unwrap()).await.unwrap();
        cd.on_change(&base.complete().unwrap()).await.unwrap();

        assert_eq!(rec.count(), 2);
        assert!(rec.last().is_terminal());

        // the pending update was discarded along with its timer
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rec.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivers_immediately_after_interval() {
        let (cd, rec) = cooldown(500);
        let base = status(1);

        cd.on_change(&base).await.unwrap();
        tokio::time::advance(Duration::from_millis(600)).await;
        cd.on_change(&base.set_current(50, "").unwrap()).await.unwrap();

        assert_eq!(rec.count(), 2);
        assert_eq!(rec.last().current, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ids_are_throttled_independently() {
        let (cd, rec) = cooldown(500);

        cd.on_change(&status(1)).await.unwrap();
        cd.on_change(&status(2)).await.unwrap();
        cd.on_change(&status(1).set_current(1, "").unwrap()).await.unwrap();

        assert_eq!(rec.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_flushes_pending_once() {
        let (cd, rec) = cooldown(500);
        let base = status(1);

        cd.on_change(&base).await.unwrap();
        cd.on_change(&base.set_current(7, "").unwrap()).await.unwrap();
        cd.close().await;

        assert_eq!(rec.count(), 2);
        assert_eq!(rec.last().current, 7);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rec.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_without_pending_is_noop() {
        let (cd, rec) = cooldown(500);
        cd.on_change(&status(1)).await.unwrap();

        cd.close().await;
        assert_eq!(rec.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_most_one_delivery_per_window() {
        let (cd, rec) = cooldown(100);
        let base = status(1);

        // one update every 10ms for one second
        for i in 0..100u64 {
            cd.on_change(&base.set_current(i, "").unwrap()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let count = rec.count();
        assert!(count <= 11, "expected at most 11 deliveries, got {count}");
        assert_eq!(rec.last().current, 99);
    }

    /// Takes a while to accept non-terminal updates, like a busy database.
    #[derive(Default)]
    struct Slow {
        seen: Mutex<Vec<Status>>,
    }

    #[async_trait]
    impl Reporter for Slow {
        async fn on_change(&self, status: &Status) -> Result<()> {
            if !status.is_terminal() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            self.seen.lock().unwrap().push(status.clone());
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_waits_for_inflight_flush() {
        let slow = Arc::new(Slow::default());
        let cd = Cooldown::new(slow.clone(), Duration::from_millis(500));
        let base = status(1);

        // Delivered at once, returns at 50ms.
        cd.on_change(&base).await.unwrap();
        // Pending; the timer fires at 500ms and is still delivering at 505ms.
        cd.on_change(&base.set_current(40, "").unwrap()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(455)).await;
        cd.on_change(&base.complete().unwrap()).await.unwrap();

        let seen = slow.seen.lock().unwrap().clone();
        let currents: Vec<u64> = seen.iter().map(|s| s.current).collect();
        assert_eq!(currents, vec![0, 40, 100]);
        assert!(!seen[1].is_terminal());
        assert_eq!(seen[2].state, ReportingState::Completed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ids_stay_within_their_windows() {
        const IDS: i64 = 16;
        const UPDATES: u64 = 30;
        let interval = Duration::from_millis(50);
        let (cd, rec) = cooldown(50);
        let started = std::time::Instant::now();

        let producers: Vec<_> = (1..=IDS)
            .map(|repo| {
                let cd = cd.clone();
                tokio::spawn(async move {
                    let base = status(repo);
                    for i in 0..UPDATES {
                        cd.on_change(&base.set_current(i, "").unwrap()).await.unwrap();
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.await.unwrap();
        }
        // Let the last timers fire, then flush anything left.
        tokio::time::sleep(interval * 3).await;
        cd.close().await;
        let windows = started.elapsed().as_millis() / interval.as_millis();

        let seen = rec.seen.lock().unwrap().clone();
        for repo in 1..=IDS {
            let delivered: Vec<&Status> = seen
                .iter()
                .filter(|s| s.trackable_id == Some(repo))
                .collect();
            assert!(
                delivered.len() as u128 <= windows + 2,
                "repository {repo}: {} deliveries in {windows} windows",
                delivered.len()
            );
            assert_eq!(delivered.last().map(|s| s.current), Some(UPDATES - 1));
        }
    }
}
