//! # Codehive Tracking
//!
//! Progress reporting for long-running operations.
//!
//! ## Architecture
//! ```text
//! Tracker (one per operation, holds an immutable Status)
//!   ├── set_total / set_current / skip / fail / complete
//!   │     → new Status value → every subscribed Reporter
//!   ├── child("commit.scan") → nested Tracker, same subscribers
//!   └── Reporters
//!         ├── Cooldown(SqliteStatusStore)  ≤1 update/interval/status, terminal bypass
//!         └── LoggingReporter              one log line per change
//! ```

pub mod cooldown;
pub mod persistence;
pub mod reporter;
pub mod status;
pub mod tracker;

pub use cooldown::Cooldown;
pub use persistence::SqliteStatusStore;
pub use reporter::{LoggingReporter, Reporter};
pub use status::{ReportingState, Status};
pub use tracker::{ReporterTrackerFactory, Tracker, TrackerFactory};
