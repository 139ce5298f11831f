//! Status: an immutable progress record for one tracked operation.
//!
//! Every transformation returns a new value; the original is never touched.
//! Once a status reaches a terminal state (`completed`, `failed`, `skipped`)
//! every transformation returns `None`.

use chrono::{DateTime, Utc};
use codehive_core::{Operation, TrackableType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a tracked operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportingState {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl ReportingState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReportingState::Completed | ReportingState::Failed | ReportingState::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportingState::Pending => "pending",
            ReportingState::Running => "running",
            ReportingState::Completed => "completed",
            ReportingState::Failed => "failed",
            ReportingState::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ReportingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportingState {
    type Err = codehive_core::CodehiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReportingState::Pending),
            "running" => Ok(ReportingState::Running),
            "completed" => Ok(ReportingState::Completed),
            "failed" => Ok(ReportingState::Failed),
            "skipped" => Ok(ReportingState::Skipped),
            other => Err(codehive_core::CodehiveError::Store(format!(
                "Unknown reporting state: {other}"
            ))),
        }
    }
}

/// Progress of one operation on one trackable entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    /// Derived from operation + trackable, prefixed by the parent's ID.
    pub id: String,
    pub operation: Operation,
    /// Weak link to the enclosing operation's status.
    pub parent_id: Option<String>,
    pub trackable_type: Option<TrackableType>,
    pub trackable_id: Option<i64>,
    pub state: ReportingState,
    pub total: u64,
    pub current: u64,
    pub message: String,
    pub error: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Status {
    /// Create a pending status for an operation on a trackable entity.
    pub fn new(
        operation: Operation,
        parent: Option<&Status>,
        trackable_type: Option<TrackableType>,
        trackable_id: Option<i64>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Self::derive_id(operation, parent, trackable_type, trackable_id),
            operation,
            parent_id: parent.map(|p| p.id.clone()),
            trackable_type,
            trackable_id,
            state: ReportingState::Pending,
            total: 0,
            current: 0,
            message: String::new(),
            error: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// `repository.sync:repository:42`, or `<parent>/commit.scan:repository:42` for children.
    pub fn derive_id(
        operation: Operation,
        parent: Option<&Status>,
        trackable_type: Option<TrackableType>,
        trackable_id: Option<i64>,
    ) -> String {
        let own = match (trackable_type, trackable_id) {
            (Some(kind), Some(id)) => format!("{operation}:{kind}:{id}"),
            _ => operation.to_string(),
        };
        match parent {
            Some(parent) => format!("{}/{own}", parent.id),
            None => own,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// `current / total` as a percentage in `0.0..=100.0`.
    pub fn completion_percent(&self) -> f64 {
        if self.state == ReportingState::Completed {
            return 100.0;
        }
        if self.total == 0 {
            return 0.0;
        }
        (self.current as f64 / self.total as f64 * 100.0).clamp(0.0, 100.0)
    }

    pub fn set_total(&self, total: u64) -> Option<Status> {
        self.transition(|s| {
            s.state = ReportingState::Running;
            s.total = total;
        })
    }

    pub fn set_current(&self, current: u64, message: &str) -> Option<Status> {
        self.transition(|s| {
            s.state = ReportingState::Running;
            s.current = current;
            s.message = message.to_string();
        })
    }

    pub fn skip(&self, message: &str) -> Option<Status> {
        self.transition(|s| {
            s.state = ReportingState::Skipped;
            s.message = message.to_string();
        })
    }

    pub fn fail(&self, error: &str) -> Option<Status> {
        self.transition(|s| {
            s.state = ReportingState::Failed;
            s.error = error.to_string();
        })
    }

    pub fn complete(&self) -> Option<Status> {
        self.transition(|s| {
            s.state = ReportingState::Completed;
            if s.total > 0 {
                s.current = s.total;
            }
        })
    }

    fn transition(&self, apply: impl FnOnce(&mut Status)) -> Option<Status> {
        if self.is_terminal() {
            return None;
        }
        let mut next = self.clone();
        apply(&mut next);
        next.updated_at = Utc::now();
        Some(next)
    }
}
