//! Reporter: a sink for status changes.

use async_trait::async_trait;
use codehive_core::Result;

use crate::status::{ReportingState, Status};

/// Receives every status change published by a tracker.
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn on_change(&self, status: &Status) -> Result<()>;
}

/// Logs one line per status change. No throttling of its own; wrap it in a
/// [`Cooldown`](crate::Cooldown) for chatty producers.
#[derive(Debug, Default, Clone)]
pub struct LoggingReporter;

impl LoggingReporter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Reporter for LoggingReporter {
    async fn on_change(&self, status: &Status) -> Result<()> {
        if status.state == ReportingState::Failed {
            tracing::error!(
                status_id = %status.id,
                operation = %status.operation,
                error = %status.error,
                "❌ {} failed",
                status.operation
            );
        } else {
            tracing::info!(
                status_id = %status.id,
                operation = %status.operation,
                state = %status.state,
                current = status.current,
                total = status.total,
                "📊 {} {} ({:.0}%) {}",
                status.operation,
                status.state,
                status.completion_percent(),
                status.message
            );
        }
        Ok(())
    }
}
