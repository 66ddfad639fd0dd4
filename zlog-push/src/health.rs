//! Pipeline health reporting.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::database::repositories::{CursorKind, CursorRepository, QueueRepository};
use crate::pipeline::{DrainProgress, DrainSnapshot};

/// Overall pipeline status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Queue readable and lag within threshold.
    Healthy,
    /// Running, but the drain loop is falling behind.
    Degraded,
    /// The queue could not be read.
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Snapshot of both pipeline stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineHealth {
    pub status: HealthStatus,
    /// Persisted relay watermark.
    pub relay_cursor: Option<i64>,
    /// Drain watermark, in memory when the drain loop runs in this process.
    pub drain_cursor: Option<i64>,
    pub max_queue_id: Option<i64>,
    /// Queued rows above the drain watermark, never negative.
    pub queue_lag: i64,
    pub processed: u64,
    pub delivered: u64,
    pub duplicates: u64,
    pub failures: u64,
    /// Why the status is not healthy.
    pub message: Option<String>,
    /// Time of the check (RFC 3339).
    pub checked_at: String,
}

impl PipelineHealth {
    /// Build a snapshot from readable queue state.
    ///
    /// Lag is measured from `baseline_id` while no drain watermark exists.
    pub fn assess(
        relay_cursor: Option<i64>,
        drain_cursor: Option<i64>,
        max_queue_id: Option<i64>,
        drain: Option<DrainSnapshot>,
        baseline_id: i64,
        lag_warn_threshold: i64,
    ) -> Self {
        let queue_lag = queue_lag(max_queue_id, drain_cursor.unwrap_or(baseline_id));
        let (status, message) = if queue_lag > lag_warn_threshold {
            (
                HealthStatus::Degraded,
                Some(format!(
                    "queue lag {queue_lag} exceeds threshold {lag_warn_threshold}"
                )),
            )
        } else {
            (HealthStatus::Healthy, None)
        };

        let drain = drain.unwrap_or_default();
        Self {
            status,
            relay_cursor,
            drain_cursor,
            max_queue_id,
            queue_lag,
            processed: drain.processed,
            delivered: drain.delivered,
            duplicates: drain.duplicates,
            failures: drain.failures,
            message,
            checked_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Snapshot for a queue that could not be read.
    pub fn unhealthy(message: impl Into<String>, drain: Option<DrainSnapshot>) -> Self {
        let drain_cursor = drain.map(|d| d.cursor);
        let drain = drain.unwrap_or_default();
        Self {
            status: HealthStatus::Unhealthy,
            relay_cursor: None,
            drain_cursor,
            max_queue_id: None,
            queue_lag: 0,
            processed: drain.processed,
            delivered: drain.delivered,
            duplicates: drain.duplicates,
            failures: drain.failures,
            message: Some(message.into()),
            checked_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// Still making progress, possibly behind.
    pub fn is_ready(&self) -> bool {
        matches!(self.status, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

/// Reads queue and watermark state to build [`PipelineHealth`].
#[derive(Clone)]
pub struct HealthCheck {
    queue: Arc<dyn QueueRepository>,
    cursors: Arc<dyn CursorRepository>,
    progress: Option<Arc<DrainProgress>>,
    baseline_id: i64,
    lag_warn_threshold: i64,
}

impl HealthCheck {
    pub fn new(
        queue: Arc<dyn QueueRepository>,
        cursors: Arc<dyn CursorRepository>,
        progress: Option<Arc<DrainProgress>>,
        baseline_id: i64,
        lag_warn_threshold: i64,
    ) -> Self {
        Self {
            queue,
            cursors,
            progress,
            baseline_id,
            lag_warn_threshold,
        }
    }

    pub async fn check(&self) -> PipelineHealth {
        let drain = self.progress.as_ref().map(|p| p.snapshot());

        let max_queue_id = match self.queue.max_id().await {
            Ok(max) => max,
            Err(e) => return PipelineHealth::unhealthy(format!("queue unreadable: {e}"), drain),
        };

        let relay_cursor = self.read_cursor(CursorKind::Relay).await;
        // The in-memory watermark runs ahead of the persisted one.
        let drain_cursor = match drain {
            Some(snapshot) => Some(snapshot.cursor),
            None => self.read_cursor(CursorKind::Drain).await,
        };

        PipelineHealth::assess(
            relay_cursor,
            drain_cursor,
            max_queue_id,
            drain,
            self.baseline_id,
            self.lag_warn_threshold,
        )
    }

    async fn read_cursor(&self, kind: CursorKind) -> Option<i64> {
        match self.cursors.read(kind).await {
            Ok(cursor) => cursor,
            Err(e) => {
                warn!(cursor = %kind, error = %e, "Failed to read watermark for health check");
                None
            }
        }
    }

    /// Check and log at a level matching the status.
    pub async fn check_and_log(&self) -> PipelineHealth {
        let health = self.check().await;
        match health.status {
            HealthStatus::Healthy => info!(
                status = %health.status,
                relay_cursor = ?health.relay_cursor,
                drain_cursor = ?health.drain_cursor,
                queue_lag = health.queue_lag,
                processed = health.processed,
                delivered = health.delivered,
                failures = health.failures,
                "Pipeline health"
            ),
            HealthStatus::Degraded => warn!(
                status = %health.status,
                queue_lag = health.queue_lag,
                message = ?health.message,
                "Pipeline falling behind"
            ),
            HealthStatus::Unhealthy => error!(
                status = %health.status,
                message = ?health.message,
                "Pipeline unhealthy"
            ),
        }
        health
    }
}

/// `max_queue_id - drain_cursor`, floored at zero. Zero for an empty queue.
pub fn queue_lag(max_queue_id: Option<i64>, drain_cursor: i64) -> i64 {
    match max_queue_id {
        Some(max) => max.saturating_sub(drain_cursor).max(0),
        None => 0,
    }
}
