//! Copies newly arrived source rows into the processing queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::Result;
use crate::database::repositories::{
    CursorKind, CursorRepository, LogSourceRepository, QueueRepository,
};

/// Relay settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Watermark used when none was persisted yet.
    pub baseline_id: i64,
    /// Source rows fetched per page.
    pub batch_size: i64,
    /// Delay between passes.
    pub interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            baseline_id: crate::config::DEFAULT_BASELINE_ID,
            batch_size: 1000,
            interval: Duration::from_secs(10),
        }
    }
}

/// Cursor-driven copier from `logs` to `logs_queue`.
pub struct LogRelay {
    source: Arc<dyn LogSourceRepository>,
    queue: Arc<dyn QueueRepository>,
    cursors: Arc<dyn CursorRepository>,
    config: RelayConfig,
}

impl LogRelay {
    pub fn new(
        source: Arc<dyn LogSourceRepository>,
        queue: Arc<dyn QueueRepository>,
        cursors: Arc<dyn CursorRepository>,
        config: RelayConfig,
    ) -> Self {
        Self {
            source,
            queue,
            cursors,
            config,
        }
    }

    /// Copy every source row above the relay watermark. Returns the new watermark.
    ///
    /// The watermark is persisted after each queued row, so a failure part way
    /// leaves it at the last row actually in the queue.
    pub async fn relay_once(&self) -> Result<i64> {
        let mut cursor = self
            .cursors
            .read(CursorKind::Relay)
            .await?
            .unwrap_or(self.config.baseline_id);
        let start = cursor;

        loop {
            let page = self
                .source
                .fetch_after(cursor, self.config.batch_size)
                .await?;
            let page_len = page.len();

            for event in page {
                let outcome = self.queue.insert(&event).await?;
                if outcome.is_duplicate() {
                    debug!(event_id = event.id, "Event already queued");
                }
                self.cursors.advance(CursorKind::Relay, event.id).await?;
                cursor = event.id;
            }

            if (page_len as i64) < self.config.batch_size {
                break;
            }
        }

        if cursor != start {
            debug!(from = start, to = cursor, "Relayed source rows");
        }
        Ok(cursor)
    }

    /// Relay periodically until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.config.interval.as_secs(),
            batch_size = self.config.batch_size,
            "Log relay started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Log relay shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.relay_once().await {
                        error!(error = %e, "Relay pass failed, retrying on next tick");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::LogEventDbModel;
    use crate::database::repositories::{
        MockLogSourceRepository, MockQueueRepository, SqlxCursorRepository,
    };
    use crate::database::test_pool;
    use crate::{Error, WriteOutcome};

    fn source_with(ids: Vec<i64>) -> MockLogSourceRepository {
        let mut source = MockLogSourceRepository::new();
        source.expect_fetch_after().returning(move |after, limit| {
            Ok(ids
                .iter()
                .filter(|id| **id > after)
                .take(limit as usize)
                .map(|id| LogEventDbModel::new(*id, "msg", "#dev").with_nick("bob"))
                .collect())
        });
        source
    }

    fn config(batch_size: i64) -> RelayConfig {
        RelayConfig {
            baseline_id: 0,
            batch_size,
            interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_relays_across_pages() {
        let cursors = Arc::new(SqlxCursorRepository::new(test_pool().await));
        let mut queue = MockQueueRepository::new();
        queue
            .expect_insert()
            .times(5)
            .returning(|_| Ok(WriteOutcome::Written));

        let relay = LogRelay::new(
            Arc::new(source_with(vec![1, 2, 3, 4, 5])),
            Arc::new(queue),
            cursors.clone(),
            config(2),
        );

        assert_eq!(relay.relay_once().await.unwrap(), 5);
        assert_eq!(cursors.read(CursorKind::Relay).await.unwrap(), Some(5));
        assert_eq!(cursors.read(CursorKind::Drain).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_insert_failure_keeps_cursor_at_last_queued_row() {
        let cursors = Arc::new(SqlxCursorRepository::new(test_pool().await));
        let mut queue = MockQueueRepository::new();
        queue.expect_insert().returning(|event| {
            if event.id == 3 {
                Err(Error::Database("disk I/O error".into()))
            } else {
                Ok(WriteOutcome::Written)
            }
        });

        let relay = LogRelay::new(
            Arc::new(source_with(vec![1, 2, 3, 4])),
            Arc::new(queue),
            cursors.clone(),
            config(10),
        );

        assert!(relay.relay_once().await.is_err());
        assert_eq!(cursors.read(CursorKind::Relay).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_already_queued_rows_advance_cursor() {
        let cursors = Arc::new(SqlxCursorRepository::new(test_pool().await));
        cursors.advance(CursorKind::Relay, 10).await.unwrap();

        let mut queue = MockQueueRepository::new();
        queue.expect_insert().returning(|event| {
            if event.id == 11 {
                Ok(WriteOutcome::Duplicate)
            } else {
                Ok(WriteOutcome::Written)
            }
        });

        let relay = LogRelay::new(
            Arc::new(source_with(vec![9, 10, 11, 12])),
            Arc::new(queue),
            cursors.clone(),
            config(10),
        );

        assert_eq!(relay.relay_once().await.unwrap(), 12);
        assert_eq!(cursors.read(CursorKind::Relay).await.unwrap(), Some(12));
    }

    #[tokio::test]
    async fn test_nothing_new_keeps_baseline() {
        let cursors = Arc::new(SqlxCursorRepository::new(test_pool().await));
        let mut queue = MockQueueRepository::new();
        queue.expect_insert().never();

        let relay = LogRelay::new(
            Arc::new(source_with(vec![])),
            Arc::new(queue),
            cursors.clone(),
            RelayConfig {
                baseline_id: 28_000_000,
                ..config(10)
            },
        );

        assert_eq!(relay.relay_once().await.unwrap(), 28_000_000);
        assert_eq!(cursors.read(CursorKind::Relay).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let cursors = Arc::new(SqlxCursorRepository::new(test_pool().await));
        let mut queue = MockQueueRepository::new();
        queue
            .expect_insert()
            .returning(|_| Ok(WriteOutcome::Written));

        let relay = LogRelay::new(
            Arc::new(source_with(vec![1, 2])),
            Arc::new(queue),
            cursors.clone(),
            config(10),
        );

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stopper.cancel();
        });

        relay.run(cancel).await;
        assert_eq!(cursors.read(CursorKind::Relay).await.unwrap(), Some(2));
    }
}
