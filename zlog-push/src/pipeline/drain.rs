//! Queue drain loop.
//!
//! Consumes `logs_queue` in ascending id order, evaluates every recipient's
//! rules against each event, writes deliveries, tracks private conversations
//! and removes the processed rows. Delivery is at least once: each write is
//! isolated, duplicates are expected and never stop the loop.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::dedup::PmDedupIndex;
use crate::database::models::{DeliveryDbModel, LogEventDbModel, PmKey};
use crate::database::repositories::{
    CursorKind, CursorRepository, DeliveryRepository, PmTrackingRepository, QueueRepository,
    UserRepository,
};
use crate::domain::rule::{RuleBook, RuleSetLoader};
use crate::{Result, WriteOutcome};

/// Upper bound on queue ids kept around for a removal retry.
const MAX_PENDING_REMOVALS: usize = 10_000;

/// Repositories used by the drain loop, built once at startup.
#[derive(Clone)]
pub struct DrainContext {
    pub queue: Arc<dyn QueueRepository>,
    pub deliveries: Arc<dyn DeliveryRepository>,
    pub pm_tracking: Arc<dyn PmTrackingRepository>,
    pub cursors: Arc<dyn CursorRepository>,
    pub users: Arc<dyn UserRepository>,
}

/// Drain settings.
#[derive(Debug, Clone)]
pub struct DrainConfig {
    /// Watermark used when none was persisted yet.
    pub baseline_id: i64,
    /// Queue rows fetched per batch.
    pub batch_size: i64,
    /// Sleep after an empty or failed batch.
    pub poll_interval: Duration,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            baseline_id: crate::config::DEFAULT_BASELINE_ID,
            batch_size: 500,
            poll_interval: Duration::from_millis(1000),
        }
    }
}

/// Counters shared with the health check.
#[derive(Debug, Default)]
pub struct DrainProgress {
    cursor: AtomicI64,
    processed: AtomicU64,
    delivered: AtomicU64,
    duplicates: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time copy of [`DrainProgress`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainSnapshot {
    /// In-memory drain watermark.
    pub cursor: i64,
    /// Queue rows handled since startup.
    pub processed: u64,
    /// Rows written to `push`.
    pub delivered: u64,
    /// Writes rejected as already present.
    pub duplicates: u64,
    /// Writes or removals that failed.
    pub failures: u64,
}

impl DrainProgress {
    pub fn snapshot(&self) -> DrainSnapshot {
        DrainSnapshot {
            cursor: self.cursor.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// The drain loop and the state it owns for one run.
pub struct QueueDrainer {
    ctx: DrainContext,
    config: DrainConfig,
    rules: RuleBook,
    pm_index: PmDedupIndex,
    cursor: i64,
    persisted_cursor: Option<i64>,
    pending_removals: VecDeque<i64>,
    progress: Arc<DrainProgress>,
}

impl QueueDrainer {
    /// Seed the PM index, load the rule book and read the drain watermark.
    ///
    /// Any failure here is fatal for the run.
    pub async fn bootstrap(ctx: DrainContext, config: DrainConfig) -> Result<Self> {
        let mut pm_index = PmDedupIndex::new();
        pm_index.seed(ctx.pm_tracking.list_keys().await?);

        let rules = RuleSetLoader::new(ctx.users.clone()).load_all().await?;

        let persisted_cursor = ctx.cursors.read(CursorKind::Drain).await?;
        let cursor = persisted_cursor.unwrap_or(config.baseline_id);

        info!(
            cursor,
            recipients = rules.len(),
            tracked_conversations = pm_index.len(),
            "Queue drainer ready"
        );

        let drainer = Self::with_state(ctx, config, rules, pm_index, cursor, persisted_cursor);
        Ok(drainer)
    }

    /// Assemble a drainer from already loaded state.
    pub fn with_state(
        ctx: DrainContext,
        config: DrainConfig,
        rules: RuleBook,
        pm_index: PmDedupIndex,
        cursor: i64,
        persisted_cursor: Option<i64>,
    ) -> Self {
        let progress = Arc::new(DrainProgress::default());
        progress.cursor.store(cursor, Ordering::Relaxed);
        Self {
            ctx,
            config,
            rules,
            pm_index,
            cursor,
            persisted_cursor,
            pending_removals: VecDeque::new(),
            progress,
        }
    }

    pub fn progress(&self) -> Arc<DrainProgress> {
        self.progress.clone()
    }

    pub fn cursor(&self) -> i64 {
        self.cursor
    }

    pub fn pm_index(&self) -> &PmDedupIndex {
        &self.pm_index
    }

    pub fn pending_removals(&self) -> &VecDeque<i64> {
        &self.pending_removals
    }

    /// Process one batch. Returns the number of queue rows handled.
    pub async fn drain_once(&mut self) -> Result<usize> {
        self.retry_pending_removals().await;

        let batch = self
            .ctx
            .queue
            .fetch_after(self.cursor, self.config.batch_size)
            .await?;
        if batch.is_empty() {
            return Ok(0);
        }

        for event in &batch {
            self.process_event(event).await;
        }

        self.persist_cursor().await;
        Ok(batch.len())
    }

    /// Route, track and dequeue one event, then move the in-memory watermark past it.
    ///
    /// Never fails: every write is isolated and logged.
    pub async fn process_event(&mut self, event: &LogEventDbModel) {
        if event.is_routable() {
            for recipient in self.rules.matching_recipients(event) {
                self.deliver(event, recipient).await;
            }
        }

        self.track_private_conversation(event).await;
        self.remove_from_queue(event.id).await;

        self.cursor = self.cursor.max(event.id);
        self.progress.cursor.store(self.cursor, Ordering::Relaxed);
        DrainProgress::bump(&self.progress.processed);
    }

    /// Drain until cancelled. A batch in progress always completes.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Queue drainer started"
        );

        while !cancel.is_cancelled() {
            let handled = match self.drain_once().await {
                Ok(n) => n,
                Err(e) => {
                    error!(error = %e, "Failed to fetch queue batch");
                    0
                }
            };

            if handled == 0 {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }

        self.persist_cursor().await;
        info!(cursor = self.cursor, "Queue drainer stopped");
    }

    async fn deliver(&self, event: &LogEventDbModel, recipient: &str) {
        let record = DeliveryDbModel::for_recipient(event, recipient);

        let push = self.ctx.deliveries.insert_push(&record).await;
        if matches!(push, Ok(WriteOutcome::Written)) {
            DrainProgress::bump(&self.progress.delivered);
        }
        self.note_write("push", &record, push);

        let audit = self.ctx.deliveries.insert_audit(&record).await;
        self.note_write("event_log", &record, audit);
    }

    fn note_write(
        &self,
        table: &'static str,
        record: &DeliveryDbModel,
        result: Result<WriteOutcome>,
    ) {
        match result {
            Ok(WriteOutcome::Written) => {
                debug!(
                    event_id = record.id,
                    recipient = ?record.recipient,
                    table,
                    "Delivery written"
                );
            }
            Ok(WriteOutcome::Duplicate) => {
                DrainProgress::bump(&self.progress.duplicates);
                debug!(
                    event_id = record.id,
                    recipient = ?record.recipient,
                    table,
                    "Duplicate delivery"
                );
            }
            Err(e) => {
                DrainProgress::bump(&self.progress.failures);
                error!(
                    event_id = record.id,
                    recipient = ?record.recipient,
                    table,
                    error = %e,
                    "Failed to write delivery"
                );
            }
        }
    }

    async fn track_private_conversation(&mut self, event: &LogEventDbModel) {
        let Some(key) = PmKey::from_event(event) else {
            return;
        };
        if self.pm_index.contains(&key) {
            return;
        }

        match self.ctx.pm_tracking.insert(&key, event).await {
            Ok(outcome) => {
                if outcome.is_duplicate() {
                    debug!(
                        event_id = event.id,
                        window = %key.window,
                        "Conversation already tracked"
                    );
                } else {
                    info!(
                        event_id = event.id,
                        window = %key.window,
                        "Tracking new private conversation"
                    );
                }
                self.pm_index.record(key);
            }
            Err(e) => {
                DrainProgress::bump(&self.progress.failures);
                error!(
                    event_id = event.id,
                    window = %key.window,
                    error = %e,
                    "Failed to track private conversation"
                );
            }
        }
    }

    async fn remove_from_queue(&mut self, id: i64) {
        if let Err(e) = self.ctx.queue.delete(id).await {
            DrainProgress::bump(&self.progress.failures);
            warn!(event_id = id, error = %e, "Failed to remove event from queue, will retry");

            if self.pending_removals.len() >= MAX_PENDING_REMOVALS
                && let Some(dropped) = self.pending_removals.pop_front()
            {
                warn!(
                    event_id = dropped,
                    "Too many pending removals, giving up on oldest"
                );
            }
            self.pending_removals.push_back(id);
        }
    }

    async fn retry_pending_removals(&mut self) {
        if self.pending_removals.is_empty() {
            return;
        }

        let ids = self.pending_removals.make_contiguous();
        match self.ctx.queue.delete_many(ids).await {
            Ok(removed) => {
                debug!(
                    pending = self.pending_removals.len(),
                    removed, "Retried pending queue removals"
                );
                self.pending_removals.clear();
            }
            Err(e) => {
                warn!(
                    pending = self.pending_removals.len(),
                    error = %e,
                    "Pending queue removals failed again"
                );
            }
        }
    }

    async fn persist_cursor(&mut self) {
        if self.persisted_cursor == Some(self.cursor) {
            return;
        }

        match self
            .ctx
            .cursors
            .advance(CursorKind::Drain, self.cursor)
            .await
        {
            Ok(()) => self.persisted_cursor = Some(self.cursor),
            Err(e) => {
                error!(cursor = self.cursor, error = %e, "Failed to persist drain cursor");
            }
        }
    }
}
