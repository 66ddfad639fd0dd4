//! Service container wiring repositories and pipeline tasks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::database::repositories::{
    CursorRepository, QueueRepository, SqlxCursorRepository, SqlxDeliveryRepository,
    SqlxLogSourceRepository, SqlxPmTrackingRepository, SqlxQueueRepository, SqlxUserRepository,
};
use crate::health::{HealthCheck, PipelineHealth};
use crate::pipeline::{DrainContext, DrainProgress, LogRelay, QueueDrainer};
use crate::{Error, Result};

/// Owns the pool, the pipeline tasks and their shutdown.
pub struct ServiceContainer {
    /// Database connection pool.
    pub pool: SqlitePool,
    config: AppConfig,
    queue: Arc<dyn QueueRepository>,
    cursors: Arc<dyn CursorRepository>,
    relay: Arc<LogRelay>,
    drain_ctx: DrainContext,
    drain_progress: Mutex<Option<Arc<DrainProgress>>>,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    started: AtomicBool,
    /// Cancellation token for graceful shutdown.
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    /// Build every repository over `pool`. Nothing runs until [`start`](Self::start).
    pub fn new(pool: SqlitePool, config: AppConfig) -> Self {
        let queue: Arc<dyn QueueRepository> = Arc::new(SqlxQueueRepository::new(pool.clone()));
        let cursors: Arc<dyn CursorRepository> = Arc::new(SqlxCursorRepository::new(pool.clone()));

        let relay = Arc::new(LogRelay::new(
            Arc::new(SqlxLogSourceRepository::new(pool.clone())),
            queue.clone(),
            cursors.clone(),
            config.relay_config(),
        ));

        let drain_ctx = DrainContext {
            queue: queue.clone(),
            deliveries: Arc::new(SqlxDeliveryRepository::new(pool.clone())),
            pm_tracking: Arc::new(SqlxPmTrackingRepository::new(pool.clone())),
            cursors: cursors.clone(),
            users: Arc::new(SqlxUserRepository::new(pool.clone())),
        };

        Self {
            pool,
            config,
            queue,
            cursors,
            relay,
            drain_ctx,
            drain_progress: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Bootstrap the drain loop and spawn the stages selected by the run mode.
    ///
    /// Bootstrap failures are returned before any task is spawned.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::Other("service container already started".into()));
        }

        let mode = self.config.mode;
        info!(%mode, "Starting pipeline services");

        let drainer = if mode.runs_drain() {
            let ctx = self.drain_ctx.clone();
            let config = self.config.drain_config();
            let drainer = QueueDrainer::bootstrap(ctx, config).await?;
            *self.drain_progress.lock().await = Some(drainer.progress());
            Some(drainer)
        } else {
            None
        };

        let mut tasks = self.tasks.lock().await;

        if mode.runs_relay() {
            let relay = self.relay.clone();
            let token = self.cancellation_token.clone();
            let handle = tokio::spawn(async move { relay.run(token).await });
            tasks.push(("relay", handle));
        }

        if let Some(drainer) = drainer {
            let token = self.cancellation_token.clone();
            tasks.push(("drain", tokio::spawn(drainer.run(token))));
        }

        let check = self.health_check().await;
        let token = self.cancellation_token.clone();
        let health = log_health_periodically(check, self.config.health_interval, token);
        tasks.push(("health", tokio::spawn(health)));

        info!(tasks = tasks.len(), "Pipeline services started");
        Ok(())
    }

    /// Current pipeline health.
    pub async fn health(&self) -> PipelineHealth {
        self.health_check().await.check().await
    }

    async fn health_check(&self) -> HealthCheck {
        HealthCheck::new(
            self.queue.clone(),
            self.cursors.clone(),
            self.drain_progress.lock().await.clone(),
            self.config.baseline_id,
            self.config.lag_warn_threshold,
        )
    }

    /// Stop all tasks, waiting up to the configured shutdown timeout.
    pub async fn shutdown(&self) -> Result<()> {
        let timeout = self.config.shutdown_timeout;
        self.shutdown_with_timeout(timeout).await
    }

    /// Stop all tasks gracefully with a custom timeout, then close the pool.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<()> {
        info!("Shutting down services (timeout: {:?})", timeout);

        self.cancellation_token.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        let deadline = tokio::time::Instant::now() + timeout;

        for (name, mut handle) in tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => info!(task = name, "Task stopped"),
                Ok(Err(e)) => warn!(task = name, error = %e, "Task ended abnormally"),
                Err(_) => {
                    warn!(task = name, "Shutdown timeout reached, aborting task");
                    handle.abort();
                }
            }
        }

        info!("Closing database pool...");
        self.pool.close().await;

        info!("Services shut down");
        Ok(())
    }

    /// Check if shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}

async fn log_health_periodically(check: HealthCheck, every: Duration, cancel: CancellationToken) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; report after one full period.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                check.check_and_log().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunMode;
    use crate::database::test_pool;
    use crate::health::HealthStatus;

    fn config(mode: RunMode) -> AppConfig {
        AppConfig {
            mode,
            baseline_id: 0,
            relay_interval: Duration::from_millis(20),
            poll_interval: Duration::from_millis(10),
            health_interval: Duration::from_secs(3600),
            shutdown_timeout: Duration::from_secs(5),
            ..AppConfig::default()
        }
    }

    async fn wait_for_push_rows(pool: &SqlitePool, expected: i64) -> i64 {
        let mut rows = 0;
        for _ in 0..200 {
            let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM push")
                .fetch_one(pool)
                .await
                .unwrap();
            rows = n;
            if rows >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        rows
    }

    #[tokio::test]
    async fn test_start_delivers_and_shuts_down() {
        let pool = test_pool().await;
        sqlx::query("INSERT INTO users (username, hotwords) VALUES (?, ?)")
            .bind("michael")
            .bind(r#"[{"type":"substring","match":"bytesandcoffee"}]"#)
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            r#"INSERT INTO logs (id, created_at, "window", "type", nick, message)
               VALUES (100, 0, '#dev', 'msg', 'bob', 'bytesandcoffee is online')"#,
        )
        .execute(&pool)
        .await
        .unwrap();

        let container = ServiceContainer::new(pool.clone(), config(RunMode::All));
        container.start().await.unwrap();
        assert!(container.start().await.is_err());

        assert_eq!(wait_for_push_rows(&pool, 1).await, 1);

        // The relay persists its watermark right after queueing the row.
        let mut health = container.health().await;
        for _ in 0..200 {
            if health.relay_cursor == Some(100) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            health = container.health().await;
        }
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.relay_cursor, Some(100));

        container.shutdown().await.unwrap();
        assert!(container.is_shutting_down());
        assert!(pool.is_closed());
    }

    #[tokio::test]
    async fn test_relay_only_mode_leaves_queue_untouched() {
        let pool = test_pool().await;
        sqlx::query(
            r#"INSERT INTO logs (id, created_at, "window", "type", nick, message)
               VALUES (7, 0, '#dev', 'msg', 'bob', 'hello')"#,
        )
        .execute(&pool)
        .await
        .unwrap();

        let container = ServiceContainer::new(pool.clone(), config(RunMode::Relay));
        container.start().await.unwrap();

        let mut queued = 0;
        for _ in 0..200 {
            let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM logs_queue")
                .fetch_one(&pool)
                .await
                .unwrap();
            queued = n;
            if queued == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(queued, 1);

        let health = container.health().await;
        assert_eq!(health.max_queue_id, Some(7));
        assert_eq!(health.drain_cursor, None);

        container.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_fails_when_bootstrap_fails() {
        let pool = test_pool().await;
        sqlx::query("DROP TABLE users")
            .execute(&pool)
            .await
            .unwrap();

        let container = ServiceContainer::new(pool, config(RunMode::Drain));
        assert!(container.start().await.is_err());
        container.shutdown().await.unwrap();
    }
}
