//! Source log stream repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::LogEventDbModel;

/// Column list shared by `logs` and `logs_queue`.
pub(crate) const EVENT_COLUMNS: &str =
    r#"id, created_at, user, network, "window", "type", nick, message"#;

/// Read-only access to the source log stream.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LogSourceRepository: Send + Sync {
    /// Rows with `id > after_id`, ascending, at most `limit`.
    async fn fetch_after(&self, after_id: i64, limit: i64) -> Result<Vec<LogEventDbModel>>;
}

/// SQLx implementation of LogSourceRepository.
pub struct SqlxLogSourceRepository {
    pool: SqlitePool,
}

impl SqlxLogSourceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LogSourceRepository for SqlxLogSourceRepository {
    async fn fetch_after(&self, after_id: i64, limit: i64) -> Result<Vec<LogEventDbModel>> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM logs WHERE id > ? ORDER BY id ASC LIMIT ?");
        let rows = sqlx::query_as::<_, LogEventDbModel>(&sql)
            .bind(after_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}
