//! Private conversation tracking table.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{LogEventDbModel, PmKey};
use crate::{Result, WriteOutcome};

/// Append-only store of tracked private conversations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PmTrackingRepository: Send + Sync {
    /// Every tracked `(window, nick)` pair.
    async fn list_keys(&self) -> Result<Vec<PmKey>>;

    /// Track the conversation `key`, first seen in `event`.
    async fn insert(&self, key: &PmKey, event: &LogEventDbModel) -> Result<WriteOutcome>;
}

/// SQLx implementation of PmTrackingRepository.
pub struct SqlxPmTrackingRepository {
    pool: SqlitePool,
}

impl SqlxPmTrackingRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PmTrackingRepository for SqlxPmTrackingRepository {
    async fn list_keys(&self) -> Result<Vec<PmKey>> {
        let keys = sqlx::query_as::<_, PmKey>(r#"SELECT "window", nick FROM pm_table"#)
            .fetch_all(&self.pool)
            .await?;
        Ok(keys)
    }

    async fn insert(&self, key: &PmKey, event: &LogEventDbModel) -> Result<WriteOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO pm_table ("window", nick, id, created_at, user, network, "type", message)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&key.window)
        .bind(&key.nick)
        .bind(event.id)
        .bind(event.created_at)
        .bind(&event.user)
        .bind(&event.network)
        .bind(&event.kind)
        .bind(&event.message)
        .execute(&self.pool)
        .await;

        WriteOutcome::classify(result)
    }
}
