//! Notification (`push`) and audit (`event_log`) destinations.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::DeliveryDbModel;
use crate::{Result, WriteOutcome};

/// Append-only destinations for matched events.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryRepository: Send + Sync {
    /// Write to the notification table, unique per `(id, recipient)`.
    async fn insert_push(&self, record: &DeliveryDbModel) -> Result<WriteOutcome>;

    /// Write to the audit table, unique per `id`.
    async fn insert_audit(&self, record: &DeliveryDbModel) -> Result<WriteOutcome>;
}

/// SQLx implementation of DeliveryRepository.
pub struct SqlxDeliveryRepository {
    pool: SqlitePool,
}

impl SqlxDeliveryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn insert_into(
        &self,
        table: &'static str,
        record: &DeliveryDbModel,
    ) -> Result<WriteOutcome> {
        let sql = format!(
            r#"
            INSERT INTO {table} (id, recipient, user, network, "window", "type", nick, message)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#
        );
        let result = sqlx::query(&sql)
            .bind(record.id)
            .bind(&record.recipient)
            .bind(&record.user)
            .bind(&record.network)
            .bind(&record.window)
            .bind(&record.kind)
            .bind(&record.nick)
            .bind(&record.message)
            .execute(&self.pool)
            .await;

        WriteOutcome::classify(result)
    }
}

#[async_trait]
impl DeliveryRepository for SqlxDeliveryRepository {
    async fn insert_push(&self, record: &DeliveryDbModel) -> Result<WriteOutcome> {
        self.insert_into("push", record).await
    }

    async fn insert_audit(&self, record: &DeliveryDbModel) -> Result<WriteOutcome> {
        self.insert_into("event_log", record).await
    }
}
