//! Processing queue repository.

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::log::EVENT_COLUMNS;
use crate::database::models::LogEventDbModel;
use crate::database::retry::retry_on_busy;
use crate::{Result, WriteOutcome};

/// Maximum ids bound into a single batch delete statement.
const DELETE_CHUNK_SIZE: usize = 500;

/// Processing queue between the relay and the drain loop.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// Queue a copy of a source row. An already queued id is a duplicate.
    async fn insert(&self, event: &LogEventDbModel) -> Result<WriteOutcome>;

    /// Queued rows with `id > after_id`, ascending, at most `limit`.
    async fn fetch_after(&self, after_id: i64, limit: i64) -> Result<Vec<LogEventDbModel>>;

    /// Remove one row. Returns whether a row was removed.
    async fn delete(&self, id: i64) -> Result<bool>;

    /// Remove several rows, returning how many were removed.
    async fn delete_many(&self, ids: &[i64]) -> Result<u64>;

    /// Highest queued id, if the queue is not empty.
    async fn max_id(&self) -> Result<Option<i64>>;
}

/// SQLx implementation of QueueRepository.
pub struct SqlxQueueRepository {
    pool: SqlitePool,
}

impl SqlxQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueRepository for SqlxQueueRepository {
    async fn insert(&self, event: &LogEventDbModel) -> Result<WriteOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO logs_queue (id, created_at, user, network, "window", "type", nick, message)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.id)
        .bind(event.created_at)
        .bind(&event.user)
        .bind(&event.network)
        .bind(&event.window)
        .bind(&event.kind)
        .bind(&event.nick)
        .bind(&event.message)
        .execute(&self.pool)
        .await;

        WriteOutcome::classify(result)
    }

    async fn fetch_after(&self, after_id: i64, limit: i64) -> Result<Vec<LogEventDbModel>> {
        let sql =
            format!("SELECT {EVENT_COLUMNS} FROM logs_queue WHERE id > ? ORDER BY id ASC LIMIT ?");
        let rows = sqlx::query_as::<_, LogEventDbModel>(&sql)
            .bind(after_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let pool = &self.pool;
        let affected = retry_on_busy("queue.delete", move || async move {
            let result = sqlx::query("DELETE FROM logs_queue WHERE id = ?")
                .bind(id)
                .execute(pool)
                .await?;
            Ok::<u64, crate::Error>(result.rows_affected())
        })
        .await?;
        Ok(affected > 0)
    }

    async fn delete_many(&self, ids: &[i64]) -> Result<u64> {
        // An empty IN list would be a syntax error; never widen into a table wipe.
        if ids.is_empty() {
            return Ok(0);
        }

        let mut removed = 0;
        for chunk in ids.chunks(DELETE_CHUNK_SIZE) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("DELETE FROM logs_queue WHERE id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");

            let result = builder.build().execute(&self.pool).await?;
            removed += result.rows_affected();
        }
        Ok(removed)
    }

    async fn max_id(&self) -> Result<Option<i64>> {
        let (max,): (Option<i64>,) = sqlx::query_as("SELECT MAX(id) FROM logs_queue")
            .fetch_one(&self.pool)
            .await?;
        Ok(max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_pool;

    fn event(id: i64) -> LogEventDbModel {
        LogEventDbModel::new(id, "msg", "#dev")
            .with_nick("bob")
            .with_message(format!("line {id}"))
    }

    #[tokio::test]
    async fn test_insert_reports_duplicates() {
        let repo = SqlxQueueRepository::new(test_pool().await);

        assert_eq!(repo.insert(&event(1)).await.unwrap(), WriteOutcome::Written);
        assert!(repo.insert(&event(1)).await.unwrap().is_duplicate());
        assert_eq!(repo.max_id().await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_fetch_delete_and_max_id() {
        let repo = SqlxQueueRepository::new(test_pool().await);
        assert_eq!(repo.max_id().await.unwrap(), None);

        for id in 1..=5 {
            repo.insert(&event(id)).await.unwrap();
        }

        let batch = repo.fetch_after(2, 2).await.unwrap();
        assert_eq!(batch.iter().map(|e| e.id).collect::<Vec<_>>(), vec![3, 4]);

        assert!(repo.delete(3).await.unwrap());
        assert!(!repo.delete(3).await.unwrap());

        assert_eq!(repo.delete_many(&[]).await.unwrap(), 0);
        assert_eq!(repo.delete_many(&[1, 2, 3]).await.unwrap(), 2);

        let rest = repo.fetch_after(0, 10).await.unwrap();
        assert_eq!(rest.iter().map(|e| e.id).collect::<Vec<_>>(), vec![4, 5]);
        assert_eq!(repo.max_id().await.unwrap(), Some(5));
    }
}
