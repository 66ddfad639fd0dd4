//! Persisted watermarks.
//!
//! `logs_id_track` holds one row per pipeline stage. The relay watermark
//! tracks the source log stream, the drain watermark tracks the processing
//! queue; they are unrelated and must never be read in place of each other.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::Result;
use crate::database::retry::retry_on_busy;

/// Which watermark a cursor row holds.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CursorKind {
    /// Highest `logs` id copied into the queue.
    Relay,
    /// Highest `logs_queue` id fully drained.
    Drain,
}

impl CursorKind {
    /// Fixed row id of this watermark in `logs_id_track`.
    pub fn row_id(self) -> i64 {
        match self {
            Self::Relay => 1,
            Self::Drain => 2,
        }
    }
}

/// Single-row watermark store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CursorRepository: Send + Sync {
    /// Last recorded id, `None` if the watermark was never written.
    async fn read(&self, kind: CursorKind) -> Result<Option<i64>>;

    /// Overwrite the watermark (upsert, not append).
    async fn advance(&self, kind: CursorKind, id: i64) -> Result<()>;
}

/// SQLx implementation of CursorRepository.
pub struct SqlxCursorRepository {
    pool: SqlitePool,
}

impl SqlxCursorRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CursorRepository for SqlxCursorRepository {
    async fn read(&self, kind: CursorKind) -> Result<Option<i64>> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT tid FROM logs_id_track WHERE id = ?")
            .bind(kind.row_id())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(tid,)| tid))
    }

    async fn advance(&self, kind: CursorKind, id: i64) -> Result<()> {
        let pool = &self.pool;
        let row_id = kind.row_id();
        retry_on_busy("cursor.advance", move || async move {
            sqlx::query(
                r#"
                INSERT INTO logs_id_track (id, tid) VALUES (?, ?)
                ON CONFLICT(id) DO UPDATE SET tid = excluded.tid
                "#,
            )
            .bind(row_id)
            .bind(id)
            .execute(pool)
            .await?;
            Ok::<(), crate::Error>(())
        })
        .await
    }
}
