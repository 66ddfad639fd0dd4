//! Database module for zlog-push.
//!
//! SQLite through sqlx serves as source log stream, processing queue,
//! destination tables and state store.

pub mod models;
pub mod repositories;
pub mod retry;
pub mod time;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use tracing::{info, warn};

/// Database connection pool type alias.
pub type DbPool = Pool<Sqlite>;

/// Connections are cheap but the pipeline stages are sequential.
const MAX_DEFAULT_POOL_SIZE: u32 = 10;

/// How long a writer waits on a locked database before SQLite gives up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Pages between automatic WAL checkpoints.
const WAL_AUTOCHECKPOINT_PAGES: i32 = 1000;

/// Pool size derived from the available CPU cores.
pub fn default_pool_size() -> u32 {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(2);
    (cores * 2).min(MAX_DEFAULT_POOL_SIZE)
}

/// Open a WAL-mode SQLite pool with at most `max_connections` connections.
///
/// `database_url` is a sqlx SQLite URL such as `sqlite:zlog.db?mode=rwc`.
pub async fn init_pool_with_size(
    database_url: &str,
    max_connections: u32,
) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT)
        .pragma("wal_autocheckpoint", WAL_AUTOCHECKPOINT_PAGES.to_string())
        .pragma("temp_store", "MEMORY");

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_with(options)
        .await?;

    // In-memory databases report "memory" and cannot switch.
    let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
        .fetch_one(&pool)
        .await?;
    if mode != "wal" && mode != "memory" {
        warn!(journal_mode = %mode, "Database is not in WAL mode");
    }

    info!(max_connections, journal_mode = %mode, "Database pool ready");
    Ok(pool)
}

/// Open a pool sized by [`default_pool_size`].
pub async fn init_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    init_pool_with_size(database_url, default_pool_size()).await
}

/// Apply the embedded schema migrations.
pub async fn run_migrations(pool: &DbPool) -> crate::Result<()> {
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations completed");
    Ok(())
}

/// Single-connection in-memory database with the schema applied.
#[cfg(test)]
pub(crate) async fn test_pool() -> DbPool {
    let pool = init_pool_with_size("sqlite::memory:", 1).await.unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}
