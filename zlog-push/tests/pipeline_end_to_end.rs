use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tempfile::TempDir;
use zlog_push::database;
use zlog_push::database::models::LogEventDbModel;
use zlog_push::database::repositories::{
    CursorKind, CursorRepository, SqlxCursorRepository, SqlxDeliveryRepository,
    SqlxLogSourceRepository, SqlxPmTrackingRepository, SqlxQueueRepository, SqlxUserRepository,
};
use zlog_push::pipeline::{DrainConfig, DrainContext, LogRelay, QueueDrainer, RelayConfig};

async fn open_db(dir: &TempDir) -> SqlitePool {
    let db_path = dir.path().join("zlog.db");
    let db_url = format!(
        "sqlite:{}?mode=rwc",
        db_path.to_string_lossy().replace('\\', "/")
    );

    let pool = database::init_pool_with_size(&db_url, 2).await.unwrap();
    database::run_migrations(&pool).await.unwrap();
    pool
}

async fn insert_log(pool: &SqlitePool, event: &LogEventDbModel) {
    sqlx::query(
        r#"
        INSERT INTO logs (id, created_at, user, network, "window", "type", nick, message)
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
    .execute(pool)
    .await
    .unwrap();
}

async fn add_user(pool: &SqlitePool, username: &str, hotwords: &str) {
    sqlx::query("INSERT INTO users (username, hotwords) VALUES (?, ?)")
        .bind(username)
        .bind(hotwords)
        .execute(pool)
        .await
        .unwrap();
}

async fn count(pool: &SqlitePool, sql: &str) -> i64 {
    let (n,): (i64,) = sqlx::query_as(sql).fetch_one(pool).await.unwrap();
    n
}

fn relay(pool: &SqlitePool) -> LogRelay {
    LogRelay::new(
        Arc::new(SqlxLogSourceRepository::new(pool.clone())),
        Arc::new(SqlxQueueRepository::new(pool.clone())),
        Arc::new(SqlxCursorRepository::new(pool.clone())),
        RelayConfig {
            baseline_id: 0,
            batch_size: 2,
            interval: Duration::from_millis(10),
        },
    )
}

fn drain_context(pool: &SqlitePool) -> DrainContext {
    DrainContext {
        queue: Arc::new(SqlxQueueRepository::new(pool.clone())),
        deliveries: Arc::new(SqlxDeliveryRepository::new(pool.clone())),
        pm_tracking: Arc::new(SqlxPmTrackingRepository::new(pool.clone())),
        cursors: Arc::new(SqlxCursorRepository::new(pool.clone())),
        users: Arc::new(SqlxUserRepository::new(pool.clone())),
    }
}

fn drain_config() -> DrainConfig {
    DrainConfig {
        baseline_id: 0,
        batch_size: 500,
        poll_interval: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn matching_event_reaches_only_the_matching_recipient() {
    let dir = TempDir::new().unwrap();
    let pool = open_db(&dir).await;

    add_user(
        &pool,
        "michael",
        r#"[{"type":"substring","match":"bytesandcoffee"}]"#,
    )
    .await;
    add_user(&pool, "alice", r#"[{"type":"substring","match":"tea"}]"#).await;

    insert_log(
        &pool,
        &LogEventDbModel::new(100, "msg", "#dev")
            .with_user("michael")
            .with_network("libera")
            .with_nick("bob")
            .with_message("bytesandcoffee is online"),
    )
    .await;

    assert_eq!(relay(&pool).relay_once().await.unwrap(), 100);
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM logs_queue").await, 1);

    let mut drainer = QueueDrainer::bootstrap(drain_context(&pool), drain_config())
        .await
        .unwrap();
    assert_eq!(drainer.drain_once().await.unwrap(), 1);

    let rows: Vec<(i64, String, String, String)> =
        sqlx::query_as(r#"SELECT id, recipient, nick, message FROM push"#)
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(
        rows,
        vec![(
            100,
            "michael".to_string(),
            "bob".to_string(),
            "bytesandcoffee is online".to_string()
        )]
    );
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM event_log").await, 1);
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM logs_queue").await, 0);
}

#[tokio::test]
async fn watermarks_survive_restart() {
    let dir = TempDir::new().unwrap();

    {
        let pool = open_db(&dir).await;
        add_user(&pool, "michael", r#"[{"type":"pm"}]"#).await;
        for id in 1..=5 {
            insert_log(
                &pool,
                &LogEventDbModel::new(id, "msg", "carol")
                    .with_nick("carol")
                    .with_message(format!("hey {id}")),
            )
            .await;
        }

        assert_eq!(relay(&pool).relay_once().await.unwrap(), 5);
        let mut drainer = QueueDrainer::bootstrap(drain_context(&pool), drain_config())
            .await
            .unwrap();
        assert_eq!(drainer.drain_once().await.unwrap(), 5);
        pool.close().await;
    }

    let pool = open_db(&dir).await;
    for id in 6..=7 {
        insert_log(
            &pool,
            &LogEventDbModel::new(id, "msg", "carol")
                .with_nick("carol")
                .with_message(format!("hey {id}")),
        )
        .await;
    }

    // Relay continues after the last copied row; nothing is queued twice.
    assert_eq!(relay(&pool).relay_once().await.unwrap(), 7);
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM logs_queue").await, 2);

    let cursors = SqlxCursorRepository::new(pool.clone());
    assert_eq!(cursors.read(CursorKind::Drain).await.unwrap(), Some(5));

    let mut drainer = QueueDrainer::bootstrap(drain_context(&pool), drain_config())
        .await
        .unwrap();
    assert_eq!(drainer.pm_index().len(), 1);
    assert_eq!(drainer.drain_once().await.unwrap(), 2);

    assert_eq!(count(&pool, "SELECT COUNT(*) FROM pm_table").await, 1);
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM push").await, 7);
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM event_log").await, 7);
    assert_eq!(cursors.read(CursorKind::Drain).await.unwrap(), Some(7));
    assert_eq!(cursors.read(CursorKind::Relay).await.unwrap(), Some(7));
}

#[tokio::test]
async fn invalid_rule_set_excludes_recipient() {
    let dir = TempDir::new().unwrap();
    let pool = open_db(&dir).await;

    add_user(
        &pool,
        "michael",
        r#"[{"type":"substring","match":"deploy"},{"type":"regex","match":"dep.*"}]"#,
    )
    .await;
    // Stored as a JSON string wrapping the list.
    add_user(
        &pool,
        "alice",
        &serde_json::to_string(r#"[{"type":"substring","match":"deploy"}]"#).unwrap(),
    )
    .await;

    insert_log(
        &pool,
        &LogEventDbModel::new(1, "action", "#ops")
            .with_nick("bob")
            .with_message("starts the deploy"),
    )
    .await;

    relay(&pool).relay_once().await.unwrap();
    let mut drainer = QueueDrainer::bootstrap(drain_context(&pool), drain_config())
        .await
        .unwrap();
    drainer.drain_once().await.unwrap();

    let recipients: Vec<(String,)> = sqlx::query_as("SELECT recipient FROM push")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(recipients, vec![("alice".to_string(),)]);
}
