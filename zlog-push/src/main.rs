use anyhow::Context;
use tokio::signal;
use tracing::{error, info};

use zlog_push::config::AppConfig;
use zlog_push::database;
use zlog_push::logging::init_logging;
use zlog_push::services::ServiceContainer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let _log_guard = init_logging(config.log_filter.as_deref(), config.log_dir.as_deref())?;

    info!(mode = %config.mode, baseline_id = config.baseline_id, "zlog-push starting");

    let pool_size = config
        .max_connections
        .unwrap_or_else(database::default_pool_size);
    let pool = database::init_pool_with_size(&config.database_url, pool_size)
        .await
        .with_context(|| format!("failed to open database {}", config.database_url))?;
    database::run_migrations(&pool).await?;

    let container = ServiceContainer::new(pool, config);
    if let Err(e) = container.start().await {
        error!(error = %e, "Startup failed");
        container.shutdown().await?;
        return Err(e).context("failed to start pipeline");
    }

    wait_for_shutdown().await;
    info!("Shutdown signal received");

    container.shutdown().await?;
    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
