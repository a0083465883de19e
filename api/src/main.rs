use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;

mod handlers;
mod routes;
mod state;

use common::backup::{JobRunner, SyncEngine};
use common::config::Settings;
use common::db::repositories::{JobRepository, SqliteJobRepository};
use common::db::DbPool;
use common::schedule::parse_timezone;
use common::scheduler::{ScheduleManager, TriggerRuntimeConfig};
use common::telemetry;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Settings::load()?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    telemetry::init_logging(
        &config.observability.log_level,
        config.observability.json_logs,
    )?;
    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        "Starting backup server"
    );

    let metrics_handle = if config.observability.metrics_enabled {
        Some(telemetry::init_metrics()?)
    } else {
        None
    };

    // Initialize database connection pool
    let db_pool = DbPool::new(&config.database).await?;
    db_pool.migrate().await?;
    tracing::info!("Database ready");

    let repo: Arc<dyn JobRepository> = Arc::new(SqliteJobRepository::new(db_pool.clone()));
    let runner = Arc::new(JobRunner::new(
        repo.clone(),
        SyncEngine::new(config.sync.copy_policy),
    ));
    let manager = Arc::new(ScheduleManager::new(
        repo.clone(),
        runner,
        TriggerRuntimeConfig {
            tick_interval: config.scheduler.tick_interval(),
            timezone: parse_timezone(&config.scheduler.timezone)?,
        },
    ));

    // A failed initial load leaves the schedule empty until the next reload
    if let Err(e) = manager.load_and_schedule_jobs().await {
        tracing::error!(error = %e, "Initial schedule load failed");
    }
    manager.start().await;

    let state = AppState::new(repo, manager.clone(), metrics_handle, config.clone());
    let app = routes::create_router(state);

    // Start server
    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));
    tracing::info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    manager.stop().await;
    db_pool.close().await;

    tracing::info!("Backup server stopped");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }

    tracing::info!("Initiating graceful shutdown");
}
