//! # Leira Sync
//!
//! Offline-first synchronization for composting yard records. Records are
//! captured into a local durable queue and pushed to the yard's remote
//! endpoints whenever the device is online and an operator is signed in.

pub mod config;
pub mod db;
pub mod sync;

use config::{AppConfig, ConfigError};
use db::{Database, DbError};
use std::sync::Arc;
use sync::{
    BackgroundScheduler, HttpProbe, SchedulerError, SyncApiClient, SyncApiError, SyncManager,
};
use tokio_util::sync::CancellationToken;

const HISTORY_RETENTION_DAYS: i64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to create data directory: {0}")]
    DataDir(#[from] std::io::Error),

    #[error("Database initialization failed: {0}")]
    Database(#[from] DbError),

    #[error("API client error: {0}")]
    Api(#[from] SyncApiError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

// ============================================================================
// Application Entry Point
// ============================================================================

/// Run the sync daemon until Ctrl-C
pub async fn run() -> Result<(), AppError> {
    // Load .env file for endpoint settings
    dotenvy::dotenv().ok();

    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::from_env()?;

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    log::info!("Database path: {:?}", config.db_path);

    let db = Arc::new(Database::new(config.db_path.clone())?);
    log::info!("Database initialized successfully");

    let client = SyncApiClient::new(config.api_config()?)?;
    let probe = HttpProbe::new(config.probe_url.clone());
    let manager = SyncManager::new(
        db.clone(),
        Arc::new(client),
        Arc::new(probe),
        config.sync_options(),
    );

    if let Err(e) = manager.enforce_history_retention(HISTORY_RETENTION_DAYS) {
        log::warn!("Failed to prune sync history: {}", e);
    }

    match manager.current_operator() {
        Ok(Some(operator)) => log::info!("Operator session: {} ({})", operator.name, operator.id),
        Ok(None) => log::warn!("No operator session; passes will be deferred until one is set"),
        Err(e) => log::error!("Failed to read operator session: {}", e),
    }

    let scheduler = BackgroundScheduler::new(db);
    scheduler.load_config().await?;
    let enabled = scheduler.get_config().await.enabled;
    scheduler
        .update_config(enabled, config.sync_interval_minutes, manager.clone())
        .await?;

    // Catch up on both queues filled while the daemon was down
    let startup = manager.clone();
    tokio::spawn(async move {
        let report = startup.run_cycle(&CancellationToken::new()).await;
        log::info!("Startup sync: {:?}", report.status);
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
    }

    log::info!("Shutting down");
    scheduler.stop().await;
    Ok(())
}
