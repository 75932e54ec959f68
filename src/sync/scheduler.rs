//! Background Sync Scheduler
//!
//! Runs a sync pass followed by a bounded-queue flush at a fixed interval.
//! Uses a Tokio task for non-blocking background execution. Ticks never
//! overlap: the loop waits for each pass, and a tick that falls due while a
//! pass is still running is skipped.

use super::manager::SyncManager;
use crate::db::Database;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const SCHEDULER_CONFIG_KEY: &str = "scheduler_config";
const MIN_INTERVAL: Duration = Duration::from_secs(1);
const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Scheduler configuration stored in settings table
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub interval_minutes: u64,
    pub last_run: Option<String>, // ISO 8601 timestamp
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: 5,
            last_run: None,
        }
    }
}

/// Background scheduler for automatic sync passes
#[derive(Clone)]
pub struct BackgroundScheduler {
    db: Arc<Database>,
    config: Arc<RwLock<SchedulerConfig>>,
    running: Arc<AtomicBool>,
    task: Arc<StdMutex<Option<(JoinHandle<()>, CancellationToken)>>>,
}

/// Scheduler errors
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid interval: {0}")]
    InvalidInterval(String),
}

impl BackgroundScheduler {
    /// Create new scheduler instance
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            config: Arc::new(RwLock::new(SchedulerConfig::default())),
            running: Arc::new(AtomicBool::new(false)),
            task: Arc::new(StdMutex::new(None)),
        }
    }

    /// Load configuration from database settings table
    pub async fn load_config(&self) -> Result<(), SchedulerError> {
        let config: SchedulerConfig = self
            .db
            .get_setting(SCHEDULER_CONFIG_KEY)
            .map_err(|e| SchedulerError::Database(e.to_string()))?
            .unwrap_or_default();

        *self.config.write().await = config;
        Ok(())
    }

    /// Save configuration to database settings table
    pub async fn save_config(&self) -> Result<(), SchedulerError> {
        let config = self.config.read().await.clone();
        self.db
            .set_setting(SCHEDULER_CONFIG_KEY, &config)
            .map_err(|e| SchedulerError::Database(e.to_string()))?;
        Ok(())
    }

    /// Start using the configured interval
    pub async fn start_from_config(&self, sync_manager: SyncManager) -> Result<(), SchedulerError> {
        let minutes = self.config.read().await.interval_minutes;
        self.start(sync_manager, interval_from_minutes(minutes)?).await
    }

    /// Start the background task. Does nothing when already running.
    pub async fn start(
        &self,
        sync_manager: SyncManager,
        interval: Duration,
    ) -> Result<(), SchedulerError> {
        validate_interval(interval)?;

        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if self.running.load(Ordering::SeqCst) {
            log::debug!("Background scheduler already running");
            return Ok(());
        }
        self.running.store(true, Ordering::SeqCst);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Self::scheduler_loop(
            interval,
            sync_manager,
            self.db.clone(),
            self.config.clone(),
            cancel.clone(),
        ));
        *task = Some((handle, cancel));

        log::info!("Background scheduler started (interval: {:?})", interval);
        Ok(())
    }

    /// Stop the background task and cancel any pass in flight.
    /// Does nothing when not running.
    pub async fn stop(&self) {
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        self.running.store(false, Ordering::SeqCst);

        match task {
            Some((handle, cancel)) => {
                cancel.cancel();
                if let Err(e) = handle.await {
                    if !e.is_cancelled() {
                        log::error!("Scheduler task ended abnormally: {}", e);
                    }
                }
                log::info!("Background scheduler stopped");
            }
            None => log::debug!("Background scheduler not running"),
        }
    }

    /// Check if scheduler is currently running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get current configuration
    pub async fn get_config(&self) -> SchedulerConfig {
        self.config.read().await.clone()
    }

    /// Update configuration and restart the scheduler with it
    pub async fn update_config(
        &self,
        enabled: bool,
        interval_minutes: u64,
        sync_manager: SyncManager,
    ) -> Result<(), SchedulerError> {
        validate_interval(interval_from_minutes(interval_minutes)?)?;

        {
            let mut config = self.config.write().await;
            config.enabled = enabled;
            config.interval_minutes = interval_minutes;
        }
        self.save_config().await?;

        self.stop().await;
        if enabled {
            self.start_from_config(sync_manager).await?;
        }

        log::info!(
            "Scheduler config updated: enabled={}, interval={} minutes",
            enabled,
            interval_minutes
        );
        Ok(())
    }

    /// Background scheduler loop (runs in spawned task)
    async fn scheduler_loop(
        period: Duration,
        sync_manager: SyncManager,
        db: Arc<Database>,
        config: Arc<RwLock<SchedulerConfig>>,
        cancel: CancellationToken,
    ) {
        // First pass after one full interval, like a repeating timer
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        log::info!("Scheduler loop started (interval: {:?})", period);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            log::info!("Background sync triggered by scheduler");
            sync_manager.run_cycle(&cancel).await;

            let mut cfg = config.write().await;
            cfg.last_run = Some(Utc::now().to_rfc3339());
            if let Err(e) = db.set_setting(SCHEDULER_CONFIG_KEY, &*cfg) {
                log::error!("Failed to save last_run timestamp: {}", e);
            }
        }

        log::info!("Scheduler loop exited");
    }
}

fn interval_from_minutes(minutes: u64) -> Result<Duration, SchedulerError> {
    minutes
        .checked_mul(60)
        .map(Duration::from_secs)
        .ok_or_else(|| {
            SchedulerError::InvalidInterval(format!("{} minutes is out of range", minutes))
        })
}

fn validate_interval(interval: Duration) -> Result<(), SchedulerError> {
    if interval < MIN_INTERVAL || interval > MAX_INTERVAL {
        return Err(SchedulerError::InvalidInterval(format!(
            "Interval must be between 1 second and 24 hours, got {:?}",
            interval
        )));
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
