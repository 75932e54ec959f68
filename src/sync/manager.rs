//! Sync Manager - Orchestrates synchronization passes
//!
//! Coordinates the connectivity probe, the operator session, the pending
//! queues and the remote endpoints. One pass:
//! 1. checks connectivity (offline: stop, queue untouched)
//! 2. loads the current operator (absent: stop, queue untouched)
//! 3. snapshots the queue and groups payloads by record type
//! 4. submits each type independently; one type failing never stops the rest
//! 5. clears the submitted entries according to the [`ClearPolicy`]
//!
//! Failures are reported through [`SyncReport`], never as errors.

use super::api::RemoteSink;
use super::bounded::{BoundedQueue, BoundedQueueConfig};
use super::connectivity::ConnectivityProbe;
use super::history::{HistoryError, HistoryManager, PassRecord};
use super::models::{
    ClearPolicy, DeferReason, DrainSummary, OperatorIdentity, PassStatus, QueueEntry,
    QueueStats, RecordType, SyncOutcome, SyncReport, BOUNDED_QUEUE_KEY, CURRENT_OPERATOR_KEY,
    LAST_SYNC_KEY, SYNC_QUEUE_KEY,
};
use super::queue::{DurableQueue, QueueError, QueueStore};
use crate::db::{Database, DbError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Behaviour switches of the orchestrator
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub clear_policy: ClearPolicy,
    /// Start a background pass right after each enqueue
    pub auto_flush_on_enqueue: bool,
    pub bounded: BoundedQueueConfig,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            clear_policy: ClearPolicy::AllOrNothing,
            auto_flush_on_enqueue: true,
            bounded: BoundedQueueConfig::default(),
        }
    }
}

/// Sync manager - main orchestrator
#[derive(Clone)]
pub struct SyncManager {
    db: Arc<Database>,
    queue: Arc<dyn QueueStore>,
    bounded: Arc<BoundedQueue>,
    sink: Arc<dyn RemoteSink>,
    probe: Arc<dyn ConnectivityProbe>,
    history: Arc<HistoryManager>,
    options: SyncOptions,
    pass_lock: Arc<Mutex<()>>,
    drain_lock: Arc<Mutex<()>>,
    last_report: Arc<RwLock<Option<SyncReport>>>,
}

impl SyncManager {
    /// Create a manager whose queues live in `db`
    pub fn new(
        db: Arc<Database>,
        sink: Arc<dyn RemoteSink>,
        probe: Arc<dyn ConnectivityProbe>,
        options: SyncOptions,
    ) -> Self {
        let queue: Arc<dyn QueueStore> = Arc::new(DurableQueue::new(db.clone(), SYNC_QUEUE_KEY));
        let bounded_store: Arc<dyn QueueStore> =
            Arc::new(DurableQueue::new(db.clone(), BOUNDED_QUEUE_KEY));
        Self::with_queues(db, queue, bounded_store, sink, probe, options)
    }

    /// Create a manager over caller-provided queue stores
    pub fn with_queues(
        db: Arc<Database>,
        queue: Arc<dyn QueueStore>,
        bounded_store: Arc<dyn QueueStore>,
        sink: Arc<dyn RemoteSink>,
        probe: Arc<dyn ConnectivityProbe>,
        options: SyncOptions,
    ) -> Self {
        let bounded = Arc::new(BoundedQueue::new(bounded_store, options.bounded.clone()));
        Self {
            history: Arc::new(HistoryManager::new(db.clone())),
            db,
            queue,
            bounded,
            sink,
            probe,
            options,
            pass_lock: Arc::new(Mutex::new(())),
            drain_lock: Arc::new(Mutex::new(())),
            last_report: Arc::new(RwLock::new(None)),
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn queue(&self) -> &Arc<dyn QueueStore> {
        &self.queue
    }

    pub fn bounded_queue(&self) -> &Arc<BoundedQueue> {
        &self.bounded
    }

    // ========================================================================
    // Operator Session
    // ========================================================================

    /// Persist the operator that subsequent passes are attributed to
    pub fn set_operator(&self, operator: &OperatorIdentity) -> Result<(), SyncManagerError> {
        self.db.set_setting(CURRENT_OPERATOR_KEY, operator)?;
        log::info!("Operator session set: {} ({})", operator.name, operator.id);
        Ok(())
    }

    /// Read the current operator; an unreadable record counts as no session
    pub fn current_operator(&self) -> Result<Option<OperatorIdentity>, SyncManagerError> {
        match self.db.get_setting::<OperatorIdentity>(CURRENT_OPERATOR_KEY) {
            Ok(operator) => Ok(operator),
            Err(DbError::Serialization(e)) => {
                log::warn!("Ignoring unreadable operator session: {}", e);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn clear_operator(&self) -> Result<(), SyncManagerError> {
        self.db.delete_setting(CURRENT_OPERATOR_KEY)?;
        Ok(())
    }

    // ========================================================================
    // Producers
    // ========================================================================

    /// Queue a record snapshot for the next pass
    pub async fn enqueue(
        &self,
        record_type: RecordType,
        payload: Value,
    ) -> Result<QueueEntry, SyncManagerError> {
        let entry = QueueEntry::new(record_type, payload);
        self.queue.append(entry.clone()).await?;
        log::info!("Queued {} entry {}", record_type, entry.id);

        if self.options.auto_flush_on_enqueue {
            self.spawn_opportunistic_sync();
        }
        Ok(entry)
    }

    /// Serialize `record` and queue it
    pub async fn enqueue_record<T: Serialize>(
        &self,
        record_type: RecordType,
        record: &T,
    ) -> Result<QueueEntry, SyncManagerError> {
        let payload = serde_json::to_value(record)?;
        self.enqueue(record_type, payload).await
    }

    /// Queue into the bounded queue. The oldest entry is dropped when full.
    pub async fn enqueue_bounded(
        &self,
        record_type: RecordType,
        payload: Value,
    ) -> Result<QueueEntry, SyncManagerError> {
        let entry = QueueEntry::new(record_type, payload);
        let evicted = self.bounded.append(entry.clone()).await?;
        log::info!(
            "Queued {} entry {} in bounded queue ({} evicted)",
            record_type,
            entry.id,
            evicted.len()
        );
        Ok(entry)
    }

    /// Fire-and-forget pass; its outcome is only logged
    fn spawn_opportunistic_sync(&self) {
        let manager = self.clone();
        tokio::spawn(async move {
            let report = manager.synchronize().await;
            log::debug!("Opportunistic sync finished: {:?}", report.status);
        });
    }

    // ========================================================================
    // Sync Operations
    // ========================================================================

    /// Run one synchronization pass
    pub async fn synchronize(&self) -> SyncReport {
        self.synchronize_with(&CancellationToken::new()).await
    }

    /// Run one pass that stops, leaving the queue untouched, when `cancel`
    /// fires before the queue is rewritten.
    pub async fn synchronize_with(&self, cancel: &CancellationToken) -> SyncReport {
        let started_at = Utc::now();

        let Ok(_pass) = self.pass_lock.try_lock() else {
            log::info!("Sync pass already in progress, skipping");
            return SyncReport::deferred(DeferReason::AlreadyRunning, started_at);
        };

        let report = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::info!("Sync pass cancelled");
                SyncReport::deferred(DeferReason::Cancelled, started_at)
            }
            report = self.run_pass(started_at) => report,
        };

        self.finish(&report).await;
        report
    }

    async fn run_pass(&self, started_at: DateTime<Utc>) -> SyncReport {
        if !self.probe.is_online().await {
            log::info!("Offline, sync pass deferred");
            return SyncReport::deferred(DeferReason::Offline, started_at);
        }

        let operator = match self.current_operator() {
            Ok(Some(operator)) => operator,
            Ok(None) => {
                log::warn!("No operator session, sync pass deferred");
                return SyncReport::deferred(DeferReason::NoOperator, started_at);
            }
            Err(e) => {
                log::error!("Failed to read operator session: {}", e);
                return SyncReport::deferred(DeferReason::Storage, started_at);
            }
        };

        let snapshot = match self.queue.try_read_all().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::error!("Failed to read sync queue: {}", e);
                return SyncReport::deferred(DeferReason::Storage, started_at);
            }
        };
        log::info!(
            "Starting sync pass for {} ({} queued entries)",
            operator.name,
            snapshot.len()
        );

        let batches = partition_by_type(&snapshot);
        let mut outcomes = Vec::new();

        for (record_type, entries) in &batches {
            let payloads: Vec<Value> = entries.iter().map(|e| e.payload.clone()).collect();

            match self.sink.submit(*record_type, &payloads, &operator).await {
                Ok(receipt) => {
                    log::info!(
                        "{} synced: {} sent, {} accepted, {} rejected items",
                        record_type,
                        payloads.len(),
                        receipt.synced,
                        receipt.item_errors
                    );
                    outcomes.push(SyncOutcome {
                        record_type: *record_type,
                        succeeded: true,
                        record_count: payloads.len(),
                        error: None,
                    });
                }
                Err(e) => {
                    log::error!("{} sync failed: {}", record_type, e);
                    outcomes.push(SyncOutcome {
                        record_type: *record_type,
                        succeeded: false,
                        record_count: payloads.len(),
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let successes = outcomes.iter().filter(|o| o.succeeded).count();
        let errors = outcomes.len() - successes;

        let removable = self.removable_ids(&snapshot, &outcomes, errors);
        let mut status = if errors == 0 {
            PassStatus::Synchronized
        } else {
            PassStatus::Deferred(DeferReason::RemoteErrors)
        };

        if !removable.is_empty() {
            match self.queue.remove_ids(&removable).await {
                Ok(removed) => log::info!("Removed {} synced entries from queue", removed),
                Err(e) => {
                    log::error!("Failed to update queue after sync: {}", e);
                    status = PassStatus::Deferred(DeferReason::Storage);
                }
            }
        }

        if status == PassStatus::Synchronized {
            if let Err(e) = self.db.set_setting(LAST_SYNC_KEY, &Utc::now().to_rfc3339()) {
                log::warn!("Failed to store last sync timestamp: {}", e);
            }
        }

        SyncReport {
            status,
            successes,
            errors,
            outcomes,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Entries the pass is allowed to delete
    fn removable_ids(
        &self,
        snapshot: &[QueueEntry],
        outcomes: &[SyncOutcome],
        errors: usize,
    ) -> HashSet<Uuid> {
        match self.options.clear_policy {
            ClearPolicy::AllOrNothing if errors == 0 => snapshot.iter().map(|e| e.id).collect(),
            ClearPolicy::AllOrNothing => HashSet::new(),
            ClearPolicy::PerType => {
                let synced: HashSet<RecordType> = outcomes
                    .iter()
                    .filter(|o| o.succeeded)
                    .map(|o| o.record_type)
                    .collect();
                snapshot
                    .iter()
                    .filter(|e| e.record_type().is_some_and(|t| synced.contains(&t)))
                    .map(|e| e.id)
                    .collect()
            }
        }
    }

    async fn finish(&self, report: &SyncReport) {
        match report.status {
            PassStatus::Synchronized => log::info!(
                "Sync pass completed: {} types synced",
                report.successes
            ),
            PassStatus::Deferred(reason) => log::info!(
                "Sync pass deferred ({}): {} succeeded, {} failed",
                reason.as_str(),
                report.successes,
                report.errors
            ),
        }

        if let Err(e) = self.history.record_pass(report) {
            log::warn!("Failed to record sync history: {}", e);
        }
        *self.last_report.write().await = Some(report.clone());
    }

    /// Drain the bounded queue to its endpoints
    pub async fn flush_bounded(&self) -> Result<DrainSummary, SyncManagerError> {
        self.flush_bounded_with(&CancellationToken::new()).await
    }

    pub async fn flush_bounded_with(
        &self,
        cancel: &CancellationToken,
    ) -> Result<DrainSummary, SyncManagerError> {
        let Ok(_drain) = self.drain_lock.try_lock() else {
            return Err(SyncManagerError::AlreadyRunning);
        };
        if cancel.is_cancelled() {
            return Err(SyncManagerError::Cancelled);
        }

        if !self.probe.is_online().await {
            return Err(SyncManagerError::Offline);
        }
        let operator = self.current_operator()?.ok_or(SyncManagerError::NoOperator)?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SyncManagerError::Cancelled),
            summary = self.bounded.drain_all(self.sink.as_ref(), &operator) => Ok(summary?),
        }
    }

    /// One full cycle: a sync pass, then a bounded-queue flush.
    /// Failures are logged only.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> SyncReport {
        let report = self.synchronize_with(cancel).await;
        if !report.is_synchronized() {
            log::warn!("Sync pass deferred: {:?}", report.status);
        }

        match self.flush_bounded_with(cancel).await {
            Ok(summary) => log::info!(
                "Bounded flush: {} succeeded, {} failed, {} dropped",
                summary.succeeded,
                summary.failed,
                summary.dropped
            ),
            Err(SyncManagerError::Offline | SyncManagerError::NoOperator) => {}
            Err(e) => log::warn!("Bounded flush failed: {}", e),
        }
        report
    }

    // ========================================================================
    // Status
    // ========================================================================

    pub async fn last_report(&self) -> Option<SyncReport> {
        self.last_report.read().await.clone()
    }

    /// Time of the last fully synchronized pass
    pub fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        let stored: Option<String> = self.db.get_setting(LAST_SYNC_KEY).ok().flatten();
        stored
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub async fn queue_stats(&self) -> QueueStats {
        self.queue.stats().await
    }

    pub async fn bounded_stats(&self) -> QueueStats {
        self.bounded.store().stats().await
    }

    pub fn recent_passes(&self, limit: u32) -> Result<Vec<PassRecord>, SyncManagerError> {
        Ok(self.history.recent(limit)?)
    }

    pub fn enforce_history_retention(&self, retention_days: i64) -> Result<usize, SyncManagerError> {
        Ok(self.history.enforce_retention(retention_days)?)
    }
}

/// Group entries by known record type, in [`RecordType::ALL`] order.
/// Entries with an unknown tag are left out and stay queued.
fn partition_by_type(entries: &[QueueEntry]) -> BTreeMap<RecordType, Vec<&QueueEntry>> {
    let mut batches: BTreeMap<RecordType, Vec<&QueueEntry>> = BTreeMap::new();
    let mut unknown = 0;

    for entry in entries {
        match entry.record_type() {
            Some(record_type) => batches.entry(record_type).or_default().push(entry),
            None => unknown += 1,
        }
    }

    if unknown > 0 {
        log::warn!("{} queued entries have an unknown type and were skipped", unknown);
    }
    batches
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SyncManagerError {
    #[error("Queue error: {0}")]
    QueueError(#[from] QueueError),

    #[error("Database error: {0}")]
    DatabaseError(#[from] DbError),

    #[error("History error: {0}")]
    HistoryError(#[from] HistoryError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network is unavailable")]
    Offline,

    #[error("No operator session")]
    NoOperator,

    #[error("A drain is already in progress")]
    AlreadyRunning,

    #[error("Operation cancelled")]
    Cancelled,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::api::{SubmitReceipt, SyncApiError};
    use crate::sync::connectivity::StaticProbe;
    use crate::sync::models::EntryKind;
    use crate::sync::queue::tests::write_blob;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    /// Sink that fails the listed record types and records every call
    #[derive(Default)]
    struct FakeSink {
        failing: Vec<RecordType>,
        calls: StdMutex<Vec<(RecordType, usize)>>,
    }

    impl FakeSink {
        fn failing(types: &[RecordType]) -> Self {
            Self {
                failing: types.to_vec(),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<(RecordType, usize)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteSink for FakeSink {
        async fn submit(
            &self,
            record_type: RecordType,
            payloads: &[Value],
            _operator: &OperatorIdentity,
        ) -> Result<SubmitReceipt, SyncApiError> {
            self.calls.lock().unwrap().push((record_type, payloads.len()));
            if self.failing.contains(&record_type) {
                Err(SyncApiError::ServerError("500 Internal Server Error".to_string()))
            } else {
                Ok(SubmitReceipt {
                    synced: payloads.len(),
                    ..SubmitReceipt::default()
                })
            }
        }
    }

    fn manual_options(clear_policy: ClearPolicy) -> SyncOptions {
        SyncOptions {
            clear_policy,
            auto_flush_on_enqueue: false,
            bounded: BoundedQueueConfig {
                batch_delay: std::time::Duration::ZERO,
                ..BoundedQueueConfig::default()
            },
        }
    }

    fn create_manager(
        sink: Arc<FakeSink>,
        online: bool,
        clear_policy: ClearPolicy,
    ) -> SyncManager {
        let db = Arc::new(Database::in_memory().expect("Failed to create test DB"));
        let manager = SyncManager::new(
            db,
            sink,
            Arc::new(StaticProbe(online)),
            manual_options(clear_policy),
        );
        manager
            .set_operator(&OperatorIdentity::new("op-1", "Maria"))
            .unwrap();
        manager
    }

    #[tokio::test]
    async fn test_full_success_clears_queue() {
        let sink = Arc::new(FakeSink::default());
        let manager = create_manager(sink.clone(), true, ClearPolicy::AllOrNothing);

        manager.enqueue(RecordType::Material, json!({"mtr": "A1"})).await.unwrap();
        manager.enqueue(RecordType::Pile, json!({"id": "L-1"})).await.unwrap();
        manager.enqueue(RecordType::Material, json!({"mtr": "A2"})).await.unwrap();

        let report = manager.synchronize().await;

        assert!(report.is_synchronized());
        assert_eq!(report.successes, 2);
        assert_eq!(report.errors, 0);
        assert_eq!(manager.queue().size().await, 0);
        assert_eq!(
            sink.calls(),
            vec![(RecordType::Material, 2), (RecordType::Pile, 1)]
        );
        assert!(manager.last_sync_at().is_some());
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_everything() {
        let sink = Arc::new(FakeSink::failing(&[RecordType::Pile]));
        let manager = create_manager(sink.clone(), true, ClearPolicy::AllOrNothing);

        let material = manager.enqueue(RecordType::Material, json!({"mtr": "A1"})).await.unwrap();
        let pile = manager.enqueue(RecordType::Pile, json!({"id": "L-1"})).await.unwrap();

        let report = manager.synchronize().await;

        assert!(!report.is_synchronized());
        assert_eq!(report.defer_reason(), Some(DeferReason::RemoteErrors));
        assert_eq!(report.successes, 1);
        assert_eq!(report.errors, 1);
        assert_eq!(manager.queue().read_all().await, vec![material, pile]);
        assert!(manager.last_sync_at().is_none());
    }

    #[tokio::test]
    async fn test_per_type_policy_removes_synced_types() {
        let sink = Arc::new(FakeSink::failing(&[RecordType::Pile]));
        let manager = create_manager(sink, true, ClearPolicy::PerType);

        manager.enqueue(RecordType::Material, json!({"mtr": "A1"})).await.unwrap();
        let pile = manager.enqueue(RecordType::Pile, json!({"id": "L-1"})).await.unwrap();

        let report = manager.synchronize().await;

        assert!(!report.is_synchronized());
        assert_eq!(manager.queue().read_all().await, vec![pile]);
    }

    #[tokio::test]
    async fn test_offline_short_circuit() {
        let sink = Arc::new(FakeSink::default());
        let manager = create_manager(sink.clone(), false, ClearPolicy::AllOrNothing);

        manager.enqueue(RecordType::Weather, json!({"chuva_mm": 4.5})).await.unwrap();
        let report = manager.synchronize().await;

        assert_eq!(report.defer_reason(), Some(DeferReason::Offline));
        assert!(sink.calls().is_empty());
        assert_eq!(manager.queue().size().await, 1);
    }

    #[tokio::test]
    async fn test_missing_operator_defers() {
        let sink = Arc::new(FakeSink::default());
        let manager = create_manager(sink.clone(), true, ClearPolicy::AllOrNothing);
        manager.clear_operator().unwrap();

        manager.enqueue(RecordType::Monitoring, json!({"id": "M-1"})).await.unwrap();
        let report = manager.synchronize().await;

        assert_eq!(report.defer_reason(), Some(DeferReason::NoOperator));
        assert!(sink.calls().is_empty());
        assert_eq!(manager.queue().size().await, 1);
    }

    #[tokio::test]
    async fn test_per_type_keeps_unknown_entries() {
        let sink = Arc::new(FakeSink::default());
        let manager = create_manager(sink.clone(), true, ClearPolicy::PerType);

        let stray = QueueEntry {
            kind: EntryKind::Unknown("compost_tea".to_string()),
            ..QueueEntry::new(RecordType::Material, json!({}))
        };
        manager.queue().append(stray.clone()).await.unwrap();
        manager.enqueue(RecordType::Enrichment, json!({"id": "E-1"})).await.unwrap();

        let report = manager.synchronize().await;
        assert!(report.is_synchronized());
        assert_eq!(sink.calls(), vec![(RecordType::Enrichment, 1)]);
        // Per-type clearing only removes what was sent
        assert_eq!(manager.queue().read_all().await, vec![stray]);
    }

    #[tokio::test]
    async fn test_full_success_also_clears_unknown_entries() {
        let sink = Arc::new(FakeSink::default());
        let manager = create_manager(sink, true, ClearPolicy::AllOrNothing);

        let stray = QueueEntry {
            kind: EntryKind::Unknown("compost_tea".to_string()),
            ..QueueEntry::new(RecordType::Material, json!({}))
        };
        manager.queue().append(stray).await.unwrap();
        manager.enqueue(RecordType::Pile, json!({"id": "L-8"})).await.unwrap();

        assert!(manager.synchronize().await.is_synchronized());
        assert_eq!(manager.queue().size().await, 0);
    }

    #[tokio::test]
    async fn test_empty_queue_is_synchronized() {
        let sink = Arc::new(FakeSink::default());
        let manager = create_manager(sink.clone(), true, ClearPolicy::AllOrNothing);

        let report = manager.synchronize().await;
        assert!(report.is_synchronized());
        assert_eq!(report.successes, 0);
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_pass_leaves_queue() {
        let sink = Arc::new(FakeSink::default());
        let manager = create_manager(sink.clone(), true, ClearPolicy::AllOrNothing);
        manager.enqueue(RecordType::Pile, json!({"id": "L-3"})).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = manager.synchronize_with(&cancel).await;

        assert_eq!(report.defer_reason(), Some(DeferReason::Cancelled));
        assert!(sink.calls().is_empty());
        assert_eq!(manager.queue().size().await, 1);
    }

    #[tokio::test]
    async fn test_overlapping_pass_is_skipped() {
        let sink = Arc::new(FakeSink::default());
        let manager = create_manager(sink, true, ClearPolicy::AllOrNothing);

        let _held = manager.pass_lock.lock().await;
        let report = manager.synchronize().await;
        assert_eq!(report.defer_reason(), Some(DeferReason::AlreadyRunning));
    }

    #[tokio::test]
    async fn test_passes_are_recorded() {
        let sink = Arc::new(FakeSink::default());
        let manager = create_manager(sink, false, ClearPolicy::AllOrNothing);

        manager.synchronize().await;

        let passes = manager.recent_passes(5).unwrap();
        assert_eq!(passes.len(), 1);
        assert_eq!(passes[0].reason.as_deref(), Some("offline"));
        assert_eq!(
            manager.last_report().await.and_then(|r| r.defer_reason()),
            Some(DeferReason::Offline)
        );
    }

    #[tokio::test]
    async fn test_enqueue_record_serializes() {
        #[derive(Serialize)]
        struct RainReading {
            id: &'static str,
            chuva_mm: f64,
        }

        let sink = Arc::new(FakeSink::default());
        let manager = create_manager(sink, true, ClearPolicy::AllOrNothing);
        let entry = manager
            .enqueue_record(RecordType::Weather, &RainReading { id: "W-1", chuva_mm: 12.5 })
            .await
            .unwrap();

        assert_eq!(entry.payload, json!({"id": "W-1", "chuva_mm": 12.5}));
        assert_eq!(manager.queue_stats().await.by_type.get("weather"), Some(&1));
    }

    #[tokio::test]
    async fn test_flush_bounded_requires_connectivity() {
        let sink = Arc::new(FakeSink::default());
        let manager = create_manager(sink, false, ClearPolicy::AllOrNothing);
        manager
            .enqueue_bounded(RecordType::Monitoring, json!({"id": "M-4", "temp": 61}))
            .await
            .unwrap();

        let result = manager.flush_bounded().await;
        assert!(matches!(result, Err(SyncManagerError::Offline)));
        assert_eq!(manager.bounded_stats().await.total_count, 1);
    }

    #[tokio::test]
    async fn test_unreadable_queue_defers_pass() {
        let sink = Arc::new(FakeSink::default());
        let manager = create_manager(sink.clone(), true, ClearPolicy::AllOrNothing);
        write_blob(&manager.db, SYNC_QUEUE_KEY);

        let report = manager.synchronize().await;

        assert_eq!(report.defer_reason(), Some(DeferReason::Storage));
        assert!(sink.calls().is_empty());
        assert!(manager.last_sync_at().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_flush_skips_connectivity_check() {
        let sink = Arc::new(FakeSink::default());
        // Offline would be reported if connectivity were checked first
        let manager = create_manager(sink, false, ClearPolicy::AllOrNothing);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = manager.flush_bounded_with(&cancel).await;
        assert!(matches!(result, Err(SyncManagerError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cycle_flushes_both_queues() {
        let sink = Arc::new(FakeSink::default());
        let manager = create_manager(sink.clone(), true, ClearPolicy::AllOrNothing);
        manager.enqueue(RecordType::Pile, json!({"id": "L-5"})).await.unwrap();
        manager
            .enqueue_bounded(RecordType::Enrichment, json!({"id": "E-5"}))
            .await
            .unwrap();

        let report = manager.run_cycle(&CancellationToken::new()).await;

        assert!(report.is_synchronized());
        assert_eq!(
            sink.calls(),
            vec![(RecordType::Pile, 1), (RecordType::Enrichment, 1)]
        );
        assert_eq!(manager.queue().size().await, 0);
        assert_eq!(manager.bounded_queue().size().await, 0);
    }

    #[tokio::test]
    async fn test_flush_bounded_drains() {
        let sink = Arc::new(FakeSink::default());
        let manager = create_manager(sink.clone(), true, ClearPolicy::AllOrNothing);
        for n in 0..12 {
            manager
                .enqueue_bounded(RecordType::Monitoring, json!({ "id": format!("M-{}", n) }))
                .await
                .unwrap();
        }

        let summary = manager.flush_bounded().await.unwrap();
        assert_eq!(summary.succeeded, 12);
        assert_eq!(
            sink.calls(),
            vec![(RecordType::Monitoring, 10), (RecordType::Monitoring, 2)]
        );
        assert_eq!(manager.bounded_stats().await.total_count, 0);
    }
}
