//! Bounded Queue - capped queue with attempt tracking and batched drain
//!
//! Used for high-volume record types (material intake, monitoring readings,
//! enrichments). On top of the durable queue it enforces:
//! - a capacity ceiling; when full the OLDEST entry is silently evicted to
//!   make room, so pending changes can be lost under pressure
//! - a per-entry size ceiling, rejected at enqueue
//! - a maximum number of failed submission attempts per entry, after which
//!   the entry is dropped
//!
//! Draining sends fixed-size batches with a pause between them so the
//! receiving endpoint is not flooded.

use super::api::RemoteSink;
use super::models::{DrainSummary, OperatorIdentity, QueueEntry, RecordType};
use super::queue::{QueueError, QueueStore};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_CAPACITY: usize = 100;
const DEFAULT_MAX_ENTRY_BYTES: usize = 50 * 1024;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BATCH_SIZE: usize = 10;
const DEFAULT_BATCH_DELAY_MS: u64 = 500;

/// Limits applied by [`BoundedQueue`]
#[derive(Debug, Clone)]
pub struct BoundedQueueConfig {
    pub capacity: usize,
    pub max_entry_bytes: usize,
    pub max_attempts: u32,
    pub batch_size: usize,
    pub batch_delay: Duration,
}

impl Default for BoundedQueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            max_entry_bytes: DEFAULT_MAX_ENTRY_BYTES,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: Duration::from_millis(DEFAULT_BATCH_DELAY_MS),
        }
    }
}

// ============================================================================
// Bounded Queue
// ============================================================================

pub struct BoundedQueue {
    store: Arc<dyn QueueStore>,
    config: BoundedQueueConfig,
}

impl BoundedQueue {
    pub fn new(store: Arc<dyn QueueStore>, config: BoundedQueueConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &BoundedQueueConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    pub async fn read_all(&self) -> Vec<QueueEntry> {
        self.store.read_all().await
    }

    pub async fn size(&self) -> usize {
        self.store.size().await
    }

    /// Append an entry, evicting from the front while the queue is full.
    ///
    /// Returns the entries that were evicted to make room.
    pub async fn append(&self, entry: QueueEntry) -> Result<Vec<QueueEntry>, QueueError> {
        let size = entry.serialized_len()?;
        if size > self.config.max_entry_bytes {
            log::warn!(
                "Rejecting {} entry of {} bytes (limit {})",
                entry.kind_label(),
                size,
                self.config.max_entry_bytes
            );
            return Err(QueueError::EntryTooLarge {
                size,
                limit: self.config.max_entry_bytes,
            });
        }

        let capacity = self.config.capacity.max(1);
        let mut entry = Some(entry);
        let mut evicted = Vec::new();

        self.store
            .mutate(&mut |entries| {
                while entries.len() >= capacity {
                    evicted.push(entries.remove(0));
                }
                if let Some(entry) = entry.take() {
                    entries.push(entry);
                }
            })
            .await?;

        for dropped in &evicted {
            log::warn!(
                "Bounded queue full ({}), evicted oldest {} entry {}",
                capacity,
                dropped.kind_label(),
                dropped.id
            );
        }

        Ok(evicted)
    }

    /// Submit every queued entry of `record_type` to its endpoint in batches.
    ///
    /// Accepted batches are removed; rejected ones have their attempt count
    /// bumped and entries that reach the attempt limit are dropped. The queue
    /// is persisted after each batch, so a crash mid-drain loses at most the
    /// bookkeeping for the batch in flight.
    pub async fn drain(
        &self,
        record_type: RecordType,
        sink: &dyn RemoteSink,
        operator: &OperatorIdentity,
    ) -> Result<DrainSummary, QueueError> {
        let pending: Vec<QueueEntry> = self
            .store
            .try_read_all()
            .await?
            .into_iter()
            .filter(|e| e.record_type() == Some(record_type))
            .collect();

        let mut summary = DrainSummary::default();
        if pending.is_empty() {
            return Ok(summary);
        }

        let batch_size = self.config.batch_size.max(1);
        let batch_count = pending.len().div_ceil(batch_size);
        log::info!(
            "Draining {} {} entries in {} batches",
            pending.len(),
            record_type,
            batch_count
        );

        for (index, batch) in pending.chunks(batch_size).enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.batch_delay).await;
            }

            let ids: HashSet<Uuid> = batch.iter().map(|e| e.id).collect();
            let payloads: Vec<Value> = batch.iter().map(|e| e.payload.clone()).collect();

            match sink.submit(record_type, &payloads, operator).await {
                Ok(receipt) => {
                    self.store.remove_ids(&ids).await?;
                    summary.succeeded += batch.len();
                    log::info!(
                        "{} batch {}/{} accepted ({} synced remotely)",
                        record_type,
                        index + 1,
                        batch_count,
                        receipt.synced
                    );
                }
                Err(e) => {
                    summary.failed += batch.len();
                    summary.dropped += self.record_failure(&ids).await?;
                    log::warn!(
                        "{} batch {}/{} failed: {}",
                        record_type,
                        index + 1,
                        batch_count,
                        e
                    );
                }
            }
        }

        log::info!(
            "Drain of {} finished: {} succeeded, {} failed, {} dropped",
            record_type,
            summary.succeeded,
            summary.failed,
            summary.dropped
        );
        Ok(summary)
    }

    /// Drain every record type present in the queue
    pub async fn drain_all(
        &self,
        sink: &dyn RemoteSink,
        operator: &OperatorIdentity,
    ) -> Result<DrainSummary, QueueError> {
        let present: HashSet<RecordType> = self
            .store
            .try_read_all()
            .await?
            .iter()
            .filter_map(|e| e.record_type())
            .collect();

        let mut total = DrainSummary::default();
        for record_type in RecordType::ALL {
            if present.contains(&record_type) {
                total += self.drain(record_type, sink, operator).await?;
            }
        }
        Ok(total)
    }

    /// Bump attempt counts of a failed batch and drop exhausted entries.
    /// Returns how many entries were dropped.
    async fn record_failure(&self, ids: &HashSet<Uuid>) -> Result<usize, QueueError> {
        let max_attempts = self.config.max_attempts;
        let mut dropped = Vec::new();

        self.store
            .mutate(&mut |entries| {
                for entry in entries.iter_mut().filter(|e| ids.contains(&e.id)) {
                    entry.attempt_count += 1;
                }
                entries.retain(|e| {
                    let exhausted = ids.contains(&e.id) && e.attempt_count >= max_attempts;
                    if exhausted {
                        dropped.push(e.id);
                    }
                    !exhausted
                });
            })
            .await?;

        for id in &dropped {
            log::warn!(
                "Dropping queue entry {} after {} failed attempts",
                id,
                max_attempts
            );
        }
        Ok(dropped.len())
    }
}

// ============================================================================
// Tests
// ============================================================================
