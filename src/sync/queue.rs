//! Offline Queue Module - Durable list of pending sync entries
//!
//! The queue is persisted as a single JSON array under a well-known settings
//! key and is always read and rewritten wholesale.
//!
//! Features:
//! - `QueueStore` trait so producers and the orchestrator share one injectable
//!   service instead of a global
//! - FIFO append order
//! - Corrupt persisted data reads as an empty queue
//! - Every mutation is serialized through one async mutex, so concurrent
//!   appends from independent flows cannot overwrite each other

use super::models::{QueueEntry, QueueStats};
use crate::db::{Database, DbError};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Queue entry is {size} bytes, limit is {limit} bytes")]
    EntryTooLarge { size: usize, limit: usize },
}

// ============================================================================
// Queue Store Contract
// ============================================================================

/// Closure applied by [`QueueStore::mutate`] to the current queue contents
pub type QueueMutation<'a> = &'a mut (dyn FnMut(&mut Vec<QueueEntry>) + Send);

/// Persisted, ordered queue of pending entries
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Read the whole queue in insertion order. Missing or undecodable data
    /// yields an empty queue; storage failures are errors.
    async fn try_read_all(&self) -> Result<Vec<QueueEntry>, QueueError>;

    /// Like [`QueueStore::try_read_all`], with storage failures logged and
    /// read as an empty queue. For status displays only.
    async fn read_all(&self) -> Vec<QueueEntry> {
        match self.try_read_all().await {
            Ok(entries) => entries,
            Err(e) => {
                log::error!("Failed to read queue: {}", e);
                Vec::new()
            }
        }
    }

    /// Overwrite the persisted queue wholesale
    async fn replace(&self, entries: Vec<QueueEntry>) -> Result<(), QueueError>;

    /// Remove the persisted queue entirely
    async fn clear(&self) -> Result<(), QueueError>;

    /// Atomic read-modify-write of the queue
    async fn mutate(&self, f: QueueMutation<'_>) -> Result<(), QueueError>;

    async fn append(&self, entry: QueueEntry) -> Result<(), QueueError> {
        let mut entry = Some(entry);
        self.mutate(&mut |entries| {
            if let Some(entry) = entry.take() {
                entries.push(entry);
            }
        })
        .await
    }

    async fn size(&self) -> usize {
        self.read_all().await.len()
    }

    /// Remove the entries whose id is in `ids`, preserving the order of the
    /// rest. Returns how many were removed.
    async fn remove_ids(&self, ids: &HashSet<Uuid>) -> Result<usize, QueueError> {
        let mut removed = 0;
        self.mutate(&mut |entries| {
            let before = entries.len();
            entries.retain(|e| !ids.contains(&e.id));
            removed = before - entries.len();
        })
        .await?;
        Ok(removed)
    }

    async fn stats(&self) -> QueueStats {
        QueueStats::from_entries(&self.read_all().await)
    }
}

// ============================================================================
// Durable Queue
// ============================================================================

/// Queue persisted in the local settings store under `key`
pub struct DurableQueue {
    db: Arc<Database>,
    key: &'static str,
    lock: Mutex<()>,
}

impl DurableQueue {
    pub fn new(db: Arc<Database>, key: &'static str) -> Self {
        Self {
            db,
            key,
            lock: Mutex::new(()),
        }
    }

    pub fn key(&self) -> &'static str {
        self.key
    }

    /// Load the queue. Storage failures propagate; undecodable data is
    /// reported and treated as empty.
    fn load(&self) -> Result<Vec<QueueEntry>, QueueError> {
        let Some(json) = self.db.get_setting_raw(self.key)? else {
            return Ok(Vec::new());
        };

        match serde_json::from_str::<Vec<QueueEntry>>(&json) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                log::error!(
                    "Queue '{}' is corrupt and will be treated as empty: {}",
                    self.key,
                    e
                );
                Ok(Vec::new())
            }
        }
    }

    fn store(&self, entries: &[QueueEntry]) -> Result<(), QueueError> {
        let json = serde_json::to_string(entries)?;
        self.db.set_setting_raw(self.key, &json)?;
        Ok(())
    }
}

#[async_trait]
impl QueueStore for DurableQueue {
    async fn try_read_all(&self) -> Result<Vec<QueueEntry>, QueueError> {
        let _guard = self.lock.lock().await;
        self.load()
    }

    async fn replace(&self, entries: Vec<QueueEntry>) -> Result<(), QueueError> {
        let _guard = self.lock.lock().await;
        self.store(&entries)
    }

    async fn clear(&self) -> Result<(), QueueError> {
        let _guard = self.lock.lock().await;
        self.db.delete_setting(self.key)?;
        log::info!("Queue '{}' cleared", self.key);
        Ok(())
    }

    async fn mutate(&self, f: QueueMutation<'_>) -> Result<(), QueueError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load()?;
        f(&mut entries);
        self.store(&entries)
    }

    /// Removing the last entries deletes the persisted key, same as `clear`.
    async fn remove_ids(&self, ids: &HashSet<Uuid>) -> Result<usize, QueueError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load()?;
        let before = entries.len();
        entries.retain(|e| !ids.contains(&e.id));

        if entries.is_empty() {
            self.db.delete_setting(self.key)?;
        } else {
            self.store(&entries)?;
        }
        Ok(before - entries.len())
    }
}

// ============================================================================
// Tests
// ============================================================================
