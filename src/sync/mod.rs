//! Sync Module - Offline-First Record Synchronization
//!
//! Yard records (material intake, piles, monitoring readings, weather and
//! enrichments) are captured locally first and pushed to the remote store
//! whenever the device is online and an operator is signed in.
//!
//! Architecture:
//! - Durable queue: pending snapshots persisted in the local settings store
//! - Bounded queue: capped, attempt-tracked queue drained in batches
//! - Per-type endpoints: one failing type never blocks the others
//! - Passes triggered on enqueue, on a timer, or on demand

pub mod api;
pub mod bounded;
pub mod connectivity;
pub mod history;
pub mod manager;
pub mod models;
pub mod queue;
pub mod scheduler;


// Re-export commonly used types
pub use models::{
    ClearPolicy, DeferReason, DrainSummary, EntryKind, OperatorIdentity, PassStatus,
    QueueEntry, QueueStats, RecordType, SyncOutcome, SyncReport, WriteMode,
};

pub use api::{ApiConfig, RemoteSink, SubmitReceipt, SyncApiClient, SyncApiError};
pub use bounded::{BoundedQueue, BoundedQueueConfig};
pub use connectivity::{ConnectivityProbe, HttpProbe, StaticProbe};
pub use history::{HistoryError, HistoryManager, PassRecord};
pub use manager::{SyncManager, SyncManagerError, SyncOptions};
pub use queue::{DurableQueue, QueueError, QueueStore};
pub use scheduler::{BackgroundScheduler, SchedulerConfig, SchedulerError};
