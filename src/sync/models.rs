//! Sync Data Models
//!
//! Defines the structures shared by the queue, the API client and the
//! orchestrator:
//! - RecordType: the five kinds of yard records that are synchronized
//! - QueueEntry: one pending change captured at enqueue time
//! - OperatorIdentity: the local user attributed to synced writes
//! - SyncOutcome / SyncReport / DrainSummary: pass accounting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Persisted Keys
// ============================================================================

pub const SYNC_QUEUE_KEY: &str = "syncQueue";
pub const BOUNDED_QUEUE_KEY: &str = "boundedSyncQueue";
pub const CURRENT_OPERATOR_KEY: &str = "currentOperator";
pub const LAST_SYNC_KEY: &str = "lastSyncTimestamp";

// ============================================================================
// Record Types
// ============================================================================

/// Kind of yard record carried by a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    Material,
    Pile,
    Monitoring,
    Weather,
    Enrichment,
}

/// How the receiving endpoint writes a batch into the remote table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Insert-or-update keyed by `conflict_target`; resubmission is safe.
    Upsert { conflict_target: &'static str },
    /// Plain insert; resubmitting a batch duplicates remote rows.
    Insert,
}

impl RecordType {
    pub const ALL: [RecordType; 5] = [
        RecordType::Material,
        RecordType::Pile,
        RecordType::Monitoring,
        RecordType::Weather,
        RecordType::Enrichment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Material => "material",
            Self::Pile => "pile",
            Self::Monitoring => "monitoring",
            Self::Weather => "weather",
            Self::Enrichment => "enrichment",
        }
    }

    /// Key under which the payload array travels in the request body
    pub fn body_key(&self) -> &'static str {
        match self {
            Self::Material => "materiais",
            Self::Pile => "leiras",
            Self::Monitoring => "monitoramentos",
            Self::Weather => "clima",
            Self::Enrichment => "enriquecimentos",
        }
    }

    /// Endpoint path relative to the API base URL
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::Material => "sync-materiais",
            Self::Pile => "sync-leiras",
            Self::Monitoring => "sync-monitoramento",
            Self::Weather => "sync-clima",
            Self::Enrichment => "sync-enriquecimento",
        }
    }

    /// Remote write semantics of this type's endpoint.
    ///
    /// Weather readings carry an id but the endpoint still inserts.
    pub fn write_mode(&self) -> WriteMode {
        match self {
            Self::Pile | Self::Monitoring => WriteMode::Upsert { conflict_target: "id" },
            Self::Material | Self::Weather | Self::Enrichment => WriteMode::Insert,
        }
    }

    pub fn is_idempotent(&self) -> bool {
        matches!(self.write_mode(), WriteMode::Upsert { .. })
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type tag of a persisted entry.
///
/// Entries written by another build may carry a tag this one does not know;
/// those are kept verbatim instead of failing the whole queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryKind {
    Known(RecordType),
    Unknown(String),
}

impl EntryKind {
    pub fn record_type(&self) -> Option<RecordType> {
        match self {
            Self::Known(record_type) => Some(*record_type),
            Self::Unknown(_) => None,
        }
    }
}

impl From<RecordType> for EntryKind {
    fn from(record_type: RecordType) -> Self {
        Self::Known(record_type)
    }
}

// ============================================================================
// Queue Entries
// ============================================================================

/// One pending change.
///
/// The payload is a snapshot taken at enqueue time and is never edited in
/// place; a later edit of the same record is enqueued as a new entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub payload: Value,
    /// Epoch milliseconds
    pub enqueued_at: i64,
    #[serde(default)]
    pub attempt_count: u32,
}

impl QueueEntry {
    pub fn new(record_type: RecordType, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: EntryKind::Known(record_type),
            payload,
            enqueued_at: Utc::now().timestamp_millis(),
            attempt_count: 0,
        }
    }

    pub fn record_type(&self) -> Option<RecordType> {
        self.kind.record_type()
    }

    /// Type tag as written in the queue
    pub fn kind_label(&self) -> &str {
        match &self.kind {
            EntryKind::Known(record_type) => record_type.as_str(),
            EntryKind::Unknown(tag) => tag,
        }
    }

    /// Size of the entry as it is persisted
    pub fn serialized_len(&self) -> Result<usize, serde_json::Error> {
        serde_json::to_vec(self).map(|bytes| bytes.len())
    }
}

/// Queue statistics for status displays
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total_count: usize,
    pub by_type: BTreeMap<String, usize>,
    pub oldest_enqueued_at: Option<i64>,
}

impl QueueStats {
    pub fn from_entries(entries: &[QueueEntry]) -> Self {
        let mut by_type = BTreeMap::new();
        for entry in entries {
            *by_type.entry(entry.kind_label().to_string()).or_insert(0) += 1;
        }

        Self {
            total_count: entries.len(),
            by_type,
            oldest_enqueued_at: entries.iter().map(|e| e.enqueued_at).min(),
        }
    }
}

// ============================================================================
// Operator
// ============================================================================

/// The authenticated local user, read from the current session record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorIdentity {
    pub id: String,
    pub name: String,
}

impl OperatorIdentity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

// ============================================================================
// Pass Accounting
// ============================================================================

/// Result of submitting one record type during a pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub record_type: RecordType,
    pub succeeded: bool,
    pub record_count: usize,
    pub error: Option<String>,
}

/// Which entries are removed when a pass finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClearPolicy {
    /// Clear the queue only when every type succeeded; otherwise keep all of
    /// it, including types that were accepted remotely. Insert-only types may
    /// be written twice on the next pass.
    #[default]
    AllOrNothing,
    /// Remove the entries of every type that succeeded and keep the rest.
    PerType,
}

/// Why a pass ended without synchronizing the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferReason {
    Offline,
    NoOperator,
    AlreadyRunning,
    Cancelled,
    RemoteErrors,
    Storage,
}

impl DeferReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::NoOperator => "no_operator",
            Self::AlreadyRunning => "already_running",
            Self::Cancelled => "cancelled",
            Self::RemoteErrors => "remote_errors",
            Self::Storage => "storage",
        }
    }
}

/// Terminal state of a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum PassStatus {
    Synchronized,
    Deferred(DeferReason),
}

/// Pass-level report returned by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub status: PassStatus,
    pub successes: usize,
    pub errors: usize,
    pub outcomes: Vec<SyncOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    pub fn deferred(reason: DeferReason, started_at: DateTime<Utc>) -> Self {
        Self {
            status: PassStatus::Deferred(reason),
            successes: 0,
            errors: 0,
            outcomes: Vec::new(),
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// The boolean the UI surfaces after "sync now"
    pub fn is_synchronized(&self) -> bool {
        self.status == PassStatus::Synchronized
    }

    pub fn defer_reason(&self) -> Option<DeferReason> {
        match self.status {
            PassStatus::Deferred(reason) => Some(reason),
            PassStatus::Synchronized => None,
        }
    }
}

/// Result of one bounded-queue drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Entries removed after exhausting their attempts
    pub dropped: usize,
}

impl std::ops::AddAssign for DrainSummary {
    fn add_assign(&mut self, other: Self) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.dropped += other.dropped;
    }
}

// ============================================================================
// Tests
// ============================================================================
