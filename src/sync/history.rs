//! Sync History Module - log of synchronization passes
//!
//! Every pass the orchestrator runs, synchronized or deferred, is recorded
//! with its counts and per-type outcomes so a status screen can show what
//! happened while nobody was watching. Old rows are pruned by a retention
//! policy.

use super::models::{PassStatus, SyncOutcome, SyncReport};
use crate::db::{Database, DbError};
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ============================================================================
// Types & Structures
// ============================================================================

/// One recorded pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassRecord {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// `synchronized` or `deferred`
    pub status: String,
    pub reason: Option<String>,
    pub successes: i64,
    pub errors: i64,
    pub outcomes: Vec<SyncOutcome>,
}

// ============================================================================
// History Manager
// ============================================================================

pub struct HistoryManager {
    db: Arc<Database>,
}

impl HistoryManager {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Record a finished pass
    pub fn record_pass(&self, report: &SyncReport) -> Result<i64, HistoryError> {
        let (status, reason) = match report.status {
            PassStatus::Synchronized => ("synchronized", None),
            PassStatus::Deferred(reason) => ("deferred", Some(reason.as_str())),
        };
        let details = serde_json::to_string(&report.outcomes)
            .map_err(|e| HistoryError::Serialization(e.to_string()))?;

        let conn = self.db.get_conn()?;
        conn.execute(
            "INSERT INTO sync_history (
                started_at, finished_at, status, reason, successes, errors, details
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                report.started_at.to_rfc3339(),
                report.finished_at.to_rfc3339(),
                status,
                reason,
                report.successes as i64,
                report.errors as i64,
                details,
            ],
        )
        .map_err(DbError::from)?;

        Ok(conn.last_insert_rowid())
    }

    /// Most recent passes, newest first
    pub fn recent(&self, limit: u32) -> Result<Vec<PassRecord>, HistoryError> {
        let conn = self.db.get_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, started_at, finished_at, status, reason, successes, errors, details
                 FROM sync_history
                 ORDER BY id DESC
                 LIMIT ?1",
            )
            .map_err(DbError::from)?;

        let rows = stmt
            .query_map([limit], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, Option<String>>(7)?,
                ))
            })
            .map_err(DbError::from)?;

        let mut records = Vec::new();
        for row in rows {
            let (id, started, finished, status, reason, successes, errors, details) =
                row.map_err(DbError::from)?;
            records.push(PassRecord {
                id,
                started_at: parse_timestamp(&started)?,
                finished_at: parse_timestamp(&finished)?,
                status,
                reason,
                successes,
                errors,
                outcomes: details
                    .and_then(|d| serde_json::from_str(&d).ok())
                    .unwrap_or_default(),
            });
        }

        Ok(records)
    }

    /// Delete passes older than `retention_days`
    pub fn enforce_retention(&self, retention_days: i64) -> Result<usize, HistoryError> {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days);
        let conn = self.db.get_conn()?;
        let deleted = conn
            .execute(
                "DELETE FROM sync_history WHERE started_at < ?1",
                params![cutoff.to_rfc3339()],
            )
            .map_err(DbError::from)?;

        log::info!("Deleted {} old sync history rows", deleted);
        Ok(deleted)
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, HistoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| HistoryError::Serialization(e.to_string()))
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::models::{DeferReason, RecordType};

    fn create_test_manager() -> HistoryManager {
        let db = Arc::new(Database::in_memory().expect("Failed to create test DB"));
        HistoryManager::new(db)
    }

    fn report(status: PassStatus, started_at: DateTime<Utc>) -> SyncReport {
        SyncReport {
            status,
            successes: 1,
            errors: 1,
            outcomes: vec![SyncOutcome {
                record_type: RecordType::Pile,
                succeeded: false,
                record_count: 2,
                error: Some("HTTP 500".to_string()),
            }],
            started_at,
            finished_at: started_at,
        }
    }

    #[test]
    fn test_record_and_read_back() {
        let manager = create_test_manager();

        manager
            .record_pass(&report(PassStatus::Synchronized, Utc::now()))
            .unwrap();
        manager
            .record_pass(&report(
                PassStatus::Deferred(DeferReason::RemoteErrors),
                Utc::now(),
            ))
            .unwrap();

        let records = manager.recent(10).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].status, "deferred");
        assert_eq!(records[0].reason.as_deref(), Some("remote_errors"));
        assert_eq!(records[0].outcomes[0].record_type, RecordType::Pile);
        assert_eq!(records[1].status, "synchronized");
        assert!(records[1].reason.is_none());
    }

    #[test]
    fn test_retention() {
        let manager = create_test_manager();
        let old = Utc::now() - chrono::Duration::days(40);

        manager.record_pass(&report(PassStatus::Synchronized, old)).unwrap();
        manager
            .record_pass(&report(PassStatus::Synchronized, Utc::now()))
            .unwrap();

        assert_eq!(manager.enforce_retention(30).unwrap(), 1);
        assert_eq!(manager.recent(10).unwrap().len(), 1);
    }
}
