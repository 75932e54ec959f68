//! Database module for Leira Sync
//!
//! Local SQLite store behind every persisted key of the sync subsystem:
//! the pending queues, the current operator session, the last sync timestamp
//! and the scheduler configuration all live in the `settings` table as JSON.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

// Connection pooling
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

/// Database error types
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Database manager for thread-safe SQLite access
#[derive(Clone)]
pub struct Database {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl Database {
    /// Create a new database connection pool backed by a file
    pub fn new(db_path: PathBuf) -> DbResult<Self> {
        let manager = SqliteConnectionManager::file(&db_path);

        let pool = Pool::builder()
            .max_size(8)
            .min_idle(Some(1))
            .connection_timeout(std::time::Duration::from_secs(10))
            .build(manager)?;

        let conn = pool.get()?;

        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        "#,
        )?;

        Self::initialize_schema(&conn)?;
        drop(conn);

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Create an in-memory database (for testing)
    ///
    /// Every pooled connection to `:memory:` opens a separate database, so the
    /// pool is pinned to a single connection.
    pub fn in_memory() -> DbResult<Self> {
        let manager = SqliteConnectionManager::memory();

        let pool = Pool::builder().max_size(1).build(manager)?;

        let conn = pool.get()?;
        Self::initialize_schema(&conn)?;
        drop(conn);

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Get a connection from the pool
    #[inline]
    pub fn get_conn(&self) -> DbResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn initialize_schema(conn: &Connection) -> DbResult<()> {
        let schema = include_str!("schema.sql");
        conn.execute_batch(schema)?;
        Ok(())
    }

    // =========================================================================
    // SETTINGS
    // =========================================================================

    /// Get a setting value
    pub fn get_setting<T: serde::de::DeserializeOwned>(&self, key: &str) -> DbResult<Option<T>> {
        match self.get_setting_raw(key)? {
            Some(json) => {
                let value: T = serde_json::from_str(&json)
                    .map_err(|e| DbError::Serialization(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Get the stored JSON text of a setting without decoding it
    pub fn get_setting_raw(&self, key: &str) -> DbResult<Option<String>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                [key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Set a setting value
    pub fn set_setting<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> DbResult<()> {
        let json = serde_json::to_string(value)
            .map_err(|e| DbError::Serialization(e.to_string()))?;
        self.set_setting_raw(key, &json)
    }

    /// Store already-encoded JSON text under `key`
    pub fn set_setting_raw(&self, key: &str, json: &str) -> DbResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?1, ?2, datetime('now'))",
            params![key, json],
        )?;
        Ok(())
    }

    /// Remove a setting entirely. Returns whether a row existed.
    pub fn delete_setting(&self, key: &str) -> DbResult<bool> {
        let conn = self.get_conn()?;
        let rows = conn.execute("DELETE FROM settings WHERE key = ?1", [key])?;
        Ok(rows > 0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings() {
        let db = Database::in_memory().expect("Failed to create database");

        let missing: Option<String> = db.get_setting("theme").expect("Failed to get setting");
        assert_eq!(missing, None);

        db.set_setting("custom_key", "custom_value")
            .expect("Failed to set setting");

        let value: Option<String> = db.get_setting("custom_key").expect("Failed to get setting");
        assert_eq!(value, Some("custom_value".to_string()));
    }

    #[test]
    fn test_delete_setting() {
        let db = Database::in_memory().unwrap();

        db.set_setting("lastSyncTimestamp", "2026-01-01T00:00:00Z").unwrap();
        assert!(db.delete_setting("lastSyncTimestamp").unwrap());
        assert!(!db.delete_setting("lastSyncTimestamp").unwrap());
        assert!(db.get_setting_raw("lastSyncTimestamp").unwrap().is_none());
    }

    #[test]
    fn test_raw_value_is_not_decoded() {
        let db = Database::in_memory().unwrap();

        db.set_setting_raw("syncQueue", "{not json").unwrap();
        assert_eq!(db.get_setting_raw("syncQueue").unwrap().as_deref(), Some("{not json"));

        let decoded: DbResult<Option<Vec<String>>> = db.get_setting("syncQueue");
        assert!(matches!(decoded, Err(DbError::Serialization(_))));
    }

    #[test]
    fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leira.db");

        {
            let db = Database::new(path.clone()).unwrap();
            db.set_setting("currentOperator", &serde_json::json!({"id": "op-1", "name": "Ana"}))
                .unwrap();
        }

        let db = Database::new(path).unwrap();
        let value: Option<serde_json::Value> = db.get_setting("currentOperator").unwrap();
        assert_eq!(value.unwrap()["name"], "Ana");
    }
}
