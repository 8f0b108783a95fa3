//! Database module for feed health storage.
//!
//! This module provides SQLite-based persistent storage for:
//! - Feeds (monitored stream URLs) and their last observed snapshot
//! - The check lease queue (one row per feed)
//! - Append-only check history
//! - The singleton preview lock
//! - Check scheduler settings
//!
//! The database file is the only coordination point between worker
//! processes. Every lease and lock mutation runs in a single
//! `BEGIN IMMEDIATE` transaction so concurrent writers serialise on the
//! SQLite write lock instead of interleaving read-then-write sequences.

mod check_history;
mod check_lease;
mod feed;
mod models;
mod preview_lock;
mod schema;

pub use check_lease::{CompleteOutcome, CompletedCheck, LeaseAcquire, LeaseStore, LeaseToken};
pub use models::*;
pub use preview_lock::LockStore;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database error types.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Feed not found: {0}")]
    FeedNotFound(i64),

    #[error("Feed already exists for this URL (id={0})")]
    DuplicateFeed(i64),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Database path error: {0}")]
    PathError(String),
}

pub type Result<T> = std::result::Result<T, DatabaseError>;

/// `amount` units of `unit_secs` seconds, saturating instead of overflowing.
pub(crate) fn span_secs(amount: u64, unit_secs: i64) -> i64 {
    i64::try_from(amount)
        .unwrap_or(i64::MAX)
        .saturating_mul(unit_secs)
}

/// Database handle shared by the scheduler, preview lock and web API.
pub type DatabaseHandle = Arc<Mutex<Database>>;

/// Main database connection wrapper.
pub struct Database {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Database {
    /// Open or create a database at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Self::connect(&path)?;

        let db = Self {
            conn,
            path: Some(path),
        };
        db.initialize_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let db = Self { conn, path: None };
        db.initialize_schema()?;

        Ok(db)
    }

    fn connect(path: &Path) -> Result<Connection> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // WAL lets readers proceed while a worker holds the write lock
        conn.query_row("PRAGMA journal_mode = WAL;", [], |_| Ok(()))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    /// Initialize the database schema.
    fn initialize_schema(&self) -> Result<()> {
        self.conn.execute_batch(schema::SCHEMA_SQL)?;
        Ok(())
    }

    /// Drop the current connection and open a fresh one on the same file.
    ///
    /// Used by the scheduler to resume after the datastore became
    /// unavailable mid-batch.
    pub fn reconnect(&mut self) -> Result<()> {
        let path = self.path.clone().ok_or_else(|| {
            DatabaseError::PathError("in-memory database cannot be reopened".to_string())
        })?;
        let conn = Self::connect(&path)?;
        self.conn = conn;
        log::info!("Database: reconnected to {}", path.display());
        Ok(())
    }

    /// Get the underlying connection (for advanced queries).
    #[cfg(test)]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Begin a write transaction that takes the database write lock up front.
    fn immediate(&mut self) -> rusqlite::Result<Transaction<'_>> {
        self.conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Check scheduler settings storage.
impl Database {
    /// Get check settings, initialising the row with defaults if missing.
    pub fn get_check_settings(&self) -> Result<CheckSettings> {
        let result = self.conn.query_row(
            "SELECT lock_minutes, ok_recheck_hours, fail_retry_min, fail_retry_max,
                    probe_timeout_secs, sweep_interval_secs, max_concurrent_checks,
                    sweep_batch_size, reliability_window_hours
             FROM check_settings WHERE id = 1",
            [],
            |row| {
                Ok(CheckSettings {
                    lock_minutes: row.get(0)?,
                    ok_recheck_hours: row.get(1)?,
                    fail_retry_min: row.get(2)?,
                    fail_retry_max: row.get(3)?,
                    probe_timeout_secs: row.get(4)?,
                    sweep_interval_secs: row.get(5)?,
                    max_concurrent_checks: row.get(6)?,
                    sweep_batch_size: row.get(7)?,
                    reliability_window_hours: row.get(8)?,
                })
            },
        );

        match result {
            Ok(settings) => Ok(settings),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                let defaults = CheckSettings::default();
                self.update_check_settings(&defaults)?;
                Ok(defaults)
            }
            Err(e) => Err(DatabaseError::Sqlite(e)),
        }
    }

    /// Validate and store check settings.
    pub fn update_check_settings(&self, settings: &CheckSettings) -> Result<()> {
        settings.validate().map_err(DatabaseError::InvalidSettings)?;

        self.conn.execute(
            "INSERT OR REPLACE INTO check_settings
             (id, lock_minutes, ok_recheck_hours, fail_retry_min, fail_retry_max,
              probe_timeout_secs, sweep_interval_secs, max_concurrent_checks,
              sweep_batch_size, reliability_window_hours, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, strftime('%s', 'now'))",
            rusqlite::params![
                settings.lock_minutes,
                settings.ok_recheck_hours,
                settings.fail_retry_min,
                settings.fail_retry_max,
                settings.probe_timeout_secs,
                settings.sweep_interval_secs,
                settings.max_concurrent_checks as i64,
                settings.sweep_batch_size as i64,
                settings.reliability_window_hours,
            ],
        )?;
        Ok(())
    }
}
