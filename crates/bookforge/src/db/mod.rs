//! Database module for persistent storage.
//!
//! Uses rusqlite (SQLite) with a thread-safe `Database` handle.
//! Access from one process is serialized through a `Mutex<Connection>`;
//! separate worker processes sharing the same file coordinate through
//! SQLite's write lock (`BEGIN IMMEDIATE` plus a busy timeout).
//!
//! SQLite has no row locks, so `BEGIN IMMEDIATE` stands in for
//! `SELECT ... FOR UPDATE SKIP LOCKED`. Claimers do not skip past each other:
//! they serialize on the database-wide write lock, each one seeing the queue
//! as the previous one committed it. The lock is held only for the claim
//! statement, so the wait is short, but a writer that waits longer than
//! `BUSY_TIMEOUT` (5s) fails with a `SQLITE_BUSY` [`DatabaseError::Sqlite`]. A
//! worker logs that as a failed claim and tries again on its next poll.
//!
//! No transaction is ever held across a call to an external service. Each
//! persistence step commits on its own, and every step is safe to re-apply:
//! page images are overwrites, page insertion is guarded by an existence
//! check and a unique index, and progress only moves up.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};

pub mod book_repo;
pub mod error;
pub mod job_repo;
pub mod migrations;
pub mod page_repo;

pub use error::DatabaseError;

/// How long a writer waits for another process to release the lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Thread-safe database handle wrapping a single rusqlite connection.
///
/// Cloning is cheap (inner `Arc`). WAL mode is enabled for file databases so
/// readers in other processes are not blocked by the worker's writes.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (or creates) the database at the given path and runs all
    /// pending migrations.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&conn)?;

        log::info!("Database opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database for testing. Runs all migrations.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Provides locked access to the underlying connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }

    /// Runs `f` inside a `BEGIN IMMEDIATE` transaction.
    ///
    /// The write lock is taken up front, so a read-then-write inside `f` can
    /// not interleave with another process's write. The transaction commits
    /// when `f` returns `Ok` and rolls back otherwise.
    pub fn with_immediate_tx<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, DatabaseError>,
    {
        let mut conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

/// Formats a timestamp the way every table stores it.
///
/// Fixed-width RFC 3339 in UTC with milliseconds, so string comparison in
/// SQL orders timestamps chronologically.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current time in storage format.
pub fn now() -> String {
    timestamp(Utc::now())
}

/// Returns the canonical database path: `~/.bookforge/data/bookforge.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".bookforge").join("data").join("bookforge.db"))
}
