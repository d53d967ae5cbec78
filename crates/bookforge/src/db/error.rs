//! Database error types.

use std::path::PathBuf;
use thiserror::Error;

use crate::domain::{JobStatus, TransitionError};

/// Errors from database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// The database lock was poisoned.
    #[error("Database lock poisoned")]
    LockPoisoned,

    /// A row the operation depends on does not exist.
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    /// A compare-and-swap status write found the job in another status.
    #[error("Job '{job_id}' expected in status {expected}, found {actual}")]
    StaleStatus {
        job_id: String,
        expected: JobStatus,
        actual: JobStatus,
    },

    /// The job was recovered and claimed again after this lease was issued,
    /// or is no longer running.
    #[error("Job '{job_id}' no longer held by attempt {attempt} (now attempt {current}, {status})")]
    LeaseLost {
        job_id: String,
        attempt: u32,
        current: u32,
        status: JobStatus,
    },

    /// The requested status change is not an edge of the state machine.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// A stored value could not be decoded.
    #[error("Invalid {column} on row '{id}': {reason}")]
    InvalidRow {
        column: &'static str,
        id: String,
        reason: String,
    },
}

impl DatabaseError {
    /// True when a fenced write lost to another owner of the job.
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            DatabaseError::StaleStatus { .. } | DatabaseError::LeaseLost { .. }
        )
    }
}
