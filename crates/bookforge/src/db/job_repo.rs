//! Job repository: the job store.
//!
//! Status changes are compare-and-swap writes: the change is checked against
//! the state machine and the `UPDATE` is guarded by the expected status.
//! Writes made on behalf of a running attempt are also fenced by the claim
//! they belong to ([`JobLease`]): `retry_count` at claim time. Every path back
//! to `waiting` increments `retry_count`, so no two claims of a job share a
//! value, and a worker whose job was recovered and claimed again elsewhere
//! cannot write to the new attempt even when the status matches. Progress
//! is only ever raised (`MAX(progress, ?)`).

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{book_repo, Database, DatabaseError};
use crate::domain::{BookStatus, JobStatus};

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub book_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub error: Option<String>,
    pub retry_count: u32,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            book_id: row.get("book_id")?,
            status: row.get("status")?,
            progress: row.get("progress")?,
            error: row.get("error")?,
            retry_count: row.get("retry_count")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

/// Identity of a job handed out by [`claim_next`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedJob {
    pub id: String,
    pub book_id: String,
    /// `retry_count` at claim time; identifies this claim.
    pub attempt: u32,
}

impl ClaimedJob {
    pub fn lease(&self) -> JobLease {
        JobLease::new(self.id.clone(), self.attempt)
    }
}

/// A worker's hold on one claim of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLease {
    pub job_id: String,
    pub attempt: u32,
}

impl JobLease {
    pub fn new(job_id: impl Into<String>, attempt: u32) -> Self {
        Self {
            job_id: job_id.into(),
            attempt,
        }
    }
}

/// Result of recording a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedAttempt {
    pub book_id: String,
    pub retry_count: u32,
}

/// Result of recovering one stalled job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredJob {
    pub id: String,
    pub book_id: String,
    pub status: JobStatus,
    pub retry_count: u32,
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub book_id: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

pub(crate) fn insert_in(conn: &Connection, job: &JobRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO jobs (id, book_id, status, progress, error, retry_count,
         created_at, updated_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            job.id,
            job.book_id,
            job.status,
            job.progress,
            job.error,
            job.retry_count,
            job.created_at,
            job.updated_at,
            job.completed_at,
        ],
    )?;
    Ok(())
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| insert_in(conn, job))
}

fn find_in(conn: &Connection, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM jobs WHERE id = ?1",
            params![id],
            JobRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Reads the job and fails if it is gone.
fn require_in(conn: &Connection, id: &str) -> Result<JobRow, DatabaseError> {
    find_in(conn, id)?.ok_or_else(|| DatabaseError::NotFound {
        entity: "Job",
        id: id.to_string(),
    })
}

/// Checks that `lease` still holds its job: same claim, job still running.
/// Returns the job row.
pub(crate) fn ensure_held_in(conn: &Connection, lease: &JobLease) -> Result<JobRow, DatabaseError> {
    let job = require_in(conn, &lease.job_id)?;
    if job.retry_count != lease.attempt || !job.status.is_in_progress() {
        return Err(DatabaseError::LeaseLost {
            job_id: job.id,
            attempt: lease.attempt,
            current: job.retry_count,
            status: job.status,
        });
    }
    Ok(job)
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| find_in(conn, id))
}

/// Finds the job that produces the given book.
pub fn find_by_book(db: &Database, book_id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM jobs WHERE book_id = ?1",
                params![book_id],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Queries jobs with filters, returning (rows, total_count).
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<JobRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status));
        }
        if let Some(ref book_id) = filter.book_id {
            conditions.push(format!("book_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(book_id.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM jobs {} ORDER BY created_at DESC, id LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<JobRow> = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Counts jobs with the given status.
pub fn count_by_status(db: &Database, status: JobStatus) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            params![status],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Atomically claims the oldest waiting job.
///
/// The select and the status change are one statement inside an immediate
/// transaction, so under any number of concurrent claimers (threads or
/// processes sharing the file) a waiting job is returned to at most one
/// of them. The owning book moves to `generating` in the same transaction.
///
/// Claimers do not skip past each other: a second claimer blocks on the
/// write lock until the first commits, then picks the next waiting job.
/// See the module docs of [`crate::db`] for the busy-timeout behavior.
pub fn claim_next(db: &Database, now: &str) -> Result<Option<ClaimedJob>, DatabaseError> {
    let next = JobStatus::Waiting.transition(JobStatus::GeneratingStory)?;

    db.with_immediate_tx(|tx| {
        let claimed = tx
            .query_row(
                "UPDATE jobs SET status = ?1, updated_at = ?2
                 WHERE id = (
                     SELECT id FROM jobs WHERE status = ?3
                     ORDER BY created_at, id LIMIT 1
                 ) AND status = ?3
                 RETURNING id, book_id, retry_count",
                params![next, now, JobStatus::Waiting],
                |r| {
                    Ok(ClaimedJob {
                        id: r.get(0)?,
                        book_id: r.get(1)?,
                        attempt: r.get(2)?,
                    })
                },
            )
            .optional()?;

        if let Some(ref job) = claimed {
            book_repo::update_status_in(tx, &job.book_id, BookStatus::Generating, now)?;
        }
        Ok(claimed)
    })
}

/// Moves a job from `from` to `to`, raising progress to at least `progress`.
///
/// Fails with [`DatabaseError::StaleStatus`] when the job is no longer in
/// `from`, or [`DatabaseError::LeaseLost`] when it was claimed again since
/// `lease` was issued.
pub fn advance(
    db: &Database,
    lease: &JobLease,
    from: JobStatus,
    to: JobStatus,
    progress: u8,
    now: &str,
) -> Result<(), DatabaseError> {
    from.transition(to)?;

    db.with_immediate_tx(|tx| {
        let changed = tx.execute(
            "UPDATE jobs SET status = ?3, progress = MAX(progress, ?4), updated_at = ?5
             WHERE id = ?1 AND status = ?2 AND retry_count = ?6",
            params![lease.job_id, from, to, progress.min(100), now, lease.attempt],
        )?;
        if changed == 0 {
            return Err(stale(tx, lease, from));
        }
        Ok(())
    })
}

/// Raises progress without changing status. Also refreshes `updated_at`,
/// which keeps a long per-page stage from looking stuck.
pub fn update_progress(
    db: &Database,
    lease: &JobLease,
    status: JobStatus,
    progress: u8,
    now: &str,
) -> Result<(), DatabaseError> {
    db.with_immediate_tx(|tx| {
        let changed = tx.execute(
            "UPDATE jobs SET progress = MAX(progress, ?3), updated_at = ?4
             WHERE id = ?1 AND status = ?2 AND retry_count = ?5",
            params![lease.job_id, status, progress.min(100), now, lease.attempt],
        )?;
        if changed == 0 {
            return Err(stale(tx, lease, status));
        }
        Ok(())
    })
}

/// Finishes a job: status `completed`, progress 100, `completed_at` set,
/// and the book marked `completed`, all in one transaction.
pub fn mark_completed(db: &Database, lease: &JobLease, now: &str) -> Result<(), DatabaseError> {
    let from = JobStatus::AssemblingPdf;
    let to = from.transition(JobStatus::Completed)?;

    db.with_immediate_tx(|tx| {
        let book_id: Option<String> = tx
            .query_row(
                "UPDATE jobs SET status = ?3, progress = 100, completed_at = ?4, updated_at = ?4
                 WHERE id = ?1 AND status = ?2 AND retry_count = ?5
                 RETURNING book_id",
                params![lease.job_id, from, to, now, lease.attempt],
                |r| r.get(0),
            )
            .optional()?;

        match book_id {
            Some(book_id) => book_repo::update_status_in(tx, &book_id, BookStatus::Completed, now),
            None => Err(stale(tx, lease, from)),
        }
    })
}

/// Records a failed attempt: stores the error, sets `failed` and increments
/// `retry_count`, returning the new count.
///
/// Only the attempt named by `lease` can be failed. A lease that lost its job
/// to recovery gets [`DatabaseError::LeaseLost`] and nothing is written, so
/// one attempt is never charged twice.
pub fn record_failure(
    db: &Database,
    lease: &JobLease,
    error: &str,
    now: &str,
) -> Result<FailedAttempt, DatabaseError> {
    db.with_immediate_tx(|tx| {
        let job = require_in(tx, &lease.job_id)?;
        if job.retry_count != lease.attempt {
            return Err(DatabaseError::LeaseLost {
                job_id: job.id,
                attempt: lease.attempt,
                current: job.retry_count,
                status: job.status,
            });
        }
        let next = job.status.transition(JobStatus::Failed)?;

        let retry_count: u32 = tx.query_row(
            "UPDATE jobs SET status = ?3, error = ?4, retry_count = retry_count + 1, updated_at = ?5
             WHERE id = ?1 AND status = ?2 AND retry_count = ?6
             RETURNING retry_count",
            params![lease.job_id, job.status, next, error, now, lease.attempt],
            |r| r.get(0),
        )?;

        Ok(FailedAttempt {
            book_id: job.book_id,
            retry_count,
        })
    })
}

/// Puts a failed job back in the queue. `retry_count` is the count
/// [`record_failure`] returned; the write is skipped if it moved since.
pub fn requeue(db: &Database, id: &str, retry_count: u32, now: &str) -> Result<(), DatabaseError> {
    let from = JobStatus::Failed;
    let to = from.transition(JobStatus::Waiting)?;

    db.with_immediate_tx(|tx| {
        let changed = tx.execute(
            "UPDATE jobs SET status = ?3, updated_at = ?4
             WHERE id = ?1 AND status = ?2 AND retry_count = ?5",
            params![id, from, to, now, retry_count],
        )?;
        if changed == 0 {
            let job = require_in(tx, id)?;
            if job.status != from {
                return Err(DatabaseError::StaleStatus {
                    job_id: job.id,
                    expected: from,
                    actual: job.status,
                });
            }
            return Err(DatabaseError::LeaseLost {
                job_id: job.id,
                attempt: retry_count,
                current: job.retry_count,
                status: job.status,
            });
        }
        Ok(())
    })
}

/// Lists in-progress jobs whose last update is older than `cutoff`.
pub fn find_stuck(db: &Database, cutoff: &str) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs
             WHERE status IN (?1, ?2, ?3) AND updated_at < ?4
             ORDER BY updated_at, id",
        )?;
        let [a, b, c] = JobStatus::IN_PROGRESS;
        let rows = stmt
            .query_map(params![a, b, c, cutoff], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Recovers one stalled job.
///
/// Re-checks staleness inside the transaction, so a job that made progress
/// since [`find_stuck`] ran is left alone (`Ok(None)`). Otherwise the retry
/// counter is incremented and the job goes back to `waiting`, or to `failed`
/// once `max_retries` is reached, in which case the book fails too.
pub fn recover_stuck(
    db: &Database,
    id: &str,
    cutoff: &str,
    max_retries: u32,
    message: &str,
    now: &str,
) -> Result<Option<RecoveredJob>, DatabaseError> {
    db.with_immediate_tx(|tx| {
        let Some(job) = find_in(tx, id)? else {
            return Ok(None);
        };
        if !job.status.is_in_progress() || job.updated_at.as_str() >= cutoff {
            return Ok(None);
        }

        let retry_count = job.retry_count + 1;
        let target = if retry_count >= max_retries {
            JobStatus::Failed
        } else {
            JobStatus::Waiting
        };
        let next = job.status.transition(target)?;

        tx.execute(
            "UPDATE jobs SET status = ?3, retry_count = ?4, error = ?5, updated_at = ?6
             WHERE id = ?1 AND status = ?2",
            params![id, job.status, next, retry_count, message, now],
        )?;

        if next == JobStatus::Failed {
            book_repo::update_status_in(tx, &job.book_id, BookStatus::Failed, now)?;
        }

        Ok(Some(RecoveredJob {
            id: job.id,
            book_id: job.book_id,
            status: next,
            retry_count,
        }))
    })
}

/// Builds the error for a fenced write that matched no row.
fn stale(conn: &Connection, lease: &JobLease, expected: JobStatus) -> DatabaseError {
    match require_in(conn, &lease.job_id) {
        Ok(job) if job.status != expected => DatabaseError::StaleStatus {
            job_id: job.id,
            expected,
            actual: job.status,
        },
        Ok(job) => DatabaseError::LeaseLost {
            job_id: job.id,
            attempt: lease.attempt,
            current: job.retry_count,
            status: job.status,
        },
        Err(e) => e,
    }
}
