use log::{info, warn};

use crate::db::job_repo::JobLease;
use crate::db::{self, book_repo, job_repo, Database, DatabaseError};
use crate::domain::BookStatus;

/// What happened to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back in the queue for another attempt.
    Requeued { retry_count: u32 },
    /// Out of attempts; the job and its book are failed.
    Exhausted { retry_count: u32 },
}

impl RetryDecision {
    pub fn retry_count(self) -> u32 {
        match self {
            RetryDecision::Requeued { retry_count } | RetryDecision::Exhausted { retry_count } => {
                retry_count
            }
        }
    }
}

/// Applies the bounded retry policy to failed attempts.
#[derive(Clone)]
pub struct RetryController {
    db: Database,
    max_retries: u32,
}

impl RetryController {
    pub fn new(db: Database, max_retries: u32) -> Self {
        Self { db, max_retries }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Records the failure of the attempt held by `lease`.
    ///
    /// The failure write (error text, status `failed`, counter increment) is
    /// one statement. Below the ceiling a second write puts the job back to
    /// `waiting`; at the ceiling the job stays `failed` and its book fails.
    ///
    /// A lease whose job was recovered in the meantime is rejected with an
    /// error for which [`DatabaseError::is_stale`] holds, and the job is left
    /// to whoever holds it now.
    pub fn handle_failure(
        &self,
        lease: &JobLease,
        error: &str,
    ) -> Result<RetryDecision, DatabaseError> {
        let job_id = &lease.job_id;
        let attempt = job_repo::record_failure(&self.db, lease, error, &db::now())?;

        if attempt.retry_count < self.max_retries {
            job_repo::requeue(&self.db, job_id, attempt.retry_count, &db::now())?;
            info!(
                "Job {} failed (attempt {}/{}), requeued: {}",
                job_id, attempt.retry_count, self.max_retries, error
            );
            return Ok(RetryDecision::Requeued {
                retry_count: attempt.retry_count,
            });
        }

        book_repo::update_status(&self.db, &attempt.book_id, BookStatus::Failed, &db::now())?;
        warn!(
            "Job {} failed permanently after {} attempts: {}",
            job_id, attempt.retry_count, error
        );
        Ok(RetryDecision::Exhausted {
            retry_count: attempt.retry_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BookParams, JobStatus};
    use crate::submission::submit_book;

    fn setup() -> (Database, JobLease, String) {
        let db = Database::open_in_memory().unwrap();
        let submitted = submit_book(
            &db,
            &BookParams {
                child_name: "Leo".to_string(),
                child_age: 4,
                theme: "Trains".to_string(),
                art_style: "clay".to_string(),
                page_count: 1,
                character_description: None,
                language: "en".to_string(),
            },
        )
        .unwrap();
        let claimed = job_repo::claim_next(&db, &db::now()).unwrap().unwrap();
        assert_eq!(claimed.id, submitted.job_id);
        (db, claimed.lease(), submitted.book_id)
    }

    #[test]
    fn test_first_failure_requeues() {
        let (db, lease, book_id) = setup();
        let retry = RetryController::new(db.clone(), 3);

        let decision = retry.handle_failure(&lease, "timeout").unwrap();
        assert_eq!(decision, RetryDecision::Requeued { retry_count: 1 });

        let job = job_repo::find_by_id(&db, &lease.job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.error.as_deref(), Some("timeout"));
        let book = book_repo::find_by_id(&db, &book_id).unwrap().unwrap();
        assert_eq!(book.status, BookStatus::Generating);
    }

    #[test]
    fn test_failure_at_ceiling_fails_job_and_book() {
        let (db, lease, book_id) = setup();
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE jobs SET retry_count = 2 WHERE id = ?1",
                [&lease.job_id],
            )?;
            Ok(())
        })
        .unwrap();
        let lease = JobLease::new(lease.job_id, 2);
        let retry = RetryController::new(db.clone(), 3);

        let decision = retry.handle_failure(&lease, "rate limited").unwrap();
        assert_eq!(decision, RetryDecision::Exhausted { retry_count: 3 });

        let job = job_repo::find_by_id(&db, &lease.job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, 3);
        let book = book_repo::find_by_id(&db, &book_id).unwrap().unwrap();
        assert_eq!(book.status, BookStatus::Failed);
    }

    #[test]
    fn test_failure_of_waiting_job_is_rejected() {
        let (db, lease, _) = setup();
        let retry = RetryController::new(db.clone(), 3);
        retry.handle_failure(&lease, "first").unwrap();

        // Requeued jobs are not running, so there is no attempt to fail.
        assert!(retry.handle_failure(&lease, "second").is_err());
        let job = job_repo::find_by_id(&db, &lease.job_id).unwrap().unwrap();
        assert_eq!(job.retry_count, 1);
    }

    #[test]
    fn test_failure_of_recovered_attempt_leaves_new_claim_alone() {
        let (db, stale, book_id) = setup();
        let far_future = "9999-01-01T00:00:00.000Z";
        job_repo::recover_stuck(&db, &stale.job_id, far_future, 3, "stalled", far_future)
            .unwrap()
            .unwrap();
        let current = job_repo::claim_next(&db, &db::now()).unwrap().unwrap();
        assert_eq!(current.attempt, 1);
        let retry = RetryController::new(db.clone(), 3);

        let err = retry.handle_failure(&stale, "late timeout").unwrap_err();
        assert!(err.is_stale());

        let job = job_repo::find_by_id(&db, &stale.job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::GeneratingStory);
        assert_eq!(job.retry_count, 1);
        assert_eq!(job.error.as_deref(), Some("stalled"));
        let book = book_repo::find_by_id(&db, &book_id).unwrap().unwrap();
        assert_eq!(book.status, BookStatus::Generating);

        // The live claim can still fail normally.
        let decision = retry.handle_failure(&current.lease(), "timeout").unwrap();
        assert_eq!(decision, RetryDecision::Requeued { retry_count: 2 });
    }
}
