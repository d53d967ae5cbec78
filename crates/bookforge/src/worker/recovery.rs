use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{error, info, warn};

use crate::db::{self, job_repo, Database, DatabaseError};
use crate::domain::JobStatus;

/// Result of one recovery sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Jobs put back to `waiting`.
    pub requeued: Vec<String>,
    /// Jobs that hit the retry ceiling and were failed.
    pub failed: Vec<String>,
    /// Jobs that made progress between the scan and the write.
    pub skipped: usize,
    /// Jobs whose recovery write errored.
    pub errors: usize,
}

impl RecoveryReport {
    pub fn recovered(&self) -> usize {
        self.requeued.len() + self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recovered() == 0 && self.skipped == 0 && self.errors == 0
    }
}

/// Returns jobs abandoned by a crashed or stalled worker to the queue.
///
/// A job counts as stuck when it sits in an in-progress status and its
/// `updated_at` is older than the threshold. Every recovery consumes one
/// retry, so a job that keeps killing its worker ends up `failed`.
#[derive(Clone)]
pub struct StuckJobRecoverer {
    db: Database,
    stuck_threshold: Duration,
    max_retries: u32,
}

impl StuckJobRecoverer {
    pub fn new(db: Database, stuck_threshold: Duration, max_retries: u32) -> Self {
        Self {
            db,
            stuck_threshold,
            max_retries,
        }
    }

    pub fn recover_stuck_jobs(&self) -> Result<RecoveryReport, DatabaseError> {
        self.recover_at(Utc::now())
    }

    /// Sweeps relative to `now`.
    pub fn recover_at(&self, now: DateTime<Utc>) -> Result<RecoveryReport, DatabaseError> {
        let mut report = RecoveryReport::default();

        let Some(cutoff) = chrono::Duration::from_std(self.stuck_threshold)
            .ok()
            .and_then(|threshold| now.checked_sub_signed(threshold))
        else {
            return Ok(report);
        };
        let cutoff = db::timestamp(cutoff);
        let now = db::timestamp(now);

        let stuck = job_repo::find_stuck(&self.db, &cutoff)?;
        if stuck.is_empty() {
            return Ok(report);
        }
        info!("Found {} stuck job(s) not updated since {}", stuck.len(), cutoff);

        for job in stuck {
            let message = format!("Recovered after worker stalled in {}", job.status);
            match job_repo::recover_stuck(
                &self.db,
                &job.id,
                &cutoff,
                self.max_retries,
                &message,
                &now,
            ) {
                Ok(Some(recovered)) if recovered.status == JobStatus::Failed => {
                    warn!(
                        "Stuck job {} failed permanently after {} attempts",
                        recovered.id, recovered.retry_count
                    );
                    report.failed.push(recovered.id);
                }
                Ok(Some(recovered)) => {
                    info!(
                        "Requeued stuck job {} (attempt {}/{})",
                        recovered.id, recovered.retry_count, self.max_retries
                    );
                    report.requeued.push(recovered.id);
                }
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    error!("Failed to recover job {}: {}", job.id, e);
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }
}
