use log::debug;

use crate::db::job_repo::{self, ClaimedJob};
use crate::db::{self, Database, DatabaseError};

/// Hands out waiting jobs, each to exactly one caller.
///
/// The claim is a single conditional `UPDATE` inside an immediate
/// transaction, so the guarantee holds across threads sharing a handle and
/// across processes sharing the database file. Concurrent claimers queue on
/// SQLite's write lock rather than skipping ahead; see [`crate::db`].
#[derive(Clone)]
pub struct JobClaimer {
    db: Database,
}

impl JobClaimer {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Claims the oldest waiting job, moving it to `generating_story`.
    /// Returns `None` when nothing is waiting.
    pub fn claim_next(&self) -> Result<Option<ClaimedJob>, DatabaseError> {
        let claimed = job_repo::claim_next(&self.db, &db::now())?;
        if let Some(ref job) = claimed {
            debug!("Claimed job {} (book {})", job.id, job.book_id);
        }
        Ok(claimed)
    }
}
