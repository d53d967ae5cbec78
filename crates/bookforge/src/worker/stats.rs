use std::fmt;

use crate::db::{job_repo, Database, DatabaseError};
use crate::domain::JobStatus;

/// Job counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub waiting: u64,
    pub generating_story: u64,
    pub generating_images: u64,
    pub assembling_pdf: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueStats {
    pub fn in_progress(&self) -> u64 {
        self.generating_story + self.generating_images + self.assembling_pdf
    }

    pub fn total(&self) -> u64 {
        self.waiting + self.in_progress() + self.completed + self.failed
    }
}

impl fmt::Display for QueueStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} waiting, {} in progress, {} completed, {} failed",
            self.waiting,
            self.in_progress(),
            self.completed,
            self.failed
        )
    }
}

pub fn queue_stats(db: &Database) -> Result<QueueStats, DatabaseError> {
    Ok(QueueStats {
        waiting: job_repo::count_by_status(db, JobStatus::Waiting)?,
        generating_story: job_repo::count_by_status(db, JobStatus::GeneratingStory)?,
        generating_images: job_repo::count_by_status(db, JobStatus::GeneratingImages)?,
        assembling_pdf: job_repo::count_by_status(db, JobStatus::AssemblingPdf)?,
        completed: job_repo::count_by_status(db, JobStatus::Completed)?,
        failed: job_repo::count_by_status(db, JobStatus::Failed)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::domain::BookParams;
    use crate::submission::submit_book;

    #[test]
    fn test_queue_stats_counts() {
        let db = Database::open_in_memory().unwrap();
        let params = BookParams {
            child_name: "Max".to_string(),
            child_age: 9,
            theme: "Space".to_string(),
            art_style: "watercolor".to_string(),
            page_count: 2,
            character_description: None,
            language: "en".to_string(),
        };
        submit_book(&db, &params).unwrap();
        submit_book(&db, &params).unwrap();
        job_repo::claim_next(&db, &db::now()).unwrap();

        let stats = queue_stats(&db).unwrap();
        assert_eq!(stats.waiting, 1);
        assert_eq!(stats.generating_story, 1);
        assert_eq!(stats.total(), 2);
        assert_eq!(
            stats.to_string(),
            "1 waiting, 1 in progress, 0 completed, 0 failed"
        );
    }
}
