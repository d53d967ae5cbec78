//! Book submission: the producer side of the job queue.

use uuid::Uuid;

use crate::db::book_repo::{self, BookRow};
use crate::db::job_repo::{self, JobRow};
use crate::db::{self, Database, DatabaseError};
use crate::domain::{BookParams, BookStatus, JobStatus};

/// Errors from submitting a book.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Invalid book parameters: {0}")]
    InvalidParams(String),

    #[error("Failed to encode book parameters: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Identifiers of a newly queued book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedBook {
    pub book_id: String,
    pub job_id: String,
}

/// Queues a book for generation.
///
/// The `queued` book and its `waiting` job are written in one transaction,
/// so a worker never sees a job without its book.
pub fn submit_book(db: &Database, params: &BookParams) -> Result<SubmittedBook, SubmitError> {
    params.validate().map_err(SubmitError::InvalidParams)?;

    let now = db::now();
    let book = BookRow {
        id: Uuid::new_v4().to_string(),
        status: BookStatus::Queued,
        params: serde_json::to_string(params)?,
        title: None,
        reference_url: None,
        pdf_url: None,
        created_at: now.clone(),
        updated_at: now.clone(),
    };
    let job = JobRow {
        id: Uuid::new_v4().to_string(),
        book_id: book.id.clone(),
        status: JobStatus::Waiting,
        progress: 0,
        error: None,
        retry_count: 0,
        created_at: now.clone(),
        updated_at: now,
        completed_at: None,
    };

    db.with_immediate_tx(|tx| {
        book_repo::insert_in(tx, &book)?;
        job_repo::insert_in(tx, &job)
    })?;

    log::info!("Queued book {} as job {}", book.id, job.id);

    Ok(SubmittedBook {
        book_id: book.id,
        job_id: job.id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> BookParams {
        BookParams {
            child_name: "Leo".to_string(),
            child_age: 6,
            theme: "Dragon".to_string(),
            art_style: "crayon".to_string(),
            page_count: 4,
            character_description: Some("curly hair, red boots".to_string()),
            language: "en".to_string(),
        }
    }

    #[test]
    fn test_submit_creates_book_and_waiting_job() {
        let db = Database::open_in_memory().unwrap();
        let submitted = submit_book(&db, &params()).unwrap();

        let book = book_repo::find_by_id(&db, &submitted.book_id).unwrap().unwrap();
        assert_eq!(book.status, BookStatus::Queued);
        assert_eq!(book.params().unwrap(), params());

        let job = job_repo::find_by_id(&db, &submitted.job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.book_id, submitted.book_id);
        assert_eq!(job.progress, 0);
        assert_eq!(job.retry_count, 0);
    }

    #[test]
    fn test_invalid_params_write_nothing() {
        let db = Database::open_in_memory().unwrap();
        let mut bad = params();
        bad.page_count = 0;

        let err = submit_book(&db, &bad).unwrap_err();
        assert!(matches!(err, SubmitError::InvalidParams(_)));
        assert_eq!(job_repo::count_by_status(&db, JobStatus::Waiting).unwrap(), 0);
    }
}
