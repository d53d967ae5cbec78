use thiserror::Error;

use crate::collaborators::CollaboratorError;
use crate::db::DatabaseError;
#[derive(Error, Debug)]
pub enum StageError {
    #[error("Database error: {0}")]
    Database(DatabaseError),

    #[error("Collaborator failed: {0}")]
    Collaborator(#[from] CollaboratorError),

    /// Stuck-job recovery took the job away from this run, possibly handing
    /// it to another worker. The run stops without touching the job further.
    #[error("Job '{job_id}' was taken over ({detail})")]
    Superseded { job_id: String, detail: String },

    #[error("Job '{0}' not found")]
    JobNotFound(String),

    #[error("Book '{0}' not found")]
    BookNotFound(String),

    #[error("Story rejected: {0}")]
    InvalidStory(String),

    #[error("Book has no pages")]
    NoPages,

    #[error("Page {page_number} has no image")]
    MissingPageImage { page_number: u32 },

    #[error("Blocking task failed: {0}")]
    TaskFailed(String),
}

impl StageError {
    pub fn is_superseded(&self) -> bool {
        matches!(self, StageError::Superseded { .. })
    }
}

impl From<DatabaseError> for StageError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::StaleStatus { job_id, actual, .. } => StageError::Superseded {
                job_id,
                detail: format!("now {}", actual),
            },
            DatabaseError::LeaseLost {
                job_id, current, ..
            } => StageError::Superseded {
                job_id,
                detail: format!("claimed again as attempt {}", current),
            },
            other => StageError::Database(other),
        }
    }
}
