//! Job and book status types.
//!
//! `JobStatus` is the pipeline state machine. Every status write in the
//! store goes through [`JobStatus::transition`], so an illegal edge is
//! rejected before any SQL runs.

use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status of a job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Eligible for a claim.
    Waiting,
    GeneratingStory,
    GeneratingImages,
    AssemblingPdf,
    Completed,
    Failed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Illegal job status transition {from} -> {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown status '{0}'")]
pub struct ParseStatusError(pub String);

impl JobStatus {
    /// Statuses held by a worker while a stage runs.
    pub const IN_PROGRESS: [JobStatus; 3] = [
        JobStatus::GeneratingStory,
        JobStatus::GeneratingImages,
        JobStatus::AssemblingPdf,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::GeneratingStory => "generating_story",
            JobStatus::GeneratingImages => "generating_images",
            JobStatus::AssemblingPdf => "assembling_pdf",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_in_progress(self) -> bool {
        Self::IN_PROGRESS.contains(&self)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Returns true if `next` is a legal successor of `self`.
    ///
    /// Forward edges follow the stage order. In-progress statuses may drop to
    /// `Failed` (attempt failed) or `Waiting` (stalled worker recovered), and
    /// `Failed` may go back to `Waiting` when a retry is granted. Nothing
    /// leaves `Completed`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;

        matches!(
            (self, next),
            (Waiting, GeneratingStory)
                | (GeneratingStory, GeneratingImages)
                | (GeneratingImages, AssemblingPdf)
                | (AssemblingPdf, Completed)
                | (GeneratingStory | GeneratingImages | AssemblingPdf, Failed)
                | (GeneratingStory | GeneratingImages | AssemblingPdf, Waiting)
                | (Failed, Waiting)
        )
    }

    pub fn transition(self, next: JobStatus) -> Result<JobStatus, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobStatus::Waiting),
            "generating_story" => Ok(JobStatus::GeneratingStory),
            "generating_images" => Ok(JobStatus::GeneratingImages),
            "assembling_pdf" => Ok(JobStatus::AssemblingPdf),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

impl ToSql for JobStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for JobStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: ParseStatusError| FromSqlError::Other(Box::new(e)))
    }
}

/// Coarse status of a book. Mirrors the terminal states of its job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookStatus {
    Queued,
    Generating,
    Completed,
    Failed,
}

impl BookStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookStatus::Queued => "queued",
            BookStatus::Generating => "generating",
            BookStatus::Completed => "completed",
            BookStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for BookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(BookStatus::Queued),
            "generating" => Ok(BookStatus::Generating),
            "completed" => Ok(BookStatus::Completed),
            "failed" => Ok(BookStatus::Failed),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

impl ToSql for BookStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for BookStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: ParseStatusError| FromSqlError::Other(Box::new(e)))
    }
}
