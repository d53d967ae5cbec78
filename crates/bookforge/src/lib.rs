pub mod collaborators;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod pipeline;
pub mod secrets;
pub mod submission;
pub mod worker;

pub use collaborators::{CollaboratorError, Collaborators};
pub use config::{load_config, Config};
pub use db::{Database, DatabaseError};
pub use domain::{BookParams, BookStatus, JobStatus};
pub use error::{BookforgeError, ConfigError, Result, WorkerError};
pub use pipeline::{Pipeline, PipelineConfig, PipelineContext, StageError};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
pub use submission::{submit_book, SubmittedBook};
pub use worker::{RetryController, StuckJobRecoverer, Worker, WorkerConfig};
