use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BookforgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] crate::collaborators::CollaboratorError),

    #[error("Pipeline error: {0}")]
    Stage(#[from] crate::pipeline::StageError),

    #[error("Submission error: {0}")]
    Submit(#[from] crate::submission::SubmitError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid collaborator setting '{field}': {reason}")]
    InvalidCollaborator { field: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to start runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("Failed to install signal handler: {0}")]
    SignalHandler(String),

    #[error("No home directory to derive the {0} path from")]
    NoHomeDirectory(&'static str),
}

pub type Result<T> = std::result::Result<T, BookforgeError>;
