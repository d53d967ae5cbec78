use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// SQLite file; defaults to `~/.bookforge/data/bookforge.db`.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default)]
    pub worker: WorkerSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    pub collaborators: CollaboratorSettings,
    pub storage: StorageSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_recovery_interval_secs")]
    pub recovery_interval_secs: u64,
    #[serde(default = "default_stuck_threshold_secs")]
    pub stuck_threshold_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_recovery_interval_secs() -> u64 {
    300
}

fn default_stuck_threshold_secs() -> u64 {
    600
}

fn default_max_retries() -> u32 {
    3
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            recovery_interval_secs: default_recovery_interval_secs(),
            stuck_threshold_secs: default_stuck_threshold_secs(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default)]
    pub page_regeneration: PageRegeneration,
}

/// What the per-page stage does with pages that already have an image when
/// a job is retried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageRegeneration {
    /// Regenerate every page on every attempt.
    #[default]
    AlwaysRedo,
    /// Keep existing page images and only draw the missing ones.
    SkipCompleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollaboratorMode {
    Http,
    Stub,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorSettings {
    pub mode: CollaboratorMode,
    #[serde(default)]
    pub story_endpoint: Option<String>,
    #[serde(default)]
    pub illustration_endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default)]
    pub api_key_env_var: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    pub output_directory: String,
}
