use std::path::{Path, PathBuf};

use crate::config::schema::{CollaboratorMode, Config};
use crate::error::ConfigError;
use crate::secrets::{expand_home, has_secret_source};

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

/// Path of the config file used when none is given: `~/.bookforge/config.json`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".bookforge").join("config.json"))
}

/// Resolves the database file, expanding `~` and falling back to the
/// default location.
pub fn database_path(config: &Config) -> Option<PathBuf> {
    match &config.database_path {
        Some(path) => Some(PathBuf::from(expand_home(path))),
        None => crate::db::default_database_path(),
    }
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let worker = &config.worker;
    for (name, value) in [
        ("worker.poll_interval_secs", worker.poll_interval_secs),
        ("worker.recovery_interval_secs", worker.recovery_interval_secs),
        ("worker.stuck_threshold_secs", worker.stuck_threshold_secs),
        ("worker.max_retries", u64::from(worker.max_retries)),
        (
            "collaborators.request_timeout_secs",
            config.collaborators.request_timeout_secs,
        ),
    ] {
        if value == 0 {
            return Err(ConfigError::Validation {
                message: format!("{} must be at least 1", name),
            });
        }
    }

    // A job that is simply waiting for its next poll must never look stuck.
    if worker.stuck_threshold_secs <= worker.poll_interval_secs {
        return Err(ConfigError::Validation {
            message: format!(
                "worker.stuck_threshold_secs ({}) must exceed worker.poll_interval_secs ({})",
                worker.stuck_threshold_secs, worker.poll_interval_secs
            ),
        });
    }

    let collaborators = &config.collaborators;
    if collaborators.mode == CollaboratorMode::Http {
        for (name, endpoint) in [
            ("story_endpoint", &collaborators.story_endpoint),
            ("illustration_endpoint", &collaborators.illustration_endpoint),
        ] {
            let endpoint = endpoint.as_deref().unwrap_or_default();
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(ConfigError::InvalidCollaborator {
                    field: name,
                    reason: "http mode requires an http(s) URL".to_string(),
                });
            }
        }

        if !has_secret_source(
            collaborators.api_key.as_deref(),
            collaborators.api_key_file.as_deref(),
            collaborators.api_key_env_var.as_deref(),
        ) {
            return Err(ConfigError::InvalidCollaborator {
                field: "api_key",
                reason: "http mode requires one of api_key, api_key_file or api_key_env_var"
                    .to_string(),
            });
        }
    }

    Ok(())
}
