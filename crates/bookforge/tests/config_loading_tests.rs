//! Table-driven tests for configuration loading and validation.

mod common;

use std::path::PathBuf;

use bookforge::config::{database_path, load_config, load_config_from_str, PageRegeneration};
use bookforge::Collaborators;

use common::ConfigJsonBuilder;

/// Represents a single config loading test case.
struct ConfigTestCase {
    /// Test case name for identification.
    name: &'static str,
    /// The config JSON content to test.
    config_json: &'static str,
    /// Whether loading should succeed.
    should_succeed: bool,
    /// Expected error substring (if should_succeed is false).
    expected_error: Option<&'static str>,
}

const CONFIG_TESTS: &[ConfigTestCase] = &[
    ConfigTestCase {
        name: "valid_minimal_stub",
        config_json: r#"{
            "version": "1.0",
            "collaborators": { "mode": "stub" },
            "storage": { "output_directory": "/srv/books" }
        }"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "valid_full_http",
        config_json: r#"{
            "version": "1.0",
            "database_path": "/var/lib/bookforge/jobs.db",
            "worker": {
                "poll_interval_secs": 2,
                "recovery_interval_secs": 120,
                "stuck_threshold_secs": 900,
                "max_retries": 5
            },
            "pipeline": { "page_regeneration": "skip_completed" },
            "collaborators": {
                "mode": "http",
                "story_endpoint": "https://story.example.com/v1/stories",
                "illustration_endpoint": "https://art.example.com/v1/",
                "api_key_env_var": "BOOKFORGE_API_KEY",
                "request_timeout_secs": 60
            },
            "storage": { "output_directory": "~/bookforge/artifacts" }
        }"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "invalid_version",
        config_json: r#"{
            "version": "2.0",
            "collaborators": { "mode": "stub" },
            "storage": { "output_directory": "/srv/books" }
        }"#,
        should_succeed: false,
        expected_error: Some("Unsupported config version"),
    },
    ConfigTestCase {
        name: "missing_storage",
        config_json: r#"{
            "version": "1.0",
            "collaborators": { "mode": "stub" }
        }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "unknown_mode",
        config_json: r#"{
            "version": "1.0",
            "collaborators": { "mode": "grpc" },
            "storage": { "output_directory": "/srv/books" }
        }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "unknown_field",
        config_json: r#"{
            "version": "1.0",
            "worker": { "poll_interval_secs": 5, "threads": 4 },
            "collaborators": { "mode": "stub" },
            "storage": { "output_directory": "/srv/books" }
        }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "zero_retries",
        config_json: r#"{
            "version": "1.0",
            "worker": { "max_retries": 0 },
            "collaborators": { "mode": "stub" },
            "storage": { "output_directory": "/srv/books" }
        }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "stuck_threshold_not_above_poll_interval",
        config_json: r#"{
            "version": "1.0",
            "worker": { "poll_interval_secs": 30, "stuck_threshold_secs": 30 },
            "collaborators": { "mode": "stub" },
            "storage": { "output_directory": "/srv/books" }
        }"#,
        should_succeed: false,
        expected_error: Some("must exceed worker.poll_interval_secs"),
    },
    ConfigTestCase {
        name: "http_without_endpoint",
        config_json: r#"{
            "version": "1.0",
            "collaborators": {
                "mode": "http",
                "illustration_endpoint": "https://art.example.com/v1/",
                "api_key": "k"
            },
            "storage": { "output_directory": "/srv/books" }
        }"#,
        should_succeed: false,
        expected_error: Some("story_endpoint"),
    },
    ConfigTestCase {
        name: "http_without_secret_source",
        config_json: r#"{
            "version": "1.0",
            "collaborators": {
                "mode": "http",
                "story_endpoint": "https://story.example.com/v1/stories",
                "illustration_endpoint": "https://art.example.com/v1/"
            },
            "storage": { "output_directory": "/srv/books" }
        }"#,
        should_succeed: false,
        expected_error: Some("api_key"),
    },
    ConfigTestCase {
        name: "malformed_json",
        config_json: r#"{ "version": "1.0", "#,
        should_succeed: false,
        expected_error: Some("Failed to parse config JSON"),
    },
];

#[test]
fn test_config_loading_table() {
    for case in CONFIG_TESTS {
        let result = load_config_from_str(case.config_json);

        if case.should_succeed {
            assert!(
                result.is_ok(),
                "[{}] expected success, got: {:?}",
                case.name,
                result.err()
            );
        } else {
            let err = match result {
                Ok(_) => panic!("[{}] expected failure, got success", case.name),
                Err(e) => e.to_string(),
            };
            if let Some(expected) = case.expected_error {
                assert!(
                    err.contains(expected),
                    "[{}] expected error containing '{}', got: {}",
                    case.name,
                    expected,
                    err
                );
            }
        }
    }
}

#[test]
fn test_load_config_from_file() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let db_file = temp_dir.path().join("jobs.db");
    let output = temp_dir.path().join("out");
    let json = ConfigJsonBuilder::new(output.to_str().unwrap())
        .database_path(db_file.to_str().unwrap())
        .max_retries(4)
        .page_regeneration("skip_completed")
        .build();
    let config_path = temp_dir.path().join("config.json");
    std::fs::write(&config_path, json).unwrap();

    let config = load_config(&config_path).unwrap();
    assert_eq!(config.worker.max_retries, 4);
    assert_eq!(
        config.pipeline.page_regeneration,
        PageRegeneration::SkipCompleted
    );
    assert_eq!(database_path(&config), Some(db_file));

    // Stub mode needs no credentials.
    assert!(Collaborators::from_config(&config).is_ok());
}

#[test]
fn test_load_missing_file() {
    let err = load_config(PathBuf::from("/nonexistent/bookforge/config.json")).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}
