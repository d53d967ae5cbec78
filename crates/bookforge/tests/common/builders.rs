//! Builders for test inputs.

#![allow(dead_code)]

use std::time::Duration;

use bookforge::{BookParams, WorkerConfig};

/// Book parameters with `pages` pages.
pub fn book_params(pages: u32) -> BookParams {
    BookParams {
        child_name: "Sam".to_string(),
        child_age: 6,
        theme: "Deep Sea".to_string(),
        art_style: "storybook watercolor".to_string(),
        page_count: pages,
        character_description: Some("a small fox in a yellow raincoat".to_string()),
        language: "en".to_string(),
    }
}

/// Worker settings with a short poll interval, suitable for tests.
pub fn fast_worker_config(max_retries: u32) -> WorkerConfig {
    WorkerConfig {
        poll_interval: Duration::from_millis(10),
        recovery_interval: Duration::from_secs(60),
        stuck_threshold: Duration::from_secs(600),
        max_retries,
    }
}

/// Builder for config JSON documents.
pub struct ConfigJsonBuilder {
    database_path: Option<String>,
    output_directory: String,
    mode: &'static str,
    max_retries: Option<u32>,
    page_regeneration: Option<&'static str>,
}

impl ConfigJsonBuilder {
    pub fn new(output_directory: &str) -> Self {
        Self {
            database_path: None,
            output_directory: output_directory.to_string(),
            mode: "stub",
            max_retries: None,
            page_regeneration: None,
        }
    }

    pub fn database_path(mut self, path: &str) -> Self {
        self.database_path = Some(path.to_string());
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn page_regeneration(mut self, policy: &'static str) -> Self {
        self.page_regeneration = Some(policy);
        self
    }

    pub fn build(self) -> String {
        let mut config = serde_json::json!({
            "version": "1.0",
            "collaborators": { "mode": self.mode },
            "storage": { "output_directory": self.output_directory },
        });
        if let Some(path) = self.database_path {
            config["database_path"] = serde_json::json!(path);
        }
        if let Some(max_retries) = self.max_retries {
            config["worker"] = serde_json::json!({ "max_retries": max_retries });
        }
        if let Some(policy) = self.page_regeneration {
            config["pipeline"] = serde_json::json!({ "page_regeneration": policy });
        }
        config.to_string()
    }
}
