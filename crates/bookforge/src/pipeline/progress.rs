use std::sync::Mutex;

use super::stage::Stage;

/// Events emitted by the pipeline while a job runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Stage {
        stage: Stage,
        progress: u8,
    },
    Page {
        page_number: u32,
        total: u32,
        progress: u8,
    },
    Completed {
        pdf_url: String,
    },
    Failed {
        error: String,
    },
}

impl ProgressEvent {
    /// The progress value the event carries, if any.
    pub fn progress(&self) -> Option<u8> {
        match self {
            ProgressEvent::Stage { progress, .. } | ProgressEvent::Page { progress, .. } => {
                Some(*progress)
            }
            ProgressEvent::Completed { .. } => Some(100),
            ProgressEvent::Failed { .. } => None,
        }
    }
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, job_id: &str, event: ProgressEvent);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _job_id: &str, _event: ProgressEvent) {}
}

/// Writes events to the log.
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn report(&self, job_id: &str, event: ProgressEvent) {
        match event {
            ProgressEvent::Stage { stage, progress } => {
                tracing::info!(job_id, %stage, progress, "Stage started");
            }
            ProgressEvent::Page {
                page_number,
                total,
                progress,
            } => {
                tracing::debug!(job_id, page_number, total, progress, "Page illustrated");
            }
            ProgressEvent::Completed { pdf_url } => {
                tracing::info!(job_id, %pdf_url, "Book completed");
            }
            ProgressEvent::Failed { error } => {
                tracing::warn!(job_id, %error, "Run failed");
            }
        }
    }
}

/// Keeps every event in memory.
#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<(String, ProgressEvent)>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, ProgressEvent)> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Progress values reported for `job_id`, in order.
    pub fn progress_values(&self, job_id: &str) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter(|(id, _)| id == job_id)
            .filter_map(|(_, event)| event.progress())
            .collect()
    }
}

impl ProgressReporter for RecordingProgress {
    fn report(&self, job_id: &str, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push((job_id.to_string(), event));
        }
    }
}
