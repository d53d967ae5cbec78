pub mod config;
pub mod context;
pub mod error;
pub mod progress;
pub mod runner;
pub mod stage;

pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use error::StageError;
pub use progress::{LogProgress, NoopProgress, ProgressEvent, ProgressReporter, RecordingProgress};
pub use runner::Pipeline;
pub use stage::Stage;
