//! Background worker: claims jobs, runs them, and keeps the queue healthy.

pub mod claimer;
pub mod poll_loop;
pub mod recovery;
pub mod retry;
pub mod stats;

pub use claimer::JobClaimer;
pub use poll_loop::{PollOutcome, Worker, WorkerConfig, WorkerState};
pub use recovery::{RecoveryReport, StuckJobRecoverer};
pub use retry::{RetryController, RetryDecision};
pub use stats::{queue_stats, QueueStats};
