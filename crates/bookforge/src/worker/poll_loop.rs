use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::db::job_repo::JobLease;
use crate::db::Database;
use crate::pipeline::{Pipeline, ProgressEvent, ProgressReporter};

use super::claimer::JobClaimer;
use super::recovery::{RecoveryReport, StuckJobRecoverer};
use super::retry::{RetryController, RetryDecision};

/// Timing and retry settings of a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub recovery_interval: Duration,
    pub stuck_threshold: Duration,
    pub max_retries: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            recovery_interval: Duration::from_secs(300),
            stuck_threshold: Duration::from_secs(600),
            max_retries: 3,
        }
    }
}

impl WorkerConfig {
    pub fn from_config(config: &Config) -> Self {
        let worker = &config.worker;
        Self {
            poll_interval: Duration::from_secs(worker.poll_interval_secs),
            recovery_interval: Duration::from_secs(worker.recovery_interval_secs),
            stuck_threshold: Duration::from_secs(worker.stuck_threshold_secs),
            max_retries: worker.max_retries,
        }
    }
}

/// Counters kept by a running worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerState {
    /// Job currently being run, if any.
    pub current_job: Option<String>,
    pub claimed: u64,
    pub completed: u64,
    pub requeued: u64,
    pub failed: u64,
    pub superseded: u64,
    pub recovered: u64,
}

/// What a single poll did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing was waiting.
    Idle,
    Completed {
        job_id: String,
    },
    /// The attempt failed. `decision` is `None` when the failure could not be
    /// recorded; stuck-job recovery picks such jobs up later.
    Failed {
        job_id: String,
        error: String,
        decision: Option<RetryDecision>,
    },
    /// Another party took the job over mid-run.
    Superseded {
        job_id: String,
    },
    /// The claim itself failed.
    ClaimError {
        error: String,
    },
}

/// A single-job-at-a-time worker.
///
/// Polls for waiting jobs, runs each through the pipeline to completion and
/// routes failures to the retry controller. Runs a stuck-job sweep at start
/// and on its own interval.
pub struct Worker {
    pipeline: Pipeline,
    claimer: JobClaimer,
    retry: RetryController,
    recoverer: StuckJobRecoverer,
    progress: Arc<dyn ProgressReporter>,
    config: WorkerConfig,
    state: WorkerState,
}

impl Worker {
    pub fn new(
        db: Database,
        pipeline: Pipeline,
        progress: Arc<dyn ProgressReporter>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            pipeline,
            claimer: JobClaimer::new(db.clone()),
            retry: RetryController::new(db.clone(), config.max_retries),
            recoverer: StuckJobRecoverer::new(db, config.stuck_threshold, config.max_retries),
            progress,
            config,
            state: WorkerState::default(),
        }
    }

    pub fn state(&self) -> &WorkerState {
        &self.state
    }

    /// Claims one job and runs it to the end.
    ///
    /// The run happens on its own task so a panic inside a stage is caught
    /// at the join and treated as an ordinary failure.
    pub async fn poll_once(&mut self) -> PollOutcome {
        let claimed = match self.claimer.claim_next() {
            Ok(Some(job)) => job,
            Ok(None) => return PollOutcome::Idle,
            Err(e) => {
                error!("Failed to claim job: {}", e);
                return PollOutcome::ClaimError {
                    error: e.to_string(),
                };
            }
        };

        let lease = claimed.lease();
        let job_id = claimed.id;
        info!(
            "Running job {} (attempt {}) for book {}",
            job_id, claimed.attempt, claimed.book_id
        );
        self.state.claimed += 1;
        self.state.current_job = Some(job_id.clone());

        let pipeline = self.pipeline.clone();
        let progress = Arc::clone(&self.progress);
        let task_lease = lease.clone();
        let handle =
            tokio::spawn(async move { pipeline.run(&task_lease, progress.as_ref()).await });

        let outcome = match handle.await {
            Ok(Ok(())) => {
                self.state.completed += 1;
                info!("Job {} completed", job_id);
                PollOutcome::Completed { job_id }
            }
            Ok(Err(e)) if e.is_superseded() => {
                self.state.superseded += 1;
                warn!("Job {} was taken over mid-run: {}", job_id, e);
                PollOutcome::Superseded { job_id }
            }
            Ok(Err(e)) => self.fail(&lease, e.to_string()),
            Err(join_error) => {
                let message = if join_error.is_panic() {
                    format!("Pipeline panicked: {}", panic_message(join_error.into_panic()))
                } else {
                    "Pipeline task was cancelled".to_string()
                };
                error!("Job {}: {}", job_id, message);
                self.progress.report(
                    &job_id,
                    ProgressEvent::Failed {
                        error: message.clone(),
                    },
                );
                self.fail(&lease, message)
            }
        };

        self.state.current_job = None;
        outcome
    }

    fn fail(&mut self, lease: &JobLease, error: String) -> PollOutcome {
        let job_id = lease.job_id.clone();
        let decision = match self.retry.handle_failure(lease, &error) {
            Ok(decision) => {
                match decision {
                    RetryDecision::Requeued { .. } => self.state.requeued += 1,
                    RetryDecision::Exhausted { .. } => self.state.failed += 1,
                }
                Some(decision)
            }
            Err(e) if e.is_stale() => {
                self.state.superseded += 1;
                warn!("Job {} was taken over before its failure was recorded: {}", job_id, e);
                return PollOutcome::Superseded { job_id };
            }
            Err(e) => {
                error!("Failed to record failure of job {}: {}", job_id, e);
                None
            }
        };
        PollOutcome::Failed {
            job_id,
            error,
            decision,
        }
    }

    /// Runs one stuck-job sweep, logging instead of returning errors.
    pub fn recover(&mut self) -> Option<RecoveryReport> {
        match self.recoverer.recover_stuck_jobs() {
            Ok(report) => {
                self.state.recovered += report.recovered() as u64;
                if !report.is_empty() {
                    info!(
                        "Recovery sweep: {} requeued, {} failed, {} skipped",
                        report.requeued.len(),
                        report.failed.len(),
                        report.skipped
                    );
                }
                Some(report)
            }
            Err(e) => {
                error!("Stuck job recovery failed: {}", e);
                None
            }
        }
    }

    /// Polls until `shutdown` turns `true` or its sender is dropped.
    ///
    /// Shutdown is only observed between jobs: a job in flight when it
    /// arrives runs to the end first. Returns the final counters.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> WorkerState {
        info!(
            "Worker started (poll every {}s, recovery every {}s, stuck after {}s, {} attempts)",
            self.config.poll_interval.as_secs(),
            self.config.recovery_interval.as_secs(),
            self.config.stuck_threshold.as_secs(),
            self.config.max_retries
        );

        self.recover();

        let mut poll_timer = tokio::time::interval(self.config.poll_interval);
        poll_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut recovery_timer = tokio::time::interval(self.config.recovery_interval);
        recovery_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the immediate tick; the startup sweep already ran.
        recovery_timer.tick().await;

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = poll_timer.tick() => {
                    let outcome = self.poll_once().await;
                    debug!("Poll outcome: {:?}", outcome);
                }
                _ = recovery_timer.tick() => {
                    self.recover();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(
            "Worker stopped: {} completed, {} requeued, {} failed, {} superseded",
            self.state.completed, self.state.requeued, self.state.failed, self.state.superseded
        );
        self.state
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
