//! End-to-end tests: submission, claiming, the full pipeline, retries and
//! stuck-job recovery against a file-backed database.

mod common;

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::time::Duration;

use tokio::sync::watch;

use bookforge::collaborators::StubStep;
use bookforge::config::PageRegeneration;
use bookforge::db::job_repo;
use bookforge::pipeline::{NoopProgress, RecordingProgress};
use bookforge::worker::{JobClaimer, PollOutcome, RetryDecision, StuckJobRecoverer};
use bookforge::{BookStatus, JobStatus};

use common::{book_params, fast_worker_config, TestHarness};

#[test]
fn test_claims_are_exclusive_across_connections() {
    let harness = TestHarness::new();
    let submitted: HashSet<String> = (0..6)
        .map(|_| harness.submit(&book_params(1)).job_id)
        .collect();

    let workers = 4;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let claimer = JobClaimer::new(harness.open_handle());
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                let mut claimed = Vec::new();
                while let Some(job) = claimer.claim_next().unwrap() {
                    claimed.push(job.id);
                }
                claimed
            })
        })
        .collect();

    let mut all_claims = Vec::new();
    for handle in handles {
        all_claims.extend(handle.join().unwrap());
    }

    let unique: HashSet<String> = all_claims.iter().cloned().collect();
    assert_eq!(all_claims.len(), submitted.len(), "a job was claimed twice");
    assert_eq!(unique, submitted);
}

#[test]
fn test_claim_order_is_oldest_first() {
    let harness = TestHarness::new();
    let first = harness.submit(&book_params(1));
    std::thread::sleep(Duration::from_millis(5));
    let second = harness.submit(&book_params(1));

    let claimer = JobClaimer::new(harness.db.clone());
    assert_eq!(claimer.claim_next().unwrap().unwrap().id, first.job_id);
    assert_eq!(claimer.claim_next().unwrap().unwrap().id, second.job_id);
    assert!(claimer.claim_next().unwrap().is_none());
}

#[tokio::test]
async fn test_three_page_book_completes() {
    let harness = TestHarness::new();
    let submitted = harness.submit(&book_params(3));
    let progress = Arc::new(RecordingProgress::new());
    let mut worker = harness.worker(fast_worker_config(3), progress.clone());

    let outcome = worker.poll_once().await;
    assert_eq!(
        outcome,
        PollOutcome::Completed {
            job_id: submitted.job_id.clone()
        }
    );

    let job = harness.job(&submitted.job_id);
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert!(job.completed_at.is_some());
    assert_eq!(job.retry_count, 0);

    let book = harness.book(&submitted.book_id);
    assert_eq!(book.status, BookStatus::Completed);
    assert_eq!(book.title.as_deref(), Some("Sam's Deep Sea Adventure"));
    assert!(book.reference_url.is_some());

    let pages = harness.pages(&submitted.book_id);
    assert_eq!(pages.len(), 3);
    assert!(pages.iter().all(|p| p.image_url.is_some()));

    let pdf_url = book.pdf_url.expect("pdf_url should be set");
    let pdf_path = pdf_url.strip_prefix("file://").expect("file URL");
    let document = lopdf::Document::load(pdf_path).expect("stored PDF should load");
    assert_eq!(document.get_pages().len(), 4);

    let values = progress.progress_values(&submitted.job_id);
    assert!(values.windows(2).all(|w| w[0] <= w[1]), "{:?}", values);
    assert_eq!(values.last(), Some(&100));
}

#[tokio::test]
async fn test_last_attempt_failure_fails_book() {
    let harness = TestHarness::new();
    let submitted = harness.submit(&book_params(2));
    harness.force_job(&submitted.job_id, 2, "2026-01-01T00:00:00.000Z");
    harness.studio.fail_next(StubStep::Page, 1);

    let mut worker = harness.worker(fast_worker_config(3), Arc::new(NoopProgress));
    let outcome = worker.poll_once().await;

    assert!(matches!(
        outcome,
        PollOutcome::Failed {
            decision: Some(RetryDecision::Exhausted { retry_count: 3 }),
            ..
        }
    ));

    let job = harness.job(&submitted.job_id);
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 3);
    assert!(job.error.is_some());
    assert_eq!(harness.book(&submitted.book_id).status, BookStatus::Failed);

    // A failed job is never claimed again.
    assert_eq!(worker.poll_once().await, PollOutcome::Idle);
}

#[tokio::test]
async fn test_retry_resumes_after_completed_stages() {
    let harness = TestHarness::new();
    let submitted = harness.submit(&book_params(2));
    harness.studio.fail_after(StubStep::Page, 1);

    let mut worker = harness.worker(fast_worker_config(3), Arc::new(NoopProgress));
    assert!(matches!(
        worker.poll_once().await,
        PollOutcome::Failed {
            decision: Some(RetryDecision::Requeued { retry_count: 1 }),
            ..
        }
    ));
    let failed = harness.job(&submitted.job_id);
    assert_eq!(failed.status, JobStatus::Waiting);
    assert_eq!(failed.progress, 60);

    assert!(matches!(
        worker.poll_once().await,
        PollOutcome::Completed { .. }
    ));
    assert_eq!(harness.studio.call_count(StubStep::Story), 1);
    assert_eq!(harness.pages(&submitted.book_id).len(), 2);
    let job = harness.job(&submitted.job_id);
    assert_eq!(job.retry_count, 1);
    assert_eq!(job.progress, 100);
}

#[tokio::test]
async fn test_stalled_job_is_recovered_and_finished() {
    let harness = TestHarness::new();
    let stalled = harness.submit(&book_params(1));
    let claimed = job_repo::claim_next(&harness.db, "2026-01-01T00:00:00.000Z")
        .unwrap()
        .unwrap();
    assert_eq!(claimed.id, stalled.job_id);

    let fresh = harness.submit(&book_params(1));
    let claimer = JobClaimer::new(harness.db.clone());
    assert_eq!(claimer.claim_next().unwrap().unwrap().id, fresh.job_id);

    let recoverer = StuckJobRecoverer::new(harness.open_handle(), Duration::from_secs(600), 3);
    let report = recoverer.recover_stuck_jobs().unwrap();
    assert_eq!(report.requeued, vec![stalled.job_id.clone()]);
    assert!(report.failed.is_empty());

    assert_eq!(harness.job(&fresh.job_id).status, JobStatus::GeneratingStory);
    let recovered = harness.job(&stalled.job_id);
    assert_eq!(recovered.status, JobStatus::Waiting);
    assert_eq!(recovered.retry_count, 1);

    let mut worker = harness.worker(fast_worker_config(3), Arc::new(NoopProgress));
    assert_eq!(
        worker.poll_once().await,
        PollOutcome::Completed {
            job_id: stalled.job_id.clone()
        }
    );
    assert_eq!(harness.book(&stalled.book_id).status, BookStatus::Completed);
}

#[tokio::test]
async fn test_recovered_worker_cannot_touch_the_new_claim() {
    let harness = TestHarness::new();
    let submitted = harness.submit(&book_params(2));
    let stale = job_repo::claim_next(&harness.db, "2026-01-01T00:00:00.000Z")
        .unwrap()
        .unwrap()
        .lease();

    let recoverer = StuckJobRecoverer::new(harness.open_handle(), Duration::from_secs(600), 3);
    let report = recoverer.recover_stuck_jobs().unwrap();
    assert_eq!(report.requeued, vec![submitted.job_id.clone()]);

    // Another worker, on its own connection, picks the job up again.
    let current = JobClaimer::new(harness.open_handle())
        .claim_next()
        .unwrap()
        .unwrap();
    assert_eq!(current.id, submitted.job_id);
    assert_eq!(current.attempt, 1);

    // Same job, same status: only the claim tells the two workers apart.
    let now = bookforge::db::now();
    let err = job_repo::update_progress(&harness.db, &stale, JobStatus::GeneratingStory, 30, &now)
        .unwrap_err();
    assert!(err.is_stale());
    assert!(job_repo::advance(
        &harness.db,
        &stale,
        JobStatus::GeneratingStory,
        JobStatus::GeneratingImages,
        35,
        &now
    )
    .is_err());

    let retry = bookforge::RetryController::new(harness.db.clone(), 3);
    assert!(retry.handle_failure(&stale, "late failure").unwrap_err().is_stale());

    let job = harness.job(&submitted.job_id);
    assert_eq!(job.status, JobStatus::GeneratingStory);
    assert_eq!(job.retry_count, 1);
    assert_eq!(job.progress, 0);

    // The old run stops at its next write; the new one finishes the book.
    let pipeline = harness.pipeline(PageRegeneration::AlwaysRedo);
    assert!(pipeline
        .run(&stale, &NoopProgress)
        .await
        .unwrap_err()
        .is_superseded());
    pipeline.run(&current.lease(), &NoopProgress).await.unwrap();
    assert_eq!(harness.job(&submitted.job_id).status, JobStatus::Completed);
    assert_eq!(harness.book(&submitted.book_id).status, BookStatus::Completed);
}

#[tokio::test]
async fn test_skip_completed_keeps_page_images_on_retry() {
    let harness = TestHarness::new();
    let submitted = harness.submit(&book_params(3));
    let pipeline = harness.pipeline(PageRegeneration::SkipCompleted);
    let claimer = JobClaimer::new(harness.db.clone());
    let retry = bookforge::RetryController::new(harness.db.clone(), 3);

    harness.studio.fail_after(StubStep::Page, 1);
    let first = claimer.claim_next().unwrap().unwrap().lease();
    let err = pipeline.run(&first, &NoopProgress).await.unwrap_err();
    retry.handle_failure(&first, &err.to_string()).unwrap();

    let first_image = harness.pages(&submitted.book_id)[0].image_url.clone();
    assert!(first_image.is_some());

    let second = claimer.claim_next().unwrap().unwrap();
    assert_eq!(second.id, submitted.job_id);
    assert_eq!(second.attempt, 1);
    pipeline.run(&second.lease(), &NoopProgress).await.unwrap();

    let pages = harness.pages(&submitted.book_id);
    assert_eq!(pages[0].image_url, first_image);
    assert!(pages.iter().all(|p| p.image_url.is_some()));
    // One call for page 1, a failed one for page 2, then pages 2 and 3.
    assert_eq!(harness.studio.call_count(StubStep::Page), 4);
}

#[tokio::test]
async fn test_worker_drains_queue_and_stops_on_shutdown() {
    let harness = TestHarness::new();
    let jobs: Vec<String> = (0..3)
        .map(|_| harness.submit(&book_params(1)).job_id)
        .collect();
    let worker = harness.worker(fast_worker_config(3), Arc::new(NoopProgress));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(worker.run(shutdown_rx));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while job_repo::count_by_status(&harness.db, JobStatus::Completed).unwrap() < 3 {
        assert!(tokio::time::Instant::now() < deadline, "queue was not drained");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    shutdown_tx.send(true).unwrap();
    let state = handle.await.unwrap();
    assert_eq!(state.completed, 3);
    assert_eq!(state.failed, 0);
    for job_id in jobs {
        assert_eq!(harness.job(&job_id).status, JobStatus::Completed);
    }
}
