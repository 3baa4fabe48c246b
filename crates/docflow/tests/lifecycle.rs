//! Retry, cancellation, progress and webhook behaviour of running jobs.

mod common;

use std::time::{Duration, Instant};

use common::*;
use docflow::{JobConfig, JobEventKind, JobStatus, StageKind, StageRegistry, SubmitRequest};

fn text_then_language() -> JobConfig {
    JobConfig::only(&[StageKind::ExtractText, StageKind::DetectLanguage])
}

#[test]
fn cancel_while_processing_stops_at_next_stage_boundary() {
    let gate = GateStage::new(StageKind::ExtractText);
    let after = RecordingStage::new(StageKind::DetectLanguage);
    let mut registry = StageRegistry::new();
    registry.register(gate.clone());
    registry.register(after.clone());
    let mut harness = TestHarness::with_registry(SettingsBuilder::new(), registry);
    harness.start();

    let job_id = harness.submit(SubmitRequest::new("doc").with_config(text_then_language()));
    assert!(gate.wait_entered(Duration::from_secs(5)));

    assert!(harness.orchestrator().cancel(&job_id).cancelled);
    let job = harness.job(&job_id);
    assert_eq!(job.status, JobStatus::Processing);
    assert!(job.cancel_requested);

    gate.release();
    let job = harness.wait_terminal(&job_id);
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.result.is_none());
    assert!(!job.cancel_requested);
    assert!(after.calls().is_empty());

    harness.stop();
    assert_eq!(harness.notifier.statuses(&job_id), vec![JobStatus::Queued]);
}

#[test]
fn cancel_after_terminal_is_a_no_op() {
    let harness = TestHarness::with_registry(SettingsBuilder::new(), StageRegistry::new());
    harness.start();

    let job_id = harness.submit(SubmitRequest::new("doc").with_config(JobConfig::only(&[])));
    let done = harness.wait_terminal(&job_id);
    assert_eq!(done.status, JobStatus::Completed);

    assert!(!harness.orchestrator().cancel(&job_id).cancelled);
    assert_eq!(harness.job(&job_id), done);
}

#[test]
fn cancel_during_retry_backoff_is_immediate() {
    let failing = FlakyStage::always_failing(StageKind::ExtractText);
    let mut registry = StageRegistry::new();
    registry.register(failing.clone());
    let harness = TestHarness::with_registry(
        SettingsBuilder::new().backoff(Duration::from_secs(30), Duration::from_secs(60)),
        registry,
    );
    harness.start();

    let job_id = harness.submit(
        SubmitRequest::new("doc").with_config(JobConfig::only(&[StageKind::ExtractText])),
    );

    let deadline = Instant::now() + Duration::from_secs(5);
    while failing.calls().is_empty() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    while harness.orchestrator().stats().queue.delayed == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(harness.job(&job_id).status, JobStatus::Processing);

    assert!(harness.orchestrator().cancel(&job_id).cancelled);
    assert_eq!(harness.job(&job_id).status, JobStatus::Cancelled);
    assert_eq!(harness.orchestrator().stats().queue.live(), 0);
    assert_eq!(failing.calls().len(), 1);
}

#[test]
fn transient_failure_recovers_on_retry() {
    let flaky = FlakyStage::new(StageKind::ExtractText, 1);
    let mut registry = StageRegistry::new();
    registry.register(flaky.clone());
    let mut harness = TestHarness::with_registry(SettingsBuilder::new(), registry);
    let mut events = harness.orchestrator().subscribe();
    harness.start();

    let job_id = harness.submit(
        SubmitRequest::new("doc").with_config(JobConfig::only(&[StageKind::ExtractText])),
    );
    let job = harness.wait_terminal(&job_id);

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempt, 2);
    assert!(job.error.is_none());
    assert_eq!(
        flaky.calls().iter().map(|c| c.attempt).collect::<Vec<_>>(),
        vec![1, 2]
    );

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.job_id == job_id {
            kinds.push(event.kind);
        }
    }
    assert!(kinds.contains(&JobEventKind::Retrying));
    assert_eq!(kinds.last(), Some(&JobEventKind::Completed));

    harness.stop();
    assert_eq!(
        harness.notifier.statuses(&job_id),
        vec![JobStatus::Queued, JobStatus::Completed]
    );
}

#[test]
fn stage_timeout_counts_as_failure() {
    let slow = SlowStage::new(StageKind::ExtractText, Duration::from_millis(500));
    let mut registry = StageRegistry::new();
    registry.register(slow);
    let harness = TestHarness::with_registry(
        SettingsBuilder::new()
            .max_attempts(2)
            .stage_timeout(Duration::from_millis(50)),
        registry,
    );
    harness.start();

    let job_id = harness.submit(
        SubmitRequest::new("doc").with_config(JobConfig::only(&[StageKind::ExtractText])),
    );
    let job = harness.wait_terminal(&job_id);

    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.unwrap();
    assert_eq!(error.attempt, 2);
    assert!(error.message.contains("timed out"), "{}", error.message);
}

#[test]
fn missing_document_fails_with_cause() {
    let harness = TestHarness::with_settings(SettingsBuilder::new().max_attempts(1));
    harness.start();

    let job_id = harness.submit(
        SubmitRequest::new("missing.txt").with_config(JobConfig::only(&[StageKind::ExtractText])),
    );
    let job = harness.wait_terminal(&job_id);

    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.unwrap();
    assert_eq!(error.attempt, 1);
    assert!(error.message.contains("missing.txt"), "{}", error.message);
}

#[test]
fn progress_never_decreases() {
    let harness = TestHarness::new();
    let doc = harness.write_document(
        "report.txt",
        "The quarterly report is ready. The numbers are good and the team is happy.",
    );
    let mut events = harness.orchestrator().subscribe();
    harness.start();

    let job_id = harness.submit(SubmitRequest::new(doc).with_config(JobConfig::all_stages()));
    harness.wait_terminal(&job_id);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.job_id == job_id {
            seen.push(event.progress);
        }
    }
    assert!(seen.len() >= 7, "{:?}", seen);
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{:?}", seen);
    assert_eq!(seen.last(), Some(&100));
}

#[test]
fn progress_webhooks_when_enabled() {
    let mut harness = TestHarness::with_settings(SettingsBuilder::new().notify_progress(true));
    let doc = harness.write_document("a.txt", "Some words for the pipeline to chew on.");
    harness.start();

    let job_id = harness.submit(SubmitRequest::new(doc).with_config(text_then_language()));
    harness.wait_terminal(&job_id);
    harness.stop();

    let payloads = harness.notifier.for_job(&job_id);
    let statuses: Vec<JobStatus> = payloads.iter().map(|p| p.status).collect();
    assert_eq!(statuses.first(), Some(&JobStatus::Queued));
    assert_eq!(statuses.last(), Some(&JobStatus::Completed));
    let interim: Vec<u8> = payloads
        .iter()
        .filter(|p| p.status == JobStatus::Processing)
        .map(|p| p.progress)
        .collect();
    assert_eq!(interim, vec![31, 100]);
    assert!(payloads.iter().all(|p| p.status != JobStatus::Processing
        || (p.result.is_none() && p.error.is_none())));
}

#[test]
fn delayed_submission_waits_before_claim() {
    let recorder = RecordingStage::new(StageKind::ExtractText);
    let mut registry = StageRegistry::new();
    registry.register(recorder.clone());
    let harness = TestHarness::with_registry(SettingsBuilder::new(), registry);
    harness.start();

    let submitted = Instant::now();
    let job_id = harness.submit(
        SubmitRequest::new("doc")
            .with_config(JobConfig::only(&[StageKind::ExtractText]))
            .with_delay(Duration::from_millis(150)),
    );
    assert_eq!(harness.orchestrator().stats().queue.delayed, 1);
    harness.wait_terminal(&job_id);

    let calls = recorder.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].at - submitted >= Duration::from_millis(150));
}

#[test]
fn purge_removes_finished_jobs_only() {
    let gate = GateStage::new(StageKind::ExtractText);
    let mut registry = StageRegistry::new();
    registry.register(gate.clone());
    let harness = TestHarness::with_registry(SettingsBuilder::new(), registry);
    harness.start();

    let job_id = harness.submit(
        SubmitRequest::new("doc").with_config(JobConfig::only(&[StageKind::ExtractText])),
    );
    assert!(gate.wait_entered(Duration::from_secs(5)));
    assert!(!harness.orchestrator().purge(&job_id));

    gate.release();
    harness.wait_terminal(&job_id);
    assert!(harness.orchestrator().purge(&job_id));
    assert!(harness.orchestrator().status(&job_id).is_none());
    assert_eq!(harness.orchestrator().stats().total, 0);
}

#[test]
fn shutdown_lets_the_held_job_finish() {
    let slow = SlowStage::new(StageKind::ExtractText, Duration::from_millis(200));
    let mut registry = StageRegistry::new();
    registry.register(slow);
    let mut harness = TestHarness::with_registry(SettingsBuilder::new(), registry);
    harness.start();

    let job_id = harness.submit(
        SubmitRequest::new("doc").with_config(JobConfig::only(&[StageKind::ExtractText])),
    );
    let deadline = Instant::now() + Duration::from_secs(5);
    while harness.job(&job_id).status == JobStatus::Queued && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    let store = harness.orchestrator().store().clone();

    harness.stop();
    assert_eq!(store.status(&job_id), Some(JobStatus::Completed));
    assert_eq!(
        harness.notifier.statuses(&job_id),
        vec![JobStatus::Queued, JobStatus::Completed]
    );
}
