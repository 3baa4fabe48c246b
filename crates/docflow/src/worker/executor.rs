use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::error::QueueError;
use crate::notify::{NotificationSender, WebhookPayload};
use crate::pipeline::{
    BroadcastProgress, Pipeline, PipelineContext, PipelineOutcome, ProgressEvent,
    ProgressReporter, StageFailure,
};
use crate::queue::{AdmissionQueue, ClaimedEntry};
use crate::store::{AttemptStart, JobStore, Transition};
use crate::worker::job::{Job, JobError, JobStatus};

/// How a claimed entry was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalOutcome {
    Completed,
    /// The attempt failed and the job was re-queued.
    Retrying { next_attempt: u32, delay: Duration },
    Failed,
    Cancelled,
    /// The job was already terminal when its entry was claimed.
    Skipped(JobStatus),
}

/// Runs one claimed entry to ack, retry or dead-letter.
pub struct JobExecutor {
    pipeline: Pipeline,
    store: Arc<JobStore>,
    queue: Arc<AdmissionQueue>,
    notifications: NotificationSender,
    notify_progress: bool,
}

impl JobExecutor {
    pub fn new(
        pipeline: Pipeline,
        store: Arc<JobStore>,
        queue: Arc<AdmissionQueue>,
        notifications: NotificationSender,
        notify_progress: bool,
    ) -> Self {
        Self {
            pipeline,
            store,
            queue,
            notifications,
            notify_progress,
        }
    }

    pub fn queue(&self) -> &Arc<AdmissionQueue> {
        &self.queue
    }

    pub fn handle(&self, claim: ClaimedEntry) -> TerminalOutcome {
        let job_id = claim.job_id().to_string();
        let attempt = claim.attempt();

        match self.store.begin_attempt(&job_id, attempt) {
            Ok(AttemptStart::Started(_)) => {}
            Ok(AttemptStart::Cancelled(_)) => {
                info!("Job {} was cancelled before attempt {}", job_id, attempt);
                self.settle(self.queue.ack(&claim), &claim);
                return TerminalOutcome::Cancelled;
            }
            Ok(AttemptStart::AlreadyFinished(status)) => {
                debug!("Skipping entry {} of {} job {}", claim.id(), status, job_id);
                self.settle(self.queue.ack(&claim), &claim);
                return TerminalOutcome::Skipped(status);
            }
            Err(e) => {
                // Purged between enqueue and claim.
                warn!("Dropping entry {}: {}", claim.id(), e);
                self.settle(self.queue.dead_letter(&claim, &e.to_string()), &claim);
                return TerminalOutcome::Failed;
            }
        }

        let reporter = WorkerProgress {
            executor: self,
            claim: &claim,
            events: BroadcastProgress::new(claim.job_id(), Arc::clone(&self.store)),
        };
        let ctx = PipelineContext::new(claim.payload());

        match self.pipeline.run(ctx, &reporter) {
            PipelineOutcome::Completed(result) => {
                let outputs = result.output_count();
                let outcome = self.finish(&claim, Transition::Complete(result));
                self.settle(self.queue.ack(&claim), &claim);
                if outcome == TerminalOutcome::Completed {
                    info!(
                        "Job {} completed on attempt {} with {} outputs",
                        job_id, attempt, outputs
                    );
                }
                outcome
            }
            PipelineOutcome::Cancelled => {
                let outcome = self.finish(&claim, Transition::Cancel);
                self.settle(self.queue.ack(&claim), &claim);
                outcome
            }
            PipelineOutcome::Failed(failure) => self.handle_failure(&claim, failure),
        }
    }

    fn handle_failure(&self, claim: &ClaimedEntry, failure: StageFailure) -> TerminalOutcome {
        let job_id = claim.job_id();
        let attempt = claim.attempt();
        let message = failure.to_string();

        let delay = self.queue.policy().backoff(attempt);
        match self.queue.retry(claim, delay) {
            Ok(next_attempt) => {
                warn!(
                    "Job {} attempt {} failed, retrying in {:?}: {}",
                    job_id, attempt, delay, message
                );
                self.store.record_retry(job_id, message);
                return TerminalOutcome::Retrying {
                    next_attempt,
                    delay,
                };
            }
            Err(QueueError::AttemptsExhausted { max_attempts, .. }) => {
                debug!("Job {} used all {} attempts", job_id, max_attempts);
            }
            Err(e) => {
                error!("Could not re-queue job {}: {}", job_id, e);
                return TerminalOutcome::Failed;
            }
        }

        error!("Job {} failed on attempt {}: {}", job_id, attempt, message);
        self.settle(self.queue.dead_letter(claim, &message), claim);
        self.finish(claim, Transition::Fail(JobError { message, attempt }))
    }

    /// Writes the terminal state and sends the owner webhook. A pending
    /// cancellation request turns any transition into `cancelled`.
    fn finish(&self, claim: &ClaimedEntry, transition: Transition) -> TerminalOutcome {
        match self.store.transition(claim.job_id(), transition) {
            Ok(job) => {
                let outcome = match job.status {
                    JobStatus::Completed => TerminalOutcome::Completed,
                    JobStatus::Failed => TerminalOutcome::Failed,
                    _ => TerminalOutcome::Cancelled,
                };
                if outcome == TerminalOutcome::Cancelled {
                    info!("Job {} cancelled", job.id);
                } else {
                    self.notifications.send(WebhookPayload::from_job(&job));
                }
                outcome
            }
            Err(e) => {
                warn!("Could not finish job {}: {}", claim.job_id(), e);
                match self.store.status(claim.job_id()) {
                    Some(JobStatus::Completed) => TerminalOutcome::Completed,
                    Some(JobStatus::Cancelled) => TerminalOutcome::Cancelled,
                    _ => TerminalOutcome::Failed,
                }
            }
        }
    }

    fn settle(&self, result: Result<(), QueueError>, claim: &ClaimedEntry) {
        if let Err(e) = result {
            warn!("Could not settle entry {} of job {}: {}", claim.id(), claim.job_id(), e);
        }
    }

    fn interim_webhook(&self, job: &Job) {
        if self.notify_progress {
            self.notifications.send(WebhookPayload::from_job(job));
        }
    }
}

/// Keeps the lease alive across stages, publishes stage events and pushes
/// interim webhooks.
struct WorkerProgress<'a> {
    executor: &'a JobExecutor,
    claim: &'a ClaimedEntry,
    events: BroadcastProgress,
}

impl ProgressReporter for WorkerProgress<'_> {
    fn report(&self, event: ProgressEvent) {
        self.events.report(event.clone());
        match event {
            ProgressEvent::StageStarted { stage } => {
                debug!("Job {} entering {} stage", self.claim.job_id(), stage);
            }
            ProgressEvent::StageCompleted { stage, progress } => {
                if let Err(e) = self.executor.queue.extend_lease(self.claim) {
                    warn!(
                        "Lease on job {} lapsed after {} stage: {}",
                        self.claim.job_id(),
                        stage,
                        e
                    );
                }
                debug!("Job {} at {}% after {}", self.claim.job_id(), progress, stage);
                if let Some(job) = self.executor.store.get(self.claim.job_id()) {
                    if !job.is_finished() {
                        self.executor.interim_webhook(&job);
                    }
                }
            }
            ProgressEvent::Cancelled { next_stage } => {
                info!(
                    "Job {} cancellation observed before {} stage",
                    self.claim.job_id(),
                    next_stage
                );
            }
            ProgressEvent::Failed { stage, error } => {
                debug!("Job {} {} stage failed: {}", self.claim.job_id(), stage, error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageError;
    use crate::pipeline::PipelineConfig;
    use crate::queue::RetryPolicy;
    use crate::stages::{
        MemoryDocumentLoader, Stage, StageInput, StageKind, StageOutput, StageRegistry,
    };
    use crate::worker::job::JobConfig;

    struct FailingStage;

    impl Stage for FailingStage {
        fn kind(&self) -> StageKind {
            StageKind::ExtractText
        }

        fn execute(&self, _input: &StageInput) -> Result<StageOutput, StageError> {
            Err(StageError::Failed("disk on fire".to_string()))
        }
    }

    struct Fixture {
        store: Arc<JobStore>,
        queue: Arc<AdmissionQueue>,
        executor: JobExecutor,
    }

    fn fixture(registry: StageRegistry, max_attempts: u32) -> Fixture {
        let store = Arc::new(JobStore::new());
        let queue = Arc::new(AdmissionQueue::new(
            store.clone(),
            RetryPolicy::new(max_attempts, Duration::ZERO, Duration::ZERO),
            Duration::from_secs(60),
        ));
        let pipeline = Pipeline::new(
            Arc::new(PipelineConfig::default()),
            Arc::new(registry),
            store.clone(),
        );
        let executor = JobExecutor::new(
            pipeline,
            store.clone(),
            queue.clone(),
            NotificationSender::disabled(),
            false,
        );
        Fixture {
            store,
            queue,
            executor,
        }
    }

    fn text_registry() -> StageRegistry {
        let loader = Arc::new(MemoryDocumentLoader::new().with_document("doc", "Hello there."));
        let mut registry = StageRegistry::new();
        registry.register(Arc::new(crate::stages::TextExtractionStage::new(loader)));
        registry
    }

    fn submit(f: &Fixture, id: &str) {
        f.store
            .create(Job::new(id, "doc", None, JobConfig::only(&[StageKind::ExtractText])))
            .unwrap();
        f.queue.enqueue(id, 5, Duration::ZERO).unwrap();
    }

    fn claim(f: &Fixture) -> ClaimedEntry {
        f.queue
            .claim_next("test-worker", Duration::from_millis(100))
            .unwrap()
    }

    #[test]
    fn test_completes_and_acks() {
        let f = fixture(text_registry(), 3);
        submit(&f, "job-1");

        assert_eq!(f.executor.handle(claim(&f)), TerminalOutcome::Completed);
        let job = f.store.get("job-1").unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(
            job.result.unwrap().extracted_text.as_deref(),
            Some("Hello there.")
        );
        assert_eq!(f.queue.depth().live(), 0);
    }

    #[test]
    fn test_retries_then_fails_after_max_attempts() {
        let mut registry = StageRegistry::new();
        registry.register(Arc::new(FailingStage));
        let f = fixture(registry, 2);
        submit(&f, "job-2");

        assert_eq!(
            f.executor.handle(claim(&f)),
            TerminalOutcome::Retrying {
                next_attempt: 2,
                delay: Duration::ZERO
            }
        );
        assert_eq!(f.store.status("job-2"), Some(JobStatus::Processing));

        assert_eq!(f.executor.handle(claim(&f)), TerminalOutcome::Failed);
        let job = f.store.get("job-2").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        let error = job.error.unwrap();
        assert_eq!(error.attempt, 2);
        assert!(error.message.contains("disk on fire"));
        assert_eq!(f.queue.dead_letters().len(), 1);
        assert_eq!(f.queue.depth().live(), 0);
    }

    fn drain(f: &Fixture) -> Vec<TerminalOutcome> {
        let mut outcomes = Vec::new();
        while let Some(claim) = f.queue.claim_next("test-worker", Duration::from_millis(50)) {
            outcomes.push(f.executor.handle(claim));
        }
        outcomes
    }

    #[test]
    fn test_unregistered_stage_uses_every_attempt() {
        // No stage registered for the enabled ExtractText.
        let f = fixture(StageRegistry::new(), 3);
        submit(&f, "job-3");

        let outcomes = drain(&f);
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes.last(), Some(&TerminalOutcome::Failed));
        let error = f.store.get("job-3").unwrap().error.unwrap();
        assert_eq!(error.attempt, 3);
        assert!(error.message.contains("no stage registered"));
        assert_eq!(f.queue.dead_letters().len(), 1);
    }

    #[test]
    fn test_invalid_document_id_uses_every_attempt() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut registry = StageRegistry::new();
        registry.register(Arc::new(crate::stages::TextExtractionStage::new(Arc::new(
            crate::stages::FsDocumentLoader::new(dir.path()),
        ))));
        let f = fixture(registry, 3);
        f.store
            .create(Job::new("job-6", "a/b", None, JobConfig::only(&[StageKind::ExtractText])))
            .unwrap();
        f.queue.enqueue("job-6", 5, Duration::ZERO).unwrap();

        let outcomes = drain(&f);
        assert_eq!(
            outcomes,
            vec![
                TerminalOutcome::Retrying {
                    next_attempt: 2,
                    delay: Duration::ZERO
                },
                TerminalOutcome::Retrying {
                    next_attempt: 3,
                    delay: Duration::ZERO
                },
                TerminalOutcome::Failed,
            ]
        );
        let job = f.store.get("job-6").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        let error = job.error.unwrap();
        assert_eq!(error.attempt, 3);
        assert!(error.message.contains("invalid document id"));
    }

    #[test]
    fn test_cancelled_while_queued_is_skipped() {
        let f = fixture(text_registry(), 3);
        submit(&f, "job-4");
        f.store.cancel("job-4").unwrap();

        assert_eq!(
            f.executor.handle(claim(&f)),
            TerminalOutcome::Skipped(JobStatus::Cancelled)
        );
        let job = f.store.get("job-4").unwrap();
        assert!(job.started_at.is_none());
        assert!(job.result.is_none());
    }

    #[test]
    fn test_cancel_requested_during_backoff() {
        let mut registry = StageRegistry::new();
        registry.register(Arc::new(FailingStage));
        let f = fixture(registry, 3);
        submit(&f, "job-5");

        f.executor.handle(claim(&f));
        assert!(f.store.cancel("job-5").unwrap().accepted());

        assert_eq!(f.executor.handle(claim(&f)), TerminalOutcome::Cancelled);
        assert_eq!(f.store.status("job-5"), Some(JobStatus::Cancelled));
        assert!(f.queue.dead_letters().is_empty());
    }
}
