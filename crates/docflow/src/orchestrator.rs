//! The submission, status, cancellation and stats boundary, plus the worker
//! pool lifecycle.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::broadcast::{JobEvent, JobEventBroadcaster};
use crate::config::OrchestratorSettings;
use crate::error::{DocflowError, StoreError, SubmitError, WorkerError};
use crate::notify::{HttpNotifier, NotificationDispatcher, NotificationSender, Notifier, WebhookPayload};
use crate::pipeline::Pipeline;
use crate::queue::{AdmissionQueue, DeadLetter};
use crate::stages::{FsDocumentLoader, MemorySearchIndex, StageRegistry};
use crate::stats::{StatsAggregator, StatsSnapshot};
use crate::store::{CancelOutcome, JobStore, Transition};
use crate::worker::job::{Job, JobConfig, JobStatus, MAX_PRIORITY, MIN_PRIORITY};
use crate::worker::{JobExecutor, WorkerPool};

/// Submission input. Every config field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub document_id: String,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub ingestion_id: Option<String>,
    #[serde(default)]
    pub config: JobConfig,
    /// Defers the first claim.
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

impl SubmitRequest {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            ..Default::default()
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_ingestion_id(mut self, ingestion_id: impl Into<String>) -> Self {
        self.ingestion_id = Some(ingestion_id.into());
        self
    }

    pub fn with_config(mut self, config: JobConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = Some(delay.as_millis().min(u64::MAX as u128) as u64);
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.config.metadata = Some(metadata);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: JobStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub cancelled: bool,
}

/// Wires the components together. Defaults: the built-in stages reading from
/// `documents_dir`, an in-memory search index, and an HTTP notifier when a
/// callback URL is configured.
pub struct OrchestratorBuilder {
    settings: OrchestratorSettings,
    registry: Option<StageRegistry>,
    notifier: Option<Arc<dyn Notifier>>,
    events: Option<JobEventBroadcaster>,
}

impl OrchestratorBuilder {
    pub fn new(settings: OrchestratorSettings) -> Self {
        Self {
            settings,
            registry: None,
            notifier: None,
            events: None,
        }
    }

    pub fn registry(mut self, registry: StageRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Overrides the notifier built from the settings.
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn events(mut self, events: JobEventBroadcaster) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Result<Orchestrator, DocflowError> {
        let settings = self.settings;
        if settings.worker_count == 0 {
            return Err(WorkerError::NoWorkers.into());
        }
        settings.validate()?;

        let store = Arc::new(JobStore::with_events(self.events.unwrap_or_default()));
        let queue = Arc::new(AdmissionQueue::new(
            store.clone(),
            settings.retry_policy,
            settings.lease_duration,
        ));

        let registry = match self.registry {
            Some(registry) => registry,
            None => StageRegistry::with_defaults(
                Arc::new(FsDocumentLoader::new(&settings.documents_dir)),
                Arc::new(MemorySearchIndex::new()),
            ),
        };

        let notifier = match (self.notifier, &settings.notifier) {
            (Some(notifier), _) => Some(notifier),
            (None, Some(cfg)) => Some(Arc::new(HttpNotifier::new(
                cfg.callback_url.clone(),
                cfg.service_token.clone(),
                cfg.timeout,
            )?) as Arc<dyn Notifier>),
            (None, None) => None,
        };
        let dispatcher = match notifier {
            Some(notifier) => NotificationDispatcher::start(notifier)?,
            None => NotificationDispatcher::disabled(),
        };
        let notifications = dispatcher.sender();

        let pipeline = Pipeline::new(
            Arc::new(settings.pipeline.clone()),
            Arc::new(registry),
            store.clone(),
        );
        let executor = Arc::new(JobExecutor::new(
            pipeline,
            store.clone(),
            queue.clone(),
            notifications.clone(),
            settings.notify_progress,
        ));

        Ok(Orchestrator {
            stats: StatsAggregator::new(store.clone(), queue.clone()),
            store,
            queue,
            executor,
            notifications,
            dispatcher: Mutex::new(dispatcher),
            pool: Mutex::new(None),
            settings,
        })
    }
}

/// Owns the job store, the admission queue, the workers and the notifier.
pub struct Orchestrator {
    settings: OrchestratorSettings,
    store: Arc<JobStore>,
    queue: Arc<AdmissionQueue>,
    executor: Arc<JobExecutor>,
    stats: StatsAggregator,
    notifications: NotificationSender,
    dispatcher: Mutex<NotificationDispatcher>,
    pool: Mutex<Option<WorkerPool>>,
}

impl Orchestrator {
    pub fn builder(settings: OrchestratorSettings) -> OrchestratorBuilder {
        OrchestratorBuilder::new(settings)
    }

    /// Starts the worker pool. Jobs may be submitted before or after.
    pub fn start(&self) -> Result<(), WorkerError> {
        let mut pool = lock(&self.pool);
        if pool.is_some() {
            return Err(WorkerError::AlreadyStarted);
        }
        *pool = Some(WorkerPool::start(
            self.executor.clone(),
            self.settings.worker_count,
            self.settings.poll_interval,
        )?);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        lock(&self.pool).as_ref().is_some_and(|p| !p.is_shutdown())
    }

    /// Validates and admits a job. Nothing is stored when validation or
    /// admission fails.
    pub fn submit(&self, request: SubmitRequest) -> Result<SubmitResponse, SubmitError> {
        let document_id = request.document_id.trim();
        if document_id.is_empty() {
            return Err(SubmitError::MissingDocumentId);
        }
        let priority = request.config.priority;
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
            return Err(SubmitError::InvalidPriority(priority));
        }
        if self.queue.is_closed() {
            return Err(SubmitError::ShuttingDown);
        }

        let job_id = match request.job_id.as_deref().or(request.ingestion_id.as_deref()) {
            Some(id) if id.trim().is_empty() => return Err(SubmitError::BlankJobId),
            Some(id) => id.trim().to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };

        let job = Job::new(
            job_id.clone(),
            document_id,
            request.ingestion_id.clone(),
            request.config,
        );
        let queued = WebhookPayload::from_job(&job);
        match self.store.create(job) {
            Ok(()) => {}
            Err(StoreError::AlreadyExists(id)) => return Err(SubmitError::DuplicateJob(id)),
            Err(e) => {
                warn!("Could not record job {}: {}", job_id, e);
                return Err(SubmitError::DuplicateJob(job_id));
            }
        }

        let delay = Duration::from_millis(request.delay_ms.unwrap_or(0));
        if let Err(e) = self.queue.enqueue(&job_id, priority, delay) {
            self.store.discard(&job_id);
            return Err(e.into());
        }

        info!(
            "Admitted job {} for document {} (priority {})",
            job_id, document_id, priority
        );
        self.notifications.send(queued);

        Ok(SubmitResponse {
            job_id,
            status: JobStatus::Queued,
        })
    }

    pub fn status(&self, job_id: &str) -> Option<Job> {
        self.store.get(job_id)
    }

    /// Returns `cancelled: false` for unknown or finished jobs.
    pub fn cancel(&self, job_id: &str) -> CancelResponse {
        let outcome = match self.store.cancel(job_id) {
            Ok(outcome) => outcome,
            Err(_) => return CancelResponse { cancelled: false },
        };

        match outcome {
            CancelOutcome::Cancelled(_) => {
                self.queue.withdraw(job_id);
                info!("Cancelled queued job {}", job_id);
            }
            CancelOutcome::Requested => {
                // A job waiting out a retry backoff has no worker to observe
                // the flag.
                if self.queue.withdraw(job_id) {
                    match self.store.transition(job_id, Transition::Cancel) {
                        Ok(_) => info!("Cancelled job {} during retry backoff", job_id),
                        Err(e) => debug!("Job {} finished before cancel: {}", job_id, e),
                    }
                } else {
                    info!("Cancellation requested for running job {}", job_id);
                }
            }
            CancelOutcome::Rejected(status) => {
                debug!("Ignoring cancel of {} job {}", status, job_id);
            }
        }

        CancelResponse {
            cancelled: outcome.accepted(),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Removes a finished job. Unknown and live jobs return false.
    pub fn purge(&self, job_id: &str) -> bool {
        match self.store.purge(job_id) {
            Ok(removed) => removed,
            Err(e) => {
                debug!("Not purging: {}", e);
                false
            }
        }
    }

    pub fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        self.store.purge_finished_before(cutoff)
    }

    pub fn list(&self) -> Vec<Job> {
        self.store.list()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.store.events().subscribe()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.queue.dead_letters()
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<AdmissionQueue> {
        &self.queue
    }

    /// Polls until the job is terminal or `timeout` elapses. Returns the last
    /// observed record, or `None` for an unknown job. A `timeout` too large to
    /// form a deadline waits for the terminal state.
    pub fn wait_for_terminal(&self, job_id: &str, timeout: Duration) -> Option<Job> {
        let deadline = Instant::now().checked_add(timeout);
        let step = self.settings.poll_interval.min(Duration::from_millis(25));
        loop {
            let job = self.store.get(job_id)?;
            if job.is_finished() || deadline.is_some_and(|d| Instant::now() >= d) {
                return Some(job);
            }
            std::thread::sleep(step);
        }
    }

    /// Stops accepting work. Workers finish the entry they hold.
    pub fn shutdown(&self) {
        self.queue.close();
        if let Some(pool) = lock(&self.pool).as_ref() {
            pool.shutdown();
        }
    }

    /// Shuts down, joins the workers, then drains pending webhooks.
    pub fn wait(self) {
        self.shutdown();
        let pool = lock(&self.pool).take();
        if let Some(pool) = pool {
            pool.wait();
        }
        lock(&self.dispatcher).shutdown();
        info!("Orchestrator stopped");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Orchestrator lock poisoned, recovering");
            poisoned.into_inner()
        }
    }
}
