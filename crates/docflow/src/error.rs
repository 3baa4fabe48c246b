use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::stages::StageKind;
use crate::worker::job::JobStatus;

#[derive(Error, Debug)]
pub enum DocflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Submission rejected: {0}")]
    Submit(#[from] SubmitError),

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Notification error: {0}")]
    Notify(#[from] crate::notify::NotifyError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] crate::telemetry::TelemetryError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Failed to resolve service token: {0}")]
    Secret(#[from] crate::secrets::SecretError),
}

/// Boundary validation errors. A rejected submission never reaches the queue.
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("documentId is required")]
    MissingDocumentId,

    #[error("jobId must not be blank")]
    BlankJobId,

    #[error("priority {0} is outside the allowed range 1..=10")]
    InvalidPriority(u8),

    #[error("job '{0}' already exists")]
    DuplicateJob(String),

    #[error("orchestrator is shutting down")]
    ShuttingDown,

    #[error("failed to admit job: {0}")]
    Queue(#[from] QueueError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("job '{0}' not found")]
    NotFound(String),

    #[error("job '{0}' already exists")]
    AlreadyExists(String),

    #[error("job '{job_id}' is already {status} and cannot change")]
    Terminal { job_id: String, status: JobStatus },

    #[error("job '{job_id}' cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("job '{job_id}' is still {status} and cannot be purged")]
    NotFinished { job_id: String, status: JobStatus },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("unknown job '{0}'")]
    UnknownJob(String),

    #[error("job '{0}' already has a live queue entry")]
    AlreadyQueued(String),

    #[error("job '{job_id}' is already {status}")]
    JobFinished { job_id: String, status: JobStatus },

    #[error("priority {0} is outside the allowed range 1..=10")]
    InvalidPriority(u8),

    #[error("queue entry {0} is not held by this lease")]
    LeaseLost(crate::queue::EntryId),

    #[error("queue entry {entry} already used all {max_attempts} attempts")]
    AttemptsExhausted {
        entry: crate::queue::EntryId,
        max_attempts: u32,
    },

    #[error("delay {0:?} is too far in the future")]
    DelayOutOfRange(Duration),

    #[error("queue is closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum StageError {
    #[error("document '{document_id}' could not be loaded: {source}")]
    DocumentUnavailable {
        document_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid document id '{0}'")]
    InvalidDocumentId(String),

    #[error("{0}")]
    Failed(String),

    #[error("no stage registered for {0}")]
    NotRegistered(StageKind),

    #[error("timed out after {timeout:?}")]
    Timeout { stage: StageKind, timeout: Duration },

    #[error("panicked")]
    Panicked(StageKind),

    #[error("search index rejected document: {0}")]
    Index(String),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker pool is already running")]
    AlreadyStarted,

    #[error("worker_count must be greater than zero")]
    NoWorkers,
}

pub type Result<T> = std::result::Result<T, DocflowError>;
