pub mod broadcast;
pub mod config;
pub mod error;
pub mod notify;
pub mod orchestrator;
pub mod pipeline;
pub mod queue;
pub mod secrets;
pub mod stages;
pub mod stats;
pub mod store;
pub mod telemetry;
pub mod worker;

pub use broadcast::{JobEvent, JobEventBroadcaster, JobEventKind};
pub use config::{load_config, Config, OrchestratorSettings};
pub use error::{
    ConfigError, DocflowError, QueueError, Result, StageError, StoreError, SubmitError,
    WorkerError,
};
pub use notify::{HttpNotifier, Notifier, NotifyError, WebhookPayload};
pub use orchestrator::{
    CancelResponse, Orchestrator, OrchestratorBuilder, SubmitRequest, SubmitResponse,
};
pub use pipeline::{Pipeline, PipelineConfig, PipelineContext};
pub use queue::{AdmissionQueue, RetryPolicy};
pub use secrets::{resolve_secret, resolve_service_token, SecretError};
pub use stages::{Stage, StageInput, StageKind, StageOutput, StageRegistry};
pub use stats::StatsSnapshot;
pub use store::JobStore;
pub use telemetry::init_logging;
pub use worker::job::{Job, JobConfig, JobError, JobStatus, ProcessingResult};
