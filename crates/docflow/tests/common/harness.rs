//! Test harness for isolated orchestrator runs.
//!
//! The `TestHarness` struct owns:
//! - A temporary documents directory read by the default loader
//! - An `Orchestrator` wired to a `RecordingNotifier`
//! - The in-memory search index used by the default registry

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use docflow::config::OrchestratorSettings;
use docflow::notify::NotifyError;
use docflow::stages::{FsDocumentLoader, MemorySearchIndex};
use docflow::{
    Job, JobStatus, Notifier, Orchestrator, StageRegistry, SubmitRequest, WebhookPayload,
};

use super::builders::SettingsBuilder;

/// Collects every delivered webhook in order.
#[derive(Default)]
pub struct RecordingNotifier {
    delivered: Mutex<Vec<WebhookPayload>>,
}

impl RecordingNotifier {
    pub fn payloads(&self) -> Vec<WebhookPayload> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn for_job(&self, job_id: &str) -> Vec<WebhookPayload> {
        self.payloads()
            .into_iter()
            .filter(|p| p.job_id == job_id)
            .collect()
    }

    pub fn statuses(&self, job_id: &str) -> Vec<JobStatus> {
        self.for_job(job_id).into_iter().map(|p| p.status).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, payload: &WebhookPayload) -> Result<(), NotifyError> {
        self.delivered.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

/// Test harness providing an isolated orchestrator for integration tests.
pub struct TestHarness {
    temp_dir: TempDir,
    /// Directory the default loader resolves document ids against.
    pub documents_dir: PathBuf,
    pub notifier: Arc<RecordingNotifier>,
    pub index: Arc<MemorySearchIndex>,
    orchestrator: Option<Orchestrator>,
}

impl TestHarness {
    /// Built-in stages, default test settings. Workers are not started.
    pub fn new() -> Self {
        Self::build(SettingsBuilder::new(), None)
    }

    pub fn with_settings(settings: SettingsBuilder) -> Self {
        Self::build(settings, None)
    }

    /// Uses `registry` instead of the built-in stages.
    pub fn with_registry(settings: SettingsBuilder, registry: StageRegistry) -> Self {
        Self::build(settings, Some(registry))
    }

    fn build(settings: SettingsBuilder, registry: Option<StageRegistry>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let documents_dir = temp_dir.path().join("documents");
        std::fs::create_dir_all(&documents_dir).expect("Failed to create documents dir");

        let settings: OrchestratorSettings = settings.documents_dir(&documents_dir).build();
        let notifier = Arc::new(RecordingNotifier::default());
        let index = Arc::new(MemorySearchIndex::new());

        let registry = registry.unwrap_or_else(|| {
            StageRegistry::with_defaults(
                Arc::new(FsDocumentLoader::new(&documents_dir)),
                index.clone(),
            )
        });

        let orchestrator = Orchestrator::builder(settings)
            .registry(registry)
            .notifier(notifier.clone())
            .build()
            .expect("Failed to build orchestrator");

        Self {
            temp_dir,
            documents_dir,
            notifier,
            index,
            orchestrator: Some(orchestrator),
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        self.orchestrator
            .as_ref()
            .expect("orchestrator already stopped")
    }

    pub fn start(&self) {
        self.orchestrator().start().expect("Failed to start workers");
    }

    /// Writes a document and returns its id.
    pub fn write_document(&self, name: &str, content: &str) -> String {
        std::fs::write(self.documents_dir.join(name), content)
            .expect("Failed to write document");
        name.to_string()
    }

    pub fn submit(&self, request: SubmitRequest) -> String {
        self.orchestrator()
            .submit(request)
            .expect("submission rejected")
            .job_id
    }

    pub fn job(&self, job_id: &str) -> Job {
        self.orchestrator()
            .status(job_id)
            .expect("job not found")
    }

    /// Waits for a terminal state, panicking after 10 seconds.
    pub fn wait_terminal(&self, job_id: &str) -> Job {
        let job = self
            .orchestrator()
            .wait_for_terminal(job_id, Duration::from_secs(10))
            .expect("job not found");
        assert!(
            job.is_finished(),
            "job {} still {} after timeout",
            job_id,
            job.status
        );
        job
    }

    /// Joins the workers and drains the notifier, so every webhook sent so far
    /// is visible in `notifier`.
    pub fn stop(&mut self) {
        if let Some(orchestrator) = self.orchestrator.take() {
            orchestrator.wait();
        }
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.stop();
    }
}
