use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::config::schema::Config;
use crate::error::ConfigError;
use crate::pipeline::PipelineConfig;
use crate::queue::RetryPolicy;
use crate::secrets::resolve_service_token;

/// Immutable runtime settings built once from a validated [`Config`].
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub worker_count: usize,
    pub poll_interval: Duration,
    pub retry_policy: RetryPolicy,
    pub lease_duration: Duration,
    pub pipeline: PipelineConfig,
    pub documents_dir: PathBuf,
    pub notifier: Option<NotifierSettings>,
    pub notify_progress: bool,
}

/// Where and how webhooks are delivered.
#[derive(Debug, Clone)]
pub struct NotifierSettings {
    pub callback_url: String,
    pub service_token: Option<SecretString>,
    pub timeout: Duration,
}

impl OrchestratorSettings {
    /// Resolves the service token, so a missing secret file or env var fails
    /// here rather than on the first webhook.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let notifier = match config.notifier.callback_url.as_deref() {
            Some(url) if !url.trim().is_empty() => Some(NotifierSettings {
                callback_url: url.to_string(),
                service_token: resolve_service_token(&config.notifier)?,
                timeout: Duration::from_millis(config.notifier.timeout_ms),
            }),
            _ => None,
        };

        Ok(Self {
            worker_count: config.worker_count,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            retry_policy: RetryPolicy::new(
                config.queue.max_attempts,
                Duration::from_millis(config.queue.backoff_base_ms),
                Duration::from_millis(config.queue.backoff_max_ms),
            ),
            lease_duration: Duration::from_millis(config.queue.lease_ms),
            pipeline: PipelineConfig::from_config(config),
            documents_dir: PathBuf::from(&config.pipeline.documents_dir),
            notifier,
            notify_progress: config.notifier.notify_progress,
        })
    }

    /// Checks the invariants that hold between fields. Settings assembled by
    /// hand skip `validate_config`, so the orchestrator runs this on build.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.stage_timeout.is_zero() {
            return Err(ConfigError::Validation {
                message: "stage timeout must be positive".to_string(),
            });
        }
        if self.lease_duration <= self.pipeline.stage_timeout {
            return Err(ConfigError::Validation {
                message: format!(
                    "lease duration ({:?}) must be greater than the stage timeout ({:?})",
                    self.lease_duration, self.pipeline.stage_timeout
                ),
            });
        }
        Ok(())
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            worker_count: 1,
            poll_interval: Duration::from_millis(250),
            retry_policy: RetryPolicy::default(),
            lease_duration: crate::queue::DEFAULT_LEASE,
            pipeline: PipelineConfig::default(),
            documents_dir: PathBuf::from("./documents"),
            notifier: None,
            notify_progress: false,
        }
    }
}
