//! Builder patterns for creating test settings programmatically.

#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use docflow::config::OrchestratorSettings;
use docflow::{PipelineConfig, RetryPolicy};

/// Builder for `OrchestratorSettings` with short intervals suited to tests.
pub struct SettingsBuilder {
    settings: OrchestratorSettings,
}

impl SettingsBuilder {
    /// One worker, three attempts, 20ms base backoff, 5s stage timeout.
    pub fn new() -> Self {
        Self {
            settings: OrchestratorSettings {
                worker_count: 1,
                poll_interval: Duration::from_millis(10),
                retry_policy: RetryPolicy::new(
                    3,
                    Duration::from_millis(20),
                    Duration::from_secs(1),
                ),
                lease_duration: Duration::from_secs(30),
                pipeline: PipelineConfig {
                    stage_timeout: Duration::from_secs(5),
                },
                ..OrchestratorSettings::default()
            },
        }
    }

    pub fn workers(mut self, count: usize) -> Self {
        self.settings.worker_count = count;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.settings.retry_policy.max_attempts = attempts;
        self
    }

    pub fn backoff(mut self, base: Duration, max: Duration) -> Self {
        self.settings.retry_policy.base = base;
        self.settings.retry_policy.max = max;
        self
    }

    pub fn stage_timeout(mut self, timeout: Duration) -> Self {
        self.settings.pipeline.stage_timeout = timeout;
        self
    }

    pub fn documents_dir(mut self, dir: &Path) -> Self {
        self.settings.documents_dir = dir.to_path_buf();
        self
    }

    pub fn notify_progress(mut self, enabled: bool) -> Self {
        self.settings.notify_progress = enabled;
        self
    }

    pub fn build(self) -> OrchestratorSettings {
        self.settings
    }
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
