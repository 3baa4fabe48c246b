use std::time::Duration;

use crate::config::Config;

pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Upper bound on a single stage invocation.
    pub stage_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
        }
    }
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            stage_timeout: Duration::from_millis(config.pipeline.stage_timeout_ms),
        }
    }
}
