use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_poll_interval_ms() -> u64 {
    250
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            worker_count: default_worker_count(),
            poll_interval_ms: default_poll_interval_ms(),
            queue: QueueConfig::default(),
            pipeline: PipelineSection::default(),
            notifier: NotifierConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// How long a claim stays valid without an extension.
    #[serde(default = "default_lease_ms")]
    pub lease_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    2_000
}

fn default_backoff_max_ms() -> u64 {
    300_000
}

fn default_lease_ms() -> u64 {
    600_000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            lease_ms: default_lease_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_stage_timeout_ms")]
    pub stage_timeout_ms: u64,
    /// Root the default loader resolves document ids against.
    #[serde(default = "default_documents_dir")]
    pub documents_dir: String,
}

fn default_stage_timeout_ms() -> u64 {
    120_000
}

fn default_documents_dir() -> String {
    "./documents".to_string()
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            stage_timeout_ms: default_stage_timeout_ms(),
            documents_dir: default_documents_dir(),
        }
    }
}

/// Owner callback settings. Without `callback_url` webhooks are disabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    #[serde(default)]
    pub callback_url: Option<String>,
    /// Direct token value. Prefer `service_token_file` or `service_token_env`
    /// outside of local testing.
    #[serde(default)]
    pub service_token: Option<String>,
    #[serde(default)]
    pub service_token_file: Option<String>,
    #[serde(default)]
    pub service_token_env: Option<String>,
    #[serde(default = "default_notify_timeout_ms")]
    pub timeout_ms: u64,
    /// Send a `processing` webhook after every stage.
    #[serde(default)]
    pub notify_progress: bool,
}

fn default_notify_timeout_ms() -> u64 {
    10_000
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            callback_url: None,
            service_token: None,
            service_token_file: None,
            service_token_env: None,
            timeout_ms: default_notify_timeout_ms(),
            notify_progress: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}
