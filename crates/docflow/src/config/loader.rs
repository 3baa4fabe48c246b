use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

/// Loads a config file. `.yaml`/`.yml` files are read as YAML, anything else
/// as JSON.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));

    if is_yaml {
        load_config_from_yaml_str(&content)
    } else {
        load_config_from_str(&content)
    }
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;
    load_config_from_value(json_value)
}

pub fn load_config_from_yaml_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_yaml::from_str(content)?;
    load_config_from_value(json_value)
}

fn load_config_from_value(json_value: serde_json::Value) -> Result<Config, ConfigError> {
    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

/// Semantic checks the schema cannot express.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(invalid(format!(
            "Unsupported config version: {}",
            config.version
        )));
    }

    if config.worker_count == 0 {
        return Err(invalid("worker_count must be at least 1"));
    }
    if config.poll_interval_ms == 0 {
        return Err(invalid("poll_interval_ms must be positive"));
    }

    let queue = &config.queue;
    if queue.max_attempts == 0 {
        return Err(invalid("queue.max_attempts must be at least 1"));
    }
    if queue.backoff_base_ms > queue.backoff_max_ms {
        return Err(invalid(format!(
            "queue.backoff_base_ms ({}) exceeds queue.backoff_max_ms ({})",
            queue.backoff_base_ms, queue.backoff_max_ms
        )));
    }

    let stage_timeout = config.pipeline.stage_timeout_ms;
    if stage_timeout == 0 {
        return Err(invalid("pipeline.stage_timeout_ms must be positive"));
    }
    // A lease that can lapse mid-stage would let a second worker claim the job.
    if queue.lease_ms <= stage_timeout {
        return Err(invalid(format!(
            "queue.lease_ms ({}) must be greater than pipeline.stage_timeout_ms ({})",
            queue.lease_ms, stage_timeout
        )));
    }
    if config.pipeline.documents_dir.trim().is_empty() {
        return Err(invalid("pipeline.documents_dir must not be empty"));
    }

    let notifier = &config.notifier;
    if notifier.timeout_ms == 0 {
        return Err(invalid("notifier.timeout_ms must be positive"));
    }
    if let Some(url) = notifier.callback_url.as_deref() {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| invalid(format!("notifier.callback_url '{}' is invalid: {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(invalid(format!(
                "notifier.callback_url must use http or https, got '{}'",
                parsed.scheme()
            )));
        }
    }

    if config.logging.level.trim().is_empty() {
        return Err(invalid("logging.level must not be empty"));
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}
