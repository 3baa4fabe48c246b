//! Process-wide logging setup.
//!
//! Components log through the `log` macros and the pipeline opens `tracing`
//! spans; both end up in one `tracing-subscriber` registry. `RUST_LOG`
//! overrides the configured level.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::{LogFormat, LoggingConfig};

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter '{directive}': {message}")]
    Filter { directive: String, message: String },

    #[error("Logging is already initialized: {0}")]
    AlreadyInitialized(String),
}

pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level).map_err(|e| TelemetryError::Filter {
        directive: config.level.clone(),
        message: e.to_string(),
    })
}

/// Installs the global subscriber and bridges `log` records into it. Fails
/// if a subscriber or logger is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), TelemetryError> {
    let filter = build_filter(config)?;

    let output: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Text => fmt::layer().with_target(true).boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(output).with(filter);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))?;
    tracing_log::LogTracer::init().map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_invalid_directive() {
        std::env::remove_var("RUST_LOG");
        let config = LoggingConfig {
            level: "docflow=notalevel".to_string(),
            format: LogFormat::Text,
        };
        assert!(matches!(
            build_filter(&config),
            Err(TelemetryError::Filter { .. })
        ));
    }

    #[test]
    #[serial]
    fn test_valid_directive() {
        std::env::remove_var("RUST_LOG");
        let config = LoggingConfig {
            level: "docflow=debug,warn".to_string(),
            format: LogFormat::Json,
        };
        assert!(build_filter(&config).is_ok());
    }
}
