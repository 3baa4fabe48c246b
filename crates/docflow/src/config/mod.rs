pub mod loader;
pub mod schema;
pub mod settings;

pub use loader::{load_config, load_config_from_str, load_config_from_yaml_str, validate_config};
pub use schema::{
    Config, LogFormat, LoggingConfig, NotifierConfig, PipelineSection, QueueConfig,
};
pub use settings::{NotifierSettings, OrchestratorSettings};
