pub mod loader;
pub mod schema;

pub use loader::{
    load_config, load_config_from_str, load_config_from_str_as, validate_config, ConfigFormat,
};
pub use schema::{
    Config, JobConfig, LogFormat, LoggingConfig, ProgressConfig, QueueConfig, RetryConfig,
    RunnerConfig, StreamConfig,
};
