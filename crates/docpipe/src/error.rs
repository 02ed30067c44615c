use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocpipeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Job store error: {0}")]
    Store(#[from] crate::broadcast::StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] crate::worker::QueueError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("Invalid job options: {0}")]
    Options(#[from] crate::job::OptionsError),

    #[error("Transition rejected: {0}")]
    Transition(#[from] crate::job::TransitionError),

    #[error("Job service error: {0}")]
    Service(#[from] crate::service::ServiceError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Telemetry error: {0}")]
    Telemetry(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker pool needs at least one worker")]
    NoWorkers,
}

pub type Result<T> = std::result::Result<T, DocpipeError>;
