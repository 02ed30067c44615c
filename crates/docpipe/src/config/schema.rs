use serde::{Deserialize, Serialize};

use crate::job::progress::{default_thresholds, StageThreshold};
use crate::job::record::DEFAULT_LOG_CAPACITY;
use crate::stream::consumer::DEFAULT_CONSUMER_LOG_CAPACITY;
use crate::stream::decoder::DEFAULT_MAX_FRAME_BYTES;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub version: String,
    /// SQLite database file; defaults to `~/.docpipe/data/docpipe.db`.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub job: JobConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            database_path: None,
            worker_count: default_worker_count(),
            runner: RunnerConfig::default(),
            queue: QueueConfig::default(),
            progress: ProgressConfig::default(),
            stream: StreamConfig::default(),
            job: JobConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

/// Per-attempt behaviour of the pipeline runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    /// Bounded wait for a single unit transform.
    #[serde(default = "default_unit_timeout_secs")]
    pub unit_timeout_secs: u64,
    /// Wall-clock budget for one attempt; exceeding it moves the job to `timeout`.
    #[serde(default)]
    pub attempt_deadline_secs: Option<u64>,
    /// Abort the loop once the share of failed units exceeds this ratio.
    #[serde(default)]
    pub max_failure_ratio: Option<f64>,
    /// Retries for checkpoint writes that must land (stage and terminal writes).
    #[serde(default = "default_checkpoint_retries")]
    pub checkpoint_retries: u32,
    #[serde(default = "default_checkpoint_retry_delay_ms")]
    pub checkpoint_retry_delay_ms: u64,
    /// Emit `memory` progress frames after each unit.
    #[serde(default)]
    pub emit_memory_frames: bool,
}

fn default_unit_timeout_secs() -> u64 {
    120
}

fn default_checkpoint_retries() -> u32 {
    3
}

fn default_checkpoint_retry_delay_ms() -> u64 {
    200
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            unit_timeout_secs: default_unit_timeout_secs(),
            attempt_deadline_secs: None,
            max_failure_ratio: None,
            checkpoint_retries: default_checkpoint_retries(),
            checkpoint_retry_delay_ms: default_checkpoint_retry_delay_ms(),
            emit_memory_frames: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Deliveries after which a message is dead-lettered.
    #[serde(default = "default_max_deliveries")]
    pub max_deliveries: u32,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_visibility_timeout_secs() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_max_deliveries() -> u32 {
    10
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: default_visibility_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            max_deliveries: default_max_deliveries(),
            retry: RetryConfig::default(),
        }
    }
}

/// Backoff curve for automatic resumption and released deliveries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProgressConfig {
    #[serde(default = "default_thresholds")]
    pub thresholds: Vec<StageThreshold>,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            thresholds: default_thresholds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamConfig {
    /// Lines kept by a stream consumer.
    #[serde(default = "default_stream_log_capacity")]
    pub log_capacity: usize,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Capacity of the frame broadcast channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_stream_log_capacity() -> usize {
    DEFAULT_CONSUMER_LOG_CAPACITY
}

fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            log_capacity: default_stream_log_capacity(),
            max_frame_bytes: default_max_frame_bytes(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    /// Messages kept in each job record's log.
    #[serde(default = "default_job_log_capacity")]
    pub log_capacity: usize,
}

fn default_job_log_capacity() -> usize {
    DEFAULT_LOG_CAPACITY
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            log_capacity: default_job_log_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
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
