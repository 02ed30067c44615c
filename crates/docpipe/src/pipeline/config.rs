use std::time::Duration;

use crate::config::Config;
use crate::job::ProgressModel;

pub struct PipelineConfig {
    pub unit_timeout: Duration,
    pub attempt_deadline: Option<Duration>,
    pub max_failure_ratio: Option<f64>,
    pub checkpoint_retries: u32,
    pub checkpoint_retry_delay: Duration,
    pub emit_memory_frames: bool,
    pub progress: ProgressModel,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        let runner = &config.runner;
        Self {
            unit_timeout: Duration::from_secs(runner.unit_timeout_secs),
            attempt_deadline: runner.attempt_deadline_secs.map(Duration::from_secs),
            max_failure_ratio: runner.max_failure_ratio,
            checkpoint_retries: runner.checkpoint_retries,
            checkpoint_retry_delay: Duration::from_millis(runner.checkpoint_retry_delay_ms),
            emit_memory_frames: runner.emit_memory_frames,
            progress: ProgressModel::new(config.progress.thresholds.clone()),
        }
    }
}
