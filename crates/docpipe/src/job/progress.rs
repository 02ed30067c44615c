//! Stage thresholds and unit-level progress interpolation.

use serde::{Deserialize, Serialize};

pub const STAGE_INITIALIZED: &str = "initialized";
pub const STAGE_DOWNLOADING: &str = "downloading";
pub const STAGE_EXTRACTING: &str = "extracting";
pub const STAGE_CHUNKING: &str = "chunking";
pub const STAGE_PROCESSING: &str = "processing";
pub const STAGE_MERGING: &str = "merging";
pub const STAGE_COMPLETED: &str = "completed";
/// Stage label of memory-usage frames.
pub const STAGE_MEMORY: &str = "memory";

/// Point on the 0-100 scale at which a stage is considered reached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StageThreshold {
    pub stage: String,
    pub progress: u8,
}

impl StageThreshold {
    pub fn new(stage: &str, progress: u8) -> Self {
        Self {
            stage: stage.to_string(),
            progress,
        }
    }
}

pub fn default_thresholds() -> Vec<StageThreshold> {
    vec![
        StageThreshold::new(STAGE_INITIALIZED, 0),
        StageThreshold::new(STAGE_DOWNLOADING, 5),
        StageThreshold::new(STAGE_EXTRACTING, 15),
        StageThreshold::new(STAGE_CHUNKING, 25),
        StageThreshold::new(STAGE_PROCESSING, 90),
        StageThreshold::new(STAGE_MERGING, 95),
        StageThreshold::new(STAGE_COMPLETED, 100),
    ]
}

/// Maps stages and unit cursors onto the progress scale.
#[derive(Debug, Clone)]
pub struct ProgressModel {
    thresholds: Vec<StageThreshold>,
}

impl Default for ProgressModel {
    fn default() -> Self {
        Self::new(default_thresholds())
    }
}

impl ProgressModel {
    /// `thresholds` must be ordered by stage; config validation enforces it.
    pub fn new(thresholds: Vec<StageThreshold>) -> Self {
        Self { thresholds }
    }

    fn position(&self, stage: &str) -> Option<usize> {
        self.thresholds.iter().position(|t| t.stage == stage)
    }

    /// Threshold of `stage`; unknown stages map to 0.
    pub fn threshold(&self, stage: &str) -> u8 {
        self.position(stage)
            .map(|i| self.thresholds[i].progress)
            .unwrap_or(0)
    }

    /// Interpolates between the previous stage's threshold and `stage`'s
    /// threshold using `current / total`.
    pub fn interpolate(&self, stage: &str, current: usize, total: usize) -> u8 {
        let Some(i) = self.position(stage) else {
            return 0;
        };
        let upper = self.thresholds[i].progress as f64;
        let lower = if i == 0 {
            0.0
        } else {
            self.thresholds[i - 1].progress as f64
        };

        if total == 0 {
            return upper as u8;
        }

        let fraction = (current.min(total) as f64) / (total as f64);
        (lower + (upper - lower) * fraction).floor() as u8
    }
}
