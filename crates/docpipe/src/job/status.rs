//! Job status and the transition table.

use serde::{Deserialize, Serialize};

/// Status of a job record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Initialized,
    Downloading,
    Extracting,
    Chunking,
    Processing,
    Merging,
    Completed,
    CompletedWithWarnings,
    Failed,
    Timeout,
    Resuming,
    Restarting,
}

impl JobStatus {
    pub const ALL: [JobStatus; 12] = [
        JobStatus::Initialized,
        JobStatus::Downloading,
        JobStatus::Extracting,
        JobStatus::Chunking,
        JobStatus::Processing,
        JobStatus::Merging,
        JobStatus::Completed,
        JobStatus::CompletedWithWarnings,
        JobStatus::Failed,
        JobStatus::Timeout,
        JobStatus::Resuming,
        JobStatus::Restarting,
    ];

    /// Stable string form, used as the database column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Initialized => "initialized",
            JobStatus::Downloading => "downloading",
            JobStatus::Extracting => "extracting",
            JobStatus::Chunking => "chunking",
            JobStatus::Processing => "processing",
            JobStatus::Merging => "merging",
            JobStatus::Completed => "completed",
            JobStatus::CompletedWithWarnings => "completed_with_warnings",
            JobStatus::Failed => "failed",
            JobStatus::Timeout => "timeout",
            JobStatus::Resuming => "resuming",
            JobStatus::Restarting => "restarting",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|status| status.as_str() == s)
    }

    /// Terminal statuses only change through an explicit new attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::CompletedWithWarnings | JobStatus::Failed
        )
    }

    /// Statuses a live runner holds while working through the stages.
    pub fn is_running_stage(&self) -> bool {
        matches!(
            self,
            JobStatus::Downloading
                | JobStatus::Extracting
                | JobStatus::Chunking
                | JobStatus::Processing
                | JobStatus::Merging
        )
    }

    /// Statuses from which a new attempt may be requested.
    pub fn is_resumable(&self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Timeout)
    }

    /// Returns true if `target` is reachable from `self` in one step.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        match (self, target) {
            (Initialized, Downloading) => true,
            (Downloading, Extracting) => true,
            (Extracting, Chunking) => true,
            (Chunking, Processing) => true,
            (Processing, Merging) => true,
            (Merging, Completed | CompletedWithWarnings) => true,
            (Resuming, Processing) => true,
            (Restarting, Downloading) => true,
            (Failed | Timeout, Resuming | Restarting) => true,
            (Completed | CompletedWithWarnings, Restarting) => true,
            (
                Initialized | Downloading | Extracting | Chunking | Processing | Merging
                | Resuming | Restarting,
                Failed,
            ) => true,
            (Downloading | Extracting | Chunking | Processing | Merging | Resuming, Timeout) => {
                true
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
