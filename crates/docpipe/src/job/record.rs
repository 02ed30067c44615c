//! The persisted state of one job.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::options::{PipelineOptions, UnitKind};
use super::status::JobStatus;

/// Default capacity of the per-job message log.
pub const DEFAULT_LOG_CAPACITY: usize = 50;

/// How a unit failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The bounded wait for the unit transform elapsed.
    Timeout,
    /// The collaborator returned an error.
    Other,
}

/// A unit-scoped failure. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnitError {
    pub unit_index: usize,
    pub kind: ErrorKind,
    pub message: String,
    pub time: DateTime<Utc>,
    /// Attempt during which the failure was recorded.
    pub attempt: u32,
}

/// Reference to the partial artifact produced for one unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnitArtifact {
    pub unit_index: usize,
    pub artifact: String,
}

/// One line of the bounded message log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub time: DateTime<Utc>,
    pub message: String,
}

/// Partial state of an attempt that a restart discarded, kept for audit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttemptSummary {
    pub attempt: u32,
    pub status: JobStatus,
    pub total_units: usize,
    pub result_paths: Vec<UnitArtifact>,
    pub ended_at: DateTime<Utc>,
}

/// Mutable state of a processing job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: String,
    /// Reference of the document to fetch.
    pub source: String,
    pub options: PipelineOptions,
    pub status: JobStatus,
    pub stage: String,
    pub progress: u8,
    pub message: String,
    #[serde(default)]
    pub log: VecDeque<LogEntry>,
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
    pub unit_kind: UnitKind,
    pub total_units: usize,
    pub current_unit: usize,
    #[serde(default)]
    pub result_paths: Vec<UnitArtifact>,
    #[serde(default)]
    pub errors: Vec<UnitError>,
    #[serde(default)]
    pub timeout_count: usize,
    /// Last job-level (not unit-scoped) error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_output_key: Option<String>,
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<AttemptSummary>,
    /// Optimistic concurrency counter, bumped by every store write.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_log_capacity() -> usize {
    DEFAULT_LOG_CAPACITY
}

impl JobRecord {
    /// Creates a fresh `initialized` record.
    pub fn new(source: impl Into<String>, options: PipelineOptions, log_capacity: usize) -> Self {
        let now = Utc::now();
        let unit_kind = options.unit_kind();
        let mut record = Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            options,
            status: JobStatus::Initialized,
            stage: JobStatus::Initialized.as_str().to_string(),
            progress: 0,
            message: String::new(),
            log: VecDeque::new(),
            log_capacity: log_capacity.max(1),
            unit_kind,
            total_units: 0,
            current_unit: 0,
            result_paths: Vec::new(),
            errors: Vec::new(),
            timeout_count: 0,
            failure: None,
            final_output_key: None,
            attempt: 1,
            history: Vec::new(),
            version: 0,
            created_at: now,
            last_updated: now,
            completed_at: None,
        };
        record.push_message("Job created");
        record
    }

    /// Sets the latest status line and appends it to the bounded log.
    pub fn push_message(&mut self, message: impl Into<String>) {
        let message = message.into();
        while self.log.len() >= self.log_capacity {
            self.log.pop_front();
        }
        self.log.push_back(LogEntry {
            time: Utc::now(),
            message: message.clone(),
        });
        self.message = message;
    }

    /// Raises progress to `value`; lower values are ignored.
    pub fn advance_progress(&mut self, value: u8) {
        self.progress = self.progress.max(value.min(100));
    }

    pub fn has_result(&self, unit_index: usize) -> bool {
        self.result_paths.iter().any(|r| r.unit_index == unit_index)
    }

    /// Appends a unit artifact. Returns false if the index already has one.
    pub fn record_result(&mut self, unit_index: usize, artifact: impl Into<String>) -> bool {
        if self.has_result(unit_index) || self.result_paths.len() >= self.total_units {
            return false;
        }
        self.result_paths.push(UnitArtifact {
            unit_index,
            artifact: artifact.into(),
        });
        true
    }

    pub fn record_error(&mut self, unit_index: usize, kind: ErrorKind, message: impl Into<String>) {
        if kind == ErrorKind::Timeout {
            self.timeout_count += 1;
        }
        self.errors.push(UnitError {
            unit_index,
            kind,
            message: message.into(),
            time: Utc::now(),
            attempt: self.attempt,
        });
    }

    /// Errors recorded during the current attempt.
    pub fn attempt_errors(&self) -> impl Iterator<Item = &UnitError> {
        let attempt = self.attempt;
        self.errors.iter().filter(move |e| e.attempt == attempt)
    }

    pub fn other_error_count(&self) -> usize {
        self.errors
            .iter()
            .filter(|e| e.kind == ErrorKind::Other)
            .count()
    }

    /// Units that have no artifact yet.
    pub fn unresolved_units(&self) -> usize {
        self.total_units.saturating_sub(self.result_paths.len())
    }

    /// Artifact references sorted by unit index, ready for merging.
    pub fn ordered_artifacts(&self) -> Vec<String> {
        let mut paths = self.result_paths.clone();
        paths.sort_by_key(|p| p.unit_index);
        paths.into_iter().map(|p| p.artifact).collect()
    }

    /// Decides the terminal status once every unit has been visited.
    ///
    /// Counts units still lacking an artifact rather than `errors`, which keeps
    /// failures from earlier attempts.
    pub fn settle_status(&self) -> JobStatus {
        if self.total_units > 0 && self.result_paths.is_empty() {
            JobStatus::Failed
        } else if self.unresolved_units() > 0 {
            JobStatus::CompletedWithWarnings
        } else {
            JobStatus::Completed
        }
    }

    /// Opens a new attempt. A restart archives and clears the partial state.
    pub(crate) fn begin_attempt(&mut self, restart: bool) {
        if restart {
            self.history.push(AttemptSummary {
                attempt: self.attempt,
                status: self.status,
                total_units: self.total_units,
                result_paths: std::mem::take(&mut self.result_paths),
                ended_at: Utc::now(),
            });
            self.total_units = 0;
            self.current_unit = 0;
        } else {
            self.current_unit = self.result_paths.len().min(self.total_units);
        }
        self.attempt += 1;
        self.progress = 0;
        self.failure = None;
        self.final_output_key = None;
        self.completed_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::options::ChunkedOptions;

    fn record() -> JobRecord {
        JobRecord::new(
            "s3://bucket/report.pdf",
            PipelineOptions::Chunked(ChunkedOptions {
                model: "m".to_string(),
                chunk_size: 100,
                chunk_overlap: 0,
                instructions: None,
            }),
            3,
        )
    }

    #[test]
    fn test_new_record_is_initialized() {
        let r = record();
        assert_eq!(r.status, JobStatus::Initialized);
        assert_eq!(r.unit_kind, UnitKind::Chunk);
        assert_eq!(r.attempt, 1);
        assert_eq!(r.version, 0);
        assert_eq!(r.message, "Job created");
        assert!(!r.id.is_empty());
    }

    #[test]
    fn test_log_drops_oldest() {
        let mut r = record();
        for i in 0..5 {
            r.push_message(format!("line {}", i));
        }
        assert_eq!(r.log.len(), 3);
        assert_eq!(r.log.front().unwrap().message, "line 2");
        assert_eq!(r.message, "line 4");
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut r = record();
        r.advance_progress(40);
        r.advance_progress(10);
        assert_eq!(r.progress, 40);
        r.advance_progress(250);
        assert_eq!(r.progress, 100);
    }

    #[test]
    fn test_record_result_rejects_duplicates_and_overflow() {
        let mut r = record();
        r.total_units = 2;
        assert!(r.record_result(0, "a0"));
        assert!(!r.record_result(0, "again"));
        assert!(r.record_result(1, "a1"));
        assert!(!r.record_result(2, "a2"));
        assert_eq!(r.result_paths.len(), 2);
    }

    #[test]
    fn test_settle_status() {
        let mut r = record();
        r.total_units = 3;
        r.record_error(0, ErrorKind::Other, "bad");
        r.record_error(1, ErrorKind::Timeout, "slow");
        r.record_error(2, ErrorKind::Other, "bad");
        assert_eq!(r.settle_status(), JobStatus::Failed);

        r.record_result(1, "a1");
        assert_eq!(r.settle_status(), JobStatus::CompletedWithWarnings);

        r.record_result(0, "a0");
        r.record_result(2, "a2");
        assert_eq!(r.settle_status(), JobStatus::Completed);
        assert_eq!(r.timeout_count, 1);
        assert_eq!(r.other_error_count(), 2);
    }

    #[test]
    fn test_zero_units_complete() {
        let r = record();
        assert_eq!(r.settle_status(), JobStatus::Completed);
    }

    #[test]
    fn test_ordered_artifacts_sorts_by_index() {
        let mut r = record();
        r.total_units = 3;
        r.record_result(2, "c");
        r.record_result(0, "a");
        r.record_result(1, "b");
        assert_eq!(r.ordered_artifacts(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_resume_attempt_keeps_results() {
        let mut r = record();
        r.total_units = 4;
        r.record_result(0, "a");
        r.record_error(1, ErrorKind::Other, "x");
        r.status = JobStatus::Failed;
        r.begin_attempt(false);

        assert_eq!(r.attempt, 2);
        assert_eq!(r.current_unit, 1);
        assert_eq!(r.result_paths.len(), 1);
        assert_eq!(r.errors.len(), 1);
        assert_eq!(r.attempt_errors().count(), 0);
    }

    #[test]
    fn test_resume_that_fills_gaps_settles_completed() {
        let mut r = record();
        r.total_units = 3;
        r.record_result(0, "a0");
        r.record_error(1, ErrorKind::Timeout, "slow");
        r.record_result(2, "a2");
        assert_eq!(r.settle_status(), JobStatus::CompletedWithWarnings);

        r.status = JobStatus::Timeout;
        r.begin_attempt(false);
        r.record_result(1, "a1");

        // The first attempt's timeout stays on the record for audit
        assert_eq!(r.settle_status(), JobStatus::Completed);
        assert_eq!(r.errors.len(), 1);
        assert_eq!(r.timeout_count, 1);
    }

    #[test]
    fn test_restart_archives_partial_state() {
        let mut r = record();
        r.total_units = 2;
        r.record_result(0, "a");
        r.status = JobStatus::Timeout;
        r.begin_attempt(true);

        assert_eq!(r.total_units, 0);
        assert!(r.result_paths.is_empty());
        assert_eq!(r.history.len(), 1);
        assert_eq!(r.history[0].status, JobStatus::Timeout);
        assert_eq!(r.history[0].result_paths[0].artifact, "a");
    }

    #[test]
    fn test_serializes_camel_case() {
        let r = record();
        let value = serde_json::to_value(&r).unwrap();
        assert!(value.get("totalUnits").is_some());
        assert!(value.get("resultPaths").is_some());
        assert_eq!(value["options"]["pipeline"], "chunked");
        let back: JobRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, r);
    }
}
