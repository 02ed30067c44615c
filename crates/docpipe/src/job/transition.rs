//! Status transitions applied to a job record.

use chrono::Utc;
use thiserror::Error;

use super::record::JobRecord;
use super::status::JobStatus;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransitionError {
    #[error("Job {job_id}: transition {from} -> {to} is not allowed")]
    Unreachable {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job {job_id}: observed version {observed} is stale (current {current})")]
    Stale {
        job_id: String,
        observed: u64,
        current: u64,
    },
}

/// A requested status change.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub target: JobStatus,
    pub message: Option<String>,
    pub progress: Option<u8>,
    /// Stage label; defaults to the target status name.
    pub stage: Option<String>,
}

impl Transition {
    pub fn to(target: JobStatus) -> Self {
        Self {
            target,
            message: None,
            progress: None,
            stage: None,
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }
}

impl JobRecord {
    /// Applies a transition observed against `observed_version`.
    ///
    /// On error the record is left untouched.
    pub fn apply(
        &mut self,
        observed_version: u64,
        transition: Transition,
    ) -> Result<(), TransitionError> {
        if self.version != observed_version {
            let err = TransitionError::Stale {
                job_id: self.id.clone(),
                observed: observed_version,
                current: self.version,
            };
            tracing::warn!("{}", err);
            return Err(err);
        }

        if !self.status.can_transition_to(transition.target) {
            let err = TransitionError::Unreachable {
                job_id: self.id.clone(),
                from: self.status,
                to: transition.target,
            };
            tracing::warn!("{}", err);
            return Err(err);
        }

        match transition.target {
            JobStatus::Resuming => self.begin_attempt(false),
            JobStatus::Restarting => self.begin_attempt(true),
            _ => {}
        }

        let from = self.status;
        self.status = transition.target;
        self.stage = transition
            .stage
            .unwrap_or_else(|| transition.target.as_str().to_string());
        if let Some(progress) = transition.progress {
            self.advance_progress(progress);
        }
        let message = transition
            .message
            .unwrap_or_else(|| format!("Status changed to {}", transition.target));
        self.push_message(message);

        let now = Utc::now();
        self.last_updated = now;
        if self.status.is_terminal() {
            self.completed_at = Some(now);
        }

        tracing::debug!(job_id = %self.id, %from, to = %self.status, "job transition");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::options::{PagedOptions, PipelineOptions};
    use crate::job::record::ErrorKind;

    fn record() -> JobRecord {
        JobRecord::new(
            "file:///tmp/a.pdf",
            PipelineOptions::Paged(PagedOptions {
                model: "ocr".to_string(),
                dpi: 200,
                max_pages: None,
            }),
            10,
        )
    }

    #[test]
    fn test_apply_sets_stage_message_and_progress() {
        let mut r = record();
        r.apply(
            0,
            Transition::to(JobStatus::Downloading)
                .message("Fetching document")
                .progress(5),
        )
        .unwrap();

        assert_eq!(r.status, JobStatus::Downloading);
        assert_eq!(r.stage, "downloading");
        assert_eq!(r.message, "Fetching document");
        assert_eq!(r.progress, 5);
        assert!(r.completed_at.is_none());
    }

    #[test]
    fn test_unreachable_target_is_rejected_without_change() {
        let mut r = record();
        let before = r.clone();
        let err = r
            .apply(0, Transition::to(JobStatus::Merging))
            .unwrap_err();
        assert!(matches!(err, TransitionError::Unreachable { .. }));
        assert_eq!(r, before);
    }

    #[test]
    fn test_stale_version_is_rejected() {
        let mut r = record();
        r.version = 3;
        let err = r
            .apply(2, Transition::to(JobStatus::Downloading))
            .unwrap_err();
        assert_eq!(
            err,
            TransitionError::Stale {
                job_id: r.id.clone(),
                observed: 2,
                current: 3
            }
        );
        assert_eq!(r.status, JobStatus::Initialized);
    }

    #[test]
    fn test_terminal_sets_completed_at() {
        let mut r = record();
        r.apply(0, Transition::to(JobStatus::Failed)).unwrap();
        assert!(r.completed_at.is_some());
    }

    #[test]
    fn test_resuming_opens_new_attempt_and_resets_progress() {
        let mut r = record();
        r.total_units = 3;
        r.record_result(0, "p0");
        r.record_error(1, ErrorKind::Timeout, "slow");
        r.advance_progress(60);
        r.status = JobStatus::Failed;

        r.apply(0, Transition::to(JobStatus::Resuming)).unwrap();
        assert_eq!(r.attempt, 2);
        assert_eq!(r.progress, 0);
        assert_eq!(r.result_paths.len(), 1);
        assert!(r.completed_at.is_none());

        r.apply(0, Transition::to(JobStatus::Processing)).unwrap();
        assert_eq!(r.status, JobStatus::Processing);
    }

    #[test]
    fn test_completed_cannot_resume() {
        let mut r = record();
        r.status = JobStatus::Completed;
        assert!(r.apply(0, Transition::to(JobStatus::Resuming)).is_err());
        assert!(r.apply(0, Transition::to(JobStatus::Restarting)).is_ok());
    }
}
