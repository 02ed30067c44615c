use std::time::Duration;

use crate::job::JobStatus;
use crate::pipeline::RunSummary;

/// What a worker did with a delivery after running it.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Removed from the queue.
    Acked,
    /// Acked, and a follow-up attempt was queued after `delay`.
    Resumed { delay: Duration },
    /// Left alone; another writer owns the job now.
    Abandoned,
    /// Given back to the queue, visible again after `delay`.
    Released { delay: Duration },
}

/// Report of one processed delivery.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub job_id: String,
    /// Status the job was left in, when known.
    pub status: Option<JobStatus>,
    pub summary: Option<RunSummary>,
    pub disposition: Disposition,
    pub error: Option<String>,
}

impl JobResult {
    pub fn finished(summary: RunSummary, disposition: Disposition) -> Self {
        Self {
            job_id: summary.job_id.clone(),
            status: Some(summary.status),
            summary: Some(summary),
            disposition,
            error: None,
        }
    }

    pub fn skipped(job_id: String, status: JobStatus) -> Self {
        Self {
            job_id,
            status: Some(status),
            summary: None,
            disposition: Disposition::Acked,
            error: None,
        }
    }

    pub fn failure(job_id: &str, disposition: Disposition, error: String) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: None,
            summary: None,
            disposition,
            error: Some(error),
        }
    }

    pub fn success(&self) -> bool {
        matches!(
            self.status,
            Some(JobStatus::Completed | JobStatus::CompletedWithWarnings)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(status: JobStatus) -> RunSummary {
        RunSummary {
            job_id: "job-1".to_string(),
            status,
            attempt: 1,
            total_units: 4,
            completed_units: 3,
            failed_units: 1,
            final_output_key: None,
        }
    }

    #[test]
    fn test_finished_result() {
        let result = JobResult::finished(
            summary(JobStatus::CompletedWithWarnings),
            Disposition::Acked,
        );
        assert!(result.success());
        assert_eq!(result.job_id, "job-1");
        assert!(result.error.is_none());
    }

    #[test]
    fn test_failure_result() {
        let result = JobResult::failure(
            "job-2",
            Disposition::Released {
                delay: Duration::from_secs(2),
            },
            "database is locked".to_string(),
        );
        assert!(!result.success());
        assert_eq!(result.status, None);
    }

    #[test]
    fn test_timeout_is_not_success() {
        let result = JobResult::finished(
            summary(JobStatus::Timeout),
            Disposition::Resumed {
                delay: Duration::from_secs(1),
            },
        );
        assert!(!result.success());
    }
}
