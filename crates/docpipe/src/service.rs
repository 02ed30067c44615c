//! Caller-side job operations: submit, resume, restart, cancel, query.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::broadcast::{JobStore, StoreError};
use crate::job::{JobRecord, JobStatus, OptionsError, PipelineOptions, Transition, TransitionError};
use crate::sanitize;
use crate::worker::queue::WorkQueue;

/// Times a caller transition is retried when it loses a version race.
const CONFLICT_RETRIES: u32 = 5;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Invalid pipeline options: {0}")]
    Options(#[from] OptionsError),

    #[error("Job {job_id} is {status} and cannot be {action}")]
    InvalidState {
        job_id: String,
        status: JobStatus,
        action: &'static str,
    },

    #[error("Transition rejected: {0}")]
    Transition(#[from] TransitionError),

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),
}

/// A job record returned by an operation that also enqueues it.
#[derive(Debug, Clone)]
pub struct JobReceipt {
    pub record: JobRecord,
    /// Set when the record was written but the queue rejected the message.
    pub warning: Option<String>,
}

pub struct JobService {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn WorkQueue>,
    log_capacity: usize,
}

impl JobService {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn WorkQueue>, log_capacity: usize) -> Self {
        Self {
            store,
            queue,
            log_capacity,
        }
    }

    /// Validates the options, creates an `initialized` record and queues it.
    pub fn submit(
        &self,
        source: &str,
        options: PipelineOptions,
    ) -> Result<JobReceipt, ServiceError> {
        options.validate()?;
        let mut record = JobRecord::new(source, options, self.log_capacity);
        record.version = self.store.create(&record)?;
        info!(
            job_id = %record.id,
            source = %sanitize::redact_source(source),
            source_hash = %sanitize::hash_source(source),
            unit_kind = %record.unit_kind,
            "Job submitted"
        );

        let warning = self.enqueue(&record, Duration::ZERO);
        Ok(JobReceipt { record, warning })
    }

    /// Continues a failed or timed-out job from its checkpoint.
    pub fn resume(&self, job_id: &str, delay: Duration) -> Result<JobReceipt, ServiceError> {
        self.begin_attempt(job_id, JobStatus::Resuming, delay, "resumed")
    }

    /// Starts a job over, archiving the partial state of the previous attempt.
    pub fn restart(&self, job_id: &str, delay: Duration) -> Result<JobReceipt, ServiceError> {
        self.begin_attempt(job_id, JobStatus::Restarting, delay, "restarted")
    }

    /// Fails an active job. A runner working on it abandons at its next checkpoint.
    pub fn cancel(&self, job_id: &str, reason: &str) -> Result<JobRecord, ServiceError> {
        let record = self.transition(job_id, "cancelled", |record| {
            if record.status.is_terminal() || record.status == JobStatus::Timeout {
                return None;
            }
            record.failure = Some(format!("Cancelled: {}", reason));
            Some(Transition::to(JobStatus::Failed).message(format!("Cancelled: {}", reason)))
        })?;
        info!(job_id = %job_id, "Job cancelled");
        Ok(record)
    }

    pub fn get(&self, job_id: &str) -> Result<JobRecord, ServiceError> {
        Ok(self.store.load(job_id)?)
    }

    pub fn list(&self, status: JobStatus) -> Result<Vec<JobRecord>, ServiceError> {
        Ok(self.store.list_by_status(status)?)
    }

    fn begin_attempt(
        &self,
        job_id: &str,
        target: JobStatus,
        delay: Duration,
        action: &'static str,
    ) -> Result<JobReceipt, ServiceError> {
        let record = self.transition(job_id, action, |record| {
            if !record.status.can_transition_to(target) {
                return None;
            }
            Some(Transition::to(target).message(format!(
                "Attempt {} {} from {}",
                record.attempt + 1,
                action,
                record.status
            )))
        })?;
        info!(job_id = %job_id, attempt = record.attempt, ?delay, "Job {}", action);

        let warning = self.enqueue(&record, delay);
        Ok(JobReceipt { record, warning })
    }

    /// Load-modify-save with the stale-write guard, retried on version races.
    ///
    /// `prepare` returns the transition to apply, or `None` if the current
    /// status does not allow the action.
    fn transition<F>(
        &self,
        job_id: &str,
        action: &'static str,
        prepare: F,
    ) -> Result<JobRecord, ServiceError>
    where
        F: Fn(&mut JobRecord) -> Option<Transition>,
    {
        let mut retries = 0;
        loop {
            let mut record = self.store.load(job_id)?;
            let observed = record.version;
            let Some(transition) = prepare(&mut record) else {
                return Err(ServiceError::InvalidState {
                    job_id: job_id.to_string(),
                    status: record.status,
                    action,
                });
            };
            record.apply(observed, transition)?;

            match self.store.save(&record, observed) {
                Ok(version) => {
                    record.version = version;
                    return Ok(record);
                }
                Err(e) if e.is_conflict() && retries < CONFLICT_RETRIES => {
                    retries += 1;
                    debug!(job_id = %job_id, retries, "Version race, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn enqueue(&self, record: &JobRecord, delay: Duration) -> Option<String> {
        match self.queue.enqueue(&record.id, delay, record.attempt) {
            Ok(()) => None,
            Err(e) => {
                warn!(job_id = %record.id, "Job saved but could not be queued: {}", e);
                Some(format!("Job saved but could not be queued: {}", e))
            }
        }
    }
}
