use thiserror::Error;

use crate::broadcast::StoreError;
use crate::job::TransitionError;

/// Errors that end an attempt without a decided outcome.
///
/// Unit failures never show up here; they are recorded on the job.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Another writer committed a newer version (cancel, or a second runner).
    #[error("Job {job_id} was updated by another writer; abandoning attempt")]
    Superseded { job_id: String },

    #[error("Queue claim for job {job_id} was lost; abandoning attempt")]
    ClaimLost { job_id: String },

    #[error("Transition rejected: {0}")]
    Transition(#[from] TransitionError),

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// True when the attempt was given up in favour of another writer.
    pub fn is_abandoned(&self) -> bool {
        matches!(
            self,
            PipelineError::Superseded { .. } | PipelineError::ClaimLost { .. }
        )
    }
}
