use std::time::{Duration, Instant};

use crate::worker::queue::Lease;

use super::collaborators::Unit;

/// Transient state of one attempt. Never persisted; the job record is.
pub struct PipelineContext {
    pub job_id: String,

    // Queue claim held by the worker driving this attempt
    pub lease: Option<Lease>,

    pub started: Instant,
    pub deadline: Option<Instant>,

    // Set once the document has been split
    pub units: Vec<Unit>,

    // True when the attempt continues from a checkpoint
    pub resuming: bool,
}

impl PipelineContext {
    pub fn new(job_id: &str, lease: Option<Lease>, attempt_deadline: Option<Duration>) -> Self {
        let started = Instant::now();
        Self {
            job_id: job_id.to_string(),
            lease,
            started,
            deadline: attempt_deadline.map(|d| started + d),
            units: Vec::new(),
            resuming: false,
        }
    }

    pub fn deadline_exceeded(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}
