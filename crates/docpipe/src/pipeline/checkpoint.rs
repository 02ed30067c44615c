//! Authoritative in-memory job record plus its persisted checkpoint.
//!
//! The runner mutates the record in memory and commits it after every
//! unit. A failed write leaves the record dirty and is retried by the next
//! commit; a version conflict means another writer took over and the
//! attempt must be abandoned.

use std::sync::Arc;
use std::time::Duration;

use crate::broadcast::{JobStore, StoreError};
use crate::job::{JobRecord, Transition};

use super::error::PipelineError;

pub struct Checkpoint {
    store: Arc<dyn JobStore>,
    record: JobRecord,
    /// Version of the last successful write.
    stored_version: u64,
    dirty: bool,
    retries: u32,
    retry_delay: Duration,
}

impl Checkpoint {
    pub fn load(
        store: Arc<dyn JobStore>,
        job_id: &str,
        retries: u32,
        retry_delay: Duration,
    ) -> Result<Self, PipelineError> {
        let record = match store.load(job_id) {
            Ok(record) => record,
            Err(StoreError::NotFound(id)) => return Err(PipelineError::JobNotFound(id)),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            store,
            stored_version: record.version,
            record,
            dirty: false,
            retries,
            retry_delay,
        })
    }

    pub fn record(&self) -> &JobRecord {
        &self.record
    }

    /// Mutable access; marks the checkpoint dirty.
    pub fn record_mut(&mut self) -> &mut JobRecord {
        self.dirty = true;
        &mut self.record
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Applies a status transition in memory.
    pub fn apply(&mut self, transition: Transition) -> Result<(), PipelineError> {
        let observed = self.record.version;
        self.record.apply(observed, transition)?;
        self.dirty = true;
        Ok(())
    }

    /// Best-effort write. Store outages are logged and retried at the next commit.
    pub fn commit(&mut self) -> Result<(), PipelineError> {
        match self.try_commit() {
            Ok(()) => Ok(()),
            Err(StoreError::Database(e)) => {
                tracing::warn!(
                    job_id = %self.record.id,
                    "Checkpoint write failed, keeping state in memory: {}",
                    e
                );
                Ok(())
            }
            Err(e) => Err(self.fatal(e)),
        }
    }

    /// Write that must land: retried with a delay, then surfaced.
    pub fn commit_required(&mut self) -> Result<(), PipelineError> {
        let mut attempt = 0;
        loop {
            match self.try_commit() {
                Ok(()) => return Ok(()),
                Err(StoreError::Database(e)) if attempt < self.retries => {
                    attempt += 1;
                    tracing::warn!(
                        job_id = %self.record.id,
                        attempt,
                        "Checkpoint write failed, retrying: {}",
                        e
                    );
                    std::thread::sleep(self.retry_delay);
                }
                Err(e) => return Err(self.fatal(e)),
            }
        }
    }

    /// Fails with `Superseded` if the stored record moved past our last write.
    ///
    /// A store outage is not treated as supersession.
    pub fn ensure_current(&self) -> Result<(), PipelineError> {
        match self.store.load(&self.record.id) {
            Ok(stored) if stored.version != self.stored_version => {
                tracing::info!(
                    job_id = %self.record.id,
                    ours = self.stored_version,
                    stored = stored.version,
                    status = %stored.status,
                    "Job record changed underneath the runner"
                );
                Err(PipelineError::Superseded {
                    job_id: self.record.id.clone(),
                })
            }
            Ok(_) => Ok(()),
            Err(StoreError::NotFound(id)) => Err(PipelineError::JobNotFound(id)),
            Err(e) => {
                tracing::warn!(job_id = %self.record.id, "Could not re-read job record: {}", e);
                Ok(())
            }
        }
    }

    fn try_commit(&mut self) -> Result<(), StoreError> {
        if !self.dirty {
            return Ok(());
        }
        let version = self.store.save(&self.record, self.stored_version)?;
        self.record.version = version;
        self.stored_version = version;
        self.dirty = false;
        Ok(())
    }

    fn fatal(&self, err: StoreError) -> PipelineError {
        match err {
            StoreError::Conflict { .. } => PipelineError::Superseded {
                job_id: self.record.id.clone(),
            },
            StoreError::NotFound(id) => PipelineError::JobNotFound(id),
            other => PipelineError::Store(other),
        }
    }
}
