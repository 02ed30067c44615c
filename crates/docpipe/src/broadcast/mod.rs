//! Broadcasting and storage of job state.
//!
//! `job_progress` fans live stream frames out to any number of
//! subscribers; `job_store` is the durable home of job records.

pub mod job_progress;
pub mod job_store;

pub use job_progress::{forward_job_frames, FrameBroadcaster, JobFrame};
pub use job_store::{JobStore, MemoryJobStore, SqliteJobStore, StoreError};
