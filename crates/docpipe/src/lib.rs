//! Resumable document processing pipeline.
//!
//! A job splits a document into units (pages or chunks), transforms each
//! unit independently and merges the artifacts. Progress is checkpointed
//! after every unit so a failed or timed-out job resumes where it stopped,
//! and every run emits a stream of self-delimited JSON frames.

pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod runtime;
pub mod sanitize;
pub mod service;
pub mod stream;
pub mod telemetry;
pub mod worker;

pub use broadcast::{FrameBroadcaster, JobStore, MemoryJobStore, SqliteJobStore, StoreError};
pub use config::{load_config, Config};
pub use error::{ConfigError, DocpipeError, Result, WorkerError};
pub use job::{JobRecord, JobStatus, PipelineOptions, UnitKind};
pub use pipeline::{Collaborators, Pipeline, PipelineConfig, PipelineError, RunOutcome};
pub use runtime::Runtime;
pub use service::{JobReceipt, JobService, ServiceError};
pub use stream::{FrameDecoder, FrameEncoder, StreamConsumer, StreamFrame};
pub use worker::{MemoryQueue, SqliteQueue, WorkQueue, WorkerPool};
