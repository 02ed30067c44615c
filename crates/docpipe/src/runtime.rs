//! Wires a database, job store, queue, pipeline and worker pool from config.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use crate::broadcast::{forward_job_frames, FrameBroadcaster, JobStore, SqliteJobStore};
use crate::config::Config;
use crate::db::{self, Database};
use crate::error::{ConfigError, Result};
use crate::pipeline::{Collaborators, Pipeline, PipelineConfig};
use crate::service::JobService;
use crate::worker::{QueueSettings, SqliteQueue, WorkQueue, WorkerPool, WorkerSettings};

/// A running docpipe instance backed by SQLite.
pub struct Runtime {
    service: JobService,
    broadcaster: FrameBroadcaster,
    pool: WorkerPool,
    queue: SqliteQueue,
}

impl Runtime {
    /// Opens the configured database (or the default path) and starts the workers.
    pub fn start(config: &Config, collaborators: Collaborators) -> Result<Self> {
        let path = match config.database_path {
            Some(ref path) => PathBuf::from(path),
            None => db::default_database_path().ok_or_else(|| ConfigError::Validation {
                message: "no database_path set and no home directory found".to_string(),
            })?,
        };
        let db = Database::open(&path)?;
        Self::with_database(config, db, collaborators)
    }

    pub fn with_database(
        config: &Config,
        db: Database,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(db.clone()));
        let queue = SqliteQueue::new(db, QueueSettings::from_config(&config.queue));
        let shared_queue: Arc<dyn WorkQueue> = Arc::new(queue.clone());

        let pipeline = Arc::new(Pipeline::new(
            Arc::new(PipelineConfig::from_config(config)),
            Arc::clone(&store),
            collaborators,
        ));
        let broadcaster = FrameBroadcaster::new(config.stream.channel_capacity);
        let pool = WorkerPool::with_broadcaster(
            pipeline,
            Arc::clone(&shared_queue),
            WorkerSettings::from_config(config),
            Some(broadcaster.clone()),
        )?;

        Ok(Self {
            service: JobService::new(store, shared_queue, config.job.log_capacity),
            broadcaster,
            pool,
            queue,
        })
    }

    pub fn service(&self) -> &JobService {
        &self.service
    }

    pub fn broadcaster(&self) -> &FrameBroadcaster {
        &self.broadcaster
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Returns (live, dead-lettered) queue message counts.
    pub fn queue_counts(&self) -> Result<(u64, u64)> {
        Ok(self.queue.counts()?)
    }

    /// Streams the frames of `job_id` to `writer` until its result frame.
    ///
    /// Subscribe before submitting or resuming the job, or early frames are missed.
    pub fn stream_job<W: Write>(&self, job_id: &str, writer: W) -> std::io::Result<usize> {
        forward_job_frames(self.broadcaster.subscribe(), job_id, writer)
    }

    pub fn shutdown(self) {
        self.pool.shutdown();
        self.pool.wait();
    }
}
