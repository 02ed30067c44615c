//! Test harness for isolated integration tests.
//!
//! Each `TestHarness` owns a temporary directory holding a SQLite database,
//! with a job store, a work queue and a job service on top of it.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use docpipe::broadcast::{JobStore, SqliteJobStore};
use docpipe::db::Database;
use docpipe::job::{JobRecord, JobStatus, PipelineOptions};
use docpipe::pipeline::{Collaborators, Pipeline, PipelineConfig};
use docpipe::service::JobService;
use docpipe::worker::{QueueSettings, SqliteQueue, WorkQueue};

pub struct TestHarness {
    temp_dir: TempDir,
    pub db_path: PathBuf,
    pub db: Database,
    pub store: Arc<SqliteJobStore>,
    pub queue: Arc<SqliteQueue>,
    pub service: JobService,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_queue_settings(QueueSettings {
            visibility_timeout: Duration::from_secs(30),
            max_deliveries: 5,
        })
    }

    pub fn with_queue_settings(settings: QueueSettings) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("data").join("docpipe.db");
        let db = Database::open(&db_path).expect("Failed to open database");

        let store = Arc::new(SqliteJobStore::new(db.clone()));
        let queue = Arc::new(SqliteQueue::new(db.clone(), settings));
        let service = JobService::new(store.clone(), queue.clone(), 20);

        Self {
            temp_dir,
            db_path,
            db,
            store,
            queue,
            service,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn store_handle(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }

    pub fn queue_handle(&self) -> Arc<dyn WorkQueue> {
        self.queue.clone()
    }

    pub fn pipeline(&self, config: PipelineConfig, collaborators: Collaborators) -> Pipeline {
        Pipeline::new(Arc::new(config), self.store_handle(), collaborators)
    }

    /// Stores a record that already went through an attempt.
    ///
    /// `done` unit indexes get artifacts; the record is left in `status`.
    pub fn seed_partial(
        &self,
        options: PipelineOptions,
        total_units: usize,
        done: &[usize],
        status: JobStatus,
    ) -> String {
        let mut record = JobRecord::new("s3://bucket/seeded.pdf", options, 20);
        record.total_units = total_units;
        for &index in done {
            assert!(record.record_result(index, format!("seeded-{}", index)));
        }
        record.current_unit = done.iter().map(|i| i + 1).max().unwrap_or(0);
        record.status = status;
        record.stage = status.as_str().to_string();
        self.store.create(&record).expect("Failed to seed record");
        record.id
    }

    pub fn load(&self, id: &str) -> JobRecord {
        self.store.load(id).expect("Job should exist")
    }
}
