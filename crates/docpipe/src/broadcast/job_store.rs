//! Job store with optimistic concurrency.
//!
//! Every successful write bumps the record's `version`; a write whose
//! expected version no longer matches the stored one is rejected with
//! [`StoreError::Conflict`] and leaves the stored record untouched.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;

use crate::db::job_repo::{self, JobRow, PageCursor};
use crate::db::{Database, DatabaseError};
use crate::job::{JobRecord, JobStatus};

/// Rows fetched per query when listing jobs.
const PAGE_SIZE: u32 = 100;

/// Errors from job store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Job {id}: expected version {expected}, stored version is {actual}")]
    Conflict { id: String, expected: u64, actual: u64 },

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job already exists: {0}")]
    Duplicate(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Durable, key-addressable storage for job records.
pub trait JobStore: Send + Sync {
    /// Stores a new record. Returns the stored version.
    fn create(&self, record: &JobRecord) -> Result<u64, StoreError>;

    fn load(&self, id: &str) -> Result<JobRecord, StoreError>;

    /// Overwrites the record if the stored version equals `expected_version`.
    /// Returns the new stored version.
    fn save(&self, record: &JobRecord, expected_version: u64) -> Result<u64, StoreError>;

    /// Records with the given status, oldest first.
    fn list_by_status(&self, status: JobStatus) -> Result<Vec<JobRecord>, StoreError>;
}

// ─── SQLite ─────────────────────────────────────────────────────────────────

/// Job store persisted in the `jobs` table.
#[derive(Clone)]
pub struct SqliteJobStore {
    db: Database,
}

impl SqliteJobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn to_row(record: &JobRecord, version: u64) -> Result<JobRow, StoreError> {
        let mut stored = record.clone();
        stored.version = version;
        let json = serde_json::to_string(&stored).map_err(DatabaseError::from)?;
        Ok(JobRow {
            id: stored.id,
            status: stored.status.as_str().to_string(),
            stage: stored.stage,
            attempt: stored.attempt,
            version,
            record: json,
            created_at: stored.created_at.to_rfc3339(),
            last_updated: stored.last_updated.to_rfc3339(),
            completed_at: stored.completed_at.map(|t| t.to_rfc3339()),
        })
    }

    fn from_row(row: &JobRow) -> Result<JobRecord, StoreError> {
        let mut record: JobRecord =
            serde_json::from_str(&row.record).map_err(DatabaseError::from)?;
        // The column is authoritative for the version check.
        record.version = row.version;
        Ok(record)
    }
}

impl JobStore for SqliteJobStore {
    fn create(&self, record: &JobRecord) -> Result<u64, StoreError> {
        if job_repo::version_of(&self.db, &record.id)?.is_some() {
            return Err(StoreError::Duplicate(record.id.clone()));
        }
        let version = record.version + 1;
        job_repo::insert(&self.db, &Self::to_row(record, version)?)?;
        log::debug!("Created job {} at version {}", record.id, version);
        Ok(version)
    }

    fn load(&self, id: &str) -> Result<JobRecord, StoreError> {
        match job_repo::find_by_id(&self.db, id)? {
            Some(row) => Self::from_row(&row),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    fn save(&self, record: &JobRecord, expected_version: u64) -> Result<u64, StoreError> {
        let version = expected_version + 1;
        let row = Self::to_row(record, version)?;
        if job_repo::update_if_version(&self.db, &row, expected_version)? {
            return Ok(version);
        }
        match job_repo::version_of(&self.db, &record.id)? {
            Some(actual) => Err(StoreError::Conflict {
                id: record.id.clone(),
                expected: expected_version,
                actual,
            }),
            None => Err(StoreError::NotFound(record.id.clone())),
        }
    }

    fn list_by_status(&self, status: JobStatus) -> Result<Vec<JobRecord>, StoreError> {
        let expected = job_repo::count_by_status(&self.db, status.as_str())?;
        let mut records = Vec::with_capacity(expected as usize);
        let mut cursor: Option<PageCursor> = None;
        loop {
            let rows =
                job_repo::page_by_status(&self.db, status.as_str(), cursor.as_ref(), PAGE_SIZE)?;
            let Some(last) = rows.last() else { break };
            cursor = Some(PageCursor::from(last));
            for row in &rows {
                records.push(Self::from_row(row)?);
            }
            if rows.len() < PAGE_SIZE as usize {
                break;
            }
        }
        Ok(records)
    }
}

// ─── In-memory ──────────────────────────────────────────────────────────────

/// Job store kept in process memory.
#[derive(Default)]
pub struct MemoryJobStore {
    records: RwLock<HashMap<String, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, JobRecord>> {
        match self.records.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Memory job store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, JobRecord>> {
        match self.records.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Memory job store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl JobStore for MemoryJobStore {
    fn create(&self, record: &JobRecord) -> Result<u64, StoreError> {
        let mut records = self.write();
        if records.contains_key(&record.id) {
            return Err(StoreError::Duplicate(record.id.clone()));
        }
        let mut stored = record.clone();
        stored.version += 1;
        let version = stored.version;
        records.insert(stored.id.clone(), stored);
        Ok(version)
    }

    fn load(&self, id: &str) -> Result<JobRecord, StoreError> {
        self.read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn save(&self, record: &JobRecord, expected_version: u64) -> Result<u64, StoreError> {
        let mut records = self.write();
        let current = records
            .get(&record.id)
            .ok_or_else(|| StoreError::NotFound(record.id.clone()))?;
        if current.version != expected_version {
            return Err(StoreError::Conflict {
                id: record.id.clone(),
                expected: expected_version,
                actual: current.version,
            });
        }
        let mut stored = record.clone();
        stored.version = expected_version + 1;
        let version = stored.version;
        records.insert(stored.id.clone(), stored);
        Ok(version)
    }

    fn list_by_status(&self, status: JobStatus) -> Result<Vec<JobRecord>, StoreError> {
        let mut records: Vec<JobRecord> = self
            .read()
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }
}
