//! Job repository: CRUD operations for the `jobs` table.
//!
//! The full record is stored as JSON in `record`; the indexed columns
//! mirror the fields used for filtering and the optimistic version check.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub status: String,
    pub stage: String,
    pub attempt: u32,
    pub version: u64,
    pub record: String,
    pub created_at: String,
    pub last_updated: String,
    pub completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            status: row.get("status")?,
            stage: row.get("stage")?,
            attempt: row.get("attempt")?,
            version: row.get::<_, i64>("version")? as u64,
            record: row.get("record")?,
            created_at: row.get("created_at")?,
            last_updated: row.get("last_updated")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

/// Position after the last row of a status page, in listing order.
#[derive(Debug, Clone, PartialEq)]
pub struct PageCursor {
    pub created_at: String,
    pub id: String,
}

impl From<&JobRow> for PageCursor {
    fn from(row: &JobRow) -> Self {
        Self {
            created_at: row.created_at.clone(),
            id: row.id.clone(),
        }
    }
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, status, stage, attempt, version, record, created_at,
             last_updated, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                job.id,
                job.status,
                job.stage,
                job.attempt,
                job.version as i64,
                job.record,
                job.created_at,
                job.last_updated,
                job.completed_at,
            ],
        )?;
        Ok(())
    })
}

/// Overwrites a job row only if its stored version equals `expected_version`.
///
/// Returns `false` when no row matched (stale version or unknown id).
pub fn update_if_version(
    db: &Database,
    job: &JobRow,
    expected_version: u64,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status=?2, stage=?3, attempt=?4, version=?5, record=?6,
             last_updated=?7, completed_at=?8
             WHERE id=?1 AND version=?9",
            params![
                job.id,
                job.status,
                job.stage,
                job.attempt,
                job.version as i64,
                job.record,
                job.last_updated,
                job.completed_at,
                expected_version as i64,
            ],
        )?;
        Ok(changed == 1)
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Returns the stored version of a job, if it exists.
pub fn version_of(db: &Database, id: &str) -> Result<Option<u64>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT version FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], |r| r.get::<_, i64>(0))?;
        match rows.next() {
            Some(Ok(v)) => Ok(Some(v as u64)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Lists up to `limit` jobs with `status`, oldest first, starting after `after`.
pub fn page_by_status(
    db: &Database,
    status: &str,
    after: Option<&PageCursor>,
    limit: u32,
) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let rows = match after {
            Some(cursor) => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM jobs WHERE status = ?1
                     AND (created_at > ?2 OR (created_at = ?2 AND id > ?3))
                     ORDER BY created_at ASC, id ASC LIMIT ?4",
                )?;
                let rows = stmt
                    .query_map(
                        params![status, cursor.created_at, cursor.id, limit],
                        JobRow::from_row,
                    )?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM jobs WHERE status = ?1
                     ORDER BY created_at ASC, id ASC LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(params![status, limit], JobRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(rows)
    })
}

/// Counts jobs with the given status.
pub fn count_by_status(db: &Database, status: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            params![status],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
