//! Work-queue repository: durable job messages with visibility timeouts.
//!
//! A message is visible when `visible_at <= now` and it is not dead.
//! Claiming stamps a fresh receipt and pushes `visible_at` forward, so an
//! unacknowledged message reappears once the claim lapses.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw work-queue row.
#[derive(Debug, Clone)]
pub struct QueueRow {
    pub id: i64,
    pub job_id: String,
    pub attempt: u32,
    pub visible_at: i64,
    pub receipt: Option<String>,
    pub deliveries: u32,
    pub dead: bool,
    pub enqueued_at: String,
    pub last_error: Option<String>,
}

impl QueueRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            attempt: row.get("attempt")?,
            visible_at: row.get("visible_at")?,
            receipt: row.get("receipt")?,
            deliveries: row.get("deliveries")?,
            dead: row.get::<_, i64>("dead")? != 0,
            enqueued_at: row.get("enqueued_at")?,
            last_error: row.get("last_error")?,
        })
    }
}

/// Inserts a message that becomes visible at `visible_at` (unix millis).
pub fn enqueue(
    db: &Database,
    job_id: &str,
    attempt: u32,
    visible_at: i64,
    enqueued_at: &str,
) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO work_queue (job_id, attempt, visible_at, enqueued_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![job_id, attempt, visible_at, enqueued_at],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Claims the oldest visible message.
///
/// Messages already delivered `max_deliveries` times are moved to the
/// dead-letter state instead of being handed out again.
pub fn claim_next(
    db: &Database,
    now: i64,
    visibility_ms: i64,
    max_deliveries: u32,
    receipt: &str,
) -> Result<Option<QueueRow>, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let claimed = loop {
            let candidate = tx
                .query_row(
                    "SELECT * FROM work_queue WHERE dead = 0 AND visible_at <= ?1
                     ORDER BY visible_at ASC, id ASC LIMIT 1",
                    params![now],
                    QueueRow::from_row,
                )
                .optional()?;

            let Some(mut row) = candidate else {
                break None;
            };

            if row.deliveries >= max_deliveries {
                log::warn!(
                    "Dead-lettering queue message {} for job {} after {} deliveries",
                    row.id,
                    row.job_id,
                    row.deliveries
                );
                tx.execute(
                    "UPDATE work_queue SET dead = 1, receipt = NULL WHERE id = ?1",
                    params![row.id],
                )?;
                continue;
            }

            row.deliveries += 1;
            row.visible_at = now + visibility_ms;
            row.receipt = Some(receipt.to_string());
            tx.execute(
                "UPDATE work_queue SET receipt = ?2, visible_at = ?3, deliveries = ?4
                 WHERE id = ?1",
                params![row.id, receipt, row.visible_at, row.deliveries],
            )?;
            break Some(row);
        };
        tx.commit()?;
        Ok(claimed)
    })
}

/// Deletes the message holding `receipt`. Returns `false` if the claim was lost.
pub fn ack(db: &Database, receipt: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM work_queue WHERE receipt = ?1", params![receipt])?;
        Ok(changed == 1)
    })
}

/// Pushes the invisibility of a claimed message out to `visible_at`.
pub fn extend(db: &Database, receipt: &str, visible_at: i64) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE work_queue SET visible_at = ?2 WHERE receipt = ?1 AND dead = 0",
            params![receipt, visible_at],
        )?;
        Ok(changed == 1)
    })
}

/// Gives a claimed message back, visible again at `visible_at`.
pub fn release(
    db: &Database,
    receipt: &str,
    visible_at: i64,
    last_error: Option<&str>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE work_queue SET receipt = NULL, visible_at = ?2,
             last_error = COALESCE(?3, last_error)
             WHERE receipt = ?1",
            params![receipt, visible_at, last_error],
        )?;
        Ok(changed == 1)
    })
}

/// Returns (live, dead) message counts.
pub fn counts(db: &Database) -> Result<(u64, u64), DatabaseError> {
    db.with_conn(|conn| {
        let counts = conn.query_row(
            "SELECT COALESCE(SUM(CASE WHEN dead = 0 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN dead = 1 THEN 1 ELSE 0 END), 0)
             FROM work_queue",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        Ok(counts)
    })
}

/// Lists dead-lettered messages, oldest first.
pub fn list_dead(db: &Database) -> Result<Vec<QueueRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM work_queue WHERE dead = 1 ORDER BY id ASC")?;
        let rows = stmt
            .query_map([], QueueRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_000_000;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    /// Number of live (not dead-lettered) messages for a job.
    fn count_live_for_job(db: &Database, job_id: &str) -> Result<u64, DatabaseError> {
        db.with_conn(|conn| {
            let count: u64 = conn.query_row(
                "SELECT COUNT(*) FROM work_queue WHERE job_id = ?1 AND dead = 0",
                params![job_id],
                |r| r.get(0),
            )?;
            Ok(count)
        })
    }

    #[test]
    fn test_enqueue_and_claim() {
        let db = test_db();
        enqueue(&db, "job-1", 1, T0, "2026-01-01T00:00:00Z").unwrap();

        let row = claim_next(&db, T0, 5_000, 3, "r1").unwrap().unwrap();
        assert_eq!(row.job_id, "job-1");
        assert_eq!(row.deliveries, 1);
        assert_eq!(row.visible_at, T0 + 5_000);
        assert_eq!(row.receipt.as_deref(), Some("r1"));

        // Invisible until the claim lapses.
        assert!(claim_next(&db, T0 + 1, 5_000, 3, "r2").unwrap().is_none());
    }

    #[test]
    fn test_delayed_message_is_not_visible_early() {
        let db = test_db();
        enqueue(&db, "job-1", 1, T0 + 10_000, "2026-01-01T00:00:00Z").unwrap();
        assert!(claim_next(&db, T0, 5_000, 3, "r1").unwrap().is_none());
        assert!(claim_next(&db, T0 + 10_000, 5_000, 3, "r1").unwrap().is_some());
    }

    #[test]
    fn test_lapsed_claim_is_redelivered_and_old_receipt_is_stale() {
        let db = test_db();
        enqueue(&db, "job-1", 1, T0, "2026-01-01T00:00:00Z").unwrap();
        claim_next(&db, T0, 1_000, 5, "r1").unwrap().unwrap();

        let again = claim_next(&db, T0 + 1_000, 1_000, 5, "r2").unwrap().unwrap();
        assert_eq!(again.deliveries, 2);
        assert!(!ack(&db, "r1").unwrap());
        assert!(ack(&db, "r2").unwrap());
        assert_eq!(counts(&db).unwrap(), (0, 0));
    }

    #[test]
    fn test_extend_and_release() {
        let db = test_db();
        enqueue(&db, "job-1", 1, T0, "2026-01-01T00:00:00Z").unwrap();
        claim_next(&db, T0, 1_000, 5, "r1").unwrap().unwrap();

        assert!(extend(&db, "r1", T0 + 60_000).unwrap());
        assert!(claim_next(&db, T0 + 30_000, 1_000, 5, "r2").unwrap().is_none());

        assert!(release(&db, "r1", T0 + 100, Some("transient")).unwrap());
        assert!(!extend(&db, "r1", T0 + 60_000).unwrap());
        let row = claim_next(&db, T0 + 100, 1_000, 5, "r3").unwrap().unwrap();
        assert_eq!(row.last_error.as_deref(), Some("transient"));
    }

    #[test]
    fn test_dead_letter_after_max_deliveries() {
        let db = test_db();
        enqueue(&db, "job-1", 1, T0, "2026-01-01T00:00:00Z").unwrap();
        claim_next(&db, T0, 10, 2, "r1").unwrap().unwrap();
        claim_next(&db, T0 + 10, 10, 2, "r2").unwrap().unwrap();

        assert!(claim_next(&db, T0 + 20, 10, 2, "r3").unwrap().is_none());
        assert_eq!(counts(&db).unwrap(), (0, 1));
        let dead = list_dead(&db).unwrap();
        assert_eq!(dead.len(), 1);
        assert!(dead[0].dead);
        assert_eq!(count_live_for_job(&db, "job-1").unwrap(), 0);
    }

    #[test]
    fn test_claims_in_fifo_order() {
        let db = test_db();
        enqueue(&db, "a", 1, T0, "2026-01-01T00:00:00Z").unwrap();
        enqueue(&db, "b", 1, T0, "2026-01-01T00:00:00Z").unwrap();

        let first = claim_next(&db, T0, 1_000, 3, "r1").unwrap().unwrap();
        let second = claim_next(&db, T0, 1_000, 3, "r2").unwrap().unwrap();
        assert_eq!(first.job_id, "a");
        assert_eq!(second.job_id, "b");
        assert_eq!(count_live_for_job(&db, "a").unwrap(), 1);
    }
}
