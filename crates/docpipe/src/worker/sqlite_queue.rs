//! Durable work queue on the `work_queue` table.

use std::time::Duration;

use chrono::Utc;

use super::queue::{Delivery, QueueError, QueueSettings, WorkQueue};
use crate::db::{queue_repo, Database};

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[derive(Clone)]
pub struct SqliteQueue {
    db: Database,
    settings: QueueSettings,
}

impl SqliteQueue {
    pub fn new(db: Database, settings: QueueSettings) -> Self {
        Self { db, settings }
    }

    /// Returns (live, dead-lettered) message counts.
    pub fn counts(&self) -> Result<(u64, u64), QueueError> {
        Ok(queue_repo::counts(&self.db)?)
    }

    /// Job ids of dead-lettered messages.
    pub fn dead_letters(&self) -> Result<Vec<String>, QueueError> {
        Ok(queue_repo::list_dead(&self.db)?
            .into_iter()
            .map(|row| row.job_id)
            .collect())
    }
}

impl WorkQueue for SqliteQueue {
    fn enqueue(&self, job_id: &str, delay: Duration, attempt: u32) -> Result<(), QueueError> {
        let visible_at = now_millis().saturating_add(millis(delay));
        let id = queue_repo::enqueue(&self.db, job_id, attempt, visible_at, &Utc::now().to_rfc3339())?;
        log::debug!("Enqueued job {} (message {}, attempt {})", job_id, id, attempt);
        Ok(())
    }

    fn dequeue(&self) -> Result<Option<Delivery>, QueueError> {
        let receipt = uuid::Uuid::new_v4().to_string();
        let row = queue_repo::claim_next(
            &self.db,
            now_millis(),
            millis(self.settings.visibility_timeout),
            self.settings.max_deliveries,
            &receipt,
        )?;
        Ok(row.map(|row| Delivery {
            receipt,
            job_id: row.job_id,
            attempt: row.attempt,
            deliveries: row.deliveries,
        }))
    }

    fn ack(&self, receipt: &str) -> Result<(), QueueError> {
        if queue_repo::ack(&self.db, receipt)? {
            Ok(())
        } else {
            Err(QueueError::ClaimLost(receipt.to_string()))
        }
    }

    fn renew(&self, receipt: &str) -> Result<(), QueueError> {
        let visible_at = now_millis().saturating_add(millis(self.settings.visibility_timeout));
        if queue_repo::extend(&self.db, receipt, visible_at)? {
            Ok(())
        } else {
            Err(QueueError::ClaimLost(receipt.to_string()))
        }
    }

    fn release(
        &self,
        receipt: &str,
        delay: Duration,
        reason: Option<&str>,
    ) -> Result<(), QueueError> {
        let visible_at = now_millis().saturating_add(millis(delay));
        if queue_repo::release(&self.db, receipt, visible_at, reason)? {
            Ok(())
        } else {
            Err(QueueError::ClaimLost(receipt.to_string()))
        }
    }
}
