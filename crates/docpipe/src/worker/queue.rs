//! Work queue delivering job ids to workers.
//!
//! Delivery is at-least-once: a dequeued message stays invisible for the
//! visibility timeout and reappears unless it is acknowledged. Every
//! dequeue hands out a fresh receipt, so a worker whose claim lapsed finds
//! its receipt rejected with [`QueueError::ClaimLost`].

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::schema::QueueConfig;
use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Claim lost for receipt {0}")]
    ClaimLost(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// One delivery of a queued job id.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub receipt: String,
    pub job_id: String,
    /// Attempt number the message was enqueued for.
    pub attempt: u32,
    /// How many times this message has been handed out, this one included.
    pub deliveries: u32,
}

/// Queue timing and dead-letter limits.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSettings {
    pub visibility_timeout: Duration,
    pub max_deliveries: u32,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}

impl QueueSettings {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            visibility_timeout: Duration::from_secs(config.visibility_timeout_secs),
            max_deliveries: config.max_deliveries,
        }
    }
}

pub trait WorkQueue: Send + Sync {
    fn enqueue(&self, job_id: &str, delay: Duration, attempt: u32) -> Result<(), QueueError>;

    /// Claims the next visible message, if any.
    fn dequeue(&self) -> Result<Option<Delivery>, QueueError>;

    /// Removes a delivered message for good.
    fn ack(&self, receipt: &str) -> Result<(), QueueError>;

    /// Extends the claim by another visibility timeout.
    fn renew(&self, receipt: &str) -> Result<(), QueueError>;

    /// Gives the message back, visible again after `delay`.
    fn release(&self, receipt: &str, delay: Duration, reason: Option<&str>)
        -> Result<(), QueueError>;
}

/// A worker's claim on one delivery.
#[derive(Clone)]
pub struct Lease {
    queue: Arc<dyn WorkQueue>,
    receipt: String,
}

impl Lease {
    pub fn new(queue: Arc<dyn WorkQueue>, receipt: impl Into<String>) -> Self {
        Self {
            queue,
            receipt: receipt.into(),
        }
    }

    pub fn receipt(&self) -> &str {
        &self.receipt
    }

    pub fn renew(&self) -> Result<(), QueueError> {
        self.queue.renew(&self.receipt)
    }
}

// ─── In-memory ──────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Message {
    job_id: String,
    attempt: u32,
    visible_at: Instant,
    receipt: Option<String>,
    deliveries: u32,
}

#[derive(Default)]
struct MemoryState {
    ready: Vec<Message>,
    dead: Vec<Message>,
}

/// Process-local work queue.
pub struct MemoryQueue {
    settings: QueueSettings,
    state: Mutex<MemoryState>,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(QueueSettings::default())
    }
}

impl MemoryQueue {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Memory queue lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Messages not yet acknowledged or dead-lettered.
    pub fn len(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Job ids of dead-lettered messages.
    pub fn dead_letters(&self) -> Vec<String> {
        self.lock().dead.iter().map(|m| m.job_id.clone()).collect()
    }

    fn position(state: &MemoryState, receipt: &str) -> Result<usize, QueueError> {
        state
            .ready
            .iter()
            .position(|m| m.receipt.as_deref() == Some(receipt))
            .ok_or_else(|| QueueError::ClaimLost(receipt.to_string()))
    }
}

impl WorkQueue for MemoryQueue {
    fn enqueue(&self, job_id: &str, delay: Duration, attempt: u32) -> Result<(), QueueError> {
        self.lock().ready.push(Message {
            job_id: job_id.to_string(),
            attempt,
            visible_at: Instant::now() + delay,
            receipt: None,
            deliveries: 0,
        });
        Ok(())
    }

    fn dequeue(&self) -> Result<Option<Delivery>, QueueError> {
        let now = Instant::now();
        let mut state = self.lock();
        loop {
            let next = state
                .ready
                .iter()
                .enumerate()
                .filter(|(_, m)| m.visible_at <= now)
                .min_by_key(|(_, m)| m.visible_at)
                .map(|(i, _)| i);
            let Some(index) = next else {
                return Ok(None);
            };

            if state.ready[index].deliveries >= self.settings.max_deliveries {
                let mut message = state.ready.remove(index);
                log::warn!(
                    "Dead-lettering job {} after {} deliveries",
                    message.job_id,
                    message.deliveries
                );
                message.receipt = None;
                state.dead.push(message);
                continue;
            }

            let receipt = uuid::Uuid::new_v4().to_string();
            let message = &mut state.ready[index];
            message.deliveries += 1;
            message.visible_at = now + self.settings.visibility_timeout;
            message.receipt = Some(receipt.clone());
            return Ok(Some(Delivery {
                receipt,
                job_id: message.job_id.clone(),
                attempt: message.attempt,
                deliveries: message.deliveries,
            }));
        }
    }

    fn ack(&self, receipt: &str) -> Result<(), QueueError> {
        let mut state = self.lock();
        let index = Self::position(&state, receipt)?;
        state.ready.remove(index);
        Ok(())
    }

    fn renew(&self, receipt: &str) -> Result<(), QueueError> {
        let mut state = self.lock();
        let index = Self::position(&state, receipt)?;
        state.ready[index].visible_at = Instant::now() + self.settings.visibility_timeout;
        Ok(())
    }

    fn release(
        &self,
        receipt: &str,
        delay: Duration,
        reason: Option<&str>,
    ) -> Result<(), QueueError> {
        let mut state = self.lock();
        let index = Self::position(&state, receipt)?;
        let message = &mut state.ready[index];
        if let Some(reason) = reason {
            log::debug!("Releasing job {}: {}", message.job_id, reason);
        }
        message.receipt = None;
        message.visible_at = Instant::now() + delay;
        Ok(())
    }
}
