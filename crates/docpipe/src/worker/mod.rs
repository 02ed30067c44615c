pub mod backoff;
pub mod job;
pub mod pool;
pub mod queue;
pub mod sqlite_queue;

pub use backoff::RetryPolicy;
pub use job::{Disposition, JobResult};
pub use pool::{WorkerPool, WorkerSettings};
pub use queue::{Delivery, Lease, MemoryQueue, QueueError, QueueSettings, WorkQueue};
pub use sqlite_queue::SqliteQueue;

// Re-export crossbeam_channel for embedders draining results
pub use crossbeam_channel;
