use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, error, info, warn};
use tracing::info_span;

use crate::broadcast::FrameBroadcaster;
use crate::config::Config;
use crate::error::WorkerError;
use crate::pipeline::progress::{BroadcastProgress, NoopProgress};
use crate::pipeline::{Pipeline, PipelineError, RunOutcome};
use crate::service::JobService;
use crate::worker::backoff::RetryPolicy;
use crate::worker::job::{Disposition, JobResult};
use crate::worker::queue::{Delivery, Lease, WorkQueue};

/// Knobs of a worker pool.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub worker_count: usize,
    /// Sleep between polls of an empty queue.
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
    pub log_capacity: usize,
}

impl WorkerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            worker_count: config.worker_count,
            poll_interval: Duration::from_millis(config.queue.poll_interval_ms),
            retry: RetryPolicy::from_config(&config.queue.retry),
            log_capacity: config.job.log_capacity,
        }
    }
}

/// State shared by every worker thread.
struct Shared {
    pipeline: Arc<Pipeline>,
    queue: Arc<dyn WorkQueue>,
    service: JobService,
    settings: WorkerSettings,
    broadcaster: Option<FrameBroadcaster>,
}

pub struct WorkerPool {
    result_receiver: Receiver<JobResult>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(
        pipeline: Arc<Pipeline>,
        queue: Arc<dyn WorkQueue>,
        settings: WorkerSettings,
    ) -> Result<Self, WorkerError> {
        Self::with_broadcaster(pipeline, queue, settings, None)
    }

    /// Creates a pool whose runs publish their frames on `broadcaster`.
    pub fn with_broadcaster(
        pipeline: Arc<Pipeline>,
        queue: Arc<dyn WorkQueue>,
        settings: WorkerSettings,
        broadcaster: Option<FrameBroadcaster>,
    ) -> Result<Self, WorkerError> {
        let worker_count = settings.worker_count;
        if worker_count == 0 {
            return Err(WorkerError::NoWorkers);
        }

        let (result_sender, result_receiver) = bounded::<JobResult>(worker_count * 16);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shared = Arc::new(Shared {
            service: JobService::new(
                Arc::clone(pipeline.store()),
                Arc::clone(&queue),
                settings.log_capacity,
            ),
            pipeline,
            queue,
            settings,
            broadcaster,
        });

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let result_tx = result_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_shared = Arc::clone(&shared);

            let spawned = thread::Builder::new()
                .name(format!("docpipe-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(worker_id, result_tx, shutdown_flag, worker_shared);
                });

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    shutdown.store(true, Ordering::Relaxed);
                    return Err(WorkerError::SpawnFailed(e.to_string()));
                }
            }
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            result_receiver,
            workers,
            shutdown,
        })
    }

    pub fn try_recv_result(&self) -> Option<JobResult> {
        self.result_receiver.try_recv().ok()
    }

    pub fn recv_result(&self) -> Option<JobResult> {
        self.result_receiver.recv().ok()
    }

    pub fn recv_result_timeout(&self, timeout: Duration) -> Option<JobResult> {
        self.result_receiver.recv_timeout(timeout).ok()
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Stops the workers after their current delivery and joins them.
    pub fn wait(self) {
        self.shutdown.store(true, Ordering::Relaxed);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn run_worker(
    worker_id: usize,
    result_sender: Sender<JobResult>,
    shutdown: Arc<AtomicBool>,
    shared: Arc<Shared>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        let delivery = match shared.queue.dequeue() {
            Ok(Some(delivery)) => delivery,
            Ok(None) => {
                thread::sleep(shared.settings.poll_interval);
                continue;
            }
            Err(e) => {
                warn!("Worker {} failed to poll the queue: {}", worker_id, e);
                thread::sleep(shared.settings.poll_interval);
                continue;
            }
        };

        debug!(
            "Worker {} processing job {} (delivery {})",
            worker_id, delivery.job_id, delivery.deliveries
        );
        let result = process_delivery(&shared, delivery);

        match result_sender.try_send(result) {
            Ok(()) => {}
            Err(TrySendError::Full(result)) => {
                debug!("Result channel full, dropping result for {}", result.job_id);
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("Worker {} result channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

/// Runs one delivery and settles it with the queue.
fn process_delivery(shared: &Shared, delivery: Delivery) -> JobResult {
    let _span = info_span!("delivery",
        job_id = %delivery.job_id,
        deliveries = delivery.deliveries,
    )
    .entered();

    let lease = Lease::new(Arc::clone(&shared.queue), delivery.receipt.clone());
    let outcome = match shared.broadcaster {
        Some(ref broadcaster) => {
            let progress = BroadcastProgress::new(&delivery.job_id, broadcaster.clone());
            shared.pipeline.run(&delivery.job_id, &progress, Some(lease))
        }
        None => shared
            .pipeline
            .run(&delivery.job_id, &NoopProgress, Some(lease)),
    };

    match outcome {
        Ok(RunOutcome::Skipped { job_id, status }) => {
            // Duplicate delivery of a job that is already settled
            ack(shared, &delivery);
            JobResult::skipped(job_id, status)
        }
        Ok(RunOutcome::Finished(summary)) => {
            ack(shared, &delivery);
            let retry = &shared.settings.retry;
            if !summary.is_resumable() || !retry.should_retry(summary.attempt) {
                return JobResult::finished(summary, Disposition::Acked);
            }

            let delay = retry.delay_for_attempt(summary.attempt);
            match shared.service.resume(&summary.job_id, delay) {
                Ok(receipt) => {
                    if let Some(warning) = receipt.warning {
                        warn!("{}", warning);
                    }
                    info!(
                        "Job {} will resume in {:?} (attempt {})",
                        summary.job_id,
                        delay,
                        receipt.record.attempt
                    );
                    JobResult::finished(summary, Disposition::Resumed { delay })
                }
                Err(e) => {
                    warn!("Could not resume job {}: {}", summary.job_id, e);
                    let mut result = JobResult::finished(summary, Disposition::Acked);
                    result.error = Some(e.to_string());
                    result
                }
            }
        }
        Err(e) if e.is_abandoned() => {
            JobResult::failure(&delivery.job_id, Disposition::Abandoned, e.to_string())
        }
        Err(PipelineError::JobNotFound(id)) => {
            warn!("Dropping delivery for unknown job {}", id);
            ack(shared, &delivery);
            JobResult::failure(
                &delivery.job_id,
                Disposition::Acked,
                format!("Job not found: {}", id),
            )
        }
        Err(e) => {
            let delay = shared.settings.retry.delay_for_attempt(delivery.deliveries);
            let reason = e.to_string();
            if let Err(release_err) = shared
                .queue
                .release(&delivery.receipt, delay, Some(&reason))
            {
                warn!(
                    "Failed to release delivery of job {}: {}",
                    delivery.job_id, release_err
                );
            }
            JobResult::failure(&delivery.job_id, Disposition::Released { delay }, reason)
        }
    }
}

fn ack(shared: &Shared, delivery: &Delivery) {
    if let Err(e) = shared.queue.ack(&delivery.receipt) {
        warn!("Failed to ack delivery of job {}: {}", delivery.job_id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{JobStore, MemoryJobStore};
    use crate::job::{ChunkedOptions, JobStatus, PipelineOptions};
    use crate::pipeline::{
        ArtifactMerger, CollaboratorError, Collaborators, DocumentFetcher, PipelineConfig,
        TransformError, Unit, UnitSplitter, UnitTransformer,
    };
    use crate::worker::queue::MemoryQueue;
    use crate::stream::StreamFrame;

    struct Echo;

    impl DocumentFetcher for Echo {
        fn fetch(&self, source: &str) -> Result<Vec<u8>, CollaboratorError> {
            Ok(source.as_bytes().to_vec())
        }
    }

    impl UnitSplitter for Echo {
        fn split(
            &self,
            document: &[u8],
            options: &PipelineOptions,
        ) -> Result<Vec<Unit>, CollaboratorError> {
            Ok(document
                .chunks(4)
                .enumerate()
                .map(|(i, c)| Unit::new(i, options.unit_kind(), c.to_vec()))
                .collect())
        }
    }

    impl UnitTransformer for Echo {
        fn transform(
            &self,
            unit: &Unit,
            _options: &PipelineOptions,
            _timeout: Duration,
        ) -> Result<String, TransformError> {
            Ok(String::from_utf8_lossy(&unit.content).to_string())
        }
    }

    impl ArtifactMerger for Echo {
        fn merge(&self, _job_id: &str, artifacts: &[String]) -> Result<String, CollaboratorError> {
            Ok(artifacts.concat())
        }
    }

    fn settings(worker_count: usize) -> WorkerSettings {
        WorkerSettings {
            worker_count,
            poll_interval: Duration::from_millis(10),
            retry: RetryPolicy::no_retry(),
            log_capacity: 10,
        }
    }

    fn pipeline(store: Arc<MemoryJobStore>) -> Arc<Pipeline> {
        let echo = Arc::new(Echo);
        let collaborators = Collaborators {
            fetcher: echo.clone(),
            splitter: echo.clone(),
            transformer: echo.clone(),
            merger: echo,
        };
        Arc::new(Pipeline::new(
            Arc::new(PipelineConfig::default()),
            store,
            collaborators,
        ))
    }

    fn chunked() -> PipelineOptions {
        PipelineOptions::Chunked(ChunkedOptions {
            model: "m".to_string(),
            chunk_size: 4,
            chunk_overlap: 0,
            instructions: None,
        })
    }

    #[test]
    fn test_worker_pool_creation() {
        let store = Arc::new(MemoryJobStore::new());
        let queue = Arc::new(MemoryQueue::default());
        let pool = WorkerPool::new(pipeline(store), queue, settings(2)).unwrap();

        assert!(!pool.is_shutdown());

        pool.shutdown();
        assert!(pool.is_shutdown());

        pool.wait();
    }

    #[test]
    fn test_zero_workers_rejected() {
        let store = Arc::new(MemoryJobStore::new());
        let queue = Arc::new(MemoryQueue::default());
        assert!(matches!(
            WorkerPool::new(pipeline(store), queue, settings(0)),
            Err(WorkerError::NoWorkers)
        ));
    }

    #[test]
    fn test_processes_submitted_job() {
        let store = Arc::new(MemoryJobStore::new());
        let queue = Arc::new(MemoryQueue::default());
        let service = JobService::new(store.clone(), queue.clone(), 10);
        let broadcaster = FrameBroadcaster::new(64);
        let mut rx = broadcaster.subscribe();
        let pool = WorkerPool::with_broadcaster(
            pipeline(store.clone()),
            queue.clone(),
            settings(2),
            Some(broadcaster),
        )
        .unwrap();

        let id = service.submit("hello world!", chunked()).unwrap().record.id;

        let result = pool.recv_result_timeout(Duration::from_secs(10)).unwrap();
        assert!(result.success(), "Job failed: {:?}", result.error);
        assert_eq!(result.disposition, Disposition::Acked);
        assert_eq!(result.job_id, id);

        let record = store.load(&id).unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.final_output_key.as_deref(), Some("hello world!"));
        assert!(queue.is_empty());

        let mut last = None;
        while let Ok(frame) = rx.try_recv() {
            last = Some(frame.frame);
        }
        assert!(matches!(last, Some(StreamFrame::Result(r)) if r.success));

        pool.shutdown();
        pool.wait();
    }

    #[test]
    fn test_unknown_job_is_acked() {
        let store = Arc::new(MemoryJobStore::new());
        let queue = Arc::new(MemoryQueue::default());
        queue.enqueue("ghost", Duration::ZERO, 1).unwrap();
        let pool = WorkerPool::new(pipeline(store), queue.clone(), settings(1)).unwrap();

        let result = pool.recv_result_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(result.disposition, Disposition::Acked);
        assert!(result.error.is_some());
        assert!(queue.is_empty());

        pool.wait();
    }
}
