use std::io::Write;
use std::sync::Mutex;

use crate::broadcast::job_progress::FrameBroadcaster;
use crate::stream::{FrameEncoder, StreamFrame};

/// Sink for the frames a pipeline run emits.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, frame: StreamFrame);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _frame: StreamFrame) {}
}

/// Publishes frames of one job on a broadcast channel.
pub struct BroadcastProgress {
    job_id: String,
    broadcaster: FrameBroadcaster,
}

impl BroadcastProgress {
    pub fn new(job_id: &str, broadcaster: FrameBroadcaster) -> Self {
        Self {
            job_id: job_id.to_string(),
            broadcaster,
        }
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, frame: StreamFrame) {
        self.broadcaster.send(&self.job_id, frame);
    }
}

/// Writes frames straight onto a transport.
///
/// Write failures are logged and the frame is dropped; a broken client
/// connection never stops the run.
pub struct StreamProgress<W: Write + Send> {
    encoder: Mutex<FrameEncoder<W>>,
}

impl<W: Write + Send> StreamProgress<W> {
    pub fn new(writer: W) -> Self {
        Self {
            encoder: Mutex::new(FrameEncoder::new(writer)),
        }
    }

    pub fn into_inner(self) -> W {
        match self.encoder.into_inner() {
            Ok(encoder) => encoder.into_inner(),
            Err(poisoned) => poisoned.into_inner().into_inner(),
        }
    }
}

impl<W: Write + Send> ProgressReporter for StreamProgress<W> {
    fn report(&self, frame: StreamFrame) {
        let mut encoder = match self.encoder.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Stream progress lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        if let Err(e) = encoder.write_frame(&frame) {
            tracing::warn!("Dropping {} frame, stream write failed: {}", frame.kind(), e);
        }
    }
}

/// Keeps every frame in memory.
#[derive(Default)]
pub struct CollectingProgress {
    frames: Mutex<Vec<StreamFrame>>,
}

impl CollectingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<StreamFrame> {
        match self.frames.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ProgressReporter for CollectingProgress {
    fn report(&self, frame: StreamFrame) {
        match self.frames.lock() {
            Ok(mut guard) => guard.push(frame),
            Err(poisoned) => poisoned.into_inner().push(frame),
        }
    }
}
