//! Job frame broadcaster for real-time progress streaming.

use std::io::Write;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::stream::{FrameEncoder, StreamFrame};

/// A stream frame tagged with the job that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFrame {
    pub job_id: String,
    pub frame: StreamFrame,
}

/// Broadcasts frames of every running job to all subscribers.
#[derive(Clone)]
pub struct FrameBroadcaster {
    sender: Arc<broadcast::Sender<JobFrame>>,
}

impl FrameBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a frame to all subscribers.
    pub fn send(&self, job_id: &str, frame: StreamFrame) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(JobFrame {
            job_id: job_id.to_string(),
            frame,
        });
    }

    /// Creates a new subscriber for job frames.
    pub fn subscribe(&self) -> broadcast::Receiver<JobFrame> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for FrameBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Writes the frames of one job to `writer` until its result frame.
///
/// Blocks the calling thread; must not run inside an async context.
/// Returns the number of frames written. Frames dropped because the
/// subscriber lagged are reported as an error frame on the stream.
pub fn forward_job_frames<W: Write>(
    mut rx: broadcast::Receiver<JobFrame>,
    job_id: &str,
    writer: W,
) -> std::io::Result<usize> {
    let mut encoder = FrameEncoder::new(writer);
    loop {
        match rx.blocking_recv() {
            Ok(event) if event.job_id == job_id => {
                let done = matches!(event.frame, StreamFrame::Result(_));
                encoder.write_frame(&event.frame)?;
                if done {
                    break;
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(job_id, skipped, "frame subscriber lagged");
                encoder.write_frame(&StreamFrame::error(
                    format!("{} progress frames were dropped", skipped),
                    "lagged",
                ))?;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    Ok(encoder.frames_written())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::FrameDecoder;
    use serde_json::json;

    #[test]
    fn test_broadcaster_send_receive() {
        let broadcaster = FrameBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();

        broadcaster.send("job-1", StreamFrame::progress("downloading", "Fetching", 5));

        let received = rx.try_recv().unwrap();
        assert_eq!(received.job_id, "job-1");
        assert_eq!(received.frame.kind(), "progress");
    }

    #[test]
    fn test_send_without_subscribers_is_fine() {
        let broadcaster = FrameBroadcaster::default();
        broadcaster.send("job-1", StreamFrame::error("boom", "other"));
        assert_eq!(broadcaster.receiver_count(), 0);
    }

    #[test]
    fn test_forward_filters_by_job_and_stops_at_result() {
        let broadcaster = FrameBroadcaster::new(16);
        let rx = broadcaster.subscribe();

        broadcaster.send("job-1", StreamFrame::progress("processing", "Unit 1", 40));
        broadcaster.send("job-2", StreamFrame::progress("processing", "other job", 10));
        broadcaster.send("job-1", StreamFrame::result(true, json!({}), json!({})));
        broadcaster.send("job-1", StreamFrame::progress("processing", "after", 99));

        let mut out = Vec::new();
        let written = forward_job_frames(rx, "job-1", &mut out).unwrap();
        assert_eq!(written, 2);

        let values = FrameDecoder::default().push(&out);
        assert_eq!(values.len(), 2);
        assert_eq!(values[0]["message"], "Unit 1");
        assert_eq!(values[1]["type"], "result");
    }

    #[test]
    fn test_forward_ends_when_channel_closes() {
        let broadcaster = FrameBroadcaster::new(4);
        let rx = broadcaster.subscribe();
        broadcaster.send("job-1", StreamFrame::progress("downloading", "a", 5));
        drop(broadcaster);

        let mut out = Vec::new();
        assert_eq!(forward_job_frames(rx, "job-1", &mut out).unwrap(), 1);
    }
}
