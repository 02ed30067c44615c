//! Client-side view of a progress stream.
//!
//! Turns raw transport chunks into typed [`StreamEvent`]s and keeps the
//! aggregated state a UI needs: current stage, bounded log, errors, memory
//! samples and the final result.

use std::collections::VecDeque;
use std::io::{self, Read};

use serde::Serialize;

use super::decoder::FrameDecoder;
use super::frame::{ErrorFrame, ProgressFrame, ResultFrame, StreamFrame};
use crate::job::progress::STAGE_MEMORY;

/// Default number of log lines the consumer keeps.
pub const DEFAULT_CONSUMER_LOG_CAPACITY: usize = 200;

/// A memory-usage report routed out of the progress frames.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemorySample {
    pub message: String,
    /// First number found in the message, if any.
    pub value: Option<f64>,
}

impl MemorySample {
    fn from_message(message: &str) -> Self {
        let value = message
            .split(|c: char| !(c.is_ascii_digit() || c == '.'))
            .find_map(|token| token.parse::<f64>().ok());
        Self {
            message: message.to_string(),
            value,
        }
    }
}

/// Typed event produced from one decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Progress(ProgressFrame),
    Memory(MemorySample),
    Error(ErrorFrame),
    Result(ResultFrame),
}

/// Aggregated state of the stream so far.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerState {
    pub stage: String,
    pub message: String,
    pub progress: f64,
    pub log: VecDeque<String>,
    pub errors: Vec<ErrorFrame>,
    pub memory: VecDeque<MemorySample>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultFrame>,
    pub completed: bool,
}

pub struct StreamConsumer {
    decoder: FrameDecoder,
    state: ConsumerState,
    log_capacity: usize,
}

impl Default for StreamConsumer {
    fn default() -> Self {
        Self::new(
            DEFAULT_CONSUMER_LOG_CAPACITY,
            super::decoder::DEFAULT_MAX_FRAME_BYTES,
        )
    }
}

impl StreamConsumer {
    pub fn new(log_capacity: usize, max_frame_bytes: usize) -> Self {
        Self {
            decoder: FrameDecoder::new(max_frame_bytes),
            state: ConsumerState::default(),
            log_capacity: log_capacity.max(1),
        }
    }

    pub fn state(&self) -> &ConsumerState {
        &self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state.completed
    }

    /// Feeds one transport chunk and returns the events it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let values = self.decoder.push(chunk);
        let mut events = Vec::new();
        for value in values {
            if let Some(frame) = StreamFrame::from_value(value) {
                self.dispatch(frame, &mut events);
            }
        }
        events
    }

    /// Signals end of stream, flushing a trailing complete object if any.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if let Some(frame) = self.decoder.finish().and_then(StreamFrame::from_value) {
            self.dispatch(frame, &mut events);
        }
        events
    }

    fn push_log(&mut self, line: String) {
        while self.state.log.len() >= self.log_capacity {
            self.state.log.pop_front();
        }
        self.state.log.push_back(line);
    }

    fn dispatch(&mut self, frame: StreamFrame, events: &mut Vec<StreamEvent>) {
        match frame {
            StreamFrame::Progress(progress) => {
                self.state.stage = progress.stage.clone();
                self.state.message = progress.message.clone();
                self.state.progress = progress.progress;
                self.push_log(format!("[{}] {}", progress.stage, progress.message));

                let memory = (progress.stage == STAGE_MEMORY)
                    .then(|| MemorySample::from_message(&progress.message));
                events.push(StreamEvent::Progress(progress));

                if let Some(sample) = memory {
                    while self.state.memory.len() >= self.log_capacity {
                        self.state.memory.pop_front();
                    }
                    self.state.memory.push_back(sample.clone());
                    events.push(StreamEvent::Memory(sample));
                }
            }
            StreamFrame::Error(error) => {
                self.push_log(format!("[error] {}", error.message));
                self.state.errors.push(error.clone());
                events.push(StreamEvent::Error(error));
            }
            StreamFrame::Result(result) => {
                self.push_log(format!(
                    "[result] {}",
                    if result.success { "success" } else { "failure" }
                ));
                self.state.result = Some(result.clone());
                self.state.completed = true;
                events.push(StreamEvent::Result(result));
            }
        }
    }

    /// Consumes a reader, yielding events as chunks arrive.
    pub fn events<R: Read>(self, reader: R) -> StreamEvents<R> {
        StreamEvents {
            consumer: self,
            reader,
            pending: VecDeque::new(),
            buf: vec![0u8; 8 * 1024],
            done: false,
        }
    }
}

/// Iterator over the events of a byte stream.
pub struct StreamEvents<R: Read> {
    consumer: StreamConsumer,
    reader: R,
    pending: VecDeque<StreamEvent>,
    buf: Vec<u8>,
    done: bool,
}

impl<R: Read> StreamEvents<R> {
    pub fn consumer(&self) -> &StreamConsumer {
        &self.consumer
    }
}

impl<R: Read> Iterator for StreamEvents<R> {
    type Item = io::Result<StreamEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            if self.done {
                return None;
            }
            match self.reader.read(&mut self.buf) {
                Ok(0) => {
                    self.done = true;
                    self.pending.extend(self.consumer.finish());
                }
                Ok(n) => {
                    let events = self.consumer.feed(&self.buf[..n]);
                    self.pending.extend(events);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_updates_state_and_log() {
        let mut consumer = StreamConsumer::new(2, 1024);
        let events = consumer.feed(
            br#"{"type":"progress","stage":"downloading","message":"a","progress":5}{"type":"progress","stage":"extracting","message":"b","progress":15}{"type":"progress","stage":"chunking","message":"c","progress":25}"#,
        );
        assert_eq!(events.len(), 3);
        let state = consumer.state();
        assert_eq!(state.stage, "chunking");
        assert_eq!(state.progress, 25.0);
        assert_eq!(state.log.len(), 2);
        assert_eq!(state.log[0], "[extracting] b");
        assert!(!consumer.is_complete());
    }

    #[test]
    fn test_memory_frames_are_routed_to_observer() {
        let mut consumer = StreamConsumer::default();
        let events = consumer.feed(
            br#"{"type":"progress","stage":"memory","message":"resident 512.5 MB","progress":40}"#,
        );
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], StreamEvent::Progress(_)));
        match &events[1] {
            StreamEvent::Memory(sample) => assert_eq!(sample.value, Some(512.5)),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(consumer.state().memory.len(), 1);
    }

    #[test]
    fn test_errors_do_not_complete_stream() {
        let mut consumer = StreamConsumer::default();
        consumer.feed(br#"{"type":"error","message":"page 3 timed out","details":"timeout"}"#);
        assert_eq!(consumer.state().errors.len(), 1);
        assert!(!consumer.is_complete());

        consumer.feed(br#"{"type":"result","success":true,"data":{},"stats":{}}"#);
        assert!(consumer.is_complete());
        assert!(consumer.state().result.as_ref().unwrap().success);
    }

    #[test]
    fn test_events_iterator_over_reader() {
        let input: &[u8] =
            br#"{"type":"progress","stage":"processing","message":"unit 1","progress":50}junk{"type":"result","success":false}"#;
        let events: Vec<StreamEvent> = StreamConsumer::default()
            .events(input)
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], StreamEvent::Result(r) if !r.success));
    }
}
