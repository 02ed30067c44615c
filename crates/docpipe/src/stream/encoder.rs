//! Writes frames back-to-back onto a byte stream.

use std::io::{self, Write};

use super::frame::StreamFrame;

/// Serializes frames with no separator, flushing after each one so the
/// client sees progress as it happens.
pub struct FrameEncoder<W: Write> {
    writer: W,
    frames_written: usize,
}

impl<W: Write> FrameEncoder<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            frames_written: 0,
        }
    }

    pub fn write_frame(&mut self, frame: &StreamFrame) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, frame)?;
        self.writer.flush()?;
        self.frames_written += 1;
        Ok(())
    }

    pub fn frames_written(&self) -> usize {
        self.frames_written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Encodes a single frame into a byte vector.
pub fn encode(frame: &StreamFrame) -> Vec<u8> {
    // Serializing these frame types into memory cannot fail.
    serde_json::to_vec(frame).unwrap_or_default()
}
