//! Incremental decoder for back-to-back JSON objects.
//!
//! The wire carries objects with no delimiter and no length prefix, and the
//! transport may split them anywhere, including inside strings and escape
//! sequences. The decoder scans bytes tracking brace depth, string mode and
//! escapes; the structural characters are ASCII, so a split UTF-8 sequence
//! never confuses the scan.

use serde_json::Value;

/// Default cap on the size of a single candidate object.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Position of the scan within the retained buffer.
///
/// Survives between `push` calls so every byte is looked at once, unless a
/// malformed candidate forces a resync.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct ScanState {
    /// Next byte to examine.
    pos: usize,
    /// Opening brace of the current candidate.
    open: Option<usize>,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl ScanState {
    /// Abandons the candidate opened at `open`, rescanning from the byte after it.
    fn resync(&mut self, open: usize) {
        *self = ScanState {
            pos: open + 1,
            ..ScanState::default()
        };
    }
}

/// Advances `state` over `buf`, returning the objects completed on the way.
fn scan_from(buf: &[u8], state: &mut ScanState, max_frame_bytes: usize) -> Vec<Value> {
    let mut objects = Vec::new();

    while state.pos < buf.len() {
        let c = buf[state.pos];

        let Some(open) = state.open else {
            if c == b'{' {
                state.open = Some(state.pos);
                state.depth = 1;
                state.in_string = false;
                state.escaped = false;
            }
            state.pos += 1;
            continue;
        };

        if state.pos - open >= max_frame_bytes {
            tracing::debug!("Abandoning oversized frame candidate at offset {}", open);
            state.resync(open);
            continue;
        }

        if state.escaped {
            state.escaped = false;
        } else if state.in_string {
            match c {
                b'\\' => state.escaped = true,
                b'"' => state.in_string = false,
                _ => {}
            }
        } else {
            match c {
                b'"' => state.in_string = true,
                b'{' => state.depth += 1,
                b'}' => {
                    state.depth -= 1;
                    if state.depth == 0 {
                        match serde_json::from_slice::<Value>(&buf[open..=state.pos]) {
                            Ok(value) => {
                                objects.push(value);
                                state.open = None;
                            }
                            Err(e) => {
                                tracing::debug!("Resyncing after malformed frame: {}", e);
                                state.resync(open);
                                continue;
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        state.pos += 1;
    }

    objects
}

/// Scans `buf` for complete objects in one pass.
///
/// Returns the decoded objects in order and the offset at which the
/// unconsumed remainder starts. A candidate that fails to parse, or that
/// grows past `max_frame_bytes`, is abandoned by resuming the scan one byte
/// after its opening brace.
pub fn scan(buf: &[u8], max_frame_bytes: usize) -> (Vec<Value>, usize) {
    let mut state = ScanState::default();
    let objects = scan_from(buf, &mut state, max_frame_bytes);
    (objects, state.open.unwrap_or(buf.len()))
}

/// Stateful decoder holding the unconsumed tail between calls.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    state: ScanState,
    max_frame_bytes: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl FrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            state: ScanState::default(),
            max_frame_bytes: max_frame_bytes.max(2),
        }
    }

    /// Appends a transport chunk and returns every object it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buffer.extend_from_slice(chunk);
        let objects = scan_from(&self.buffer, &mut self.state, self.max_frame_bytes);

        // Keep only the open candidate, rebasing the scan position onto it
        let consumed = self.state.open.unwrap_or(self.state.pos);
        if consumed > 0 {
            self.buffer.drain(..consumed);
            self.state.pos -= consumed;
            if let Some(ref mut open) = self.state.open {
                *open -= consumed;
            }
        }
        objects
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<Value> {
        self.push(chunk.as_bytes())
    }

    /// Bytes retained for the next call.
    pub fn remainder(&self) -> &[u8] {
        &self.buffer
    }

    /// Signals end of stream: one last attempt to parse the retained tail.
    pub fn finish(&mut self) -> Option<Value> {
        let tail = std::mem::take(&mut self.buffer);
        self.state = ScanState::default();
        let text = String::from_utf8_lossy(&tail);
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        match serde_json::from_str::<Value>(text) {
            Ok(value) if value.is_object() => Some(value),
            _ => {
                tracing::debug!("Discarding {} trailing bytes at end of stream", tail.len());
                None
            }
        }
    }
}
