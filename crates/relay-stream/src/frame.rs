use relay_core::config::DEFAULT_MALFORMED_FRAME_BUDGET;
use relay_core::error::{StreamError, TransportError};

use crate::wire::WireEvent;

/// Payload of the end-of-stream frame. Not a terminal event.
pub const DONE_SENTINEL: &str = "[DONE]";

pub fn encode_frame(event: &WireEvent) -> Result<String, TransportError> {
    let json = serde_json::to_string(event).map_err(|e| TransportError::Encode(e.to_string()))?;
    Ok(format!("data: {json}\n\n"))
}

pub fn done_frame() -> String {
    format!("data: {DONE_SENTINEL}\n\n")
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(WireEvent),
    Done,
}

/// Incremental decoder for `data: <json>\n\n` frames.
///
/// Chunks may split a frame anywhere, including inside a UTF-8 sequence.
/// Malformed frames are skipped until more than `budget` have been seen.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    malformed: usize,
    budget: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MALFORMED_FRAME_BUDGET)
    }
}

impl FrameDecoder {
    pub fn new(budget: usize) -> Self {
        Self {
            buf: Vec::new(),
            malformed: 0,
            budget,
        }
    }

    pub fn malformed_count(&self) -> usize {
        self.malformed
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Frame>, StreamError> {
        self.buf.extend(chunk.iter().copied().filter(|&b| b != b'\r'));

        let mut frames = Vec::new();
        while let Some(end) = find_boundary(&self.buf) {
            let raw: Vec<u8> = self.buf.drain(..end + 2).collect();
            if let Some(frame) = self.decode(&raw[..end])? {
                frames.push(frame);
            }
        }
        Ok(frames)
    }

    /// Decodes a trailing frame that was not terminated by a blank line.
    pub fn finish(&mut self) -> Result<Option<Frame>, StreamError> {
        if self.buf.iter().all(|b| b.is_ascii_whitespace()) {
            self.buf.clear();
            return Ok(None);
        }
        let raw = std::mem::take(&mut self.buf);
        self.decode(&raw)
    }

    fn decode(&mut self, raw: &[u8]) -> Result<Option<Frame>, StreamError> {
        let text = match std::str::from_utf8(raw) {
            Ok(t) => t,
            Err(e) => return self.reject(&format!("invalid utf-8: {e}")).map(|_| None),
        };

        let mut data_lines = Vec::new();
        for line in text.split('\n') {
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            if let Some(rest) = line.strip_prefix("data:") {
                data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
            }
        }
        if data_lines.is_empty() {
            return Ok(None);
        }

        let data = data_lines.join("\n");
        if data.trim() == DONE_SENTINEL {
            return Ok(Some(Frame::Done));
        }

        match serde_json::from_str::<WireEvent>(&data) {
            Ok(event) => Ok(Some(Frame::Event(event))),
            Err(e) => self.reject(&e.to_string()).map(|_| None),
        }
    }

    fn reject(&mut self, reason: &str) -> Result<(), StreamError> {
        self.malformed += 1;
        tracing::warn!(
            malformed = self.malformed,
            budget = self.budget,
            "skipping malformed frame: {reason}"
        );
        if self.malformed > self.budget {
            return Err(StreamError::TooManyMalformedFrames {
                count: self.malformed,
                budget: self.budget,
            });
        }
        Ok(())
    }
}

fn find_boundary(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}
