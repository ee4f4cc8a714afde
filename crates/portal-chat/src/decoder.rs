//! Server-sent-events record framing.
//!
//! The decoder is fed raw body chunks and hands back complete `data:`
//! records. Bytes are buffered up to the next newline, so both a record and
//! a multi-byte UTF-8 character split across two network reads come out
//! whole.

/// Payload that marks the end of the stream.
pub const DONE_SENTINEL: &str = "[DONE]";

const DATA_PREFIX: &str = "data:";

/// One framed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseRecord {
    /// A `data:` payload, prefix stripped.
    Data(String),
    /// The `[DONE]` sentinel.
    Done,
}

/// Incremental line splitter for an event-stream body.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one body chunk and drain every record completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseRecord> {
        self.buffer.extend_from_slice(chunk);

        let mut records = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            if let Some(record) = parse_line(&self.buffer[start..end]) {
                records.push(record);
            }
            start = end + 1;
        }
        self.buffer.drain(..start);
        records
    }

    /// Flush a final line that was never newline-terminated.
    pub fn finish(&mut self) -> Option<SseRecord> {
        let rest = std::mem::take(&mut self.buffer);
        parse_line(&rest)
    }

    /// Number of bytes waiting for a newline.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

fn parse_line(raw: &[u8]) -> Option<SseRecord> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let line = String::from_utf8_lossy(raw);
    let payload = line.strip_prefix(DATA_PREFIX)?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);

    if payload.trim() == DONE_SENTINEL {
        return Some(SseRecord::Done);
    }
    if payload.trim().is_empty() {
        return None;
    }
    Some(SseRecord::Data(payload.to_string()))
}
