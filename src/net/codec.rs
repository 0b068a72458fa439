//! Line-oriented wire codec
//!
//! A TCP stream is a sequence of newline-terminated UTF-8 records.
//! Each record decomposes as `<tag>|<payload>` on the first separator;
//! a record with no separator is a bare chat payload. The codec is
//! stateless apart from the per-connection receive buffer.

use super::types::{MAX_RECORD_SIZE, PROTOCOL_SEPARATOR, RECORD_DELIMITER};
use thiserror::Error;

/// A decoded inbound record. `tag` is `None` when the record carried
/// no separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: Option<String>,
    pub payload: String,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("record exceeds {0} bytes without a terminator")]
    RecordTooLong(usize),
}

/// Per-connection framing state.
pub struct LineCodec {
    buf: Vec<u8>,
    max_record: usize,
    invalid_utf8_dropped: u64,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::with_max_record(MAX_RECORD_SIZE)
    }

    pub fn with_max_record(max_record: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_record,
            invalid_utf8_dropped: 0,
        }
    }

    /// Feed received bytes, returning every complete record. Partial
    /// trailing bytes stay buffered until more arrive. A record with
    /// malformed UTF-8 is dropped (counted) and decoding continues;
    /// an unterminated record past the cap is fatal for the session.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<Frame>, CodecError> {
        self.buf.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == RECORD_DELIMITER) {
            let record: Vec<u8> = self.buf.drain(..=pos).take(pos).collect();
            match String::from_utf8(record) {
                Ok(mut line) => {
                    // Carriage returns are tolerated but never part of a record
                    line.retain(|c| c != '\r');
                    if line.is_empty() {
                        continue;
                    }
                    frames.push(Self::split(line));
                }
                Err(_) => {
                    self.invalid_utf8_dropped += 1;
                }
            }
        }

        if self.buf.len() > self.max_record {
            return Err(CodecError::RecordTooLong(self.max_record));
        }
        Ok(frames)
    }

    fn split(line: String) -> Frame {
        match line.split_once(PROTOCOL_SEPARATOR) {
            Some((tag, payload)) => Frame {
                tag: Some(tag.to_string()),
                payload: payload.to_string(),
            },
            None => Frame {
                tag: None,
                payload: line,
            },
        }
    }

    pub fn invalid_utf8_dropped(&self) -> u64 {
        self.invalid_utf8_dropped
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialize an outbound record.
pub fn encode(tag: &str, payload: &str) -> String {
    format!("{tag}{PROTOCOL_SEPARATOR}{payload}\n")
}
