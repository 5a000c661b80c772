// src/core/framing.rs

//! Line framing shared by every protocol.
//!
//! `LineFramer` is the stateful accumulator used by server-side protocols: raw
//! socket chunks are appended and complete lines (or, for payload sections, a
//! fixed number of raw bytes) are taken back out. `LineCodec` exposes the same
//! framing rules as a `tokio_util::codec` pair for client-side `Framed` streams.

use crate::core::SandmailError;
use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// The line terminator written by every protocol in this crate.
pub const CRLF: &[u8] = b"\r\n";

/// Splits one complete line off the front of `buf`.
///
/// `scanned` remembers how far the buffer has already been searched for a
/// terminator so that a long partial line is not rescanned on every append.
fn take_line(buf: &mut BytesMut, scanned: &mut usize) -> Option<Bytes> {
    let start = (*scanned).min(buf.len());
    match buf[start..].iter().position(|&b| b == b'\n') {
        Some(offset) => {
            let newline = start + offset;
            *scanned = 0;
            let mut line = buf.split_to(newline + 1);
            line.truncate(newline);
            if line.last() == Some(&b'\r') {
                line.truncate(newline - 1);
            }
            Some(line.freeze())
        }
        None => {
            *scanned = buf.len();
            None
        }
    }
}

/// Accumulates a byte stream and yields LF (or CRLF) terminated lines.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: BytesMut,
    scanned: usize,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk received from the socket.
    pub fn append(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Takes the next complete line, without its terminator.
    pub fn try_take_line(&mut self) -> Option<Bytes> {
        take_line(&mut self.buffer, &mut self.scanned)
    }

    /// Takes exactly `len` raw bytes once that many are buffered.
    pub fn try_take_bytes(&mut self, len: usize) -> Option<Bytes> {
        if self.buffer.len() < len {
            return None;
        }
        self.scanned = 0;
        Some(self.buffer.split_to(len).freeze())
    }

    /// Number of bytes held that have not been taken yet.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drops any buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
    }
}

/// A `tokio_util::codec` implementation of the same line framing, producing
/// UTF-8 strings.
#[derive(Debug, Default)]
pub struct LineCodec {
    scanned: usize,
    max_length: Option<usize>,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects lines longer than `max_length` bytes.
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            scanned: 0,
            max_length: Some(max_length),
        }
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = SandmailError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match take_line(src, &mut self.scanned) {
            Some(line) => Ok(Some(String::from_utf8(line.to_vec())?)),
            None => {
                if let Some(max) = self.max_length
                    && src.len() > max
                {
                    return Err(SandmailError::InvalidRequest(format!(
                        "line exceeds {max} bytes"
                    )));
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<String> for LineCodec {
    type Error = SandmailError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len() + CRLF.len());
        dst.put_slice(item.as_bytes());
        dst.put_slice(CRLF);
        Ok(())
    }
}
