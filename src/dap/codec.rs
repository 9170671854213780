//! Length-prefixed DAP framing.
//!
//! One frame is `Content-Length: N\r\n\r\n` followed by N bytes of JSON.
//! The decoder owns an accumulating byte buffer: callers push whatever the
//! socket produced (frames may arrive coalesced or chopped into arbitrary
//! fragments) and drain complete messages one at a time. A malformed header
//! or body advances the buffer past the offending bytes so the stream keeps
//! making forward progress.

use super::types::Message;
use crate::{Error, Result};

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

pub fn encode_frame(msg: &Message) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(msg)?;
    let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    frame.extend_from_slice(&body);
    Ok(frame)
}

#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Try to extract the next complete message.
    ///
    /// Returns `Ok(None)` when more bytes are needed. On a malformed frame
    /// the buffer is left at the byte after the bad header block (or body)
    /// and the error is surfaced.
    pub fn next_message(&mut self) -> Result<Option<Message>> {
        let Some(header_end) = find_subsequence(&self.buf, HEADER_TERMINATOR) else {
            return Ok(None);
        };

        let content_length = match parse_content_length(&self.buf[..header_end]) {
            Ok(len) => len,
            Err(e) => {
                // Skip the unusable header block entirely.
                self.buf.drain(..header_end + HEADER_TERMINATOR.len());
                return Err(e);
            }
        };

        let body_start = header_end + HEADER_TERMINATOR.len();
        if self.buf.len() < body_start + content_length {
            return Ok(None);
        }

        let body: Vec<u8> = self
            .buf
            .drain(..body_start + content_length)
            .skip(body_start)
            .collect();

        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| Error::Transport(format!("invalid DAP message body: {e}")))
    }
}

fn parse_content_length(header_block: &[u8]) -> Result<usize> {
    let text = std::str::from_utf8(header_block)
        .map_err(|_| Error::Transport("non-UTF-8 DAP header block".to_string()))?;

    text.lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case("Content-Length")
                .then_some(value)
        })
        .and_then(|value| value.trim().parse::<usize>().ok())
        .ok_or_else(|| Error::Transport("missing Content-Length header".to_string()))
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
