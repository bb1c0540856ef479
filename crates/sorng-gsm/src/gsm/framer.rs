//! Line framing for the modem's receive stream.
//!
//! The modem terminates every line with CR (usually CRLF).  LF is noise,
//! empty lines are discarded, and while a multipart command is waiting for
//! its text-entry prompt the only byte of interest is `>`.

use bytes::BytesMut;

/// Prompt byte sent by the modem when it is ready for the next part of a
/// multipart command.
pub const PROMPT: u8 = b'>';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Line(String),
    Prompt,
}

/// Splits raw receive chunks into lines.
///
/// Output is independent of how the stream was chunked: feeding
/// `b"OK\r\n"` at once or one byte at a time yields the same frames.
pub struct LineFramer {
    buffer: BytesMut,
    awaiting_prompt: bool,
    max_line_length: usize,
    overflowed: bool,
}

impl LineFramer {
    pub fn new(max_line_length: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(256),
            awaiting_prompt: false,
            max_line_length,
            overflowed: false,
        }
    }

    /// Watch for the `>` prompt instead of framing lines.
    pub fn await_prompt(&mut self) {
        self.awaiting_prompt = true;
    }

    pub fn cancel_prompt(&mut self) {
        self.awaiting_prompt = false;
    }

    pub fn is_awaiting_prompt(&self) -> bool {
        self.awaiting_prompt
    }

    /// Drop any partially received line.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.awaiting_prompt = false;
        self.overflowed = false;
    }

    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        for &byte in chunk {
            if self.awaiting_prompt {
                if byte == PROMPT {
                    self.awaiting_prompt = false;
                    frames.push(Frame::Prompt);
                }
                continue;
            }
            match byte {
                b'\n' => {}
                b'\r' => {
                    if let Some(line) = self.take_line() {
                        frames.push(Frame::Line(line));
                    }
                }
                _ => {
                    if self.buffer.len() < self.max_line_length {
                        self.buffer.extend_from_slice(&[byte]);
                    } else if !self.overflowed {
                        self.overflowed = true;
                        log::warn!(
                            "receive line exceeds {} bytes, truncating",
                            self.max_line_length
                        );
                    }
                }
            }
        }
        frames
    }

    fn take_line(&mut self) -> Option<String> {
        self.overflowed = false;
        if self.buffer.is_empty() {
            return None;
        }
        let raw = self.buffer.split();
        // Latin-1: every byte is the code point of the same value.
        Some(raw.iter().map(|&b| b as char).collect())
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new(4096)
    }
}
