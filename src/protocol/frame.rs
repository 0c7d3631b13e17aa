//! Frame decoder for the blank-line delimited request stream.
//!
//! Bytes arrive from the socket in arbitrary chunks. The decoder keeps the
//! unterminated tail between reads and hands out every complete frame, in
//! arrival order, without the delimiter.
//!
//! Payloads are single-line JSON, so a raw blank line can only appear as a
//! frame boundary. A client that embeds one anyway gets two malformed
//! frames; nothing is escaped or truncated here.

use bytes::{Bytes, BytesMut};

use super::DELIMITER;
use crate::error::FrameError;

/// Default upper bound on the unterminated tail (1 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// One complete, delimiter-stripped protocol unit.
pub type Frame = Bytes;

/// Accumulates raw bytes and splits them into frames.
///
/// A frame longer than `max_frame_bytes` is an overflow whether it arrives
/// in one read or many; the decoder stops producing frames at that point.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    /// Bytes at the front of `buffer` already known to hold no delimiter.
    scanned: usize,
    max_frame_bytes: usize,
    overflowed: bool,
}

impl FrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            scanned: 0,
            max_frame_bytes,
            overflowed: false,
        }
    }

    /// Append `data` and return every frame it completes, up to the first
    /// oversized one.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Frame> {
        if self.overflowed {
            return Vec::new();
        }
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(pos) = find_delimiter(&self.buffer, self.scanned) {
            if pos > self.max_frame_bytes {
                self.overflowed = true;
                return frames;
            }
            let frame = self.buffer.split_to(pos).freeze();
            let _ = self.buffer.split_to(DELIMITER.len());
            self.scanned = 0;
            frames.push(frame);
        }

        // A delimiter may straddle the next read, so rescan the last byte.
        self.scanned = self.buffer.len().saturating_sub(DELIMITER.len() - 1);
        frames
    }

    /// Fail once a frame is known to exceed the limit: either a complete
    /// one was too long, or the unterminated tail already is.
    pub fn check_limit(&self) -> Result<(), FrameError> {
        // A trailing newline may be the first half of the delimiter.
        let tail = self.buffer.len() - usize::from(self.buffer.ends_with(&DELIMITER[..1]));
        if self.overflowed || tail > self.max_frame_bytes {
            return Err(FrameError::TooLarge {
                limit: self.max_frame_bytes,
            });
        }
        Ok(())
    }

    /// Bytes held back waiting for a delimiter.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

/// Find the delimiter at or after `from`, returning its start.
fn find_delimiter(buffer: &[u8], from: usize) -> Option<usize> {
    buffer
        .get(from..)?
        .windows(DELIMITER.len())
        .position(|w| w == DELIMITER)
        .map(|pos| from + pos)
}
