//! Newline-delimited framing for the serial link.
//!
//! Wire format:
//! ```text
//! <utf-8 json document>\n<utf-8 json document>\n...
//! ```
//! No length prefix and no checksum.  A trailing `\r` before the `\n` is
//! stripped so devices that print with `println` on CRLF consoles still work.
//!
//! # Streaming
//!
//! A serial `read()` can return half a line or several lines at once.
//! [`LineFramer`] buffers bytes across reads and hands back every complete
//! line.  A line longer than the configured limit is discarded up to its
//! delimiter and reported as [`FrameError::TooLong`], so one runaway device
//! never grows the buffer without bound.

use thiserror::Error;

/// The delimiter between frames.
pub const DELIMITER: u8 = b'\n';

/// Default upper bound on a single frame, in bytes (excluding the delimiter).
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// A frame that could not be turned into text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The line exceeded the framer's maximum length and was dropped.
    #[error("frame exceeds {limit} bytes and was discarded")]
    TooLong { limit: usize },

    /// The line is not valid UTF-8.
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
}

/// Incremental line splitter.
#[derive(Debug)]
pub struct LineFramer {
    buf: Vec<u8>,
    max_len: usize,
    /// Set while skipping the rest of an oversized line.
    discarding: bool,
}

impl LineFramer {
    /// Creates a framer that rejects lines longer than `max_len` bytes.
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: Vec::with_capacity(1024),
            max_len,
            discarding: false,
        }
    }

    /// Appends `bytes` and returns every frame they complete, in order.
    ///
    /// Blank lines are skipped.  Bytes after the last delimiter stay buffered
    /// for the next call.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<String, FrameError>> {
        let mut out = Vec::new();

        for chunk in bytes.split_inclusive(|b| *b == DELIMITER) {
            let complete = chunk.last() == Some(&DELIMITER);
            let body = if complete {
                &chunk[..chunk.len() - 1]
            } else {
                chunk
            };

            if self.discarding {
                if complete {
                    self.discarding = false;
                }
                continue;
            }

            if self.buf.len() + body.len() > self.max_len {
                self.buf.clear();
                out.push(Err(FrameError::TooLong {
                    limit: self.max_len,
                }));
                self.discarding = !complete;
                continue;
            }

            self.buf.extend_from_slice(body);
            if complete {
                if let Some(frame) = self.take_line() {
                    out.push(frame);
                }
            }
        }

        out
    }

    /// Number of bytes waiting for a delimiter.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drops any partial line, e.g. after the port was reopened.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.discarding = false;
    }

    fn take_line(&mut self) -> Option<Result<String, FrameError>> {
        let mut line = std::mem::take(&mut self.buf);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        Some(String::from_utf8(line).map_err(|_| FrameError::InvalidUtf8))
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

/// Encodes `body` as one delimiter-terminated frame.
pub fn encode_frame(body: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(body.len() + 1);
    bytes.extend_from_slice(body.as_bytes());
    bytes.push(DELIMITER);
    bytes
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_frames(results: Vec<Result<String, FrameError>>) -> Vec<String> {
        results.into_iter().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_single_complete_line() {
        let mut framer = LineFramer::default();
        let frames = ok_frames(framer.push(b"{\"paramId\":1,\"value\":85}\n"));
        assert_eq!(frames, vec!["{\"paramId\":1,\"value\":85}"]);
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_partial_line_is_buffered_until_delimiter() {
        // Arrange
        let mut framer = LineFramer::default();

        // Act
        let first = framer.push(b"{\"paramId\":1,");
        let second = ok_frames(framer.push(b"\"value\":2}\n"));

        // Assert
        assert!(first.is_empty());
        assert_eq!(second, vec!["{\"paramId\":1,\"value\":2}"]);
    }

    #[test]
    fn test_two_lines_in_one_read_come_out_in_order() {
        let mut framer = LineFramer::default();
        let frames = ok_frames(framer.push(b"a\nb\nc"));
        assert_eq!(frames, vec!["a", "b"]);
        assert_eq!(framer.buffered(), 1);
    }

    #[test]
    fn test_crlf_is_stripped_and_blank_lines_skipped() {
        let mut framer = LineFramer::default();
        let frames = ok_frames(framer.push(b"x\r\n\r\n\n  \ny\n"));
        assert_eq!(frames, vec!["x", "y"]);
    }

    #[test]
    fn test_invalid_utf8_is_reported_and_next_line_survives() {
        let mut framer = LineFramer::default();
        let results = framer.push(b"\xff\xfe\nok\n");
        assert_eq!(results[0], Err(FrameError::InvalidUtf8));
        assert_eq!(results[1], Ok("ok".to_string()));
    }

    #[test]
    fn test_oversized_line_is_discarded_across_reads() {
        // Arrange: limit of 4 bytes
        let mut framer = LineFramer::new(4);

        // Act: 6 bytes without delimiter, then the tail plus a good line
        let first = framer.push(b"abcdef");
        let second = framer.push(b"gh\nok\n");

        // Assert: exactly one TooLong, and the following line is intact
        assert_eq!(first, vec![Err(FrameError::TooLong { limit: 4 })]);
        assert_eq!(second, vec![Ok("ok".to_string())]);
    }

    #[test]
    fn test_reset_drops_partial_line() {
        let mut framer = LineFramer::default();
        framer.push(b"half");
        framer.reset();
        assert_eq!(ok_frames(framer.push(b"whole\n")), vec!["whole"]);
    }

    #[test]
    fn test_encode_frame_appends_single_delimiter() {
        assert_eq!(encode_frame("{\"led\":1}"), b"{\"led\":1}\n".to_vec());
    }
}
