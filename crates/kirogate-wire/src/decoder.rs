//! Incremental frame decoder.
//!
//! Network reads deliver arbitrary chunk boundaries: a single read may hold
//! half a prelude or several pipelined frames. [`FrameDecoder::feed`] accepts
//! whatever arrives, buffers the partial tail, and returns every complete
//! frame discovered so far.
//!
//! Recovery model:
//! - prelude CRC / bounds failure → drop one byte and retry at the next
//!   offset (a wrong `total_length` must not swallow legitimate frames)
//! - message CRC failure → the whole frame is corrupt; drop its bytes
//! - `max_errors` cumulative failures → terminal `Stopped` state
//!
//! A header block that fails to parse inside a CRC-valid frame is replaced
//! by an empty header list so the payload still reaches classification.

use bytes::BytesMut;

use crate::frame::{crc32, Frame, MAX_FRAME_LEN, MIN_FRAME_LEN, PRELUDE_LEN};
use crate::header::decode_headers;

/// Decode failures tolerated before the decoder stops.
pub const DEFAULT_MAX_ERRORS: u32 = 10;

#[derive(Debug, Clone, Copy)]
enum State {
    AwaitingPrelude,
    AwaitingData {
        total_len: usize,
        headers_len: usize,
    },
    Stopped,
}

/// Stateful decoder; one instance per upstream response. Not thread-safe.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    state: State,
    errors: u32,
    max_errors: u32,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_errors(DEFAULT_MAX_ERRORS)
    }

    pub fn with_max_errors(max_errors: u32) -> Self {
        Self {
            buf: BytesMut::with_capacity(8 * 1024),
            state: State::AwaitingPrelude,
            errors: 0,
            max_errors,
        }
    }

    /// Feed a chunk of bytes, returning every frame completed by it.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Frame> {
        if matches!(self.state, State::Stopped) {
            return Vec::new();
        }
        self.buf.extend_from_slice(data);

        let mut frames = Vec::new();
        loop {
            match self.state {
                State::Stopped => break,
                State::AwaitingPrelude => {
                    if self.buf.len() < PRELUDE_LEN {
                        break;
                    }
                    match self.parse_prelude() {
                        Some((total_len, headers_len)) => {
                            self.state = State::AwaitingData {
                                total_len,
                                headers_len,
                            };
                        }
                        None => {
                            // Resync: the prelude candidate is bogus, but a
                            // real one may start at the very next byte.
                            let _ = self.buf.split_to(1);
                            self.record_error();
                        }
                    }
                }
                State::AwaitingData {
                    total_len,
                    headers_len,
                } => {
                    if self.buf.len() < total_len {
                        break;
                    }
                    match self.take_frame(total_len, headers_len) {
                        Some(frame) => frames.push(frame),
                        None => self.record_error(),
                    }
                    if !matches!(self.state, State::Stopped) {
                        self.state = State::AwaitingPrelude;
                    }
                }
            }
        }
        frames
    }

    /// Failures seen so far (rejected preludes plus corrupt frames).
    pub fn error_count(&self) -> u32 {
        self.errors
    }

    /// True once `max_errors` failures have accumulated.
    pub fn is_stopped(&self) -> bool {
        matches!(self.state, State::Stopped)
    }

    /// Bytes currently buffered awaiting more input.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Validate the 12-byte prelude at the head of the buffer.
    fn parse_prelude(&self) -> Option<(usize, usize)> {
        let total_len = read_u32_be(&self.buf[..])?;
        let headers_len = read_u32_be(&self.buf[4..])?;
        let prelude_crc = read_u32_be(&self.buf[8..])?;

        if !(MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&total_len) {
            return None;
        }
        if headers_len > total_len - MIN_FRAME_LEN {
            return None;
        }
        if crc32(&self.buf[..8]) != prelude_crc {
            return None;
        }
        Some((total_len as usize, headers_len as usize))
    }

    /// Consume `total_len` bytes and produce the frame if its CRC holds.
    fn take_frame(&mut self, total_len: usize, headers_len: usize) -> Option<Frame> {
        let message = self.buf.split_to(total_len).freeze();
        let crc_offset = total_len - 4;

        let expected = read_u32_be(&message[crc_offset..])?;
        if crc32(&message[..crc_offset]) != expected {
            return None;
        }

        let headers_end = PRELUDE_LEN + headers_len;
        // A CRC-valid frame with a malformed header block still carries a
        // usable payload; classification will mark it Unknown.
        let headers = decode_headers(&message[PRELUDE_LEN..headers_end]).unwrap_or_default();
        let payload = message.slice(headers_end..crc_offset);

        Some(Frame { headers, payload })
    }

    fn record_error(&mut self) {
        self.errors += 1;
        if self.errors >= self.max_errors {
            self.state = State::Stopped;
            self.buf.clear();
        }
    }
}

#[inline]
fn read_u32_be(buf: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = buf.get(..4)?.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}
