//! Frame type and encoder.
//!
//! Wire layout, all integers big-endian:
//!
//! ```text
//! [u32 total_length][u32 headers_length][u32 prelude_crc]
//! [headers block][payload]
//! [u32 message_crc]
//! ```
//!
//! `prelude_crc` covers the first 8 bytes; `message_crc` covers everything
//! from the first byte through the end of the payload.

use bytes::{BufMut, Bytes};

use crate::header::{encode_headers, Header, HeaderValue};

/// Prelude size: two lengths plus the prelude CRC.
pub const PRELUDE_LEN: usize = 12;

/// Fixed overhead of an empty frame: prelude plus the trailing message CRC.
pub const MIN_FRAME_LEN: u32 = 16;

/// Upper bound on a single frame.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// IEEE CRC32 over a byte range.
#[inline]
pub fn crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// A decoded frame: ordered typed headers plus an opaque payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub headers: Vec<Header>,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(headers: Vec<Header>, payload: Bytes) -> Self {
        Self { headers, payload }
    }

    /// Look up a header value by name (first match wins).
    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers
            .iter()
            .find(|h| h.name == name)
            .map(|h| &h.value)
    }

    /// Look up a string-typed header value by name.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.header(name).and_then(HeaderValue::as_str)
    }
}

/// Encode a frame to its wire representation.
pub fn encode_frame(headers: &[Header], payload: &[u8]) -> Vec<u8> {
    let headers_block = encode_headers(headers);
    let total_len = PRELUDE_LEN + headers_block.len() + payload.len() + 4;

    let mut out = Vec::with_capacity(total_len);
    out.put_u32(total_len as u32);
    out.put_u32(headers_block.len() as u32);
    out.put_u32(crc32(&out[..8]));
    out.put_slice(&headers_block);
    out.put_slice(payload);
    out.put_u32(crc32(&out));
    out
}
