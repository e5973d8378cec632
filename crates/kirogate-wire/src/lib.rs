//! Binary event-stream layer for the Kiro upstream.
//!
//! The upstream streams responses as length-prefixed, CRC-validated binary
//! frames carrying typed headers and a JSON payload. This crate owns the
//! wire-level pipeline:
//!
//! - [`decoder::FrameDecoder`] — incremental, resyncable frame extraction
//!   from arbitrary byte chunks
//! - [`header`] — the 10-type TLV header codec
//! - [`event`] — classification of decoded frames into typed events
//!
//! Parsing rules (shared with the rest of the workspace):
//! - Never index into untrusted input without a length check.
//! - Never `unwrap()` / `expect()` / `panic!()` outside tests.

pub mod decoder;
pub mod error;
pub mod event;
pub mod frame;
pub mod header;

pub use decoder::FrameDecoder;
pub use error::WireError;
pub use event::{classify, Event};
pub use frame::{encode_frame, Frame};
pub use header::{decode_headers, encode_headers, Header, HeaderValue};
