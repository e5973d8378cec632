//! Shared error type for the wire layer.
//!
//! Frame-level failures never surface as typed errors: the decoder counts
//! and recovers from them (see `decoder`). The header codec is the one
//! parser whose caller needs to know why a block was rejected.

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, WireError>;

/// Errors produced while decoding a headers block.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("truncated header block: {0}")]
    TruncatedHeader(&'static str),

    #[error("unknown header value type code: {0}")]
    UnknownHeaderType(u8),

    #[error("header name is not valid UTF-8")]
    HeaderNameNotUtf8,

    #[error("string header value is not valid UTF-8")]
    HeaderValueNotUtf8,
}
