//! Typed header codec.
//!
//! Each frame carries an ordered list of `(name, typed value)` pairs packed
//! into its headers block:
//!
//! ```text
//! [u8 name_len][name bytes][u8 type_code][type-specific payload]...
//! ```
//!
//! Ten value types exist on the wire; variable-length values (bytes, string)
//! carry a big-endian `u16` length prefix. A block must be consumed exactly:
//! residual bytes are a decode error.

use bytes::{Buf, BufMut, Bytes};
use uuid::Uuid;

use crate::error::{Result, WireError};

/// A single decoded header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: HeaderValue,
}

impl Header {
    pub fn new(name: impl Into<String>, value: HeaderValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// A typed header value.
///
/// Type codes 0 and 1 (bool-true / bool-false) collapse into `Bool`; the
/// encoder picks the code from the carried value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Bytes(Bytes),
    String(String),
    /// Epoch milliseconds.
    Timestamp(i64),
    Uuid(Uuid),
}

impl HeaderValue {
    /// Borrow the value as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::String(s) => Some(s),
            _ => None,
        }
    }
}

const TYPE_BOOL_TRUE: u8 = 0;
const TYPE_BOOL_FALSE: u8 = 1;
const TYPE_BYTE: u8 = 2;
const TYPE_SHORT: u8 = 3;
const TYPE_INT: u8 = 4;
const TYPE_LONG: u8 = 5;
const TYPE_BYTES: u8 = 6;
const TYPE_STRING: u8 = 7;
const TYPE_TIMESTAMP: u8 = 8;
const TYPE_UUID: u8 = 9;

/// Decode a complete headers block into an ordered header list.
///
/// The block must be consumed exactly; truncation, unknown type codes,
/// invalid UTF-8 and trailing bytes are all errors.
pub fn decode_headers(block: &[u8]) -> Result<Vec<Header>> {
    let mut buf = block;
    let mut headers = Vec::new();

    while buf.has_remaining() {
        let name_len = buf.get_u8() as usize;
        if buf.remaining() < name_len {
            return Err(WireError::TruncatedHeader("name"));
        }
        let name = std::str::from_utf8(&buf[..name_len])
            .map_err(|_| WireError::HeaderNameNotUtf8)?
            .to_owned();
        buf.advance(name_len);

        if !buf.has_remaining() {
            return Err(WireError::TruncatedHeader("type code"));
        }
        let type_code = buf.get_u8();
        let value = decode_value(&mut buf, type_code)?;

        headers.push(Header { name, value });
    }

    Ok(headers)
}

fn decode_value(buf: &mut &[u8], type_code: u8) -> Result<HeaderValue> {
    match type_code {
        TYPE_BOOL_TRUE => Ok(HeaderValue::Bool(true)),
        TYPE_BOOL_FALSE => Ok(HeaderValue::Bool(false)),
        TYPE_BYTE => {
            if buf.remaining() < 1 {
                return Err(WireError::TruncatedHeader("byte value"));
            }
            Ok(HeaderValue::Byte(buf.get_i8()))
        }
        TYPE_SHORT => {
            if buf.remaining() < 2 {
                return Err(WireError::TruncatedHeader("short value"));
            }
            Ok(HeaderValue::Short(buf.get_i16()))
        }
        TYPE_INT => {
            if buf.remaining() < 4 {
                return Err(WireError::TruncatedHeader("int value"));
            }
            Ok(HeaderValue::Int(buf.get_i32()))
        }
        TYPE_LONG => {
            if buf.remaining() < 8 {
                return Err(WireError::TruncatedHeader("long value"));
            }
            Ok(HeaderValue::Long(buf.get_i64()))
        }
        TYPE_BYTES => {
            let data = read_len_prefixed(buf)?;
            Ok(HeaderValue::Bytes(Bytes::copy_from_slice(data)))
        }
        TYPE_STRING => {
            let data = read_len_prefixed(buf)?;
            let s = std::str::from_utf8(data).map_err(|_| WireError::HeaderValueNotUtf8)?;
            Ok(HeaderValue::String(s.to_owned()))
        }
        TYPE_TIMESTAMP => {
            if buf.remaining() < 8 {
                return Err(WireError::TruncatedHeader("timestamp value"));
            }
            Ok(HeaderValue::Timestamp(buf.get_i64()))
        }
        TYPE_UUID => {
            if buf.remaining() < 16 {
                return Err(WireError::TruncatedHeader("uuid value"));
            }
            let mut raw = [0u8; 16];
            buf.copy_to_slice(&mut raw);
            Ok(HeaderValue::Uuid(Uuid::from_bytes(raw)))
        }
        other => Err(WireError::UnknownHeaderType(other)),
    }
}

fn read_len_prefixed<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8]> {
    if buf.remaining() < 2 {
        return Err(WireError::TruncatedHeader("value length"));
    }
    let len = buf.get_u16() as usize;
    let slice: &'a [u8] = *buf;
    if slice.len() < len {
        return Err(WireError::TruncatedHeader("value payload"));
    }
    let (data, rest) = slice.split_at(len);
    *buf = rest;
    Ok(data)
}

/// Encode a header list into a headers block.
pub fn encode_headers(headers: &[Header]) -> Vec<u8> {
    let mut out = Vec::new();
    for header in headers {
        out.put_u8(header.name.len() as u8);
        out.put_slice(header.name.as_bytes());
        match &header.value {
            HeaderValue::Bool(true) => out.put_u8(TYPE_BOOL_TRUE),
            HeaderValue::Bool(false) => out.put_u8(TYPE_BOOL_FALSE),
            HeaderValue::Byte(v) => {
                out.put_u8(TYPE_BYTE);
                out.put_i8(*v);
            }
            HeaderValue::Short(v) => {
                out.put_u8(TYPE_SHORT);
                out.put_i16(*v);
            }
            HeaderValue::Int(v) => {
                out.put_u8(TYPE_INT);
                out.put_i32(*v);
            }
            HeaderValue::Long(v) => {
                out.put_u8(TYPE_LONG);
                out.put_i64(*v);
            }
            HeaderValue::Bytes(v) => {
                out.put_u8(TYPE_BYTES);
                out.put_u16(v.len() as u16);
                out.put_slice(v);
            }
            HeaderValue::String(v) => {
                out.put_u8(TYPE_STRING);
                out.put_u16(v.len() as u16);
                out.put_slice(v.as_bytes());
            }
            HeaderValue::Timestamp(v) => {
                out.put_u8(TYPE_TIMESTAMP);
                out.put_i64(*v);
            }
            HeaderValue::Uuid(v) => {
                out.put_u8(TYPE_UUID);
                out.put_slice(v.as_bytes());
            }
        }
    }
    out
}
