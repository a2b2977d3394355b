//! Binary framing for crossing the runtime boundary.
//!
//! A frame is a one-byte format version followed by a single tagged value:
//!
//! ```text
//! frame  := VERSION value
//! value  := 0x00                                  null
//!         | 0x01 | 0x02                           false | true
//!         | 0x03 i64-le                           int
//!         | 0x04 f64-bits-le                      float
//!         | 0x05 u32-le-len utf8                  string
//!         | 0x06 u32-le-len raw                   bytes
//!         | 0x07 u32-le-count value*              list
//!         | 0x08 u32-le-count (string value)*     map
//! ```
//!
//! Floats travel as raw IEEE-754 bits so every value (including NaN payloads and `-0.0`)
//! comes back bit-identical. Map keys must be unique within a frame. Nesting depth is
//! bounded so a hostile frame cannot exhaust the coroutine stack.

use crate::value::{BoundaryMap, BoundaryValue};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

/// Current frame format version
pub const FRAME_VERSION: u8 = 1;

/// Maximum container nesting accepted by [`decode`]
pub const MAX_DEPTH: usize = 128;

const TAG_NULL: u8 = 0x00;
const TAG_FALSE: u8 = 0x01;
const TAG_TRUE: u8 = 0x02;
const TAG_INT: u8 = 0x03;
const TAG_FLOAT: u8 = 0x04;
const TAG_STR: u8 = 0x05;
const TAG_BYTES: u8 = 0x06;
const TAG_LIST: u8 = 0x07;
const TAG_MAP: u8 = 0x08;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Frame ended before the value was complete
    UnexpectedEof { needed: usize, remaining: usize },
    UnsupportedVersion(u8),
    UnknownTag(u8),
    InvalidUtf8,
    DuplicateKey(String),
    DepthExceeded,
    /// A string, byte string or container is longer than a u32 length prefix allows
    LengthOverflow(usize),
    TrailingBytes(usize),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::UnexpectedEof { needed, remaining } => write!(
                f,
                "frame truncated: needed {needed} bytes, {remaining} remaining"
            ),
            CodecError::UnsupportedVersion(v) => write!(f, "unsupported frame version {v}"),
            CodecError::UnknownTag(t) => write!(f, "unknown value tag 0x{t:02x}"),
            CodecError::InvalidUtf8 => write!(f, "string payload is not valid UTF-8"),
            CodecError::DuplicateKey(k) => write!(f, "duplicate map key '{k}'"),
            CodecError::DepthExceeded => {
                write!(f, "nesting deeper than {MAX_DEPTH} levels")
            }
            CodecError::LengthOverflow(len) => {
                write!(f, "length {len} does not fit in a frame length prefix")
            }
            CodecError::TrailingBytes(n) => write!(f, "{n} trailing bytes after value"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Encode a value into a versioned frame.
pub fn encode(value: &BoundaryValue) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::with_capacity(64);
    buf.put_u8(FRAME_VERSION);
    encode_into(value, &mut buf, 0)?;
    Ok(buf.freeze())
}

/// Decode a frame produced by [`encode`].
pub fn decode(mut frame: Bytes) -> Result<BoundaryValue, CodecError> {
    need(&frame, 1)?;
    let version = frame.get_u8();
    if version != FRAME_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }
    let value = decode_value(&mut frame, 0)?;
    if frame.has_remaining() {
        return Err(CodecError::TrailingBytes(frame.remaining()));
    }
    Ok(value)
}

/// Send a value across the boundary and back.
pub fn cross(value: &BoundaryValue) -> Result<BoundaryValue, CodecError> {
    decode(encode(value)?)
}

fn put_len(buf: &mut BytesMut, len: usize) -> Result<(), CodecError> {
    let len = u32::try_from(len).map_err(|_| CodecError::LengthOverflow(len))?;
    buf.put_u32_le(len);
    Ok(())
}

fn encode_into(value: &BoundaryValue, buf: &mut BytesMut, depth: usize) -> Result<(), CodecError> {
    if depth > MAX_DEPTH {
        return Err(CodecError::DepthExceeded);
    }
    match value {
        BoundaryValue::Null => buf.put_u8(TAG_NULL),
        BoundaryValue::Bool(false) => buf.put_u8(TAG_FALSE),
        BoundaryValue::Bool(true) => buf.put_u8(TAG_TRUE),
        BoundaryValue::Int(i) => {
            buf.put_u8(TAG_INT);
            buf.put_i64_le(*i);
        }
        BoundaryValue::Float(f) => {
            buf.put_u8(TAG_FLOAT);
            buf.put_u64_le(f.to_bits());
        }
        BoundaryValue::Str(s) => {
            buf.put_u8(TAG_STR);
            put_len(buf, s.len())?;
            buf.put_slice(s.as_bytes());
        }
        BoundaryValue::Bytes(b) => {
            buf.put_u8(TAG_BYTES);
            put_len(buf, b.len())?;
            buf.put_slice(b);
        }
        BoundaryValue::List(items) => {
            buf.put_u8(TAG_LIST);
            put_len(buf, items.len())?;
            for item in items {
                encode_into(item, buf, depth + 1)?;
            }
        }
        BoundaryValue::Map(map) => {
            buf.put_u8(TAG_MAP);
            put_len(buf, map.len())?;
            for (k, v) in map.iter() {
                put_len(buf, k.len())?;
                buf.put_slice(k.as_bytes());
                encode_into(v, buf, depth + 1)?;
            }
        }
    }
    Ok(())
}

fn need(frame: &Bytes, n: usize) -> Result<(), CodecError> {
    if frame.remaining() < n {
        return Err(CodecError::UnexpectedEof {
            needed: n,
            remaining: frame.remaining(),
        });
    }
    Ok(())
}

fn take_len(frame: &mut Bytes) -> Result<usize, CodecError> {
    need(frame, 4)?;
    Ok(frame.get_u32_le() as usize)
}

fn take_str(frame: &mut Bytes) -> Result<String, CodecError> {
    let len = take_len(frame)?;
    need(frame, len)?;
    let raw = frame.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)
}

fn decode_value(frame: &mut Bytes, depth: usize) -> Result<BoundaryValue, CodecError> {
    if depth > MAX_DEPTH {
        return Err(CodecError::DepthExceeded);
    }
    need(frame, 1)?;
    let tag = frame.get_u8();
    Ok(match tag {
        TAG_NULL => BoundaryValue::Null,
        TAG_FALSE => BoundaryValue::Bool(false),
        TAG_TRUE => BoundaryValue::Bool(true),
        TAG_INT => {
            need(frame, 8)?;
            BoundaryValue::Int(frame.get_i64_le())
        }
        TAG_FLOAT => {
            need(frame, 8)?;
            BoundaryValue::Float(f64::from_bits(frame.get_u64_le()))
        }
        TAG_STR => BoundaryValue::Str(take_str(frame)?),
        TAG_BYTES => {
            let len = take_len(frame)?;
            need(frame, len)?;
            // Zero-copy: shares the frame allocation
            BoundaryValue::Bytes(frame.split_to(len))
        }
        TAG_LIST => {
            let count = take_len(frame)?;
            // Each element takes at least one byte; cap the preallocation by what is left
            let mut items = Vec::with_capacity(count.min(frame.remaining()));
            for _ in 0..count {
                items.push(decode_value(frame, depth + 1)?);
            }
            BoundaryValue::List(items)
        }
        TAG_MAP => {
            let count = take_len(frame)?;
            let mut map = BoundaryMap::with_capacity(count.min(frame.remaining() / 5));
            for _ in 0..count {
                let key = take_str(frame)?;
                let value = decode_value(frame, depth + 1)?;
                if map.contains_key(&key) {
                    return Err(CodecError::DuplicateKey(key));
                }
                map.insert(key, value);
            }
            BoundaryValue::Map(map)
        }
        other => return Err(CodecError::UnknownTag(other)),
    })
}
