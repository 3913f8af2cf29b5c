//! Network byte order codec for message payloads
//!
//! A [`Writer`] appends typed fields to a payload bounded by [`MAX_BODY_LEN`];
//! a [`Reader`] consumes them again from a cursor. Every operation reports
//! failure explicitly:
//! - a write that would overflow the body is rejected and leaves the write
//!   position where it was
//! - a read past the written length is rejected and leaves the read cursor
//!   where it was, so a caller can never mistake stale data for a decoded value
//!
//! Floats travel as their IEEE-754 bit pattern in big-endian order. Strings are
//! a `u16` byte length followed by UTF-8 bytes, capped at [`MAX_STR_LEN`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Largest payload an envelope may carry
pub const MAX_BODY_LEN: usize = 2000;

/// Largest string field, in bytes
pub const MAX_STR_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("write of {needed} bytes overflows payload ({written}/{MAX_BODY_LEN} used)")]
    Overflow { needed: usize, written: usize },
    #[error("read of {needed} bytes at offset {pos} exceeds payload length {len}")]
    OutOfBounds { needed: usize, pos: usize, len: usize },
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,
    #[error("string field of {0} bytes exceeds the {MAX_STR_LEN} byte limit")]
    StringTooLong(usize),
    #[error("invalid value {value} for field `{field}`")]
    InvalidValue { field: &'static str, value: i64 },
}

/// Append-only payload builder
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Writer {
    buf: BytesMut,
}

impl Writer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(64),
        }
    }

    /// Number of bytes written so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }

    fn reserve(&self, needed: usize) -> Result<(), CodecError> {
        if self.buf.len() + needed > MAX_BODY_LEN {
            return Err(CodecError::Overflow {
                needed,
                written: self.buf.len(),
            });
        }
        Ok(())
    }

    /// Appends raw bytes, rejecting the whole write if it would not fit
    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.reserve(bytes.len())?;
        self.buf.put_slice(bytes);
        Ok(())
    }

    pub fn put_u8(&mut self, value: u8) -> Result<(), CodecError> {
        self.reserve(1)?;
        self.buf.put_u8(value);
        Ok(())
    }

    pub fn put_i8(&mut self, value: i8) -> Result<(), CodecError> {
        self.reserve(1)?;
        self.buf.put_i8(value);
        Ok(())
    }

    pub fn put_bool(&mut self, value: bool) -> Result<(), CodecError> {
        self.put_u8(u8::from(value))
    }

    pub fn put_u16(&mut self, value: u16) -> Result<(), CodecError> {
        self.reserve(2)?;
        self.buf.put_u16(value);
        Ok(())
    }

    pub fn put_i16(&mut self, value: i16) -> Result<(), CodecError> {
        self.reserve(2)?;
        self.buf.put_i16(value);
        Ok(())
    }

    pub fn put_u32(&mut self, value: u32) -> Result<(), CodecError> {
        self.reserve(4)?;
        self.buf.put_u32(value);
        Ok(())
    }

    pub fn put_i32(&mut self, value: i32) -> Result<(), CodecError> {
        self.reserve(4)?;
        self.buf.put_i32(value);
        Ok(())
    }

    pub fn put_u64(&mut self, value: u64) -> Result<(), CodecError> {
        self.reserve(8)?;
        self.buf.put_u64(value);
        Ok(())
    }

    pub fn put_i64(&mut self, value: i64) -> Result<(), CodecError> {
        self.reserve(8)?;
        self.buf.put_i64(value);
        Ok(())
    }

    pub fn put_f32(&mut self, value: f32) -> Result<(), CodecError> {
        self.reserve(4)?;
        self.buf.put_f32(value);
        Ok(())
    }

    /// Writes a length-prefixed UTF-8 string
    pub fn put_str(&mut self, value: &str) -> Result<(), CodecError> {
        let bytes = value.as_bytes();
        if bytes.len() > MAX_STR_LEN {
            return Err(CodecError::StringTooLong(bytes.len()));
        }
        self.reserve(2 + bytes.len())?;
        self.buf.put_u16(bytes.len() as u16);
        self.buf.put_slice(bytes);
        Ok(())
    }

    pub fn put<T: WireEncode + ?Sized>(&mut self, value: &T) -> Result<(), CodecError> {
        value.encode(self)
    }
}

/// Cursor over a received payload
///
/// `rest` advances through [`Buf`]; `whole` is kept so a failed read can
/// rewind to where it started.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    whole: &'a [u8],
    rest: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            whole: buf,
            rest: buf,
        }
    }

    pub fn position(&self) -> usize {
        self.whole.len() - self.rest.remaining()
    }

    pub fn remaining(&self) -> usize {
        self.rest.remaining()
    }

    pub fn is_exhausted(&self) -> bool {
        !self.rest.has_remaining()
    }

    fn rewind(&mut self, pos: usize) {
        self.rest = &self.whole[pos..];
    }

    fn ensure(&self, needed: usize) -> Result<(), CodecError> {
        if needed > self.rest.remaining() {
            return Err(CodecError::OutOfBounds {
                needed,
                pos: self.position(),
                len: self.whole.len(),
            });
        }
        Ok(())
    }

    /// Consumes exactly `n` bytes, or nothing at all
    pub fn get_bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        self.ensure(n)?;
        let (head, tail) = self.rest.split_at(n);
        self.rest = tail;
        Ok(head)
    }

    pub fn get_u8(&mut self) -> Result<u8, CodecError> {
        self.ensure(1)?;
        Ok(self.rest.get_u8())
    }

    pub fn get_i8(&mut self) -> Result<i8, CodecError> {
        self.ensure(1)?;
        Ok(self.rest.get_i8())
    }

    pub fn get_bool(&mut self) -> Result<bool, CodecError> {
        let start = self.position();
        match self.get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => {
                self.rewind(start);
                Err(CodecError::InvalidValue {
                    field: "bool",
                    value: i64::from(other),
                })
            }
        }
    }

    pub fn get_u16(&mut self) -> Result<u16, CodecError> {
        self.ensure(2)?;
        Ok(self.rest.get_u16())
    }

    pub fn get_i16(&mut self) -> Result<i16, CodecError> {
        self.ensure(2)?;
        Ok(self.rest.get_i16())
    }

    pub fn get_u32(&mut self) -> Result<u32, CodecError> {
        self.ensure(4)?;
        Ok(self.rest.get_u32())
    }

    pub fn get_i32(&mut self) -> Result<i32, CodecError> {
        self.ensure(4)?;
        Ok(self.rest.get_i32())
    }

    pub fn get_u64(&mut self) -> Result<u64, CodecError> {
        self.ensure(8)?;
        Ok(self.rest.get_u64())
    }

    pub fn get_i64(&mut self) -> Result<i64, CodecError> {
        self.ensure(8)?;
        Ok(self.rest.get_i64())
    }

    pub fn get_f32(&mut self) -> Result<f32, CodecError> {
        self.ensure(4)?;
        Ok(self.rest.get_f32())
    }

    /// Reads a length-prefixed UTF-8 string; on any failure the cursor is
    /// restored to where the length prefix started
    pub fn get_str(&mut self) -> Result<String, CodecError> {
        let start = self.position();
        let result = self.get_str_inner();
        if result.is_err() {
            self.rewind(start);
        }
        result
    }

    fn get_str_inner(&mut self) -> Result<String, CodecError> {
        let len = self.get_u16()? as usize;
        if len > MAX_STR_LEN {
            return Err(CodecError::StringTooLong(len));
        }
        let bytes = self.get_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    pub fn get<T: WireDecode>(&mut self) -> Result<T, CodecError> {
        let start = self.position();
        let result = T::decode(self);
        if result.is_err() {
            self.rewind(start);
        }
        result
    }
}

/// Types with a fixed field layout on the wire
pub trait WireEncode {
    fn encode(&self, w: &mut Writer) -> Result<(), CodecError>;
}

pub trait WireDecode: Sized {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError>;
}
