//! Wire encoding and decoding primitives.
//!
//! All integers on the wire are big-endian. Readers take a byte slice and
//! return the decoded value together with the remaining bytes, so message
//! parsers chain them with `?`.

use zerocopy::FromBytes;

use crate::error::{Error, Result};

use super::types::{I16BE, I32BE, U16BE, U32BE};

macro_rules! read_be {
    ($(#[$doc:meta] $fn_name:ident: $native:ty, $wire:ty, $bytes:literal;)*) => {
        $(
            #[$doc]
            #[inline]
            pub fn $fn_name(data: &[u8]) -> Result<($native, &[u8])> {
                if data.len() < $bytes {
                    return Err(Error::Protocol(format!(
                        concat!(stringify!($fn_name), ": buffer too short: {} < ", $bytes),
                        data.len()
                    )));
                }
                let value = <$wire>::ref_from_bytes(&data[..$bytes])
                    .map_err(|e| Error::Protocol(format!(concat!(stringify!($fn_name), ": {:?}"), e)))?
                    .get();
                Ok((value, &data[$bytes..]))
            }
        )*
    };
}

read_be! {
    /// Read a 2-byte big-endian signed integer.
    read_i16: i16, I16BE, 2;
    /// Read a 2-byte big-endian unsigned integer.
    read_u16: u16, U16BE, 2;
    /// Read a 4-byte big-endian signed integer.
    read_i32: i32, I32BE, 4;
    /// Read a 4-byte big-endian unsigned integer.
    read_u32: u32, U32BE, 4;
}

/// Read a single byte.
#[inline]
pub fn read_u8(data: &[u8]) -> Result<(u8, &[u8])> {
    match data.split_first() {
        Some((&b, rest)) => Ok((b, rest)),
        None => Err(Error::Protocol("read_u8: empty buffer".into())),
    }
}

/// Read exactly `len` bytes.
#[inline]
pub fn read_bytes(data: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    if data.len() < len {
        return Err(Error::Protocol(format!(
            "read_bytes: buffer too short: {} < {}",
            data.len(),
            len
        )));
    }
    Ok(data.split_at(len))
}

/// Read a NUL-terminated byte string. The terminator is consumed but not
/// included in the returned slice.
#[inline]
pub fn read_cstring(data: &[u8]) -> Result<(&[u8], &[u8])> {
    match memchr::memchr(0, data) {
        Some(pos) => Ok((&data[..pos], &data[pos + 1..])),
        None => Err(Error::Protocol("read_cstring: missing NUL terminator".into())),
    }
}

/// Read a NUL-terminated string as UTF-8.
#[inline]
pub fn read_cstr(data: &[u8]) -> Result<(&str, &[u8])> {
    let (bytes, rest) = read_cstring(data)?;
    let s = simdutf8::basic::from_utf8(bytes)
        .map_err(|_| Error::Protocol("read_cstr: invalid UTF-8".into()))?;
    Ok((s, rest))
}

/// Builder for one frontend message that patches the length field on finish.
///
/// Wire layout:
/// - type byte (absent on startup-family packets), not counted in the length
/// - i32 length, counting itself and the payload
/// - payload
pub struct MessageBuilder<'a> {
    buf: &'a mut Vec<u8>,
    start: usize,
}

impl<'a> MessageBuilder<'a> {
    /// Start a tagged message.
    pub fn new(buf: &'a mut Vec<u8>, type_byte: u8) -> Self {
        buf.push(type_byte);
        Self::new_untagged(buf)
    }

    /// Start an untagged message (StartupMessage, SSLRequest, CancelRequest).
    pub fn new_untagged(buf: &'a mut Vec<u8>) -> Self {
        let start = buf.len();
        buf.extend_from_slice(&[0, 0, 0, 0]);
        Self { buf, start }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn write_cstring(&mut self, s: &[u8]) {
        self.buf.extend_from_slice(s);
        self.buf.push(0);
    }

    pub fn write_cstr(&mut self, s: &str) {
        self.write_cstring(s.as_bytes());
    }

    /// Patch the length field. Must be called exactly once per message.
    pub fn finish(self) {
        let len = (self.buf.len() - self.start) as i32;
        self.buf[self.start..self.start + 4].copy_from_slice(&len.to_be_bytes());
    }
}
