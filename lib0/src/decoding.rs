use crate::error::{Error, Result};

/// The maximum number of continuation bytes a varint may use before we
/// consider the stream malformed. 10 bytes covers a full 64-bit magnitude
/// with slop for the sign-bit varint's shorter first byte.
const MAX_VARINT_BYTES: usize = 10;

/// Trait for reading primitive values out of a lib0-encoded binary stream.
/// Mirrors [crate::encoding::Write] byte-for-byte.
pub trait Read<'a> {
    fn read_u8(&mut self) -> Result<u8>;

    /// Reads `len` raw bytes as a borrowed slice without copying.
    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]>;

    fn read_var_u64(&mut self) -> Result<u64> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        for _ in 0..MAX_VARINT_BYTES {
            let byte = self.read_u8()?;
            value |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
        Err(Error::VarIntTooLong)
    }

    fn read_var_u32(&mut self) -> Result<u32> {
        Ok(self.read_var_u64()? as u32)
    }

    fn read_var_i64(&mut self) -> Result<i64> {
        let first = self.read_u8()?;
        let is_negative = first & 0b0100_0000 != 0;
        let mut value = (first & 0x3f) as u64;
        if first & 0b1000_0000 != 0 {
            let rest = self.read_var_u64()?;
            value |= rest << 6;
        }
        Ok(if is_negative {
            -(value as i64)
        } else {
            value as i64
        })
    }

    fn read_string(&mut self) -> Result<&'a str> {
        let len = self.read_var_u64()? as usize;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes).map_err(|_| Error::InvalidUtf8)
    }

    fn read_buf(&mut self) -> Result<&'a [u8]> {
        let len = self.read_var_u64()? as usize;
        self.read_bytes(len)
    }

    fn read_f32(&mut self) -> Result<f32> {
        let bytes = self.read_bytes(4)?;
        Ok(f32::from_be_bytes(bytes.try_into().unwrap()))
    }

    fn read_f64(&mut self) -> Result<f64> {
        let bytes = self.read_bytes(8)?;
        Ok(f64::from_be_bytes(bytes.try_into().unwrap()))
    }

    fn read_i64(&mut self) -> Result<i64> {
        let bytes = self.read_bytes(8)?;
        Ok(i64::from_be_bytes(bytes.try_into().unwrap()))
    }
}

/// A cursor over an immutable byte slice, used to decode v1-encoded updates
/// without copying their payload. Strings and byte buffers are returned as
/// borrows tied to the lifetime of the original slice.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn has_content(&self) -> bool {
        self.pos < self.buf.len()
    }

    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

impl<'a> Read<'a> for Cursor<'a> {
    fn read_u8(&mut self) -> Result<u8> {
        let b = *self.buf.get(self.pos).ok_or(Error::EndOfBuffer)?;
        self.pos += 1;
        Ok(b)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let remaining = self.buf.len() - self.pos;
        if len > remaining {
            return Err(Error::LengthExceeded { len, remaining });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }
}
