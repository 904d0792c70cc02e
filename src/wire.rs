//! Low level wire format: varints, zigzag, tags and the byte reader/writer.
//!
//! Everything in this module is schema agnostic. The decoder and encoder in
//! [`crate::decoding`] and [`crate::encoding`] drive it field by field using
//! descriptor metadata.

use crate::{Error, Result};

/// Largest legal field number, `2^29 - 1`.
pub const MAX_FIELD_NUMBER: u32 = (1 << 29) - 1;

/// Field numbers reserved for the protobuf implementation itself.
pub const RESERVED_FIELD_NUMBERS: core::ops::RangeInclusive<u32> = 19000..=19999;

pub const DEFAULT_RECURSION_LIMIT: u32 = 64;

pub const MAX_VARINT_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WireType {
    Varint = 0,
    Fixed64 = 1,
    LengthDelimited = 2,
    StartGroup = 3,
    EndGroup = 4,
    Fixed32 = 5,
}

impl WireType {
    pub const fn from_u8(value: u8) -> Option<WireType> {
        Some(match value {
            0 => WireType::Varint,
            1 => WireType::Fixed64,
            2 => WireType::LengthDelimited,
            3 => WireType::StartGroup,
            4 => WireType::EndGroup,
            5 => WireType::Fixed32,
            _ => return None,
        })
    }
}

#[inline]
pub const fn make_tag(field_number: u32, wire_type: WireType) -> u32 {
    (field_number << 3) | wire_type as u32
}

/// A varint encoded into a fixed inline buffer.
#[derive(Clone, Copy)]
pub struct EncodedVarint {
    buf: [u8; MAX_VARINT_LEN],
    len: u8,
}

impl EncodedVarint {
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len as usize]
    }
}

impl core::ops::Deref for EncodedVarint {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl core::fmt::Debug for EncodedVarint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.as_slice().fmt(f)
    }
}

/// Encodes `value` using the minimal number of 7-bit groups, low group first.
pub fn encode_varint64(mut value: u64) -> EncodedVarint {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let mut len = 0;
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf[len] = byte;
            len += 1;
            break;
        }
        buf[len] = byte | 0x80;
        len += 1;
    }
    EncodedVarint {
        buf,
        len: len as u8,
    }
}

pub const fn encoded_varint_len(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

/// Decodes a varint from the front of `bytes`, returning the value and the
/// number of bytes consumed.
pub fn decode_varint64(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut result = 0u64;
    for (i, &byte) in bytes.iter().enumerate().take(MAX_VARINT_LEN) {
        result |= ((byte & 0x7F) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
        if i == MAX_VARINT_LEN - 1 {
            return Err(Error::Malformed("varint longer than 10 bytes"));
        }
    }
    Err(Error::Malformed("truncated varint"))
}

/// Same stream as [`decode_varint64`], high bits beyond 32 are dropped.
pub fn decode_varint32(bytes: &[u8]) -> Result<(u32, usize)> {
    let (value, consumed) = decode_varint64(bytes)?;
    Ok((value as u32, consumed))
}

#[inline]
pub const fn zigzag_encode32(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

#[inline]
pub const fn zigzag_encode64(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

#[inline]
pub const fn zigzag_decode32(n: u32) -> i32 {
    ((n >> 1) as i32) ^ -((n & 1) as i32)
}

#[inline]
pub const fn zigzag_decode64(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

/// Append-only output buffer.
#[derive(Debug, Default, Clone)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Writer {
            buf: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn write_varint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.buf.push((value as u8) | 0x80);
            value >>= 7;
        }
        self.buf.push(value as u8);
    }

    #[inline]
    pub fn write_fixed32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    #[inline]
    pub fn write_fixed64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    #[inline]
    pub fn write_tag(&mut self, field_number: u32, wire_type: WireType) {
        self.write_varint(make_tag(field_number, wire_type) as u64);
    }

    /// Raw bytes, no framing.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_length_delimited(&mut self, bytes: &[u8]) {
        self.write_varint(bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Bounded reader over one message's bytes.
///
/// `depth` counts enclosing messages and groups; opening one more than
/// `limit` fails with [`Error::MaxDepthExceeded`].
#[derive(Debug, Clone)]
pub struct ReadCursor<'a> {
    buf: &'a [u8],
    pos: usize,
    depth: u32,
    limit: u32,
}

impl<'a> ReadCursor<'a> {
    pub fn new(buf: &'a [u8], recursion_limit: u32) -> Self {
        ReadCursor {
            buf,
            pos: 0,
            depth: 0,
            limit: recursion_limit,
        }
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn read_varint(&mut self) -> Result<u64> {
        let (value, consumed) = decode_varint64(&self.buf[self.pos..])?;
        self.pos += consumed;
        Ok(value)
    }

    pub fn read_varint32(&mut self) -> Result<u32> {
        let (value, consumed) = decode_varint32(&self.buf[self.pos..])?;
        self.pos += consumed;
        Ok(value)
    }

    /// Reads a tag and splits it into field number and wire type.
    pub fn read_tag(&mut self) -> Result<(u32, WireType)> {
        let tag = self.read_varint()?;
        if tag > u32::MAX as u64 {
            return Err(Error::Malformed("tag out of range"));
        }
        let field_number = (tag >> 3) as u32;
        if field_number == 0 {
            return Err(Error::Malformed("field number 0"));
        }
        let wire_type =
            WireType::from_u8((tag & 7) as u8).ok_or(Error::Malformed("invalid wire type"))?;
        Ok((field_number, wire_type))
    }

    pub fn read_fixed32(&mut self) -> Result<u32> {
        let bytes = self.read_bytes(4)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(bytes);
        Ok(u32::from_le_bytes(raw))
    }

    pub fn read_fixed64(&mut self) -> Result<u64> {
        let bytes = self.read_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(Error::Malformed("unexpected end of input"));
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Reads a varint length prefix and the payload it announces.
    pub fn read_length_delimited(&mut self) -> Result<&'a [u8]> {
        let len = self.read_varint()?;
        if len > self.remaining() as u64 {
            return Err(Error::Malformed("length exceeds remaining input"));
        }
        self.read_bytes(len as usize)
    }

    /// Cursor over an embedded message, one level deeper than `self`.
    pub fn nested(&self, payload: &'a [u8]) -> Result<ReadCursor<'a>> {
        let depth = self.depth + 1;
        if depth > self.limit {
            return Err(Error::MaxDepthExceeded { limit: self.limit });
        }
        Ok(ReadCursor {
            buf: payload,
            pos: 0,
            depth,
            limit: self.limit,
        })
    }

    pub fn enter_group(&mut self) -> Result<()> {
        if self.depth + 1 > self.limit {
            return Err(Error::MaxDepthExceeded { limit: self.limit });
        }
        self.depth += 1;
        Ok(())
    }

    pub fn exit_group(&mut self) {
        self.depth -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn varint_300() {
        assert_eq!(encode_varint64(300).as_slice(), &[0xAC, 0x02]);
        assert_eq!(decode_varint64(&[0xAC, 0x02]).unwrap(), (300, 2));
    }

    #[test]
    fn varint_extremes() {
        assert_eq!(encode_varint64(0).as_slice(), &[0]);
        assert_eq!(encode_varint64(u64::MAX).len(), 10);
        assert_eq!(
            decode_varint64(encode_varint64(u64::MAX).as_slice()).unwrap(),
            (u64::MAX, 10)
        );
    }

    #[test]
    fn varint_rejects_overlong_and_truncated() {
        let overlong = [0xFFu8; 11];
        assert_eq!(
            decode_varint64(&overlong),
            Err(Error::Malformed("varint longer than 10 bytes"))
        );
        assert_eq!(
            decode_varint64(&[0x80, 0x80]),
            Err(Error::Malformed("truncated varint"))
        );
        assert!(decode_varint64(&[]).is_err());
    }

    #[test]
    fn varint32_truncates_high_bits() {
        let encoded = encode_varint64(0x1_0000_0005);
        assert_eq!(decode_varint32(&encoded).unwrap(), (5, encoded.len()));
        // Negative int32 values are sign extended to ten bytes on the wire.
        let encoded = encode_varint64(-1i64 as u64);
        assert_eq!(decode_varint32(&encoded).unwrap(), (u32::MAX, 10));
    }

    #[test]
    fn zigzag_boundaries() {
        for v in [0, 1, -1, i32::MIN, i32::MAX] {
            assert_eq!(zigzag_decode32(zigzag_encode32(v)), v);
        }
        for v in [0, 1, -1, i64::MIN, i64::MAX, i32::MIN as i64, i32::MAX as i64] {
            assert_eq!(zigzag_decode64(zigzag_encode64(v)), v);
        }
        assert_eq!(zigzag_encode32(-1), 1);
        assert_eq!(zigzag_encode32(1), 2);
        assert_eq!(zigzag_encode32(i32::MIN), u32::MAX);
        assert_eq!(zigzag_encode64(i64::MAX), u64::MAX - 1);
    }

    #[test]
    fn tag_reading() {
        let mut cursor = ReadCursor::new(&[0x08, 0x96, 0x01], DEFAULT_RECURSION_LIMIT);
        assert_eq!(cursor.read_tag().unwrap(), (1, WireType::Varint));
        assert_eq!(cursor.read_varint().unwrap(), 150);
        assert!(cursor.is_at_end());

        assert!(ReadCursor::new(&[0x00], 64).read_tag().is_err());
        assert!(ReadCursor::new(&[0x0E], 64).read_tag().is_err());
    }

    #[test]
    fn length_delimited_bounds() {
        let mut cursor = ReadCursor::new(&[0x03, b'a', b'b'], 64);
        assert_eq!(
            cursor.read_length_delimited(),
            Err(Error::Malformed("length exceeds remaining input"))
        );
        let mut cursor = ReadCursor::new(&[0x02, b'a', b'b'], 64);
        assert_eq!(cursor.read_length_delimited().unwrap(), b"ab");
    }

    #[test]
    fn nesting_limit() {
        let cursor = ReadCursor::new(&[], 1);
        let inner = cursor.nested(&[]).unwrap();
        assert_eq!(
            inner.nested(&[]).unwrap_err(),
            Error::MaxDepthExceeded { limit: 1 }
        );
    }

    #[test]
    fn writer_layout() {
        let mut w = Writer::new();
        w.write_tag(1, WireType::Varint);
        w.write_varint(150);
        w.write_fixed32(1);
        w.write_length_delimited(b"hi");
        assert_eq!(
            w.into_inner(),
            vec![0x08, 0x96, 0x01, 1, 0, 0, 0, 2, b'h', b'i']
        );
    }

    proptest! {
        #[test]
        fn varint_roundtrip(v: u64) {
            let encoded = encode_varint64(v);
            prop_assert_eq!(encoded.len(), encoded_varint_len(v));
            let bits = 64 - v.leading_zeros() as usize;
            prop_assert_eq!(encoded.len(), bits.div_ceil(7).max(1));
            prop_assert_eq!(decode_varint64(&encoded).unwrap(), (v, encoded.len()));

            let mut w = Writer::new();
            w.write_varint(v);
            prop_assert_eq!(w.as_slice(), encoded.as_slice());
        }

        #[test]
        fn zigzag_roundtrip(v32: i32, v64: i64) {
            prop_assert_eq!(zigzag_decode32(zigzag_encode32(v32)), v32);
            prop_assert_eq!(zigzag_decode64(zigzag_encode64(v64)), v64);
        }
    }
}
