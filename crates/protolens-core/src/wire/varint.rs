//! Low-level protobuf wire format primitives.
//!
//! Each protobuf field is encoded as:
//! - A varint "tag" containing the field number and wire type
//! - The field data (format depends on wire type)
//!
//! Wire types:
//! - 0: VARINT (int32, int64, uint32, uint64, sint32, sint64, bool, enum)
//! - 1: I64 (fixed64, sfixed64, double)
//! - 2: LEN (string, bytes, embedded messages, packed repeated fields)
//! - 5: I32 (fixed32, sfixed32, float)
//!
//! The deprecated group wire types (3 and 4) are rejected.

use crate::error::ScanError;
use std::fmt;

/// Protobuf wire types understood by the scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WireType {
    /// Variable-length integer
    Varint = 0,
    /// 64-bit fixed-width
    I64 = 1,
    /// Length-delimited (strings, bytes, embedded messages)
    Len = 2,
    /// 32-bit fixed-width
    I32 = 5,
}

impl WireType {
    /// Short lowercase name used in rendered output
    pub fn as_str(&self) -> &'static str {
        match self {
            WireType::Varint => "varint",
            WireType::I64 => "i64",
            WireType::Len => "len",
            WireType::I32 => "i32",
        }
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u8> for WireType {
    type Error = ScanError;

    fn try_from(value: u8) -> Result<Self, ScanError> {
        match value {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::I64),
            2 => Ok(WireType::Len),
            5 => Ok(WireType::I32),
            _ => Err(ScanError::InvalidWireType {
                offset: 0,
                wire_type: value,
            }),
        }
    }
}

/// Decode a varint from the given bytes.
///
/// Returns the decoded value and the number of bytes consumed. Offsets in
/// errors are relative to `data`.
pub fn decode_varint(data: &[u8]) -> Result<(u64, usize), ScanError> {
    let mut result: u64 = 0;
    let mut shift = 0;

    for (i, &byte) in data.iter().enumerate() {
        // Varints are at most 10 bytes for a 64-bit value, and the tenth
        // byte carries only the top bit
        if i >= 10 || (i == 9 && byte > 0x01) {
            return Err(ScanError::MalformedVarint { offset: 0 });
        }

        result |= ((byte & 0x7F) as u64) << shift;
        shift += 7;

        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
    }

    Err(ScanError::truncated(0, "varint runs past end of buffer"))
}

/// Decode a zigzag-encoded `sint32`
pub fn zigzag_decode_32(value: u64) -> i32 {
    let n = value as u32;
    ((n >> 1) as i32) ^ -((n & 1) as i32)
}

/// Decode a zigzag-encoded `sint64`
pub fn zigzag_decode_64(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Read a little-endian `u32` from the first four bytes
pub fn read_fixed32(data: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = data.get(..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

/// Read a little-endian `u64` from the first eight bytes
pub fn read_fixed64(data: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = data.get(..8)?.try_into().ok()?;
    Some(u64::from_le_bytes(bytes))
}
