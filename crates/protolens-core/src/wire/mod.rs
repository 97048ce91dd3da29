//! Schema-less wire format scanning.
//!
//! [`WireScanner`] tokenizes a byte buffer into an ordered list of
//! [`RawRecord`]s without any knowledge of the message type. Length-delimited
//! payloads are never interpreted here, because without a schema they are
//! ambiguous between `bytes`, `string` and an embedded message. The
//! best-effort recursive interpretation used for the "wire format" view lives
//! in [`WireMessage`].
//!
//! ## Example
//!
//! ```
//! use protolens_core::wire::{WireScanner, WireType};
//!
//! let records = WireScanner::new().scan(&[0x08, 0x96, 0x01])?;
//! assert_eq!(records[0].field_number, 1);
//! assert_eq!(records[0].wire_type, WireType::Varint);
//! assert_eq!(records[0].varint, Some(150));
//! # Ok::<(), protolens_core::ScanError>(())
//! ```

mod generic;
mod varint;

use crate::error::ScanError;
use crate::MAX_FIELD_NUMBER;
use base64::Engine;
use bytes::Bytes;
use tracing::{debug, trace};

pub use generic::{WireField, WireMessage, WireValue};
pub use varint::{
    decode_varint, read_fixed32, read_fixed64, zigzag_decode_32, zigzag_decode_64, WireType,
};

/// One tag/value pair as it appears on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Field number from the tag
    pub field_number: u32,
    /// Wire type from the tag
    pub wire_type: WireType,
    /// Value bytes: the varint encoding, the fixed-width bytes, or the LEN payload
    pub data: Bytes,
    /// Decoded value for VARINT records
    pub varint: Option<u64>,
    /// Offset of the tag within the scanned buffer
    pub offset: usize,
}

impl RawRecord {
    /// Returns the value bytes as a slice
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Reads an I32 record's value
    pub fn fixed32(&self) -> Option<u32> {
        match self.wire_type {
            WireType::I32 => read_fixed32(&self.data),
            _ => None,
        }
    }

    /// Reads an I64 record's value
    pub fn fixed64(&self) -> Option<u64> {
        match self.wire_type {
            WireType::I64 => read_fixed64(&self.data),
            _ => None,
        }
    }
}

/// Configuration for the scanner's schema-less interpretation
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Maximum nesting depth explored when guessing embedded messages
    pub max_depth: usize,
    /// Payloads larger than this are never speculatively parsed as messages
    pub max_field_size: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_depth: 64,
            max_field_size: 16 * 1024 * 1024, // 16 MB
        }
    }
}

impl ScannerConfig {
    /// Creates a new scanner config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum nesting depth
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Sets the maximum payload size considered for nested parsing
    pub fn max_field_size(mut self, size: usize) -> Self {
        self.max_field_size = size;
        self
    }
}

/// Tokenizer for protobuf wire format
#[derive(Debug, Clone, Default)]
pub struct WireScanner {
    config: ScannerConfig,
}

impl WireScanner {
    /// Creates a new scanner with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new scanner with custom configuration
    pub fn with_config(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// Returns the scanner configuration
    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Scan a byte slice into wire records
    pub fn scan(&self, data: &[u8]) -> Result<Vec<RawRecord>, ScanError> {
        self.scan_bytes(Bytes::copy_from_slice(data))
    }

    /// Scan an owned buffer into wire records
    ///
    /// Record payloads are slices of `data`, so no bytes are copied.
    pub fn scan_bytes(&self, data: Bytes) -> Result<Vec<RawRecord>, ScanError> {
        let mut records = Vec::new();
        let mut position = 0;

        while position < data.len() {
            let start = position;

            let (tag, tag_len) = decode_varint(&data[position..]).map_err(|e| e.rebase(start))?;
            position += tag_len;

            let field_number = tag >> 3;
            if field_number == 0 || field_number > MAX_FIELD_NUMBER as u64 {
                return Err(ScanError::InvalidFieldNumber {
                    offset: start,
                    number: field_number,
                });
            }
            let wire_type = WireType::try_from((tag & 0x07) as u8).map_err(|e| e.rebase(start))?;

            let (range, varint) = match wire_type {
                WireType::Varint => {
                    let (value, len) =
                        decode_varint(&data[position..]).map_err(|e| e.rebase(position))?;
                    (position..position + len, Some(value))
                }
                WireType::I64 => (fixed_range(&data, start, position, 8)?, None),
                WireType::I32 => (fixed_range(&data, start, position, 4)?, None),
                WireType::Len => {
                    let (length, len_len) =
                        decode_varint(&data[position..]).map_err(|e| e.rebase(position))?;
                    let body = position + len_len;
                    let end = usize::try_from(length)
                        .ok()
                        .and_then(|length| body.checked_add(length))
                        .filter(|&end| end <= data.len())
                        .ok_or_else(|| {
                            ScanError::truncated(
                                start,
                                format!(
                                    "LEN field needs {} bytes, {} available",
                                    length,
                                    data.len() - body
                                ),
                            )
                        })?;
                    (body..end, None)
                }
            };

            position = range.end;
            trace!(
                "field {} ({}) at {}, {} value bytes",
                field_number,
                wire_type,
                start,
                range.len()
            );

            records.push(RawRecord {
                field_number: field_number as u32,
                wire_type,
                data: data.slice(range),
                varint,
                offset: start,
            });
        }

        debug!("Scanned {} bytes into {} records", data.len(), records.len());
        Ok(records)
    }
}

fn fixed_range(
    data: &[u8],
    start: usize,
    position: usize,
    width: usize,
) -> Result<std::ops::Range<usize>, ScanError> {
    if data.len() < position + width {
        return Err(ScanError::truncated(
            start,
            format!("not enough bytes for {}-byte fixed value", width),
        ));
    }
    Ok(position..position + width)
}

/// Scan a byte slice with the default scanner
pub fn scan(data: &[u8]) -> Result<Vec<RawRecord>, ScanError> {
    WireScanner::new().scan(data)
}

/// Heuristic aid: does this blob tokenize as at least one wire record?
///
/// This is not a guarantee. Short ASCII strings in particular can happen to
/// scan as valid wire format.
pub fn looks_like_protobuf(data: &[u8]) -> bool {
    matches!(scan(data), Ok(records) if !records.is_empty())
}

/// Decode base64 transport text into bytes.
///
/// Standard and URL-safe alphabets are accepted, padded or not. Surrounding
/// whitespace is ignored. Empty text is [`ScanError::EmptyInput`].
pub fn decode_base64(text: &str) -> Result<Vec<u8>, ScanError> {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};

    let text = text.trim();
    if text.is_empty() {
        return Err(ScanError::EmptyInput);
    }

    let first = match STANDARD.decode(text) {
        Ok(bytes) => return Ok(bytes),
        Err(e) => e,
    };
    [STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(text).ok())
        .ok_or_else(|| ScanError::InvalidBase64(first.to_string()))
}
