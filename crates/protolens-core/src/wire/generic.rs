//! Best-effort interpretation of wire records without a schema.

use super::{RawRecord, WireScanner, WireType};
use crate::error::ScanError;
use base64::Engine;
use bytes::Bytes;
use serde_json::{json, Map, Value as JsonValue};

/// A message interpreted without a schema
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WireMessage {
    /// Fields in wire order; numbers may repeat
    pub fields: Vec<WireField>,
}

/// One field of a [`WireMessage`]
#[derive(Debug, Clone, PartialEq)]
pub struct WireField {
    /// Field number from the tag
    pub number: u32,
    /// Interpreted value
    pub value: WireValue,
}

/// A guessed value
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    /// VARINT, shown unsigned
    Varint(u64),
    /// I64, shown unsigned
    Fixed64(u64),
    /// I32, shown unsigned
    Fixed32(u32),
    /// LEN payload that is printable UTF-8
    String(String),
    /// LEN payload with no better interpretation
    Bytes(Bytes),
    /// LEN payload that scans completely as wire format
    Message(WireMessage),
}

impl WireValue {
    /// Returns the wire type this value was read from
    pub fn wire_type(&self) -> WireType {
        match self {
            WireValue::Varint(_) => WireType::Varint,
            WireValue::Fixed64(_) => WireType::I64,
            WireValue::Fixed32(_) => WireType::I32,
            WireValue::String(_) | WireValue::Bytes(_) | WireValue::Message(_) => WireType::Len,
        }
    }
}

impl WireMessage {
    /// Returns the number of top-level fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the message has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Convert to a JSON object keyed by field number.
    ///
    /// Repeated field numbers collapse into arrays; bytes render as
    /// `<bytes:BASE64>`.
    pub fn to_json(&self) -> JsonValue {
        let mut map: Map<String, JsonValue> = Map::new();

        for field in &self.fields {
            let key = field.number.to_string();
            let value = field.value.to_json();

            if let Some(existing) = map.get_mut(&key) {
                if let JsonValue::Array(arr) = existing {
                    arr.push(value);
                } else {
                    let old_value = existing.take();
                    *existing = json!([old_value, value]);
                }
            } else {
                map.insert(key, value);
            }
        }

        JsonValue::Object(map)
    }
}

impl WireValue {
    fn to_json(&self) -> JsonValue {
        match self {
            WireValue::Varint(v) | WireValue::Fixed64(v) => json!(*v),
            WireValue::Fixed32(v) => json!(*v),
            WireValue::String(s) => json!(s),
            WireValue::Bytes(b) => json!(format!(
                "<bytes:{}>",
                base64::engine::general_purpose::STANDARD.encode(b)
            )),
            WireValue::Message(m) => m.to_json(),
        }
    }
}

impl WireScanner {
    /// Scan a buffer and interpret it as a schema-less message tree.
    ///
    /// Only the top level must be valid wire format; nested payloads that do
    /// not scan fall back to strings or bytes.
    pub fn scan_tree(&self, data: &[u8]) -> Result<WireMessage, ScanError> {
        let records = self.scan(data)?;
        Ok(self.interpret(records, 0))
    }

    fn interpret(&self, records: Vec<RawRecord>, depth: usize) -> WireMessage {
        let fields = records
            .into_iter()
            .map(|record| {
                let value = match record.wire_type {
                    WireType::Varint => WireValue::Varint(record.varint.unwrap_or_default()),
                    WireType::I64 => WireValue::Fixed64(record.fixed64().unwrap_or_default()),
                    WireType::I32 => WireValue::Fixed32(record.fixed32().unwrap_or_default()),
                    WireType::Len => self.interpret_len(record.data, depth),
                };
                WireField {
                    number: record.field_number,
                    value,
                }
            })
            .collect();
        WireMessage { fields }
    }

    fn interpret_len(&self, payload: Bytes, depth: usize) -> WireValue {
        if let Ok(s) = std::str::from_utf8(&payload) {
            if is_printable(s) {
                return WireValue::String(s.to_string());
            }
        }

        if depth < self.config.max_depth && payload.len() <= self.config.max_field_size {
            if let Ok(records) = self.scan_bytes(payload.clone()) {
                if !records.is_empty() {
                    return WireValue::Message(self.interpret(records, depth + 1));
                }
            }
        }

        WireValue::Bytes(payload)
    }
}

/// Text with no control characters other than common whitespace
pub(crate) fn is_printable(s: &str) -> bool {
    s.chars()
        .all(|c| !c.is_control() || c == '\n' || c == '\r' || c == '\t')
}
