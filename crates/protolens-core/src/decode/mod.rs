//! Schema-guided decoding of wire records.
//!
//! [`SchemaDecoder`] resolves scanned [`RawRecord`]s against a
//! [`MessageType`], producing a [`DecodedValue`] tree with names and typed
//! values. Decoding never fails once the top level has scanned: a record that
//! does not fit its declared field is surfaced as [`DecodedValue::Unknown`]
//! and decoding carries on with the next one.

mod value;

use crate::error::ScanError;
use crate::registry::{DescriptorEntry, FieldDef, FieldKind, Label, MessageType, ScalarKind};
use crate::wire::{
    decode_varint, zigzag_decode_32, zigzag_decode_64, RawRecord, WireScanner, WireType,
};
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use tracing::trace;

pub use value::{
    DecodedField, DecodedMessage, DecodedValue, MapEntry, ScalarValue, UnknownField, UnknownReason,
};

/// Configuration for the schema decoder
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Maximum embedded message depth; deeper payloads become unknown records
    pub max_depth: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self { max_depth: 64 }
    }
}

impl DecoderConfig {
    /// Creates a new decoder config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum nesting depth
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }
}

/// Decodes wire records against message types from one descriptor entry
#[derive(Debug, Clone)]
pub struct SchemaDecoder<'a> {
    entry: &'a DescriptorEntry,
    scanner: WireScanner,
    config: DecoderConfig,
}

impl<'a> SchemaDecoder<'a> {
    /// Creates a decoder with default configuration
    pub fn new(entry: &'a DescriptorEntry) -> Self {
        Self::with_config(entry, DecoderConfig::default())
    }

    /// Creates a decoder with custom configuration
    pub fn with_config(entry: &'a DescriptorEntry, config: DecoderConfig) -> Self {
        Self {
            entry,
            scanner: WireScanner::new(),
            config,
        }
    }

    /// Decode scanned records as `message`; always yields [`DecodedValue::Message`]
    pub fn decode(&self, records: &[RawRecord], message: &MessageType) -> DecodedValue {
        DecodedValue::Message(self.decode_message(records, message, 0))
    }

    /// Scan `data` and decode it as `message`
    pub fn decode_bytes(&self, data: &[u8], message: &MessageType) -> Result<DecodedValue, ScanError> {
        let records = self.scanner.scan(data)?;
        Ok(self.decode(&records, message))
    }

    fn decode_message(&self, records: &[RawRecord], message: &MessageType, depth: usize) -> DecodedMessage {
        let mut by_number: HashMap<u32, Vec<&RawRecord>> = HashMap::new();
        let mut unknown: Vec<(&RawRecord, UnknownReason)> = Vec::new();

        for record in records {
            if message.field(record.field_number).is_some() {
                by_number.entry(record.field_number).or_default().push(record);
            } else {
                unknown.push((record, UnknownReason::NotInSchema));
            }
        }

        let mut fields = Vec::new();
        let mut superseded = 0;
        for def in &message.fields {
            if let Some(records) = by_number.get(&def.number) {
                if def.label == Label::Optional && !matches!(def.kind, FieldKind::Message(_)) {
                    let expected = def.kind.wire_type();
                    let matching = records.iter().filter(|r| r.wire_type == expected).count();
                    superseded += matching.saturating_sub(1);
                }
                if let Some(field) = self.decode_field(def, records, depth, &mut unknown) {
                    fields.push(field);
                }
            }
        }

        // Unknown records trail the known fields in byte order
        unknown.sort_by_key(|(record, _)| record.offset);
        fields.extend(
            unknown
                .into_iter()
                .map(|(record, reason)| unknown_field(record, reason)),
        );

        DecodedMessage {
            type_name: message.full_name.clone(),
            fields,
            superseded,
        }
    }

    /// Decode all records of one field; records that do not fit go to `rejected`
    fn decode_field<'r>(
        &self,
        def: &FieldDef,
        records: &[&'r RawRecord],
        depth: usize,
        rejected: &mut Vec<(&'r RawRecord, UnknownReason)>,
    ) -> Option<DecodedField> {
        let value = match def.label {
            Label::Repeated => {
                let mut items = Vec::new();
                for &record in records {
                    if record.wire_type == WireType::Len && def.kind.is_packable() {
                        match self.unpack(&def.kind, &record.data) {
                            Some(values) => items.extend(values),
                            None => rejected.push((record, UnknownReason::Malformed)),
                        }
                    } else if record.wire_type == def.kind.wire_type() {
                        items.push(self.decode_single(&def.kind, record, depth));
                    } else {
                        rejected.push((record, UnknownReason::WireTypeMismatch));
                    }
                }
                (!items.is_empty()).then_some(DecodedValue::List(items))
            }
            Label::Map => {
                let mut entries: Vec<MapEntry> = Vec::new();
                for &record in records {
                    if record.wire_type != WireType::Len {
                        rejected.push((record, UnknownReason::WireTypeMismatch));
                        continue;
                    }
                    match self.decode_map_entry(&def.kind, &record.data, depth) {
                        Ok(entry) => match entries.iter_mut().find(|e| e.key == entry.key) {
                            Some(existing) => *existing = entry,
                            None => entries.push(entry),
                        },
                        Err(reason) => rejected.push((record, reason)),
                    }
                }
                (!entries.is_empty()).then_some(DecodedValue::Map(entries))
            }
            Label::Optional => {
                let expected = def.kind.wire_type();
                let (matching, mismatched): (Vec<&RawRecord>, Vec<&RawRecord>) =
                    records.iter().copied().partition(|r| r.wire_type == expected);
                rejected.extend(
                    mismatched
                        .into_iter()
                        .map(|r| (r, UnknownReason::WireTypeMismatch)),
                );

                match (&def.kind, matching.as_slice()) {
                    (_, []) => None,
                    // Repeated occurrences of a singular message merge
                    (FieldKind::Message(type_name), [_, _, ..]) => {
                        let mut merged = BytesMut::new();
                        for record in &matching {
                            merged.extend_from_slice(&record.data);
                        }
                        let first = matching[0];
                        Some(self.decode_nested(type_name, merged.freeze(), first, depth))
                    }
                    // Otherwise the last occurrence wins
                    (kind, [.., last]) => Some(self.decode_single(kind, last, depth)),
                }
            }
        };

        value.map(|value| DecodedField {
            name: def.name.clone(),
            number: def.number,
            value,
        })
    }

    /// Decode one record whose wire type already matches the kind
    fn decode_single(&self, kind: &FieldKind, record: &RawRecord, depth: usize) -> DecodedValue {
        let value = match record.wire_type {
            WireType::Varint => record.varint.and_then(|v| self.varint_value(kind, v)),
            WireType::I32 => record.fixed32().and_then(|bits| fixed32_value(kind, bits)),
            WireType::I64 => record.fixed64().and_then(|bits| fixed64_value(kind, bits)),
            WireType::Len => match kind {
                FieldKind::Scalar(ScalarKind::String) => Some(string_value(&record.data)),
                FieldKind::Scalar(ScalarKind::Bytes) => Some(DecodedValue::Scalar {
                    kind: ScalarKind::Bytes,
                    value: ScalarValue::Bytes(record.data.clone()),
                }),
                FieldKind::Message(type_name) => {
                    Some(self.decode_nested(type_name, record.data.clone(), record, depth))
                }
                _ => None,
            },
        };

        value.unwrap_or_else(|| {
            DecodedValue::Unknown(UnknownField::from_record(
                record,
                UnknownReason::WireTypeMismatch,
            ))
        })
    }

    fn decode_nested(
        &self,
        type_name: &str,
        payload: Bytes,
        record: &RawRecord,
        depth: usize,
    ) -> DecodedValue {
        let fail = |reason| {
            DecodedValue::Unknown(UnknownField {
                number: record.field_number,
                wire_type: record.wire_type,
                data: payload.clone(),
                reason,
            })
        };

        if depth >= self.config.max_depth {
            return fail(UnknownReason::DepthLimit);
        }
        let Some(message) = self.entry.message(type_name) else {
            return fail(UnknownReason::Malformed);
        };

        match self.scanner.scan_bytes(payload.clone()) {
            Ok(records) => DecodedValue::Message(self.decode_message(&records, message, depth + 1)),
            Err(e) => {
                trace!("field {} does not scan as {}: {}", record.field_number, type_name, e);
                fail(UnknownReason::Malformed)
            }
        }
    }

    fn decode_map_entry(
        &self,
        kind: &FieldKind,
        payload: &Bytes,
        depth: usize,
    ) -> Result<MapEntry, UnknownReason> {
        if depth >= self.config.max_depth {
            return Err(UnknownReason::DepthLimit);
        }
        let FieldKind::Message(entry_name) = kind else {
            return Err(UnknownReason::Malformed);
        };
        let entry_type = self
            .entry
            .message(entry_name)
            .ok_or(UnknownReason::Malformed)?;
        let (Some(key_def), Some(value_def)) = (entry_type.field(1), entry_type.field(2)) else {
            return Err(UnknownReason::Malformed);
        };

        let records = self
            .scanner
            .scan_bytes(payload.clone())
            .map_err(|_| UnknownReason::Malformed)?;
        let decoded = self.decode_message(&records, entry_type, depth + 1);

        let mut key = None;
        let mut value = None;
        for field in decoded.fields {
            if matches!(field.value, DecodedValue::Unknown(_)) {
                return Err(UnknownReason::Malformed);
            }
            match field.number {
                1 => key = Some(field.value),
                2 => value = Some(field.value),
                _ => {}
            }
        }

        Ok(MapEntry {
            key: key.unwrap_or_else(|| self.default_value(&key_def.kind)),
            value: value.unwrap_or_else(|| self.default_value(&value_def.kind)),
        })
    }

    /// Unpack a packed repeated payload; `None` if it does not divide into values
    fn unpack(&self, kind: &FieldKind, data: &[u8]) -> Option<Vec<DecodedValue>> {
        let mut values = Vec::new();
        match kind.wire_type() {
            WireType::Varint => {
                let mut position = 0;
                while position < data.len() {
                    let (v, len) = decode_varint(&data[position..]).ok()?;
                    position += len;
                    values.push(self.varint_value(kind, v)?);
                }
            }
            WireType::I32 => {
                if data.len() % 4 != 0 {
                    return None;
                }
                for chunk in data.chunks_exact(4) {
                    let bits = u32::from_le_bytes(chunk.try_into().ok()?);
                    values.push(fixed32_value(kind, bits)?);
                }
            }
            WireType::I64 => {
                if data.len() % 8 != 0 {
                    return None;
                }
                for chunk in data.chunks_exact(8) {
                    let bits = u64::from_le_bytes(chunk.try_into().ok()?);
                    values.push(fixed64_value(kind, bits)?);
                }
            }
            WireType::Len => return None,
        }
        Some(values)
    }

    fn varint_value(&self, kind: &FieldKind, v: u64) -> Option<DecodedValue> {
        let (kind, value) = match kind {
            FieldKind::Enum(type_name) => return Some(self.enum_value(type_name, v as i32)),
            FieldKind::Scalar(kind) => match kind {
                ScalarKind::Int32 => (*kind, ScalarValue::I32(v as i32)),
                ScalarKind::Int64 => (*kind, ScalarValue::I64(v as i64)),
                ScalarKind::Uint32 => (*kind, ScalarValue::U32(v as u32)),
                ScalarKind::Uint64 => (*kind, ScalarValue::U64(v)),
                ScalarKind::Sint32 => (*kind, ScalarValue::I32(zigzag_decode_32(v))),
                ScalarKind::Sint64 => (*kind, ScalarValue::I64(zigzag_decode_64(v))),
                ScalarKind::Bool => (*kind, ScalarValue::Bool(v != 0)),
                _ => return None,
            },
            FieldKind::Message(_) => return None,
        };
        Some(DecodedValue::Scalar { kind, value })
    }

    fn enum_value(&self, type_name: &str, number: i32) -> DecodedValue {
        let name = self
            .entry
            .enum_type(type_name)
            .and_then(|e| e.name_of(number))
            .map(str::to_string);
        DecodedValue::Enum { name, number }
    }

    fn default_value(&self, kind: &FieldKind) -> DecodedValue {
        match kind {
            FieldKind::Scalar(kind) => {
                let value = match kind {
                    ScalarKind::Int32 | ScalarKind::Sint32 | ScalarKind::Sfixed32 => ScalarValue::I32(0),
                    ScalarKind::Int64 | ScalarKind::Sint64 | ScalarKind::Sfixed64 => ScalarValue::I64(0),
                    ScalarKind::Uint32 | ScalarKind::Fixed32 => ScalarValue::U32(0),
                    ScalarKind::Uint64 | ScalarKind::Fixed64 => ScalarValue::U64(0),
                    ScalarKind::Float => ScalarValue::F32(0.0),
                    ScalarKind::Double => ScalarValue::F64(0.0),
                    ScalarKind::Bool => ScalarValue::Bool(false),
                    ScalarKind::String => ScalarValue::String(String::new()),
                    ScalarKind::Bytes => ScalarValue::Bytes(Bytes::new()),
                };
                DecodedValue::Scalar { kind: *kind, value }
            }
            FieldKind::Enum(type_name) => self.enum_value(type_name, 0),
            FieldKind::Message(type_name) => DecodedValue::Message(DecodedMessage {
                type_name: type_name.clone(),
                ..Default::default()
            }),
        }
    }
}

fn fixed32_value(kind: &FieldKind, bits: u32) -> Option<DecodedValue> {
    let FieldKind::Scalar(kind) = kind else {
        return None;
    };
    let value = match kind {
        ScalarKind::Fixed32 => ScalarValue::U32(bits),
        ScalarKind::Sfixed32 => ScalarValue::I32(bits as i32),
        ScalarKind::Float => ScalarValue::F32(f32::from_bits(bits)),
        _ => return None,
    };
    Some(DecodedValue::Scalar { kind: *kind, value })
}

fn fixed64_value(kind: &FieldKind, bits: u64) -> Option<DecodedValue> {
    let FieldKind::Scalar(kind) = kind else {
        return None;
    };
    let value = match kind {
        ScalarKind::Fixed64 => ScalarValue::U64(bits),
        ScalarKind::Sfixed64 => ScalarValue::I64(bits as i64),
        ScalarKind::Double => ScalarValue::F64(f64::from_bits(bits)),
        _ => return None,
    };
    Some(DecodedValue::Scalar { kind: *kind, value })
}

fn string_value(data: &Bytes) -> DecodedValue {
    let value = match std::str::from_utf8(data) {
        Ok(s) => ScalarValue::String(s.to_string()),
        Err(_) => ScalarValue::InvalidUtf8(data.clone()),
    };
    DecodedValue::Scalar {
        kind: ScalarKind::String,
        value,
    }
}

fn unknown_field(record: &RawRecord, reason: UnknownReason) -> DecodedField {
    DecodedField {
        name: record.field_number.to_string(),
        number: record.field_number,
        value: DecodedValue::Unknown(UnknownField::from_record(record, reason)),
    }
}
