//! Typed value tree produced by the schema decoder.

use crate::format::hex_string;
use crate::registry::ScalarKind;
use crate::wire::{RawRecord, WireType};
use base64::Engine;
use bytes::Bytes;
use serde_json::{json, Map, Value as JsonValue};

/// A decoded node
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedValue {
    /// A scalar, tagged with the declared kind
    Scalar {
        /// Declared field kind
        kind: ScalarKind,
        /// Reinterpreted value
        value: ScalarValue,
    },
    /// An enum value; `name` is `None` for numbers the enum does not define
    Enum {
        /// Value name, if the number is defined
        name: Option<String>,
        /// Numeric value
        number: i32,
    },
    /// An embedded message
    Message(DecodedMessage),
    /// All values of a repeated field, in wire order
    List(Vec<DecodedValue>),
    /// A map field's entries, in wire order with later duplicates replacing earlier ones
    Map(Vec<MapEntry>),
    /// A record the schema could not explain
    Unknown(UnknownField),
}

/// Scalar payloads
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    /// `int32`, `sint32`, `sfixed32`
    I32(i32),
    /// `int64`, `sint64`, `sfixed64`
    I64(i64),
    /// `uint32`, `fixed32`
    U32(u32),
    /// `uint64`, `fixed64`
    U64(u64),
    /// `float`
    F32(f32),
    /// `double`
    F64(f64),
    /// `bool`
    Bool(bool),
    /// Valid UTF-8 `string`
    String(String),
    /// A `string` field whose bytes are not UTF-8
    InvalidUtf8(Bytes),
    /// `bytes`
    Bytes(Bytes),
}

/// A decoded message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedMessage {
    /// Fully qualified type name
    pub type_name: String,
    /// Present fields in declaration order, followed by unknown records in wire order
    pub fields: Vec<DecodedField>,
    /// Earlier occurrences of singular scalar fields that a later record replaced
    pub superseded: usize,
}

/// One field of a [`DecodedMessage`]
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedField {
    /// Field name; the number as text for unknown records
    pub name: String,
    /// Field number
    pub number: u32,
    /// Value
    pub value: DecodedValue,
}

/// One entry of a map field
#[derive(Debug, Clone, PartialEq)]
pub struct MapEntry {
    /// Key (always a scalar)
    pub key: DecodedValue,
    /// Value
    pub value: DecodedValue,
}

/// Why a record was surfaced as unknown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownReason {
    /// The field number is not defined by the message type
    NotInSchema,
    /// The wire type does not fit the declared field kind
    WireTypeMismatch,
    /// The payload could not be read as the declared kind
    Malformed,
    /// Nesting exceeded the decoder's depth limit
    DepthLimit,
}

impl UnknownReason {
    /// Short label used in rendered output
    pub fn as_str(&self) -> &'static str {
        match self {
            UnknownReason::NotInSchema => "unknown field",
            UnknownReason::WireTypeMismatch => "wire type mismatch",
            UnknownReason::Malformed => "malformed",
            UnknownReason::DepthLimit => "depth limit",
        }
    }
}

/// A raw record kept verbatim
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownField {
    /// Field number from the tag
    pub number: u32,
    /// Wire type from the tag
    pub wire_type: WireType,
    /// Value bytes as scanned
    pub data: Bytes,
    /// Why the record was not decoded
    pub reason: UnknownReason,
}

impl UnknownField {
    pub(crate) fn from_record(record: &RawRecord, reason: UnknownReason) -> Self {
        Self {
            number: record.field_number,
            wire_type: record.wire_type,
            data: record.data.clone(),
            reason,
        }
    }
}

impl DecodedMessage {
    /// Looks up a present field by name
    pub fn get(&self, name: &str) -> Option<&DecodedValue> {
        self.fields
            .iter()
            .find(|f| f.name == name && !matches!(f.value, DecodedValue::Unknown(_)))
            .map(|f| &f.value)
    }

    /// Iterates over unknown records at this level
    pub fn unknown_fields(&self) -> impl Iterator<Item = &UnknownField> + '_ {
        self.fields.iter().filter_map(|f| match &f.value {
            DecodedValue::Unknown(unknown) => Some(unknown),
            _ => None,
        })
    }

    /// Convert to a JSON object keyed by field name.
    ///
    /// Unknown records are keyed `#<number>`.
    pub fn to_json(&self) -> JsonValue {
        let mut map: Map<String, JsonValue> = Map::new();
        for field in &self.fields {
            let (key, value) = match &field.value {
                DecodedValue::Unknown(unknown) => (format!("#{}", unknown.number), field.value.to_json()),
                value => (field.name.clone(), value.to_json()),
            };
            match map.get_mut(&key) {
                Some(JsonValue::Array(arr)) => arr.push(value),
                Some(existing) => {
                    let old_value = existing.take();
                    *existing = json!([old_value, value]);
                }
                None => {
                    map.insert(key, value);
                }
            }
        }
        JsonValue::Object(map)
    }
}

impl DecodedValue {
    /// Returns the message if this is one
    pub fn as_message(&self) -> Option<&DecodedMessage> {
        match self {
            DecodedValue::Message(m) => Some(m),
            _ => None,
        }
    }

    /// Convert to JSON for copy/export
    pub fn to_json(&self) -> JsonValue {
        match self {
            DecodedValue::Scalar { value, .. } => value.to_json(),
            DecodedValue::Enum { name: Some(name), .. } => json!(name),
            DecodedValue::Enum { name: None, number } => json!(number),
            DecodedValue::Message(m) => m.to_json(),
            DecodedValue::List(items) => JsonValue::Array(items.iter().map(Self::to_json).collect()),
            DecodedValue::Map(entries) => {
                let map = entries
                    .iter()
                    .map(|entry| (entry.key.key_text(), entry.value.to_json()))
                    .collect();
                JsonValue::Object(map)
            }
            DecodedValue::Unknown(unknown) => json!({
                "wire_type": unknown.wire_type.as_str(),
                "reason": unknown.reason.as_str(),
                "hex": hex_string(&unknown.data),
            }),
        }
    }

    /// Text used for a map key
    pub(crate) fn key_text(&self) -> String {
        match self {
            DecodedValue::Scalar { value, .. } => match value {
                ScalarValue::String(s) => s.clone(),
                ScalarValue::InvalidUtf8(b) => String::from_utf8_lossy(b).into_owned(),
                ScalarValue::Bytes(b) => hex_string(b),
                other => other.to_json().to_string(),
            },
            other => other.to_json().to_string(),
        }
    }
}

impl ScalarValue {
    fn to_json(&self) -> JsonValue {
        match self {
            ScalarValue::I32(v) => json!(v),
            ScalarValue::I64(v) => json!(v),
            ScalarValue::U32(v) => json!(v),
            ScalarValue::U64(v) => json!(v),
            ScalarValue::F32(v) => float_json(f64::from(*v)),
            ScalarValue::F64(v) => float_json(*v),
            ScalarValue::Bool(v) => json!(v),
            ScalarValue::String(s) => json!(s),
            ScalarValue::InvalidUtf8(b) => json!(String::from_utf8_lossy(b)),
            ScalarValue::Bytes(b) => json!(base64::engine::general_purpose::STANDARD.encode(b)),
        }
    }
}

/// JSON has no NaN or infinities; those become strings
fn float_json(v: f64) -> JsonValue {
    if v.is_finite() {
        json!(v)
    } else {
        json!(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scalar(kind: ScalarKind, value: ScalarValue) -> DecodedValue {
        DecodedValue::Scalar { kind, value }
    }

    #[test]
    fn test_message_to_json() {
        let message = DecodedMessage {
            superseded: 0,
            type_name: "demo.User".into(),
            fields: vec![
                DecodedField {
                    name: "id".into(),
                    number: 1,
                    value: scalar(ScalarKind::Int32, ScalarValue::I32(7)),
                },
                DecodedField {
                    name: "status".into(),
                    number: 3,
                    value: DecodedValue::Enum { name: None, number: 9 },
                },
                DecodedField {
                    name: "counters".into(),
                    number: 6,
                    value: DecodedValue::Map(vec![MapEntry {
                        key: scalar(ScalarKind::String, ScalarValue::String("a".into())),
                        value: scalar(ScalarKind::Int64, ScalarValue::I64(-1)),
                    }]),
                },
                DecodedField {
                    name: "99".into(),
                    number: 99,
                    value: DecodedValue::Unknown(UnknownField {
                        number: 99,
                        wire_type: WireType::Varint,
                        data: Bytes::from_static(&[0x01]),
                        reason: UnknownReason::NotInSchema,
                    }),
                },
            ],
        };

        assert_eq!(
            message.to_json(),
            json!({
                "id": 7,
                "status": 9,
                "counters": {"a": -1},
                "#99": {"wire_type": "varint", "reason": "unknown field", "hex": "01"},
            })
        );
        assert_eq!(message.unknown_fields().count(), 1);
        assert!(message.get("99").is_none());
        assert!(message.get("id").is_some());
    }

    #[test]
    fn test_scalar_json_edge_cases() {
        assert_eq!(ScalarValue::F64(f64::NAN).to_json(), json!("NaN"));
        assert_eq!(ScalarValue::F32(1.5).to_json(), json!(1.5));
        assert_eq!(
            ScalarValue::Bytes(Bytes::from_static(&[0xFF, 0x00])).to_json(),
            json!("/wA=")
        );
        assert_eq!(
            ScalarValue::InvalidUtf8(Bytes::from_static(&[b'a', 0xFF])).to_json(),
            json!("a\u{FFFD}")
        );
    }

    #[test]
    fn test_key_text() {
        assert_eq!(scalar(ScalarKind::Int32, ScalarValue::I32(-3)).key_text(), "-3");
        assert_eq!(scalar(ScalarKind::Bool, ScalarValue::Bool(true)).key_text(), "true");
        assert_eq!(
            scalar(ScalarKind::String, ScalarValue::String("k".into())).key_text(),
            "k"
        );
    }
}
