//! Resolved schema model: message types, fields and enums.

use crate::wire::WireType;
use std::collections::HashMap;
use std::fmt;

/// Scalar field types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    /// `int32`
    Int32,
    /// `int64`
    Int64,
    /// `uint32`
    Uint32,
    /// `uint64`
    Uint64,
    /// `sint32` (zigzag)
    Sint32,
    /// `sint64` (zigzag)
    Sint64,
    /// `fixed32`
    Fixed32,
    /// `fixed64`
    Fixed64,
    /// `sfixed32`
    Sfixed32,
    /// `sfixed64`
    Sfixed64,
    /// `float`
    Float,
    /// `double`
    Double,
    /// `bool`
    Bool,
    /// `string`
    String,
    /// `bytes`
    Bytes,
}

impl ScalarKind {
    /// Returns the `.proto` keyword for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarKind::Int32 => "int32",
            ScalarKind::Int64 => "int64",
            ScalarKind::Uint32 => "uint32",
            ScalarKind::Uint64 => "uint64",
            ScalarKind::Sint32 => "sint32",
            ScalarKind::Sint64 => "sint64",
            ScalarKind::Fixed32 => "fixed32",
            ScalarKind::Fixed64 => "fixed64",
            ScalarKind::Sfixed32 => "sfixed32",
            ScalarKind::Sfixed64 => "sfixed64",
            ScalarKind::Float => "float",
            ScalarKind::Double => "double",
            ScalarKind::Bool => "bool",
            ScalarKind::String => "string",
            ScalarKind::Bytes => "bytes",
        }
    }

    /// Returns the wire type a single value of this kind is encoded with
    pub fn wire_type(&self) -> WireType {
        match self {
            ScalarKind::Int32
            | ScalarKind::Int64
            | ScalarKind::Uint32
            | ScalarKind::Uint64
            | ScalarKind::Sint32
            | ScalarKind::Sint64
            | ScalarKind::Bool => WireType::Varint,
            ScalarKind::Fixed64 | ScalarKind::Sfixed64 | ScalarKind::Double => WireType::I64,
            ScalarKind::Fixed32 | ScalarKind::Sfixed32 | ScalarKind::Float => WireType::I32,
            ScalarKind::String | ScalarKind::Bytes => WireType::Len,
        }
    }

    /// Returns true if repeated values of this kind may use packed encoding
    pub fn is_packable(&self) -> bool {
        self.wire_type() != WireType::Len
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a field holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// A scalar value
    Scalar(ScalarKind),
    /// An embedded message, by fully qualified name (no leading dot)
    Message(String),
    /// An enum, by fully qualified name (no leading dot)
    Enum(String),
}

impl FieldKind {
    /// Returns the wire type a single value of this kind is encoded with
    pub fn wire_type(&self) -> WireType {
        match self {
            FieldKind::Scalar(kind) => kind.wire_type(),
            FieldKind::Message(_) => WireType::Len,
            FieldKind::Enum(_) => WireType::Varint,
        }
    }

    /// Returns true if repeated values of this kind may use packed encoding
    pub fn is_packable(&self) -> bool {
        match self {
            FieldKind::Scalar(kind) => kind.is_packable(),
            FieldKind::Message(_) => false,
            FieldKind::Enum(_) => true,
        }
    }

    /// Returns the type name shown in schema listings
    pub fn type_name(&self) -> &str {
        match self {
            FieldKind::Scalar(kind) => kind.as_str(),
            FieldKind::Message(name) | FieldKind::Enum(name) => name,
        }
    }
}

/// Field cardinality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    /// Singular (proto2 `optional`/`required`, proto3 implicit)
    Optional,
    /// `repeated`
    Repeated,
    /// `map<K, V>`, a repeated synthetic entry message
    Map,
}

/// A single field definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Field number, unique within its message
    pub number: u32,
    /// Field name as declared
    pub name: String,
    /// Value type
    pub kind: FieldKind,
    /// Cardinality
    pub label: Label,
}

/// A message type definition
#[derive(Debug, Clone)]
pub struct MessageType {
    /// Dotted, package-prefixed name without a leading dot
    pub full_name: String,
    /// Package of the declaring file
    pub package: String,
    /// Fields in declaration order
    pub fields: Vec<FieldDef>,
    /// True for the synthetic entry type of a `map<K, V>` field
    pub map_entry: bool,
    pub(crate) problems: Vec<String>,
    pub(crate) by_number: HashMap<u32, usize>,
}

impl MessageType {
    pub(crate) fn new(full_name: String, package: String, map_entry: bool) -> Self {
        Self {
            full_name,
            package,
            fields: Vec::new(),
            map_entry,
            problems: Vec::new(),
            by_number: HashMap::new(),
        }
    }

    /// Returns the short (unqualified) name
    pub fn name(&self) -> &str {
        self.full_name
            .rsplit_once('.')
            .map_or(self.full_name.as_str(), |(_, name)| name)
    }

    /// Looks up a field by number
    pub fn field(&self, number: u32) -> Option<&FieldDef> {
        self.by_number.get(&number).map(|&i| &self.fields[i])
    }

    /// Looks up a field by name
    pub fn field_by_name(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns true if every reference this type depends on resolved
    pub fn is_usable(&self) -> bool {
        self.problems.is_empty()
    }

    /// Returns the reasons this type cannot be decoded, if any
    pub fn problems(&self) -> &[String] {
        &self.problems
    }
}

/// One named enum value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValueDef {
    /// Value name
    pub name: String,
    /// Numeric value
    pub number: i32,
}

/// An enum type definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumType {
    /// Dotted, package-prefixed name without a leading dot
    pub full_name: String,
    /// Values in declaration order
    pub values: Vec<EnumValueDef>,
}

impl EnumType {
    /// Returns the first declared name for a number (aliases share numbers)
    pub fn name_of(&self, number: i32) -> Option<&str> {
        self.values
            .iter()
            .find(|v| v.number == number)
            .map(|v| v.name.as_str())
    }
}
