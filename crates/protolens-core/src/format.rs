//! Deterministic text rendering of decoded trees.
//!
//! [`Formatter`] renders a [`DecodedValue`] (or a schema-less
//! [`WireMessage`]) as indented `name: value` lines in the spirit of the
//! protobuf text format. Output is a pure function of the input value, so it
//! is safe to use both for display and for clipboard copies that are
//! compared later.
//!
//! ```text
//! id: 150
//! location {
//!   x: 3
//! }
//! scores[0]: 1
//! scores[1]: 2
//! #99 (varint, unknown field): 05
//! ```

use crate::decode::{DecodedMessage, DecodedValue, MapEntry, ScalarValue, UnknownField};
use crate::wire::{WireMessage, WireValue};

/// Configuration for the formatter
#[derive(Debug, Clone)]
pub struct FormatterConfig {
    /// Indentation string (default: 2 spaces)
    pub indent_str: String,
    /// Bytes shown for unknown records before eliding
    pub hex_preview_len: usize,
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self {
            indent_str: "  ".to_string(),
            hex_preview_len: 32,
        }
    }
}

impl FormatterConfig {
    /// Creates a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the indentation string
    pub fn indent_str(mut self, s: impl Into<String>) -> Self {
        self.indent_str = s.into();
        self
    }

    /// Sets how many bytes of an unknown record are shown
    pub fn hex_preview_len(mut self, len: usize) -> Self {
        self.hex_preview_len = len;
        self
    }
}

/// Renders decoded values as text
#[derive(Debug, Clone, Default)]
pub struct Formatter {
    config: FormatterConfig,
}

impl Formatter {
    /// Creates a formatter with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a formatter with custom configuration
    pub fn with_config(config: FormatterConfig) -> Self {
        Self { config }
    }

    /// Render a decoded value. A top-level message renders its fields without braces.
    pub fn format(&self, value: &DecodedValue) -> String {
        let mut out = LineWriter::new(&self.config.indent_str);
        match value {
            DecodedValue::Message(message) => self.write_fields(&mut out, message),
            DecodedValue::Unknown(unknown) => {
                let line = format!("#{}", unknown.number);
                self.write_entry(&mut out, &line, value);
            }
            other => out.line(self.inline(other)),
        }
        out.finish()
    }

    /// Render a schema-less wire tree
    pub fn format_wire(&self, message: &WireMessage) -> String {
        let mut out = LineWriter::new(&self.config.indent_str);
        self.write_wire(&mut out, message);
        out.finish()
    }

    fn write_fields(&self, out: &mut LineWriter<'_>, message: &DecodedMessage) {
        for field in &message.fields {
            match &field.value {
                DecodedValue::List(items) => {
                    for (i, item) in items.iter().enumerate() {
                        self.write_entry(out, &format!("{}[{}]", field.name, i), item);
                    }
                }
                // A known field that degraded keeps its name next to the number
                DecodedValue::Unknown(unknown) => {
                    let label = if unknown.number.to_string() == field.name {
                        format!("#{}", unknown.number)
                    } else {
                        format!("{} #{}", field.name, unknown.number)
                    };
                    self.write_entry(out, &label, &field.value);
                }
                value => self.write_entry(out, &field.name, value),
            }
        }
    }

    fn write_entry(&self, out: &mut LineWriter<'_>, label: &str, value: &DecodedValue) {
        match value {
            DecodedValue::Message(message) => self.write_block(out, label, |out| {
                self.write_fields(out, message)
            }),
            DecodedValue::Map(entries) => self.write_block(out, label, |out| {
                for MapEntry { key, value } in entries {
                    self.write_entry(out, &self.inline(key), value);
                }
            }),
            DecodedValue::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.write_entry(out, &format!("{}[{}]", label, i), item);
                }
            }
            DecodedValue::Unknown(unknown) => out.line(format!(
                "{} ({}, {}): {}",
                label,
                unknown.wire_type,
                unknown.reason.as_str(),
                self.unknown_preview(unknown)
            )),
            other => out.line(format!("{}: {}", label, self.inline(other))),
        }
    }

    fn write_block(
        &self,
        out: &mut LineWriter<'_>,
        label: &str,
        body: impl FnOnce(&mut LineWriter<'_>),
    ) {
        let start = out.lines.len();
        out.line(format!("{} {{", label));
        out.indent();
        body(out);
        out.dedent();
        if out.lines.len() == start + 1 {
            let collapsed = format!("{}{} {{}}", out.prefix(), label);
            out.lines[start] = collapsed;
        } else {
            out.line("}".to_string());
        }
    }

    /// Single-line rendering of a scalar-like value
    fn inline(&self, value: &DecodedValue) -> String {
        match value {
            DecodedValue::Scalar { value, .. } => match value {
                ScalarValue::I32(v) => v.to_string(),
                ScalarValue::I64(v) => v.to_string(),
                ScalarValue::U32(v) => v.to_string(),
                ScalarValue::U64(v) => v.to_string(),
                ScalarValue::F32(v) => v.to_string(),
                ScalarValue::F64(v) => v.to_string(),
                ScalarValue::Bool(v) => v.to_string(),
                ScalarValue::String(s) => format!("\"{}\"", escape_string(s)),
                ScalarValue::InvalidUtf8(b) | ScalarValue::Bytes(b) => {
                    format!("\"{}\"", escape_bytes(b))
                }
            },
            DecodedValue::Enum { name: Some(name), .. } => name.clone(),
            DecodedValue::Enum { name: None, number } => number.to_string(),
            DecodedValue::Message(m) => format!("{} {{...}}", m.type_name),
            DecodedValue::List(items) => format!("[{} items]", items.len()),
            DecodedValue::Map(entries) => format!("{{{} entries}}", entries.len()),
            DecodedValue::Unknown(unknown) => self.unknown_preview(unknown),
        }
    }

    fn unknown_preview(&self, unknown: &UnknownField) -> String {
        hex_preview(&unknown.data, self.config.hex_preview_len)
    }

    fn write_wire(&self, out: &mut LineWriter<'_>, message: &WireMessage) {
        for field in &message.fields {
            match &field.value {
                WireValue::Message(nested) => {
                    self.write_block(out, &field.number.to_string(), |out| {
                        self.write_wire(out, nested)
                    })
                }
                WireValue::Varint(v) => out.line(format!("{}: {}", field.number, v)),
                WireValue::Fixed64(v) => out.line(format!("{}: {}i64", field.number, v)),
                WireValue::Fixed32(v) => out.line(format!("{}: {}i32", field.number, v)),
                WireValue::String(s) => {
                    out.line(format!("{}: \"{}\"", field.number, escape_string(s)))
                }
                WireValue::Bytes(b) => out.line(format!(
                    "{}: <{}>",
                    field.number,
                    hex_preview(b, self.config.hex_preview_len)
                )),
            }
        }
    }
}

/// Indentation-aware line collector
struct LineWriter<'a> {
    indent_str: &'a str,
    indent_level: usize,
    lines: Vec<String>,
}

impl<'a> LineWriter<'a> {
    fn new(indent_str: &'a str) -> Self {
        Self {
            indent_str,
            indent_level: 0,
            lines: Vec::new(),
        }
    }

    fn indent(&mut self) {
        self.indent_level += 1;
    }

    fn dedent(&mut self) {
        self.indent_level = self.indent_level.saturating_sub(1);
    }

    fn prefix(&self) -> String {
        self.indent_str.repeat(self.indent_level)
    }

    fn line(&mut self, s: String) {
        let line = format!("{}{}", self.prefix(), s);
        self.lines.push(line);
    }

    fn finish(self) -> String {
        self.lines.join("\n")
    }
}

/// Format a decoded value with the default formatter
pub fn format(value: &DecodedValue) -> String {
    Formatter::new().format(value)
}

/// Space-separated lowercase hex of every byte
pub fn hex_string(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Hex of at most `max` bytes, noting how many were elided
pub fn hex_preview(data: &[u8], max: usize) -> String {
    if data.is_empty() {
        return "(empty)".to_string();
    }
    if data.len() <= max {
        return hex_string(data);
    }
    format!("{} ... (+{} bytes)", hex_string(&data[..max]), data.len() - max)
}

/// Classic offset / hex / ASCII dump; works on any input
pub fn hex_dump(data: &[u8]) -> String {
    data.chunks(16)
        .enumerate()
        .map(|(row, chunk)| {
            let hex = chunk
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect::<Vec<_>>()
                .join(" ");
            let ascii: String = chunk
                .iter()
                .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
                .collect();
            format!("{:08x}  {:<47}  |{}|", row * 16, hex, ascii)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Escape a string for quoted output
fn escape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            _ if c.is_ascii_control() => {
                result.push_str(&format!("\\x{:02x}", c as u8));
            }
            _ => result.push(c),
        }
    }
    result
}

/// Escape arbitrary bytes: printable ASCII verbatim, everything else `\xNN`
fn escape_bytes(data: &[u8]) -> String {
    let mut result = String::with_capacity(data.len());
    for &b in data {
        match b {
            b'\\' => result.push_str("\\\\"),
            b'"' => result.push_str("\\\""),
            b'\n' => result.push_str("\\n"),
            b'\r' => result.push_str("\\r"),
            b'\t' => result.push_str("\\t"),
            0x20..=0x7E => result.push(b as char),
            _ => result.push_str(&format!("\\x{:02x}", b)),
        }
    }
    result
}
