//! Column-driven type selection.
//!
//! A [`ColumnTypeMapping`] names a sibling column of the data row and a table
//! from that column's value to a qualified message type. Resolution never
//! looks at the blob itself.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;

/// A rule choosing a message type from another column of the same row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnTypeMapping {
    /// Column whose value selects the type
    pub source_column: String,
    /// Column value to qualified message type name
    #[serde(default)]
    pub value_to_type: BTreeMap<String, String>,
}

impl ColumnTypeMapping {
    /// Creates an empty mapping for `source_column`
    pub fn new(source_column: impl Into<String>) -> Self {
        Self {
            source_column: source_column.into(),
            value_to_type: BTreeMap::new(),
        }
    }

    /// Adds a value to type rule
    pub fn with_rule(mut self, value: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.value_to_type.insert(value.into(), type_name.into());
        self
    }

    /// Resolve the type for `row`; see [`resolve`]
    pub fn resolve<'a>(&'a self, row: &Map<String, JsonValue>) -> Option<&'a str> {
        resolve(self, row)
    }
}

/// Pick the message type for `row`.
///
/// Returns `None` when the column is missing, its value is null, or no rule
/// matches the stringified value.
pub fn resolve<'a>(mapping: &'a ColumnTypeMapping, row: &Map<String, JsonValue>) -> Option<&'a str> {
    let key = stringify(row.get(&mapping.source_column)?)?;
    mapping.value_to_type.get(&key).map(String::as_str)
}

fn stringify(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}
