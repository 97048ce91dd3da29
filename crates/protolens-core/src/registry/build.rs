//! Builds the resolved schema graph from a `FileDescriptorSet`.
//!
//! Resolution is per type: a field whose type reference cannot be found
//! marks its message (and, transitively, every message embedding it) as
//! unusable, while unrelated types stay decodable.

use super::types::{EnumType, EnumValueDef, FieldDef, FieldKind, Label, MessageType, ScalarKind};
use crate::error::LoadError;
use crate::MAX_FIELD_NUMBER;
use prost_types::field_descriptor_proto::{Label as ProtoLabel, Type};
use prost_types::{DescriptorProto, EnumDescriptorProto, FieldDescriptorProto, FileDescriptorSet};
use std::collections::HashMap;
use tracing::trace;

#[derive(Debug, Default)]
pub(crate) struct SchemaGraph {
    pub(crate) messages: Vec<MessageType>,
    pub(crate) message_index: HashMap<String, usize>,
    pub(crate) enums: Vec<EnumType>,
    pub(crate) enum_index: HashMap<String, usize>,
    pub(crate) issues: Vec<LoadError>,
}

struct Pending<'a> {
    index: usize,
    proto: &'a DescriptorProto,
}

impl SchemaGraph {
    pub(crate) fn build(set: &FileDescriptorSet) -> Self {
        let mut graph = Self::default();
        let mut pending = Vec::new();

        for file in &set.file {
            let package = file.package();
            for message in &file.message_type {
                graph.collect_message(message, package, package, &mut pending);
            }
            for enum_type in &file.enum_type {
                graph.collect_enum(enum_type, package);
            }
        }

        for item in &pending {
            graph.link_fields(item);
        }
        graph.propagate();

        graph
    }

    /// Indices of listable message types: declaration order, grouped by package
    pub(crate) fn listing(&self) -> Vec<usize> {
        let mut package_order: HashMap<&str, usize> = HashMap::new();
        for message in &self.messages {
            let next = package_order.len();
            package_order.entry(message.package.as_str()).or_insert(next);
        }

        let mut listing: Vec<usize> = (0..self.messages.len())
            .filter(|&i| !self.messages[i].map_entry)
            .collect();
        listing.sort_by_key(|&i| package_order[self.messages[i].package.as_str()]);
        listing
    }

    fn collect_message<'a>(
        &mut self,
        proto: &'a DescriptorProto,
        package: &str,
        scope: &str,
        pending: &mut Vec<Pending<'a>>,
    ) {
        let full_name = qualify(scope, proto.name());
        if self.message_index.contains_key(&full_name) {
            self.issues.push(LoadError::malformed(format!(
                "duplicate message type '{}'",
                full_name
            )));
            return;
        }

        let map_entry = proto
            .options
            .as_ref()
            .map_or(false, |o| o.map_entry.unwrap_or(false));
        let index = self.messages.len();
        self.messages.push(MessageType::new(
            full_name.clone(),
            package.to_string(),
            map_entry,
        ));
        self.message_index.insert(full_name.clone(), index);
        pending.push(Pending { index, proto });

        for nested in &proto.nested_type {
            self.collect_message(nested, package, &full_name, pending);
        }
        for enum_type in &proto.enum_type {
            self.collect_enum(enum_type, &full_name);
        }
    }

    fn collect_enum(&mut self, proto: &EnumDescriptorProto, scope: &str) {
        let full_name = qualify(scope, proto.name());
        if self.enum_index.contains_key(&full_name) {
            self.issues.push(LoadError::malformed(format!(
                "duplicate enum type '{}'",
                full_name
            )));
            return;
        }

        let values = proto
            .value
            .iter()
            .map(|v| EnumValueDef {
                name: v.name().to_string(),
                number: v.number(),
            })
            .collect();
        self.enum_index.insert(full_name.clone(), self.enums.len());
        self.enums.push(EnumType { full_name, values });
    }

    fn link_fields(&mut self, item: &Pending<'_>) {
        let scope = self.messages[item.index].full_name.clone();
        let mut fields = Vec::with_capacity(item.proto.field.len());
        let mut by_number = HashMap::new();
        let mut problems = Vec::new();

        for field in &item.proto.field {
            let number = field.number();
            if number <= 0 || number as u32 > MAX_FIELD_NUMBER {
                let problem = format!("invalid field number {} on '{}'", number, field.name());
                self.issues
                    .push(LoadError::malformed(format!("{}: {}", scope, problem)));
                problems.push(problem);
                continue;
            }
            let number = number as u32;

            let kind = match self.field_kind(field, &scope) {
                Some(kind) => kind,
                None => {
                    let reference = field.type_name().to_string();
                    trace!("{}: unresolved reference '{}'", scope, reference);
                    self.issues.push(LoadError::UnresolvedReference {
                        type_name: scope.clone(),
                        reference: reference.clone(),
                    });
                    problems.push(reference);
                    continue;
                }
            };

            if by_number.contains_key(&number) {
                let problem = format!("duplicate field number {}", number);
                self.issues
                    .push(LoadError::malformed(format!("{}: {}", scope, problem)));
                problems.push(problem);
                continue;
            }

            let label = match (field.label(), &kind) {
                (ProtoLabel::Repeated, FieldKind::Message(target)) if self.is_map_entry(target) => {
                    Label::Map
                }
                (ProtoLabel::Repeated, _) => Label::Repeated,
                _ => Label::Optional,
            };

            by_number.insert(number, fields.len());
            fields.push(FieldDef {
                number,
                name: field.name().to_string(),
                kind,
                label,
            });
        }

        let message = &mut self.messages[item.index];
        message.fields = fields;
        message.by_number = by_number;
        message.problems.extend(problems);
    }

    fn field_kind(&self, field: &FieldDescriptorProto, scope: &str) -> Option<FieldKind> {
        let scalar = |kind| Some(FieldKind::Scalar(kind));
        let declared = field.r#type.and_then(|t| Type::try_from(t).ok());

        match declared {
            Some(Type::Double) => scalar(ScalarKind::Double),
            Some(Type::Float) => scalar(ScalarKind::Float),
            Some(Type::Int64) => scalar(ScalarKind::Int64),
            Some(Type::Uint64) => scalar(ScalarKind::Uint64),
            Some(Type::Int32) => scalar(ScalarKind::Int32),
            Some(Type::Fixed64) => scalar(ScalarKind::Fixed64),
            Some(Type::Fixed32) => scalar(ScalarKind::Fixed32),
            Some(Type::Bool) => scalar(ScalarKind::Bool),
            Some(Type::String) => scalar(ScalarKind::String),
            Some(Type::Bytes) => scalar(ScalarKind::Bytes),
            Some(Type::Uint32) => scalar(ScalarKind::Uint32),
            Some(Type::Sfixed32) => scalar(ScalarKind::Sfixed32),
            Some(Type::Sfixed64) => scalar(ScalarKind::Sfixed64),
            Some(Type::Sint32) => scalar(ScalarKind::Sint32),
            Some(Type::Sint64) => scalar(ScalarKind::Sint64),
            Some(Type::Message) | Some(Type::Group) => {
                resolve_reference(field.type_name(), scope, &self.message_index)
                    .map(FieldKind::Message)
            }
            Some(Type::Enum) => {
                resolve_reference(field.type_name(), scope, &self.enum_index).map(FieldKind::Enum)
            }
            // Hand-built descriptors may leave the type unset and name it only
            None => resolve_reference(field.type_name(), scope, &self.message_index)
                .map(FieldKind::Message)
                .or_else(|| {
                    resolve_reference(field.type_name(), scope, &self.enum_index)
                        .map(FieldKind::Enum)
                }),
        }
    }

    fn is_map_entry(&self, full_name: &str) -> bool {
        self.message_index
            .get(full_name)
            .map_or(false, |&i| self.messages[i].map_entry)
    }

    /// Marks every message embedding an unusable message as unusable
    fn propagate(&mut self) {
        loop {
            let mut newly = Vec::new();
            for (i, message) in self.messages.iter().enumerate() {
                if !message.problems.is_empty() {
                    continue;
                }
                let broken = message.fields.iter().find_map(|f| match &f.kind {
                    FieldKind::Message(target) => self
                        .message_index
                        .get(target)
                        .filter(|&&t| !self.messages[t].problems.is_empty())
                        .map(|_| target.clone()),
                    _ => None,
                });
                if let Some(target) = broken {
                    newly.push((i, target));
                }
            }

            if newly.is_empty() {
                break;
            }

            for (i, target) in newly {
                let message = &mut self.messages[i];
                message
                    .problems
                    .push(format!("depends on unusable type '{}'", target));
                self.issues.push(LoadError::UnresolvedReference {
                    type_name: message.full_name.clone(),
                    reference: target,
                });
            }
        }
    }
}

fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", scope, name)
    }
}

/// Resolve a type reference the way protoc scopes names.
///
/// Fully qualified references start with a dot; relative ones are searched
/// from the innermost enclosing scope outwards.
fn resolve_reference(
    name: &str,
    scope: &str,
    index: &HashMap<String, usize>,
) -> Option<String> {
    if name.is_empty() {
        return None;
    }
    if let Some(absolute) = name.strip_prefix('.') {
        return index.contains_key(absolute).then(|| absolute.to_string());
    }

    let mut scope = scope;
    loop {
        let candidate = qualify(scope, name);
        if index.contains_key(&candidate) {
            return Some(candidate);
        }
        if scope.is_empty() {
            return None;
        }
        scope = scope.rsplit_once('.').map_or("", |(parent, _)| parent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_reference_scoping() {
        let index: HashMap<String, usize> = [("a.b.Inner", 0), ("a.Top", 1), ("Root", 2)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        assert_eq!(resolve_reference(".a.Top", "x", &index), Some("a.Top".into()));
        assert_eq!(resolve_reference(".a.Missing", "a", &index), None);
        assert_eq!(resolve_reference("Inner", "a.b", &index), Some("a.b.Inner".into()));
        assert_eq!(resolve_reference("Top", "a.b.Msg", &index), Some("a.Top".into()));
        assert_eq!(resolve_reference("b.Inner", "a.Top", &index), Some("a.b.Inner".into()));
        assert_eq!(resolve_reference("Root", "a.b", &index), Some("Root".into()));
        assert_eq!(resolve_reference("", "a.b", &index), None);
    }

    #[test]
    fn test_qualify() {
        assert_eq!(qualify("", "T"), "T");
        assert_eq!(qualify("pkg", "T"), "pkg.T");
    }
}
