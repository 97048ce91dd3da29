//! Descriptor registry: named, immutable snapshots of compiled schemas.
//!
//! A [`DescriptorRegistry`] holds one [`DescriptorEntry`] per caller-chosen
//! name. Entries are parsed from a serialized `FileDescriptorSet` and never
//! mutated afterwards; loading the same name again swaps in a new entry.
//! Readers hold an `Arc` to whichever entry was current when they asked, so a
//! concurrent reload is never observed half-applied.
//!
//! ## Example
//!
//! ```no_run
//! use protolens_core::DescriptorRegistry;
//!
//! let registry = DescriptorRegistry::new();
//! let report = registry.load("device", &std::fs::read("device.desc")?)?;
//! for issue in &report.unusable {
//!     eprintln!("warning: {}", issue);
//! }
//! for name in registry.message_types("device") {
//!     println!("{}", name);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod build;
mod types;

use crate::error::{DecodeError, LoadError};
use build::SchemaGraph;
use prost::Message;
use prost_reflect::DescriptorPool;
use prost_types::FileDescriptorSet;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

pub use types::{EnumType, EnumValueDef, FieldDef, FieldKind, Label, MessageType, ScalarKind};

/// Summary of a completed load
#[derive(Debug, Clone)]
pub struct LoadReport {
    /// Name the descriptor was registered under
    pub descriptor_name: String,
    /// Number of listable message types
    pub message_count: usize,
    /// Non-fatal problems; affected types are kept but cannot be decoded
    pub unusable: Vec<LoadError>,
    /// Content fingerprint of the loaded bytes
    pub fingerprint: String,
    /// True if an entry with the same name was replaced
    pub replaced: bool,
}

/// One parsed descriptor set
#[derive(Debug)]
pub struct DescriptorEntry {
    name: String,
    graph: SchemaGraph,
    listing: Vec<usize>,
    fingerprint: String,
    pool: Option<DescriptorPool>,
}

impl DescriptorEntry {
    /// Parse a serialized `FileDescriptorSet`
    pub fn parse(name: impl Into<String>, data: &[u8]) -> Result<Self, LoadError> {
        let name = name.into();
        let set = FileDescriptorSet::decode(data)?;
        if set.file.is_empty() {
            return Err(LoadError::malformed("descriptor set contains no files"));
        }

        let graph = SchemaGraph::build(&set);
        let listing = graph.listing();

        // A fully linked set also gets a reflection pool for hosts that want one
        let pool = match DescriptorPool::from_file_descriptor_set(set) {
            Ok(pool) => Some(pool),
            Err(e) => {
                debug!("Descriptor '{}' does not link as a whole: {}", name, e);
                None
            }
        };

        Ok(Self {
            name,
            graph,
            listing,
            fingerprint: fingerprint(data),
            pool,
        })
    }

    /// Returns the registered name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the content fingerprint (16 hex chars of blake3)
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Qualified names of listable message types.
    ///
    /// Declaration order within the set, grouped by package. Synthetic map
    /// entry types are omitted.
    pub fn message_types(&self) -> Vec<&str> {
        self.listing
            .iter()
            .map(|&i| self.graph.messages[i].full_name.as_str())
            .collect()
    }

    /// Types eligible for auto-detection: listable and fully resolved
    pub fn candidates(&self) -> impl Iterator<Item = &MessageType> + '_ {
        self.listing
            .iter()
            .map(move |&i| &self.graph.messages[i])
            .filter(|m| m.is_usable())
    }

    /// Looks up a message type; a leading dot is accepted
    pub fn message(&self, type_name: &str) -> Option<&MessageType> {
        self.message_index(type_name).map(|i| &self.graph.messages[i])
    }

    /// Looks up an enum type; a leading dot is accepted
    pub fn enum_type(&self, type_name: &str) -> Option<&EnumType> {
        let type_name = type_name.strip_prefix('.').unwrap_or(type_name);
        self.graph
            .enum_index
            .get(type_name)
            .map(|&i| &self.graph.enums[i])
    }

    /// Non-fatal problems found while building the entry
    pub fn issues(&self) -> &[LoadError] {
        &self.graph.issues
    }

    /// Reflection pool, present only when the whole set links
    pub fn pool(&self) -> Option<&DescriptorPool> {
        self.pool.as_ref()
    }

    fn message_index(&self, type_name: &str) -> Option<usize> {
        let type_name = type_name.strip_prefix('.').unwrap_or(type_name);
        self.graph.message_index.get(type_name).copied()
    }
}

/// A message type pinned to the entry it was resolved from
#[derive(Debug, Clone)]
pub struct ResolvedMessage {
    entry: Arc<DescriptorEntry>,
    index: usize,
}

impl ResolvedMessage {
    /// Resolve `type_name` within an entry snapshot
    pub fn new(entry: Arc<DescriptorEntry>, type_name: &str) -> Result<Self, DecodeError> {
        let index = entry
            .message_index(type_name)
            .ok_or_else(|| DecodeError::TypeNotFound {
                descriptor: entry.name.clone(),
                type_name: type_name.to_string(),
            })?;

        let message = &entry.graph.messages[index];
        if !message.is_usable() {
            return Err(DecodeError::UnresolvedType {
                type_name: message.full_name.clone(),
                missing: message.problems.clone(),
            });
        }

        Ok(Self { entry, index })
    }

    /// The resolved message type
    pub fn message(&self) -> &MessageType {
        &self.entry.graph.messages[self.index]
    }

    /// The entry the type belongs to
    pub fn entry(&self) -> &DescriptorEntry {
        &self.entry
    }
}

/// Registry of named descriptor sets
#[derive(Debug, Default)]
pub struct DescriptorRegistry {
    entries: RwLock<HashMap<String, Arc<DescriptorEntry>>>,
}

impl DescriptorRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and register a descriptor set, replacing any entry with this name.
    ///
    /// Fails only if the payload cannot be parsed at all. Types with
    /// unresolvable references are kept, flagged, and listed in the report.
    pub fn load(&self, name: impl Into<String>, data: &[u8]) -> Result<LoadReport, LoadError> {
        let name = name.into();
        let entry = Arc::new(DescriptorEntry::parse(name.clone(), data)?);

        for issue in entry.issues() {
            warn!("descriptor '{}': {}", name, issue);
        }

        let report = LoadReport {
            descriptor_name: name.clone(),
            message_count: entry.listing.len(),
            unusable: entry.issues().to_vec(),
            fingerprint: entry.fingerprint.clone(),
            replaced: false,
        };

        let previous = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), entry);

        match &previous {
            Some(old) if old.fingerprint == report.fingerprint => {
                debug!("Reloaded descriptor '{}' with identical content", name)
            }
            Some(_) => info!("Replaced descriptor '{}' ({} message types)", name, report.message_count),
            None => info!("Loaded descriptor '{}' ({} message types)", name, report.message_count),
        }

        Ok(LoadReport {
            replaced: previous.is_some(),
            ..report
        })
    }

    /// Drop an entry; returns true if it existed
    pub fn remove(&self, name: &str) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    /// Registered descriptor names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Snapshot of one entry
    pub fn entry(&self, name: &str) -> Option<Arc<DescriptorEntry>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Qualified message type names of one entry (empty if not loaded)
    pub fn message_types(&self, name: &str) -> Vec<String> {
        self.entry(name)
            .map(|entry| {
                entry
                    .message_types()
                    .into_iter()
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Resolve a usable message type
    pub fn resolve(&self, name: &str, type_name: &str) -> Result<ResolvedMessage, DecodeError> {
        let entry = self
            .entry(name)
            .ok_or_else(|| DecodeError::DescriptorNotFound {
                name: name.to_string(),
            })?;
        ResolvedMessage::new(entry, type_name)
    }
}

/// Short content hash (first 16 hex chars of blake3)
fn fingerprint(data: &[u8]) -> String {
    let hash = blake3::hash(data);
    hash.to_hex()[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use pretty_assertions::assert_eq;
    use prost_types::field_descriptor_proto::Type;

    #[test]
    fn test_message_types_listing() {
        let registry = testing::registry();
        assert_eq!(
            registry.message_types("demo"),
            vec![
                "demo.Point",
                "demo.User",
                "demo.Ping",
                "demo.Envelope",
                "demo.Envelope.Header",
                "demo.Numbers",
                "T",
            ]
        );
        assert!(registry.message_types("missing").is_empty());
    }

    #[test]
    fn test_resolve_fields() {
        let registry = testing::registry();
        let user = registry.resolve("demo", "demo.User").unwrap();
        let user = user.message();
        assert_eq!(user.name(), "User");
        assert_eq!(user.field(1).unwrap().kind, FieldKind::Scalar(ScalarKind::Int32));
        assert_eq!(user.field(3).unwrap().kind, FieldKind::Enum("demo.Status".into()));
        assert_eq!(user.field(4).unwrap().label, Label::Repeated);
        assert_eq!(user.field(5).unwrap().kind, FieldKind::Message("demo.Point".into()));

        let counters = user.field_by_name("counters").unwrap();
        assert_eq!(counters.label, Label::Map);
        assert_eq!(
            counters.kind,
            FieldKind::Message("demo.User.CountersEntry".into())
        );

        // Leading dot accepted, map entries resolvable but not listed
        assert!(registry.resolve("demo", ".demo.User.CountersEntry").is_ok());
    }

    #[test]
    fn test_resolve_errors() {
        let registry = testing::registry();
        assert_eq!(
            registry.resolve("nope", "demo.User").unwrap_err(),
            DecodeError::DescriptorNotFound { name: "nope".into() }
        );
        assert!(matches!(
            registry.resolve("demo", "demo.Nope"),
            Err(DecodeError::TypeNotFound { .. })
        ));
    }

    #[test]
    fn test_unresolved_references_are_flagged_not_fatal() {
        let file = testing::file(
            "broken.proto",
            "broken",
            vec![
                testing::message(
                    "Good",
                    vec![testing::field("id", 1, Type::Int32, false, None)],
                ),
                testing::message(
                    "Bad",
                    vec![testing::field("ghost", 1, Type::Message, false, Some(".broken.Ghost"))],
                ),
                testing::message(
                    "Outer",
                    vec![testing::field("bad", 1, Type::Message, false, Some(".broken.Bad"))],
                ),
            ],
            vec![],
        );
        let registry = DescriptorRegistry::new();
        let report = registry.load("broken", &testing::encode_set(vec![file])).unwrap();

        assert_eq!(report.message_count, 3);
        assert!(report.unusable.contains(&LoadError::UnresolvedReference {
            type_name: "broken.Bad".into(),
            reference: ".broken.Ghost".into(),
        }));
        assert!(report.unusable.contains(&LoadError::UnresolvedReference {
            type_name: "broken.Outer".into(),
            reference: "broken.Bad".into(),
        }));

        assert!(registry.resolve("broken", "broken.Good").is_ok());
        assert!(matches!(
            registry.resolve("broken", "broken.Outer"),
            Err(DecodeError::UnresolvedType { .. })
        ));

        let entry = registry.entry("broken").unwrap();
        let candidates: Vec<_> = entry.candidates().map(|m| m.full_name.as_str()).collect();
        assert_eq!(candidates, vec!["broken.Good"]);
        assert!(entry.pool().is_none());
    }

    #[test]
    fn test_duplicate_field_numbers_flag_type() {
        let file = testing::file(
            "dup.proto",
            "dup",
            vec![testing::message(
                "Dup",
                vec![
                    testing::field("a", 1, Type::Int32, false, None),
                    testing::field("b", 1, Type::String, false, None),
                ],
            )],
            vec![],
        );
        let registry = DescriptorRegistry::new();
        let report = registry.load("dup", &testing::encode_set(vec![file])).unwrap();
        assert!(matches!(report.unusable[0], LoadError::MalformedDescriptor { .. }));
        assert!(registry.resolve("dup", "dup.Dup").is_err());
    }

    #[test]
    fn test_malformed_payload_is_rejected() {
        let registry = DescriptorRegistry::new();
        assert!(matches!(
            registry.load("junk", &[0x0A, 0x10, 0x01]),
            Err(LoadError::MalformedDescriptor { .. })
        ));
        assert!(matches!(
            registry.load("empty", &[]),
            Err(LoadError::MalformedDescriptor { .. })
        ));
        assert!(registry.names().is_empty());
    }

    #[test]
    fn test_reload_replaces_wholesale() {
        let registry = testing::registry();
        let before = registry.entry("demo").unwrap();

        let other = testing::file(
            "other.proto",
            "other",
            vec![testing::message(
                "Only",
                vec![testing::field("x", 1, Type::Int32, false, None)],
            )],
            vec![],
        );
        let report = registry.load("demo", &testing::encode_set(vec![other])).unwrap();

        assert!(report.replaced);
        assert_eq!(registry.message_types("demo"), vec!["other.Only"]);
        // Readers holding the old snapshot still see it intact
        assert!(before.message("demo.User").is_some());
        assert_ne!(before.fingerprint(), report.fingerprint);
    }

    #[test]
    fn test_remove_and_names() {
        let registry = testing::registry();
        assert_eq!(registry.names(), vec!["demo".to_string()]);
        assert!(registry.remove("demo"));
        assert!(!registry.remove("demo"));
        assert!(registry.entry("demo").is_none());
    }

    #[test]
    fn test_linked_set_has_pool() {
        let registry = testing::registry();
        let entry = registry.entry("demo").unwrap();
        let pool = entry.pool().unwrap();
        assert!(pool.get_message_by_name("demo.User").is_some());
        assert_eq!(entry.fingerprint().len(), 16);
    }
}
