//! # protolens-core
//!
//! An engine for inspecting opaque Protocol Buffer blobs, with or without a
//! schema.
//!
//! This crate provides the core functionality for:
//! - Tokenizing raw bytes as protobuf wire format
//! - Loading compiled `FileDescriptorSet`s and indexing their message types
//! - Decoding a blob into a named, typed tree against a message type
//! - Guessing which message type best explains an undeclared blob
//! - Rendering decoded trees as stable text or JSON
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`wire`]: Schema-less wire format scanning
//! - [`registry`]: Descriptor set loading and type lookup
//! - [`decode`]: Schema-guided decoding
//! - [`classify`]: Auto-detection of the message type
//! - [`mapping`]: Column-driven type selection
//! - [`format`]: Text rendering
//! - [`inspect`]: The end-to-end flow and per-cell state
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use protolens_core::{DescriptorRegistry, Formatter, InspectRequest, Inspector};
//! use std::fs;
//!
//! let registry = DescriptorRegistry::new();
//! registry.load("app", &fs::read("app.desc")?)?;
//!
//! let blob = fs::read("blob.bin")?;
//! let inspection = Inspector::new(&registry)
//!     .inspect(&blob, &InspectRequest::new().descriptor("app"))?;
//!
//! println!("{}", inspection.render(&Formatter::new()));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod classify;
pub mod decode;
pub mod error;
pub mod format;
pub mod inspect;
pub mod mapping;
pub mod registry;
pub mod wire;

#[cfg(test)]
mod testing;

// Re-export primary types for convenience
pub use classify::{ClassificationResult, ClassifierConfig, TypeClassifier};
pub use decode::{DecodedMessage, DecodedValue, DecoderConfig, SchemaDecoder};
pub use error::{DecodeError, Error, LoadError, Result, ScanError};
pub use format::{hex_dump, Formatter, FormatterConfig};
pub use inspect::{CellState, InspectRequest, Inspection, InspectionView, Inspector, TypeSource};
pub use mapping::ColumnTypeMapping;
pub use registry::{DescriptorEntry, DescriptorRegistry, LoadReport, MessageType};
pub use wire::{decode_base64, looks_like_protobuf, RawRecord, ScannerConfig, WireMessage, WireScanner};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum valid protobuf field number (2^29 - 1)
pub const MAX_FIELD_NUMBER: u32 = 536_870_911;
