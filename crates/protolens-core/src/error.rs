//! Error types for the protolens-core library.
//!
//! The engine reports three families of failure, each as its own tagged enum:
//!
//! - [`ScanError`]: the bytes are not protobuf wire format at all
//! - [`LoadError`]: a descriptor set is malformed or partially unresolvable
//! - [`DecodeError`]: a requested descriptor or message type cannot be used
//!
//! Schema mismatches are deliberately absent: the schema decoder degrades
//! individual fields instead of failing.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for protolens operations
pub type Result<T> = std::result::Result<T, Error>;

/// Structural failures while tokenizing wire format
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ScanError {
    /// A declared length or fixed-width value runs past the end of the buffer
    #[error("truncated input at offset {offset}: {details}")]
    Truncated {
        /// Byte offset of the record that could not be completed
        offset: usize,
        /// What was being read
        details: String,
    },

    /// Wire type outside the supported set (0, 1, 2, 5)
    #[error("invalid wire type {wire_type} at offset {offset}")]
    InvalidWireType {
        /// Byte offset of the offending tag
        offset: usize,
        /// The raw wire type bits
        wire_type: u8,
    },

    /// Field number 0 or above the protobuf maximum
    #[error("invalid field number {number} at offset {offset}")]
    InvalidFieldNumber {
        /// Byte offset of the offending tag
        offset: usize,
        /// The decoded field number
        number: u64,
    },

    /// A varint longer than ten bytes
    #[error("malformed varint at offset {offset}")]
    MalformedVarint {
        /// Byte offset where the varint starts
        offset: usize,
    },

    /// No input was supplied at the text boundary
    #[error("no input to inspect")]
    EmptyInput,

    /// Transport text was not valid base64
    #[error("invalid base64 input: {0}")]
    InvalidBase64(String),
}

impl ScanError {
    /// Creates a new truncation error
    pub fn truncated(offset: usize, details: impl Into<String>) -> Self {
        Self::Truncated {
            offset,
            details: details.into(),
        }
    }

    /// Returns the byte offset the error refers to, if any
    pub fn offset(&self) -> Option<usize> {
        match self {
            Self::Truncated { offset, .. }
            | Self::InvalidWireType { offset, .. }
            | Self::InvalidFieldNumber { offset, .. }
            | Self::MalformedVarint { offset } => Some(*offset),
            Self::EmptyInput | Self::InvalidBase64(_) => None,
        }
    }

    /// Shifts the reported offset by `base`, used when scanning a sub-slice
    pub(crate) fn rebase(self, base: usize) -> Self {
        match self {
            Self::Truncated { offset, details } => Self::Truncated {
                offset: offset + base,
                details,
            },
            Self::InvalidWireType { offset, wire_type } => Self::InvalidWireType {
                offset: offset + base,
                wire_type,
            },
            Self::InvalidFieldNumber { offset, number } => Self::InvalidFieldNumber {
                offset: offset + base,
                number,
            },
            Self::MalformedVarint { offset } => Self::MalformedVarint {
                offset: offset + base,
            },
            other => other,
        }
    }
}

/// Problems found while loading a descriptor set
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LoadError {
    /// The payload is not a decodable `FileDescriptorSet`, or a type inside it is inconsistent
    #[error("malformed descriptor: {details}")]
    MalformedDescriptor {
        /// Description of the problem
        details: String,
    },

    /// A field references a message or enum type that is not defined
    #[error("type '{type_name}' references unknown type '{reference}'")]
    UnresolvedReference {
        /// The message type holding the reference
        type_name: String,
        /// The reference that could not be resolved
        reference: String,
    },
}

impl LoadError {
    /// Creates a new malformed descriptor error
    pub fn malformed(details: impl Into<String>) -> Self {
        Self::MalformedDescriptor {
            details: details.into(),
        }
    }
}

impl From<prost::DecodeError> for LoadError {
    fn from(err: prost::DecodeError) -> Self {
        Self::malformed(err.to_string())
    }
}

/// Failures resolving the schema a blob should be decoded against
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecodeError {
    /// No descriptor set is registered under this name
    #[error("descriptor '{name}' is not loaded")]
    DescriptorNotFound {
        /// The requested descriptor name
        name: String,
    },

    /// The descriptor set has no message type with this name
    #[error("message type '{type_name}' not found in descriptor '{descriptor}'")]
    TypeNotFound {
        /// The descriptor that was searched
        descriptor: String,
        /// The requested type name
        type_name: String,
    },

    /// The type exists but depends on types that could not be resolved
    #[error("message type '{type_name}' is unusable: unresolved {}", missing.join(", "))]
    UnresolvedType {
        /// The requested type name
        type_name: String,
        /// The references that failed to resolve
        missing: Vec<String>,
    },
}

/// Top-level error type for all protolens operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Failed to read input file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Wire format could not be tokenized
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// Descriptor set could not be loaded
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Schema could not be resolved
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl Error {
    /// Creates a new file read error
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Returns true if the caller can still show the raw bytes
    ///
    /// Everything except an unreadable input file leaves a byte buffer the
    /// hex view can render.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::FileRead { .. })
    }
}
