//! End-to-end inspection of one blob.
//!
//! [`Inspector`] chooses the message type for a blob with a fixed
//! precedence: an explicit manual choice, then a column mapping, then the
//! classifier. When none applies the schema-less wire tree is returned. The
//! per-cell lifecycle is modelled by [`CellState`], a plain value the host
//! drives through explicit transitions.

use crate::classify::TypeClassifier;
use crate::decode::{DecodedValue, DecoderConfig, SchemaDecoder};
use crate::error::{DecodeError, Error, Result};
use crate::format::Formatter;
use crate::mapping::ColumnTypeMapping;
use crate::registry::{DescriptorRegistry, ResolvedMessage};
use crate::wire::{WireMessage, WireScanner};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use tracing::debug;

/// What the caller knows about the blob
#[derive(Debug, Clone, Default)]
pub struct InspectRequest {
    /// Registered descriptor to decode against
    pub descriptor: Option<String>,
    /// Type chosen by the user; always wins
    pub manual_type: Option<String>,
    /// Column mapping rule and the row it is evaluated on
    pub mapping: Option<(ColumnTypeMapping, Map<String, JsonValue>)>,
}

impl InspectRequest {
    /// Creates a request with no schema information
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode against a registered descriptor
    pub fn descriptor(mut self, name: impl Into<String>) -> Self {
        self.descriptor = Some(name.into());
        self
    }

    /// Use an explicit message type
    pub fn manual_type(mut self, type_name: impl Into<String>) -> Self {
        self.manual_type = Some(type_name.into());
        self
    }

    /// Select the type through a column mapping evaluated on `row`
    pub fn mapping(mut self, mapping: ColumnTypeMapping, row: Map<String, JsonValue>) -> Self {
        self.mapping = Some((mapping, row));
        self
    }
}

/// How the message type of an inspection was chosen
#[derive(Debug, Clone, PartialEq)]
pub enum TypeSource {
    /// Chosen explicitly by the caller
    Manual,
    /// Selected by a column mapping
    Mapped,
    /// Picked by the classifier
    Detected {
        /// Classifier confidence in `[0, 1]`
        confidence: f64,
    },
    /// No type; schema-less wire view
    WireFormat,
}

impl fmt::Display for TypeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSource::Manual => write!(f, "manual"),
            TypeSource::Mapped => write!(f, "mapped"),
            TypeSource::Detected { confidence } => write!(f, "detected ({:.2})", confidence),
            TypeSource::WireFormat => write!(f, "wire format"),
        }
    }
}

/// The decoded content of an inspection
#[derive(Debug, Clone, PartialEq)]
pub enum InspectionView {
    /// Decoded against a message type
    Typed(DecodedValue),
    /// Schema-less interpretation
    Wire(WireMessage),
}

/// Result of inspecting one blob
#[derive(Debug, Clone, PartialEq)]
pub struct Inspection {
    /// How the type was chosen
    pub source: TypeSource,
    /// Decoded content
    pub view: InspectionView,
}

impl Inspection {
    /// Qualified type name, if decoded against a schema
    pub fn type_name(&self) -> Option<&str> {
        match &self.view {
            InspectionView::Typed(value) => value.as_message().map(|m| m.type_name.as_str()),
            InspectionView::Wire(_) => None,
        }
    }

    /// Render the view as text
    pub fn render(&self, formatter: &Formatter) -> String {
        match &self.view {
            InspectionView::Typed(value) => formatter.format(value),
            InspectionView::Wire(message) => formatter.format_wire(message),
        }
    }

    /// Render the view as JSON
    pub fn to_json(&self) -> JsonValue {
        match &self.view {
            InspectionView::Typed(value) => value.to_json(),
            InspectionView::Wire(message) => message.to_json(),
        }
    }
}

/// Runs the full type selection and decode flow against a registry
#[derive(Debug, Clone)]
pub struct Inspector<'a> {
    registry: &'a DescriptorRegistry,
    classifier: TypeClassifier,
    scanner: WireScanner,
    decoder_config: DecoderConfig,
}

impl<'a> Inspector<'a> {
    /// Creates an inspector with default components
    pub fn new(registry: &'a DescriptorRegistry) -> Self {
        Self {
            registry,
            classifier: TypeClassifier::new(),
            scanner: WireScanner::new(),
            decoder_config: DecoderConfig::default(),
        }
    }

    /// Sets the classifier used for auto-detection
    pub fn classifier(mut self, classifier: TypeClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Sets the scanner used for the wire view
    pub fn scanner(mut self, scanner: WireScanner) -> Self {
        self.scanner = scanner;
        self
    }

    /// Sets the schema decoder configuration
    pub fn decoder_config(mut self, config: DecoderConfig) -> Self {
        self.decoder_config = config;
        self
    }

    /// Inspect `data` as described by `request`
    pub fn inspect(&self, data: &[u8], request: &InspectRequest) -> Result<Inspection> {
        let Some(descriptor) = request.descriptor.as_deref() else {
            return self.wire_view(data);
        };
        let entry = self
            .registry
            .entry(descriptor)
            .ok_or_else(|| DecodeError::DescriptorNotFound {
                name: descriptor.to_string(),
            })?;

        if let Some(type_name) = &request.manual_type {
            let resolved = ResolvedMessage::new(entry, type_name)?;
            return self.typed_view(data, &resolved, TypeSource::Manual);
        }

        if let Some((mapping, row)) = &request.mapping {
            if let Some(type_name) = mapping.resolve(row) {
                debug!("Column '{}' maps to {}", mapping.source_column, type_name);
                let resolved = ResolvedMessage::new(entry, type_name)?;
                return self.typed_view(data, &resolved, TypeSource::Mapped);
            }
        }

        match self.classifier.classify_entry(data, &entry)? {
            Some(result) => Ok(Inspection {
                source: TypeSource::Detected {
                    confidence: result.confidence,
                },
                view: InspectionView::Typed(result.decoded),
            }),
            None => self.wire_view(data),
        }
    }

    /// Advance a cell: start detection and settle it with the outcome
    pub fn run(&self, state: CellState, data: &[u8], request: &InspectRequest) -> CellState {
        state.begin().finish(self.inspect(data, request))
    }

    fn typed_view(
        &self,
        data: &[u8],
        resolved: &ResolvedMessage,
        source: TypeSource,
    ) -> Result<Inspection> {
        let decoder = SchemaDecoder::with_config(resolved.entry(), self.decoder_config.clone());
        let value = decoder.decode_bytes(data, resolved.message())?;
        Ok(Inspection {
            source,
            view: InspectionView::Typed(value),
        })
    }

    fn wire_view(&self, data: &[u8]) -> Result<Inspection> {
        Ok(Inspection {
            source: TypeSource::WireFormat,
            view: InspectionView::Wire(self.scanner.scan_tree(data)?),
        })
    }
}

/// Decode state of one inspected cell
#[derive(Debug, Default)]
pub enum CellState {
    /// Nothing requested yet
    #[default]
    Idle,
    /// An inspection is in flight
    Detecting,
    /// The last inspection succeeded
    Decoded(Inspection),
    /// The last inspection failed; the hex view still applies
    Failed(Error),
}

impl CellState {
    /// Start an inspection; supersedes whatever the cell showed
    pub fn begin(self) -> Self {
        CellState::Detecting
    }

    /// Settle an in-flight inspection.
    ///
    /// Outside `Detecting` the outcome is stale and the state is kept.
    pub fn finish(self, outcome: Result<Inspection>) -> Self {
        match self {
            CellState::Detecting => match outcome {
                Ok(inspection) => CellState::Decoded(inspection),
                Err(e) => CellState::Failed(e),
            },
            other => {
                debug!("Ignoring stale inspection outcome in state {}", other.label());
                other
            }
        }
    }

    /// Back to idle
    pub fn reset(self) -> Self {
        CellState::Idle
    }

    /// Returns true unless an inspection is in flight
    pub fn is_settled(&self) -> bool {
        !matches!(self, CellState::Detecting)
    }

    /// Short state name
    pub fn label(&self) -> &'static str {
        match self {
            CellState::Idle => "idle",
            CellState::Detecting => "detecting",
            CellState::Decoded(_) => "decoded",
            CellState::Failed(_) => "failed",
        }
    }
}
