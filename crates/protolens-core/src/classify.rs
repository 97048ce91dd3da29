//! Auto-detection of the message type behind an undeclared blob.
//!
//! The classifier scans the blob once, decodes it speculatively against
//! every candidate type of one descriptor entry and scores each decode with
//! the pure function [`score`]. The best candidate above the configured
//! floor wins; `None` means no type explains the bytes well enough and the
//! caller should fall back to the wire view.

use crate::decode::{DecodedMessage, DecodedValue, ScalarValue, SchemaDecoder};
use crate::error::{DecodeError, Result, ScanError};
use crate::registry::{DescriptorEntry, DescriptorRegistry};
use crate::wire::WireScanner;
use tracing::{debug, trace};

/// Scoring weights and acceptance floor
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Penalty scaled by the share of unknown records
    pub unknown_penalty: f64,
    /// Penalty scaled by the share of values failing a sanity check
    pub sanity_penalty: f64,
    /// Reward scaled by the share of cleanly decoded messages and enums
    pub clean_reward: f64,
    /// Minimum score a candidate needs to be reported
    pub min_confidence: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            unknown_penalty: 1.0,
            sanity_penalty: 0.5,
            clean_reward: 0.25,
            min_confidence: 0.5,
        }
    }
}

impl ClassifierConfig {
    /// Creates a new config with default weights
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the unknown-record penalty
    pub fn unknown_penalty(mut self, weight: f64) -> Self {
        self.unknown_penalty = weight;
        self
    }

    /// Sets the sanity-check penalty
    pub fn sanity_penalty(mut self, weight: f64) -> Self {
        self.sanity_penalty = weight;
        self
    }

    /// Sets the clean nested value reward
    pub fn clean_reward(mut self, weight: f64) -> Self {
        self.clean_reward = weight;
        self
    }

    /// Sets the acceptance floor
    pub fn min_confidence(mut self, floor: f64) -> Self {
        self.min_confidence = floor;
        self
    }
}

/// Counts gathered from one decoded tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Every decoded value, unknown and superseded records included
    pub total: usize,
    /// Records the schema could not explain
    pub unknown: usize,
    /// Singular scalar records replaced by a later occurrence
    pub superseded: usize,
    /// Strings that are not UTF-8 and enum numbers without a name
    pub sanity_failures: usize,
    /// Embedded messages with a clean subtree, and named enum values
    pub clean: usize,
}

impl DecodeStats {
    /// Walk a decoded message and count its values at every depth
    pub fn collect(message: &DecodedMessage) -> Self {
        let mut stats = Self::default();
        stats.visit_fields(message);
        stats
    }

    /// Values that decoded as their declared kind
    pub fn decoded(&self) -> usize {
        self.total - self.unknown
    }

    fn visit_fields(&mut self, message: &DecodedMessage) -> bool {
        self.total += message.superseded;
        self.superseded += message.superseded;
        let mut clean = true;
        for field in &message.fields {
            clean &= self.visit(&field.value);
        }
        clean
    }

    /// Returns true if the subtree had no unknown records or sanity failures
    fn visit(&mut self, value: &DecodedValue) -> bool {
        match value {
            DecodedValue::Unknown(_) => {
                self.total += 1;
                self.unknown += 1;
                false
            }
            DecodedValue::Scalar { value, .. } => {
                self.total += 1;
                if matches!(value, ScalarValue::InvalidUtf8(_)) {
                    self.sanity_failures += 1;
                    false
                } else {
                    true
                }
            }
            DecodedValue::Enum { name, .. } => {
                self.total += 1;
                if name.is_some() {
                    self.clean += 1;
                    true
                } else {
                    self.sanity_failures += 1;
                    false
                }
            }
            DecodedValue::Message(message) => {
                self.total += 1;
                let clean = self.visit_fields(message);
                if clean {
                    self.clean += 1;
                }
                clean
            }
            DecodedValue::List(items) => items
                .iter()
                .fold(true, |clean, item| self.visit(item) && clean),
            DecodedValue::Map(entries) => entries.iter().fold(true, |clean, entry| {
                self.total += 1;
                let key = self.visit_map_part(&entry.key);
                let value = self.visit_map_part(&entry.value);
                key && value && clean
            }),
        }
    }

    /// Map keys and values are counted through their entry, not on their own
    fn visit_map_part(&mut self, value: &DecodedValue) -> bool {
        let total = self.total;
        let clean = self.visit(value);
        if matches!(value, DecodedValue::Scalar { .. }) {
            self.total = total;
        }
        clean
    }
}

/// Score a decode: 1.0 minus weighted penalties plus the clean reward.
///
/// The result is unclamped so that ranking can still tell strong candidates
/// apart; it is zero for an empty tree.
pub fn score(stats: &DecodeStats, config: &ClassifierConfig) -> f64 {
    if stats.total == 0 {
        return 0.0;
    }
    let total = stats.total as f64;
    1.0 - config.unknown_penalty * (stats.unknown as f64 / total)
        - config.sanity_penalty * (stats.sanity_failures as f64 / total)
        + config.clean_reward * (stats.clean as f64 / total)
}

/// One scored candidate
#[derive(Debug, Clone)]
pub struct CandidateScore {
    /// Qualified type name
    pub type_name: String,
    /// Raw score from [`score`]
    pub score: f64,
    /// Counts the score was computed from
    pub stats: DecodeStats,
}

/// Outcome of a successful auto-detection
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    /// Qualified name of the winning type
    pub type_name: String,
    /// Score clamped to `[0, 1]`
    pub confidence: f64,
    /// The blob decoded as the winning type
    pub decoded: DecodedValue,
}

/// Picks the most plausible message type for a blob
#[derive(Debug, Clone, Default)]
pub struct TypeClassifier {
    scanner: WireScanner,
    config: ClassifierConfig,
}

impl TypeClassifier {
    /// Creates a classifier with default weights
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a classifier with custom weights
    pub fn with_config(config: ClassifierConfig) -> Self {
        Self {
            scanner: WireScanner::new(),
            config,
        }
    }

    /// Returns the active configuration
    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Classify `data` against the candidates of a registered descriptor.
    ///
    /// Fails if the descriptor is not loaded or the bytes do not scan as wire
    /// format. `Ok(None)` means no candidate cleared the floor.
    pub fn classify(
        &self,
        data: &[u8],
        registry: &DescriptorRegistry,
        descriptor_name: &str,
    ) -> Result<Option<ClassificationResult>> {
        let entry = registry
            .entry(descriptor_name)
            .ok_or_else(|| DecodeError::DescriptorNotFound {
                name: descriptor_name.to_string(),
            })?;
        Ok(self.classify_entry(data, &entry)?)
    }

    /// Classify `data` against the candidates of one entry
    pub fn classify_entry(
        &self,
        data: &[u8],
        entry: &DescriptorEntry,
    ) -> std::result::Result<Option<ClassificationResult>, ScanError> {
        let records = self.scanner.scan(data)?;
        if records.is_empty() {
            return Ok(None);
        }

        let decoder = SchemaDecoder::new(entry);
        let mut best: Option<(CandidateScore, DecodedValue)> = None;

        for message in entry.candidates() {
            let decoded = decoder.decode(&records, message);
            let candidate = self.evaluate(&message.full_name, &decoded);
            trace!(
                "candidate {} scored {:.3} ({:?})",
                candidate.type_name,
                candidate.score,
                candidate.stats
            );

            let better = match &best {
                None => true,
                Some((current, _)) => outranks(&candidate, current),
            };
            if better {
                best = Some((candidate, decoded));
            }
        }

        let Some((winner, decoded)) = best else {
            debug!("No candidates in descriptor '{}'", entry.name());
            return Ok(None);
        };

        if winner.score < self.config.min_confidence {
            debug!(
                "Best candidate {} scored {:.3}, below floor {:.3}",
                winner.type_name, winner.score, self.config.min_confidence
            );
            return Ok(None);
        }

        debug!("Detected {} (score {:.3})", winner.type_name, winner.score);
        Ok(Some(ClassificationResult {
            type_name: winner.type_name,
            confidence: winner.score.clamp(0.0, 1.0),
            decoded,
        }))
    }

    /// Score every candidate, best first
    pub fn rank(
        &self,
        data: &[u8],
        entry: &DescriptorEntry,
    ) -> std::result::Result<Vec<CandidateScore>, ScanError> {
        let records = self.scanner.scan(data)?;
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let decoder = SchemaDecoder::new(entry);
        let mut scores: Vec<CandidateScore> = entry
            .candidates()
            .map(|message| self.evaluate(&message.full_name, &decoder.decode(&records, message)))
            .collect();

        // Stable sort keeps declaration order among equals
        scores.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.stats.decoded().cmp(&a.stats.decoded()))
        });
        Ok(scores)
    }

    fn evaluate(&self, type_name: &str, decoded: &DecodedValue) -> CandidateScore {
        let stats = decoded
            .as_message()
            .map(DecodeStats::collect)
            .unwrap_or_default();
        CandidateScore {
            type_name: type_name.to_string(),
            score: score(&stats, &self.config),
            stats,
        }
    }
}

/// Higher score wins; on a tie, more decoded values win
fn outranks(candidate: &CandidateScore, current: &CandidateScore) -> bool {
    if candidate.score != current.score {
        return candidate.score > current.score;
    }
    candidate.stats.decoded() > current.stats.decoded()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, encode_set, field, file, message, put_len, put_tag, put_varint};
    use pretty_assertions::assert_eq;
    use prost_reflect::Value;
    use prost_types::field_descriptor_proto::Type;

    #[test]
    fn test_score_function() {
        let config = ClassifierConfig::default();
        let clean = DecodeStats {
            total: 4,
            unknown: 0,
            superseded: 0,
            sanity_failures: 0,
            clean: 0,
        };
        assert_eq!(score(&clean, &config), 1.0);

        let noisy = DecodeStats {
            total: 4,
            unknown: 2,
            superseded: 0,
            sanity_failures: 1,
            clean: 0,
        };
        assert_eq!(score(&noisy, &config), 1.0 - 0.5 - 0.125);

        let nested = DecodeStats {
            total: 4,
            unknown: 0,
            superseded: 0,
            sanity_failures: 0,
            clean: 2,
        };
        assert!(score(&nested, &config) > score(&clean, &config));
        assert_eq!(score(&DecodeStats::default(), &config), 0.0);
    }

    #[test]
    fn test_more_matching_fields_win() {
        let registry = DescriptorRegistry::new();
        let set = encode_set(vec![file(
            "m.proto",
            "m",
            vec![
                message("T2", vec![field("a", 1, Type::Int32, false, None)]),
                message(
                    "T1",
                    vec![
                        field("a", 1, Type::Int32, false, None),
                        field("b", 2, Type::Int32, false, None),
                    ],
                ),
            ],
            vec![],
        )]);
        registry.load("m", &set).unwrap();

        let mut blob = Vec::new();
        put_tag(&mut blob, 1, 0);
        put_varint(&mut blob, 7);
        for i in 0..5 {
            put_tag(&mut blob, 2, 0);
            put_varint(&mut blob, i);
        }

        let result = TypeClassifier::new()
            .classify(&blob, &registry, "m")
            .unwrap()
            .unwrap();
        assert_eq!(result.type_name, "m.T1");
        assert_eq!(result.confidence, 1.0);

        let entry = registry.entry("m").unwrap();
        let ranked = TypeClassifier::new().rank(&blob, &entry).unwrap();
        assert_eq!(ranked[0].type_name, "m.T1");
        assert_eq!(
            ranked[0].stats,
            DecodeStats {
                total: 6,
                unknown: 0,
                superseded: 4,
                sanity_failures: 0,
                clean: 0,
            }
        );
        assert_eq!(ranked[1].type_name, "m.T2");
        assert_eq!(
            ranked[1].stats,
            DecodeStats {
                total: 6,
                unknown: 5,
                superseded: 0,
                sanity_failures: 0,
                clean: 0,
            }
        );
    }

    #[test]
    fn test_detects_nested_user() {
        let registry = testing::registry();
        let blob = testing::encode("demo.User", |m| {
            m.set_field_by_name("id", Value::I32(42));
            m.set_field_by_name("name", Value::String("ada".into()));
            m.set_field_by_name("status", Value::EnumNumber(1));
            m.set_field_by_name("tags", Value::List(vec![Value::String("x".into())]));
        });

        let result = TypeClassifier::new()
            .classify(&blob, &registry, "demo")
            .unwrap()
            .unwrap();
        assert_eq!(result.type_name, "demo.User");
        assert_eq!(result.confidence, 1.0);
        let decoded = result.decoded.as_message().unwrap();
        assert_eq!(decoded.type_name, "demo.User");
        assert!(decoded.get("name").is_some());
    }

    #[test]
    fn test_empty_blob_and_floor() {
        let registry = testing::registry();
        let classifier = TypeClassifier::new();
        assert_eq!(classifier.classify(&[], &registry, "demo").unwrap(), None);

        // Only fields no demo type defines
        let mut blob = Vec::new();
        put_len(&mut blob, 200, b"\xff\xfe");
        put_tag(&mut blob, 201, 0);
        put_varint(&mut blob, 1);
        assert_eq!(classifier.classify(&blob, &registry, "demo").unwrap(), None);

        let lenient = TypeClassifier::with_config(ClassifierConfig::new().min_confidence(-1.0));
        assert!(lenient.classify(&blob, &registry, "demo").unwrap().is_some());
    }

    #[test]
    fn test_classify_errors() {
        let registry = testing::registry();
        let classifier = TypeClassifier::new();
        assert!(matches!(
            classifier.classify(&[0x08], &registry, "demo"),
            Err(crate::Error::Scan(ScanError::Truncated { .. }))
        ));
        assert!(matches!(
            classifier.classify(&[0x08, 0x01], &registry, "missing"),
            Err(crate::Error::Decode(DecodeError::DescriptorNotFound { .. }))
        ));
    }

    #[test]
    fn test_superseded_scalars_count_as_decoded() {
        let registry = DescriptorRegistry::new();
        let set = encode_set(vec![file(
            "s.proto",
            "s",
            vec![
                message("Wide", vec![field("a", 1, Type::Int32, true, None)]),
                message("Narrow", vec![field("a", 1, Type::Int32, false, None)]),
            ],
            vec![],
        )]);
        registry.load("s", &set).unwrap();

        let mut blob = Vec::new();
        for i in 0..3 {
            put_tag(&mut blob, 1, 0);
            put_varint(&mut blob, i);
        }

        let entry = registry.entry("s").unwrap();
        let ranked = TypeClassifier::new().rank(&blob, &entry).unwrap();
        let narrow = ranked.iter().find(|c| c.type_name == "s.Narrow").unwrap();
        assert_eq!(narrow.stats.superseded, 2);
        assert_eq!(narrow.stats.decoded(), 3);
        let wide = ranked.iter().find(|c| c.type_name == "s.Wide").unwrap();
        assert_eq!(wide.stats.superseded, 0);
        assert_eq!(wide.stats.decoded(), 3);
        assert_eq!(narrow.score, wide.score);
    }

    #[test]
    fn test_stats_walk() {
        let registry = testing::registry();
        let entry = registry.entry("demo").unwrap();
        let user = entry.message("demo.User").unwrap();

        let mut blob = Vec::new();
        put_len(&mut blob, 2, b"\xff");
        put_tag(&mut blob, 3, 0);
        put_varint(&mut blob, 9);
        let mut point = Vec::new();
        put_tag(&mut point, 1, 0);
        put_varint(&mut point, 1);
        put_len(&mut blob, 5, &point);
        put_tag(&mut blob, 99, 0);
        put_varint(&mut blob, 1);

        let decoded = SchemaDecoder::new(&entry).decode_bytes(&blob, user).unwrap();
        let stats = DecodeStats::collect(decoded.as_message().unwrap());
        assert_eq!(
            stats,
            DecodeStats {
                total: 5,
                unknown: 1,
                superseded: 0,
                sanity_failures: 2,
                clean: 1,
            }
        );
    }
}
