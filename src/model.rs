// 🧱 Data Model - Raw records in, canonical insurers out
//
// RawRecord is one source's view of one insurer, already mapped into a single
// canonical shape by its adapter. InsurerEntity is the merged result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::identity::CanonicalIdentity;

// ============================================================================
// SOURCE KIND
// ============================================================================

/// The five public registries feeding a build
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Regulator's company registry (names, segments, premiums)
    Regulatory,

    /// Solvency / capital filings
    Solvency,

    /// Open-insurance participant directory
    Participants,

    /// Open-insurance product catalog
    Products,

    /// Consumer-complaint statistics
    Complaints,
}

impl SourceKind {
    pub const ALL: [SourceKind; 5] = [
        SourceKind::Regulatory,
        SourceKind::Solvency,
        SourceKind::Participants,
        SourceKind::Products,
        SourceKind::Complaints,
    ];

    /// Stable key used in config and in the artifact
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Regulatory => "regulatory",
            SourceKind::Solvency => "solvency",
            SourceKind::Participants => "participants",
            SourceKind::Products => "products",
            SourceKind::Complaints => "complaints",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// COMPONENT VALUE
// ============================================================================

/// One reported reading of a score component, before normalisation.
///
/// Sources have published the same signal in two shapes over time: a legacy
/// flat number already on 0-100, and a structured object carrying a raw value
/// on its own scale. Absence is modelled by the reading not existing at all.
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentValue {
    /// Legacy flat value, already on the common 0-100 scale
    Scalar(f64),

    /// Raw value on a source scale; `None` scale means "infer from magnitude"
    Structured { raw_value: f64, raw_scale: Option<f64> },

    /// Shape matched neither form
    Unrecognized,
}

impl ComponentValue {
    /// Map a wire value into a reading. `null` is absence, not a reading.
    pub fn from_json(value: &Value) -> Option<ComponentValue> {
        match value {
            Value::Null => None,
            Value::Number(n) => Some(match n.as_f64() {
                Some(v) if v.is_finite() => ComponentValue::Scalar(v),
                _ => ComponentValue::Unrecognized,
            }),
            Value::Object(map) => {
                let raw_value = map.get("raw_value").or_else(|| map.get("value"));
                let raw_scale = map.get("raw_scale").or_else(|| map.get("scale"));

                match (raw_value.and_then(Value::as_f64), raw_scale) {
                    (Some(v), None) | (Some(v), Some(Value::Null)) if v.is_finite() => {
                        Some(ComponentValue::Structured { raw_value: v, raw_scale: None })
                    }
                    (Some(v), Some(scale)) if v.is_finite() => match scale.as_f64() {
                        Some(s) if s > 0.0 => Some(ComponentValue::Structured {
                            raw_value: v,
                            raw_scale: Some(s),
                        }),
                        _ => Some(ComponentValue::Unrecognized),
                    },
                    _ => Some(ComponentValue::Unrecognized),
                }
            }
            _ => Some(ComponentValue::Unrecognized),
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, ComponentValue::Structured { .. })
    }
}

/// A component reading as reported by a source, under the source's own key
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentReading {
    pub key: String,
    pub value: ComponentValue,
}

// ============================================================================
// COMPLAINT STATISTICS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComplaintStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_rate: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub responded_rate: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub satisfaction_avg: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_response_days: Option<f64>,
}

// ============================================================================
// RAW RECORD
// ============================================================================

/// Canonical attribute shape every adapter maps into
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordAttributes {
    pub name: Option<String>,
    pub segment: Option<String>,
    pub flags: BTreeMap<String, bool>,
    pub components: Vec<ComponentReading>,
    pub premiums: Option<f64>,
    pub claims: Option<f64>,
    pub net_worth: Option<f64>,
    pub complaints: Option<ComplaintStats>,
}

/// One source's view of one insurer. Discarded after merge.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub source: SourceKind,
    pub raw_identity: String,
    pub retrieved_at: DateTime<Utc>,
    pub attributes: RecordAttributes,
}

impl RawRecord {
    pub fn new(source: SourceKind, raw_identity: impl Into<String>, retrieved_at: DateTime<Utc>) -> Self {
        RawRecord {
            source,
            raw_identity: raw_identity.into(),
            retrieved_at,
            attributes: RecordAttributes::default(),
        }
    }

    /// Builder: set name (blank names are ignored)
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        let trimmed = name.trim();
        if !trimmed.is_empty() {
            self.attributes.name = Some(trimmed.to_string());
        }
        self
    }

    pub fn with_segment(mut self, segment: impl Into<String>) -> Self {
        self.attributes.segment = Some(segment.into());
        self
    }

    pub fn with_flag(mut self, flag: impl Into<String>, value: bool) -> Self {
        self.attributes.flags.insert(flag.into(), value);
        self
    }

    pub fn with_component(mut self, key: impl Into<String>, value: ComponentValue) -> Self {
        self.attributes.components.push(ComponentReading {
            key: key.into(),
            value,
        });
        self
    }

    pub fn with_premiums(mut self, premiums: f64) -> Self {
        self.attributes.premiums = Some(premiums);
        self
    }

    pub fn with_claims(mut self, claims: f64) -> Self {
        self.attributes.claims = Some(claims);
        self
    }

    pub fn with_net_worth(mut self, net_worth: f64) -> Self {
        self.attributes.net_worth = Some(net_worth);
        self
    }

    pub fn with_complaints(mut self, stats: ComplaintStats) -> Self {
        self.attributes.complaints = Some(stats);
        self
    }
}

// ============================================================================
// SOURCE BATCH
// ============================================================================

/// Provenance descriptor an adapter returns alongside its records
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDescriptor {
    pub source: SourceKind,
    pub files: Vec<String>,
    pub retrieved_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SourceBatch {
    pub descriptor: SourceDescriptor,
    pub records: Vec<RawRecord>,
}

impl SourceBatch {
    pub fn new(source: SourceKind, files: Vec<PathBuf>, retrieved_at: DateTime<Utc>) -> Self {
        SourceBatch {
            descriptor: SourceDescriptor {
                source,
                files: files
                    .iter()
                    .map(|p| {
                        p.file_name()
                            .and_then(|n| n.to_str())
                            .unwrap_or("unknown")
                            .to_string()
                    })
                    .collect(),
                retrieved_at,
            },
            records: Vec::new(),
        }
    }
}

// ============================================================================
// SEGMENT
// ============================================================================

/// Regulatory size tier. S1 is the largest, S4 the smallest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Segment {
    S1,
    S2,
    S3,
    S4,
}

impl Segment {
    /// Accepts "S2", "s2", "S2 - Médio Porte" and a bare "2"
    pub fn parse(value: &str) -> Option<Segment> {
        let s = value.trim().to_uppercase();
        let tier = if let Some(rest) = s.strip_prefix('S') {
            let digit = rest.chars().next()?;
            // "S2X" is not a segment, "S2 - ..." is
            if rest.chars().nth(1).map_or(false, |c| c.is_alphanumeric()) {
                return None;
            }
            digit
        } else if s.len() == 1 {
            s.chars().next()?
        } else {
            return None;
        };

        match tier {
            '1' => Some(Segment::S1),
            '2' => Some(Segment::S2),
            '3' => Some(Segment::S3),
            '4' => Some(Segment::S4),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Segment::S1 => "S1",
            Segment::S2 => "S2",
            Segment::S3 => "S3",
            Segment::S4 => "S4",
        }
    }
}

impl Default for Segment {
    fn default() -> Self {
        Segment::S4
    }
}

// ============================================================================
// INSURER ENTITY
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Financials {
    pub premiums: Option<f64>,
    pub claims: Option<f64>,
    pub net_worth: Option<f64>,
}

impl Financials {
    /// claims / premiums, absent unless premiums are positive
    pub fn loss_ratio(&self) -> Option<f64> {
        match (self.premiums, self.claims) {
            (Some(p), Some(c)) if p > 0.0 => Some((c / p * 1e6).round() / 1e6),
            _ => None,
        }
    }
}

/// The merged, canonical insurer.
///
/// Identity is fixed at construction and the score is only ever derived from
/// the components by the scoring engine.
#[derive(Debug, Clone, PartialEq)]
pub struct InsurerEntity {
    identity: CanonicalIdentity,
    pub name: String,
    pub segment: Segment,
    pub flags: BTreeMap<String, bool>,

    /// Every configured component key; `None` means no source supplied it
    pub components: BTreeMap<String, Option<f64>>,
    score: Option<f64>,

    pub financials: Financials,
    pub complaints: Option<ComplaintStats>,

    /// Component or field name -> sources that produced it
    pub provenance: BTreeMap<String, Vec<SourceKind>>,
}

impl InsurerEntity {
    pub fn new(identity: CanonicalIdentity, name: String, segment: Segment) -> Self {
        InsurerEntity {
            identity,
            name,
            segment,
            flags: BTreeMap::new(),
            components: BTreeMap::new(),
            score: None,
            financials: Financials::default(),
            complaints: None,
            provenance: BTreeMap::new(),
        }
    }

    pub fn identity(&self) -> &CanonicalIdentity {
        &self.identity
    }

    pub fn score(&self) -> Option<f64> {
        self.score
    }

    pub(crate) fn set_score(&mut self, score: Option<f64>) {
        self.score = score;
    }

    pub fn component(&self, key: &str) -> Option<f64> {
        self.components.get(key).copied().flatten()
    }

    pub fn flag(&self, key: &str) -> bool {
        self.flags.get(key).copied().unwrap_or(false)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_component_from_json_scalar() {
        assert_eq!(
            ComponentValue::from_json(&json!(72)),
            Some(ComponentValue::Scalar(72.0))
        );
        assert_eq!(ComponentValue::from_json(&Value::Null), None);
    }

    #[test]
    fn test_component_from_json_structured() {
        assert_eq!(
            ComponentValue::from_json(&json!({"raw_value": 4.2, "raw_scale": 5})),
            Some(ComponentValue::Structured { raw_value: 4.2, raw_scale: Some(5.0) })
        );
        assert_eq!(
            ComponentValue::from_json(&json!({"value": 7.5})),
            Some(ComponentValue::Structured { raw_value: 7.5, raw_scale: None })
        );
    }

    #[test]
    fn test_component_from_json_unrecognized() {
        assert_eq!(
            ComponentValue::from_json(&json!("high")),
            Some(ComponentValue::Unrecognized)
        );
        assert_eq!(
            ComponentValue::from_json(&json!({"rating": 4})),
            Some(ComponentValue::Unrecognized)
        );
        assert_eq!(
            ComponentValue::from_json(&json!({"raw_value": 4, "raw_scale": 0})),
            Some(ComponentValue::Unrecognized)
        );
    }

    #[test]
    fn test_segment_parse() {
        assert_eq!(Segment::parse("S1"), Some(Segment::S1));
        assert_eq!(Segment::parse(" s3 "), Some(Segment::S3));
        assert_eq!(Segment::parse("S2 - Médio Porte"), Some(Segment::S2));
        assert_eq!(Segment::parse("4"), Some(Segment::S4));
        assert_eq!(Segment::parse("S5"), None);
        assert_eq!(Segment::parse("S12"), None);
        assert_eq!(Segment::parse("Grande"), None);
        assert_eq!(Segment::parse(""), None);
        assert_eq!(Segment::default(), Segment::S4);
    }

    #[test]
    fn test_raw_record_builder_ignores_blank_name() {
        let record = RawRecord::new(SourceKind::Regulatory, "12345678000195", Utc::now())
            .with_name("   ")
            .with_flag("openInsuranceParticipant", true);

        assert_eq!(record.attributes.name, None);
        assert_eq!(record.attributes.flags.get("openInsuranceParticipant"), Some(&true));
    }

    #[test]
    fn test_loss_ratio() {
        let fin = Financials {
            premiums: Some(1000.0),
            claims: Some(450.0),
            net_worth: None,
        };
        assert_eq!(fin.loss_ratio(), Some(0.45));

        let no_premiums = Financials {
            premiums: Some(0.0),
            claims: Some(10.0),
            net_worth: None,
        };
        assert_eq!(no_premiums.loss_ratio(), None);
    }
}
