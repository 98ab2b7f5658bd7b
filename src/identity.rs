// 🪪 Identity Resolver - Raw tax IDs → canonical CNPJ
//
// "12.345.678/0001-95", "12345678000195" and "12 345 678 0001 95" are all the
// same insurer. Only identifiers with 14 digits and valid check digits survive.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::error::{PipelineError, RejectionReason};
use crate::model::{RawRecord, SourceKind};

/// Fixed width of a CNPJ after stripping punctuation
pub const CNPJ_LEN: usize = 14;

const FIRST_CHECK_WEIGHTS: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
const SECOND_CHECK_WEIGHTS: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];

// ============================================================================
// CANONICAL IDENTITY
// ============================================================================

/// A validated, digits-only CNPJ. Can only be built through `resolve`.
///
/// Serialises as the bare digit string. There is no `Deserialize`: an
/// identity read back from disk goes through `resolve` again.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct CanonicalIdentity(String);

impl CanonicalIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Display form: 12.345.678/0001-95
    pub fn formatted(&self) -> String {
        let d = &self.0;
        format!("{}.{}.{}/{}-{}", &d[..2], &d[2..5], &d[5..8], &d[8..12], &d[12..])
    }
}

impl fmt::Display for CanonicalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// RESOLVER
// ============================================================================

/// Canonicalise a raw tax identifier.
///
/// Strips every non-digit, then checks length and both mod-11 check digits.
/// Identifiers made of a single repeated digit pass the arithmetic but are
/// placeholders, so they are rejected as `InvalidChecksum`.
pub fn resolve(raw_identity: &str) -> Result<CanonicalIdentity, RejectionReason> {
    let digits: Vec<u32> = raw_identity.chars().filter_map(|c| c.to_digit(10)).collect();

    if digits.len() != CNPJ_LEN {
        return Err(RejectionReason::InvalidLength);
    }

    if digits.iter().all(|d| *d == digits[0]) {
        return Err(RejectionReason::InvalidChecksum);
    }

    let first = check_digit(&digits[..12], &FIRST_CHECK_WEIGHTS);
    let second = check_digit(&digits[..13], &SECOND_CHECK_WEIGHTS);

    if digits[12] != first || digits[13] != second {
        return Err(RejectionReason::InvalidChecksum);
    }

    Ok(CanonicalIdentity(
        digits.iter().filter_map(|d| char::from_digit(*d, 10)).collect(),
    ))
}

fn check_digit(digits: &[u32], weights: &[u32]) -> u32 {
    let sum: u32 = digits.iter().zip(weights).map(|(d, w)| d * w).sum();
    match sum % 11 {
        0 | 1 => 0,
        r => 11 - r,
    }
}

/// Render an integer-typed identifier as a 14-digit string.
///
/// Spreadsheet exports store CNPJs as numbers and lose leading zeros; adapters
/// call this before handing the value to `resolve`.
pub fn pad_numeric_identity(value: u64) -> String {
    format!("{:0width$}", value, width = CNPJ_LEN)
}

// ============================================================================
// GROUPING
// ============================================================================

/// A record that never reached the merge
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub source: SourceKind,
    pub raw_identity: String,
    pub reason: RejectionReason,
}

/// Valid records grouped by identity, plus everything that was turned away
#[derive(Debug, Default)]
pub struct Resolution {
    pub grouped: BTreeMap<CanonicalIdentity, Vec<RawRecord>>,
    pub rejections: Vec<Rejection>,
}

impl Resolution {
    pub fn rejected_count(&self, source: SourceKind) -> usize {
        self.rejections.iter().filter(|r| r.source == source).count()
    }

    pub fn rejections_by_reason(&self) -> BTreeMap<RejectionReason, usize> {
        let mut counts = BTreeMap::new();
        for r in &self.rejections {
            *counts.entry(r.reason).or_insert(0) += 1;
        }
        counts
    }
}

/// Resolve every record's identity and group the survivors.
///
/// Failing records are kept as rejections so the build summary can report
/// them; nothing is dropped silently.
pub fn group_by_identity(records: impl IntoIterator<Item = RawRecord>) -> Resolution {
    let mut resolution = Resolution::default();

    for record in records {
        match resolve(&record.raw_identity) {
            Ok(identity) => resolution.grouped.entry(identity).or_default().push(record),
            Err(reason) => {
                let err = PipelineError::IdentityRejected {
                    source_kind: record.source,
                    raw: record.raw_identity.clone(),
                    reason,
                };
                debug!(error = %err, "record excluded");
                resolution.rejections.push(Rejection {
                    source: record.source,
                    raw_identity: record.raw_identity,
                    reason,
                });
            }
        }
    }

    resolution
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_group_by_identity_merges_formats_and_counts_rejections() {
        let now = Utc::now();
        let records = vec![
            RawRecord::new(SourceKind::Regulatory, "12.345.678/0001-95", now),
            RawRecord::new(SourceKind::Complaints, "12345678000195", now),
            RawRecord::new(SourceKind::Complaints, "12345678000196", now),
            RawRecord::new(SourceKind::Participants, "123", now),
        ];

        let resolution = group_by_identity(records);

        assert_eq!(resolution.grouped.len(), 1);
        let id = resolve("12345678000195").unwrap();
        assert_eq!(resolution.grouped[&id].len(), 2);

        assert_eq!(resolution.rejections.len(), 2);
        assert_eq!(resolution.rejected_count(SourceKind::Complaints), 1);
        assert_eq!(resolution.rejected_count(SourceKind::Participants), 1);

        let by_reason = resolution.rejections_by_reason();
        assert_eq!(by_reason[&RejectionReason::InvalidChecksum], 1);
        assert_eq!(by_reason[&RejectionReason::InvalidLength], 1);
    }

    #[test]
    fn test_resolve_formatting_variants() {
        let expected = "12345678000195";
        for raw in [
            "12.345.678/0001-95",
            "12345678000195",
            "12 345 678 0001 95",
            " 12-345-678/0001.95 ",
            "CNPJ: 12.345.678/0001-95",
        ] {
            let id = resolve(raw).unwrap();
            assert_eq!(id.as_str(), expected, "input {:?}", raw);
        }
    }

    #[test]
    fn test_resolve_known_valid_identities() {
        // Real-world shaped CNPJs with correct check digits
        assert!(resolve("11.222.333/0001-81").is_ok());
        assert!(resolve("33.000.167/0001-01").is_ok());
    }

    #[test]
    fn test_resolve_invalid_length() {
        assert_eq!(resolve(""), Err(RejectionReason::InvalidLength));
        assert_eq!(resolve("1234567800019"), Err(RejectionReason::InvalidLength));
        assert_eq!(resolve("123456780001950"), Err(RejectionReason::InvalidLength));
        assert_eq!(resolve("n/a"), Err(RejectionReason::InvalidLength));
    }

    #[test]
    fn test_resolve_invalid_checksum() {
        assert_eq!(resolve("12.345.678/0001-96"), Err(RejectionReason::InvalidChecksum));
        assert_eq!(resolve("12345678000159"), Err(RejectionReason::InvalidChecksum));
        assert_eq!(resolve("00000000000000"), Err(RejectionReason::InvalidChecksum));
        assert_eq!(resolve("11111111111111"), Err(RejectionReason::InvalidChecksum));
    }

    #[test]
    fn test_formatted() {
        let id = resolve("12345678000195").unwrap();
        assert_eq!(id.formatted(), "12.345.678/0001-95");
        assert_eq!(id.to_string(), "12345678000195");
    }

    #[test]
    fn test_identity_serialises_as_digits() {
        let id = resolve("12.345.678/0001-95").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"12345678000195\"");

        // reading one back means resolving it again
        let back: String = serde_json::from_str(&serde_json::to_string(&id).unwrap()).unwrap();
        assert_eq!(resolve(&back), Ok(id));
    }

    #[test]
    fn test_pad_numeric_identity_recovers_leading_zero() {
        // 01.234.567/0001-... stored as a number loses its leading zero
        let padded = pad_numeric_identity(1_234_567_000_100);
        assert_eq!(padded.len(), CNPJ_LEN);
        assert!(padded.starts_with('0'));
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let a = resolve("12.345.678/0001-95");
        let b = resolve("12.345.678/0001-95");
        assert_eq!(a, b);
    }
}
