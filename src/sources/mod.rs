// 📥 Source Adapters - One per public registry
//
// Each adapter maps its registry's export into canonical RawRecords, so shape
// sniffing happens here and nowhere downstream.
//
// Adapters:
//   regulatory   → ses_companies.csv
//   solvency     → ses_solvency.csv
//   participants → opin_participants.json
//   products     → opin_products.json
//   complaints   → consumidor_gov.json

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fs::{self, File};
use std::path::Path;

use crate::identity::pad_numeric_identity;
use crate::model::{SourceBatch, SourceKind};

pub mod complaints;
pub mod participants;
pub mod products;
pub mod regulatory;
pub mod solvency;

pub use complaints::ComplaintsAdapter;
pub use participants::ParticipantsAdapter;
pub use products::ProductsAdapter;
pub use regulatory::RegulatoryAdapter;
pub use solvency::SolvencyAdapter;

// ============================================================================
// CORE TRAIT
// ============================================================================

/// SourceAdapter - Load one registry export into raw records
///
/// Adapters own their output until it is handed to the resolver. A failing
/// `load` marks the whole source unavailable for the build.
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> SourceKind;

    fn load(&self) -> Result<SourceBatch>;

    /// Adapter version (for provenance tracking)
    fn version(&self) -> &str {
        "1.0.0"
    }
}

/// Export file each adapter reads inside the input directory
pub fn default_file_name(source: SourceKind) -> &'static str {
    match source {
        SourceKind::Regulatory => "ses_companies.csv",
        SourceKind::Solvency => "ses_solvency.csv",
        SourceKind::Participants => "opin_participants.json",
        SourceKind::Products => "opin_products.json",
        SourceKind::Complaints => "consumidor_gov.json",
    }
}

/// Factory: adapter for one source reading from `input_dir`
pub fn get_adapter(source: SourceKind, input_dir: &Path) -> Box<dyn SourceAdapter> {
    let path = input_dir.join(default_file_name(source));
    match source {
        SourceKind::Regulatory => Box::new(RegulatoryAdapter::new(path)),
        SourceKind::Solvency => Box::new(SolvencyAdapter::new(path)),
        SourceKind::Participants => Box::new(ParticipantsAdapter::new(path)),
        SourceKind::Products => Box::new(ProductsAdapter::new(path)),
        SourceKind::Complaints => Box::new(ComplaintsAdapter::new(path)),
    }
}

pub fn default_adapters(input_dir: &Path) -> Vec<Box<dyn SourceAdapter>> {
    SourceKind::ALL
        .iter()
        .map(|source| get_adapter(*source, input_dir))
        .collect()
}

// ============================================================================
// SHARED HELPERS
// ============================================================================

/// Retrieval time of an export is its modification time
pub(crate) fn retrieved_at(path: &Path) -> Result<DateTime<Utc>> {
    let modified = fs::metadata(path)
        .and_then(|m| m.modified())
        .with_context(|| format!("Failed to stat file: {}", path.display()))?;
    Ok(DateTime::<Utc>::from(modified))
}

pub(crate) fn read_json(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse JSON: {}", path.display()))
}

/// `;`-delimited reader over a regulator export
pub(crate) fn csv_reader(path: &Path) -> Result<csv::Reader<File>> {
    let file = File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))?;
    Ok(csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file))
}

/// Column positions by lowercase header name
pub(crate) struct Columns {
    headers: Vec<String>,
}

impl Columns {
    pub(crate) fn from_reader(reader: &mut csv::Reader<File>, path: &Path) -> Result<Self> {
        let headers = reader
            .headers()
            .with_context(|| format!("Failed to read CSV header in {}", path.display()))?
            .iter()
            .map(|h| h.trim().trim_start_matches('\u{feff}').to_lowercase())
            .collect();
        Ok(Columns { headers })
    }

    pub(crate) fn index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub(crate) fn require(&self, name: &str, path: &Path) -> Result<usize> {
        self.index(name)
            .with_context(|| format!("Missing column '{}' in {}", name, path.display()))
    }
}

/// Field value, `None` when the column is missing or the cell is blank
pub(crate) fn cell(record: &csv::StringRecord, index: Option<usize>) -> Option<&str> {
    index
        .and_then(|i| record.get(i))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Parse a regulator number. Accepts `1234.5` and the local `1.234,5` form.
pub(crate) fn parse_decimal(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let normalized = if trimmed.contains(',') {
        trimmed.replace('.', "").replace(',', ".")
    } else {
        trimmed.to_string()
    };

    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Tax ID as a string; numeric IDs (including whole floats from spreadsheet
/// exports) are padded back to 14 digits
pub(crate) fn identity_from_json(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => match n.as_u64() {
            Some(v) => Some(pad_numeric_identity(v)),
            None => n
                .as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f < 1e14)
                .map(|f| pad_numeric_identity(f as u64)),
        },
        _ => None,
    }
}

pub(crate) fn json_f64(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64).filter(|v| v.is_finite())
}

pub(crate) fn json_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_decimal_formats() {
        assert_eq!(parse_decimal("1234.5"), Some(1234.5));
        assert_eq!(parse_decimal("1.234.567,89"), Some(1234567.89));
        assert_eq!(parse_decimal("0,5"), Some(0.5));
        assert_eq!(parse_decimal("  "), None);
        assert_eq!(parse_decimal("n/d"), None);
    }

    #[test]
    fn test_identity_from_json_pads_integers() {
        assert_eq!(
            identity_from_json(&json!("12.345.678/0001-95")),
            Some("12.345.678/0001-95".to_string())
        );
        assert_eq!(
            identity_from_json(&json!(1_234_567_000_100u64)),
            Some("01234567000100".to_string())
        );
        assert_eq!(
            identity_from_json(&json!(1234567000100.0)),
            Some("01234567000100".to_string())
        );
        assert_eq!(identity_from_json(&json!(12.5)), None);
        assert_eq!(identity_from_json(&json!(true)), None);
        assert_eq!(identity_from_json(&json!(null)), None);
        assert_eq!(identity_from_json(&json!(-5)), None);
    }

    #[test]
    fn test_default_adapters_cover_every_source() {
        let dir = tempfile::tempdir().unwrap();
        let adapters = default_adapters(dir.path());
        let sources: Vec<SourceKind> = adapters.iter().map(|a| a.source()).collect();
        assert_eq!(sources, SourceKind::ALL.to_vec());
    }

    #[test]
    fn test_missing_file_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        for adapter in default_adapters(dir.path()) {
            assert!(adapter.load().is_err(), "{} loaded from nothing", adapter.source());
        }
    }
}
