// 📣 Complaint Statistics Adapter - consumidor_gov.json
//
// Format: { "by_cnpj_key": { "<cnpj>": <entry>, ... }, ... }
//
// An entry is either the legacy flat reputation number (0-100) or an object:
//   satisfaction_avg    raw rating, usually 1-5
//   satisfaction_scale  optional, the rating's maximum
//   complaints_total, resolution_rate, responded_rate, avg_response_days
//   display_name

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::path::PathBuf;

use super::{json_f64, json_str, read_json, retrieved_at, SourceAdapter};
use crate::model::{ComplaintStats, ComponentValue, RawRecord, SourceBatch, SourceKind};

const COMPONENT: &str = "reputation";

pub struct ComplaintsAdapter {
    path: PathBuf,
}

impl ComplaintsAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ComplaintsAdapter { path: path.into() }
    }
}

fn stats(entry: &Map<String, Value>) -> Option<ComplaintStats> {
    let stats = ComplaintStats {
        total: entry.get("complaints_total").and_then(Value::as_u64),
        resolution_rate: json_f64(entry.get("resolution_rate")),
        responded_rate: json_f64(entry.get("responded_rate").or_else(|| entry.get("response_rate"))),
        satisfaction_avg: json_f64(entry.get("satisfaction_avg")),
        avg_response_days: json_f64(entry.get("avg_response_days")),
    };

    if stats == ComplaintStats::default() {
        None
    } else {
        Some(stats)
    }
}

fn record_for(cnpj: &str, entry: &Value, source: SourceKind, fetched: DateTime<Utc>) -> RawRecord {
    let record = RawRecord::new(source, cnpj, fetched);

    match entry {
        Value::Null => record,
        Value::Number(_) => match ComponentValue::from_json(entry) {
            Some(value) => record.with_component(COMPONENT, value),
            None => record,
        },
        Value::Object(map) => {
            let mut record = record;

            if let Some(name) = json_str(map.get("display_name")) {
                record = record.with_name(name);
            }

            match map.get("satisfaction_avg") {
                None | Some(Value::Null) => {}
                Some(raw) => {
                    // a scale that is present must be a positive number
                    let scale = match map.get("satisfaction_scale") {
                        None | Some(Value::Null) => Some(None),
                        Some(s) => json_f64(Some(s)).filter(|s| *s > 0.0).map(Some),
                    };
                    let value = match (raw.as_f64().filter(|v| v.is_finite()), scale) {
                        (Some(raw_value), Some(raw_scale)) => ComponentValue::Structured { raw_value, raw_scale },
                        _ => ComponentValue::Unrecognized,
                    };
                    record = record.with_component(COMPONENT, value);
                }
            }

            if let Some(s) = stats(map) {
                record = record.with_complaints(s);
            }
            record
        }
        _ => record.with_component(COMPONENT, ComponentValue::Unrecognized),
    }
}

impl SourceAdapter for ComplaintsAdapter {
    fn source(&self) -> SourceKind {
        SourceKind::Complaints
    }

    fn load(&self) -> Result<SourceBatch> {
        let path = self.path.as_path();
        let fetched = retrieved_at(path)?;
        let payload = read_json(path)?;

        let Some(by_cnpj) = payload.get("by_cnpj_key").and_then(Value::as_object) else {
            bail!("Missing by_cnpj_key map in {}", path.display());
        };

        let mut batch = SourceBatch::new(self.source(), vec![self.path.clone()], fetched);
        batch.records = by_cnpj
            .iter()
            .map(|(cnpj, entry)| record_for(cnpj, entry, self.source(), fetched))
            .collect();

        Ok(batch)
    }
}

// ============================================================================
// TESTS
// ============================================================================
