// 🏦 Solvency Filings Adapter - ses_solvency.csv
//
// Format: cnpj;solvency;solvency_raw;solvency_scale;net_worth
//
// Older exports carry only `solvency`, already on 0-100. Newer ones carry the
// raw capital-adequacy reading and, when known, the scale it was reported on.

use anyhow::{Context, Result};
use std::path::PathBuf;

use super::{cell, csv_reader, parse_decimal, retrieved_at, Columns, SourceAdapter};
use crate::model::{ComponentValue, RawRecord, SourceBatch, SourceKind};

const COMPONENT: &str = "solvency";

pub struct SolvencyAdapter {
    path: PathBuf,
}

impl SolvencyAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SolvencyAdapter { path: path.into() }
    }
}

impl SourceAdapter for SolvencyAdapter {
    fn source(&self) -> SourceKind {
        SourceKind::Solvency
    }

    fn load(&self) -> Result<SourceBatch> {
        let path = self.path.as_path();
        let fetched = retrieved_at(path)?;
        let mut reader = csv_reader(path)?;
        let columns = Columns::from_reader(&mut reader, path)?;

        let cnpj = columns.require("cnpj", path)?;
        let legacy = columns.index("solvency");
        let raw = columns.index("solvency_raw");
        let scale = columns.index("solvency_scale");
        let net_worth = columns.index("net_worth");

        let mut batch = SourceBatch::new(self.source(), vec![self.path.clone()], fetched);

        for (line_num, result) in reader.records().enumerate() {
            let row = result.with_context(|| {
                format!("Failed to parse CSV line {} in {}", line_num + 2, path.display())
            })?;

            let mut record = RawRecord::new(self.source(), cell(&row, Some(cnpj)).unwrap_or(""), fetched);

            if let Some(v) = cell(&row, legacy) {
                let value = parse_decimal(v).map_or(ComponentValue::Unrecognized, ComponentValue::Scalar);
                record = record.with_component(COMPONENT, value);
            }

            if let Some(v) = cell(&row, raw) {
                // a filled scale cell must hold a positive number
                let raw_scale = match cell(&row, scale) {
                    None => Some(None),
                    Some(s) => parse_decimal(s).filter(|s| *s > 0.0).map(Some),
                };
                let value = match (parse_decimal(v), raw_scale) {
                    (Some(raw_value), Some(raw_scale)) => ComponentValue::Structured { raw_value, raw_scale },
                    _ => ComponentValue::Unrecognized,
                };
                record = record.with_component(COMPONENT, value);
            }

            if let Some(v) = cell(&row, net_worth).and_then(parse_decimal) {
                record = record.with_net_worth(v);
            }

            batch.records.push(record);
        }

        Ok(batch)
    }
}

// ============================================================================
// TESTS
// ============================================================================
