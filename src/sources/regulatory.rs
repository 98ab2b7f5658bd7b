// 🏛️ Regulatory Registry Adapter - ses_companies.csv
//
// Format: cnpj;name;segment;premiums;claims
// Example: 12.345.678/0001-95;Acme Seguros S.A.;S2 - Médio;1.234.567,89;456.789,00

use anyhow::{Context, Result};
use std::path::PathBuf;

use super::{cell, csv_reader, parse_decimal, retrieved_at, Columns, SourceAdapter};
use crate::model::{RawRecord, SourceBatch, SourceKind};

pub struct RegulatoryAdapter {
    path: PathBuf,
}

impl RegulatoryAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        RegulatoryAdapter { path: path.into() }
    }
}

impl SourceAdapter for RegulatoryAdapter {
    fn source(&self) -> SourceKind {
        SourceKind::Regulatory
    }

    fn load(&self) -> Result<SourceBatch> {
        let path = self.path.as_path();
        let fetched = retrieved_at(path)?;
        let mut reader = csv_reader(path)?;
        let columns = Columns::from_reader(&mut reader, path)?;

        let cnpj = columns.require("cnpj", path)?;
        let name = columns.index("name");
        let segment = columns.index("segment");
        let premiums = columns.index("premiums");
        let claims = columns.index("claims");

        let mut batch = SourceBatch::new(self.source(), vec![self.path.clone()], fetched);

        for (line_num, result) in reader.records().enumerate() {
            let row = result.with_context(|| {
                format!("Failed to parse CSV line {} in {}", line_num + 2, path.display())
            })?;

            let mut record = RawRecord::new(self.source(), cell(&row, Some(cnpj)).unwrap_or(""), fetched);

            if let Some(v) = cell(&row, name) {
                record = record.with_name(v);
            }
            if let Some(v) = cell(&row, segment) {
                record = record.with_segment(v);
            }
            if let Some(v) = cell(&row, premiums).and_then(parse_decimal) {
                record = record.with_premiums(v);
            }
            if let Some(v) = cell(&row, claims).and_then(parse_decimal) {
                record = record.with_claims(v);
            }

            batch.records.push(record);
        }

        Ok(batch)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_regulatory_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ses_companies.csv");
        fs::write(
            &path,
            "cnpj;name;segment;premiums;claims\n\
             12.345.678/0001-95;Acme Seguros S.A.;S2 - Médio;1.234.567,89;456.789,00\n\
             11222333000181;Beta Seguros;;;\n\
             ;Sem CNPJ;S1;10;5\n",
        )
        .unwrap();

        let batch = RegulatoryAdapter::new(&path).load().unwrap();

        assert_eq!(batch.descriptor.source, SourceKind::Regulatory);
        assert_eq!(batch.descriptor.files, vec!["ses_companies.csv".to_string()]);
        assert_eq!(batch.records.len(), 3);

        let acme = &batch.records[0];
        assert_eq!(acme.raw_identity, "12.345.678/0001-95");
        assert_eq!(acme.attributes.name.as_deref(), Some("Acme Seguros S.A."));
        assert_eq!(acme.attributes.segment.as_deref(), Some("S2 - Médio"));
        assert_eq!(acme.attributes.premiums, Some(1234567.89));
        assert_eq!(acme.attributes.claims, Some(456789.0));

        let beta = &batch.records[1];
        assert_eq!(beta.attributes.segment, None);
        assert_eq!(beta.attributes.premiums, None);

        // kept so the resolver can count the rejection
        assert_eq!(batch.records[2].raw_identity, "");
    }

    #[test]
    fn test_regulatory_requires_cnpj_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ses_companies.csv");
        fs::write(&path, "name;segment\nAcme;S1\n").unwrap();

        let err = RegulatoryAdapter::new(&path).load().unwrap_err();
        assert!(err.to_string().contains("cnpj"));
    }
}
