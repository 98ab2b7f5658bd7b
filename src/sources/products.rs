// 🛒 Product Catalog Adapter - opin_products.json
//
// Format: { "<cnpj>": [ {product}, ... ], ... }
//
// The number of published products becomes a structured `products` reading;
// the methodology decides its scale. Publishing anything at all asserts the
// openInsuranceProducts flag.

use anyhow::{bail, Result};
use serde_json::Value;
use std::path::PathBuf;

use super::{read_json, retrieved_at, SourceAdapter};
use crate::model::{ComponentValue, RawRecord, SourceBatch, SourceKind};

pub const PRODUCTS_FLAG: &str = "openInsuranceProducts";

const COMPONENT: &str = "products";

pub struct ProductsAdapter {
    path: PathBuf,
}

impl ProductsAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ProductsAdapter { path: path.into() }
    }
}

impl SourceAdapter for ProductsAdapter {
    fn source(&self) -> SourceKind {
        SourceKind::Products
    }

    fn load(&self) -> Result<SourceBatch> {
        let path = self.path.as_path();
        let fetched = retrieved_at(path)?;
        let payload = read_json(path)?;

        let Value::Object(by_cnpj) = payload else {
            bail!("Expected a cnpj → products map in {}", path.display());
        };

        let mut batch = SourceBatch::new(self.source(), vec![self.path.clone()], fetched);

        for (cnpj, products) in &by_cnpj {
            let record = RawRecord::new(self.source(), cnpj.as_str(), fetched);

            let record = match products {
                Value::Array(list) => record
                    .with_component(
                        COMPONENT,
                        ComponentValue::Structured {
                            raw_value: list.len() as f64,
                            raw_scale: None,
                        },
                    )
                    .with_flag(PRODUCTS_FLAG, !list.is_empty()),
                Value::Null => record,
                _ => record.with_component(COMPONENT, ComponentValue::Unrecognized),
            };

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
    fn test_products_counts_and_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("opin_products.json");
        fs::write(
            &path,
            r#"{
                "12345678000195": [{"name": "Auto"}, {"name": "Vida"}, {"name": "Residencial"}],
                "11222333000181": [],
                "33000167000101": "three"
            }"#,
        )
        .unwrap();

        let batch = ProductsAdapter::new(&path).load().unwrap();
        assert_eq!(batch.records.len(), 3);

        let by_id = |id: &str| {
            batch
                .records
                .iter()
                .find(|r| r.raw_identity == id)
                .map(|r| r.attributes.clone())
                .unwrap()
        };

        let acme = by_id("12345678000195");
        assert_eq!(
            acme.components[0].value,
            ComponentValue::Structured { raw_value: 3.0, raw_scale: None }
        );
        assert!(acme.flags[PRODUCTS_FLAG]);

        let empty = by_id("11222333000181");
        assert!(!empty.flags[PRODUCTS_FLAG]);

        let odd = by_id("33000167000101");
        assert_eq!(odd.components[0].value, ComponentValue::Unrecognized);
        assert!(odd.flags.is_empty());
    }

    #[test]
    fn test_products_rejects_list_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("opin_products.json");
        fs::write(&path, "[]").unwrap();
        assert!(ProductsAdapter::new(&path).load().is_err());
    }
}
