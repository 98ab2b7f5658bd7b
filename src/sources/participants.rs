// 🔗 Participant Directory Adapter - opin_participants.json
//
// The directory is either a bare list of organisations or an envelope with a
// `participants` / `data` list. Listed organisations with an active (or
// missing) status take part in the open-insurance program.

use anyhow::{bail, Result};
use serde_json::Value;
use std::path::PathBuf;

use super::{identity_from_json, json_str, read_json, retrieved_at, SourceAdapter};
use crate::model::{RawRecord, SourceBatch, SourceKind};

pub const PARTICIPANT_FLAG: &str = "openInsuranceParticipant";

pub struct ParticipantsAdapter {
    path: PathBuf,
}

impl ParticipantsAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ParticipantsAdapter { path: path.into() }
    }
}

fn organisations(payload: &Value) -> Option<&Vec<Value>> {
    match payload {
        Value::Array(list) => Some(list),
        Value::Object(map) => ["participants", "data"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array)),
        _ => None,
    }
}

fn is_active(status: Option<&str>) -> bool {
    status.map_or(true, |s| s.eq_ignore_ascii_case("active"))
}

impl SourceAdapter for ParticipantsAdapter {
    fn source(&self) -> SourceKind {
        SourceKind::Participants
    }

    fn load(&self) -> Result<SourceBatch> {
        let path = self.path.as_path();
        let fetched = retrieved_at(path)?;
        let payload = read_json(path)?;

        let Some(list) = organisations(&payload) else {
            bail!("No participant list in {}", path.display());
        };

        let mut batch = SourceBatch::new(self.source(), vec![self.path.clone()], fetched);

        for org in list.iter().filter(|o| o.is_object()) {
            let raw_identity = org
                .get("RegistrationNumber")
                .and_then(identity_from_json)
                .unwrap_or_default();

            let mut record = RawRecord::new(self.source(), raw_identity, fetched)
                .with_flag(PARTICIPANT_FLAG, is_active(json_str(org.get("Status"))));

            if let Some(name) = json_str(org.get("OrganisationName")) {
                record = record.with_name(name);
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

    fn load(content: &str) -> Result<SourceBatch> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("opin_participants.json");
        fs::write(&path, content).unwrap();
        ParticipantsAdapter::new(&path).load()
    }

    #[test]
    fn test_participants_envelope_and_status() {
        let batch = load(
            r#"{"participants": [
                {"RegistrationNumber": "12345678000195", "OrganisationName": "Acme Seguros", "Status": "Active"},
                {"RegistrationNumber": 11222333000181, "OrganisationName": "Beta", "Status": "Inactive"},
                {"RegistrationNumber": "33000167000101", "OrganisationName": " "},
                "not an organisation"
            ]}"#,
        )
        .unwrap();

        assert_eq!(batch.records.len(), 3);

        let acme = &batch.records[0].attributes;
        assert_eq!(acme.name.as_deref(), Some("Acme Seguros"));
        assert!(acme.flags[PARTICIPANT_FLAG]);

        assert_eq!(batch.records[1].raw_identity, "11222333000181");
        assert!(!batch.records[1].attributes.flags[PARTICIPANT_FLAG]);

        let unnamed = &batch.records[2].attributes;
        assert_eq!(unnamed.name, None);
        assert!(unnamed.flags[PARTICIPANT_FLAG]);
    }

    #[test]
    fn test_participants_bare_list_and_data_envelope() {
        let bare = load(r#"[{"RegistrationNumber": "12345678000195"}]"#).unwrap();
        assert_eq!(bare.records.len(), 1);

        let data = load(r#"{"data": [{"RegistrationNumber": "12345678000195"}]}"#).unwrap();
        assert_eq!(data.records.len(), 1);
    }

    #[test]
    fn test_participants_unknown_shape_fails() {
        assert!(load(r#"{"items": []}"#).is_err());
        assert!(load("not json").is_err());
    }
}
