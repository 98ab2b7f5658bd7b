// 🔀 Merge Engine - Many source views → one insurer
//
// Every order-sensitive choice is made by sorting candidates on a fixed key:
//   source precedence → structured before scalar → most recent → value
// so the result never depends on the order records arrived in.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::PipelineError;
use crate::identity::CanonicalIdentity;
use crate::methodology::Methodology;
use crate::model::{ComplaintStats, InsurerEntity, RawRecord, Segment, SourceKind};

/// Set on reinsurers and corporate specialists, from the merged name
pub const B2B_FLAG: &str = "isB2B";

// ============================================================================
// MERGE OUTCOME
// ============================================================================

#[derive(Debug, Default)]
pub struct MergeOutcome {
    /// One entity per identity, ordered by identity
    pub entities: Vec<InsurerEntity>,

    /// Component readings that matched no known shape or fell off every scale
    pub schema_mismatches: BTreeMap<SourceKind, usize>,

    /// Identities dropped because their name marks them as non-insurers
    pub excluded: Vec<CanonicalIdentity>,
}

impl MergeOutcome {
    pub fn total_schema_mismatches(&self) -> usize {
        self.schema_mismatches.values().sum()
    }
}

// ============================================================================
// CANDIDATE SELECTION
// ============================================================================

/// One source's offer for one field
#[derive(Debug, Clone)]
struct Candidate<T> {
    rank: usize,
    /// 0 = structured reading, 1 = legacy scalar or plain field
    shape: u8,
    retrieved_at: DateTime<Utc>,
    source: SourceKind,
    value: T,
}

impl<T> Candidate<T> {
    fn new(methodology: &Methodology, record: &RawRecord, value: T) -> Self {
        Candidate {
            rank: methodology.precedence_rank(record.source),
            shape: 1,
            retrieved_at: record.retrieved_at,
            source: record.source,
            value,
        }
    }

    fn structured(mut self, structured: bool) -> Self {
        self.shape = if structured { 0 } else { 1 };
        self
    }
}

/// Pick the winning candidate; `tie` settles identical metadata by value
fn pick_best<T>(candidates: Vec<Candidate<T>>, tie: impl Fn(&T, &T) -> Ordering) -> Option<Candidate<T>> {
    candidates.into_iter().min_by(|a, b| {
        a.rank
            .cmp(&b.rank)
            .then(a.shape.cmp(&b.shape))
            .then(b.retrieved_at.cmp(&a.retrieved_at))
            .then_with(|| tie(&a.value, &b.value))
    })
}

fn f64_tie(a: &f64, b: &f64) -> Ordering {
    b.total_cmp(a)
}

fn complaints_tie(a: &ComplaintStats, b: &ComplaintStats) -> Ordering {
    let key = |s: &ComplaintStats| {
        (
            s.total.unwrap_or(0),
            s.satisfaction_avg.unwrap_or(-1.0),
            s.resolution_rate.unwrap_or(-1.0),
            s.responded_rate.unwrap_or(-1.0),
            s.avg_response_days.unwrap_or(-1.0),
        )
    };
    let (ka, kb) = (key(a), key(b));
    kb.0.cmp(&ka.0)
        .then(kb.1.total_cmp(&ka.1))
        .then(kb.2.total_cmp(&ka.2))
        .then(kb.3.total_cmp(&ka.3))
        .then(kb.4.total_cmp(&ka.4))
}

// ============================================================================
// MERGE ENGINE
// ============================================================================

pub struct MergeEngine<'a> {
    methodology: &'a Methodology,
}

impl<'a> MergeEngine<'a> {
    pub fn new(methodology: &'a Methodology) -> Self {
        MergeEngine { methodology }
    }

    /// Merge grouped records into one entity per identity.
    ///
    /// Input is borrowed and left untouched.
    pub fn merge(&self, grouped: &BTreeMap<CanonicalIdentity, Vec<RawRecord>>) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();

        for (identity, records) in grouped {
            if records.is_empty() {
                continue;
            }

            let entity = self.merge_one(identity, records, &mut outcome.schema_mismatches);

            if self.methodology.is_excluded_name(&entity.name) {
                debug!(cnpj = %identity, name = %entity.name, "excluded non-insurer");
                outcome.excluded.push(identity.clone());
                continue;
            }

            outcome.entities.push(entity);
        }

        debug!(
            entities = outcome.entities.len(),
            excluded = outcome.excluded.len(),
            mismatches = outcome.total_schema_mismatches(),
            "merge complete"
        );

        outcome
    }

    fn merge_one(
        &self,
        identity: &CanonicalIdentity,
        records: &[RawRecord],
        mismatches: &mut BTreeMap<SourceKind, usize>,
    ) -> InsurerEntity {
        let mut provenance: BTreeMap<String, Vec<SourceKind>> = BTreeMap::new();

        // Name: highest-precedence non-empty value
        let name_candidates: Vec<Candidate<String>> = records
            .iter()
            .filter_map(|r| {
                let name = r.attributes.name.as_ref()?.trim();
                (!name.is_empty()).then(|| Candidate::new(self.methodology, r, name.to_string()))
            })
            .collect();
        let name = match pick_best(name_candidates, |a: &String, b: &String| a.cmp(b)) {
            Some(c) => {
                provenance.insert("name".to_string(), vec![c.source]);
                c.value
            }
            None => identity.formatted(),
        };

        // Segment: regulatory registry only, never inferred elsewhere
        let segment_candidates: Vec<Candidate<Segment>> = records
            .iter()
            .filter(|r| r.source == SourceKind::Regulatory)
            .filter_map(|r| {
                let segment = Segment::parse(r.attributes.segment.as_ref()?)?;
                Some(Candidate::new(self.methodology, r, segment))
            })
            .collect();
        let segment = match pick_best(segment_candidates, |a: &Segment, b: &Segment| a.cmp(b)) {
            Some(c) => {
                provenance.insert("segment".to_string(), vec![c.source]);
                c.value
            }
            None => self.methodology.default_segment,
        };

        let mut entity = InsurerEntity::new(identity.clone(), name, segment);

        self.merge_flags(&mut entity, records, &mut provenance);
        self.merge_components(&mut entity, records, &mut provenance, mismatches);
        self.classify_b2b(&mut entity, &mut provenance);
        self.merge_financials(&mut entity, records, &mut provenance);

        let complaint_candidates: Vec<Candidate<ComplaintStats>> = records
            .iter()
            .filter_map(|r| {
                r.attributes
                    .complaints
                    .clone()
                    .map(|s| Candidate::new(self.methodology, r, s))
            })
            .collect();
        if let Some(c) = pick_best(complaint_candidates, complaints_tie) {
            provenance.insert("complaints".to_string(), vec![c.source]);
            entity.complaints = Some(c.value);
        }

        entity.provenance = provenance;
        entity
    }

    /// A flag is true when any source asserts it; silence is not `false`
    fn merge_flags(
        &self,
        entity: &mut InsurerEntity,
        records: &[RawRecord],
        provenance: &mut BTreeMap<String, Vec<SourceKind>>,
    ) {
        for flag in &self.methodology.known_flags {
            entity.flags.insert(flag.clone(), false);
        }

        let mut asserted: BTreeMap<String, Vec<SourceKind>> = BTreeMap::new();
        for record in records {
            for (flag, value) in &record.attributes.flags {
                let current = entity.flags.entry(flag.clone()).or_insert(false);
                *current = *current || *value;
                if *value {
                    asserted.entry(flag.clone()).or_default().push(record.source);
                }
            }
        }

        for (flag, mut sources) in asserted {
            self.sort_sources(&mut sources);
            provenance.insert(format!("flags.{}", flag), sources);
        }
    }

    /// B2B insurers keep their consumer components absent, not zero
    fn classify_b2b(&self, entity: &mut InsurerEntity, provenance: &mut BTreeMap<String, Vec<SourceKind>>) {
        if !self.methodology.is_b2b_name(&entity.name) {
            return;
        }

        entity.flags.insert(B2B_FLAG.to_string(), true);

        let key = format!("flags.{}", B2B_FLAG);
        let mut sources = provenance.remove(&key).unwrap_or_default();
        sources.extend(provenance.get("name").cloned().unwrap_or_default());
        self.sort_sources(&mut sources);
        provenance.insert(key, sources);

        let identity = entity.identity().clone();
        for (component, value) in entity.components.iter_mut() {
            if self.methodology.is_b2b_suppressed(component) && value.take().is_some() {
                provenance.remove(component);
                debug!(cnpj = %identity, component = %component, "consumer component dropped for B2B insurer");
            }
        }
    }

    /// Normalise every reading at this boundary; scoring only sees 0-100
    fn merge_components(
        &self,
        entity: &mut InsurerEntity,
        records: &[RawRecord],
        provenance: &mut BTreeMap<String, Vec<SourceKind>>,
        mismatches: &mut BTreeMap<SourceKind, usize>,
    ) {
        let mut candidates: BTreeMap<&str, Vec<Candidate<f64>>> = BTreeMap::new();

        for record in records {
            for reading in &record.attributes.components {
                let Some(def) = self.methodology.component_for_key(&reading.key) else {
                    debug!(source = %record.source, key = %reading.key, "ignoring unknown component");
                    continue;
                };

                match self.methodology.normalize(def, &reading.value) {
                    Some(value) => candidates.entry(def.key.as_str()).or_default().push(
                        Candidate::new(self.methodology, record, value)
                            .structured(reading.value.is_structured()),
                    ),
                    None => {
                        let err = PipelineError::SchemaMismatch {
                            source_kind: record.source,
                            component: reading.key.clone(),
                        };
                        debug!(cnpj = %entity.identity(), value = ?reading.value, error = %err, "reading treated as absent");
                        *mismatches.entry(record.source).or_insert(0) += 1;
                    }
                }
            }
        }

        for def in &self.methodology.components {
            let best = candidates
                .remove(def.key.as_str())
                .and_then(|c| pick_best(c, f64_tie));

            match best {
                Some(c) => {
                    provenance.insert(def.key.clone(), vec![c.source]);
                    entity.components.insert(def.key.clone(), Some(c.value));
                }
                None => {
                    entity.components.insert(def.key.clone(), None);
                }
            }
        }
    }

    fn merge_financials(
        &self,
        entity: &mut InsurerEntity,
        records: &[RawRecord],
        provenance: &mut BTreeMap<String, Vec<SourceKind>>,
    ) {
        let fields: [(&str, fn(&RawRecord) -> Option<f64>); 3] = [
            ("premiums", |r| r.attributes.premiums),
            ("claims", |r| r.attributes.claims),
            ("net_worth", |r| r.attributes.net_worth),
        ];

        for (field, getter) in fields {
            let candidates: Vec<Candidate<f64>> = records
                .iter()
                .filter_map(|r| {
                    getter(r)
                        .filter(|v| v.is_finite())
                        .map(|v| Candidate::new(self.methodology, r, v))
                })
                .collect();

            let Some(best) = pick_best(candidates, f64_tie) else {
                continue;
            };

            provenance.insert(field.to_string(), vec![best.source]);
            match field {
                "premiums" => entity.financials.premiums = Some(best.value),
                "claims" => entity.financials.claims = Some(best.value),
                _ => entity.financials.net_worth = Some(best.value),
            }
        }
    }

    fn sort_sources(&self, sources: &mut Vec<SourceKind>) {
        sources.sort_by_key(|s| self.methodology.precedence_rank(*s));
        sources.dedup();
    }
}

// ============================================================================
// TESTS
// ============================================================================
