// 📊 Scoring Engine - Weighted composite over present components
//
//   score = Σ wᵢ·vᵢ / Σ wᵢ   over components that are present
//
// Absent components drop out and the remaining weights are renormalised.
// No present components means no score at all, never 0.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::methodology::{Methodology, TieBreak};
use crate::model::InsurerEntity;

// ============================================================================
// SCORE BREAKDOWN
// ============================================================================

/// How one component contributed to a score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub key: String,
    pub value: f64,

    /// Configured weight
    pub weight: f64,

    /// Weight after renormalising over present components
    pub effective_weight: f64,

    /// effective_weight × value
    pub points: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub score: Option<f64>,
    pub contributions: Vec<Contribution>,
    pub missing: Vec<String>,
}

// ============================================================================
// SCORING ENGINE
// ============================================================================

pub struct ScoringEngine<'a> {
    methodology: &'a Methodology,
}

impl<'a> ScoringEngine<'a> {
    pub fn new(methodology: &'a Methodology) -> Self {
        ScoringEngine { methodology }
    }

    /// Composite score for a component map, rounded to the configured precision
    pub fn score(&self, components: &BTreeMap<String, Option<f64>>) -> Option<f64> {
        self.explain(components).score
    }

    /// Full decomposition of a score
    pub fn explain(&self, components: &BTreeMap<String, Option<f64>>) -> ScoreBreakdown {
        let mut present = Vec::new();
        let mut missing = Vec::new();

        for def in &self.methodology.components {
            match components.get(&def.key).copied().flatten() {
                Some(v) if (0.0..=100.0).contains(&v) => present.push((def, v)),
                _ => missing.push(def.key.clone()),
            }
        }

        let total_weight: f64 = present.iter().map(|(def, _)| def.weight).sum();
        if present.is_empty() || total_weight <= 0.0 {
            return ScoreBreakdown {
                score: None,
                contributions: Vec::new(),
                missing,
            };
        }

        let contributions: Vec<Contribution> = present
            .into_iter()
            .map(|(def, value)| {
                let effective_weight = def.weight / total_weight;
                Contribution {
                    key: def.key.clone(),
                    value,
                    weight: def.weight,
                    effective_weight,
                    points: effective_weight * value,
                }
            })
            .collect();

        let raw: f64 = contributions.iter().map(|c| c.points).sum();
        let score = round_to(raw.clamp(0.0, 100.0), self.methodology.score_precision);

        ScoreBreakdown {
            score: Some(score),
            contributions,
            missing,
        }
    }

    /// Derive and store the entity's score from its components
    pub fn apply(&self, entity: &mut InsurerEntity) {
        let score = self.score(&entity.components);
        entity.set_score(score);
    }

    pub fn apply_all(&self, entities: &mut [InsurerEntity]) {
        for entity in entities.iter_mut() {
            self.apply(entity);
        }
    }
}

pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

// ============================================================================
// CANONICAL RANKING
// ============================================================================

/// The one ranking every consumer must use:
///   1. score, descending (unscored last)
///   2. tie-break metric, descending (unknown last)
///   3. CNPJ, ascending
pub fn rank_order(a: &InsurerEntity, b: &InsurerEntity, tie_break: TieBreak) -> Ordering {
    desc_nones_last(a.score(), b.score())
        .then_with(|| desc_nones_last(tie_break.metric(a), tie_break.metric(b)))
        .then_with(|| a.identity().cmp(b.identity()))
}

fn desc_nones_last(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Human-readable description of `rank_order`, published with the methodology
pub fn tie_break_description(methodology: &Methodology) -> String {
    format!(
        "score desc (unscored last), then {} desc (unknown last), then cnpj asc",
        methodology.tie_break.as_str()
    )
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::resolve;
    use crate::model::Segment;

    fn components(pairs: &[(&str, Option<f64>)]) -> BTreeMap<String, Option<f64>> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn entity(cnpj: &str, comps: &[(&str, Option<f64>)], premiums: Option<f64>) -> InsurerEntity {
        let methodology = Methodology::builtin().unwrap();
        let mut e = InsurerEntity::new(resolve(cnpj).unwrap(), "X".to_string(), Segment::S4);
        e.components = components(comps);
        e.financials.premiums = premiums;
        ScoringEngine::new(&methodology).apply(&mut e);
        e
    }

    #[test]
    fn test_full_weighted_sum() {
        let m = Methodology::builtin().unwrap();
        let engine = ScoringEngine::new(&m);

        let score = engine.score(&components(&[
            ("solvency", Some(80.0)),
            ("reputation", Some(60.0)),
            ("products", Some(40.0)),
        ]));
        // 0.45*80 + 0.40*60 + 0.15*40 = 36 + 24 + 6
        assert_eq!(score, Some(66.0));
    }

    #[test]
    fn test_two_component_renormalisation() {
        let m = Methodology::builtin().unwrap();
        let engine = ScoringEngine::new(&m);

        let score = engine.score(&components(&[
            ("solvency", Some(72.0)),
            ("reputation", Some(84.0)),
            ("products", None),
        ]));
        // (0.45*72 + 0.40*84) / 0.85 = 77.647...
        assert_eq!(score, Some(77.6));
    }

    #[test]
    fn test_single_component_gets_full_weight() {
        let m = Methodology::builtin().unwrap();
        let engine = ScoringEngine::new(&m);

        let score = engine.score(&components(&[("solvency", Some(60.0)), ("reputation", None)]));
        assert_eq!(score, Some(60.0));
    }

    #[test]
    fn test_all_absent_means_unscored() {
        let m = Methodology::builtin().unwrap();
        let engine = ScoringEngine::new(&m);

        assert_eq!(engine.score(&components(&[])), None);
        assert_eq!(
            engine.score(&components(&[("solvency", None), ("reputation", None), ("products", None)])),
            None
        );
    }

    #[test]
    fn test_zero_is_a_real_score() {
        let m = Methodology::builtin().unwrap();
        let engine = ScoringEngine::new(&m);
        assert_eq!(engine.score(&components(&[("reputation", Some(0.0))])), Some(0.0));
    }

    #[test]
    fn test_explain_decomposition() {
        let m = Methodology::builtin().unwrap();
        let engine = ScoringEngine::new(&m);

        let breakdown = engine.explain(&components(&[("solvency", Some(50.0)), ("products", Some(100.0))]));
        assert_eq!(breakdown.missing, vec!["reputation".to_string()]);
        assert_eq!(breakdown.contributions.len(), 2);

        let total_effective: f64 = breakdown.contributions.iter().map(|c| c.effective_weight).sum();
        assert!((total_effective - 1.0).abs() < 1e-9);

        // (0.45*50 + 0.15*100) / 0.60 = 62.5
        assert_eq!(breakdown.score, Some(62.5));
    }

    #[test]
    fn test_score_stays_in_range() {
        let m = Methodology::builtin().unwrap();
        let engine = ScoringEngine::new(&m);
        for (a, b, c) in [(0.0, 0.0, 0.0), (100.0, 100.0, 100.0), (100.0, 0.0, 55.5)] {
            let s = engine
                .score(&components(&[("solvency", Some(a)), ("reputation", Some(b)), ("products", Some(c))]))
                .unwrap();
            assert!((0.0..=100.0).contains(&s));
        }
    }

    #[test]
    fn test_rounding() {
        assert_eq!(round_to(77.647, 1), 77.6);
        assert_eq!(round_to(77.65, 0), 78.0);
        assert_eq!(round_to(12.346, 2), 12.35);
    }

    #[test]
    fn test_apply_sets_entity_score() {
        let e = entity("12345678000195", &[("solvency", Some(60.0))], None);
        assert_eq!(e.score(), Some(60.0));

        let unscored = entity("12345678000195", &[("solvency", None)], None);
        assert_eq!(unscored.score(), None);
    }

    #[test]
    fn test_rank_order_score_then_premiums_then_cnpj() {
        let high = entity("11222333000181", &[("solvency", Some(90.0))], Some(1.0));
        let tie_big = entity("12345678000195", &[("solvency", Some(70.0))], Some(5.0e9));
        let tie_small = entity("33000167000101", &[("solvency", Some(70.0))], Some(1.0e6));
        let tie_unknown = entity("11444777000161", &[("solvency", Some(70.0))], None);
        let unscored = entity("06990590000123", &[], Some(9.9e12));

        let mut list = vec![
            unscored.clone(),
            tie_unknown.clone(),
            tie_small.clone(),
            high.clone(),
            tie_big.clone(),
        ];
        list.sort_by(|a, b| rank_order(a, b, TieBreak::Premiums));

        let order: Vec<&str> = list.iter().map(|e| e.identity().as_str()).collect();
        assert_eq!(
            order,
            vec![
                high.identity().as_str(),
                tie_big.identity().as_str(),
                tie_small.identity().as_str(),
                tie_unknown.identity().as_str(),
                unscored.identity().as_str(),
            ]
        );
    }

    #[test]
    fn test_rank_order_equal_scores_and_premiums_use_cnpj() {
        let a = entity("11222333000181", &[("solvency", Some(70.0))], Some(10.0));
        let b = entity("12345678000195", &[("solvency", Some(70.0))], Some(10.0));
        assert_eq!(rank_order(&a, &b, TieBreak::Premiums), Ordering::Less);
        assert_eq!(rank_order(&b, &a, TieBreak::Premiums), Ordering::Greater);
    }

    #[test]
    fn test_rank_order_net_worth_tie_break() {
        let mut small = entity("11222333000181", &[("solvency", Some(70.0))], Some(9.0e9));
        let mut large = entity("12345678000195", &[("solvency", Some(70.0))], Some(1.0));
        small.financials.net_worth = Some(1.0);
        large.financials.net_worth = Some(5.0e8);

        assert_eq!(rank_order(&large, &small, TieBreak::NetWorth), Ordering::Less);
        assert_eq!(rank_order(&large, &small, TieBreak::Premiums), Ordering::Greater);
    }
}
