// ⚖️ Methodology - Weights, precedence and scales as data
//
// Everything that decides how a score is produced lives in one versioned JSON
// document, loaded once per build and never mutated while the build runs.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use crate::model::{ComponentValue, InsurerEntity, Segment, SourceKind};

const BUILTIN_METHODOLOGY: &str = include_str!("../config/methodology.json");

const WEIGHT_TOLERANCE: f64 = 1e-6;

// ============================================================================
// DEFINITIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDefinition {
    /// Canonical key written to the artifact
    pub key: String,

    /// Older key names sources still publish under
    #[serde(default)]
    pub aliases: Vec<String>,

    pub weight: f64,

    /// Declared raw scale for structured readings that carry none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_scale: Option<f64>,

    /// Cap at 100 instead of rejecting raw values above the scale
    #[serde(default)]
    pub saturate: bool,

    #[serde(default)]
    pub description: String,
}

/// Raw values up to `max` are multiplied by `factor`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleStep {
    pub max: f64,
    pub factor: f64,
}

/// Secondary ranking metric applied when scores tie
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    #[default]
    Premiums,
    NetWorth,
}

impl TieBreak {
    pub fn metric(&self, entity: &InsurerEntity) -> Option<f64> {
        match self {
            TieBreak::Premiums => entity.financials.premiums,
            TieBreak::NetWorth => entity.financials.net_worth,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TieBreak::Premiums => "premiums",
            TieBreak::NetWorth => "net_worth",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Methodology {
    pub version: String,
    pub source_precedence: Vec<SourceKind>,
    pub components: Vec<ComponentDefinition>,
    pub scale_ladder: Vec<ScaleStep>,

    #[serde(default = "default_precision")]
    pub score_precision: u32,

    #[serde(default)]
    pub tie_break: TieBreak,

    #[serde(default)]
    pub known_flags: Vec<String>,

    /// Flags the smoke validation expects at least one insurer to carry
    #[serde(default)]
    pub required_flags: Vec<String>,

    #[serde(default)]
    pub default_segment: Segment,

    #[serde(default)]
    pub exclude_name_substrings: Vec<String>,

    /// Name substrings marking reinsurers and corporate specialists.
    /// Matched with spaces and punctuation ignored.
    #[serde(default)]
    pub b2b_name_substrings: Vec<String>,

    /// Consumer-facing components left absent for B2B insurers
    #[serde(default)]
    pub b2b_suppressed_components: Vec<String>,
}

/// Lowercase letters and digits only, so "Swiss Re" and "SwissRe" compare equal
fn compact(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn default_precision() -> u32 {
    1
}

// ============================================================================
// LOADING
// ============================================================================

impl Methodology {
    /// The methodology shipped with the crate
    pub fn builtin() -> Result<Self> {
        Self::from_json_str(BUILTIN_METHODOLOGY).context("Built-in methodology is invalid")
    }

    /// Load and validate a methodology file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read methodology file: {:?}", path.as_ref()))?;

        Self::from_json_str(&content)
            .with_context(|| format!("Invalid methodology file: {:?}", path.as_ref()))
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let methodology: Methodology =
            serde_json::from_str(content).context("Failed to parse methodology JSON")?;
        methodology.validate()?;
        Ok(methodology)
    }

    pub fn validate(&self) -> Result<()> {
        if self.components.is_empty() {
            bail!("methodology defines no components");
        }

        let mut keys = BTreeSet::new();
        for def in &self.components {
            if def.weight < 0.0 || !def.weight.is_finite() {
                bail!("component {} has invalid weight {}", def.key, def.weight);
            }
            if let Some(scale) = def.raw_scale {
                if scale <= 0.0 {
                    bail!("component {} has non-positive raw_scale", def.key);
                }
            }
            for name in std::iter::once(&def.key).chain(def.aliases.iter()) {
                if !keys.insert(name.as_str()) {
                    bail!("component key or alias {} is defined twice", name);
                }
            }
        }

        let total: f64 = self.components.iter().map(|c| c.weight).sum();
        if (total - 1.0).abs() > WEIGHT_TOLERANCE {
            bail!("component weights sum to {}, expected 1.0", total);
        }

        let mut seen = BTreeSet::new();
        for source in &self.source_precedence {
            if !seen.insert(*source) {
                bail!("source {} appears twice in precedence", source);
            }
        }

        if self.scale_ladder.is_empty() {
            bail!("scale ladder is empty");
        }
        for pair in self.scale_ladder.windows(2) {
            if pair[1].max <= pair[0].max {
                bail!("scale ladder must be strictly ascending by max");
            }
        }
        if self.scale_ladder.iter().any(|s| s.max <= 0.0 || s.factor <= 0.0) {
            bail!("scale ladder steps must be positive");
        }

        for flag in &self.required_flags {
            if !self.known_flags.contains(flag) {
                bail!("required flag {} is not a known flag", flag);
            }
        }

        for key in &self.b2b_suppressed_components {
            if self.weight(key).is_none() {
                bail!("b2b suppressed component {} is not a component key", key);
            }
        }

        Ok(())
    }
}

// ============================================================================
// LOOKUPS
// ============================================================================

impl Methodology {
    /// Lower is more authoritative. Unlisted sources rank after listed ones,
    /// in declaration order of `SourceKind`.
    pub fn precedence_rank(&self, source: SourceKind) -> usize {
        match self.source_precedence.iter().position(|s| *s == source) {
            Some(pos) => pos,
            None => {
                let offset = SourceKind::ALL.iter().position(|s| *s == source).unwrap_or(0);
                self.source_precedence.len() + offset
            }
        }
    }

    /// Find the component a source key refers to, by canonical key or alias
    pub fn component_for_key(&self, key: &str) -> Option<&ComponentDefinition> {
        self.components
            .iter()
            .find(|c| c.key == key || c.aliases.iter().any(|a| a == key))
    }

    pub fn weight(&self, key: &str) -> Option<f64> {
        self.components.iter().find(|c| c.key == key).map(|c| c.weight)
    }

    /// Normalise one reading onto 0-100. `None` means the reading is unusable.
    ///
    /// Scalars are already on 0-100. Structured readings use their own scale,
    /// then the component's declared scale, then the magnitude ladder.
    pub fn normalize(&self, def: &ComponentDefinition, value: &ComponentValue) -> Option<f64> {
        let normalized = match value {
            ComponentValue::Scalar(v) => {
                if (0.0..=100.0).contains(v) {
                    *v
                } else {
                    return None;
                }
            }
            ComponentValue::Structured { raw_value, raw_scale } => {
                let raw = *raw_value;
                if raw < 0.0 || !raw.is_finite() {
                    return None;
                }
                match raw_scale.or(def.raw_scale) {
                    Some(scale) => {
                        if raw > scale && !def.saturate {
                            return None;
                        }
                        (raw / scale * 100.0).min(100.0)
                    }
                    None => {
                        let step = self.scale_ladder.iter().find(|s| raw <= s.max)?;
                        (raw * step.factor).min(100.0)
                    }
                }
            }
            ComponentValue::Unrecognized => return None,
        };

        // two decimals keeps 4.2 * 20 at 84 instead of 84.00000000000001
        Some((normalized * 100.0).round() / 100.0)
    }

    /// Reinsurers and corporate specialists have no consumer reputation
    pub fn is_b2b_name(&self, name: &str) -> bool {
        let key = compact(name);
        !key.is_empty()
            && self
                .b2b_name_substrings
                .iter()
                .map(|s| compact(s))
                .any(|s| !s.is_empty() && key.contains(&s))
    }

    pub fn is_b2b_suppressed(&self, component: &str) -> bool {
        self.b2b_suppressed_components.iter().any(|c| c == component)
    }

    pub fn is_excluded_name(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.exclude_name_substrings
            .iter()
            .any(|s| lower.contains(&s.to_lowercase()))
    }
}

// ============================================================================
// TESTS
// ============================================================================
