// 🛡️ Publish Guard - Refuse to replace a good artifact with a worse one
//
// A build that suddenly lists far fewer insurers is a pipeline regression, not
// news. A required flag nobody carries is only reported: that flag usually
// comes from a single registry, and losing one registry degrades the build
// instead of stopping it.

use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::artifact::Artifact;
use crate::error::PipelineError;
use crate::methodology::Methodology;

#[derive(Debug, Clone, PartialEq)]
pub struct PublishGuard {
    pub min_count: usize,

    /// Largest tolerated drop versus the live artifact, as a fraction (0.20 = 20%)
    pub max_drop_pct: f64,

    /// Flags reported when no insurer carries them; never a refusal
    pub required_flags: Vec<String>,
}

impl Default for PublishGuard {
    fn default() -> Self {
        PublishGuard {
            min_count: 1,
            max_drop_pct: 0.20,
            required_flags: Vec::new(),
        }
    }
}

impl PublishGuard {
    pub fn new(min_count: usize, max_drop_pct: f64) -> Self {
        PublishGuard {
            min_count,
            max_drop_pct,
            required_flags: Vec::new(),
        }
    }

    pub fn with_required_flags(mut self, methodology: &Methodology) -> Self {
        self.required_flags = methodology.required_flags.clone();
        self
    }

    /// Check a candidate artifact against the one currently published
    pub fn check(&self, candidate: &Artifact, previous_count: Option<usize>) -> Result<(), PipelineError> {
        let count = candidate.insurers.len();

        if count == 0 {
            return Err(PipelineError::PublishRefused("artifact has zero insurers".to_string()));
        }

        if count < self.min_count {
            return Err(PipelineError::PublishRefused(format!(
                "insurer count {} is below the minimum {}",
                count, self.min_count
            )));
        }

        if let Some(previous) = previous_count.filter(|p| *p > 0) {
            let drop = previous.saturating_sub(count) as f64 / previous as f64;
            if drop > self.max_drop_pct {
                return Err(PipelineError::PublishRefused(format!(
                    "insurer count fell from {} to {} ({:.1}% drop, limit {:.1}%)",
                    previous,
                    count,
                    drop * 100.0,
                    self.max_drop_pct * 100.0
                )));
            }
        }

        for flag in &self.required_flags {
            let carried = candidate
                .insurers
                .iter()
                .any(|i| i.flags.get(flag).copied().unwrap_or(false));
            if !carried {
                warn!(flag = %flag, count, "no insurer carries required flag; publishing degraded artifact");
            }
        }

        info!(count, previous = ?previous_count, "publish guard passed");
        Ok(())
    }
}

/// Insurer count of the artifact currently at `path`.
///
/// Reads both v1 and v2 shapes. A missing or unreadable file means there is
/// nothing to compare against.
pub fn published_count(path: &Path) -> Option<usize> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => return None,
    };

    let value: Value = match serde_json::from_str(&content) {
        Ok(value) => value,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "live artifact is not valid JSON; skipping count comparison");
            return None;
        }
    };

    value
        .get("insurers")
        .and_then(Value::as_array)
        .map(|insurers| insurers.len())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{build, BuildStats};
    use crate::identity::resolve;
    use crate::model::{InsurerEntity, Segment};
    use std::collections::BTreeMap;

    const IDS: [&str; 5] = [
        "12345678000195",
        "11222333000181",
        "33000167000101",
        "11444777000161",
        "06990590000123",
    ];

    fn artifact_with(n: usize, flagged: bool) -> Artifact {
        let m = Methodology::builtin().unwrap();
        let entities = IDS
            .iter()
            .take(n)
            .map(|id| {
                let mut e = InsurerEntity::new(resolve(id).unwrap(), "Seguradora".to_string(), Segment::S4);
                e.flags.insert("openInsuranceParticipant".to_string(), flagged);
                e
            })
            .collect();
        build(entities, BTreeMap::new(), &m, BuildStats::default()).unwrap()
    }

    fn guard() -> PublishGuard {
        PublishGuard::new(1, 0.20).with_required_flags(&Methodology::builtin().unwrap())
    }

    #[test]
    fn test_guard_passes_healthy_build() {
        assert!(guard().check(&artifact_with(5, true), Some(5)).is_ok());
        assert!(guard().check(&artifact_with(4, true), Some(5)).is_ok());
        assert!(guard().check(&artifact_with(1, true), None).is_ok());
    }

    #[test]
    fn test_guard_refuses_empty() {
        let err = guard().check(&artifact_with(0, true), None).unwrap_err();
        assert!(matches!(err, PipelineError::PublishRefused(_)));
    }

    #[test]
    fn test_guard_refuses_below_minimum() {
        let strict = PublishGuard::new(3, 0.20);
        assert!(strict.check(&artifact_with(2, true), None).is_err());
        assert!(strict.check(&artifact_with(3, true), None).is_ok());
    }

    #[test]
    fn test_guard_refuses_large_drop() {
        // 5 -> 3 is a 40% drop
        let err = guard().check(&artifact_with(3, true), Some(5)).unwrap_err();
        assert!(err.to_string().contains("fell from 5 to 3"));
    }

    #[test]
    fn test_guard_allows_missing_required_flag() {
        // participant registry down: nobody flagged, counts still healthy
        assert!(guard().check(&artifact_with(3, false), None).is_ok());
        assert!(guard().check(&artifact_with(5, false), Some(5)).is_ok());
    }

    #[test]
    fn test_published_count_reads_v1_and_v2() {
        let dir = tempfile::tempdir().unwrap();

        let v1 = dir.path().join("v1.json");
        fs::write(&v1, r#"{"schema_version": 1, "insurers": [{"cnpj": "1"}, {"cnpj": "2"}]}"#).unwrap();
        assert_eq!(published_count(&v1), Some(2));

        let v2 = dir.path().join("v2.json");
        fs::write(&v2, serde_json::to_string(&artifact_with(4, true)).unwrap()).unwrap();
        assert_eq!(published_count(&v2), Some(4));

        let broken = dir.path().join("broken.json");
        fs::write(&broken, "{not json").unwrap();
        assert_eq!(published_count(&broken), None);

        assert_eq!(published_count(&dir.path().join("missing.json")), None);
    }
}
