// 📦 Artifact Builder - Merged insurers → published insurers.json
//
// The artifact is the public contract. Maps are BTreeMaps so key order is
// stable, absent values are omitted (never 0 or null), and the file is only
// ever replaced by an atomic rename.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::identity::{resolve, CanonicalIdentity};
use crate::methodology::Methodology;
use crate::model::{ComplaintStats, InsurerEntity, Segment, SourceDescriptor, SourceKind};
use crate::scoring::{rank_order, tie_break_description};

/// Bumped on every field-shape change. v1 was the flat shape without
/// provenance or methodology.
pub const SCHEMA_VERSION: u32 = 2;

// ============================================================================
// SOURCE SUMMARY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Ok,
    Unavailable,
}

/// What one source contributed to this build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub files: Vec<String>,
    pub record_count: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieved_at: Option<DateTime<Utc>>,

    pub status: SourceStatus,

    /// Records turned away by the identity resolver
    #[serde(default)]
    pub rejected: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceSummary {
    pub fn loaded(descriptor: &SourceDescriptor, record_count: usize) -> Self {
        SourceSummary {
            files: descriptor.files.clone(),
            record_count,
            retrieved_at: Some(descriptor.retrieved_at),
            status: SourceStatus::Ok,
            rejected: 0,
            error: None,
        }
    }

    pub fn unavailable(error: impl Into<String>) -> Self {
        SourceSummary {
            files: Vec::new(),
            record_count: 0,
            retrieved_at: None,
            status: SourceStatus::Unavailable,
            rejected: 0,
            error: Some(error.into()),
        }
    }

    pub fn with_rejected(mut self, rejected: usize) -> Self {
        self.rejected = rejected;
        self
    }
}

// ============================================================================
// ARTIFACT SCHEMA
// ============================================================================

/// How the scores in this artifact were produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodologyBlock {
    pub version: String,
    pub weights: BTreeMap<String, f64>,
    pub score_precision: u32,
    pub source_precedence: Vec<SourceKind>,
    pub tie_break: String,
}

impl From<&Methodology> for MethodologyBlock {
    fn from(methodology: &Methodology) -> Self {
        MethodologyBlock {
            version: methodology.version.clone(),
            weights: methodology
                .components
                .iter()
                .map(|c| (c.key.clone(), c.weight))
                .collect(),
            score_precision: methodology.score_precision,
            source_precedence: methodology.source_precedence.clone(),
            tie_break: tie_break_description(methodology),
        }
    }
}

/// Counters that must not disappear silently
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildStats {
    /// Rejected identities by reason key
    pub rejections: BTreeMap<String, usize>,
    pub schema_mismatches: usize,
    pub excluded: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    pub count: usize,
    pub build_id: Uuid,

    /// SHA-256 of the serialised insurer list
    pub content_sha256: String,

    pub rejections: BTreeMap<String, usize>,
    pub schema_mismatches: usize,
    pub excluded: usize,
    pub duplicates_dropped: usize,
    pub degraded_sources: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsurerData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub premiums: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss_ratio: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_worth: Option<f64>,

    /// Present components only
    #[serde(default)]
    pub components: BTreeMap<String, f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complaints: Option<ComplaintStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsurerRecord {
    pub cnpj: String,
    pub cnpj_formatted: String,
    pub name: String,
    pub segment: Segment,
    pub flags: BTreeMap<String, bool>,
    pub data: InsurerData,

    #[serde(default)]
    pub provenance: BTreeMap<String, Vec<SourceKind>>,
}

impl InsurerRecord {
    fn from_entity(entity: &InsurerEntity, known_flags: &[String]) -> Self {
        let mut flags = entity.flags.clone();
        for flag in known_flags {
            flags.entry(flag.clone()).or_insert(false);
        }

        let components = entity
            .components
            .iter()
            .filter_map(|(k, v)| v.map(|v| (k.clone(), v)))
            .collect();

        InsurerRecord {
            cnpj: entity.identity().as_str().to_string(),
            cnpj_formatted: entity.identity().formatted(),
            name: entity.name.clone(),
            segment: entity.segment,
            flags,
            data: InsurerData {
                score: entity.score(),
                premiums: entity.financials.premiums,
                claims: entity.financials.claims,
                loss_ratio: entity.financials.loss_ratio(),
                net_worth: entity.financials.net_worth,
                components,
                complaints: entity.complaints.clone(),
            },
            provenance: entity.provenance.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub schema_version: u32,
    pub generated_at: DateTime<Utc>,
    pub methodology: MethodologyBlock,
    pub sources: BTreeMap<String, SourceSummary>,
    pub meta: Meta,
    pub insurers: Vec<InsurerRecord>,
}

impl Artifact {
    pub fn find(&self, cnpj: &str) -> Option<&InsurerRecord> {
        self.insurers.iter().find(|i| i.cnpj == cnpj)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read artifact: {:?}", path.as_ref()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse artifact: {:?}", path.as_ref()))
    }
}

// ============================================================================
// BUILD
// ============================================================================

/// Assemble the artifact from scored entities.
///
/// Identities are deduplicated again here (last one wins) and the survivors
/// are ordered by the canonical ranking.
pub fn build(
    entities: Vec<InsurerEntity>,
    sources: BTreeMap<String, SourceSummary>,
    methodology: &Methodology,
    stats: BuildStats,
) -> Result<Artifact> {
    let mut unique: BTreeMap<CanonicalIdentity, InsurerEntity> = BTreeMap::new();
    let mut duplicates_dropped = 0;

    for entity in entities {
        let identity = entity.identity().clone();
        if unique.insert(identity.clone(), entity).is_some() {
            duplicates_dropped += 1;
            warn!(cnpj = %identity, "duplicate identity reached the artifact builder; keeping the last");
        }
    }

    let mut ranked: Vec<InsurerEntity> = unique.into_values().collect();
    ranked.sort_by(|a, b| rank_order(a, b, methodology.tie_break));

    let insurers: Vec<InsurerRecord> = ranked
        .iter()
        .map(|e| InsurerRecord::from_entity(e, &methodology.known_flags))
        .collect();

    let content_sha256 = content_hash(&insurers)?;

    let degraded_sources = sources
        .iter()
        .filter(|(_, s)| s.status == SourceStatus::Unavailable)
        .map(|(name, _)| name.clone())
        .collect();

    let meta = Meta {
        count: insurers.len(),
        build_id: Uuid::new_v4(),
        content_sha256,
        rejections: stats.rejections,
        schema_mismatches: stats.schema_mismatches,
        excluded: stats.excluded,
        duplicates_dropped,
        degraded_sources,
    };

    debug!(count = meta.count, sha256 = %meta.content_sha256, "artifact assembled");

    Ok(Artifact {
        schema_version: SCHEMA_VERSION,
        generated_at: Utc::now(),
        methodology: MethodologyBlock::from(methodology),
        sources,
        meta,
        insurers,
    })
}

fn content_hash(insurers: &[InsurerRecord]) -> Result<String> {
    let bytes = serde_json::to_vec(insurers).context("Failed to serialise insurers for hashing")?;
    let digest = Sha256::digest(&bytes);
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}

// ============================================================================
// ATOMIC WRITE
// ============================================================================

/// Serialise `value` next to `path` and rename it into place.
///
/// Readers see either the old file or the complete new one. On any failure the
/// temp file is removed and whatever was at `path` is left as it was.
pub fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), PipelineError> {
    let fail = |message: String| PipelineError::ArtifactWriteFailure {
        path: path.display().to_string(),
        message,
    };

    let parent: PathBuf = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(|e| fail(format!("create {}: {}", parent.display(), e)))?;

    let mut tmp = NamedTempFile::new_in(&parent).map_err(|e| fail(format!("temp file: {}", e)))?;

    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer_pretty(&mut writer, value).map_err(|e| fail(format!("serialise: {}", e)))?;
        writer.write_all(b"\n").map_err(|e| fail(e.to_string()))?;
        writer.flush().map_err(|e| fail(e.to_string()))?;
    }

    tmp.as_file().sync_all().map_err(|e| fail(format!("sync: {}", e)))?;
    tmp.persist(path).map_err(|e| fail(format!("rename: {}", e.error)))?;

    debug!(path = %path.display(), "artifact written");
    Ok(())
}

// ============================================================================
// VALIDATION
// ============================================================================

/// What a published artifact must satisfy
#[derive(Debug, Clone, PartialEq)]
pub struct Expectations {
    pub min_files_per_source: usize,
    pub required_flags: Vec<String>,
}

impl Default for Expectations {
    fn default() -> Self {
        Expectations {
            min_files_per_source: 1,
            required_flags: Vec::new(),
        }
    }
}

impl Expectations {
    pub fn from_methodology(methodology: &Methodology) -> Self {
        Expectations {
            required_flags: methodology.required_flags.clone(),
            ..Default::default()
        }
    }

    pub fn with_min_files(mut self, min_files: usize) -> Self {
        self.min_files_per_source = min_files;
        self
    }
}

/// Smoke checks over a built artifact. The first violation is returned.
pub fn validate(artifact: &Artifact, expectations: &Expectations) -> Result<()> {
    if artifact.schema_version != SCHEMA_VERSION {
        bail!(
            "schema_version is {}, expected {}",
            artifact.schema_version,
            SCHEMA_VERSION
        );
    }

    if artifact.insurers.is_empty() {
        bail!("artifact has no insurers");
    }

    if artifact.meta.count != artifact.insurers.len() {
        bail!(
            "meta.count is {} but {} insurers are listed",
            artifact.meta.count,
            artifact.insurers.len()
        );
    }

    for (name, summary) in &artifact.sources {
        if summary.files.len() < expectations.min_files_per_source {
            bail!(
                "source {} lists {} files, expected at least {}",
                name,
                summary.files.len(),
                expectations.min_files_per_source
            );
        }
    }

    let mut seen = BTreeSet::new();
    for insurer in &artifact.insurers {
        if resolve(&insurer.cnpj).map(|id| id.as_str() != insurer.cnpj).unwrap_or(true) {
            bail!("insurer has a non-canonical cnpj {:?}", insurer.cnpj);
        }
        if !seen.insert(insurer.cnpj.as_str()) {
            bail!("cnpj {} appears more than once", insurer.cnpj);
        }
        if insurer.name.trim().is_empty() {
            bail!("insurer {} has an empty name", insurer.cnpj);
        }
        if let Some(score) = insurer.data.score {
            if !(0.0..=100.0).contains(&score) {
                bail!("insurer {} has score {} outside [0, 100]", insurer.cnpj, score);
            }
        }
        for (key, value) in &insurer.data.components {
            if !(0.0..=100.0).contains(value) {
                bail!("insurer {} component {} = {} outside [0, 100]", insurer.cnpj, key, value);
            }
        }
    }

    for flag in &expectations.required_flags {
        if !artifact
            .insurers
            .iter()
            .any(|i| i.flags.get(flag).copied().unwrap_or(false))
        {
            bail!("no insurer carries required flag {}", flag);
        }
    }

    Ok(())
}

pub fn validate_file<P: AsRef<Path>>(path: P, expectations: &Expectations) -> Result<Artifact> {
    let artifact = Artifact::from_file(path.as_ref())?;
    validate(&artifact, expectations)
        .with_context(|| format!("Artifact failed validation: {:?}", path.as_ref()))?;
    Ok(artifact)
}

// ============================================================================
// TESTS
// ============================================================================
