// 🏭 Build Pipeline - adapters → resolver → merge → scoring → artifact
//
// Adapters run concurrently; everything after them runs once every adapter
// has either returned or been recorded as unavailable.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::artifact::{self, Artifact, BuildStats, Meta, SourceSummary};
use crate::error::PipelineError;
use crate::guard::{published_count, PublishGuard};
use crate::identity::group_by_identity;
use crate::merge::MergeEngine;
use crate::methodology::Methodology;
use crate::model::{SourceBatch, SourceKind};
use crate::scoring::ScoringEngine;
use crate::sources::{default_adapters, SourceAdapter};

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct BuildConfig {
    /// Where the artifact is published
    pub output: PathBuf,

    /// Directory holding the registry exports
    pub input_dir: PathBuf,

    /// Methodology override; the built-in one is used when unset
    pub methodology_path: Option<PathBuf>,

    pub min_insurers: usize,
    pub max_count_drop_pct: f64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            output: PathBuf::from("api/v1/insurers.json"),
            input_dir: PathBuf::from("data/raw"),
            methodology_path: None,
            min_insurers: 1,
            max_count_drop_pct: 0.20,
        }
    }
}

impl BuildConfig {
    /// Defaults overridden by INSURERS_OUTPUT, INSURERS_INPUT_DIR,
    /// INSURERS_METHODOLOGY, MIN_INSURERS_COUNT and MAX_COUNT_DROP_PCT
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = BuildConfig::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("INSURERS_OUTPUT") {
            config.output = PathBuf::from(v);
        }
        if let Some(v) = get("INSURERS_INPUT_DIR") {
            config.input_dir = PathBuf::from(v);
        }
        if let Some(v) = get("INSURERS_METHODOLOGY") {
            config.methodology_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("MIN_INSURERS_COUNT") {
            config.min_insurers = v
                .parse()
                .with_context(|| format!("MIN_INSURERS_COUNT is not a count: {:?}", v))?;
        }
        if let Some(v) = get("MAX_COUNT_DROP_PCT") {
            let pct: f64 = v
                .parse()
                .with_context(|| format!("MAX_COUNT_DROP_PCT is not a number: {:?}", v))?;
            if !(0.0..=1.0).contains(&pct) {
                return Err(anyhow!("MAX_COUNT_DROP_PCT must be within 0..=1, got {}", pct));
            }
            config.max_count_drop_pct = pct;
        }

        Ok(config)
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_input_dir(mut self, input_dir: impl Into<PathBuf>) -> Self {
        self.input_dir = input_dir.into();
        self
    }

    pub fn load_methodology(&self) -> Result<Methodology> {
        match &self.methodology_path {
            Some(path) => Methodology::from_file(path),
            None => Methodology::builtin(),
        }
    }

    pub fn guard(&self, methodology: &Methodology) -> PublishGuard {
        PublishGuard::new(self.min_insurers, self.max_count_drop_pct).with_required_flags(methodology)
    }
}

// ============================================================================
// BUILD SUMMARY
// ============================================================================

/// What a successful build published
#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    pub output: PathBuf,
    pub methodology_version: String,
    pub sources: BTreeMap<String, SourceSummary>,
    pub meta: Meta,
}

impl BuildSummary {
    fn new(output: &Path, artifact: &Artifact) -> Self {
        BuildSummary {
            output: output.to_path_buf(),
            methodology_version: artifact.methodology.version.clone(),
            sources: artifact.sources.clone(),
            meta: artifact.meta.clone(),
        }
    }
}

// ============================================================================
// STAGES
// ============================================================================

/// Outcome of one adapter
pub type SourceLoad = (SourceKind, Result<SourceBatch>);

/// Run every adapter on the blocking pool and wait for all of them.
///
/// A panicking adapter is reported as an error for its source only.
pub async fn load_sources(adapters: Vec<Box<dyn SourceAdapter>>) -> Vec<SourceLoad> {
    let handles: Vec<_> = adapters
        .into_iter()
        .map(|adapter| {
            let source = adapter.source();
            (source, tokio::task::spawn_blocking(move || adapter.load()))
        })
        .collect();

    let mut loads = Vec::with_capacity(handles.len());
    for (source, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(anyhow!("adapter task failed: {}", e)),
        };
        loads.push((source, result));
    }
    loads
}

/// Resolve, merge, score and assemble. No I/O.
pub fn assemble(loads: Vec<SourceLoad>, methodology: &Methodology) -> Result<Artifact> {
    let attempted = loads.len();
    let mut sources: BTreeMap<String, SourceSummary> = BTreeMap::new();
    let mut records = Vec::new();

    for (source, load) in loads {
        match load {
            Ok(batch) => {
                info!(source = %source, records = batch.records.len(), files = ?batch.descriptor.files, "source loaded");
                sources.insert(
                    source.as_str().to_string(),
                    SourceSummary::loaded(&batch.descriptor, batch.records.len()),
                );
                records.extend(batch.records);
            }
            Err(e) => {
                let err = PipelineError::SourceUnavailable {
                    source_kind: source,
                    message: format!("{:#}", e),
                };
                warn!(error = %err, "continuing without source");
                sources.insert(source.as_str().to_string(), SourceSummary::unavailable(format!("{:#}", e)));
            }
        }
    }

    if attempted == 0 || sources.values().all(|s| s.status == artifact::SourceStatus::Unavailable) {
        return Err(PipelineError::NoUsableSources { attempted }.into());
    }

    let resolution = group_by_identity(records);
    for source in SourceKind::ALL {
        if let Some(summary) = sources.get_mut(source.as_str()) {
            summary.rejected = resolution.rejected_count(source);
        }
    }
    if !resolution.rejections.is_empty() {
        warn!(
            rejected = resolution.rejections.len(),
            by_reason = ?resolution.rejections_by_reason(),
            "records with invalid identities excluded"
        );
    }

    let mut outcome = MergeEngine::new(methodology).merge(&resolution.grouped);
    for (source, count) in &outcome.schema_mismatches {
        warn!(source = %source, count, "component readings with unrecognised shape treated as absent");
    }

    ScoringEngine::new(methodology).apply_all(&mut outcome.entities);

    let stats = BuildStats {
        rejections: resolution
            .rejections_by_reason()
            .into_iter()
            .map(|(reason, count)| (reason.as_str().to_string(), count))
            .collect(),
        schema_mismatches: outcome.total_schema_mismatches(),
        excluded: outcome.excluded.len(),
    };

    artifact::build(outcome.entities, sources, methodology, stats)
}

/// Guard the candidate against the live artifact, then replace it atomically
pub fn publish(artifact: &Artifact, output: &Path, guard: &PublishGuard) -> Result<(), PipelineError> {
    guard.check(artifact, published_count(output))?;
    artifact::write_atomic(output, artifact)?;
    info!(path = %output.display(), count = artifact.meta.count, "artifact published");
    Ok(())
}

// ============================================================================
// ENTRY POINTS
// ============================================================================

/// Full build with the adapters for `config.input_dir`
pub async fn run(config: &BuildConfig) -> Result<BuildSummary> {
    let methodology = config.load_methodology()?;
    let adapters = default_adapters(&config.input_dir);
    run_with(config, &methodology, adapters).await
}

pub async fn run_with(
    config: &BuildConfig,
    methodology: &Methodology,
    adapters: Vec<Box<dyn SourceAdapter>>,
) -> Result<BuildSummary> {
    info!(
        methodology = %methodology.version,
        input = %config.input_dir.display(),
        adapters = adapters.len(),
        "build started"
    );

    let loads = load_sources(adapters).await;
    let artifact = assemble(loads, methodology)?;

    publish(&artifact, &config.output, &config.guard(methodology))?;

    let summary = BuildSummary::new(&config.output, &artifact);
    info!(
        build_id = %summary.meta.build_id,
        count = summary.meta.count,
        excluded = summary.meta.excluded,
        schema_mismatches = summary.meta.schema_mismatches,
        degraded = ?summary.meta.degraded_sources,
        "build finished"
    );
    Ok(summary)
}

// ============================================================================
// TESTS
// ============================================================================
