// 🚨 Error Taxonomy - What can go wrong during a build
//
// Per-record and per-source failures are recovered locally and turned into
// counters on the build summary. Only the variants marked FATAL abort a build.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::SourceKind;

// ============================================================================
// REJECTION REASON
// ============================================================================

/// Why a raw tax identifier could not be canonicalised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// Digit count after stripping punctuation is not 14
    #[error("invalid length")]
    InvalidLength,

    /// Check digits do not match (or the identifier is a repeated-digit placeholder)
    #[error("invalid checksum")]
    InvalidChecksum,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::InvalidLength => "invalid_length",
            RejectionReason::InvalidChecksum => "invalid_checksum",
        }
    }
}

// ============================================================================
// PIPELINE ERROR
// ============================================================================

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Raw record's tax ID failed validation (recovered: record excluded)
    #[error("{source_kind}: identity {raw:?} rejected ({reason})")]
    IdentityRejected {
        source_kind: SourceKind,
        raw: String,
        reason: RejectionReason,
    },

    /// An adapter failed entirely (recovered: source treated as absent)
    #[error("source {source_kind} unavailable: {message}")]
    SourceUnavailable {
        source_kind: SourceKind,
        message: String,
    },

    /// A component value matched no known shape (recovered: component absent)
    #[error("{source_kind}: component {component} has an unrecognised shape")]
    SchemaMismatch {
        source_kind: SourceKind,
        component: String,
    },

    /// FATAL: the artifact could not be written; the previous one stays live
    #[error("failed to write artifact {path}: {message}")]
    ArtifactWriteFailure { path: String, message: String },

    /// FATAL: every adapter failed
    #[error("no usable sources: all {attempted} adapters failed")]
    NoUsableSources { attempted: usize },

    /// FATAL: the publish guard refused to replace the live artifact
    #[error("publish refused: {0}")]
    PublishRefused(String),
}

impl PipelineError {
    /// Whether this error aborts the build
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::ArtifactWriteFailure { .. }
                | PipelineError::NoUsableSources { .. }
                | PipelineError::PublishRefused(_)
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================
