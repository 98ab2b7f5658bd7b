// Insurer Registry - Core Library
// Resolves, merges and scores insurers from public registries into one
// published artifact. Exposes every stage for the CLI and tests.

pub mod error;
pub mod model;
pub mod identity;      // CNPJ canonicalisation + grouping
pub mod methodology;   // Weights, precedence, scales (declarative)
pub mod merge;         // Many source views → one insurer
pub mod scoring;       // Weighted composite + canonical ranking
pub mod artifact;      // Public schema, atomic write, validation
pub mod guard;         // Count / flag regression guard
pub mod sources;       // File-backed registry adapters
pub mod pipeline;      // End-to-end build

// Re-export commonly used types
pub use error::{PipelineError, RejectionReason};
pub use model::{
    ComplaintStats, ComponentReading, ComponentValue, Financials, InsurerEntity,
    RawRecord, RecordAttributes, Segment, SourceBatch, SourceDescriptor, SourceKind,
};
pub use identity::{
    group_by_identity, pad_numeric_identity, resolve,
    CanonicalIdentity, Rejection, Resolution,
};
pub use methodology::{ComponentDefinition, Methodology, ScaleStep, TieBreak};
pub use merge::{MergeEngine, MergeOutcome, B2B_FLAG};
pub use scoring::{rank_order, tie_break_description, Contribution, ScoreBreakdown, ScoringEngine};
pub use artifact::{
    build, validate, validate_file, write_atomic,
    Artifact, BuildStats, Expectations, InsurerData, InsurerRecord, Meta,
    MethodologyBlock, SourceStatus, SourceSummary, SCHEMA_VERSION,
};
pub use guard::{published_count, PublishGuard};
pub use sources::{
    default_adapters, default_file_name, get_adapter, SourceAdapter,
    ComplaintsAdapter, ParticipantsAdapter, ProductsAdapter, RegulatoryAdapter, SolvencyAdapter,
};
pub use pipeline::{assemble, load_sources, publish, run, run_with, BuildConfig, BuildSummary};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
