//! Error taxonomy for the posture assessment core.

use crate::graph::GraphError;
use crate::taxonomy::TaxonomyIssue;

fn format_issues(issues: &[TaxonomyIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("[{}] {}: {}", i.control_id, i.field, i.detail))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Fatal errors of the deterministic pipeline.
///
/// Every variant names the pack, control or key involved so an operator
/// can act on it without reproducing the input data.
#[derive(Debug, thiserror::Error)]
pub enum PostureError {
    #[error("control pack {pack} is version-locked: expected checksum {expected}, got {actual}")]
    VersionLockViolation {
        pack: String,
        expected: String,
        actual: String,
    },

    #[error("{} taxonomy violation(s): {}", .violations.len(), format_issues(.violations))]
    TaxonomyViolation { violations: Vec<TaxonomyIssue> },

    #[error("schema drift in {file}: {detail}")]
    SchemaDrift { file: String, detail: String },

    #[error("merge isolation violated at protected key '{key}' (first difference at '{pointer}')")]
    MergeIsolationViolation { key: String, pointer: String },

    #[error("control pack {pack} is not frozen; production runs require allow_unfrozen_packs")]
    UnfrozenPack { pack: String },

    #[error("control pack {pack} not found at {path}")]
    PackNotFound { pack: String, path: String },

    #[error("result for control {control_id} does not belong to pack {pack}")]
    CrossPackReference { control_id: String, pack: String },

    #[error("more than one result for control {control_id}")]
    DuplicateResult { control_id: String },

    #[error("results for pack {pack} are missing controls: {}", missing.join(", "))]
    IncompleteResults { pack: String, missing: Vec<String> },

    #[error("cannot canonicalize value: {0}")]
    Canonicalization(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("dependency graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("run store error: {0}")]
    Store(#[from] posture_store::StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for posture core operations.
pub type Result<T> = std::result::Result<T, PostureError>;
