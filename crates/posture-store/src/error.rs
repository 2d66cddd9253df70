//! Error types for posture-store

use thiserror::Error;

/// Errors returned by [`RunStore`](crate::RunStore) implementations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No run record exists for the identifier.
    #[error("run not found: {run_id}")]
    NotFound { run_id: String },

    /// A run record is already published under this identifier.
    #[error("run already exists: {run_id}")]
    AlreadyExists { run_id: String },

    /// Run identifiers become directory names and must stay path-safe.
    #[error("invalid run id '{run_id}': {reason}")]
    InvalidRunId { run_id: String, reason: String },

    /// The stored record no longer hashes to its recorded digest.
    #[error("digest mismatch for run {run_id}: expected {expected}, got {actual}")]
    DigestMismatch {
        run_id: String,
        expected: String,
        actual: String,
    },

    /// Malformed digest string.
    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    /// Serialization error
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Background task did not complete.
    #[error("store task failed: {0}")]
    Task(String),
}
