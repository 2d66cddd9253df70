//! Storage trait definitions for posture run records
//!
//! A run record is published exactly once under its run identifier and is
//! immutable afterwards. Stores resolve the latest and previous runs and
//! return full records for delta comparison.
//!
//! In-memory fakes are provided for testing via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// SHA-256 hex digest of the exact bytes a record was stored as.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl From<ContentDigest> for String {
    fn from(d: ContentDigest) -> Self {
        d.0
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Run records
// ---------------------------------------------------------------------------

/// Index entry for one published run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    /// Digest of the stored record bytes.
    pub digest: ContentDigest,
    pub size_bytes: u64,
}

/// A run record as retrieved from a store, digest already verified.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRun {
    pub manifest: RunManifest,
    pub record: serde_json::Value,
}

/// Reject identifiers that cannot be used as a single path component.
pub fn validate_run_id(run_id: &str) -> StorageResult<()> {
    let reason = if run_id.is_empty() {
        Some("must not be empty")
    } else if run_id.starts_with('.') {
        Some("must not start with '.'")
    } else if !run_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        Some("only ASCII alphanumerics, '-', '_' and '.' are allowed")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StorageError::InvalidRunId {
            run_id: run_id.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// Encode a record the way every store persists it.
pub fn encode_record(record: &serde_json::Value) -> StorageResult<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(record)?)
}

/// Check stored bytes against the manifest digest.
pub fn verify_record_bytes(manifest: &RunManifest, bytes: &[u8]) -> StorageResult<()> {
    let actual = ContentDigest::from_bytes(bytes);
    if actual != manifest.digest {
        return Err(StorageError::DigestMismatch {
            run_id: manifest.run_id.clone(),
            expected: manifest.digest.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

/// Newest first; identical timestamps fall back to descending run id.
pub fn sort_newest_first(manifests: &mut [RunManifest]) {
    manifests.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.run_id.cmp(&a.run_id))
    });
}

// ---------------------------------------------------------------------------
// RunStore
// ---------------------------------------------------------------------------

/// Immutable, append-only run record store.
///
/// Guarantees:
/// - `publish` is all-or-nothing: a failed publish leaves no trace.
/// - A published run id can never be overwritten.
/// - `get` returns exactly the published record or a digest error.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Persist a finalized record under `run_id`.
    async fn publish(
        &self,
        run_id: &str,
        created_at: DateTime<Utc>,
        record: &serde_json::Value,
    ) -> StorageResult<RunManifest>;

    /// Retrieve and verify a run record.
    async fn get(&self, run_id: &str) -> StorageResult<StoredRun>;

    /// All published runs, newest first.
    async fn list(&self) -> StorageResult<Vec<RunManifest>>;

    async fn contains(&self, run_id: &str) -> StorageResult<bool>;

    /// Most recent run, if any.
    async fn latest(&self) -> StorageResult<Option<RunManifest>> {
        Ok(self.list().await?.into_iter().next())
    }

    /// Run published immediately before the latest one.
    async fn previous(&self) -> StorageResult<Option<RunManifest>> {
        Ok(self.list().await?.into_iter().nth(1))
    }
}
