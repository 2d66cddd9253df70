//! In-memory fakes for storage traits (testing only)
//!
//! `MemoryRunStore` satisfies the [`RunStore`] contract without touching disk.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryRunStore
// ---------------------------------------------------------------------------

/// In-memory run store backed by a `HashMap<run_id, (manifest, bytes)>`.
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    runs: Mutex<HashMap<String, (RunManifest, Vec<u8>)>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of published runs.
    pub fn len(&self) -> usize {
        self.runs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrite the stored bytes of a run, bypassing the publish contract.
    pub fn corrupt(&self, run_id: &str, bytes: Vec<u8>) {
        if let Some(entry) = self.runs.lock().unwrap_or_else(|e| e.into_inner()).get_mut(run_id) {
            entry.1 = bytes;
        }
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn publish(
        &self,
        run_id: &str,
        created_at: DateTime<Utc>,
        record: &serde_json::Value,
    ) -> StorageResult<RunManifest> {
        validate_run_id(run_id)?;
        let bytes = encode_record(record)?;
        let manifest = RunManifest {
            run_id: run_id.to_string(),
            created_at,
            digest: ContentDigest::from_bytes(&bytes),
            size_bytes: bytes.len() as u64,
        };
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        if runs.contains_key(run_id) {
            return Err(StorageError::AlreadyExists {
                run_id: run_id.to_string(),
            });
        }
        runs.insert(run_id.to_string(), (manifest.clone(), bytes));
        Ok(manifest)
    }

    async fn get(&self, run_id: &str) -> StorageResult<StoredRun> {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        let (manifest, bytes) = runs.get(run_id).ok_or_else(|| StorageError::NotFound {
            run_id: run_id.to_string(),
        })?;
        verify_record_bytes(manifest, bytes)?;
        Ok(StoredRun {
            manifest: manifest.clone(),
            record: serde_json::from_slice(bytes)?,
        })
    }

    async fn list(&self) -> StorageResult<Vec<RunManifest>> {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        let mut manifests: Vec<RunManifest> = runs.values().map(|(m, _)| m.clone()).collect();
        sort_newest_first(&mut manifests);
        Ok(manifests)
    }

    async fn contains(&self, run_id: &str) -> StorageResult<bool> {
        Ok(self.runs.lock().unwrap_or_else(|e| e.into_inner()).contains_key(run_id))
    }
}
