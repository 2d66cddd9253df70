//! Filesystem-backed run store.
//!
//! Layout: `<root>/runs/<run_id>/run.json` with a companion
//! `<root>/runs/<run_id>/manifest.json` holding the digest of `run.json`.
//!
//! Both files are written into a hidden staging directory next to the
//! final location and the directory is renamed into place, so a run is
//! either fully visible or absent.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::storage_traits::*;

const RECORD_FILE: &str = "run.json";
const MANIFEST_FILE: &str = "manifest.json";
const STAGING_PREFIX: &str = ".staging-";

/// Run store rooted at a directory on local disk.
#[derive(Debug, Clone)]
pub struct FsRunStore {
    runs_dir: PathBuf,
}

impl FsRunStore {
    /// Create a store rooted at `root`. Creates `root/runs/` if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let runs_dir = root.as_ref().join("runs");
        fs::create_dir_all(&runs_dir)?;
        Ok(Self { runs_dir })
    }

    /// Directory holding one subdirectory per published run.
    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs_dir.join(run_id)
    }
}

fn publish_blocking(
    runs_dir: &Path,
    manifest: &RunManifest,
    bytes: &[u8],
) -> StorageResult<()> {
    let target = runs_dir.join(&manifest.run_id);
    if target.exists() {
        return Err(StorageError::AlreadyExists {
            run_id: manifest.run_id.clone(),
        });
    }

    let staging = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(runs_dir)?;
    fs::write(staging.path().join(RECORD_FILE), bytes)?;
    fs::write(
        staging.path().join(MANIFEST_FILE),
        serde_json::to_vec_pretty(manifest)?,
    )?;

    // A concurrent publish of the same id loses here: renaming onto a
    // non-empty directory fails.
    fs::rename(staging.path(), &target).map_err(|e| {
        if target.exists() {
            StorageError::AlreadyExists {
                run_id: manifest.run_id.clone(),
            }
        } else {
            StorageError::Io(e)
        }
    })?;
    Ok(())
}

async fn read_manifest(dir: &Path, run_id: &str) -> StorageResult<RunManifest> {
    let bytes = tokio::fs::read(dir.join(MANIFEST_FILE))
        .await
        .map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StorageError::NotFound {
                    run_id: run_id.to_string(),
                }
            } else {
                StorageError::Io(e)
            }
        })?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait]
impl RunStore for FsRunStore {
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

        let runs_dir = self.runs_dir.clone();
        let staged = manifest.clone();
        tokio::task::spawn_blocking(move || publish_blocking(&runs_dir, &staged, &bytes))
            .await
            .map_err(|e| StorageError::Task(e.to_string()))??;

        debug!(run_id = %run_id, digest = %manifest.digest.short(), "run record published");
        Ok(manifest)
    }

    async fn get(&self, run_id: &str) -> StorageResult<StoredRun> {
        validate_run_id(run_id)?;
        let dir = self.run_dir(run_id);
        let manifest = read_manifest(&dir, run_id).await?;
        let bytes = tokio::fs::read(dir.join(RECORD_FILE)).await?;
        verify_record_bytes(&manifest, &bytes)?;
        let record = serde_json::from_slice(&bytes)?;
        Ok(StoredRun { manifest, record })
    }

    async fn list(&self) -> StorageResult<Vec<RunManifest>> {
        let mut manifests = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.runs_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !entry.file_type().await?.is_dir() {
                continue;
            }
            match read_manifest(&entry.path(), &name).await {
                Ok(m) => manifests.push(m),
                Err(e) => warn!(run_dir = %name, error = %e, "skipping unreadable run"),
            }
        }
        sort_newest_first(&mut manifests);
        Ok(manifests)
    }

    async fn contains(&self, run_id: &str) -> StorageResult<bool> {
        validate_run_id(run_id)?;
        Ok(tokio::fs::try_exists(self.run_dir(run_id).join(MANIFEST_FILE)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn make_store() -> (tempfile::TempDir, FsRunStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRunStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn publish_then_get_roundtrip() {
        let (_dir, store) = make_store();
        let record = json!({"results": [], "meta": {"pack": "alz/v1.0"}});
        let manifest = store.publish("run-1", Utc::now(), &record).await.unwrap();
        let got = store.get("run-1").await.unwrap();
        assert_eq!(got.record, record);
        assert_eq!(got.manifest, manifest);
    }

    #[tokio::test]
    async fn publish_refuses_overwrite() {
        let (_dir, store) = make_store();
        store.publish("run-1", Utc::now(), &json!({"v": 1})).await.unwrap();
        let err = store
            .publish("run-1", Utc::now(), &json!({"v": 2}))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { .. }));
        assert_eq!(store.get("run-1").await.unwrap().record, json!({"v": 1}));
    }

    #[tokio::test]
    async fn tampered_record_fails_digest_check() {
        let (_dir, store) = make_store();
        store.publish("run-1", Utc::now(), &json!({"score": 9.0})).await.unwrap();
        let path = store.runs_dir().join("run-1").join(RECORD_FILE);
        std::fs::write(&path, br#"{"score": 0.0}"#).unwrap();
        match store.get("run-1").await {
            Err(StorageError::DigestMismatch { run_id, .. }) => assert_eq!(run_id, "run-1"),
            other => panic!("expected DigestMismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn list_skips_staging_leftovers() {
        let (_dir, store) = make_store();
        std::fs::create_dir_all(store.runs_dir().join(".staging-abc")).unwrap();
        store.publish("run-1", Utc::now(), &json!({})).await.unwrap();
        let list = store.list().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].run_id, "run-1");
    }

    #[tokio::test]
    async fn latest_and_previous_follow_created_at() {
        let (_dir, store) = make_store();
        let t0 = Utc::now();
        store.publish("older", t0, &json!({})).await.unwrap();
        store
            .publish("newer", t0 + Duration::seconds(5), &json!({}))
            .await
            .unwrap();
        assert_eq!(store.latest().await.unwrap().unwrap().run_id, "newer");
        assert_eq!(store.previous().await.unwrap().unwrap().run_id, "older");
    }

    #[tokio::test]
    async fn get_missing_run_is_not_found() {
        let (_dir, store) = make_store();
        assert!(matches!(
            store.get("nope").await,
            Err(StorageError::NotFound { .. })
        ));
        assert!(!store.contains("nope").await.unwrap());
    }
}
