//! Frozen-checksum registry and version lock.
//!
//! A pack version listed here is frozen: the SHA-256 of its control-list
//! file must match exactly, or loading fails. Editing a frozen pack requires
//! a new version directory and a new registry entry.

use std::collections::BTreeMap;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::config::RunMode;
use crate::error::{PostureError, Result};

/// Builtin `(family/version, sha256(controls file))` entries.
const BUILTIN_FROZEN: &[(&str, &str)] = &[(
    "alz/v1.0",
    "e352711eedc79cd421618e92036d23187bd1d142207dd341ab008128472cd91b",
)];

/// SHA-256 hex of raw control-list bytes.
pub fn controls_checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecksumRegistry {
    entries: BTreeMap<String, String>,
}

impl ChecksumRegistry {
    /// Registry with no frozen packs.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry holding the frozen packs shipped with this crate.
    pub fn builtin() -> Self {
        let entries = BUILTIN_FROZEN
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self { entries }
    }

    pub fn with_entry(
        mut self,
        family: &str,
        version: &str,
        checksum: impl Into<String>,
    ) -> Self {
        self.entries
            .insert(format!("{family}/{version}"), checksum.into().to_ascii_lowercase());
        self
    }

    /// Merge entries from a JSON object file `{"family/version": "sha256", ...}`.
    ///
    /// Entries already present must agree; a file cannot unfreeze or repin a pack.
    pub fn merge_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let extra: BTreeMap<String, String> =
            serde_json::from_slice(&bytes).map_err(|e| PostureError::SchemaDrift {
                file: path.display().to_string(),
                detail: format!("checksum registry must map family/version to a checksum: {e}"),
            })?;

        for (key, checksum) in extra {
            let checksum = checksum.to_ascii_lowercase();
            match self.entries.get(&key) {
                Some(existing) if *existing != checksum => {
                    return Err(PostureError::VersionLockViolation {
                        pack: key,
                        expected: existing.clone(),
                        actual: checksum,
                    });
                }
                _ => {
                    self.entries.insert(key, checksum);
                }
            }
        }
        Ok(self)
    }

    pub fn expected(&self, family: &str, version: &str) -> Option<&str> {
        self.entries
            .get(&format!("{family}/{version}"))
            .map(String::as_str)
    }

    /// Check `actual` against the registry.
    ///
    /// Returns `Ok(true)` for a frozen pack whose checksum matches and
    /// `Ok(false)` for an unregistered version.
    pub fn verify(&self, family: &str, version: &str, actual: &str) -> Result<bool> {
        match self.expected(family, version) {
            Some(expected) if expected == actual => Ok(true),
            Some(expected) => Err(PostureError::VersionLockViolation {
                pack: format!("{family}/{version}"),
                expected: expected.to_string(),
                actual: actual.to_string(),
            }),
            None => Ok(false),
        }
    }
}

/// Refuse unfrozen packs in production unless explicitly allowed.
pub fn enforce_run_mode(pack_key: &str, frozen: bool, mode: RunMode, allow_unfrozen: bool) -> Result<()> {
    if mode == RunMode::Production && !frozen && !allow_unfrozen {
        return Err(PostureError::UnfrozenPack {
            pack: pack_key.to_string(),
        });
    }
    Ok(())
}
