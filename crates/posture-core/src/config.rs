//! Pipeline configuration.
//!
//! Loaded from TOML, then overridden by `POSTURE_*` environment variables.
//! Every field has a default so a partial file is valid.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PostureError, Result};

/// Whether a run may publish to production consumers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Development,
    Production,
}

impl std::str::FromStr for RunMode {
    type Err = PostureError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(RunMode::Development),
            "production" | "prod" => Ok(RunMode::Production),
            other => Err(PostureError::Config(format!("unknown run mode '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Root directory holding `<family>/<version>/` control packs.
    pub packs_dir: PathBuf,
    pub pack_family: String,
    pub pack_version: String,
    pub run_mode: RunMode,
    /// Explicit opt-in for unregistered packs in production runs.
    pub allow_unfrozen_packs: bool,
    /// Extra `(family/version → checksum)` entries merged over the builtin registry.
    pub checksum_registry: Option<PathBuf>,
    pub concurrent_evaluation: bool,
    /// Cached signals older than this are re-collected. `None` keeps them for the run.
    pub signal_freshness_secs: Option<u64>,
    pub top_gaps: usize,
    pub top_sections: usize,
    /// Root of the filesystem run store.
    pub store_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            packs_dir: PathBuf::from("control_packs"),
            pack_family: "alz".to_string(),
            pack_version: "v1.0".to_string(),
            run_mode: RunMode::Development,
            allow_unfrozen_packs: false,
            checksum_registry: None,
            concurrent_evaluation: true,
            signal_freshness_secs: None,
            top_gaps: 10,
            top_sections: 5,
            store_dir: PathBuf::from(".posture"),
        }
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(PostureError::Config(format!("{name}: expected a boolean, got '{other}'"))),
    }
}

impl PipelineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| PostureError::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Apply `POSTURE_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    ///
    /// `POSTURE_PACK` takes the `family/version` form.
    pub fn with_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = var("POSTURE_PACKS_DIR") {
            self.packs_dir = PathBuf::from(v);
        }
        if let Some(v) = var("POSTURE_PACK") {
            let (family, version) = v.split_once('/').ok_or_else(|| {
                PostureError::Config(format!("POSTURE_PACK: expected family/version, got '{v}'"))
            })?;
            self.pack_family = family.to_string();
            self.pack_version = version.to_string();
        }
        if let Some(v) = var("POSTURE_RUN_MODE") {
            self.run_mode = v.parse()?;
        }
        if let Some(v) = var("POSTURE_ALLOW_UNFROZEN_PACKS") {
            self.allow_unfrozen_packs = parse_bool("POSTURE_ALLOW_UNFROZEN_PACKS", &v)?;
        }
        if let Some(v) = var("POSTURE_CONCURRENT_EVALUATION") {
            self.concurrent_evaluation = parse_bool("POSTURE_CONCURRENT_EVALUATION", &v)?;
        }
        if let Some(v) = var("POSTURE_CHECKSUM_REGISTRY") {
            self.checksum_registry = Some(PathBuf::from(v));
        }
        if let Some(v) = var("POSTURE_STORE_DIR") {
            self.store_dir = PathBuf::from(v);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pack_family.trim().is_empty() || self.pack_version.trim().is_empty() {
            return Err(PostureError::Config(
                "pack_family and pack_version must not be empty".to_string(),
            ));
        }
        if self.top_gaps == 0 {
            return Err(PostureError::Config("top_gaps must be at least 1".to_string()));
        }
        Ok(())
    }

    /// `family/version` key used by the checksum registry.
    pub fn pack_key(&self) -> String {
        format!("{}/{}", self.pack_family, self.pack_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = PipelineConfig::from_toml_str(
            r#"
            run_mode = "production"
            signal_freshness_secs = 300
            "#,
        )
        .unwrap();
        assert_eq!(cfg.run_mode, RunMode::Production);
        assert_eq!(cfg.signal_freshness_secs, Some(300));
        assert_eq!(cfg.pack_key(), "alz/v1.0");
        assert!(!cfg.allow_unfrozen_packs);
    }

    #[test]
    fn unknown_toml_key_rejected() {
        let err = PipelineConfig::from_toml_str("allow_unfrozen = true").unwrap_err();
        assert!(matches!(err, PostureError::Config(_)));
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("POSTURE_PACK", "alz/v1.1"),
            ("POSTURE_RUN_MODE", "prod"),
            ("POSTURE_ALLOW_UNFROZEN_PACKS", "yes"),
        ]
        .into_iter()
        .collect();
        let cfg = PipelineConfig::default()
            .with_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.pack_version, "v1.1");
        assert_eq!(cfg.run_mode, RunMode::Production);
        assert!(cfg.allow_unfrozen_packs);
    }

    #[test]
    fn malformed_pack_override_rejected() {
        let err = PipelineConfig::default()
            .with_overrides(|k| (k == "POSTURE_PACK").then(|| "alz".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("family/version"));
    }

    #[test]
    fn bad_boolean_rejected() {
        let err = PipelineConfig::default()
            .with_overrides(|k| (k == "POSTURE_ALLOW_UNFROZEN_PACKS").then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("maybe"));
    }
}
