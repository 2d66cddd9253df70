//! Versioned control packs.
//!
//! A pack lives in `<packs_dir>/<family>/<version>/` and holds a manifest,
//! a signal-definition file, a control-list file and optionally a
//! dependency graph. Once loaded a [`ControlPack`] is immutable.

pub mod loader;
pub mod lock;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::graph::ImpactGraph;
use crate::taxonomy::{ControlDefinition, DesignArea};

pub use loader::{build_pack, list_packs, load_pack, PackSources, PackSummary};
pub use lock::{controls_checksum, enforce_run_mode, ChecksumRegistry};

fn default_controls_ref() -> String {
    "controls.json".to_string()
}

fn default_signals_ref() -> String {
    "signals.json".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackManifest {
    #[serde(default)]
    pub pack_id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_controls_ref")]
    pub controls_ref: String,
    #[serde(default = "default_signals_ref")]
    pub signals_ref: String,
    #[serde(default)]
    pub graph_ref: Option<String>,
}

/// Declared signal, as listed in the pack's signal-definition file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalDefinition {
    /// Collector family, e.g. `resource_graph`, `policy`.
    pub source: String,
    #[serde(default)]
    pub description: String,
    /// Widest scope the collector queries at.
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ControlPack {
    pub family: String,
    pub version: String,
    pub manifest: PackManifest,
    pub signals: BTreeMap<String, SignalDefinition>,
    /// Sorted by control id.
    controls: Vec<ControlDefinition>,
    pub design_areas: BTreeMap<DesignArea, Vec<String>>,
    /// SHA-256 of the raw control-list bytes.
    pub checksum: String,
    /// True when the checksum matched a registry entry.
    pub frozen: bool,
    /// Validated dependency graph, when the manifest declares one.
    pub graph: Option<ImpactGraph>,
    pub root: Option<PathBuf>,
}

impl ControlPack {
    /// `family/version`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.family, self.version)
    }

    pub fn controls(&self) -> &[ControlDefinition] {
        &self.controls
    }

    pub fn control(&self, id: &str) -> Option<&ControlDefinition> {
        self.controls
            .binary_search_by(|c| c.id.as_str().cmp(id))
            .ok()
            .map(|i| &self.controls[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.control(id).is_some()
    }

    pub fn control_count(&self) -> usize {
        self.controls.len()
    }

    pub fn controls_in_area(&self, area: DesignArea) -> impl Iterator<Item = &ControlDefinition> {
        self.controls.iter().filter(move |c| c.design_area == area)
    }

    /// Signal ids grouped by collector source.
    pub fn signals_by_source(&self) -> BTreeMap<&str, Vec<&str>> {
        let mut out: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (id, def) in &self.signals {
            out.entry(def.source.as_str()).or_default().push(id.as_str());
        }
        out
    }

    /// Every signal id required by at least one control.
    pub fn required_signal_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .controls
            .iter()
            .flat_map(|c| c.required_signals.iter().map(String::as_str))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}
