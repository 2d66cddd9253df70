//! Control pack discovery and loading.
//!
//! Load order: manifest, version lock over the raw control-list bytes,
//! signal definitions, taxonomy validation, dependency graph. Any failure
//! aborts the load; no partially built pack is ever returned.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::de::{IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::lock::{controls_checksum, ChecksumRegistry};
use super::{ControlPack, PackManifest, SignalDefinition};
use crate::error::{PostureError, Result};
use crate::graph::{GraphSource, ImpactGraph};
use crate::obs;
use crate::taxonomy::{validate_and_build_controls, DesignArea, TaxonomyIssue};

const MANIFEST_FILE: &str = "manifest.json";

/// Raw file contents of one pack, before any parsing.
#[derive(Debug, Clone)]
pub struct PackSources {
    pub family: String,
    pub version: String,
    pub manifest: Vec<u8>,
    pub signals: Vec<u8>,
    pub controls: Vec<u8>,
    pub graph: Option<Vec<u8>>,
    pub root: Option<PathBuf>,
}

/// Discovery entry returned by [`list_packs`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackSummary {
    pub family: String,
    pub version: String,
    pub pack_id: String,
    pub name: String,
    pub path: PathBuf,
}

fn drift(file: &str, detail: impl Into<String>) -> PostureError {
    PostureError::SchemaDrift {
        file: file.to_string(),
        detail: detail.into(),
    }
}

fn parse_json(file: &str, bytes: &[u8]) -> Result<Value> {
    serde_json::from_slice(bytes).map_err(|e| drift(file, format!("invalid JSON: {e}")))
}

fn object_field<'v>(file: &str, doc: &'v Value, field: &str) -> Result<&'v Map<String, Value>> {
    doc.get(field)
        .and_then(Value::as_object)
        .ok_or_else(|| drift(file, format!("expected top-level object field '{field}'")))
}

/// Keys of the `controls` object in document order, repeats included.
///
/// `serde_json::Map` keeps only the last entry for a repeated key, so
/// duplicates have to be caught on the raw token stream.
struct ControlKeys(Vec<String>);

impl<'de> Deserialize<'de> for ControlKeys {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct KeysVisitor;

        impl<'de> Visitor<'de> for KeysVisitor {
            type Value = ControlKeys;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object of control definitions")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<ControlKeys, A::Error> {
                let mut keys = Vec::new();
                while let Some(key) = map.next_key::<String>()? {
                    map.next_value::<IgnoredAny>()?;
                    keys.push(key);
                }
                Ok(ControlKeys(keys))
            }
        }

        deserializer.deserialize_map(KeysVisitor)
    }
}

#[derive(Deserialize)]
struct ControlsDocKeys {
    controls: ControlKeys,
}

/// One issue per control id defined more than once, in id order.
fn duplicate_control_ids(file: &str, bytes: &[u8]) -> Result<Vec<TaxonomyIssue>> {
    let doc: ControlsDocKeys = serde_json::from_slice(bytes)
        .map_err(|e| drift(file, format!("controls object is unreadable: {e}")))?;
    let mut seen = BTreeSet::new();
    let mut repeated = BTreeSet::new();
    for key in doc.controls.0 {
        if !seen.insert(key.clone()) {
            repeated.insert(key);
        }
    }
    Ok(repeated
        .into_iter()
        .map(|id| TaxonomyIssue::new(id, "id", "defined more than once in controls"))
        .collect())
}

/// Parse and validate a pack from its raw sources.
pub fn build_pack(sources: PackSources, registry: &ChecksumRegistry) -> Result<ControlPack> {
    let PackSources {
        family,
        version,
        manifest,
        signals,
        controls,
        graph,
        root,
    } = sources;

    let manifest: PackManifest = serde_json::from_slice(&manifest)
        .map_err(|e| drift(MANIFEST_FILE, format!("manifest does not match schema: {e}")))?;
    if manifest.version != version {
        return Err(drift(
            MANIFEST_FILE,
            format!("manifest version '{}' does not match directory '{version}'", manifest.version),
        ));
    }
    if let Some(declared) = &manifest.family {
        if *declared != family {
            return Err(drift(
                MANIFEST_FILE,
                format!("manifest family '{declared}' does not match directory '{family}'"),
            ));
        }
    }

    // Version lock runs on raw bytes, before anything else can interpret them.
    let checksum = controls_checksum(&controls);
    let frozen = registry.verify(&family, &version, &checksum)?;

    let signals_doc = parse_json(&manifest.signals_ref, &signals)?;
    let mut signal_defs = BTreeMap::new();
    for (id, def) in object_field(&manifest.signals_ref, &signals_doc, "signals")? {
        let def: SignalDefinition = serde_json::from_value(def.clone())
            .map_err(|e| drift(&manifest.signals_ref, format!("signal '{id}': {e}")))?;
        signal_defs.insert(id.clone(), def);
    }
    let known_signals: BTreeSet<String> = signal_defs.keys().cloned().collect();

    let controls_doc = parse_json(&manifest.controls_ref, &controls)?;
    let raw_controls = object_field(&manifest.controls_ref, &controls_doc, "controls")?;
    let raw_areas = object_field(&manifest.controls_ref, &controls_doc, "design_areas")?;
    let duplicates = duplicate_control_ids(&manifest.controls_ref, &controls)?;
    let typed = match validate_and_build_controls(raw_controls, raw_areas, &known_signals) {
        Ok(typed) if duplicates.is_empty() => typed,
        Ok(_) => {
            return Err(PostureError::TaxonomyViolation {
                violations: duplicates,
            })
        }
        Err(PostureError::TaxonomyViolation { violations }) => {
            return Err(PostureError::TaxonomyViolation {
                violations: duplicates.into_iter().chain(violations).collect(),
            })
        }
        Err(other) => return Err(other),
    };

    let mut design_areas: BTreeMap<DesignArea, Vec<String>> = BTreeMap::new();
    for control in &typed {
        design_areas
            .entry(control.design_area)
            .or_default()
            .push(control.id.to_string());
    }

    let mut pack = ControlPack {
        family,
        version,
        manifest,
        signals: signal_defs,
        controls: typed,
        design_areas,
        checksum,
        frozen,
        graph: None,
        root,
    };

    if let Some(bytes) = graph {
        let file = pack
            .manifest
            .graph_ref
            .clone()
            .unwrap_or_else(|| "graph".to_string());
        let source: GraphSource = serde_json::from_slice(&bytes)
            .map_err(|e| drift(&file, format!("graph does not match schema: {e}")))?;
        pack.graph = Some(ImpactGraph::build(&source, &pack)?);
    }

    obs::emit_pack_loaded(&pack.key(), pack.control_count(), pack.frozen, &pack.checksum);
    Ok(pack)
}

fn safe_ref(pack_dir: &Path, reference: &str) -> Result<PathBuf> {
    let ok = !reference.is_empty()
        && !reference.contains(['/', '\\'])
        && reference != "."
        && reference != "..";
    if !ok {
        return Err(drift(
            MANIFEST_FILE,
            format!("file reference '{reference}' must be a plain file name"),
        ));
    }
    Ok(pack_dir.join(reference))
}

fn read_ref(path: &Path, reference: &str) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            drift(reference, "referenced by manifest but missing")
        } else {
            PostureError::Io(e)
        }
    })
}

/// Load `<packs_dir>/<family>/<version>/`.
pub fn load_pack(
    packs_dir: impl AsRef<Path>,
    family: &str,
    version: &str,
    registry: &ChecksumRegistry,
) -> Result<ControlPack> {
    let pack_dir = packs_dir.as_ref().join(family).join(version);
    let manifest_path = pack_dir.join(MANIFEST_FILE);
    let manifest_bytes = std::fs::read(&manifest_path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            PostureError::PackNotFound {
                pack: format!("{family}/{version}"),
                path: pack_dir.display().to_string(),
            }
        } else {
            PostureError::Io(e)
        }
    })?;
    let manifest: PackManifest = serde_json::from_slice(&manifest_bytes)
        .map_err(|e| drift(MANIFEST_FILE, format!("manifest does not match schema: {e}")))?;

    let controls_path = safe_ref(&pack_dir, &manifest.controls_ref)?;
    let signals_path = safe_ref(&pack_dir, &manifest.signals_ref)?;
    let graph = match &manifest.graph_ref {
        Some(r) => Some(read_ref(&safe_ref(&pack_dir, r)?, r)?),
        None => None,
    };
    debug!(pack = %format!("{family}/{version}"), dir = %pack_dir.display(), "reading control pack");

    build_pack(
        PackSources {
            family: family.to_string(),
            version: version.to_string(),
            controls: read_ref(&controls_path, &manifest.controls_ref)?,
            signals: read_ref(&signals_path, &manifest.signals_ref)?,
            manifest: manifest_bytes,
            graph,
            root: Some(pack_dir),
        },
        registry,
    )
}

/// Discover every `<family>/<version>/manifest.json` under `packs_dir`.
///
/// Unreadable manifests are skipped with a warning.
pub fn list_packs(packs_dir: impl AsRef<Path>) -> Result<Vec<PackSummary>> {
    let mut packs = Vec::new();
    for family in std::fs::read_dir(packs_dir.as_ref())? {
        let family = family?;
        if !family.file_type()?.is_dir() {
            continue;
        }
        for version in std::fs::read_dir(family.path())? {
            let version = version?;
            let manifest_path = version.path().join(MANIFEST_FILE);
            if !manifest_path.is_file() {
                continue;
            }
            let parsed = std::fs::read(&manifest_path)
                .map_err(PostureError::from)
                .and_then(|b| serde_json::from_slice::<PackManifest>(&b).map_err(PostureError::from));
            match parsed {
                Ok(m) => packs.push(PackSummary {
                    family: family.file_name().to_string_lossy().into_owned(),
                    version: version.file_name().to_string_lossy().into_owned(),
                    pack_id: m.pack_id,
                    name: m.name,
                    path: version.path(),
                }),
                Err(e) => warn!(path = %manifest_path.display(), error = %e, "skipping unreadable pack manifest"),
            }
        }
    }
    packs.sort_by(|a, b| (&a.family, &a.version).cmp(&(&b.family, &b.version)));
    Ok(packs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CONTROL: &str = r#"{
        "title": "Firewall",
        "description": "Egress inspected",
        "design_area": "network",
        "sub_area": "Hub",
        "waf_pillar": "Security",
        "control_type": "ALZ",
        "severity": "High",
        "evaluation_logic": "automated",
        "required_signals": ["resource_graph:azure_firewall"]
    }"#;

    fn sources(controls: String) -> PackSources {
        let manifest = json!({"pack_id": "test-v0", "family": "test", "version": "v0", "name": "Test"});
        let signals = json!({"signals": {"resource_graph:azure_firewall": {"source": "resource_graph"}}});
        PackSources {
            family: "test".to_string(),
            version: "v0".to_string(),
            manifest: manifest.to_string().into_bytes(),
            signals: signals.to_string().into_bytes(),
            controls: controls.into_bytes(),
            graph: None,
            root: None,
        }
    }

    fn controls_doc(entries: &[(&str, &str)], indexed: &[&str]) -> String {
        let body: Vec<String> = entries
            .iter()
            .map(|(id, def)| format!("\"{id}\": {def}"))
            .collect();
        format!(
            r#"{{"controls": {{{}}}, "design_areas": {{"network": {{"controls": {}}}}}}}"#,
            body.join(", "),
            json!(indexed)
        )
    }

    #[test]
    fn distinct_ids_load() {
        let doc = controls_doc(&[("D01.01", CONTROL), ("D01.02", CONTROL)], &["D01.01", "D01.02"]);
        let pack = build_pack(sources(doc), &ChecksumRegistry::empty()).unwrap();
        assert_eq!(pack.control_count(), 2);
    }

    #[test]
    fn repeated_id_is_a_violation_not_a_replacement() {
        let shadow = CONTROL.replace("Firewall", "SHADOW");
        let doc = controls_doc(&[("D01.01", CONTROL), ("D01.01", &shadow)], &["D01.01"]);

        let err = build_pack(sources(doc), &ChecksumRegistry::empty()).unwrap_err();
        match err {
            PostureError::TaxonomyViolation { violations } => {
                assert_eq!(violations.len(), 1);
                assert_eq!(violations[0].control_id, "D01.01");
                assert_eq!(violations[0].field, "id");
            }
            other => panic!("expected TaxonomyViolation, got {other:?}"),
        }
    }

    #[test]
    fn repeated_id_reported_with_other_violations() {
        let bad = CONTROL.replace("\"High\"", "\"Severe\"");
        let doc = controls_doc(
            &[("D01.01", CONTROL), ("D01.01", CONTROL), ("D01.02", &bad)],
            &["D01.01", "D01.02"],
        );

        let err = build_pack(sources(doc), &ChecksumRegistry::empty()).unwrap_err();
        let PostureError::TaxonomyViolation { violations } = err else {
            panic!("expected TaxonomyViolation");
        };
        assert!(violations
            .iter()
            .any(|v| v.control_id == "D01.01" && v.field == "id"));
        assert!(violations
            .iter()
            .any(|v| v.control_id == "D01.02" && v.field == "severity"));
    }
}
