//! Merge-isolation guard between the deterministic record and enrichment.
//!
//! The enrichment stage gets an owned deep copy of the record. Whatever it
//! returns, protected keys are re-checked against a canonical snapshot taken
//! before the copy was handed out, and only enrichment-owned keys are taken
//! from it. The final record is always rebuilt from the guard's own copy.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::digest::{canonical_value, compute_digest, first_difference};
use crate::error::{PostureError, Result};
use crate::obs;

/// Deterministic keys; never altered after the record is built.
pub const PROTECTED_KEYS: [&str; 8] = [
    "results",
    "scoring",
    "rollups",
    "signal_availability",
    "signal_execution_summary",
    "scope_summary",
    "meta",
    "execution_context",
];

/// Version of [`ENRICHMENT_KEYS`]. The list is append-only.
pub const ENRICHMENT_KEYS_VERSION: u32 = 1;

/// Keys only the enrichment stage writes.
pub const ENRICHMENT_KEYS: [&str; 11] = [
    "ai",
    "executive_summary",
    "transformation_plan",
    "transformation_roadmap",
    "enterprise_scale_readiness",
    "smart_questions",
    "implementation_backlog",
    "progress_analysis",
    "target_architecture",
    "critical_issues",
    "blocker_resolution",
];

/// Guard-owned audit entry in the final record.
pub const MERGE_AUDIT_KEY: &str = "merge_audit";

/// Deep copy of the run record handed to enrichment.
pub type AdvisoryPayload = Value;

#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("enrichment stage failed: {0}")]
    Failed(String),

    #[error("enrichment stage unavailable: {0}")]
    Unavailable(String),
}

/// Untrusted advisory producer.
#[async_trait]
pub trait EnrichmentStage: Send + Sync {
    fn name(&self) -> &str;

    async fn enrich(&self, payload: AdvisoryPayload) -> std::result::Result<Value, EnrichmentError>;
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ProtectedEntry {
    key: &'static str,
    canonical: Option<Value>,
    digest: Option<String>,
}

/// Canonical form and digest of every protected key of a record.
#[derive(Debug, Clone)]
pub struct ProtectedSnapshot {
    entries: Vec<ProtectedEntry>,
}

impl ProtectedSnapshot {
    pub fn capture(record: &Map<String, Value>) -> Result<Self> {
        let mut entries = Vec::with_capacity(PROTECTED_KEYS.len());
        for key in PROTECTED_KEYS {
            let (canonical, digest) = match record.get(key) {
                Some(v) => (Some(canonical_value(v)?), Some(compute_digest(v)?)),
                None => (None, None),
            };
            entries.push(ProtectedEntry {
                key,
                canonical,
                digest,
            });
        }
        Ok(Self { entries })
    }

    /// Digest per protected key present in the record.
    pub fn digests(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .filter_map(|e| e.digest.clone().map(|d| (e.key.to_string(), d)))
            .collect()
    }

    /// Fail on the first protected key (in [`PROTECTED_KEYS`] order) whose
    /// structure differs in `candidate`.
    pub fn verify(&self, candidate: &Map<String, Value>) -> Result<()> {
        for entry in &self.entries {
            let returned = match candidate.get(entry.key) {
                Some(v) => match canonical_value(v) {
                    Ok(c) => Some(c),
                    Err(_) => return Err(violation(entry.key, String::new())),
                },
                None => None,
            };
            let pointer = match (&entry.canonical, &returned) {
                (Some(a), Some(b)) => first_difference(a, b),
                (None, None) => None,
                _ => Some(String::new()),
            };
            if let Some(pointer) = pointer {
                return Err(violation(entry.key, pointer));
            }
        }
        Ok(())
    }
}

fn violation(key: &str, pointer: String) -> PostureError {
    let pointer = format!("/{key}{pointer}");
    obs::emit_merge_violation(key, &pointer);
    PostureError::MergeIsolationViolation {
        key: key.to_string(),
        pointer,
    }
}

// ---------------------------------------------------------------------------
// Guard
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
    Merged,
    EnrichmentFailed,
    NonObjectOutput,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeAudit {
    pub outcome: MergeOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub enrichment_keys_version: u32,
    pub merged_keys: Vec<String>,
    pub dropped_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub protected_digests: BTreeMap<String, String>,
}

/// Holds the deterministic record across the enrichment hand-off.
#[derive(Debug)]
pub struct MergeGuard {
    record: Map<String, Value>,
    snapshot: ProtectedSnapshot,
}

impl MergeGuard {
    pub fn new(record: Value) -> Result<Self> {
        let Value::Object(record) = record else {
            return Err(PostureError::Canonicalization(
                "run record must be a JSON object".to_string(),
            ));
        };
        let snapshot = ProtectedSnapshot::capture(&record)?;
        Ok(Self { record, snapshot })
    }

    pub fn snapshot(&self) -> &ProtectedSnapshot {
        &self.snapshot
    }

    /// A fresh deep copy; nothing in it links back to the guarded record.
    pub fn advisory_payload(&self) -> AdvisoryPayload {
        Value::Object(self.record.clone())
    }

    fn audit(&self, outcome: MergeOutcome, stage: Option<&str>) -> MergeAudit {
        MergeAudit {
            outcome,
            stage: stage.map(str::to_string),
            enrichment_keys_version: ENRICHMENT_KEYS_VERSION,
            merged_keys: Vec::new(),
            dropped_keys: Vec::new(),
            error: None,
            protected_digests: self.snapshot.digests(),
        }
    }

    fn finish(mut self, audit: MergeAudit) -> Result<Value> {
        self.record
            .insert(MERGE_AUDIT_KEY.to_string(), serde_json::to_value(&audit)?);
        Ok(Value::Object(self.record))
    }

    /// Finalize without enrichment output.
    pub fn finalize_alone(
        self,
        outcome: MergeOutcome,
        stage: Option<&str>,
        error: Option<String>,
    ) -> Result<Value> {
        let mut audit = self.audit(outcome, stage);
        audit.error = error;
        obs::emit_merge_completed(outcome, 0, 0);
        self.finish(audit)
    }

    /// Verify `returned` and merge its enrichment-owned keys.
    pub fn merge(mut self, returned: Value, stage: Option<&str>) -> Result<Value> {
        let Value::Object(returned) = returned else {
            return self.finalize_alone(
                MergeOutcome::NonObjectOutput,
                stage,
                Some("enrichment output is not a JSON object".to_string()),
            );
        };
        self.snapshot.verify(&returned)?;

        let mut audit = self.audit(MergeOutcome::Merged, stage);
        for (key, value) in returned {
            if ENRICHMENT_KEYS.contains(&key.as_str()) {
                self.record.insert(key.clone(), value);
                audit.merged_keys.push(key);
            } else if !PROTECTED_KEYS.contains(&key.as_str()) {
                audit.dropped_keys.push(key);
            }
        }
        audit.merged_keys.sort();
        audit.dropped_keys.sort();
        if !audit.dropped_keys.is_empty() {
            obs::emit_merge_keys_dropped(&audit.dropped_keys);
        }
        obs::emit_merge_completed(
            MergeOutcome::Merged,
            audit.merged_keys.len(),
            audit.dropped_keys.len(),
        );
        self.finish(audit)
    }

    /// Hand a deep copy to `stage` and merge what comes back.
    pub async fn run(self, stage: &dyn EnrichmentStage) -> Result<Value> {
        let name = stage.name().to_string();
        match stage.enrich(self.advisory_payload()).await {
            Ok(returned) => self.merge(returned, Some(&name)),
            Err(e) => self.finalize_alone(
                MergeOutcome::EnrichmentFailed,
                Some(&name),
                Some(e.to_string()),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> Value {
        json!({
            "results": [{"control_id": "G01.01", "verdict": "fail"}],
            "scoring": {
                "composite_score": 9.0,
                "section_scores": [{"section": "Security", "score": 100.0}]
            },
            "rollups": {},
            "signal_availability": {},
            "signal_execution_summary": {"total": 1},
            "scope_summary": {"scope_key": "abc"},
            "meta": {"run_id": "r1"},
            "execution_context": {}
        })
    }

    #[test]
    fn enrichment_keys_are_pinned() {
        assert_eq!(ENRICHMENT_KEYS_VERSION, 1);
        assert_eq!(
            ENRICHMENT_KEYS,
            [
                "ai",
                "executive_summary",
                "transformation_plan",
                "transformation_roadmap",
                "enterprise_scale_readiness",
                "smart_questions",
                "implementation_backlog",
                "progress_analysis",
                "target_architecture",
                "critical_issues",
                "blocker_resolution",
            ]
        );
        for key in ENRICHMENT_KEYS {
            assert!(!PROTECTED_KEYS.contains(&key));
        }
    }

    #[test]
    fn nested_score_mutation_detected() {
        let guard = MergeGuard::new(record()).unwrap();
        let mut returned = guard.advisory_payload();
        returned["scoring"]["section_scores"][0]["score"] = json!(12.5);
        returned["ai"] = json!({"summary": "ok"});

        let err = guard.merge(returned, Some("test")).unwrap_err();
        match err {
            PostureError::MergeIsolationViolation { key, pointer } => {
                assert_eq!(key, "scoring");
                assert_eq!(pointer, "/scoring/section_scores/0/score");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn removed_protected_key_detected() {
        let guard = MergeGuard::new(record()).unwrap();
        let mut returned = guard.advisory_payload();
        returned.as_object_mut().unwrap().remove("meta");
        let err = guard.merge(returned, None).unwrap_err();
        assert!(matches!(err, PostureError::MergeIsolationViolation { ref key, .. } if key == "meta"));
    }

    #[test]
    fn first_offending_key_follows_protected_order() {
        let guard = MergeGuard::new(record()).unwrap();
        let mut returned = guard.advisory_payload();
        returned["meta"]["run_id"] = json!("forged");
        returned["results"][0]["verdict"] = json!("pass");
        let err = guard.merge(returned, None).unwrap_err();
        assert!(matches!(err, PostureError::MergeIsolationViolation { ref key, .. } if key == "results"));
    }

    #[test]
    fn key_reordering_is_not_a_violation() {
        let guard = MergeGuard::new(record()).unwrap();
        let returned = json!({
            "execution_context": {},
            "meta": {"run_id": "r1"},
            "scope_summary": {"scope_key": "abc"},
            "signal_execution_summary": {"total": 1},
            "signal_availability": {},
            "rollups": {},
            "scoring": {
                "section_scores": [{"score": 100, "section": "Security"}],
                "composite_score": 9
            },
            "results": [{"verdict": "fail", "control_id": "G01.01"}],
            "executive_summary": "text"
        });
        let merged = guard.merge(returned, None).unwrap();
        assert_eq!(merged["executive_summary"], "text");
    }

    #[test]
    fn unknown_keys_dropped_and_audited() {
        let guard = MergeGuard::new(record()).unwrap();
        let mut returned = guard.advisory_payload();
        returned["ai"] = json!({"model": "x"});
        returned["verdict_override"] = json!(true);

        let merged = guard.merge(returned, Some("advisor")).unwrap();
        assert!(merged.get("verdict_override").is_none());
        assert_eq!(merged["ai"]["model"], "x");
        let audit: MergeAudit = serde_json::from_value(merged[MERGE_AUDIT_KEY].clone()).unwrap();
        assert_eq!(audit.outcome, MergeOutcome::Merged);
        assert_eq!(audit.merged_keys, vec!["ai"]);
        assert_eq!(audit.dropped_keys, vec!["verdict_override"]);
        assert_eq!(audit.stage.as_deref(), Some("advisor"));
        assert_eq!(audit.protected_digests.len(), PROTECTED_KEYS.len());
    }

    #[test]
    fn non_object_output_finalizes_alone() {
        let guard = MergeGuard::new(record()).unwrap();
        let merged = guard.merge(json!("just text"), None).unwrap();
        assert_eq!(merged[MERGE_AUDIT_KEY]["outcome"], "non_object_output");
        assert_eq!(merged["scoring"]["composite_score"], 9.0);
    }

    struct Failing;

    #[async_trait]
    impl EnrichmentStage for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn enrich(&self, _payload: AdvisoryPayload) -> std::result::Result<Value, EnrichmentError> {
            Err(EnrichmentError::Unavailable("endpoint down".to_string()))
        }
    }

    #[tokio::test]
    async fn enrichment_error_keeps_deterministic_record() {
        let guard = MergeGuard::new(record()).unwrap();
        let merged = guard.run(&Failing).await.unwrap();
        assert_eq!(merged[MERGE_AUDIT_KEY]["outcome"], "enrichment_failed");
        assert!(merged[MERGE_AUDIT_KEY]["error"]
            .as_str()
            .unwrap()
            .contains("endpoint down"));
        assert!(merged.get("ai").is_none());
    }
}
