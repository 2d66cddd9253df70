//! The deterministic run record.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::RunMode;
use crate::error::{PostureError, Result};
use crate::evaluators::{EvalResult, Verdict};
use crate::scoring::ScoringReport;
use crate::signals::{EvalScope, SignalAvailability, SignalExecutionSummary};

/// Who ran the assessment and what they could see. Supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub visible_subscriptions: Vec<String>,
    /// e.g. `user`, `service_principal`, `managed_identity`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_type: Option<String>,
    #[serde(default)]
    pub management_group_access: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeSummary {
    pub scope_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management_group_id: Option<String>,
    pub subscription_count: usize,
    pub subscription_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,
}

impl ScopeSummary {
    pub fn of(scope: &EvalScope) -> Self {
        let mut subs = scope.subscription_ids.clone();
        subs.sort();
        subs.dedup();
        Self {
            scope_key: scope.key(),
            tenant_id: scope.tenant_id.clone(),
            management_group_id: scope.management_group_id.clone(),
            subscription_count: subs.len(),
            subscription_ids: subs,
            resource_group: scope.resource_group.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMeta {
    pub run_id: String,
    pub engine_version: String,
    pub pack_family: String,
    pub pack_version: String,
    pub pack_checksum: String,
    pub pack_frozen: bool,
    pub run_mode: RunMode,
    pub total_controls: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Verdict counts per report section.
pub type Rollups = BTreeMap<String, BTreeMap<Verdict, usize>>;

pub fn rollup_by_section(results: &[EvalResult], section_of: impl Fn(&str) -> Option<String>) -> Rollups {
    let mut rollups: Rollups = BTreeMap::new();
    for r in results {
        if let Some(section) = section_of(&r.control_id) {
            *rollups
                .entry(section)
                .or_default()
                .entry(r.verdict)
                .or_default() += 1;
        }
    }
    rollups
}

/// Full deterministic output of a run. Every field is a protected key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub results: Vec<EvalResult>,
    pub scoring: ScoringReport,
    pub rollups: Rollups,
    pub signal_availability: BTreeMap<String, Vec<SignalAvailability>>,
    pub signal_execution_summary: SignalExecutionSummary,
    pub scope_summary: ScopeSummary,
    pub meta: RunMeta,
    pub execution_context: ExecutionContext,
}

impl RunRecord {
    pub fn to_value(&self) -> Result<Value> {
        let value = serde_json::to_value(self)?;
        if value.is_object() {
            Ok(value)
        } else {
            Err(PostureError::Canonicalization(
                "run record did not serialize to an object".to_string(),
            ))
        }
    }

    pub fn result(&self, control_id: &str) -> Option<&EvalResult> {
        self.results.iter().find(|r| r.control_id == control_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_summary_dedups_subscriptions() {
        let scope = EvalScope::tenant("t").with_subscriptions(["s2", "s1", "s2"]);
        let summary = ScopeSummary::of(&scope);
        assert_eq!(summary.subscription_ids, vec!["s1", "s2"]);
        assert_eq!(summary.subscription_count, 2);
        assert_eq!(summary.scope_key, scope.key());
    }

    #[test]
    fn rollup_counts_per_section() {
        let mk = |id: &str, verdict| EvalResult {
            control_id: id.to_string(),
            verdict,
            reason: String::new(),
            evidence: vec![],
            signals_used: vec![],
            automated: true,
            scope_key: "k".to_string(),
        };
        let results = vec![
            mk("G01.01", Verdict::Fail),
            mk("G01.02", Verdict::Pass),
            mk("D01.01", Verdict::Pass),
        ];
        let rollups = rollup_by_section(&results, |id| {
            Some(if id.starts_with('G') { "Security" } else { "Networking" }.to_string())
        });
        assert_eq!(rollups["Security"][&Verdict::Fail], 1);
        assert_eq!(rollups["Security"][&Verdict::Pass], 1);
        assert_eq!(rollups["Networking"].len(), 1);
    }
}
