//! Which declared signals a run could actually see.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{CacheStats, SignalSnapshot, SignalStatus};
use crate::pack::ControlPack;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityStatus {
    Ok,
    NotAvailable,
    Error,
    /// Declared by the pack but never collected.
    Missing,
}

impl AvailabilityStatus {
    pub fn is_gap(self) -> bool {
        self != Self::Ok
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalAvailability {
    pub signal_id: String,
    pub status: AvailabilityStatus,
    pub item_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    /// Controls declaring this signal, sorted.
    pub required_by: Vec<String>,
}

/// Per-source availability of every signal the pack declares.
///
/// Sources and signals within a source are sorted by id.
pub fn availability_matrix(
    pack: &ControlPack,
    snapshot: &SignalSnapshot,
) -> BTreeMap<String, Vec<SignalAvailability>> {
    let mut required_by: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for control in pack.controls() {
        for signal in &control.required_signals {
            required_by
                .entry(signal.as_str())
                .or_default()
                .push(control.id.to_string());
        }
    }

    let mut matrix: BTreeMap<String, Vec<SignalAvailability>> = BTreeMap::new();
    for (id, def) in &pack.signals {
        let entry = match snapshot.get(id) {
            Some(signal) => SignalAvailability {
                signal_id: id.clone(),
                status: match signal.status {
                    SignalStatus::Ok => AvailabilityStatus::Ok,
                    SignalStatus::NotAvailable => AvailabilityStatus::NotAvailable,
                    SignalStatus::Error => AvailabilityStatus::Error,
                },
                item_count: signal.items.len(),
                error: signal.error.clone(),
                duration_ms: signal.duration_ms,
                required_by: Vec::new(),
            },
            None => SignalAvailability {
                signal_id: id.clone(),
                status: AvailabilityStatus::Missing,
                item_count: 0,
                error: None,
                duration_ms: 0,
                required_by: Vec::new(),
            },
        };
        let mut entry = entry;
        if let Some(controls) = required_by.remove(id.as_str()) {
            entry.required_by = controls;
        }
        matrix.entry(def.source.clone()).or_default().push(entry);
    }
    matrix
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCounts {
    pub ok: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalExecutionSummary {
    pub total: usize,
    pub ok: usize,
    pub not_available: usize,
    pub error: usize,
    pub missing: usize,
    pub total_duration_ms: u64,
    pub cache: CacheStats,
    pub by_source: BTreeMap<String, SourceCounts>,
    /// Gap signals still required by at least one control.
    pub blocking_gaps: Vec<String>,
}

pub fn execution_summary(
    matrix: &BTreeMap<String, Vec<SignalAvailability>>,
    cache: &CacheStats,
) -> SignalExecutionSummary {
    let mut summary = SignalExecutionSummary {
        cache: cache.clone(),
        ..SignalExecutionSummary::default()
    };
    for (source, entries) in matrix {
        let counts = summary.by_source.entry(source.clone()).or_default();
        for e in entries {
            counts.total += 1;
            summary.total += 1;
            summary.total_duration_ms += e.duration_ms;
            match e.status {
                AvailabilityStatus::Ok => {
                    counts.ok += 1;
                    summary.ok += 1;
                }
                AvailabilityStatus::NotAvailable => summary.not_available += 1,
                AvailabilityStatus::Error => summary.error += 1,
                AvailabilityStatus::Missing => summary.missing += 1,
            }
            if e.status.is_gap() && !e.required_by.is_empty() {
                summary.blocking_gaps.push(e.signal_id.clone());
            }
        }
    }
    summary.blocking_gaps.sort();
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, status: AvailabilityStatus, required_by: &[&str]) -> SignalAvailability {
        SignalAvailability {
            signal_id: id.to_string(),
            status,
            item_count: 0,
            error: None,
            duration_ms: 5,
            required_by: required_by.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn summary_counts_statuses_and_blocking_gaps() {
        let mut matrix = BTreeMap::new();
        matrix.insert(
            "policy".to_string(),
            vec![
                entry("policy:assignments", AvailabilityStatus::Ok, &["E01.01"]),
                entry("policy:compliance_summary", AvailabilityStatus::Error, &["E01.02"]),
            ],
        );
        matrix.insert(
            "identity".to_string(),
            vec![entry("identity:pim", AvailabilityStatus::Missing, &[])],
        );

        let summary = execution_summary(&matrix, &CacheStats::default());
        assert_eq!(summary.total, 3);
        assert_eq!(summary.ok, 1);
        assert_eq!(summary.error, 1);
        assert_eq!(summary.missing, 1);
        assert_eq!(summary.total_duration_ms, 15);
        assert_eq!(summary.blocking_gaps, vec!["policy:compliance_summary"]);
        assert_eq!(summary.by_source["policy"], SourceCounts { ok: 1, total: 2 });
    }
}
