//! Comparison of two published run records.
//!
//! Works on the stored JSON so records carrying enrichment keys compare the
//! same as bare ones. Output order depends only on control ids and section
//! names, never on the order results appear in either record.

use std::collections::{BTreeMap, BTreeSet};

use posture_store::RunStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PostureError, Result};
use crate::evaluators::Verdict;
use crate::taxonomy::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeDirection {
    Regression,
    Improvement,
    /// Moved into or out of an undecided verdict.
    Lateral,
}

/// Health rank of decided verdicts. Higher is healthier.
fn verdict_rank(verdict: Verdict) -> Option<u8> {
    match verdict {
        Verdict::Pass => Some(3),
        Verdict::Partial => Some(2),
        Verdict::Fail => Some(1),
        Verdict::NotAssessed | Verdict::NotApplicable | Verdict::Manual => None,
    }
}

fn direction(previous: Verdict, current: Verdict) -> ChangeDirection {
    match (verdict_rank(previous), verdict_rank(current)) {
        (Some(p), Some(c)) if c < p => ChangeDirection::Regression,
        (Some(p), Some(c)) if c > p => ChangeDirection::Improvement,
        _ => ChangeDirection::Lateral,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlChange {
    pub control_id: String,
    pub previous: Verdict,
    pub current: Verdict,
    pub direction: ChangeDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionDelta {
    pub section: String,
    pub previous: Option<f64>,
    pub current: Option<f64>,
    /// `None` unless both runs scored the section.
    pub delta: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDelta {
    pub previous_run_id: Option<String>,
    pub current_run_id: Option<String>,
    /// Every control whose verdict differs, sorted by id.
    pub changed_controls: Vec<ControlChange>,
    /// Regressed control ids, most severe first, ties by id.
    pub regressions: Vec<String>,
    /// Improved control ids, most severe first, ties by id.
    pub improvements: Vec<String>,
    pub added_controls: Vec<String>,
    pub removed_controls: Vec<String>,
    pub previous_composite: f64,
    pub current_composite: f64,
    /// Positive means more risk.
    pub composite_delta: f64,
    pub section_deltas: Vec<SectionDelta>,
}

impl RunDelta {
    pub fn is_unchanged(&self) -> bool {
        self.changed_controls.is_empty()
            && self.added_controls.is_empty()
            && self.removed_controls.is_empty()
    }

    pub fn change(&self, control_id: &str) -> Option<&ControlChange> {
        self.changed_controls
            .iter()
            .find(|c| c.control_id == control_id)
    }
}

// ---------------------------------------------------------------------------
// Record view
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ResultView {
    control_id: String,
    verdict: Verdict,
}

#[derive(Deserialize)]
struct ControlView {
    control_id: String,
    severity: Severity,
}

#[derive(Deserialize)]
struct SectionView {
    section: String,
    score: Option<f64>,
}

#[derive(Deserialize)]
struct ScoringView {
    composite_score: f64,
    #[serde(default)]
    controls: Vec<ControlView>,
    #[serde(default)]
    section_scores: Vec<SectionView>,
}

#[derive(Deserialize)]
struct MetaView {
    run_id: String,
}

#[derive(Deserialize)]
struct RecordView {
    results: Vec<ResultView>,
    scoring: ScoringView,
    #[serde(default)]
    meta: Option<MetaView>,
}

struct Digested {
    run_id: Option<String>,
    verdicts: BTreeMap<String, Verdict>,
    severities: BTreeMap<String, Severity>,
    sections: BTreeMap<String, Option<f64>>,
    composite: f64,
}

fn digest_record(label: &str, record: &Value) -> Result<Digested> {
    let view = RecordView::deserialize(record).map_err(|e| PostureError::SchemaDrift {
        file: format!("run record {label}"),
        detail: e.to_string(),
    })?;
    Ok(Digested {
        run_id: view.meta.map(|m| m.run_id),
        verdicts: view
            .results
            .into_iter()
            .map(|r| (r.control_id, r.verdict))
            .collect(),
        severities: view
            .scoring
            .controls
            .into_iter()
            .map(|c| (c.control_id, c.severity))
            .collect(),
        sections: view
            .scoring
            .section_scores
            .into_iter()
            .map(|s| (s.section, s.score))
            .collect(),
        composite: view.scoring.composite_score,
    })
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

/// Compare `previous` against `current`.
pub fn compute_delta(previous: &Value, current: &Value) -> Result<RunDelta> {
    let prev = digest_record("previous", previous)?;
    let curr = digest_record("current", current)?;

    let mut changed = Vec::new();
    let mut added = Vec::new();
    for (id, &now) in &curr.verdicts {
        match prev.verdicts.get(id) {
            None => added.push(id.clone()),
            Some(&before) if before != now => changed.push(ControlChange {
                control_id: id.clone(),
                previous: before,
                current: now,
                direction: direction(before, now),
                severity: curr
                    .severities
                    .get(id)
                    .or_else(|| prev.severities.get(id))
                    .copied(),
            }),
            Some(_) => {}
        }
    }
    let removed: Vec<String> = prev
        .verdicts
        .keys()
        .filter(|id| !curr.verdicts.contains_key(*id))
        .cloned()
        .collect();

    let ranked = |wanted: ChangeDirection| {
        let mut picked: Vec<&ControlChange> =
            changed.iter().filter(|c| c.direction == wanted).collect();
        // Unknown severity sorts last.
        picked.sort_by(|a, b| {
            (a.severity.is_none(), a.severity, &a.control_id).cmp(&(
                b.severity.is_none(),
                b.severity,
                &b.control_id,
            ))
        });
        picked
            .into_iter()
            .map(|c| c.control_id.clone())
            .collect::<Vec<_>>()
    };
    let regressions = ranked(ChangeDirection::Regression);
    let improvements = ranked(ChangeDirection::Improvement);

    let section_names: BTreeSet<&String> =
        prev.sections.keys().chain(curr.sections.keys()).collect();
    let section_deltas = section_names
        .into_iter()
        .map(|name| {
            let before = prev.sections.get(name).copied().flatten();
            let after = curr.sections.get(name).copied().flatten();
            SectionDelta {
                section: name.clone(),
                previous: before,
                current: after,
                delta: before.zip(after).map(|(b, a)| round1(a - b)),
            }
        })
        .collect();

    Ok(RunDelta {
        previous_run_id: prev.run_id,
        current_run_id: curr.run_id,
        changed_controls: changed,
        regressions,
        improvements,
        added_controls: added,
        removed_controls: removed,
        previous_composite: prev.composite,
        current_composite: curr.composite,
        composite_delta: curr.composite - prev.composite,
        section_deltas,
    })
}

/// Compare two stored runs. Both digests are verified by the store on read.
pub async fn delta_between(
    store: &dyn RunStore,
    previous_run_id: &str,
    current_run_id: &str,
) -> Result<RunDelta> {
    let previous = store.get(previous_run_id).await?;
    let current = store.get(current_run_id).await?;
    compute_delta(&previous.record, &current.record)
}

/// Delta between the two newest runs, if the store holds at least two.
pub async fn delta_latest(store: &dyn RunStore) -> Result<Option<RunDelta>> {
    let (Some(latest), Some(previous)) = (store.latest().await?, store.previous().await?) else {
        return Ok(None);
    };
    delta_between(store, &previous.run_id, &latest.run_id)
        .await
        .map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(run_id: &str, rows: &[(&str, &str, &str)], composite: f64) -> Value {
        let results: Vec<Value> = rows
            .iter()
            .map(|(id, verdict, _)| json!({"control_id": id, "verdict": verdict}))
            .collect();
        let controls: Vec<Value> = rows
            .iter()
            .map(|(id, _, severity)| json!({"control_id": id, "severity": severity}))
            .collect();
        json!({
            "results": results,
            "scoring": {
                "composite_score": composite,
                "controls": controls,
                "section_scores": [
                    {"section": "Security", "score": composite},
                    {"section": "Networking", "score": null}
                ]
            },
            "meta": {"run_id": run_id}
        })
    }

    #[test]
    fn classifies_regressions_and_improvements() {
        let prev = record(
            "r1",
            &[
                ("B03.01", "fail", "High"),
                ("D01.01", "pass", "High"),
                ("G01.01", "pass", "Critical"),
                ("K01.01", "manual", "Medium"),
            ],
            4.0,
        );
        let curr = record(
            "r2",
            &[
                ("B03.01", "pass", "High"),
                ("D01.01", "partial", "High"),
                ("G01.01", "fail", "Critical"),
                ("K01.01", "not_assessed", "Medium"),
            ],
            12.5,
        );
        let delta = compute_delta(&prev, &curr).unwrap();
        let ids: Vec<&str> = delta
            .changed_controls
            .iter()
            .map(|c| c.control_id.as_str())
            .collect();
        assert_eq!(ids, vec!["B03.01", "D01.01", "G01.01", "K01.01"]);
        assert_eq!(delta.regressions, vec!["G01.01", "D01.01"]);
        assert_eq!(delta.improvements, vec!["B03.01"]);
        assert_eq!(
            delta.change("K01.01").unwrap().direction,
            ChangeDirection::Lateral
        );
        assert_eq!(delta.composite_delta, 8.5);
        assert_eq!(delta.previous_run_id.as_deref(), Some("r1"));
        assert_eq!(delta.current_run_id.as_deref(), Some("r2"));
    }

    #[test]
    fn added_and_removed_controls() {
        let prev = record("r1", &[("A01.01", "pass", "Low"), ("C01.01", "pass", "High")], 0.0);
        let curr = record("r2", &[("C01.01", "pass", "High"), ("E01.01", "fail", "High")], 5.2);
        let delta = compute_delta(&prev, &curr).unwrap();
        assert_eq!(delta.added_controls, vec!["E01.01"]);
        assert_eq!(delta.removed_controls, vec!["A01.01"]);
        assert!(delta.changed_controls.is_empty());
        assert!(!delta.is_unchanged());
    }

    #[test]
    fn result_order_does_not_matter() {
        let rows = [("G01.01", "fail", "Critical"), ("D01.01", "pass", "High")];
        let reversed = [rows[1], rows[0]];
        let prev = record("r1", &[("D01.01", "fail", "High"), ("G01.01", "pass", "Critical")], 5.0);
        let a = compute_delta(&prev, &record("r2", &rows, 9.0)).unwrap();
        let b = compute_delta(&prev, &record("r2", &reversed, 9.0)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn section_delta_needs_both_scores() {
        let prev = record("r1", &[("G01.01", "fail", "Critical")], 9.0);
        let curr = record("r2", &[("G01.01", "pass", "Critical")], 0.0);
        let delta = compute_delta(&prev, &curr).unwrap();
        let by_name: BTreeMap<&str, &SectionDelta> = delta
            .section_deltas
            .iter()
            .map(|s| (s.section.as_str(), s))
            .collect();
        assert_eq!(by_name["Security"].delta, Some(-9.0));
        assert_eq!(by_name["Networking"].delta, None);
    }

    #[test]
    fn malformed_record_is_schema_drift() {
        let good = record("r1", &[], 0.0);
        let err = compute_delta(&good, &json!({"results": "nope"})).unwrap_err();
        assert!(matches!(err, PostureError::SchemaDrift { .. }));
    }
}
