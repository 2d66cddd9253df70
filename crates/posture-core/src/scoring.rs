//! Weighted risk scoring.
//!
//! Contribution of a control = severity weight × status multiplier ×
//! domain weight. The composite score is the sum of contributions taken in
//! control-id order. Section scores normalise a design area's contributions
//! against its worst case and are expressed as a 0–100 risk figure.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{PostureError, Result};
use crate::evaluators::{EvalResult, Verdict};
use crate::graph::ImpactReport;
use crate::pack::ControlPack;
use crate::taxonomy::{DesignArea, Severity};

// ---------------------------------------------------------------------------
// Weights
// ---------------------------------------------------------------------------

/// Immutable weight tables, built once and passed to [`score`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    severity: BTreeMap<Severity, f64>,
    status: BTreeMap<Verdict, f64>,
    domain: BTreeMap<DesignArea, f64>,
}

impl ScoringWeights {
    /// Production tables.
    pub fn frozen() -> Self {
        let severity = BTreeMap::from([
            (Severity::Critical, 6.0),
            (Severity::High, 5.0),
            (Severity::Medium, 3.0),
            (Severity::Low, 1.0),
            (Severity::Info, 0.0),
        ]);
        let status = BTreeMap::from([
            (Verdict::Pass, 0.0),
            (Verdict::Fail, 1.0),
            (Verdict::Partial, 0.6),
            (Verdict::NotAssessed, 0.0),
            (Verdict::NotApplicable, 0.0),
            (Verdict::Manual, 0.0),
        ]);
        let domain = BTreeMap::from([
            (DesignArea::Security, 1.5),
            (DesignArea::Network, 1.4),
            (DesignArea::Identity, 1.4),
            (DesignArea::Governance, 1.3),
            (DesignArea::DataProtection, 1.3),
            (DesignArea::Resilience, 1.2),
            (DesignArea::Management, 1.1),
            (DesignArea::Cost, 1.0),
        ]);
        Self {
            severity,
            status,
            domain,
        }
    }

    pub fn with_severity(mut self, severity: Severity, weight: f64) -> Self {
        self.severity.insert(severity, weight);
        self
    }

    pub fn with_status(mut self, verdict: Verdict, multiplier: f64) -> Self {
        self.status.insert(verdict, multiplier);
        self
    }

    pub fn with_domain(mut self, area: DesignArea, weight: f64) -> Self {
        self.domain.insert(area, weight);
        self
    }

    pub fn severity_weight(&self, severity: Severity) -> f64 {
        self.severity.get(&severity).copied().unwrap_or(0.0)
    }

    pub fn status_multiplier(&self, verdict: Verdict) -> f64 {
        self.status.get(&verdict).copied().unwrap_or(0.0)
    }

    pub fn domain_weight(&self, area: DesignArea) -> f64 {
        self.domain.get(&area).copied().unwrap_or(1.0)
    }

    /// Largest status multiplier; the worst case a control can reach.
    pub fn max_multiplier(&self) -> f64 {
        self.status.values().copied().fold(0.0, f64::max)
    }
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self::frozen()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoringOptions {
    pub top_gaps: usize,
    pub top_sections: usize,
}

impl Default for ScoringOptions {
    fn default() -> Self {
        Self {
            top_gaps: 10,
            top_sections: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Critical,
    High,
    Medium,
    Hygiene,
}

impl RiskTier {
    pub fn for_contribution(contribution: f64) -> Self {
        if contribution >= 7.5 {
            Self::Critical
        } else if contribution >= 4.5 {
            Self::High
        } else if contribution >= 2.0 {
            Self::Medium
        } else {
            Self::Hygiene
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredControl {
    pub control_id: String,
    pub design_area: DesignArea,
    pub severity: Severity,
    pub verdict: Verdict,
    pub automated: bool,
    pub severity_weight: f64,
    pub status_multiplier: f64,
    pub domain_weight: f64,
    pub contribution: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    Scored,
    /// Nothing applicable carries weight; the score is undefined.
    NotApplicable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionScore {
    pub design_area: DesignArea,
    pub section: String,
    pub status: SectionStatus,
    /// Normalised risk, 0 (no gaps) to 100 (everything failing).
    pub score: Option<f64>,
    pub contribution: f64,
    pub max_contribution: f64,
    pub counts: BTreeMap<Verdict, usize>,
    pub total_controls: usize,
    pub automated_controls: usize,
    /// Pass share of decided (pass, fail, partial) controls.
    pub maturity_percent: Option<f64>,
    /// High or Critical controls that failed.
    pub critical_fail_count: usize,
    pub critical_partial_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationCoverage {
    pub total_controls: usize,
    /// Everything except `NotApplicable`.
    pub applicable_controls: usize,
    pub automated_controls: usize,
    pub manual_controls: usize,
    pub not_assessed_controls: usize,
    pub not_applicable_controls: usize,
    pub automation_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gap {
    pub control_id: String,
    pub section: String,
    pub severity: Severity,
    pub verdict: Verdict,
    pub contribution: f64,
    pub risk_tier: RiskTier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionRank {
    pub section: String,
    pub score: Option<f64>,
    pub contribution: f64,
    pub failing_controls: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringReport {
    pub composite_score: f64,
    /// Composite if every applicable control failed.
    pub max_composite_score: f64,
    pub controls: Vec<ScoredControl>,
    pub section_scores: Vec<SectionScore>,
    pub automation_coverage: AutomationCoverage,
    pub overall_maturity_percent: Option<f64>,
    pub most_impactful_gaps: Vec<Gap>,
    pub top_failing_sections: Vec<SectionRank>,
    pub risk_tiers: BTreeMap<RiskTier, usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_impact: Option<ImpactReport>,
}

impl ScoringReport {
    pub fn with_impact(mut self, impact: ImpactReport) -> Self {
        self.dependency_impact = Some(impact);
        self
    }

    pub fn section(&self, area: DesignArea) -> Option<&SectionScore> {
        self.section_scores.iter().find(|s| s.design_area == area)
    }

    /// Ids of controls that failed or partially failed.
    pub fn failing_control_ids(&self) -> impl Iterator<Item = &str> {
        self.controls
            .iter()
            .filter(|c| matches!(c.verdict, Verdict::Fail | Verdict::Partial))
            .map(|c| c.control_id.as_str())
    }
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn percent(part: usize, whole: usize) -> Option<f64> {
    (whole > 0).then(|| round1(part as f64 / whole as f64 * 100.0))
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Score one run's results against the pack they were evaluated from.
///
/// Input order does not matter: results are joined to controls and summed
/// in control-id order. The result set must cover every control in the pack
/// exactly once. Every design area gets a section entry, scored or not.
pub fn score(
    pack: &ControlPack,
    results: &[EvalResult],
    weights: &ScoringWeights,
    options: ScoringOptions,
) -> Result<ScoringReport> {
    let mut seen = HashSet::new();
    let mut ordered: Vec<&EvalResult> = Vec::with_capacity(results.len());
    for r in results {
        if !pack.contains(&r.control_id) {
            return Err(PostureError::CrossPackReference {
                control_id: r.control_id.clone(),
                pack: pack.key(),
            });
        }
        if !seen.insert(r.control_id.as_str()) {
            return Err(PostureError::DuplicateResult {
                control_id: r.control_id.clone(),
            });
        }
        ordered.push(r);
    }
    let missing: Vec<String> = pack
        .controls()
        .iter()
        .map(|c| c.id.to_string())
        .filter(|id| !seen.contains(id.as_str()))
        .collect();
    if !missing.is_empty() {
        return Err(PostureError::IncompleteResults {
            pack: pack.key(),
            missing,
        });
    }
    ordered.sort_by(|a, b| a.control_id.cmp(&b.control_id));

    let max_multiplier = weights.max_multiplier();
    let mut controls = Vec::with_capacity(ordered.len());
    let mut composite = 0.0;
    let mut max_composite = 0.0;
    let mut sections: BTreeMap<DesignArea, SectionScore> = DesignArea::ALL
        .iter()
        .map(|&area| {
            let section = SectionScore {
                design_area: area,
                section: area.section().to_string(),
                status: SectionStatus::NotApplicable,
                score: None,
                contribution: 0.0,
                max_contribution: 0.0,
                counts: BTreeMap::new(),
                total_controls: 0,
                automated_controls: 0,
                maturity_percent: None,
                critical_fail_count: 0,
                critical_partial_count: 0,
            };
            (area, section)
        })
        .collect();

    for r in ordered {
        let Some(def) = pack.control(&r.control_id) else {
            continue;
        };
        let severity_weight = weights.severity_weight(def.severity);
        let status_multiplier = weights.status_multiplier(r.verdict);
        let domain_weight = weights.domain_weight(def.design_area);
        let contribution = severity_weight * status_multiplier * domain_weight;
        let applicable = r.verdict != Verdict::NotApplicable;
        let worst = if applicable {
            severity_weight * max_multiplier * domain_weight
        } else {
            0.0
        };
        composite += contribution;
        max_composite += worst;

        let Some(section) = sections.get_mut(&def.design_area) else {
            continue;
        };
        section.contribution += contribution;
        section.max_contribution += worst;
        *section.counts.entry(r.verdict).or_default() += 1;
        section.total_controls += 1;
        if r.automated && applicable {
            section.automated_controls += 1;
        }
        if matches!(def.severity, Severity::Critical | Severity::High) {
            match r.verdict {
                Verdict::Fail => section.critical_fail_count += 1,
                Verdict::Partial => section.critical_partial_count += 1,
                _ => {}
            }
        }

        controls.push(ScoredControl {
            control_id: r.control_id.clone(),
            design_area: def.design_area,
            severity: def.severity,
            verdict: r.verdict,
            automated: r.automated,
            severity_weight,
            status_multiplier,
            domain_weight,
            contribution,
        });
    }

    let mut section_scores: Vec<SectionScore> = sections.into_values().collect();
    for s in &mut section_scores {
        let count = |v: Verdict| s.counts.get(&v).copied().unwrap_or(0);
        let pass = count(Verdict::Pass);
        let decided = pass + count(Verdict::Fail) + count(Verdict::Partial);
        s.maturity_percent = percent(pass, decided);
        if s.max_contribution > 0.0 {
            s.status = SectionStatus::Scored;
            s.score = Some(round1(s.contribution / s.max_contribution * 100.0));
        }
    }

    let automation_coverage = coverage(&controls);
    let (pass, decided) = controls.iter().fold((0, 0), |(p, d), c| match c.verdict {
        Verdict::Pass => (p + 1, d + 1),
        Verdict::Fail | Verdict::Partial => (p, d + 1),
        _ => (p, d),
    });

    let mut gaps: Vec<Gap> = controls
        .iter()
        .filter(|c| matches!(c.verdict, Verdict::Fail | Verdict::Partial))
        .map(|c| Gap {
            control_id: c.control_id.clone(),
            section: c.design_area.section().to_string(),
            severity: c.severity,
            verdict: c.verdict,
            contribution: c.contribution,
            risk_tier: RiskTier::for_contribution(c.contribution),
        })
        .collect();
    gaps.sort_by(|a, b| {
        b.contribution
            .total_cmp(&a.contribution)
            .then_with(|| a.control_id.cmp(&b.control_id))
    });
    let mut risk_tiers = BTreeMap::new();
    for g in &gaps {
        *risk_tiers.entry(g.risk_tier).or_insert(0) += 1;
    }
    gaps.truncate(options.top_gaps);

    let mut top_failing_sections: Vec<SectionRank> = section_scores
        .iter()
        .filter(|s| s.contribution > 0.0)
        .map(|s| SectionRank {
            section: s.section.clone(),
            score: s.score,
            contribution: s.contribution,
            failing_controls: s.counts.get(&Verdict::Fail).copied().unwrap_or(0)
                + s.counts.get(&Verdict::Partial).copied().unwrap_or(0),
        })
        .collect();
    top_failing_sections.sort_by(|a, b| {
        b.contribution
            .total_cmp(&a.contribution)
            .then_with(|| a.section.cmp(&b.section))
    });
    top_failing_sections.truncate(options.top_sections);

    Ok(ScoringReport {
        composite_score: composite,
        max_composite_score: max_composite,
        controls,
        section_scores,
        automation_coverage,
        overall_maturity_percent: percent(pass, decided),
        most_impactful_gaps: gaps,
        top_failing_sections,
        risk_tiers,
        dependency_impact: None,
    })
}

fn coverage(controls: &[ScoredControl]) -> AutomationCoverage {
    let count = |v: Verdict| controls.iter().filter(|c| c.verdict == v).count();
    let not_applicable = count(Verdict::NotApplicable);
    let applicable = controls.len() - not_applicable;
    let automated = controls
        .iter()
        .filter(|c| c.automated && c.verdict != Verdict::NotApplicable)
        .count();
    AutomationCoverage {
        total_controls: controls.len(),
        applicable_controls: applicable,
        automated_controls: automated,
        manual_controls: count(Verdict::Manual),
        not_assessed_controls: count(Verdict::NotAssessed),
        not_applicable_controls: not_applicable,
        automation_percent: percent(automated, applicable).unwrap_or(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{control, pack};

    #[test]
    fn frozen_tables() {
        let w = ScoringWeights::frozen();
        assert_eq!(w.severity_weight(Severity::Critical), 6.0);
        assert_eq!(w.severity_weight(Severity::Info), 0.0);
        assert_eq!(w.status_multiplier(Verdict::Partial), 0.6);
        assert_eq!(w.status_multiplier(Verdict::Manual), 0.0);
        assert_eq!(w.domain_weight(DesignArea::Security), 1.5);
        assert_eq!(w.domain_weight(DesignArea::Cost), 1.0);
        assert_eq!(w.max_multiplier(), 1.0);
    }

    #[test]
    fn injected_weights_override() {
        let w = ScoringWeights::frozen().with_severity(Severity::Info, 2.0);
        assert_eq!(w.severity_weight(Severity::Info), 2.0);
        assert_ne!(w, ScoringWeights::frozen());
    }

    #[test]
    fn risk_tier_boundaries() {
        assert_eq!(RiskTier::for_contribution(9.0), RiskTier::Critical);
        assert_eq!(RiskTier::for_contribution(7.5), RiskTier::Critical);
        assert_eq!(RiskTier::for_contribution(7.0), RiskTier::High);
        assert_eq!(RiskTier::for_contribution(2.0), RiskTier::Medium);
        assert_eq!(RiskTier::for_contribution(0.6), RiskTier::Hygiene);
    }

    fn result(id: &str, verdict: Verdict) -> EvalResult {
        EvalResult {
            control_id: id.to_string(),
            verdict,
            reason: String::new(),
            evidence: vec![],
            signals_used: vec![],
            automated: verdict.is_decided() || verdict == Verdict::NotApplicable,
            scope_key: "k".to_string(),
        }
    }

    fn scenario_pack() -> ControlPack {
        pack(
            &[
                control("D01.01", DesignArea::Network, Severity::High, &["rg:fw"]),
                control("F01.01", DesignArea::Management, Severity::Medium, &["la:ws"]),
                control("G01.01", DesignArea::Security, Severity::Critical, &["def:p"]),
                control("K01.01", DesignArea::DataProtection, Severity::Medium, &["rg:st"]),
            ],
            None,
        )
    }

    #[test]
    fn composite_sums_weighted_contributions() {
        let report = score(
            &scenario_pack(),
            &[
                result("G01.01", Verdict::Fail),
                result("D01.01", Verdict::Pass),
                result("F01.01", Verdict::Partial),
                result("K01.01", Verdict::NotApplicable),
            ],
            &ScoringWeights::frozen(),
            ScoringOptions::default(),
        )
        .unwrap();
        // 6 * 1.0 * 1.5 + 3 * 0.6 * 1.1
        assert!((report.composite_score - 10.98).abs() < 1e-9);
        assert_eq!(report.automation_coverage.applicable_controls, 3);
        assert_eq!(report.automation_coverage.automation_percent, 100.0);
        assert_eq!(report.most_impactful_gaps[0].control_id, "G01.01");
        assert_eq!(report.most_impactful_gaps[0].risk_tier, RiskTier::Critical);
        assert_eq!(report.risk_tiers[&RiskTier::Hygiene], 1);
        assert_eq!(report.top_failing_sections[0].section, "Security");
        assert_eq!(report.overall_maturity_percent, Some(33.3));

        let security = report.section(DesignArea::Security).unwrap();
        assert_eq!(security.score, Some(100.0));
        assert_eq!(security.critical_fail_count, 1);
        let data = report.section(DesignArea::DataProtection).unwrap();
        assert_eq!(data.status, SectionStatus::NotApplicable);
        assert_eq!(data.score, None);
    }

    #[test]
    fn result_order_does_not_change_report() {
        let pack = scenario_pack();
        let mut results = vec![
            result("D01.01", Verdict::Partial),
            result("F01.01", Verdict::Fail),
            result("G01.01", Verdict::Partial),
            result("K01.01", Verdict::Manual),
        ];
        let a = score(&pack, &results, &ScoringWeights::frozen(), ScoringOptions::default()).unwrap();
        results.reverse();
        let b = score(&pack, &results, &ScoringWeights::frozen(), ScoringOptions::default()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.composite_score.to_bits(), b.composite_score.to_bits());
    }

    #[test]
    fn foreign_and_duplicate_results_are_rejected() {
        let pack = scenario_pack();
        let err = score(
            &pack,
            &[result("Z01.01", Verdict::Fail)],
            &ScoringWeights::frozen(),
            ScoringOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PostureError::CrossPackReference { .. }));

        let err = score(
            &pack,
            &[result("G01.01", Verdict::Fail), result("G01.01", Verdict::Pass)],
            &ScoringWeights::frozen(),
            ScoringOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PostureError::DuplicateResult { .. }));
    }

    #[test]
    fn gap_list_is_truncated_but_tiers_count_everything() {
        let report = score(
            &scenario_pack(),
            &[
                result("D01.01", Verdict::Fail),
                result("F01.01", Verdict::Fail),
                result("G01.01", Verdict::Fail),
                result("K01.01", Verdict::NotApplicable),
            ],
            &ScoringWeights::frozen(),
            ScoringOptions {
                top_gaps: 1,
                top_sections: 2,
            },
        )
        .unwrap();
        assert_eq!(report.most_impactful_gaps.len(), 1);
        assert_eq!(report.top_failing_sections.len(), 2);
        assert_eq!(report.risk_tiers.values().sum::<usize>(), 3);
    }

    #[test]
    fn partial_result_set_is_rejected() {
        let err = score(
            &scenario_pack(),
            &[result("G01.01", Verdict::Pass), result("D01.01", Verdict::Pass)],
            &ScoringWeights::frozen(),
            ScoringOptions::default(),
        )
        .unwrap_err();
        match err {
            PostureError::IncompleteResults { pack, missing } => {
                assert_eq!(pack, "test/v0");
                assert_eq!(missing, vec!["F01.01", "K01.01"]);
            }
            other => panic!("expected IncompleteResults, got {other:?}"),
        }
    }

    #[test]
    fn every_design_area_has_a_section() {
        let report = score(
            &scenario_pack(),
            &[
                result("D01.01", Verdict::Pass),
                result("F01.01", Verdict::Pass),
                result("G01.01", Verdict::Fail),
                result("K01.01", Verdict::Pass),
            ],
            &ScoringWeights::frozen(),
            ScoringOptions::default(),
        )
        .unwrap();

        let areas: Vec<DesignArea> = report.section_scores.iter().map(|s| s.design_area).collect();
        let mut expected = DesignArea::ALL.to_vec();
        expected.sort();
        assert_eq!(areas, expected);

        let cost = report.section(DesignArea::Cost).unwrap();
        assert_eq!(cost.status, SectionStatus::NotApplicable);
        assert_eq!(cost.score, None);
        assert_eq!(cost.total_controls, 0);
        assert_eq!(cost.section, "Cost");
        assert!(report.top_failing_sections.iter().all(|s| s.section != "Cost"));
    }
}
