//! Governance evaluators: management group hierarchy and Azure Policy.

use super::{
    bool_field, f64_field, graded, unsupported, u64_field, EvalOutcome, EvalOutcomeResult,
    EvaluatorFn, Evidence, Verdict,
};
use crate::signals::SignalView;
use crate::taxonomy::ControlDefinition;

const MG_HIERARCHY: &str = "arm:mg_hierarchy";
const POLICY_ASSIGNMENTS: &str = "policy:assignments";
const POLICY_COMPLIANCE: &str = "policy:compliance_summary";

/// Levels below the tenant root.
const MAX_MG_DEPTH: u64 = 4;
const COMPLIANCE_PASS_PERCENT: f64 = 80.0;
const COMPLIANCE_PARTIAL_PERCENT: f64 = 50.0;

pub(super) fn bindings() -> Vec<(&'static str, EvaluatorFn)> {
    vec![
        ("C01.01", mg_depth as EvaluatorFn),
        ("C01.02", mg_archetypes as EvaluatorFn),
        ("E01.01", policy_initiatives as EvaluatorFn),
        ("E01.02", policy_compliance as EvaluatorFn),
    ]
}

fn mg_depth(_: &ControlDefinition, view: &SignalView<'_>) -> EvalOutcomeResult {
    let payload = view.payload(MG_HIERARCHY)?;
    let depth = u64_field(payload, "max_depth")?;
    let evidence = Evidence::metric(format!("management group depth {depth}"));

    let outcome = match depth {
        0 => EvalOutcome::fail("No management groups below the tenant root."),
        d if d <= MAX_MG_DEPTH => {
            EvalOutcome::pass(format!("Hierarchy is {d} level(s) deep (max {MAX_MG_DEPTH})."))
        }
        d if d <= MAX_MG_DEPTH + 2 => EvalOutcome::partial(format!(
            "Hierarchy is {d} levels deep; flatten to {MAX_MG_DEPTH} or fewer."
        )),
        d => EvalOutcome::fail(format!(
            "Hierarchy is {d} levels deep, well beyond {MAX_MG_DEPTH}."
        )),
    };
    Ok(outcome.with_evidence(evidence))
}

fn mg_archetypes(_: &ControlDefinition, view: &SignalView<'_>) -> EvalOutcomeResult {
    let payload = view.payload(MG_HIERARCHY)?;
    let platform = bool_field(payload, "has_platform_mg")?;
    let landing_zones = bool_field(payload, "has_landing_zones_mg")?;

    let outcome = match (platform, landing_zones) {
        (true, true) => EvalOutcome::pass("Platform and Landing Zones management groups exist."),
        (true, false) => EvalOutcome::partial("Platform management group exists; Landing Zones is missing."),
        (false, true) => EvalOutcome::partial("Landing Zones management group exists; Platform is missing."),
        (false, false) => EvalOutcome::fail("Neither Platform nor Landing Zones management group exists."),
    };
    Ok(outcome)
}

fn policy_initiatives(_: &ControlDefinition, view: &SignalView<'_>) -> EvalOutcomeResult {
    let payload = view.payload(POLICY_ASSIGNMENTS)?;
    let total = u64_field(payload, "total")?;
    let initiatives = u64_field(payload, "initiative")?;
    let evidence = Evidence::metric(format!("{initiatives} initiative(s) of {total} assignment(s)"));

    let outcome = if total == 0 {
        EvalOutcome::fail("No policy assignments found.")
    } else if initiatives == 0 {
        EvalOutcome::partial(format!(
            "{total} policy assignment(s), none grouped as initiatives."
        ))
    } else {
        EvalOutcome::pass(format!(
            "{initiatives} policy initiative(s) assigned."
        ))
    };
    Ok(outcome.with_evidence(evidence))
}

fn policy_compliance(_: &ControlDefinition, view: &SignalView<'_>) -> EvalOutcomeResult {
    let payload = view.payload(POLICY_COMPLIANCE)?;
    let total = u64_field(payload, "total_resources")?;
    if total == 0 {
        return Err(unsupported("no resources evaluated by policy"));
    }
    let percent = f64_field(payload, "compliance_percent")?;
    let noncompliant = u64_field(payload, "noncompliant_resources")?;

    let verdict = graded(percent, COMPLIANCE_PASS_PERCENT, COMPLIANCE_PARTIAL_PERCENT);
    let reason = match verdict {
        Verdict::Pass => format!("Policy compliance at {percent:.1}%."),
        _ => format!(
            "Policy compliance at {percent:.1}% ({noncompliant} of {total} resource(s) non-compliant)."
        ),
    };
    Ok(EvalOutcome::new(verdict, reason).with_evidence(Evidence::metric(format!(
        "{percent:.1}% compliant, {noncompliant}/{total} non-compliant"
    ))))
}
