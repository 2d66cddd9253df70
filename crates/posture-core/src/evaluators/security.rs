//! Defender for Cloud evaluators.

use serde_json::Value;

use super::{graded, unsupported, EvalOutcome, EvalOutcomeResult, EvaluatorFn, Evidence};
use crate::signals::SignalView;
use crate::taxonomy::ControlDefinition;

const PRICINGS: &str = "defender:pricings";
const CSPM_PLAN: &str = "CloudPosture";

pub(super) fn bindings() -> Vec<(&'static str, EvaluatorFn)> {
    vec![
        ("G01.01", cspm_enabled as EvaluatorFn),
        ("G01.02", workload_protection as EvaluatorFn),
    ]
}

fn plan_name(plan: &Value) -> &str {
    plan.get("name").and_then(Value::as_str).unwrap_or("")
}

fn is_standard(plan: &Value) -> bool {
    plan.get("tier")
        .and_then(Value::as_str)
        .is_some_and(|t| t.eq_ignore_ascii_case("standard"))
}

fn cspm_enabled(_: &ControlDefinition, view: &SignalView<'_>) -> EvalOutcomeResult {
    let plans = &view.require(PRICINGS)?.items;
    let Some(cspm) = plans.iter().find(|p| plan_name(p) == CSPM_PLAN) else {
        return Ok(EvalOutcome::fail("Defender CSPM plan is not configured."));
    };
    let tier = cspm.get("tier").and_then(Value::as_str).unwrap_or("unknown");
    let evidence = Evidence::metric(format!("{CSPM_PLAN} tier {tier}"));
    let outcome = if is_standard(cspm) {
        EvalOutcome::pass("Defender CSPM runs at the Standard tier.")
    } else {
        EvalOutcome::fail(format!("Defender CSPM runs at the {tier} tier."))
    };
    Ok(outcome.with_evidence(evidence))
}

fn workload_protection(_: &ControlDefinition, view: &SignalView<'_>) -> EvalOutcomeResult {
    let plans: Vec<&Value> = view
        .require(PRICINGS)?
        .items
        .iter()
        .filter(|p| plan_name(p) != CSPM_PLAN)
        .collect();
    if plans.is_empty() {
        return Err(unsupported("no workload protection plans reported"));
    }
    let mut free: Vec<&str> = plans
        .iter()
        .filter(|p| !is_standard(p))
        .map(|p| plan_name(p))
        .collect();
    free.sort_unstable();
    let standard = plans.len() - free.len();
    let ratio = standard as f64 / plans.len() as f64;

    let mut reason = format!(
        "{standard}/{} workload protection plan(s) at Standard tier.",
        plans.len()
    );
    if !free.is_empty() {
        reason.push_str(&format!(" Free: {}.", free.join(", ")));
    }
    Ok(EvalOutcome::new(graded(ratio, 0.8, f64::MIN_POSITIVE), reason)
        .with_evidence(Evidence::metric(format!("{:.0}% standard", ratio * 100.0))))
}
