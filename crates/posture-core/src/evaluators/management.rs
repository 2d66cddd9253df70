//! Monitoring evaluators.

use super::{
    graded, item_label, unsupported, u64_field, EvalOutcome, EvalOutcomeResult, EvaluatorFn,
    Evidence,
};
use crate::signals::SignalView;
use crate::taxonomy::ControlDefinition;

const WORKSPACES: &str = "monitor:log_analytics_workspaces";
const DIAGNOSTICS: &str = "monitor:diagnostic_coverage";

/// More central workspaces than this is sprawl.
const MAX_CENTRAL_WORKSPACES: usize = 2;

pub(super) fn bindings() -> Vec<(&'static str, EvaluatorFn)> {
    vec![
        ("F01.01", central_workspace as EvaluatorFn),
        ("F01.02", diagnostic_coverage as EvaluatorFn),
    ]
}

fn central_workspace(_: &ControlDefinition, view: &SignalView<'_>) -> EvalOutcomeResult {
    let workspaces = &view.require(WORKSPACES)?.items;
    let count = workspaces.len();
    let mut outcome = match count {
        0 => EvalOutcome::fail("No Log Analytics workspace found."),
        n if n <= MAX_CENTRAL_WORKSPACES => {
            EvalOutcome::pass(format!("{n} central Log Analytics workspace(s)."))
        }
        n => EvalOutcome::partial(format!(
            "{n} Log Analytics workspaces; consolidate to {MAX_CENTRAL_WORKSPACES} or fewer."
        )),
    };
    for ws in workspaces {
        outcome = outcome.with_evidence(Evidence::resource(item_label(ws), "Log Analytics workspace"));
    }
    Ok(outcome)
}

fn diagnostic_coverage(_: &ControlDefinition, view: &SignalView<'_>) -> EvalOutcomeResult {
    let payload = view.payload(DIAGNOSTICS)?;
    let applicable = u64_field(payload, "applicable")?;
    if applicable == 0 {
        return Err(unsupported("no resources support diagnostic settings"));
    }
    let compliant = u64_field(payload, "compliant")?.min(applicable);
    let ratio = compliant as f64 / applicable as f64;

    let verdict = graded(ratio, 0.9, 0.5);
    let reason = format!(
        "{compliant}/{applicable} resource(s) ({:.0}%) send diagnostics to a workspace.",
        ratio * 100.0
    );
    Ok(EvalOutcome::new(verdict, reason)
        .with_evidence(Evidence::metric(format!("{compliant}/{applicable} covered"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluators::Verdict;
    use crate::fixtures::run_evaluator as run;
    use crate::signals::Signal;
    use serde_json::json;

    #[test]
    fn workspace_sprawl_is_partial() {
        let items = (0..4).map(|i| json!({"id": format!("law-{i}")})).collect();
        let out = run(
            central_workspace,
            "F01.01",
            &[WORKSPACES],
            vec![Signal::with_items(WORKSPACES, items)],
        )
        .unwrap();
        assert_eq!(out.verdict, Verdict::Partial);
        assert_eq!(out.evidence.len(), 4);
    }

    #[test]
    fn diagnostic_coverage_grades() {
        for (compliant, expected) in [(95, Verdict::Pass), (60, Verdict::Partial), (10, Verdict::Fail)] {
            let out = run(
                diagnostic_coverage,
                "F01.02",
                &[DIAGNOSTICS],
                vec![Signal::with_raw(
                    DIAGNOSTICS,
                    json!({"applicable": 100, "compliant": compliant}),
                )],
            )
            .unwrap();
            assert_eq!(out.verdict, expected);
        }
    }
}
