//! Identity evaluators: RBAC hygiene and privileged access.

use super::{
    bool_field, f64_field, unsupported, u64_field, EvalOutcome, EvalOutcomeResult,
    EvaluatorFn, Evidence, Verdict,
};
use crate::signals::SignalView;
use crate::taxonomy::ControlDefinition;

const RBAC: &str = "identity:rbac_assignments";
const PIM: &str = "identity:pim";

const MAX_OWNERS: u64 = 3;
const MIN_GROUP_RATIO: f64 = 0.5;

pub(super) fn bindings() -> Vec<(&'static str, EvaluatorFn)> {
    vec![
        ("B03.01", rbac_hygiene as EvaluatorFn),
        ("B03.02", privileged_access as EvaluatorFn),
    ]
}

fn rbac_hygiene(_: &ControlDefinition, view: &SignalView<'_>) -> EvalOutcomeResult {
    let payload = view.payload(RBAC)?;
    let owners = u64_field(payload, "owner_count")?;
    let group_ratio = f64_field(payload, "group_assignment_ratio")?;

    let mut issues = Vec::new();
    if owners > MAX_OWNERS {
        issues.push(format!("{owners} Owner assignments (max {MAX_OWNERS})"));
    }
    if group_ratio < MIN_GROUP_RATIO {
        issues.push(format!(
            "only {:.0}% of assignments go to groups",
            group_ratio * 100.0
        ));
    }

    let evidence = Evidence::metric(format!(
        "{owners} owner(s), {:.0}% group-based assignments",
        group_ratio * 100.0
    ));
    let outcome = match issues.len() {
        0 => EvalOutcome::pass("Owner count and group-based assignment are within limits."),
        1 => EvalOutcome::partial(format!("RBAC hygiene: {}.", issues.join("; "))),
        _ => EvalOutcome::fail(format!("RBAC hygiene gaps: {}.", issues.join("; "))),
    };
    Ok(outcome.with_evidence(evidence))
}

fn privileged_access(_: &ControlDefinition, view: &SignalView<'_>) -> EvalOutcomeResult {
    let payload = view.payload(PIM)?;
    if !bool_field(payload, "pim_licensed")? {
        return Err(unsupported("tenant has no PIM licence"));
    }
    let standing = u64_field(payload, "standing_admin_count")?;
    let eligible_ratio = f64_field(payload, "eligible_ratio")?;

    let evidence = Evidence::metric(format!(
        "{standing} standing admin(s), {:.0}% eligible",
        eligible_ratio * 100.0
    ));
    let outcome = if standing == 0 {
        EvalOutcome::pass("All privileged roles are PIM-eligible; no standing admins.")
    } else {
        let verdict = if eligible_ratio >= 0.5 {
            Verdict::Partial
        } else {
            Verdict::Fail
        };
        EvalOutcome::new(
            verdict,
            format!(
                "{standing} standing privileged assignment(s); {:.0}% of privileged roles are eligible.",
                eligible_ratio * 100.0
            ),
        )
    };
    Ok(outcome.with_evidence(evidence))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluators::EvalError;
    use crate::fixtures::run_evaluator as run;
    use crate::signals::Signal;
    use serde_json::json;

    #[test]
    fn one_rbac_issue_is_partial() {
        let out = run(
            rbac_hygiene,
            "B03.01",
            &[RBAC],
            vec![Signal::with_raw(
                RBAC,
                json!({"owner_count": 7, "group_assignment_ratio": 0.8}),
            )],
        )
        .unwrap();
        assert_eq!(out.verdict, Verdict::Partial);
        assert!(out.reason.contains("7 Owner"));
    }

    #[test]
    fn unlicensed_pim_is_unsupported() {
        let err = run(
            privileged_access,
            "B03.02",
            &[PIM],
            vec![Signal::with_raw(PIM, json!({"pim_licensed": false}))],
        )
        .unwrap_err();
        assert!(matches!(err, EvalError::UnsupportedShape { .. }));
    }

    #[test]
    fn standing_admins_with_low_eligibility_fail() {
        let out = run(
            privileged_access,
            "B03.02",
            &[PIM],
            vec![Signal::with_raw(
                PIM,
                json!({"pim_licensed": true, "standing_admin_count": 4, "eligible_ratio": 0.2}),
            )],
        )
        .unwrap();
        assert_eq!(out.verdict, Verdict::Fail);
    }

    #[test]
    fn no_standing_admins_pass() {
        let out = run(
            privileged_access,
            "B03.02",
            &[PIM],
            vec![Signal::with_raw(
                PIM,
                json!({"pim_licensed": true, "standing_admin_count": 0, "eligible_ratio": 1.0}),
            )],
        )
        .unwrap();
        assert_eq!(out.verdict, Verdict::Pass);
    }
}
