//! Workload-level evaluators: cost budgets, storage hardening, VM backup.

use serde_json::Value;

use super::{
    bool_field, graded, item_label, unsupported, u64_field, EvalOutcome, EvalOutcomeResult,
    EvaluatorFn, Evidence, Verdict,
};
use crate::signals::SignalView;
use crate::taxonomy::ControlDefinition;

const BUDGETS: &str = "cost:budgets";
const STORAGE: &str = "resource_graph:storage_accounts";
const BACKUP: &str = "backup:vm_protection";

pub(super) fn bindings() -> Vec<(&'static str, EvaluatorFn)> {
    vec![
        ("A01.01", budgets as EvaluatorFn),
        ("K01.01", storage_hardening as EvaluatorFn),
        ("L01.01", vm_backup as EvaluatorFn),
    ]
}

fn budgets(_: &ControlDefinition, view: &SignalView<'_>) -> EvalOutcomeResult {
    let payload = view.payload(BUDGETS)?;
    let count = u64_field(payload, "budget_count")?;
    let notifications = bool_field(payload, "has_budget_notifications")?;
    let evidence = Evidence::metric(format!("{count} budget(s), notifications={notifications}"));

    let outcome = match (count, notifications) {
        (0, _) => EvalOutcome::fail("No budgets defined."),
        (n, false) => EvalOutcome::partial(format!(
            "{n} budget(s) exist but no notification rules are configured."
        )),
        (n, true) => EvalOutcome::pass(format!("{n} budget(s) with alert notifications.")),
    };
    Ok(outcome.with_evidence(evidence))
}

fn storage_hardening(_: &ControlDefinition, view: &SignalView<'_>) -> EvalOutcomeResult {
    let accounts = &view.require(STORAGE)?.items;
    if accounts.is_empty() {
        return Err(unsupported("no storage accounts in scope"));
    }

    let mut weak: Vec<(&Value, Vec<&str>)> = Vec::new();
    for account in accounts {
        let mut issues = Vec::new();
        if !bool_field(account, "https_only")? {
            issues.push("HTTP allowed");
        }
        if bool_field(account, "allow_blob_public_access")? {
            issues.push("anonymous blob access");
        }
        if !issues.is_empty() {
            weak.push((account, issues));
        }
    }

    let verdict = if weak.is_empty() {
        Verdict::Pass
    } else if weak.len() < accounts.len() {
        Verdict::Partial
    } else {
        Verdict::Fail
    };
    let mut outcome = EvalOutcome::new(
        verdict,
        format!(
            "{}/{} storage account(s) enforce HTTPS and block anonymous access.",
            accounts.len() - weak.len(),
            accounts.len()
        ),
    );
    for (account, issues) in weak {
        outcome = outcome.with_evidence(Evidence::resource(item_label(account), issues.join(", ")));
    }
    Ok(outcome)
}

fn vm_backup(_: &ControlDefinition, view: &SignalView<'_>) -> EvalOutcomeResult {
    let payload = view.payload(BACKUP)?;
    let total = u64_field(payload, "total_vms")?;
    if total == 0 {
        return Err(unsupported("no virtual machines in scope"));
    }
    let protected = u64_field(payload, "protected_vms")?.min(total);
    let ratio = protected as f64 / total as f64;
    Ok(EvalOutcome::new(
        graded(ratio, 0.9, 0.5),
        format!(
            "{protected}/{total} virtual machine(s) ({:.0}%) protected by Azure Backup.",
            ratio * 100.0
        ),
    )
    .with_evidence(Evidence::metric(format!("{protected}/{total} protected"))))
}
