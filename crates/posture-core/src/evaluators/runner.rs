//! Runs evaluators over a frozen signal snapshot.
//!
//! No evaluator outcome aborts the run: a missing binding yields `Manual`,
//! an unusable signal or evaluator failure yields `NotAssessed`, and an
//! unsupported environment shape yields `NotApplicable`.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::task::JoinSet;

use super::{EvalError, EvalResult, EvaluatorRegistry, Verdict};
use crate::obs;
use crate::pack::ControlPack;
use crate::signals::{SignalSnapshot, SignalStatus};
use crate::taxonomy::ControlDefinition;

fn degraded(
    control: &ControlDefinition,
    snapshot: &SignalSnapshot,
    verdict: Verdict,
    reason: String,
) -> EvalResult {
    EvalResult {
        control_id: control.id.to_string(),
        verdict,
        reason,
        evidence: Vec::new(),
        signals_used: control.required_signals.clone(),
        automated: false,
        scope_key: snapshot.scope_key().to_string(),
    }
}

/// First required signal that is absent or not `Ok`, with its state.
fn signal_gap(control: &ControlDefinition, snapshot: &SignalSnapshot) -> Option<String> {
    control
        .required_signals
        .iter()
        .find_map(|id| match snapshot.get(id) {
            None => Some(format!("{id} (missing)")),
            Some(s) if s.status == SignalStatus::NotAvailable => {
                Some(format!("{id} (not available)"))
            }
            Some(s) if s.status == SignalStatus::Error => Some(format!("{id} (error)")),
            Some(_) => None,
        })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Evaluate a single control.
pub fn evaluate_control(
    control: &ControlDefinition,
    registry: &EvaluatorRegistry,
    snapshot: &SignalSnapshot,
) -> EvalResult {
    let id = control.id.as_str();
    let Some(evaluator) = registry.get(id) else {
        return degraded(
            control,
            snapshot,
            Verdict::Manual,
            "No automated evaluator bound; requires manual review.".to_string(),
        );
    };

    if let Some(gap) = signal_gap(control, snapshot) {
        let reason = format!("Signal unavailable: {gap}");
        obs::emit_evaluation_degraded(id, Verdict::NotAssessed, &reason);
        return degraded(control, snapshot, Verdict::NotAssessed, reason);
    }

    let view = snapshot.view(control);
    let outcome = catch_unwind(AssertUnwindSafe(|| evaluator(control, &view)));

    match outcome {
        Ok(Ok(outcome)) => EvalResult {
            control_id: id.to_string(),
            automated: outcome.verdict.is_decided() || outcome.verdict == Verdict::NotApplicable,
            verdict: outcome.verdict,
            reason: outcome.reason,
            evidence: outcome.evidence,
            signals_used: control.required_signals.clone(),
            scope_key: snapshot.scope_key().to_string(),
        },
        Ok(Err(EvalError::UnsupportedShape { detail })) => EvalResult {
            automated: true,
            ..degraded(
                control,
                snapshot,
                Verdict::NotApplicable,
                format!("Not applicable: {detail}"),
            )
        },
        Ok(Err(err)) => {
            let reason = format!("Evaluator could not decide: {err}");
            obs::emit_evaluation_degraded(id, Verdict::NotAssessed, &reason);
            degraded(control, snapshot, Verdict::NotAssessed, reason)
        }
        Err(payload) => {
            let reason = format!("Evaluator panicked: {}", panic_message(payload.as_ref()));
            obs::emit_evaluation_degraded(id, Verdict::NotAssessed, &reason);
            degraded(control, snapshot, Verdict::NotAssessed, reason)
        }
    }
}

/// Evaluate every control of the pack in id order.
pub fn evaluate_all(
    pack: &ControlPack,
    registry: &EvaluatorRegistry,
    snapshot: &SignalSnapshot,
) -> Vec<EvalResult> {
    pack.controls()
        .iter()
        .map(|c| evaluate_control(c, registry, snapshot))
        .collect()
}

/// Evaluate every control on the blocking pool; output is sorted by id.
pub async fn evaluate_all_concurrent(
    pack: Arc<ControlPack>,
    registry: Arc<EvaluatorRegistry>,
    snapshot: Arc<SignalSnapshot>,
) -> Vec<EvalResult> {
    let mut set = JoinSet::new();
    for index in 0..pack.control_count() {
        let pack = Arc::clone(&pack);
        let registry = Arc::clone(&registry);
        let snapshot = Arc::clone(&snapshot);
        set.spawn_blocking(move || {
            let control = &pack.controls()[index];
            evaluate_control(control, &registry, &snapshot)
        });
    }

    let mut by_id: BTreeMap<String, EvalResult> = BTreeMap::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(result) => {
                by_id.insert(result.control_id.clone(), result);
            }
            Err(e) => tracing::warn!(error = %e, "evaluation task did not complete"),
        }
    }

    pack.controls()
        .iter()
        .map(|c| match by_id.remove(c.id.as_str()) {
            Some(result) => result,
            None => degraded(
                c,
                &snapshot,
                Verdict::NotAssessed,
                "Evaluation task did not complete.".to_string(),
            ),
        })
        .collect()
}
