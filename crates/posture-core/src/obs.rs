//! Structured observability hooks for assessment lifecycle events.
//!
//! This module provides:
//! - Run-scoped tracing spans via `RunSpan` RAII guard
//! - Emission functions for pack loading, evaluation, scoring and merge events
//!
//! Events are emitted at `info!` level unless noted. For JSON output,
//! initialise the subscriber with [`crate::telemetry::init_tracing`].

use tracing::{info, warn};

use crate::evaluators::Verdict;
use crate::guard::MergeOutcome;

/// RAII guard that enters a run-scoped tracing span for the duration of a run.
///
/// # Example
///
/// ```ignore
/// let _span = RunSpan::enter("run-12345");
/// // Now all tracing calls are automatically associated with run_id = "run-12345"
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    /// Create and enter a span tagged with the run_id.
    pub fn enter(run_id: &str) -> Self {
        Self {
            _span: run_span(run_id).entered(),
        }
    }
}

/// The run-scoped span, for instrumenting futures that cross `.await`.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("posture.run", run_id = %run_id)
}

/// Emit event: control pack loaded and validated.
pub fn emit_pack_loaded(pack: &str, controls: usize, frozen: bool, checksum: &str) {
    info!(
        event = "pack.loaded",
        pack = %pack,
        controls = controls,
        frozen = frozen,
        checksum = %checksum,
    );
}

/// Emit event: an evaluator binding refers to a control outside the active pack (warning level).
pub fn emit_binding_ignored(control_id: &str, pack: &str) {
    warn!(event = "evaluator.binding_ignored", control_id = %control_id, pack = %pack);
}

/// Emit event: run started.
///
/// # Example
///
/// ```ignore
/// emit_run_started("run-123", "alz/v1.0", "3f2a9c1e0b7d4a56");
/// // logs: event=run.started run_id=run-123 pack=alz/v1.0 scope_key=3f2a...
/// ```
pub fn emit_run_started(run_id: &str, pack: &str, scope_key: &str) {
    info!(event = "run.started", run_id = %run_id, pack = %pack, scope_key = %scope_key);
}

/// Emit event: signal acquisition finished.
pub fn emit_signals_acquired(run_id: &str, total: usize, ok: usize, blocking_gaps: usize) {
    info!(
        event = "signals.acquired",
        run_id = %run_id,
        total = total,
        ok = ok,
        blocking_gaps = blocking_gaps,
    );
}

/// Emit event: a control degraded to a non-decided verdict (warning level).
pub fn emit_evaluation_degraded(control_id: &str, verdict: Verdict, reason: &str) {
    warn!(
        event = "evaluation.degraded",
        control_id = %control_id,
        verdict = %verdict,
        reason = %reason,
    );
}

/// Emit event: scoring completed.
pub fn emit_run_scored(run_id: &str, composite: f64, automation_percent: f64, gaps: usize) {
    info!(
        event = "run.scored",
        run_id = %run_id,
        composite = composite,
        automation_percent = automation_percent,
        gaps = gaps,
    );
}

/// Emit event: enrichment output rejected because a protected key changed (warning level).
pub fn emit_merge_violation(key: &str, pointer: &str) {
    warn!(event = "merge.violation", key = %key, pointer = %pointer);
}

/// Emit event: enrichment returned keys it does not own; they were discarded.
pub fn emit_merge_keys_dropped(keys: &[String]) {
    warn!(event = "merge.keys_dropped", keys = ?keys);
}

/// Emit event: merge finished.
pub fn emit_merge_completed(outcome: MergeOutcome, merged: usize, dropped: usize) {
    info!(
        event = "merge.completed",
        outcome = ?outcome,
        merged = merged,
        dropped = dropped,
    );
}

/// Emit event: finalized record written to the run store.
pub fn emit_run_published(run_id: &str, digest: &str, duration_ms: u64) {
    info!(
        event = "run.published",
        run_id = %run_id,
        digest = %digest,
        duration_ms = duration_ms,
    );
}

/// Emit event: run aborted before publish (warning level).
pub fn emit_run_failed(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.failed", run_id = %run_id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        // Just ensure RunSpan::enter doesn't panic
        let _span = RunSpan::enter("test-run-id");
    }

    #[test]
    fn emitters_accept_all_outcomes() {
        emit_pack_loaded("alz/v1.0", 19, true, "e352711e");
        emit_evaluation_degraded("G01.01", Verdict::NotAssessed, "signal missing");
        for outcome in [
            MergeOutcome::Merged,
            MergeOutcome::EnrichmentFailed,
            MergeOutcome::NonObjectOutput,
            MergeOutcome::Skipped,
        ] {
            emit_merge_completed(outcome, 1, 0);
        }
        emit_run_failed("r1", &"boom");
    }
}
