//! Posture Core Library
//!
//! Deterministic governance posture assessment: versioned control packs,
//! signal acquisition, pure evaluators, weighted scoring, dependency impact
//! and a merge guard that keeps enrichment away from the deterministic record.

pub mod config;
pub mod delta;
pub mod digest;
pub mod error;
pub mod evaluators;
pub mod graph;
pub mod guard;
pub mod obs;
pub mod pack;
pub mod pipeline;
pub mod record;
pub mod scoring;
pub mod signals;
pub mod taxonomy;
pub mod telemetry;

#[cfg(test)]
mod fixtures;

pub use config::{PipelineConfig, RunMode};
pub use error::{PostureError, Result};

pub use taxonomy::{
    validate_and_build_controls, ControlDefinition, ControlId, ControlType, DesignArea,
    EvaluationLogic, Severity, TaxonomyIssue, WafPillar,
};

pub use pack::{
    build_pack, controls_checksum, enforce_run_mode, list_packs, load_pack, ChecksumRegistry,
    ControlPack, PackManifest, PackSources, PackSummary, SignalDefinition,
};

pub use graph::{GraphError, GraphSource, ImpactGraph, ImpactReport, ImpactedNode};

pub use signals::{
    availability_matrix, execution_summary, AvailabilityStatus, CacheStats, EvalScope, Signal,
    SignalAvailability, SignalBus, SignalCollector, SignalExecutionSummary, SignalSnapshot,
    SignalStatus, SignalView,
};

pub use evaluators::{
    evaluate_all, evaluate_all_concurrent, evaluate_control, EvalError, EvalOutcome, EvalResult,
    EvaluatorFn, EvaluatorRegistry, Evidence, Verdict,
};

pub use scoring::{
    score, AutomationCoverage, Gap, RiskTier, ScoredControl, ScoringOptions, ScoringReport,
    ScoringWeights, SectionScore, SectionStatus,
};

pub use record::{ExecutionContext, RunMeta, RunRecord, ScopeSummary};

pub use guard::{
    EnrichmentError, EnrichmentStage, MergeAudit, MergeGuard, MergeOutcome, ProtectedSnapshot,
    ENRICHMENT_KEYS, MERGE_AUDIT_KEY, PROTECTED_KEYS,
};

pub use delta::{compute_delta, delta_between, delta_latest, ChangeDirection, RunDelta};
pub use digest::{canonical_json, compute_digest};
pub use pipeline::{Assessment, AssessmentRequest, RunOutcome};
