//! Assessment pipeline composition.
//!
//! acquisition → freeze → evaluation → scoring + impact → record →
//! enrichment behind the merge guard → one publish to the run store.
//! A run that fails at any step leaves the store untouched.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use posture_store::{RunManifest, RunStore};
use serde_json::Value;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::evaluators::{evaluate_all, evaluate_all_concurrent, EvalResult, EvaluatorRegistry};
use crate::guard::{EnrichmentStage, MergeGuard, MergeOutcome};
use crate::obs;
use crate::pack::{enforce_run_mode, load_pack, ChecksumRegistry, ControlPack};
use crate::record::{rollup_by_section, ExecutionContext, RunMeta, RunRecord, ScopeSummary};
use crate::scoring::{score, ScoringOptions, ScoringWeights};
use crate::signals::{
    availability_matrix, execution_summary, EvalScope, Signal, SignalBus, SignalCollector,
    SignalSnapshot,
};

/// Input of one assessment run.
#[derive(Debug, Clone, Default)]
pub struct AssessmentRequest {
    pub scope: EvalScope,
    pub execution_context: ExecutionContext,
    /// Generated when absent.
    pub run_id: Option<String>,
    /// Pushed onto the bus before the collector is asked for anything.
    pub preloaded_signals: Vec<Signal>,
}

impl AssessmentRequest {
    pub fn new(scope: EvalScope) -> Self {
        Self {
            scope,
            ..Self::default()
        }
    }

    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.execution_context = context;
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_signal(mut self, signal: Signal) -> Self {
        self.preloaded_signals.push(signal);
        self
    }
}

/// Published result of a run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub manifest: RunManifest,
    /// Deterministic record, before enrichment.
    pub record: RunRecord,
    /// What was persisted: the record plus merged enrichment keys and audit.
    pub published: Value,
}

fn new_run_id(at: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", at.format("%Y%m%dT%H%M%SZ"), &suffix[..8])
}

/// A loaded pack plus everything needed to assess against it.
#[derive(Debug, Clone)]
pub struct Assessment {
    config: PipelineConfig,
    pack: Arc<ControlPack>,
    evaluators: Arc<EvaluatorRegistry>,
    weights: ScoringWeights,
}

impl Assessment {
    /// Load the configured pack through the version lock.
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let mut registry = ChecksumRegistry::builtin();
        if let Some(path) = &config.checksum_registry {
            registry = registry.merge_file(path)?;
        }
        let pack = load_pack(
            &config.packs_dir,
            &config.pack_family,
            &config.pack_version,
            &registry,
        )?;
        Self::new(config, pack)
    }

    /// Use an already loaded pack. Production runs still refuse unfrozen packs.
    pub fn new(config: PipelineConfig, pack: ControlPack) -> Result<Self> {
        config.validate()?;
        enforce_run_mode(
            &pack.key(),
            pack.frozen,
            config.run_mode,
            config.allow_unfrozen_packs,
        )?;
        let mut evaluators = EvaluatorRegistry::builtin();
        evaluators.restrict_to(&pack);
        Ok(Self {
            config,
            pack: Arc::new(pack),
            evaluators: Arc::new(evaluators),
            weights: ScoringWeights::frozen(),
        })
    }

    pub fn with_evaluators(mut self, mut evaluators: EvaluatorRegistry) -> Self {
        evaluators.restrict_to(&self.pack);
        self.evaluators = Arc::new(evaluators);
        self
    }

    pub fn with_weights(mut self, weights: ScoringWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn pack(&self) -> &ControlPack {
        &self.pack
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Empty bus for `scope`, with the configured freshness window.
    pub fn signal_bus(&self, scope: EvalScope) -> SignalBus {
        let bus = SignalBus::new(scope);
        match self.config.signal_freshness_secs {
            Some(secs) => {
                let secs = i64::try_from(secs).unwrap_or(i64::MAX).min(i64::MAX / 1_000);
                bus.with_freshness(Duration::seconds(secs))
            }
            None => bus,
        }
    }

    /// Collect every signal the pack requires and freeze the bus.
    pub async fn acquire(
        &self,
        mut bus: SignalBus,
        collector: &dyn SignalCollector,
        now: DateTime<Utc>,
    ) -> SignalSnapshot {
        let ids = self.pack.required_signal_ids();
        bus.acquire(collector, &ids, now).await;
        bus.freeze()
    }

    /// Evaluate every control over `snapshot`; always sorted by control id.
    pub async fn evaluate(&self, snapshot: Arc<SignalSnapshot>) -> Vec<EvalResult> {
        if self.config.concurrent_evaluation {
            evaluate_all_concurrent(
                Arc::clone(&self.pack),
                Arc::clone(&self.evaluators),
                snapshot,
            )
            .await
        } else {
            evaluate_all(&self.pack, &self.evaluators, &snapshot)
        }
    }

    /// Build the deterministic record from a frozen snapshot.
    pub async fn assess(
        &self,
        snapshot: SignalSnapshot,
        context: ExecutionContext,
        run_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<RunRecord> {
        let snapshot = Arc::new(snapshot);
        let availability = availability_matrix(&self.pack, &snapshot);
        let summary = execution_summary(&availability, snapshot.stats());
        obs::emit_signals_acquired(
            run_id,
            summary.total,
            summary.ok,
            summary.blocking_gaps.len(),
        );

        let results = self.evaluate(Arc::clone(&snapshot)).await;

        let options = ScoringOptions {
            top_gaps: self.config.top_gaps,
            top_sections: self.config.top_sections,
        };
        let mut scoring = score(&self.pack, &results, &self.weights, options)?;
        if let Some(graph) = &self.pack.graph {
            let impact = graph.impact_of(scoring.failing_control_ids());
            scoring.dependency_impact = Some(impact);
        }
        obs::emit_run_scored(
            run_id,
            scoring.composite_score,
            scoring.automation_coverage.automation_percent,
            scoring.most_impactful_gaps.len(),
        );

        let rollups = rollup_by_section(&results, |id| {
            self.pack.control(id).map(|c| c.section().to_string())
        });
        let completed_at = Utc::now();
        let meta = RunMeta {
            run_id: run_id.to_string(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            pack_family: self.pack.family.clone(),
            pack_version: self.pack.version.clone(),
            pack_checksum: self.pack.checksum.clone(),
            pack_frozen: self.pack.frozen,
            run_mode: self.config.run_mode,
            total_controls: self.pack.control_count(),
            started_at,
            completed_at,
            duration_ms: u64::try_from((completed_at - started_at).num_milliseconds())
                .unwrap_or(0),
        };

        Ok(RunRecord {
            results,
            scoring,
            rollups,
            signal_availability: availability,
            signal_execution_summary: summary,
            scope_summary: ScopeSummary::of(snapshot.scope()),
            meta,
            execution_context: context,
        })
    }

    /// Full run: acquire, assess, enrich behind the guard, publish once.
    pub async fn run(
        &self,
        request: AssessmentRequest,
        collector: &dyn SignalCollector,
        enrichment: Option<&dyn EnrichmentStage>,
        store: &dyn RunStore,
    ) -> Result<RunOutcome> {
        let started_at = Utc::now();
        let run_id = request
            .run_id
            .clone()
            .unwrap_or_else(|| new_run_id(started_at));
        match self
            .run_inner(&run_id, request, collector, enrichment, store, started_at)
            .instrument(obs::run_span(&run_id))
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                obs::emit_run_failed(&run_id, &e);
                Err(e)
            }
        }
    }

    async fn run_inner(
        &self,
        run_id: &str,
        request: AssessmentRequest,
        collector: &dyn SignalCollector,
        enrichment: Option<&dyn EnrichmentStage>,
        store: &dyn RunStore,
        started_at: DateTime<Utc>,
    ) -> Result<RunOutcome> {
        posture_store::validate_run_id(run_id)?;
        obs::emit_run_started(run_id, &self.pack.key(), &request.scope.key());
        let mut bus = self.signal_bus(request.scope);
        for signal in request.preloaded_signals {
            bus.publish(signal);
        }
        let snapshot = self.acquire(bus, collector, started_at).await;
        let record = self
            .assess(snapshot, request.execution_context, run_id, started_at)
            .await?;

        let guard = MergeGuard::new(record.to_value()?)?;
        let published = match enrichment {
            Some(stage) => guard.run(stage).await?,
            None => guard.finalize_alone(MergeOutcome::Skipped, None, None)?,
        };

        let manifest = store.publish(run_id, started_at, &published).await?;
        obs::emit_run_published(
            run_id,
            manifest.digest.as_str(),
            record.meta.duration_ms,
        );
        Ok(RunOutcome {
            run_id: run_id.to_string(),
            manifest,
            record,
            published,
        })
    }
}
