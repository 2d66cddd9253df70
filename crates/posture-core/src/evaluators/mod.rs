//! Control evaluators and the registry binding them to control ids.
//!
//! An evaluator is a plain function of a control definition and the signals
//! that control declares. It never reads anything else, so re-evaluating
//! over the same snapshot always yields the same outcome.

mod governance;
mod identity;
mod management;
mod networking;
pub mod runner;
mod security;
mod workload;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::obs;
use crate::pack::ControlPack;
use crate::signals::SignalView;
use crate::taxonomy::ControlDefinition;

pub use runner::{evaluate_all, evaluate_all_concurrent, evaluate_control};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
    Partial,
    NotAssessed,
    NotApplicable,
    Manual,
}

impl Verdict {
    pub const ALL: [Verdict; 6] = [
        Self::Pass,
        Self::Fail,
        Self::Partial,
        Self::NotAssessed,
        Self::NotApplicable,
        Self::Manual,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Partial => "partial",
            Self::NotAssessed => "not_assessed",
            Self::NotApplicable => "not_applicable",
            Self::Manual => "manual",
        }
    }

    /// Pass, Fail or Partial.
    pub fn is_decided(self) -> bool {
        matches!(self, Self::Pass | Self::Fail | Self::Partial)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub kind: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub properties: Value,
}

impl Evidence {
    pub fn metric(summary: impl Into<String>) -> Self {
        Self {
            kind: "metric".to_string(),
            summary: summary.into(),
            resource_id: None,
            properties: Value::Null,
        }
    }

    pub fn resource(resource_id: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            kind: "resource".to_string(),
            summary: summary.into(),
            resource_id: Some(resource_id.into()),
            properties: Value::Null,
        }
    }

    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = properties;
        self
    }
}

/// What an evaluator decided.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalOutcome {
    pub verdict: Verdict,
    pub reason: String,
    pub evidence: Vec<Evidence>,
}

impl EvalOutcome {
    pub fn new(verdict: Verdict, reason: impl Into<String>) -> Self {
        Self {
            verdict,
            reason: reason.into(),
            evidence: Vec::new(),
        }
    }

    pub fn pass(reason: impl Into<String>) -> Self {
        Self::new(Verdict::Pass, reason)
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self::new(Verdict::Fail, reason)
    }

    pub fn partial(reason: impl Into<String>) -> Self {
        Self::new(Verdict::Partial, reason)
    }

    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence.push(evidence);
        self
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum EvalError {
    /// The environment has nothing this control applies to.
    #[error("unsupported shape: {detail}")]
    UnsupportedShape { detail: String },

    #[error("missing data: {detail}")]
    MissingData { detail: String },

    #[error("malformed field '{field}': {detail}")]
    Malformed { field: String, detail: String },
}

pub type EvalOutcomeResult = std::result::Result<EvalOutcome, EvalError>;

pub type EvaluatorFn = fn(&ControlDefinition, &SignalView<'_>) -> EvalOutcomeResult;

/// One verdict per control per scope per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalResult {
    pub control_id: String,
    pub verdict: Verdict,
    pub reason: String,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    #[serde(default)]
    pub signals_used: Vec<String>,
    /// A bound evaluator reached a verdict from signals.
    pub automated: bool,
    pub scope_key: String,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Explicit control id → evaluator bindings.
#[derive(Debug, Clone, Default)]
pub struct EvaluatorRegistry {
    bindings: BTreeMap<String, EvaluatorFn>,
}

impl EvaluatorRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every evaluator shipped with the crate.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for (id, f) in networking::bindings()
            .into_iter()
            .chain(identity::bindings())
            .chain(governance::bindings())
            .chain(management::bindings())
            .chain(security::bindings())
            .chain(workload::bindings())
        {
            registry.bindings.insert(id.to_string(), f);
        }
        registry
    }

    pub fn bind(mut self, control_id: impl Into<String>, evaluator: EvaluatorFn) -> Self {
        self.bindings.insert(control_id.into(), evaluator);
        self
    }

    pub fn unbind(mut self, control_id: &str) -> Self {
        self.bindings.remove(control_id);
        self
    }

    pub fn get(&self, control_id: &str) -> Option<EvaluatorFn> {
        self.bindings.get(control_id).copied()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn bound_ids(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    /// Drop bindings for controls the pack does not define; returns them.
    pub fn restrict_to(&mut self, pack: &ControlPack) -> Vec<String> {
        let foreign: Vec<String> = self
            .bindings
            .keys()
            .filter(|id| !pack.contains(id))
            .cloned()
            .collect();
        for id in &foreign {
            self.bindings.remove(id);
            obs::emit_binding_ignored(id, &pack.key());
        }
        foreign
    }
}

// ---------------------------------------------------------------------------
// Payload helpers shared by the built-in evaluators
// ---------------------------------------------------------------------------

fn field<'v>(payload: &'v Value, name: &str) -> Result<&'v Value, EvalError> {
    payload.get(name).ok_or_else(|| EvalError::MissingData {
        detail: format!("payload has no '{name}'"),
    })
}

fn malformed(name: &str, expected: &str) -> EvalError {
    EvalError::Malformed {
        field: name.to_string(),
        detail: format!("expected {expected}"),
    }
}

pub(crate) fn u64_field(payload: &Value, name: &str) -> Result<u64, EvalError> {
    field(payload, name)?
        .as_u64()
        .ok_or_else(|| malformed(name, "a non-negative integer"))
}

pub(crate) fn f64_field(payload: &Value, name: &str) -> Result<f64, EvalError> {
    field(payload, name)?
        .as_f64()
        .ok_or_else(|| malformed(name, "a number"))
}

pub(crate) fn bool_field(payload: &Value, name: &str) -> Result<bool, EvalError> {
    field(payload, name)?
        .as_bool()
        .ok_or_else(|| malformed(name, "a boolean"))
}

/// `id`, falling back to `name`, of a resource item.
pub(crate) fn item_label(item: &Value) -> String {
    item.get("id")
        .or_else(|| item.get("name"))
        .and_then(Value::as_str)
        .unwrap_or("<unnamed>")
        .to_string()
}

/// Pass at or above `pass_at`, Partial at or above `partial_at`, else Fail.
pub(crate) fn graded(ratio: f64, pass_at: f64, partial_at: f64) -> Verdict {
    if ratio >= pass_at {
        Verdict::Pass
    } else if ratio >= partial_at {
        Verdict::Partial
    } else {
        Verdict::Fail
    }
}

pub(crate) fn unsupported(detail: impl Into<String>) -> EvalError {
    EvalError::UnsupportedShape {
        detail: detail.into(),
    }
}
