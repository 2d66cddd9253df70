//! Builders shared by unit tests.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::evaluators::{EvalOutcomeResult, EvaluatorFn};
use crate::pack::{build_pack, ChecksumRegistry, ControlPack, PackSources};
use crate::signals::{EvalScope, Signal, SignalBus, SignalSnapshot};
use crate::taxonomy::{
    ControlDefinition, ControlId, ControlType, DesignArea, EvaluationLogic, Severity, WafPillar,
};

pub(crate) fn control(
    id: &str,
    area: DesignArea,
    severity: Severity,
    signals: &[&str],
) -> ControlDefinition {
    ControlDefinition {
        id: ControlId::try_from(id.to_string()).expect("canonical test id"),
        title: format!("Control {id}"),
        description: format!("Test control {id}"),
        design_area: area,
        sub_area: "test".to_string(),
        waf_pillar: WafPillar::Security,
        control_type: ControlType::Alz,
        severity,
        evaluation_logic: if signals.is_empty() {
            EvaluationLogic::Manual
        } else {
            EvaluationLogic::Automated
        },
        required_signals: signals.iter().map(|s| s.to_string()).collect(),
        guidance_url: None,
    }
}

pub(crate) fn snapshot(signals: Vec<Signal>) -> SignalSnapshot {
    let mut bus = SignalBus::new(EvalScope::tenant("test-tenant"));
    for s in signals {
        bus.publish(s);
    }
    bus.freeze()
}

/// Run `f` for a throwaway control declaring `signals`.
pub(crate) fn run_evaluator(
    f: EvaluatorFn,
    id: &str,
    signals: &[&str],
    data: Vec<Signal>,
) -> EvalOutcomeResult {
    let c = control(id, DesignArea::Network, Severity::High, signals);
    let snap = snapshot(data);
    let view = snap.view(&c);
    f(&c, &view)
}

/// Unfrozen `test/v0` pack built through the real loader.
pub(crate) fn pack(controls: &[ControlDefinition], graph: Option<Value>) -> ControlPack {
    let mut raw = Map::new();
    let mut areas: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut signals = Map::new();
    for c in controls {
        raw.insert(
            c.id.to_string(),
            json!({
                "title": c.title,
                "description": c.description,
                "design_area": c.design_area.as_str(),
                "sub_area": c.sub_area,
                "waf_pillar": c.waf_pillar.as_str(),
                "control_type": c.control_type.as_str(),
                "severity": c.severity.as_str(),
                "evaluation_logic": c.evaluation_logic.as_str(),
                "required_signals": c.required_signals,
            }),
        );
        areas
            .entry(c.design_area.as_str())
            .or_default()
            .push(c.id.as_str());
        for s in &c.required_signals {
            let source = s.split(':').next().unwrap_or(s);
            signals.insert(s.clone(), json!({"source": source}));
        }
    }
    let areas: Map<String, Value> = areas
        .into_iter()
        .map(|(area, ids)| (area.to_string(), json!({ "controls": ids })))
        .collect();

    let mut manifest = json!({"name": "Test pack", "version": "v0", "family": "test"});
    if graph.is_some() {
        manifest["graph_ref"] = json!("dependencies.json");
    }
    let sources = PackSources {
        family: "test".to_string(),
        version: "v0".to_string(),
        manifest: manifest.to_string().into_bytes(),
        signals: json!({ "signals": signals }).to_string().into_bytes(),
        controls: json!({ "controls": raw, "design_areas": areas })
            .to_string()
            .into_bytes(),
        graph: graph.map(|g| g.to_string().into_bytes()),
        root: None,
    };
    build_pack(sources, &ChecksumRegistry::empty()).expect("test pack builds")
}
