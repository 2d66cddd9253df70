//! Fail-fast taxonomy enforcement for raw control definitions.
//!
//! Validation walks the raw JSON so every problem can be reported with its
//! control and field. All issues across the pack are collected and raised
//! together; typed [`ControlDefinition`]s exist only when there are none.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    ControlDefinition, ControlId, ControlType, DesignArea, EvaluationLogic, Severity, WafPillar,
};
use crate::error::{PostureError, Result};

/// One taxonomy problem, named by control and field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyIssue {
    pub control_id: String,
    pub field: String,
    pub detail: String,
}

impl TaxonomyIssue {
    pub fn new(
        control_id: impl Into<String>,
        field: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            control_id: control_id.into(),
            field: field.into(),
            detail: detail.into(),
        }
    }
}

const REQUIRED_TEXT_FIELDS: [&str; 3] = ["title", "description", "sub_area"];

fn closed_value<T: Copy>(
    issues: &mut Vec<TaxonomyIssue>,
    control_id: &str,
    entry: &Map<String, Value>,
    field: &str,
    all: &[T],
    as_str: fn(&T) -> &'static str,
) -> Option<T> {
    let raw = match entry.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => s,
        Some(Value::String(_)) | Some(Value::Null) | None => {
            issues.push(TaxonomyIssue::new(control_id, field, "missing or empty"));
            return None;
        }
        Some(other) => {
            issues.push(TaxonomyIssue::new(
                control_id,
                field,
                format!("expected a string, found {other}"),
            ));
            return None;
        }
    };

    let found = all.iter().copied().find(|v| as_str(v) == raw);
    if found.is_none() {
        let allowed: Vec<&str> = all.iter().map(as_str).collect();
        issues.push(TaxonomyIssue::new(
            control_id,
            field,
            format!("'{raw}' is not a recognized value (allowed: {})", allowed.join(", ")),
        ));
    }
    found
}

fn text_value(
    issues: &mut Vec<TaxonomyIssue>,
    control_id: &str,
    entry: &Map<String, Value>,
    field: &str,
) -> Option<String> {
    match entry.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        _ => {
            issues.push(TaxonomyIssue::new(control_id, field, "missing or empty"));
            None
        }
    }
}

fn required_signals(
    issues: &mut Vec<TaxonomyIssue>,
    control_id: &str,
    entry: &Map<String, Value>,
    logic: Option<EvaluationLogic>,
    known_signals: &BTreeSet<String>,
) -> Option<Vec<String>> {
    let Some(Value::Array(items)) = entry.get("required_signals") else {
        issues.push(TaxonomyIssue::new(
            control_id,
            "required_signals",
            "must be a list of signal ids",
        ));
        return None;
    };

    if items.is_empty() && logic != Some(EvaluationLogic::Manual) {
        issues.push(TaxonomyIssue::new(
            control_id,
            "required_signals",
            "must not be empty unless evaluation_logic is manual",
        ));
        return None;
    }

    let before = issues.len();
    let mut signals = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::String(s) if known_signals.contains(s) => signals.push(s.clone()),
            Value::String(s) => issues.push(TaxonomyIssue::new(
                control_id,
                "required_signals",
                format!("unknown signal '{s}' (not declared in the pack's signal definitions)"),
            )),
            other => issues.push(TaxonomyIssue::new(
                control_id,
                "required_signals",
                format!("expected a signal id string, found {other}"),
            )),
        }
    }
    (issues.len() == before).then_some(signals)
}

fn validate_control(
    issues: &mut Vec<TaxonomyIssue>,
    raw_id: &str,
    entry: &Value,
    known_signals: &BTreeSet<String>,
) -> Option<ControlDefinition> {
    let before = issues.len();

    let id = ControlId::try_from(raw_id.to_string())
        .map_err(|detail| issues.push(TaxonomyIssue::new(raw_id, "id", detail)))
        .ok();

    let Value::Object(entry) = entry else {
        issues.push(TaxonomyIssue::new(raw_id, "*", "control entry must be an object"));
        return None;
    };

    let [title, description, sub_area] =
        REQUIRED_TEXT_FIELDS.map(|f| text_value(issues, raw_id, entry, f));
    let design_area = closed_value(
        issues,
        raw_id,
        entry,
        "design_area",
        &DesignArea::ALL,
        DesignArea::as_str,
    );
    let waf_pillar = closed_value(
        issues,
        raw_id,
        entry,
        "waf_pillar",
        &WafPillar::ALL,
        WafPillar::as_str,
    );
    let control_type = closed_value(
        issues,
        raw_id,
        entry,
        "control_type",
        &ControlType::ALL,
        ControlType::as_str,
    );
    let severity = closed_value(
        issues,
        raw_id,
        entry,
        "severity",
        &Severity::ALL,
        Severity::as_str,
    );
    let evaluation_logic = closed_value(
        issues,
        raw_id,
        entry,
        "evaluation_logic",
        &EvaluationLogic::ALL,
        EvaluationLogic::as_str,
    );
    let signals = required_signals(issues, raw_id, entry, evaluation_logic, known_signals);

    let guidance_url = match entry.get("guidance_url") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => {
            issues.push(TaxonomyIssue::new(
                raw_id,
                "guidance_url",
                format!("expected a string, found {other}"),
            ));
            None
        }
    };

    if issues.len() != before {
        return None;
    }

    Some(ControlDefinition {
        id: id?,
        title: title?,
        description: description?,
        design_area: design_area?,
        sub_area: sub_area?,
        waf_pillar: waf_pillar?,
        control_type: control_type?,
        severity: severity?,
        evaluation_logic: evaluation_logic?,
        required_signals: signals?,
        guidance_url,
    })
}

fn validate_design_area_index(
    issues: &mut Vec<TaxonomyIssue>,
    raw_controls: &Map<String, Value>,
    design_areas: &Map<String, Value>,
) {
    let mut indexed: BTreeMap<String, String> = BTreeMap::new();

    for (area_name, area_def) in design_areas {
        let label = format!("design_areas.{area_name}");
        if !DesignArea::ALL.iter().any(|a| a.as_str() == area_name) {
            issues.push(TaxonomyIssue::new(
                &label,
                "design_area",
                format!("'{area_name}' is not a recognized design area"),
            ));
        }
        let Some(Value::Array(ids)) = area_def.get("controls") else {
            issues.push(TaxonomyIssue::new(&label, "controls", "must be a list of control ids"));
            continue;
        };
        for id in ids {
            match id.as_str() {
                Some(id) => {
                    if let Some(previous) = indexed.insert(id.to_string(), area_name.clone()) {
                        issues.push(TaxonomyIssue::new(
                            id,
                            "design_areas",
                            format!("indexed under both '{previous}' and '{area_name}'"),
                        ));
                    }
                }
                None => issues.push(TaxonomyIssue::new(
                    &label,
                    "controls",
                    format!("expected a control id string, found {id}"),
                )),
            }
        }
    }

    for (id, area) in &indexed {
        match raw_controls.get(id) {
            None => issues.push(TaxonomyIssue::new(
                id,
                "design_areas",
                "listed in design_areas index but not defined in controls",
            )),
            Some(entry) => {
                let declared = entry.get("design_area").and_then(Value::as_str);
                if let Some(declared) = declared {
                    if declared != area {
                        issues.push(TaxonomyIssue::new(
                            id,
                            "design_area",
                            format!("declared '{declared}' but indexed under '{area}'"),
                        ));
                    }
                }
            }
        }
    }

    for id in raw_controls.keys() {
        if !indexed.contains_key(id) {
            issues.push(TaxonomyIssue::new(
                id,
                "design_areas",
                "defined in controls but not listed in any design_areas index",
            ));
        }
    }
}

/// Validate raw control entries and build typed definitions, ordered by id.
///
/// `raw_controls` maps control id to its definition object; `design_areas`
/// maps design area name to `{"controls": [ids...]}`. Every id in
/// `required_signals` must appear in `known_signals`.
pub fn validate_and_build_controls(
    raw_controls: &Map<String, Value>,
    design_areas: &Map<String, Value>,
    known_signals: &BTreeSet<String>,
) -> Result<Vec<ControlDefinition>> {
    if raw_controls.is_empty() {
        return Err(PostureError::TaxonomyViolation {
            violations: vec![TaxonomyIssue::new(
                "*",
                "controls",
                "control pack has zero controls",
            )],
        });
    }

    let mut issues = Vec::new();
    let mut controls = Vec::with_capacity(raw_controls.len());
    for (id, entry) in raw_controls {
        if let Some(control) = validate_control(&mut issues, id, entry, known_signals) {
            controls.push(control);
        }
    }
    validate_design_area_index(&mut issues, raw_controls, design_areas);

    if !issues.is_empty() {
        return Err(PostureError::TaxonomyViolation { violations: issues });
    }

    controls.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(controls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn signals() -> BTreeSet<String> {
        ["defender:pricings", "resource_graph:azure_firewall"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn control(area: &str, severity: &str, signal: &str) -> Value {
        json!({
            "title": "Control",
            "description": "Checks something",
            "design_area": area,
            "sub_area": "Baseline",
            "waf_pillar": "Security",
            "control_type": "ALZ",
            "severity": severity,
            "evaluation_logic": "automated",
            "required_signals": [signal],
        })
    }

    fn as_map(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    fn issues_of(err: PostureError) -> Vec<TaxonomyIssue> {
        match err {
            PostureError::TaxonomyViolation { violations } => violations,
            other => panic!("expected TaxonomyViolation, got {other:?}"),
        }
    }

    #[test]
    fn valid_pack_builds_sorted_controls() {
        let controls = as_map(json!({
            "G01.01": control("security", "Critical", "defender:pricings"),
            "D01.01": control("network", "High", "resource_graph:azure_firewall"),
        }));
        let areas = as_map(json!({
            "security": {"controls": ["G01.01"]},
            "network": {"controls": ["D01.01"]},
        }));
        let built = validate_and_build_controls(&controls, &areas, &signals()).unwrap();
        let ids: Vec<&str> = built.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["D01.01", "G01.01"]);
        assert_eq!(built[1].severity, Severity::Critical);
        assert_eq!(built[0].design_area, DesignArea::Network);
    }

    #[test]
    fn zero_controls_is_a_violation() {
        let err = validate_and_build_controls(&Map::new(), &Map::new(), &signals()).unwrap_err();
        let issues = issues_of(err);
        assert_eq!(issues[0].field, "controls");
    }

    #[test]
    fn bad_id_is_rejected_not_renamed() {
        let controls = as_map(json!({"a1.1": control("security", "High", "defender:pricings")}));
        let areas = as_map(json!({"security": {"controls": ["a1.1"]}}));
        let issues = issues_of(validate_and_build_controls(&controls, &areas, &signals()).unwrap_err());
        assert!(issues.iter().any(|i| i.control_id == "a1.1" && i.field == "id"));
    }

    #[test]
    fn all_violations_collected_together() {
        let mut bad = control("security", "Severe", "defender:pricings");
        bad["waf_pillar"] = json!("Speed");
        bad.as_object_mut().unwrap().remove("title");
        let controls = as_map(json!({"G01.01": bad}));
        let areas = as_map(json!({"security": {"controls": ["G01.01"]}}));

        let issues = issues_of(validate_and_build_controls(&controls, &areas, &signals()).unwrap_err());
        let fields: BTreeSet<&str> = issues.iter().map(|i| i.field.as_str()).collect();
        assert!(fields.contains("severity"));
        assert!(fields.contains("waf_pillar"));
        assert!(fields.contains("title"));
    }

    #[test]
    fn blank_field_is_not_defaulted() {
        let mut bad = control("security", "High", "defender:pricings");
        bad["sub_area"] = json!("   ");
        let controls = as_map(json!({"G01.01": bad}));
        let areas = as_map(json!({"security": {"controls": ["G01.01"]}}));
        let issues = issues_of(validate_and_build_controls(&controls, &areas, &signals()).unwrap_err());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "sub_area");
    }

    #[test]
    fn unknown_signal_reference_rejected() {
        let controls = as_map(json!({"G01.01": control("security", "High", "made:up")}));
        let areas = as_map(json!({"security": {"controls": ["G01.01"]}}));
        let issues = issues_of(validate_and_build_controls(&controls, &areas, &signals()).unwrap_err());
        assert!(issues[0].detail.contains("made:up"));
    }

    #[test]
    fn manual_control_may_have_no_signals() {
        let mut manual = control("governance", "Low", "defender:pricings");
        manual["evaluation_logic"] = json!("manual");
        manual["required_signals"] = json!([]);
        let controls = as_map(json!({"E02.01": manual}));
        let areas = as_map(json!({"governance": {"controls": ["E02.01"]}}));
        let built = validate_and_build_controls(&controls, &areas, &signals()).unwrap();
        assert!(built[0].required_signals.is_empty());
    }

    #[test]
    fn automated_control_needs_signals() {
        let mut ctrl = control("security", "High", "defender:pricings");
        ctrl["required_signals"] = json!([]);
        let controls = as_map(json!({"G01.01": ctrl}));
        let areas = as_map(json!({"security": {"controls": ["G01.01"]}}));
        let issues = issues_of(validate_and_build_controls(&controls, &areas, &signals()).unwrap_err());
        assert_eq!(issues[0].field, "required_signals");
    }

    #[test]
    fn index_cross_check_both_directions() {
        let controls = as_map(json!({
            "G01.01": control("security", "High", "defender:pricings"),
            "G01.02": control("security", "High", "defender:pricings"),
        }));
        let areas = as_map(json!({
            "security": {"controls": ["G01.01", "G09.09"]},
            "weather": {"controls": []},
        }));
        let issues = issues_of(validate_and_build_controls(&controls, &areas, &signals()).unwrap_err());
        assert!(issues.iter().any(|i| i.control_id == "G09.09"));
        assert!(issues.iter().any(|i| i.control_id == "G01.02"));
        assert!(issues.iter().any(|i| i.control_id == "design_areas.weather"));
    }

    #[test]
    fn declared_area_must_match_index() {
        let controls = as_map(json!({"G01.01": control("security", "High", "defender:pricings")}));
        let areas = as_map(json!({"network": {"controls": ["G01.01"]}}));
        let issues = issues_of(validate_and_build_controls(&controls, &areas, &signals()).unwrap_err());
        assert!(issues
            .iter()
            .any(|i| i.field == "design_area" && i.detail.contains("indexed under 'network'")));
    }
}
