//! Canonical control taxonomy.
//!
//! Every enumerated field of a control is a closed set. Values outside the
//! set are rejected by the [`validator`] at pack load; nothing downstream
//! ever sees an open string for these fields.

pub mod validator;

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub use validator::{validate_and_build_controls, TaxonomyIssue};

/// Canonical control identifier pattern, e.g. `A01.01`.
pub const CONTROL_ID_PATTERN: &str = r"^[A-Z][0-9]{2}\.[0-9]{2}$";

fn control_id_regex() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(CONTROL_ID_PATTERN).ok()).as_ref()
}

// ---------------------------------------------------------------------------
// ControlId
// ---------------------------------------------------------------------------

/// Validated canonical control identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ControlId(String);

impl ControlId {
    /// Whether `s` matches [`CONTROL_ID_PATTERN`] exactly.
    pub fn is_canonical(s: &str) -> bool {
        control_id_regex().is_some_and(|re| re.is_match(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ControlId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if Self::is_canonical(&s) {
            Ok(Self(s))
        } else {
            Err(format!("'{s}' does not match {CONTROL_ID_PATTERN}"))
        }
    }
}

impl FromStr for ControlId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_string())
    }
}

impl From<ControlId> for String {
    fn from(id: ControlId) -> Self {
        id.0
    }
}

impl fmt::Display for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::borrow::Borrow<str> for ControlId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Closed enums
// ---------------------------------------------------------------------------

/// Landing-zone design area. Exactly eight, each mapped to a report section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesignArea {
    Network,
    Identity,
    Governance,
    Management,
    Security,
    DataProtection,
    Resilience,
    Cost,
}

impl DesignArea {
    pub const ALL: [DesignArea; 8] = [
        DesignArea::Network,
        DesignArea::Identity,
        DesignArea::Governance,
        DesignArea::Management,
        DesignArea::Security,
        DesignArea::DataProtection,
        DesignArea::Resilience,
        DesignArea::Cost,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DesignArea::Network => "network",
            DesignArea::Identity => "identity",
            DesignArea::Governance => "governance",
            DesignArea::Management => "management",
            DesignArea::Security => "security",
            DesignArea::DataProtection => "data_protection",
            DesignArea::Resilience => "resilience",
            DesignArea::Cost => "cost",
        }
    }

    /// Report section title used for rollups and domain weights.
    pub fn section(&self) -> &'static str {
        match self {
            DesignArea::Network => "Networking",
            DesignArea::Identity => "Identity",
            DesignArea::Governance => "Governance",
            DesignArea::Management => "Management",
            DesignArea::Security => "Security",
            DesignArea::DataProtection => "Data Protection",
            DesignArea::Resilience => "Resilience",
            DesignArea::Cost => "Cost",
        }
    }

    /// Platform foundation areas; the rest form the operational overlay.
    pub fn is_core(&self) -> bool {
        matches!(
            self,
            DesignArea::Network
                | DesignArea::Identity
                | DesignArea::Governance
                | DesignArea::Security
                | DesignArea::Management
        )
    }
}

/// Well-Architected Framework pillar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WafPillar {
    Security,
    Reliability,
    #[serde(rename = "Cost Optimization")]
    CostOptimization,
    #[serde(rename = "Operational Excellence")]
    OperationalExcellence,
    #[serde(rename = "Performance Efficiency")]
    PerformanceEfficiency,
}

impl WafPillar {
    pub const ALL: [WafPillar; 5] = [
        WafPillar::Security,
        WafPillar::Reliability,
        WafPillar::CostOptimization,
        WafPillar::OperationalExcellence,
        WafPillar::PerformanceEfficiency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WafPillar::Security => "Security",
            WafPillar::Reliability => "Reliability",
            WafPillar::CostOptimization => "Cost Optimization",
            WafPillar::OperationalExcellence => "Operational Excellence",
            WafPillar::PerformanceEfficiency => "Performance Efficiency",
        }
    }
}

/// Provenance of a control definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlType {
    #[serde(rename = "ALZ")]
    Alz,
    Derived,
    Manual,
    Hybrid,
}

impl ControlType {
    pub const ALL: [ControlType; 4] = [
        ControlType::Alz,
        ControlType::Derived,
        ControlType::Manual,
        ControlType::Hybrid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ControlType::Alz => "ALZ",
            ControlType::Derived => "Derived",
            ControlType::Manual => "Manual",
            ControlType::Hybrid => "Hybrid",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "Critical",
            Severity::High => "High",
            Severity::Medium => "Medium",
            Severity::Low => "Low",
            Severity::Info => "Info",
        }
    }
}

/// How a control is meant to be assessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationLogic {
    Automated,
    Manual,
    Hybrid,
}

impl EvaluationLogic {
    pub const ALL: [EvaluationLogic; 3] = [
        EvaluationLogic::Automated,
        EvaluationLogic::Manual,
        EvaluationLogic::Hybrid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationLogic::Automated => "automated",
            EvaluationLogic::Manual => "manual",
            EvaluationLogic::Hybrid => "hybrid",
        }
    }
}

// ---------------------------------------------------------------------------
// ControlDefinition
// ---------------------------------------------------------------------------

/// Immutable, validated control. Only [`validate_and_build_controls`]
/// constructs these from pack data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlDefinition {
    pub id: ControlId,
    pub title: String,
    pub description: String,
    pub design_area: DesignArea,
    pub sub_area: String,
    pub waf_pillar: WafPillar,
    pub control_type: ControlType,
    pub severity: Severity,
    pub evaluation_logic: EvaluationLogic,
    pub required_signals: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance_url: Option<String>,
}

impl ControlDefinition {
    pub fn section(&self) -> &'static str {
        self.design_area.section()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_ids_accepted() {
        for id in ["A01.01", "G03.12", "Z99.00"] {
            assert!(ControlId::is_canonical(id), "{id} should be canonical");
        }
    }

    #[test]
    fn non_canonical_ids_rejected() {
        for id in ["a01.01", "A1.01", "A01.1", "A01-01", "AB1.01", " A01.01", "A01.01 ", ""] {
            assert!(!ControlId::is_canonical(id), "{id:?} should be rejected");
        }
    }

    #[test]
    fn non_ascii_digits_rejected() {
        assert!(!ControlId::is_canonical("A٠١.٠١"));
    }

    #[test]
    fn control_id_deserialize_rejects_bad_pattern() {
        let err = serde_json::from_str::<ControlId>(r#""x01.01""#);
        assert!(err.is_err());
        let ok: ControlId = serde_json::from_str(r#""E01.01""#).unwrap();
        assert_eq!(ok.as_str(), "E01.01");
    }

    #[test]
    fn design_area_serde_matches_as_str() {
        for area in DesignArea::ALL {
            let json = serde_json::to_value(area).unwrap();
            assert_eq!(json, serde_json::Value::String(area.as_str().to_string()));
        }
    }

    #[test]
    fn pillar_serde_matches_as_str() {
        for pillar in WafPillar::ALL {
            let json = serde_json::to_value(pillar).unwrap();
            assert_eq!(json, serde_json::Value::String(pillar.as_str().to_string()));
        }
    }

    #[test]
    fn every_area_has_distinct_section() {
        let mut sections: Vec<_> = DesignArea::ALL.iter().map(|a| a.section()).collect();
        sections.sort();
        sections.dedup();
        assert_eq!(sections.len(), 8);
    }
}
