//! ---
//! ring_section: "02-data-model"
//! ring_subsection: "module"
//! ring_type: "source"
//! ring_scope: "code"
//! ring_description: "Wire schema shared by registry and member."
//! ring_version: "v0.1.0-alpha"
//! ring_owner: "tbd"
//! ---
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::member::MemberRecord;

fn default_threshold() -> u32 {
    1
}

fn default_grace_period_s() -> u64 {
    60
}

/// How loudly a location's absence should be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    High,
    Medium,
    Low,
}

/// One location's declared expectation, read from the YAML declaration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedLocationSpec {
    pub expected_count: u32,
    pub criticality: Criticality,
    #[serde(default = "default_grace_period_s")]
    pub grace_period_s: u64,
    #[serde(default)]
    pub description: Option<String>,
}

/// Analysis-wide thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSettings {
    /// Missing high-criticality locations at or above this count raise an
    /// additional aggregate error alert.
    #[serde(default = "default_threshold")]
    pub critical_missing_threshold: u32,
    /// Total missing members at or above this count raise a warning alert.
    #[serde(default = "default_threshold")]
    pub total_missing_threshold: u32,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            critical_missing_threshold: default_threshold(),
            total_missing_threshold: default_threshold(),
        }
    }
}

/// Root of the expected-members declaration file.
///
/// ```yaml
/// settings:
///   critical_missing_threshold: 1
///   total_missing_threshold: 2
/// locations:
///   us1:
///     expected_count: 2
///     criticality: high
///     grace_period_s: 120
///     description: primary k8s cluster
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpectedMembersSpec {
    #[serde(default)]
    pub settings: AnalysisSettings,
    #[serde(default)]
    pub locations: IndexMap<String, ExpectedLocationSpec>,
}

/// Health verdict for one location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationStatus {
    Healthy,
    MissingMembers,
    ExtraMembers,
    UnexpectedLocation,
}

/// Per-location analysis result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationReport {
    pub expected_count: u32,
    pub actual_count: u32,
    pub missing_count: u32,
    pub status: LocationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criticality: Option<Criticality>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Unix seconds since the location first dropped below its expectation;
    /// present only while below.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub below_since: Option<i64>,
}

/// Alert severity levels emitted by the analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Error,
    Warning,
}

/// One alert line attached to the analysis payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisAlert {
    pub severity: AlertSeverity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub message: String,
}

/// Aggregate counters over all locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub total_expected: u32,
    pub total_actual: u32,
    pub total_missing_members: u32,
    pub locations_missing: u32,
    pub locations_unexpected: u32,
}

/// The `missing_analysis` payload of `/members_with_analysis`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissingAnalysis {
    pub enabled: bool,
    pub timestamp: i64,
    pub locations: IndexMap<String, LocationReport>,
    pub alerts: Vec<AnalysisAlert>,
    pub summary: AnalysisSummary,
}

impl MissingAnalysis {
    /// Payload emitted when the feature is disabled by configuration.
    pub fn disabled(timestamp: i64) -> Self {
        Self {
            enabled: false,
            timestamp,
            locations: IndexMap::new(),
            alerts: Vec::new(),
            summary: AnalysisSummary::default(),
        }
    }
}

/// Body of `GET /members_with_analysis`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembersWithAnalysis {
    pub members: Vec<MemberRecord>,
    pub missing_analysis: MissingAnalysis,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_defaults_apply() {
        let raw = r#"{"locations":{"us1":{"expected_count":2,"criticality":"high"}}}"#;
        let spec: ExpectedMembersSpec = serde_json::from_str(raw).unwrap();
        assert_eq!(spec.settings.total_missing_threshold, 1);
        let us1 = &spec.locations["us1"];
        assert_eq!(us1.grace_period_s, 60);
        assert!(us1.description.is_none());
    }

    #[test]
    fn location_status_uses_snake_case() {
        let json = serde_json::to_string(&LocationStatus::MissingMembers).unwrap();
        assert_eq!(json, "\"missing_members\"");
        let json = serde_json::to_string(&LocationStatus::UnexpectedLocation).unwrap();
        assert_eq!(json, "\"unexpected_location\"");
    }
}
