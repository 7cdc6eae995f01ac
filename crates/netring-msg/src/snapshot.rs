//! ---
//! ring_section: "02-data-model"
//! ring_subsection: "module"
//! ring_type: "source"
//! ring_scope: "code"
//! ring_description: "Wire schema shared by registry and member."
//! ring_version: "v0.1.0-alpha"
//! ring_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Histogram bucket boundaries, in seconds, for probe durations.
pub const HISTOGRAM_BUCKETS: [f64; 8] = [0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0];

/// The four probe pipelines a member runs against each peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Tcp,
    Http,
    Bandwidth,
    Traceroute,
}

impl ProbeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeKind::Tcp => "tcp",
            ProbeKind::Http => "http",
            ProbeKind::Bandwidth => "bandwidth",
            ProbeKind::Traceroute => "traceroute",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "tcp" => Some(ProbeKind::Tcp),
            "http" => Some(ProbeKind::Http),
            "bandwidth" => Some(ProbeKind::Bandwidth),
            "traceroute" => Some(ProbeKind::Traceroute),
            _ => None,
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite identifier of one probe result within a snapshot.
///
/// The wire representation of a snapshot is a flat JSON object; this key's
/// `wire()`/`parse()` pair is the normalization layer between the composite
/// form and the flat map keys (`"tcp:<instance>"`,
/// `"http:<instance>:<endpoint>"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProbeKey {
    pub target_instance: String,
    pub kind: ProbeKind,
    pub endpoint: Option<String>,
}

impl ProbeKey {
    pub fn new(kind: ProbeKind, target_instance: impl Into<String>) -> Self {
        Self {
            target_instance: target_instance.into(),
            kind,
            endpoint: None,
        }
    }

    pub fn with_endpoint(kind: ProbeKind, target_instance: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            target_instance: target_instance.into(),
            kind,
            endpoint: Some(endpoint.into()),
        }
    }

    /// Flat map key used in the snapshot JSON.
    pub fn wire(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => format!("{}:{}:{}", self.kind, self.target_instance, endpoint),
            None => format!("{}:{}", self.kind, self.target_instance),
        }
    }

    /// Inverse of [`ProbeKey::wire`]. Returns `None` for malformed keys.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.splitn(3, ':');
        let kind = ProbeKind::parse(parts.next()?)?;
        let target_instance = parts.next()?.to_owned();
        if target_instance.is_empty() {
            return None;
        }
        let endpoint = parts.next().map(str::to_owned);
        Some(Self {
            target_instance,
            kind,
            endpoint,
        })
    }
}

/// Labels attached to every probe sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeLabels {
    pub source_location: String,
    pub source_instance: String,
    pub target_location: String,
    pub target_instance: String,
    pub target_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// A TCP/HTTP/bandwidth observation. TCP and HTTP carry 0/1 in `value`;
/// bandwidth carries Mbps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeSample {
    pub labels: ProbeLabels,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    pub timestamp: i64,
}

/// A traceroute observation. Present only when at least one hop answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracerouteSample {
    pub labels: ProbeLabels,
    pub total_hops: u32,
    pub max_hop_latency_ms: f64,
    pub timestamp: i64,
}

/// Aggregated latency for one (check type, target location) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationStats {
    pub count: u64,
    pub sum_ms: f64,
    pub avg_ms: f64,
    /// Cumulative counts keyed by bucket upper bound in seconds.
    pub buckets: BTreeMap<String, u64>,
}

/// Member-level info carried with every snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralInfo {
    pub uptime_s: u64,
    pub version: String,
}

impl Default for GeneralInfo {
    fn default() -> Self {
        Self {
            uptime_s: 0,
            version: String::new(),
        }
    }
}

/// One member's most recent probe results, pushed wholesale to the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    #[serde(default)]
    pub connectivity_tcp: BTreeMap<String, ProbeSample>,
    #[serde(default)]
    pub connectivity_http: BTreeMap<String, ProbeSample>,
    #[serde(default)]
    pub bandwidth_tests: BTreeMap<String, ProbeSample>,
    #[serde(default)]
    pub traceroute_tests: BTreeMap<String, TracerouteSample>,
    #[serde(default)]
    pub check_durations: BTreeMap<String, DurationStats>,
    #[serde(default)]
    pub general: GeneralInfo,
}

impl MetricsSnapshot {
    /// Total number of probe results across the four maps.
    pub fn sample_count(&self) -> usize {
        self.connectivity_tcp.len()
            + self.connectivity_http.len()
            + self.bandwidth_tests.len()
            + self.traceroute_tests.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_key_wire_round_trip() {
        let plain = ProbeKey::new(ProbeKind::Tcp, "abc-123");
        assert_eq!(plain.wire(), "tcp:abc-123");
        assert_eq!(ProbeKey::parse("tcp:abc-123"), Some(plain));

        let endpoint = ProbeKey::with_endpoint(ProbeKind::Http, "abc-123", "/health");
        assert_eq!(endpoint.wire(), "http:abc-123:/health");
        assert_eq!(ProbeKey::parse("http:abc-123:/health"), Some(endpoint));
    }

    #[test]
    fn probe_key_rejects_malformed_input() {
        assert_eq!(ProbeKey::parse("icmp:abc"), None);
        assert_eq!(ProbeKey::parse("tcp"), None);
        assert_eq!(ProbeKey::parse("tcp:"), None);
    }

    #[test]
    fn snapshot_defaults_from_empty_object() {
        let snapshot: MetricsSnapshot = serde_json::from_str("{}").unwrap();
        assert_eq!(snapshot.sample_count(), 0);
        assert_eq!(snapshot.general.uptime_s, 0);
    }

    #[test]
    fn endpoint_label_elided_when_absent() {
        let sample = ProbeSample {
            labels: ProbeLabels {
                source_location: "us1".into(),
                source_instance: "a".into(),
                target_location: "eu1".into(),
                target_instance: "b".into(),
                target_ip: "10.0.0.2".into(),
                endpoint: None,
            },
            value: 1.0,
            duration_ms: Some(12.5),
            timestamp: 1_700_000_000,
        };
        let json = serde_json::to_string(&sample).unwrap();
        assert!(!json.contains("endpoint"));
    }
}
