//! ---
//! ring_section: "05-observability"
//! ring_subsection: "module"
//! ring_type: "source"
//! ring_scope: "code"
//! ring_description: "Metrics collection and export utilities."
//! ring_version: "v0.1.0-alpha"
//! ring_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::Result;
use netring_msg::HISTOGRAM_BUCKETS;
use prometheus::{
    GaugeVec, HistogramOpts, HistogramVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use tracing::warn;

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Encode a registry into the Prometheus text exposition format.
pub fn encode_text(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let families = registry.gather();
    Ok(encoder.encode_to_string(&families)?)
}

const PROBE_LABELS: [&str; 5] = [
    "source_location",
    "source_instance",
    "target_location",
    "target_instance",
    "target_ip",
];

const HTTP_LABELS: [&str; 6] = [
    "source_location",
    "source_instance",
    "target_location",
    "target_instance",
    "target_ip",
    "endpoint",
];

/// Probe metric families recorded by the member agent.
#[derive(Clone)]
pub struct ProbeMetrics {
    registry: SharedRegistry,
    connectivity_tcp: IntGaugeVec,
    connectivity_http: IntGaugeVec,
    check_duration_seconds: HistogramVec,
    bandwidth_mbps: GaugeVec,
    traceroute_hops_total: IntGaugeVec,
    traceroute_max_hop_latency_ms: GaugeVec,
}

impl ProbeMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let connectivity_tcp = IntGaugeVec::new(
            Opts::new(
                "netring_connectivity_tcp",
                "TCP reachability toward a peer (1 success, 0 failure)",
            ),
            &PROBE_LABELS,
        )?;
        registry.register(Box::new(connectivity_tcp.clone()))?;

        let connectivity_http = IntGaugeVec::new(
            Opts::new(
                "netring_connectivity_http",
                "HTTP liveness per peer endpoint (1 success, 0 failure)",
            ),
            &HTTP_LABELS,
        )?;
        registry.register(Box::new(connectivity_http.clone()))?;

        let check_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "netring_check_duration_seconds",
                "Probe round-trip time by check type and target location",
            )
            .buckets(HISTOGRAM_BUCKETS.to_vec()),
            &["check_type", "target_location"],
        )?;
        registry.register(Box::new(check_duration_seconds.clone()))?;

        let bandwidth_mbps = GaugeVec::new(
            Opts::new(
                "netring_bandwidth_mbps",
                "Most recent bandwidth measurement toward a peer, in Mbps",
            ),
            &["source_location", "target_location", "target_ip"],
        )?;
        registry.register(Box::new(bandwidth_mbps.clone()))?;

        let traceroute_hops_total = IntGaugeVec::new(
            Opts::new(
                "netring_traceroute_hops_total",
                "Hop count of the most recent traceroute toward a peer",
            ),
            &["source_location", "target_location"],
        )?;
        registry.register(Box::new(traceroute_hops_total.clone()))?;

        let traceroute_max_hop_latency_ms = GaugeVec::new(
            Opts::new(
                "netring_traceroute_max_hop_latency_ms",
                "Slowest responding hop of the most recent traceroute, in ms",
            ),
            &["source_location", "target_location"],
        )?;
        registry.register(Box::new(traceroute_max_hop_latency_ms.clone()))?;

        Ok(Self {
            registry,
            connectivity_tcp,
            connectivity_http,
            check_duration_seconds,
            bandwidth_mbps,
            traceroute_hops_total,
            traceroute_max_hop_latency_ms,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn set_tcp(&self, labels: &[&str; 5], success: bool) {
        self.connectivity_tcp
            .with_label_values(labels)
            .set(i64::from(success));
    }

    pub fn set_http(&self, labels: &[&str; 6], success: bool) {
        self.connectivity_http
            .with_label_values(labels)
            .set(i64::from(success));
    }

    pub fn observe_duration(&self, check_type: &str, target_location: &str, seconds: f64) {
        self.check_duration_seconds
            .with_label_values(&[check_type, target_location])
            .observe(seconds);
    }

    pub fn set_bandwidth(&self, source_location: &str, target_location: &str, target_ip: &str, mbps: f64) {
        self.bandwidth_mbps
            .with_label_values(&[source_location, target_location, target_ip])
            .set(mbps);
    }

    pub fn set_traceroute(&self, source_location: &str, target_location: &str, hops: u32, max_latency_ms: f64) {
        self.traceroute_hops_total
            .with_label_values(&[source_location, target_location])
            .set(i64::from(hops));
        self.traceroute_max_hop_latency_ms
            .with_label_values(&[source_location, target_location])
            .set(max_latency_ms);
    }

    /// Drop the gauge series recorded for an evicted peer. Histogram series
    /// are keyed by location, which may still be served by other peers, so
    /// they are left alone.
    pub fn remove_tcp(&self, labels: &[&str; 5]) {
        if let Err(err) = self.connectivity_tcp.remove_label_values(labels) {
            warn!(error = %err, "failed to remove tcp gauge series");
        }
    }

    pub fn remove_http(&self, labels: &[&str; 6]) {
        if let Err(err) = self.connectivity_http.remove_label_values(labels) {
            warn!(error = %err, "failed to remove http gauge series");
        }
    }

    pub fn remove_bandwidth(&self, source_location: &str, target_location: &str, target_ip: &str) {
        let _ = self
            .bandwidth_mbps
            .remove_label_values(&[source_location, target_location, target_ip]);
    }

    pub fn remove_traceroute(&self, source_location: &str, target_location: &str) {
        let _ = self
            .traceroute_hops_total
            .remove_label_values(&[source_location, target_location]);
        let _ = self
            .traceroute_max_hop_latency_ms
            .remove_label_values(&[source_location, target_location]);
    }
}

/// Registry-side membership gauges, refreshed by the cleanup sweep.
#[derive(Clone)]
pub struct RegistryMetrics {
    registry: SharedRegistry,
    members_total: IntGauge,
    member_last_seen: GaugeVec,
}

impl RegistryMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let members_total = IntGauge::with_opts(Opts::new(
            "netring_members_total",
            "Number of active members known to the registry",
        ))?;
        registry.register(Box::new(members_total.clone()))?;

        let member_last_seen = GaugeVec::new(
            Opts::new(
                "netring_member_last_seen_timestamp",
                "Unix timestamp of each member's most recent heartbeat",
            ),
            &["location", "instance_id"],
        )?;
        registry.register(Box::new(member_last_seen.clone()))?;

        Ok(Self {
            registry,
            members_total,
            member_last_seen,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn set_members_total(&self, count: usize) {
        self.members_total.set(count as i64);
    }

    pub fn set_member_last_seen(&self, location: &str, instance_id: &str, timestamp: i64) {
        self.member_last_seen
            .with_label_values(&[location, instance_id])
            .set(timestamp as f64);
    }

    pub fn remove_member(&self, location: &str, instance_id: &str) {
        let _ = self
            .member_last_seen
            .remove_label_values(&[location, instance_id]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_metrics_register_and_encode() {
        let registry = new_registry();
        let metrics = ProbeMetrics::new(registry.clone()).unwrap();
        metrics.set_tcp(&["us1", "a", "eu1", "b", "10.0.0.2"], true);
        metrics.set_http(&["us1", "a", "eu1", "b", "10.0.0.2", "/health"], false);
        metrics.observe_duration("tcp", "eu1", 0.03);
        metrics.set_bandwidth("us1", "eu1", "10.0.0.2", 312.5);
        metrics.set_traceroute("us1", "eu1", 7, 42.0);

        let text = encode_text(&registry).unwrap();
        assert!(text.contains("netring_connectivity_tcp"));
        assert!(text.contains("netring_connectivity_http"));
        assert!(text.contains("netring_check_duration_seconds_bucket"));
        assert!(text.contains("netring_bandwidth_mbps"));
        assert!(text.contains("netring_traceroute_hops_total"));
        assert!(text.contains("netring_traceroute_max_hop_latency_ms"));
    }

    #[test]
    fn eviction_removes_gauge_series() {
        let registry = new_registry();
        let metrics = ProbeMetrics::new(registry.clone()).unwrap();
        let labels = ["us1", "a", "eu1", "b", "10.0.0.2"];
        metrics.set_tcp(&labels, true);
        metrics.remove_tcp(&labels);
        let text = encode_text(&registry).unwrap();
        assert!(!text.contains("target_instance=\"b\""));
    }

    #[test]
    fn registry_metrics_track_membership() {
        let registry = new_registry();
        let metrics = RegistryMetrics::new(registry.clone()).unwrap();
        metrics.set_members_total(3);
        metrics.set_member_last_seen("us1", "abc", 1_700_000_000);
        let text = encode_text(&registry).unwrap();
        assert!(text.contains("netring_members_total 3"));
        assert!(text.contains("netring_member_last_seen_timestamp"));
        metrics.remove_member("us1", "abc");
    }
}
