//! ---
//! ring_section: "07-member-agent"
//! ring_subsection: "module"
//! ring_type: "source"
//! ring_scope: "code"
//! ring_description: "Member agent runtime and probe pipelines."
//! ring_version: "v0.1.0-alpha"
//! ring_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use anyhow::Result;
use netring_common::time::unix_now;
use netring_metrics::{ProbeMetrics, SharedRegistry};
use netring_msg::{
    DurationStats, GeneralInfo, MemberRecord, MetricsSnapshot, ProbeKey, ProbeKind, ProbeLabels,
    ProbeSample, TracerouteSample, HISTOGRAM_BUCKETS,
};
use parking_lot::Mutex;

#[derive(Debug, Clone, Default)]
struct DurationAccum {
    count: u64,
    sum_ms: f64,
    buckets: [u64; HISTOGRAM_BUCKETS.len()],
}

impl DurationAccum {
    fn observe(&mut self, elapsed: Duration) {
        let seconds = elapsed.as_secs_f64();
        self.count += 1;
        self.sum_ms += seconds * 1_000.0;
        for (index, bound) in HISTOGRAM_BUCKETS.iter().enumerate() {
            if seconds <= *bound {
                self.buckets[index] += 1;
            }
        }
    }

    fn stats(&self) -> DurationStats {
        let mut buckets = BTreeMap::new();
        for (index, bound) in HISTOGRAM_BUCKETS.iter().enumerate() {
            buckets.insert(format!("{bound}"), self.buckets[index]);
        }
        DurationStats {
            count: self.count,
            sum_ms: self.sum_ms,
            avg_ms: if self.count > 0 {
                self.sum_ms / self.count as f64
            } else {
                0.0
            },
            buckets,
        }
    }
}

#[derive(Default)]
struct ProbeState {
    tcp: BTreeMap<String, ProbeSample>,
    http: BTreeMap<String, ProbeSample>,
    bandwidth: BTreeMap<String, ProbeSample>,
    traceroute: BTreeMap<String, TracerouteSample>,
    durations: BTreeMap<String, DurationAccum>,
}

/// The member's single owned probe-result state.
///
/// Every read and write goes through this instance; snapshot construction
/// and metric updates serialize on one mutex, and the Prometheus registry is
/// updated alongside the typed maps. There is no module-level mutable state.
pub struct MetricsStore {
    state: Mutex<ProbeState>,
    prom: ProbeMetrics,
    started: Instant,
    version: String,
    source_location: String,
    source_instance: String,
}

impl MetricsStore {
    pub fn new(
        prom: ProbeMetrics,
        source_location: impl Into<String>,
        source_instance: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            state: Mutex::new(ProbeState::default()),
            prom,
            started: Instant::now(),
            version: version.into(),
            source_location: source_location.into(),
            source_instance: source_instance.into(),
        }
    }

    pub fn registry(&self) -> SharedRegistry {
        self.prom.registry()
    }

    fn labels(&self, peer: &MemberRecord, endpoint: Option<&str>) -> ProbeLabels {
        ProbeLabels {
            source_location: self.source_location.clone(),
            source_instance: self.source_instance.clone(),
            target_location: peer.location.clone(),
            target_instance: peer.instance_id.clone(),
            target_ip: peer.ip.to_string(),
            endpoint: endpoint.map(str::to_owned),
        }
    }

    pub fn record_tcp(&self, peer: &MemberRecord, success: bool, elapsed: Duration) {
        let labels = self.labels(peer, None);
        let key = ProbeKey::new(ProbeKind::Tcp, &peer.instance_id).wire();
        let sample = ProbeSample {
            labels: labels.clone(),
            value: f64::from(u8::from(success)),
            duration_ms: Some(elapsed.as_secs_f64() * 1_000.0),
            timestamp: unix_now(),
        };
        {
            let mut state = self.state.lock();
            state.tcp.insert(key, sample);
            state
                .durations
                .entry(format!("tcp:{}", peer.location))
                .or_default()
                .observe(elapsed);
        }
        self.prom.set_tcp(
            &[
                &labels.source_location,
                &labels.source_instance,
                &labels.target_location,
                &labels.target_instance,
                &labels.target_ip,
            ],
            success,
        );
        self.prom
            .observe_duration("tcp", &peer.location, elapsed.as_secs_f64());
    }

    pub fn record_http(
        &self,
        peer: &MemberRecord,
        endpoint: &str,
        success: bool,
        elapsed: Duration,
    ) {
        let labels = self.labels(peer, Some(endpoint));
        let key = ProbeKey::with_endpoint(ProbeKind::Http, &peer.instance_id, endpoint).wire();
        let sample = ProbeSample {
            labels: labels.clone(),
            value: f64::from(u8::from(success)),
            duration_ms: Some(elapsed.as_secs_f64() * 1_000.0),
            timestamp: unix_now(),
        };
        {
            let mut state = self.state.lock();
            state.http.insert(key, sample);
            state
                .durations
                .entry(format!("http:{}", peer.location))
                .or_default()
                .observe(elapsed);
        }
        self.prom.set_http(
            &[
                &labels.source_location,
                &labels.source_instance,
                &labels.target_location,
                &labels.target_instance,
                &labels.target_ip,
                endpoint,
            ],
            success,
        );
        self.prom
            .observe_duration("http", &peer.location, elapsed.as_secs_f64());
    }

    pub fn record_bandwidth(&self, peer: &MemberRecord, mbps: f64) {
        let labels = self.labels(peer, None);
        let key = ProbeKey::new(ProbeKind::Bandwidth, &peer.instance_id).wire();
        let sample = ProbeSample {
            labels: labels.clone(),
            value: mbps,
            duration_ms: None,
            timestamp: unix_now(),
        };
        self.state.lock().bandwidth.insert(key, sample);
        self.prom
            .set_bandwidth(&labels.source_location, &labels.target_location, &labels.target_ip, mbps);
    }

    pub fn record_traceroute(&self, peer: &MemberRecord, total_hops: u32, max_hop_latency_ms: f64) {
        let labels = self.labels(peer, None);
        let key = ProbeKey::new(ProbeKind::Traceroute, &peer.instance_id).wire();
        let sample = TracerouteSample {
            labels: labels.clone(),
            total_hops,
            max_hop_latency_ms,
            timestamp: unix_now(),
        };
        self.state.lock().traceroute.insert(key, sample);
        self.prom.set_traceroute(
            &labels.source_location,
            &labels.target_location,
            total_hops,
            max_hop_latency_ms,
        );
    }

    /// Drop every probe result keyed by the given departed peers, including
    /// their Prometheus series.
    pub fn evict_targets(&self, instance_ids: &[String]) {
        if instance_ids.is_empty() {
            return;
        }
        let mut removed_tcp = Vec::new();
        let mut removed_http = Vec::new();
        let mut removed_bandwidth = Vec::new();
        let mut removed_traceroute = Vec::new();
        {
            let mut state = self.state.lock();
            for id in instance_ids {
                let matches = |labels: &ProbeLabels| labels.target_instance == *id;
                state.tcp.retain(|_, sample| {
                    if matches(&sample.labels) {
                        removed_tcp.push(sample.labels.clone());
                        false
                    } else {
                        true
                    }
                });
                state.http.retain(|_, sample| {
                    if matches(&sample.labels) {
                        removed_http.push(sample.labels.clone());
                        false
                    } else {
                        true
                    }
                });
                state.bandwidth.retain(|_, sample| {
                    if matches(&sample.labels) {
                        removed_bandwidth.push(sample.labels.clone());
                        false
                    } else {
                        true
                    }
                });
                state.traceroute.retain(|_, sample| {
                    if matches(&sample.labels) {
                        removed_traceroute.push(sample.labels.clone());
                        false
                    } else {
                        true
                    }
                });
            }
        }
        for labels in removed_tcp {
            self.prom.remove_tcp(&[
                &labels.source_location,
                &labels.source_instance,
                &labels.target_location,
                &labels.target_instance,
                &labels.target_ip,
            ]);
        }
        for labels in removed_http {
            let endpoint = labels.endpoint.as_deref().unwrap_or_default();
            self.prom.remove_http(&[
                &labels.source_location,
                &labels.source_instance,
                &labels.target_location,
                &labels.target_instance,
                &labels.target_ip,
                endpoint,
            ]);
        }
        for labels in removed_bandwidth {
            self.prom.remove_bandwidth(
                &labels.source_location,
                &labels.target_location,
                &labels.target_ip,
            );
        }
        for labels in removed_traceroute {
            self.prom
                .remove_traceroute(&labels.source_location, &labels.target_location);
        }
    }

    /// Build a fresh snapshot for pushing or the local read endpoint.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.lock();
        MetricsSnapshot {
            connectivity_tcp: state.tcp.clone(),
            connectivity_http: state.http.clone(),
            bandwidth_tests: state.bandwidth.clone(),
            traceroute_tests: state.traceroute.clone(),
            check_durations: state
                .durations
                .iter()
                .map(|(key, accum)| (key.clone(), accum.stats()))
                .collect(),
            general: GeneralInfo {
                uptime_s: self.started.elapsed().as_secs(),
                version: self.version.clone(),
            },
        }
    }

    /// Prometheus text exposition of the local registry.
    pub fn render_prometheus(&self) -> Result<String> {
        netring_metrics::encode_text(&self.prom.registry())
    }
}
