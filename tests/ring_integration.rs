//! ---
//! ring_section: "09-testing"
//! ring_subsection: "integration-tests"
//! ring_type: "source"
//! ring_scope: "code"
//! ring_description: "End-to-end ring scenarios over loopback."
//! ring_version: "v0.1.0-alpha"
//! ring_owner: "tbd"
//! ---
//! Whole-ring scenarios: a real registry and real member agents talking over
//! loopback sockets, with shortened intervals.

use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use netring_common::{MemberConfig, RegistryConfig};
use netring_member::{MemberAgent, TraceResult, Tracer};
use netring_metrics::{new_registry, RegistryMetrics};
use netring_msg::{MemberStatus, MembersResponse, MetricsIndexResponse, ProbeKey, ProbeKind};
use netring_registry::{cleanup, spawn_server, RegistryServer, RegistryService};
use netring_store::MemoryStore;
use netring_supervisor::{Supervisor, SupervisorOptions};
use serde_json::json;

struct FakeTracer;

#[async_trait]
impl Tracer for FakeTracer {
    async fn trace(
        &self,
        _target: IpAddr,
        _deadline: Duration,
    ) -> anyhow::Result<Option<TraceResult>> {
        Ok(Some(TraceResult {
            total_hops: 2,
            max_hop_latency_ms: 0.8,
        }))
    }
}

async fn start_registry(
    config: RegistryConfig,
) -> (RegistryServer, Arc<RegistryService>, Supervisor, String) {
    let service = Arc::new(RegistryService::new(
        Arc::new(MemoryStore::new()),
        config,
        RegistryMetrics::new(new_registry()).unwrap(),
        None,
    ));
    let supervisor = Supervisor::new(SupervisorOptions::default());
    cleanup::spawn_tasks(service.clone(), &supervisor);
    let server = spawn_server(
        service.clone(),
        supervisor.clone(),
        "127.0.0.1:0".parse().unwrap(),
    )
    .await
    .unwrap();
    let url = format!("http://{}", server.local_addr());
    (server, service, supervisor, url)
}

fn member_config(registry_url: &str, location: &str, dir: &Path) -> MemberConfig {
    let raw = format!(
        r#"
location = "{location}"
host_ip = "127.0.0.1"

[registry]
url = "{registry_url}"

[server]
host = "127.0.0.1"
port = 0

[intervals]
poll = 1
check = 1
heartbeat = 1
bandwidth_test = 2
traceroute = 1
metrics_push = 1
"#
    );
    let mut config: MemberConfig = toml::from_str(&raw).expect("member config");
    config.instance_id_file = dir.join(format!(".netring_instance_id_{location}"));
    config.validate().expect("valid config");
    config
}

async fn wait_for<F, Fut>(deadline: Duration, what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let started = Instant::now();
    loop {
        if condition().await {
            return;
        }
        if started.elapsed() > deadline {
            panic!("{what} not observed within {deadline:?}");
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// Two members discover each other and probe mutually: TCP and both HTTP
/// endpoints go green, bandwidth lands in a plausible loopback range, and
/// both snapshots reach the registry aggregate.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mutual_probes_and_aggregation() {
    let (server, _service, registry_supervisor, url) =
        start_registry(RegistryConfig::default()).await;
    let dir = tempfile::tempdir().unwrap();

    let us1 = MemberAgent::start(member_config(&url, "us1", dir.path()), Arc::new(FakeTracer))
        .await
        .unwrap();
    let eu1 = MemberAgent::start(member_config(&url, "eu1", dir.path()), Arc::new(FakeTracer))
        .await
        .unwrap();

    let us1_sees_eu1 = ProbeKey::new(ProbeKind::Tcp, eu1.instance_id()).wire();
    let eu1_sees_us1 = ProbeKey::new(ProbeKind::Tcp, us1.instance_id()).wire();

    wait_for(Duration::from_secs(20), "mutual tcp success", || {
        let a = us1.metrics().snapshot();
        let b = eu1.metrics().snapshot();
        let a_key = us1_sees_eu1.clone();
        let b_key = eu1_sees_us1.clone();
        async move {
            a.connectivity_tcp.get(&a_key).map(|s| s.value) == Some(1.0)
                && b.connectivity_tcp.get(&b_key).map(|s| s.value) == Some(1.0)
        }
    })
    .await;

    wait_for(Duration::from_secs(20), "http endpoints green", || {
        let snapshot = us1.metrics().snapshot();
        let health = ProbeKey::with_endpoint(ProbeKind::Http, eu1.instance_id(), "/health").wire();
        let metrics =
            ProbeKey::with_endpoint(ProbeKind::Http, eu1.instance_id(), "/metrics").wire();
        async move {
            snapshot.connectivity_http.get(&health).map(|s| s.value) == Some(1.0)
                && snapshot.connectivity_http.get(&metrics).map(|s| s.value) == Some(1.0)
        }
    })
    .await;

    let bandwidth_key = ProbeKey::new(ProbeKind::Bandwidth, eu1.instance_id()).wire();
    wait_for(Duration::from_secs(20), "bandwidth sample", || {
        let snapshot = us1.metrics().snapshot();
        let key = bandwidth_key.clone();
        async move {
            snapshot
                .bandwidth_tests
                .get(&key)
                .map(|s| s.value > 10.0 && s.value < 100_000.0)
                .unwrap_or(false)
        }
    })
    .await;

    // traceroute results flow through the fake tracer
    let trace_key = ProbeKey::new(ProbeKind::Traceroute, eu1.instance_id()).wire();
    wait_for(Duration::from_secs(20), "traceroute sample", || {
        let snapshot = us1.metrics().snapshot();
        let key = trace_key.clone();
        async move {
            snapshot
                .traceroute_tests
                .get(&key)
                .map(|s| s.total_hops >= 1)
                .unwrap_or(false)
        }
    })
    .await;

    // both snapshots arrive at the registry aggregate
    let client = reqwest::Client::new();
    let us1_id = us1.instance_id().to_owned();
    let eu1_id = eu1.instance_id().to_owned();
    wait_for(Duration::from_secs(20), "registry aggregate", || {
        let client = client.clone();
        let url = url.clone();
        let us1_id = us1_id.clone();
        let eu1_id = eu1_id.clone();
        async move {
            let Ok(response) = client.get(format!("{url}/metrics")).send().await else {
                return false;
            };
            let Ok(index) = response.json::<MetricsIndexResponse>().await else {
                return false;
            };
            index.metrics.contains_key(&us1_id) && index.metrics.contains_key(&eu1_id)
        }
    })
    .await;

    // member health reports healthy with one known peer
    let health: serde_json::Value = client
        .get(format!("http://{}/health", us1.local_addr()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], json!("healthy"));
    assert_eq!(health["members_count"], json!(1));

    us1.shutdown().await.unwrap();
    eu1.shutdown().await.unwrap();
    registry_supervisor.shutdown().await;
    server.shutdown().await.unwrap();
}

/// A member that dies without deregistering is swept into `deregistered`
/// after its TTL and purged after the grace window.
#[tokio::test]
async fn ttl_expiry_sweeps_lost_members() {
    let raw = r#"
member_ttl = 2
cleanup_interval = 1
deregistered_grace = 2
"#;
    let config: RegistryConfig = toml::from_str(raw).unwrap();
    let (server, _service, supervisor, url) = start_registry(config).await;
    let client = reqwest::Client::new();

    // register once, then never heartbeat (a hard-killed member)
    let registered: serde_json::Value = client
        .post(format!("{url}/register"))
        .json(&json!({"location": "us1", "ip": "10.0.0.9", "port": 9100}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let instance_id = registered["instance_id"].as_str().unwrap().to_owned();

    let lookup = instance_id.clone();
    wait_for(Duration::from_secs(10), "ttl transition", || {
        let client = client.clone();
        let url = url.clone();
        let id = lookup.clone();
        async move {
            let Ok(response) = client.get(format!("{url}/members")).send().await else {
                return false;
            };
            let Ok(body) = response.json::<MembersResponse>().await else {
                return false;
            };
            body.members
                .iter()
                .any(|m| m.instance_id == id && m.status == MemberStatus::Deregistered)
        }
    })
    .await;

    wait_for(Duration::from_secs(10), "record purge", || {
        let client = client.clone();
        let url = url.clone();
        let id = instance_id.clone();
        async move {
            let Ok(response) = client.get(format!("{url}/members")).send().await else {
                return false;
            };
            let Ok(body) = response.json::<MembersResponse>().await else {
                return false;
            };
            body.members.iter().all(|m| m.instance_id != id)
        }
    })
    .await;

    supervisor.shutdown().await;
    server.shutdown().await.unwrap();
}

/// A departed peer's probe results vanish from the survivor's snapshot after
/// the cache has refreshed without it twice.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn departed_peer_results_are_evicted() {
    let raw = r#"
member_ttl = 300
cleanup_interval = 60
deregistered_grace = 1
"#;
    let config: RegistryConfig = toml::from_str(raw).unwrap();
    let (server, _service, registry_supervisor, url) = start_registry(config).await;
    let dir = tempfile::tempdir().unwrap();

    let survivor = MemberAgent::start(member_config(&url, "us1", dir.path()), Arc::new(FakeTracer))
        .await
        .unwrap();
    let departing =
        MemberAgent::start(member_config(&url, "eu1", dir.path()), Arc::new(FakeTracer))
            .await
            .unwrap();
    let departing_id = departing.instance_id().to_owned();

    let tcp_key = ProbeKey::new(ProbeKind::Tcp, &departing_id).wire();
    wait_for(Duration::from_secs(20), "initial probe result", || {
        let snapshot = survivor.metrics().snapshot();
        let key = tcp_key.clone();
        async move { snapshot.connectivity_tcp.contains_key(&key) }
    })
    .await;

    // clean exit deregisters; the short grace then drops the record from
    // the peer list entirely
    departing.shutdown().await.unwrap();

    wait_for(Duration::from_secs(20), "probe result eviction", || {
        let snapshot = survivor.metrics().snapshot();
        let key = tcp_key.clone();
        async move { !snapshot.connectivity_tcp.contains_key(&key) }
    })
    .await;
    assert!(survivor.peers().is_empty());

    survivor.shutdown().await.unwrap();
    registry_supervisor.shutdown().await;
    server.shutdown().await.unwrap();
}
