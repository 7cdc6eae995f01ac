//! ---
//! ring_section: "06-registry-service"
//! ring_subsection: "integration-tests"
//! ring_type: "source"
//! ring_scope: "code"
//! ring_description: "Socket-level tests for the registry HTTP surface."
//! ring_version: "v0.1.0-alpha"
//! ring_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use netring_common::RegistryConfig;
use netring_metrics::{new_registry, RegistryMetrics};
use netring_msg::{
    ClearResponse, MembersResponse, MembersWithAnalysis, MetricsIndexResponse, MetricsSnapshot,
    RegisterResponse,
};
use netring_registry::{cleanup, spawn_server, RegistryServer, RegistryService};
use netring_store::{MemoryStore, Store, StoreError};
use netring_supervisor::{Supervisor, SupervisorOptions};
use reqwest::StatusCode;
use serde_json::json;

struct FailingStore;

#[async_trait::async_trait]
impl Store for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::Unavailable("injected outage".into()))
    }
    async fn set(
        &self,
        _key: &str,
        _value: String,
        _ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("injected outage".into()))
    }
    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("injected outage".into()))
    }
    async fn scan(&self, _prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        Err(StoreError::Unavailable("injected outage".into()))
    }
    async fn set_many(
        &self,
        _entries: Vec<(String, String, Option<Duration>)>,
    ) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("injected outage".into()))
    }
}

async fn start_with(
    store: Arc<dyn Store>,
    config: RegistryConfig,
) -> (RegistryServer, Arc<RegistryService>, String, Supervisor) {
    let metrics = RegistryMetrics::new(new_registry()).expect("metrics");
    let service = Arc::new(RegistryService::new(store, config, metrics, None));
    let supervisor = Supervisor::new(SupervisorOptions::default());
    let server = spawn_server(
        service.clone(),
        supervisor.clone(),
        "127.0.0.1:0".parse().unwrap(),
    )
    .await
    .expect("spawn server");
    let base = format!("http://{}", server.local_addr());
    (server, service, base, supervisor)
}

async fn start(config: RegistryConfig) -> (RegistryServer, Arc<RegistryService>, String, Supervisor) {
    start_with(Arc::new(MemoryStore::new()), config).await
}

#[tokio::test]
async fn registration_lifecycle_over_http() {
    let (server, _service, base, supervisor) = start(RegistryConfig::default()).await;
    let client = reqwest::Client::new();

    // malformed registration is rejected up front
    let bad = client
        .post(format!("{base}/register"))
        .json(&json!({"location": "", "ip": "10.0.0.1", "port": 9000}))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

    let registered: RegisterResponse = client
        .post(format!("{base}/register"))
        .json(&json!({"location": "us1", "ip": "10.0.0.1", "port": 9000}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(registered.status, "registered");

    let members: MembersResponse = client
        .get(format!("{base}/members"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(members.members.len(), 1);
    assert_eq!(members.members[0].instance_id, registered.instance_id);
    assert_eq!(members.members[0].location, "us1");

    let ok = client
        .post(format!("{base}/heartbeat"))
        .json(&json!({"instance_id": registered.instance_id}))
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);

    let unknown = client
        .post(format!("{base}/heartbeat"))
        .json(&json!({"instance_id": "never-seen"}))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    let dereg = client
        .post(format!("{base}/deregister"))
        .json(&json!({"instance_id": registered.instance_id}))
        .send()
        .await
        .unwrap();
    assert_eq!(dereg.status(), StatusCode::OK);

    // still listed within the grace window, now as deregistered
    let members: MembersResponse = client
        .get(format!("{base}/members"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(members.members.len(), 1);
    assert!(!members.members[0].is_active());

    let gone = client
        .post(format!("{base}/heartbeat"))
        .json(&json!({"instance_id": registered.instance_id}))
        .send()
        .await
        .unwrap();
    assert_eq!(gone.status(), StatusCode::GONE);

    supervisor.shutdown().await;
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn metrics_push_and_aggregate_read() {
    let (server, _service, base, supervisor) = start(RegistryConfig::default()).await;
    let client = reqwest::Client::new();

    let registered: RegisterResponse = client
        .post(format!("{base}/register"))
        .json(&json!({"location": "eu1", "ip": "10.0.0.2", "port": 9000}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let snapshot = MetricsSnapshot::default();
    let pushed = client
        .post(format!("{base}/report_metrics"))
        .json(&json!({"instance_id": registered.instance_id, "snapshot": &snapshot}))
        .send()
        .await
        .unwrap();
    assert_eq!(pushed.status(), StatusCode::OK);

    let rejected = client
        .post(format!("{base}/report_metrics"))
        .json(&json!({"instance_id": "never-seen", "snapshot": &snapshot}))
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::NOT_FOUND);

    let index: MetricsIndexResponse = client
        .get(format!("{base}/metrics"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(index.metrics.contains_key(&registered.instance_id));

    supervisor.shutdown().await;
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn analysis_endpoint_reports_disabled_without_config() {
    let (server, _service, base, supervisor) = start(RegistryConfig::default()).await;
    let client = reqwest::Client::new();

    let payload: MembersWithAnalysis = client
        .get(format!("{base}/members_with_analysis"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(!payload.missing_analysis.enabled);
    assert!(payload.missing_analysis.locations.is_empty());

    supervisor.shutdown().await;
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn clear_is_guarded_by_admin_token() {
    let mut config = RegistryConfig::default();
    config.admin_token = Some("sekrit".into());
    let (server, _service, base, supervisor) = start(config).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{base}/register"))
        .json(&json!({"location": "us1", "ip": "10.0.0.1", "port": 9000}))
        .send()
        .await
        .unwrap();

    let forbidden = client.post(format!("{base}/clear")).send().await.unwrap();
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let cleared: ClearResponse = client
        .post(format!("{base}/clear"))
        .header("x-api-key", "sekrit")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(cleared.keys_deleted >= 1);

    let members: MembersResponse = client
        .get(format!("{base}/members"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(members.members.is_empty());

    supervisor.shutdown().await;
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn clear_is_absent_without_admin_token() {
    let (server, _service, base, supervisor) = start(RegistryConfig::default()).await;
    let client = reqwest::Client::new();
    let response = client.post(format!("{base}/clear")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    supervisor.shutdown().await;
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn store_outage_maps_to_503_and_degraded_health() {
    let (server, service, base, supervisor) =
        start_with(Arc::new(FailingStore), RegistryConfig::default()).await;
    let client = reqwest::Client::new();

    let response = client.get(format!("{base}/members")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(response.headers().get("retry-after").is_some());

    let health = service.health(supervisor.health());
    assert_eq!(health.status, "degraded");

    let health_response = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(health_response.status(), StatusCode::OK);

    supervisor.shutdown().await;
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn prometheus_gauges_follow_the_sweep() {
    let (server, service, base, supervisor) = start(RegistryConfig::default()).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{base}/register"))
        .json(&json!({"location": "us1", "ip": "10.0.0.1", "port": 9000}))
        .send()
        .await
        .unwrap();
    cleanup::sweep(&service).await.unwrap();

    let text = client
        .get(format!("{base}/metrics_prom"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(text.contains("netring_members_total 1"));
    assert!(text.contains("netring_member_last_seen_timestamp"));

    supervisor.shutdown().await;
    server.shutdown().await.unwrap();
}
