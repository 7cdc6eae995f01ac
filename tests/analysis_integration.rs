//! ---
//! ring_section: "09-testing"
//! ring_subsection: "integration-tests"
//! ring_type: "source"
//! ring_scope: "code"
//! ring_description: "Expected-location analysis scenarios over HTTP."
//! ring_version: "v0.1.0-alpha"
//! ring_owner: "tbd"
//! ---
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use netring_common::RegistryConfig;
use netring_metrics::{new_registry, RegistryMetrics};
use netring_msg::{AlertSeverity, LocationStatus, MembersWithAnalysis};
use netring_registry::{spawn_server, LocationAnalyzer, RegistryService};
use netring_store::MemoryStore;
use netring_supervisor::{Supervisor, SupervisorOptions};
use serde_json::json;

const EXPECTED_YAML: &str = r#"
settings:
  critical_missing_threshold: 1
  total_missing_threshold: 1
locations:
  us1:
    expected_count: 1
    criticality: high
    grace_period_s: 2
    description: primary cluster
  eu1:
    expected_count: 2
    criticality: medium
    grace_period_s: 2
"#;

/// Expected `us1:1 (high), eu1:2 (medium)`, grace 2 s; only `us1:1, eu1:1`
/// present. eu1 stays healthy through the grace window, then flips to
/// missing with a warning and no critical alert.
#[tokio::test]
async fn grace_window_then_missing_members() {
    let store = Arc::new(MemoryStore::new());
    let mut spec_file = tempfile::NamedTempFile::new().unwrap();
    spec_file.write_all(EXPECTED_YAML.as_bytes()).unwrap();

    let analyzer = LocationAnalyzer::from_file(spec_file.path(), store.clone()).unwrap();
    let service = Arc::new(RegistryService::new(
        store,
        RegistryConfig::default(),
        RegistryMetrics::new(new_registry()).unwrap(),
        Some(analyzer),
    ));
    let supervisor = Supervisor::new(SupervisorOptions::default());
    let server = spawn_server(
        service.clone(),
        supervisor.clone(),
        "127.0.0.1:0".parse().unwrap(),
    )
    .await
    .unwrap();
    let base = format!("http://{}", server.local_addr());
    let client = reqwest::Client::new();

    for (location, ip) in [("us1", "10.0.0.1"), ("eu1", "10.0.0.2")] {
        client
            .post(format!("{base}/register"))
            .json(&json!({"location": location, "ip": ip, "port": 9000}))
            .send()
            .await
            .unwrap()
            .error_for_status()
            .unwrap();
    }

    // inside the grace window eu1 still reads healthy
    let early: MembersWithAnalysis = client
        .get(format!("{base}/members_with_analysis"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(early.missing_analysis.enabled);
    assert_eq!(
        early.missing_analysis.locations["eu1"].status,
        LocationStatus::Healthy
    );
    assert_eq!(
        early.missing_analysis.locations["us1"].status,
        LocationStatus::Healthy
    );
    assert_eq!(early.missing_analysis.summary.total_missing_members, 0);

    tokio::time::sleep(Duration::from_secs(3)).await;

    let late: MembersWithAnalysis = client
        .get(format!("{base}/members_with_analysis"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let analysis = &late.missing_analysis;
    assert_eq!(
        analysis.locations["eu1"].status,
        LocationStatus::MissingMembers
    );
    assert_eq!(analysis.locations["us1"].status, LocationStatus::Healthy);
    assert_eq!(analysis.summary.total_missing_members, 1);
    assert_eq!(analysis.summary.locations_missing, 1);
    // eu1 is medium criticality: warnings only
    assert!(analysis
        .alerts
        .iter()
        .all(|alert| alert.severity != AlertSeverity::Error));
    assert!(analysis
        .alerts
        .iter()
        .any(|alert| alert.severity == AlertSeverity::Warning));

    // a third member restores eu1 without hysteresis
    client
        .post(format!("{base}/register"))
        .json(&json!({"location": "eu1", "ip": "10.0.0.3", "port": 9000}))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap();
    let healed: MembersWithAnalysis = client
        .get(format!("{base}/members_with_analysis"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        healed.missing_analysis.locations["eu1"].status,
        LocationStatus::Healthy
    );
    assert!(healed.missing_analysis.alerts.is_empty());

    supervisor.shutdown().await;
    server.shutdown().await.unwrap();
}
