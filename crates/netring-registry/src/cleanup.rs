//! ---
//! ring_section: "06-registry-service"
//! ring_subsection: "module"
//! ring_type: "source"
//! ring_scope: "code"
//! ring_description: "Registry service: directory, aggregation, analysis."
//! ring_version: "v0.1.0-alpha"
//! ring_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use netring_common::time::unix_now;
use netring_msg::MemberStatus;
use netring_supervisor::Supervisor;
use tracing::info;

use crate::service::RegistryService;

/// Register the registry's background work with the supervisor.
pub fn spawn_tasks(service: Arc<RegistryService>, supervisor: &Supervisor) {
    let interval = service.config().cleanup_interval;
    if service.analyzer_enabled() {
        let check_interval = service.config().expected_members.missing_check_interval;
        let service = service.clone();
        supervisor.spawn("missing_members_check", check_interval, move || {
            let service = service.clone();
            Box::pin(async move { Ok(service.missing_members_check().await?) })
        });
    }
    supervisor.spawn("cleanup_sweep", interval, move || {
        let service = service.clone();
        Box::pin(async move { sweep(&service).await })
    });
    supervisor.start_monitor();
}

/// One pass of the TTL sweep.
///
/// Lost members transition to `deregistered` rather than being deleted so
/// the audit trail survives until the grace window closes. The sweep also
/// refreshes the registry-level Prometheus gauges.
pub async fn sweep(service: &RegistryService) -> Result<()> {
    let now = unix_now();
    let member_ttl = service.config().member_ttl.as_secs() as i64;
    let grace = service.config().deregistered_grace.as_secs() as i64;

    let records = service.scan_members().await?;
    let mut active = 0usize;
    let mut expired = 0usize;
    let mut purged = 0usize;

    for mut record in records {
        if record.ttl_expired(now, member_ttl) {
            record.status = MemberStatus::Deregistered;
            record.deregistered_at = Some(now);
            service
                .write_member(&record, service.deregistered_record_ttl())
                .await?;
            service
                .metrics()
                .remove_member(&record.location, &record.instance_id);
            info!(
                instance_id = %record.instance_id,
                location = %record.location,
                last_seen = record.last_seen,
                "member lost; marked deregistered"
            );
            expired += 1;
            continue;
        }
        if record.purgeable(now, grace) {
            service.delete_member(&record.instance_id).await?;
            service
                .metrics()
                .remove_member(&record.location, &record.instance_id);
            purged += 1;
            continue;
        }
        if record.is_active() {
            active += 1;
            service.metrics().set_member_last_seen(
                &record.location,
                &record.instance_id,
                record.last_seen,
            );
        }
    }

    service.metrics().set_members_total(active);
    if expired > 0 || purged > 0 {
        info!(active, expired, purged, "cleanup sweep finished");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use netring_common::RegistryConfig;
    use netring_metrics::{new_registry, RegistryMetrics};
    use netring_msg::RegisterRequest;
    use netring_store::MemoryStore;

    fn short_ttl_service() -> RegistryService {
        let mut config = RegistryConfig::default();
        config.member_ttl = Duration::from_secs(1);
        config.cleanup_interval = Duration::from_secs(1);
        config.deregistered_grace = Duration::from_secs(2);
        RegistryService::new(
            Arc::new(MemoryStore::new()),
            config,
            RegistryMetrics::new(new_registry()).unwrap(),
            None,
        )
    }

    #[tokio::test]
    async fn expired_member_transitions_then_purges() {
        let service = short_ttl_service();
        let id = service
            .register(RegisterRequest {
                instance_id: None,
                location: "us1".into(),
                ip: "10.0.0.1".into(),
                port: 9000,
            })
            .await
            .unwrap()
            .instance_id;

        // fresh record survives a sweep untouched
        sweep(&service).await.unwrap();
        assert!(service.read_member(&id).await.unwrap().unwrap().is_active());

        tokio::time::sleep(Duration::from_millis(2100)).await;
        sweep(&service).await.unwrap();
        let record = service.read_member(&id).await.unwrap().unwrap();
        assert_eq!(record.status, MemberStatus::Deregistered);
        assert!(record.deregistered_at.is_some());

        tokio::time::sleep(Duration::from_millis(3100)).await;
        sweep(&service).await.unwrap();
        assert!(service.read_member(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn heartbeat_keeps_member_active_across_sweeps() {
        let service = short_ttl_service();
        let id = service
            .register(RegisterRequest {
                instance_id: None,
                location: "us1".into(),
                ip: "10.0.0.1".into(),
                port: 9000,
            })
            .await
            .unwrap()
            .instance_id;

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(600)).await;
            service.heartbeat(&id).await.unwrap();
            sweep(&service).await.unwrap();
            assert!(service.read_member(&id).await.unwrap().unwrap().is_active());
        }
    }
}
