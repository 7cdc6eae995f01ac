//! ---
//! ring_section: "06-registry-service"
//! ring_subsection: "module"
//! ring_type: "source"
//! ring_scope: "code"
//! ring_description: "Registry service: directory, aggregation, analysis."
//! ring_version: "v0.1.0-alpha"
//! ring_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use netring_common::time::unix_now;
use netring_common::RegistryConfig;
use netring_metrics::RegistryMetrics;
use netring_msg::{
    AckResponse, AlertSeverity, ClearResponse, DeregisterResponse, MemberRecord, MemberStatus,
    MembersWithAnalysis, MetricsIndexResponse, MetricsSnapshot, MissingAnalysis, RegisterRequest,
    RegisterResponse,
};
use netring_store::{keys, Store, StoreError};
use netring_supervisor::TaskHealth;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::LocationAnalyzer;

/// Snapshots pushed every 30 s by default; entries vanish after two missed
/// pushes.
const METRICS_TTL: Duration = Duration::from_secs(60);

/// Window within which a failed store read marks the registry degraded.
const READ_FAILURE_WINDOW: Duration = Duration::from_secs(60);

/// Error type for registry operations, mapped onto HTTP statuses at the edge.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unknown member: {0}")]
    NotFound(String),
    #[error("member deregistered: {0}")]
    Gone(String),
    #[error("snapshot too large: {size} bytes (limit {limit})")]
    SnapshotTooLarge { size: usize, limit: usize },
    #[error("store read failed: {0}")]
    StoreRead(#[source] StoreError),
    #[error("store write failed: {0}")]
    StoreWrite(#[source] StoreError),
    #[error("stored value corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Body of the registry `/health` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryHealth {
    pub status: String,
    pub tasks: BTreeMap<String, TaskHealth>,
    pub uptime_s: u64,
}

/// Authoritative membership directory backed by the store.
///
/// Every operation is a single store transaction; there is no cross-request
/// ordering guarantee beyond what the store provides.
pub struct RegistryService {
    store: Arc<dyn Store>,
    config: RegistryConfig,
    metrics: RegistryMetrics,
    analyzer: Option<LocationAnalyzer>,
    started: Instant,
    last_read_failure: Mutex<Option<Instant>>,
}

impl RegistryService {
    pub fn new(
        store: Arc<dyn Store>,
        config: RegistryConfig,
        metrics: RegistryMetrics,
        analyzer: Option<LocationAnalyzer>,
    ) -> Self {
        Self {
            store,
            config,
            metrics,
            analyzer,
            started: Instant::now(),
            last_read_failure: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn metrics(&self) -> &RegistryMetrics {
        &self.metrics
    }

    /// Create or refresh a member record. Re-registration of a known id
    /// preserves `registered_at`, clears `deregistered_at`, and updates the
    /// mutable fields.
    pub async fn register(&self, request: RegisterRequest) -> Result<RegisterResponse, RegistryError> {
        if request.location.trim().is_empty() {
            return Err(RegistryError::InvalidInput("location must not be empty".into()));
        }
        if request.port == 0 {
            return Err(RegistryError::InvalidInput("port must be in [1, 65535]".into()));
        }
        let ip: IpAddr = request
            .ip
            .parse()
            .map_err(|_| RegistryError::InvalidInput(format!("ip not parseable: {}", request.ip)))?;

        let instance_id = request
            .instance_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let now = unix_now();
        let record = match self.read_member(&instance_id).await? {
            Some(mut existing) => {
                existing.location = request.location;
                existing.ip = ip;
                existing.port = request.port;
                existing.last_seen = now;
                existing.status = MemberStatus::Active;
                existing.deregistered_at = None;
                existing
            }
            None => MemberRecord {
                instance_id: instance_id.clone(),
                location: request.location,
                ip,
                port: request.port,
                registered_at: now,
                last_seen: now,
                status: MemberStatus::Active,
                deregistered_at: None,
            },
        };

        self.write_member(&record, self.active_record_ttl()).await?;
        info!(
            instance_id = %record.instance_id,
            location = %record.location,
            ip = %record.ip,
            port = record.port,
            "member registered"
        );
        Ok(RegisterResponse {
            instance_id,
            status: "registered".to_owned(),
        })
    }

    /// Refresh a member's liveness timestamp.
    pub async fn heartbeat(&self, instance_id: &str) -> Result<AckResponse, RegistryError> {
        let mut record = self
            .read_member(instance_id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(instance_id.to_owned()))?;
        if record.status == MemberStatus::Deregistered {
            return Err(RegistryError::Gone(instance_id.to_owned()));
        }
        record.last_seen = unix_now();
        self.write_member(&record, self.active_record_ttl()).await?;
        Ok(AckResponse::ok())
    }

    /// Mark a member deregistered. Idempotent: repeat calls keep the first
    /// call's timestamp, and unknown ids succeed without effect.
    pub async fn deregister(&self, instance_id: &str) -> Result<DeregisterResponse, RegistryError> {
        if let Some(mut record) = self.read_member(instance_id).await? {
            if record.status == MemberStatus::Active {
                record.status = MemberStatus::Deregistered;
                record.deregistered_at = Some(unix_now());
                self.write_member(&record, self.deregistered_record_ttl())
                    .await?;
                info!(instance_id, "member deregistered");
            }
        }
        Ok(DeregisterResponse {
            status: "deregistered".to_owned(),
        })
    }

    /// Accept a pushed metrics snapshot wholesale (last writer wins).
    pub async fn report_metrics(
        &self,
        instance_id: &str,
        snapshot: MetricsSnapshot,
    ) -> Result<AckResponse, RegistryError> {
        let record = self
            .read_member(instance_id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(instance_id.to_owned()))?;
        if record.status == MemberStatus::Deregistered {
            return Err(RegistryError::Gone(instance_id.to_owned()));
        }

        let encoded = serde_json::to_string(&snapshot)?;
        if encoded.len() > self.config.max_snapshot_bytes {
            return Err(RegistryError::SnapshotTooLarge {
                size: encoded.len(),
                limit: self.config.max_snapshot_bytes,
            });
        }
        self.store
            .set(&keys::metrics_key(instance_id), encoded, Some(METRICS_TTL))
            .await
            .map_err(RegistryError::StoreWrite)?;
        Ok(AckResponse::ok())
    }

    /// All active records plus recently deregistered ones still inside the
    /// grace window.
    pub async fn members(&self) -> Result<Vec<MemberRecord>, RegistryError> {
        let now = unix_now();
        let grace = self.config.deregistered_grace.as_secs() as i64;
        let mut members: Vec<MemberRecord> = self
            .scan_members()
            .await?
            .into_iter()
            .filter(|record| record.is_active() || !record.purgeable(now, grace))
            .collect();
        members.sort_by(|a, b| {
            a.location
                .cmp(&b.location)
                .then_with(|| a.instance_id.cmp(&b.instance_id))
        });
        Ok(members)
    }

    /// The union of all members' pushed snapshots.
    pub async fn metrics_index(&self) -> Result<MetricsIndexResponse, RegistryError> {
        let entries = self
            .store
            .scan(keys::METRICS_PREFIX)
            .await
            .map_err(|err| self.read_failed(err))?;
        let mut metrics = BTreeMap::new();
        for (key, raw) in entries {
            let Some(instance_id) = keys::strip_prefix(&key, keys::METRICS_PREFIX) else {
                continue;
            };
            match serde_json::from_str::<MetricsSnapshot>(&raw) {
                Ok(snapshot) => {
                    metrics.insert(instance_id.to_owned(), snapshot);
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "dropping corrupt metrics snapshot");
                }
            }
        }
        Ok(MetricsIndexResponse { metrics })
    }

    /// `/members` payload augmented with expected-location analysis computed
    /// at request time.
    pub async fn members_with_analysis(&self) -> Result<MembersWithAnalysis, RegistryError> {
        let members = self.members().await?;
        let now = unix_now();
        let missing_analysis = match &self.analyzer {
            Some(analyzer) => analyzer.analyze(&members, now).await,
            None => MissingAnalysis::disabled(now),
        };
        Ok(MembersWithAnalysis {
            members,
            missing_analysis,
        })
    }

    pub fn analyzer_enabled(&self) -> bool {
        self.analyzer.is_some()
    }

    /// Background pass of the expected-location analysis: recompute and log
    /// alerts so operators see missing members without polling the API.
    pub async fn missing_members_check(&self) -> Result<(), RegistryError> {
        let Some(analyzer) = &self.analyzer else {
            return Ok(());
        };
        let members = self.members().await?;
        let analysis = analyzer.analyze(&members, unix_now()).await;
        for alert in &analysis.alerts {
            let location = alert.location.as_deref().unwrap_or("*");
            match alert.severity {
                AlertSeverity::Error => {
                    tracing::error!(location, alert = %alert.message, "expected-members alert")
                }
                AlertSeverity::Warning => {
                    warn!(location, alert = %alert.message, "expected-members alert")
                }
            }
        }
        Ok(())
    }

    /// Admin: drop every netring key from the store.
    pub async fn clear(&self) -> Result<ClearResponse, RegistryError> {
        let entries = self
            .store
            .scan(keys::ROOT_PREFIX)
            .await
            .map_err(|err| self.read_failed(err))?;
        let mut deleted = 0usize;
        for (key, _) in entries {
            self.store
                .delete(&key)
                .await
                .map_err(RegistryError::StoreWrite)?;
            deleted += 1;
        }
        info!(keys_deleted = deleted, "store cleared by admin request");
        Ok(ClearResponse {
            keys_deleted: deleted,
        })
    }

    /// Health summary for the `/health` endpoint. Degraded while a store
    /// read has failed within the last minute.
    pub fn health(&self, tasks: BTreeMap<String, TaskHealth>) -> RegistryHealth {
        let read_failed_recently = self
            .last_read_failure
            .lock()
            .map(|at| at.elapsed() <= READ_FAILURE_WINDOW)
            .unwrap_or(false);
        RegistryHealth {
            status: if read_failed_recently {
                "degraded".to_owned()
            } else {
                "healthy".to_owned()
            },
            tasks,
            uptime_s: self.started.elapsed().as_secs(),
        }
    }

    pub(crate) async fn scan_members(&self) -> Result<Vec<MemberRecord>, RegistryError> {
        let entries = self
            .store
            .scan(keys::MEMBER_PREFIX)
            .await
            .map_err(|err| self.read_failed(err))?;
        let mut members = Vec::with_capacity(entries.len());
        for (key, raw) in entries {
            match serde_json::from_str::<MemberRecord>(&raw) {
                Ok(record) => members.push(record),
                Err(err) => {
                    warn!(key = %key, error = %err, "skipping corrupt member record");
                }
            }
        }
        Ok(members)
    }

    pub(crate) async fn read_member(
        &self,
        instance_id: &str,
    ) -> Result<Option<MemberRecord>, RegistryError> {
        let raw = self
            .store
            .get(&keys::member_key(instance_id))
            .await
            .map_err(|err| self.read_failed(err))?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub(crate) async fn write_member(
        &self,
        record: &MemberRecord,
        ttl: Duration,
    ) -> Result<(), RegistryError> {
        let encoded = serde_json::to_string(record)?;
        self.store
            .set(&keys::member_key(&record.instance_id), encoded, Some(ttl))
            .await
            .map_err(RegistryError::StoreWrite)
    }

    pub(crate) async fn delete_member(&self, instance_id: &str) -> Result<(), RegistryError> {
        self.store
            .delete(&keys::member_key(instance_id))
            .await
            .map_err(RegistryError::StoreWrite)?;
        self.store
            .delete(&keys::metrics_key(instance_id))
            .await
            .map_err(RegistryError::StoreWrite)
    }

    /// Store TTL keeping active records visible past heartbeat loss long
    /// enough for the sweep to mark them deregistered.
    pub(crate) fn active_record_ttl(&self) -> Duration {
        self.config.member_ttl + self.config.cleanup_interval * 2
    }

    pub(crate) fn deregistered_record_ttl(&self) -> Duration {
        self.config.deregistered_grace + self.config.cleanup_interval * 2
    }

    fn read_failed(&self, err: StoreError) -> RegistryError {
        *self.last_read_failure.lock() = Some(Instant::now());
        RegistryError::StoreRead(err)
    }
}
