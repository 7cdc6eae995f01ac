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
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::snapshot::MetricsSnapshot;

/// Lifecycle state of a member record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Active,
    Deregistered,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Active => "active",
            MemberStatus::Deregistered => "deregistered",
        }
    }
}

/// Authoritative membership record owned by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberRecord {
    /// Opaque unique identifier, stable across restarts of the member.
    pub instance_id: String,
    /// Short logical site name. Not unique across members.
    pub location: String,
    /// Address at which the member's local HTTP server is reachable.
    pub ip: IpAddr,
    pub port: u16,
    /// Wall time of the first registration; preserved across re-registrations.
    pub registered_at: i64,
    /// Wall time of the most recent heartbeat or registration.
    pub last_seen: i64,
    pub status: MemberStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deregistered_at: Option<i64>,
}

impl MemberRecord {
    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active
    }

    /// An active record whose heartbeat has lapsed beyond the TTL.
    pub fn ttl_expired(&self, now: i64, member_ttl_secs: i64) -> bool {
        self.is_active() && now - self.last_seen > member_ttl_secs
    }

    /// A deregistered record past the audit grace window.
    pub fn purgeable(&self, now: i64, grace_secs: i64) -> bool {
        match (self.status, self.deregistered_at) {
            (MemberStatus::Deregistered, Some(at)) => now - at > grace_secs,
            _ => false,
        }
    }
}

/// Body of `POST /register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub instance_id: Option<String>,
    pub location: String,
    /// Parsed and validated by the registry; kept as a string on the wire.
    pub ip: String,
    pub port: u16,
}

/// Body of the `/register` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub instance_id: String,
    pub status: String,
}

/// Body of `POST /heartbeat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub instance_id: String,
}

/// Body of `POST /deregister`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeregisterRequest {
    pub instance_id: String,
}

/// Body of the `/deregister` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeregisterResponse {
    pub status: String,
}

/// Generic `{status:"ok"}` acknowledgment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub status: String,
}

impl AckResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_owned(),
        }
    }
}

/// Body of `GET /members`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembersResponse {
    pub members: Vec<MemberRecord>,
}

/// Body of `POST /report_metrics`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetricsRequest {
    pub instance_id: String,
    pub snapshot: MetricsSnapshot,
}

/// Body of `GET /metrics` on the registry: the union of pushed snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsIndexResponse {
    pub metrics: BTreeMap<String, MetricsSnapshot>,
}

/// Body of the admin `/clear` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearResponse {
    pub keys_deleted: usize,
}

/// Error payload attached to non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Acknowledgment returned by a member's `/bandwidth_test` echo sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandwidthAck {
    pub received_bytes: u64,
    pub elapsed_ms: u64,
}
