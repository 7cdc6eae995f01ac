//! ---
//! ring_section: "02-data-model"
//! ring_subsection: "module"
//! ring_type: "source"
//! ring_scope: "code"
//! ring_description: "Wire schema shared by registry and member."
//! ring_version: "v0.1.0-alpha"
//! ring_owner: "tbd"
//! ---
//! Wire data model for the netring control plane.
//!
//! Everything that crosses a process boundary lives here: member records and
//! their request/response envelopes, the pushed metric snapshots with their
//! composite probe keys, and the expected-location analysis payloads. All
//! timestamps on the wire are integer Unix seconds. Unknown JSON fields are
//! ignored on deserialization.

pub mod analysis;
pub mod member;
pub mod snapshot;

pub use analysis::{
    AlertSeverity, AnalysisAlert, AnalysisSettings, AnalysisSummary, Criticality,
    ExpectedLocationSpec, ExpectedMembersSpec, LocationReport, LocationStatus,
    MembersWithAnalysis, MissingAnalysis,
};
pub use member::{
    AckResponse, BandwidthAck, ClearResponse, DeregisterRequest, DeregisterResponse, ErrorBody,
    HeartbeatRequest, MemberRecord, MemberStatus, MembersResponse, MetricsIndexResponse,
    RegisterRequest, RegisterResponse, ReportMetricsRequest,
};
pub use snapshot::{
    DurationStats, GeneralInfo, MetricsSnapshot, ProbeKey, ProbeKind, ProbeLabels, ProbeSample,
    TracerouteSample, HISTOGRAM_BUCKETS,
};
