//! ---
//! ring_section: "07-member-agent"
//! ring_subsection: "module"
//! ring_type: "source"
//! ring_scope: "code"
//! ring_description: "Member agent runtime and probe pipelines."
//! ring_version: "v0.1.0-alpha"
//! ring_owner: "tbd"
//! ---
//! The netring member agent.
//!
//! A member keeps its presence registered with the central registry, polls
//! the peer list, runs the four probe pipelines against every peer, exposes
//! its local `/health` and `/metrics` surface, and pushes metric snapshots
//! upstream. All background work runs under the task supervisor.

pub mod agent;
pub mod client;
pub mod identity;
pub mod metrics_store;
pub mod peers;
pub mod probes;
pub mod server;

pub use agent::MemberAgent;
pub use client::{Reachability, RegistryClient};
pub use metrics_store::MetricsStore;
pub use peers::PeerCache;
pub use probes::traceroute::{SystemTracer, TraceResult, Tracer};
pub use server::{spawn_member_server, MemberServer};
