//! ---
//! ring_section: "06-registry-service"
//! ring_subsection: "module"
//! ring_type: "source"
//! ring_scope: "code"
//! ring_description: "Registry service: directory, aggregation, analysis."
//! ring_version: "v0.1.0-alpha"
//! ring_owner: "tbd"
//! ---
//! The netring registry: authoritative membership directory, collector of
//! pushed metric snapshots, provider of the read APIs, and enforcer of the
//! expected-location policy.

pub mod analysis;
pub mod cleanup;
pub mod http;
pub mod service;

pub use analysis::LocationAnalyzer;
pub use http::{spawn_server, RegistryServer};
pub use service::{RegistryError, RegistryHealth, RegistryService};
