//! ---
//! ring_section: "07-member-agent"
//! ring_subsection: "module"
//! ring_type: "source"
//! ring_scope: "code"
//! ring_description: "Member agent runtime and probe pipelines."
//! ring_version: "v0.1.0-alpha"
//! ring_owner: "tbd"
//! ---
//! The four probe pipelines: TCP connect, HTTP liveness, bandwidth transfer,
//! and hop-by-hop traceroute.

pub mod bandwidth;
pub mod http;
pub mod tcp;
pub mod traceroute;
