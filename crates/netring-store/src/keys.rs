//! ---
//! ring_section: "03-store"
//! ring_subsection: "module"
//! ring_type: "source"
//! ring_scope: "code"
//! ring_description: "Persistence abstractions for the registry."
//! ring_version: "v0.1.0-alpha"
//! ring_owner: "tbd"
//! ---
//! Key layout shared by every store-backed registry feature.

/// Prefix of all keys written by netring.
pub const ROOT_PREFIX: &str = "netring:";

/// Prefix of member records.
pub const MEMBER_PREFIX: &str = "netring:member:";

/// Prefix of pushed metric snapshots.
pub const METRICS_PREFIX: &str = "netring:metrics:";

/// Prefix of expected-location grace timestamps.
pub const FIRST_BELOW_PREFIX: &str = "netring:location_first_below:";

pub fn member_key(instance_id: &str) -> String {
    format!("{MEMBER_PREFIX}{instance_id}")
}

pub fn metrics_key(instance_id: &str) -> String {
    format!("{METRICS_PREFIX}{instance_id}")
}

pub fn first_below_key(location: &str) -> String {
    format!("{FIRST_BELOW_PREFIX}{location}")
}

/// Inverse of the key constructors: the id or location suffix.
pub fn strip_prefix<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    key.strip_prefix(prefix).filter(|rest| !rest.is_empty())
}
