//! ---
//! ring_section: "01-core-runtime"
//! ring_subsection: "module"
//! ring_type: "source"
//! ring_scope: "code"
//! ring_description: "Shared primitives and utilities for the netring runtime."
//! ring_version: "v0.1.0-alpha"
//! ring_owner: "tbd"
//! ---
use chrono::Utc;

/// Wall-clock time as integer Unix seconds, the unit used on the wire.
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Wall-clock time in milliseconds for elapsed-time reporting.
pub fn unix_now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Seconds elapsed between two Unix-second timestamps, clamped at zero.
pub fn secs_between(earlier: i64, later: i64) -> u64 {
    later.saturating_sub(earlier).max(0) as u64
}
