//! ---
//! ring_section: "01-core-runtime"
//! ring_subsection: "module"
//! ring_type: "source"
//! ring_scope: "code"
//! ring_description: "Shared primitives and utilities for the netring runtime."
//! ring_version: "v0.1.0-alpha"
//! ring_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Gate limiting repeated log lines to one per period per failure kind.
///
/// Failure kinds are arbitrary caller-chosen labels ("heartbeat", "poll",
/// "push"). The gate only answers whether the caller may log now; the caller
/// still decides the level and message.
#[derive(Debug)]
pub struct LogGate {
    period: Duration,
    last: Mutex<HashMap<String, Instant>>,
}

impl LogGate {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last: Mutex::new(HashMap::new()),
        }
    }

    /// One warn per 60 s per kind, the control-plane default.
    pub fn per_minute() -> Self {
        Self::new(Duration::from_secs(60))
    }

    /// Returns true when the caller should emit the log line for `kind`.
    pub fn allow(&self, kind: &str) -> bool {
        let now = Instant::now();
        let mut last = self.last.lock();
        match last.get(kind) {
            Some(previous) if now.duration_since(*previous) < self.period => false,
            _ => {
                last.insert(kind.to_owned(), now);
                true
            }
        }
    }

    /// Forget a kind, so the next failure logs immediately (used after a
    /// success to make the next outage visible right away).
    pub fn reset(&self, kind: &str) {
        self.last.lock().remove(kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_log_allowed_then_suppressed() {
        let gate = LogGate::new(Duration::from_secs(60));
        assert!(gate.allow("heartbeat"));
        assert!(!gate.allow("heartbeat"));
        // independent kinds do not interfere
        assert!(gate.allow("poll"));
    }

    #[test]
    fn reset_reopens_the_gate() {
        let gate = LogGate::new(Duration::from_secs(60));
        assert!(gate.allow("push"));
        gate.reset("push");
        assert!(gate.allow("push"));
    }

    #[test]
    fn elapsed_period_reopens_the_gate() {
        let gate = LogGate::new(Duration::from_millis(10));
        assert!(gate.allow("poll"));
        std::thread::sleep(Duration::from_millis(15));
        assert!(gate.allow("poll"));
    }
}
