//! ---
//! ring_section: "07-member-agent"
//! ring_subsection: "module"
//! ring_type: "source"
//! ring_scope: "code"
//! ring_description: "Member agent runtime and probe pipelines."
//! ring_version: "v0.1.0-alpha"
//! ring_owner: "tbd"
//! ---
use std::net::IpAddr;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::debug;

/// Parsed result of one traceroute run.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceResult {
    /// Number of hop lines, unreachable hops included.
    pub total_hops: u32,
    /// Slowest responding hop, in milliseconds.
    pub max_hop_latency_ms: f64,
}

/// Abstraction over the traceroute mechanism, so the probe pipeline can run
/// against a fake in tests.
#[async_trait]
pub trait Tracer: Send + Sync {
    /// `Ok(None)` means the trace completed but produced nothing usable
    /// (every hop unreachable).
    async fn trace(&self, target: IpAddr, deadline: Duration) -> Result<Option<TraceResult>>;
}

/// Shells out to the platform `traceroute` utility with one probe per hop.
///
/// A semaphore of one bounds the member to a single traceroute subprocess at
/// a time.
pub struct SystemTracer {
    permit: Semaphore,
}

impl SystemTracer {
    pub fn new() -> Self {
        Self {
            permit: Semaphore::new(1),
        }
    }
}

impl Default for SystemTracer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tracer for SystemTracer {
    async fn trace(&self, target: IpAddr, deadline: Duration) -> Result<Option<TraceResult>> {
        let _permit = self
            .permit
            .acquire()
            .await
            .context("traceroute semaphore closed")?;

        let child = Command::new("traceroute")
            .arg("-n")
            .arg("-q")
            .arg("1")
            .arg("-w")
            .arg("2")
            .arg(target.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context("failed to spawn traceroute")?;

        // dropping the future on timeout kills the child (kill_on_drop)
        let output = tokio::time::timeout(deadline, child.wait_with_output())
            .await
            .map_err(|_| anyhow::anyhow!("traceroute timed out after {deadline:?}"))?
            .context("traceroute did not produce output")?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed = parse_output(&stdout);
        if parsed.is_none() {
            debug!(target = %target, sample = %stdout.lines().take(3).collect::<Vec<_>>().join(" | "), "traceroute produced no usable hops");
        }
        Ok(parsed)
    }
}

/// Parse traceroute output line by line.
///
/// A hop line starts with the hop number; a responding hop carries an
/// `<rtt> ms` pair, an unreachable one shows `*`. The header line and any
/// unparseable noise are skipped.
pub fn parse_output(raw: &str) -> Option<TraceResult> {
    let mut total_hops = 0u32;
    let mut max_latency: Option<f64> = None;

    for line in raw.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = tokens.first() else {
            continue;
        };
        if first.parse::<u32>().is_err() {
            continue;
        }
        total_hops += 1;
        if let Some(rtt) = first_rtt(&tokens) {
            max_latency = Some(max_latency.map_or(rtt, |current| current.max(rtt)));
        }
    }

    max_latency.map(|max_hop_latency_ms| TraceResult {
        total_hops,
        max_hop_latency_ms,
    })
}

fn first_rtt(tokens: &[&str]) -> Option<f64> {
    tokens.windows(2).find_map(|pair| {
        if pair[1] == "ms" {
            pair[0].parse::<f64>().ok()
        } else {
            None
        }
    })
}
