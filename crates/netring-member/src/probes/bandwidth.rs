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
use std::time::{Duration, Instant};

use netring_common::RingError;
use netring_msg::BandwidthAck;
use rand::RngCore;

/// Outcome of one bandwidth transfer.
#[derive(Debug, Clone, Copy)]
pub struct BandwidthOutcome {
    pub mbps: f64,
    pub bytes: usize,
    pub elapsed: Duration,
}

/// `bytes · 8 / (seconds · 10⁶)`, the Mbps figure reported on the wire.
pub fn compute_mbps(bytes: usize, elapsed: Duration) -> f64 {
    let seconds = elapsed.as_secs_f64().max(1e-6);
    (bytes as f64 * 8.0) / (seconds * 1_000_000.0)
}

/// Fresh random payload; generated per test, never cached.
pub fn random_payload(bytes: usize) -> Vec<u8> {
    let mut payload = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut payload);
    payload
}

/// POST a random payload to the peer's `/bandwidth_test` sink and measure
/// wall-clock from first byte sent to response received. Timeouts, non-2xx
/// answers, and byte-count mismatches yield no sample.
pub async fn probe(
    client: &reqwest::Client,
    ip: IpAddr,
    port: u16,
    payload_bytes: usize,
    deadline: Duration,
) -> Result<BandwidthOutcome, RingError> {
    let url = format!("http://{ip}:{port}/bandwidth_test");
    let payload = random_payload(payload_bytes);

    let started = Instant::now();
    let response = client
        .post(&url)
        .timeout(deadline)
        .body(payload)
        .send()
        .await
        .map_err(|err| RingError::Transient(format!("bandwidth transfer: {err}")))?;
    if !response.status().is_success() {
        return Err(RingError::Transient(format!(
            "bandwidth transfer: peer answered {}",
            response.status()
        )));
    }
    let ack: BandwidthAck = response
        .json()
        .await
        .map_err(|err| RingError::Transient(format!("bandwidth ack: {err}")))?;
    let elapsed = started.elapsed();

    if ack.received_bytes != payload_bytes as u64 {
        return Err(RingError::Transient(format!(
            "bandwidth ack reported {} of {} bytes",
            ack.received_bytes, payload_bytes
        )));
    }

    Ok(BandwidthOutcome {
        mbps: compute_mbps(payload_bytes, elapsed),
        bytes: payload_bytes,
        elapsed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mbps_formula_round_trips() {
        // 1 MiB in exactly one second
        let mbps = compute_mbps(1_048_576, Duration::from_secs(1));
        assert!((mbps - 8.388608).abs() < 0.0001);

        // n bytes over t seconds stays within 1% for t >= 0.1 s
        let mbps = compute_mbps(10_000_000, Duration::from_millis(100));
        let expected = 10_000_000.0 * 8.0 / (0.1 * 1_000_000.0);
        assert!((mbps - expected).abs() / expected < 0.01);
    }

    #[test]
    fn zero_elapsed_does_not_divide_by_zero() {
        let mbps = compute_mbps(1_000, Duration::ZERO);
        assert!(mbps.is_finite());
        assert!(mbps >= 0.0);
    }

    #[test]
    fn payload_is_randomised_per_call() {
        let a = random_payload(4_096);
        let b = random_payload(4_096);
        assert_eq!(a.len(), 4_096);
        assert_ne!(a, b);
    }
}
