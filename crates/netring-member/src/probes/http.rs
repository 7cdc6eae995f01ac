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

/// Outcome of probing one endpoint on one peer.
#[derive(Debug, Clone)]
pub struct EndpointOutcome {
    pub endpoint: String,
    pub success: bool,
    pub elapsed: Duration,
}

/// GET one endpoint on the peer's local server. Success iff the response
/// status is in [200, 400).
pub async fn probe_endpoint(
    client: &reqwest::Client,
    ip: IpAddr,
    port: u16,
    endpoint: &str,
    deadline: Duration,
) -> EndpointOutcome {
    let url = format!("http://{ip}:{port}{endpoint}");
    let started = Instant::now();
    let success = match client.get(&url).timeout(deadline).send().await {
        Ok(response) => {
            let code = response.status().as_u16();
            (200..400).contains(&code)
        }
        Err(_) => false,
    };
    EndpointOutcome {
        endpoint: endpoint.to_owned(),
        success,
        elapsed: started.elapsed(),
    }
}
