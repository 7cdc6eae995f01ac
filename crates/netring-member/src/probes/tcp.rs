//! ---
//! ring_section: "07-member-agent"
//! ring_subsection: "module"
//! ring_type: "source"
//! ring_scope: "code"
//! ring_description: "Member agent runtime and probe pipelines."
//! ring_version: "v0.1.0-alpha"
//! ring_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;

/// Outcome of one TCP reachability probe.
#[derive(Debug, Clone, Copy)]
pub struct TcpOutcome {
    pub success: bool,
    pub elapsed: Duration,
}

/// Open a connection to the peer and drop it. Success iff the connect
/// completes within the deadline.
pub async fn probe(addr: SocketAddr, deadline: Duration) -> TcpOutcome {
    let started = Instant::now();
    let success = matches!(
        tokio::time::timeout(deadline, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    );
    TcpOutcome {
        success,
        elapsed: started.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connect_to_listener_succeeds() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let outcome = probe(addr, Duration::from_secs(5)).await;
        assert!(outcome.success);
        assert!(outcome.elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        // bind then drop to obtain a port that refuses connections
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let outcome = probe(addr, Duration::from_secs(1)).await;
        assert!(!outcome.success);
    }
}
