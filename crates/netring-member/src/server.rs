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
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use netring_common::time::unix_now;
use netring_msg::BandwidthAck;
use netring_supervisor::{Supervisor, TaskHealth};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::client::Reachability;
use crate::metrics_store::MetricsStore;
use crate::peers::PeerCache;

/// Task restarts within this window mark the member degraded.
const RESTART_WINDOW: Duration = Duration::from_secs(3600);

/// Body of the member `/health` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MemberHealth {
    pub status: String,
    pub instance_id: String,
    pub location: String,
    pub members_count: usize,
    pub tasks: std::collections::BTreeMap<String, TaskHealth>,
    pub timestamp: i64,
}

/// Shared state behind the member's local HTTP surface.
pub struct MemberServerState {
    pub instance_id: String,
    pub location: String,
    pub peers: Arc<PeerCache>,
    pub metrics: Arc<MetricsStore>,
    pub supervisor: Supervisor,
    pub reachability: Arc<Reachability>,
    pub heartbeat_interval: Duration,
    pub max_bandwidth_body: usize,
}

impl MemberServerState {
    fn health(&self) -> MemberHealth {
        let registry_silent = self.reachability.silent_for() > self.heartbeat_interval * 2;
        let recently_restarted = self.supervisor.restarted_within(RESTART_WINDOW);
        MemberHealth {
            status: if registry_silent || recently_restarted {
                "degraded".to_owned()
            } else {
                "healthy".to_owned()
            },
            instance_id: self.instance_id.clone(),
            location: self.location.clone(),
            members_count: self.peers.len(),
            tasks: self.supervisor.health(),
            timestamp: unix_now(),
        }
    }
}

/// Build the member router.
pub fn router(state: Arc<MemberServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/bandwidth_test", post(bandwidth_test))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<Arc<MemberServerState>>) -> Json<MemberHealth> {
    Json(state.health())
}

async fn metrics(State(state): State<Arc<MemberServerState>>) -> Response {
    match state.metrics.render_prometheus() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(err) => {
            warn!(error = %err, "failed to encode member metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Echo sink for inbound bandwidth tests: drain the body, report how much
/// arrived and how long the drain took. Bodies beyond the configured bound
/// are rejected with 413.
async fn bandwidth_test(State(state): State<Arc<MemberServerState>>, body: Body) -> Response {
    let started = Instant::now();
    match axum::body::to_bytes(body, state.max_bandwidth_body).await {
        Ok(bytes) => Json(BandwidthAck {
            received_bytes: bytes.len() as u64,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
        .into_response(),
        Err(_) => StatusCode::PAYLOAD_TOO_LARGE.into_response(),
    }
}

/// Handle to the running member server.
pub struct MemberServer {
    address: SocketAddr,
    task: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl MemberServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Whether the serve task has exited (crash or listener failure).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Drain and close outstanding connections, then stop.
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(true);
        if tokio::time::timeout(Duration::from_secs(5), &mut self.task)
            .await
            .is_err()
        {
            warn!("member server did not drain in time; aborting");
            self.task.abort();
        }
        Ok(())
    }
}

/// Bind and spawn the member HTTP server.
pub async fn spawn_member_server(
    state: Arc<MemberServerState>,
    listen: SocketAddr,
) -> anyhow::Result<MemberServer> {
    let listener = TcpListener::bind(listen).await?;
    let local_addr = listener.local_addr()?;
    info!(address = %local_addr, "member api listening");

    let app = router(state);
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = shutdown_rx.changed().await;
    });
    let task = tokio::spawn(async move {
        if let Err(err) = server.await {
            warn!(error = %err, "member server exited with error");
        }
    });

    Ok(MemberServer {
        address: local_addr,
        task,
        shutdown: shutdown_tx,
    })
}
