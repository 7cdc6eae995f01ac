//! ---
//! ring_section: "06-registry-service"
//! ring_subsection: "module"
//! ring_type: "source"
//! ring_scope: "code"
//! ring_description: "Registry service: directory, aggregation, analysis."
//! ring_version: "v0.1.0-alpha"
//! ring_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use netring_msg::{
    AckResponse, ClearResponse, DeregisterRequest, DeregisterResponse, ErrorBody,
    HeartbeatRequest, MembersResponse, MembersWithAnalysis, MetricsIndexResponse,
    RegisterRequest, RegisterResponse, ReportMetricsRequest,
};
use netring_supervisor::Supervisor;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::service::{RegistryError, RegistryHealth, RegistryService};

/// How long in-flight requests may drain during shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

struct AppState {
    service: Arc<RegistryService>,
    supervisor: Supervisor,
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = match &self {
            RegistryError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::Gone(_) => StatusCode::GONE,
            RegistryError::SnapshotTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            RegistryError::StoreRead(_) => StatusCode::SERVICE_UNAVAILABLE,
            RegistryError::StoreWrite(_) | RegistryError::Corrupt(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(ErrorBody {
            error: self.to_string(),
        });
        match self {
            RegistryError::StoreRead(_) => {
                (status, [(header::RETRY_AFTER, "5")], body).into_response()
            }
            _ => (status, body).into_response(),
        }
    }
}

/// Build the registry router.
pub fn router(service: Arc<RegistryService>, supervisor: Supervisor) -> Router {
    let max_body = service.config().max_snapshot_bytes;
    let state = Arc::new(AppState {
        service,
        supervisor,
    });
    Router::new()
        .route("/register", post(register))
        .route("/heartbeat", post(heartbeat))
        .route("/deregister", post(deregister))
        .route("/members", get(members))
        .route("/members_with_analysis", get(members_with_analysis))
        .route("/report_metrics", post(report_metrics))
        .route("/metrics", get(metrics_index))
        .route("/metrics_prom", get(metrics_prom))
        .route("/health", get(health))
        .route("/clear", post(clear))
        .layer(DefaultBodyLimit::max(max_body))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, RegistryError> {
    state.service.register(request).await.map(Json)
}

async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<HeartbeatRequest>,
) -> Result<Json<AckResponse>, RegistryError> {
    state.service.heartbeat(&request.instance_id).await.map(Json)
}

async fn deregister(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DeregisterRequest>,
) -> Result<Json<DeregisterResponse>, RegistryError> {
    state
        .service
        .deregister(&request.instance_id)
        .await
        .map(Json)
}

async fn members(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MembersResponse>, RegistryError> {
    let members = state.service.members().await?;
    Ok(Json(MembersResponse { members }))
}

async fn members_with_analysis(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MembersWithAnalysis>, RegistryError> {
    state.service.members_with_analysis().await.map(Json)
}

async fn report_metrics(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ReportMetricsRequest>,
) -> Result<Json<AckResponse>, RegistryError> {
    state
        .service
        .report_metrics(&request.instance_id, request.snapshot)
        .await
        .map(Json)
}

async fn metrics_index(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MetricsIndexResponse>, RegistryError> {
    state.service.metrics_index().await.map(Json)
}

async fn metrics_prom(State(state): State<Arc<AppState>>) -> Response {
    match netring_metrics::encode_text(&state.service.metrics().registry()) {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(err) => {
            warn!(error = %err, "failed to encode registry metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<RegistryHealth> {
    Json(state.service.health(state.supervisor.health()))
}

async fn clear(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let Some(expected) = state.service.config().admin_token.clone() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let presented = headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .map(str::trim);
    if presented != Some(expected.as_str()) {
        return StatusCode::FORBIDDEN.into_response();
    }
    match state.service.clear().await {
        Ok(response) => Json::<ClearResponse>(response).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Handle to the running registry server.
pub struct RegistryServer {
    address: SocketAddr,
    task: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl RegistryServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Request graceful shutdown; in-flight requests get [`DRAIN_TIMEOUT`].
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(true);
        if tokio::time::timeout(DRAIN_TIMEOUT, &mut self.task)
            .await
            .is_err()
        {
            warn!("registry server did not drain in time; aborting");
            self.task.abort();
        }
        Ok(())
    }
}

/// Bind and spawn the registry HTTP server.
pub async fn spawn_server(
    service: Arc<RegistryService>,
    supervisor: Supervisor,
    listen: SocketAddr,
) -> anyhow::Result<RegistryServer> {
    let listener = TcpListener::bind(listen).await?;
    let local_addr = listener.local_addr()?;
    info!(address = %local_addr, "registry api listening");

    let app = router(service, supervisor);
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = shutdown_rx.changed().await;
    });
    let task = tokio::spawn(async move {
        if let Err(err) = server.await {
            warn!(error = %err, "registry server exited with error");
        }
    });

    Ok(RegistryServer {
        address: local_addr,
        task,
        shutdown: shutdown_tx,
    })
}
