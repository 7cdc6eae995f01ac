//! ---
//! ring_section: "07-member-agent"
//! ring_subsection: "module"
//! ring_type: "source"
//! ring_scope: "code"
//! ring_description: "Member agent runtime and probe pipelines."
//! ring_version: "v0.1.0-alpha"
//! ring_owner: "tbd"
//! ---
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use netring_common::{LogGate, MemberConfig};
use netring_metrics::{new_registry, ProbeMetrics};
use netring_msg::RegisterRequest;
use netring_supervisor::{Supervisor, SupervisorOptions};
use parking_lot::Mutex;
use rand::Rng;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};
use url::Url;

use crate::client::{build_http_client, Reachability, RegistryClient};
use crate::identity;
use crate::metrics_store::MetricsStore;
use crate::peers::PeerCache;
use crate::probes::traceroute::Tracer;
use crate::probes::{bandwidth, http, tcp};
use crate::server::{spawn_member_server, MemberServer, MemberServerState};

/// Ceiling for the registration maintainer's poll period.
const REGISTRATION_PERIOD_CAP: Duration = Duration::from_secs(5);

/// Cadence at which the local server is checked for a crash.
const SERVER_WATCH_PERIOD: Duration = Duration::from_secs(5);

/// Deadline for one outbound bandwidth transfer.
const BANDWIDTH_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for the best-effort deregister during shutdown.
const DEREGISTER_TIMEOUT: Duration = Duration::from_secs(3);

struct RegistrationState {
    needs_register: AtomicBool,
}

/// Per-target due times for bandwidth tests, jittered ±10 % so rings of
/// members do not synchronize their transfers.
struct BandwidthSchedule {
    next: Mutex<HashMap<String, Instant>>,
}

impl BandwidthSchedule {
    fn new() -> Self {
        Self {
            next: Mutex::new(HashMap::new()),
        }
    }

    fn due(&self, instance_id: &str) -> bool {
        self.next
            .lock()
            .get(instance_id)
            .map_or(true, |at| *at <= Instant::now())
    }

    fn reschedule(&self, instance_id: &str, interval: Duration) {
        let jitter = rand::thread_rng().gen_range(0.9..=1.1);
        let next = Instant::now() + interval.mul_f64(jitter);
        self.next.lock().insert(instance_id.to_owned(), next);
    }

    fn retain(&self, live: &HashSet<String>) {
        self.next.lock().retain(|id, _| live.contains(id));
    }
}

struct AgentCtx {
    config: MemberConfig,
    instance_id: String,
    advertised_ip: IpAddr,
    advertised_port: u16,
    client: RegistryClient,
    http: reqwest::Client,
    peers: Arc<PeerCache>,
    metrics: Arc<MetricsStore>,
    reachability: Arc<Reachability>,
    regstate: RegistrationState,
    tracer: Arc<dyn Tracer>,
    gate: LogGate,
    bandwidth: BandwidthSchedule,
}

/// The local server behind a slot so the watch task can replace a crashed
/// instance in place.
struct ServerSlot {
    state: Arc<MemberServerState>,
    addr: SocketAddr,
    server: Mutex<Option<MemberServer>>,
}

/// A running member: local HTTP surface plus the supervised task set.
pub struct MemberAgent {
    ctx: Arc<AgentCtx>,
    supervisor: Supervisor,
    server: Arc<ServerSlot>,
}

impl MemberAgent {
    /// Bring the member up: resolve identity, bind the local server, and
    /// start the supervised tasks. Registration happens on the maintainer's
    /// first tick.
    pub async fn start(config: MemberConfig, tracer: Arc<dyn Tracer>) -> Result<MemberAgent> {
        let instance_id = match &config.instance_id {
            Some(id) => id.clone(),
            None => identity::load_or_create(&config.instance_id_file)?,
        };

        let http = build_http_client()?;
        let client = RegistryClient::new(http.clone(), &config.registry.url)?;
        let advertised_ip = match config.host_ip {
            Some(ip) => ip,
            None => detect_host_ip(&config.registry.url).await?,
        };

        let prom = ProbeMetrics::new(new_registry())?;
        let metrics = Arc::new(MetricsStore::new(
            prom,
            &config.location,
            &instance_id,
            env!("CARGO_PKG_VERSION"),
        ));
        let peers = Arc::new(PeerCache::new());
        let reachability = Arc::new(Reachability::new());
        let supervisor = Supervisor::new(SupervisorOptions::default());

        let server_state = Arc::new(MemberServerState {
            instance_id: instance_id.clone(),
            location: config.location.clone(),
            peers: peers.clone(),
            metrics: metrics.clone(),
            supervisor: supervisor.clone(),
            reachability: reachability.clone(),
            heartbeat_interval: config.intervals.heartbeat,
            max_bandwidth_body: config.checks.max_bandwidth_body_bytes(),
        });
        let server = spawn_member_server(server_state.clone(), config.server.socket_addr()?).await?;
        let bound_addr = server.local_addr();
        let advertised_port = bound_addr.port();
        let server = Arc::new(ServerSlot {
            state: server_state,
            addr: bound_addr,
            server: Mutex::new(Some(server)),
        });

        let ctx = Arc::new(AgentCtx {
            config,
            instance_id,
            advertised_ip,
            advertised_port,
            client,
            http,
            peers,
            metrics,
            reachability,
            regstate: RegistrationState {
                needs_register: AtomicBool::new(true),
            },
            tracer,
            gate: LogGate::per_minute(),
            bandwidth: BandwidthSchedule::new(),
        });

        spawn_tasks(&supervisor, ctx.clone(), server.clone());
        supervisor.start_monitor();

        Ok(MemberAgent {
            ctx,
            supervisor,
            server,
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.ctx.instance_id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.addr
    }

    pub fn peers(&self) -> Arc<PeerCache> {
        self.ctx.peers.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsStore> {
        self.ctx.metrics.clone()
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Orderly exit: best-effort deregister bounded at three seconds, cancel
    /// the supervised tasks, then drain the local server.
    pub async fn shutdown(self) -> Result<()> {
        if let Err(err) = self
            .ctx
            .client
            .deregister(&self.ctx.instance_id, DEREGISTER_TIMEOUT)
            .await
        {
            debug!(error = %err, "best-effort deregister failed");
        }
        self.supervisor.shutdown().await;
        let server = self.server.server.lock().take();
        if let Some(server) = server {
            server.shutdown().await?;
        }
        info!(instance_id = %self.ctx.instance_id, "member stopped");
        Ok(())
    }
}

/// Pick the local address peers can reach us at by opening a UDP socket
/// toward the registry; `host_ip` in the configuration overrides this.
async fn detect_host_ip(registry_url: &str) -> Result<IpAddr> {
    let url = Url::parse(registry_url).context("invalid registry url")?;
    let host = url
        .host_str()
        .context("registry url has no host component")?
        .trim_matches(['[', ']'])
        .to_owned();
    let port = url.port_or_known_default().unwrap_or(80);
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .context("failed to bind detection socket")?;
    socket
        .connect((host.as_str(), port))
        .await
        .context("failed to route toward registry")?;
    Ok(socket.local_addr()?.ip())
}

fn spawn_tasks(supervisor: &Supervisor, ctx: Arc<AgentCtx>, server: Arc<ServerSlot>) {
    let intervals = &ctx.config.intervals;
    let registration_period = intervals.heartbeat.min(REGISTRATION_PERIOD_CAP);
    let bandwidth_period = (intervals.bandwidth_test / 10)
        .max(Duration::from_millis(250))
        .min(Duration::from_secs(30));

    supervisor.spawn("server_watch", SERVER_WATCH_PERIOD, move || {
        let server = server.clone();
        Box::pin(async move { server_watch_tick(server).await })
    });

    let c = ctx.clone();
    supervisor.spawn("registration", registration_period, move || {
        let ctx = c.clone();
        Box::pin(async move { registration_tick(ctx).await })
    });

    let c = ctx.clone();
    supervisor.spawn("heartbeat", intervals.heartbeat, move || {
        let ctx = c.clone();
        Box::pin(async move { heartbeat_tick(ctx).await })
    });

    let c = ctx.clone();
    supervisor.spawn("peer_poll", intervals.poll, move || {
        let ctx = c.clone();
        Box::pin(async move { poll_tick(ctx).await })
    });

    let c = ctx.clone();
    supervisor.spawn("connectivity", intervals.check, move || {
        let ctx = c.clone();
        Box::pin(async move { connectivity_tick(ctx).await })
    });

    let c = ctx.clone();
    supervisor.spawn("bandwidth", bandwidth_period, move || {
        let ctx = c.clone();
        Box::pin(async move { bandwidth_tick(ctx).await })
    });

    let c = ctx.clone();
    supervisor.spawn("traceroute", intervals.traceroute, move || {
        let ctx = c.clone();
        Box::pin(async move { traceroute_tick(ctx).await })
    });

    let c = ctx.clone();
    supervisor.spawn("metrics_push", intervals.metrics_push, move || {
        let ctx = c.clone();
        Box::pin(async move { push_tick(ctx).await })
    });
}

/// Rebind the local server if its serve task has exited; any inbound
/// bandwidth test that was in flight is gone with the old listener.
async fn server_watch_tick(slot: Arc<ServerSlot>) -> Result<()> {
    let crashed = {
        let server = slot.server.lock();
        server.as_ref().map(MemberServer::is_finished).unwrap_or(false)
    };
    if crashed {
        warn!(address = %slot.addr, "member server exited; rebinding");
        let replacement = spawn_member_server(slot.state.clone(), slot.addr).await?;
        *slot.server.lock() = Some(replacement);
    }
    Ok(())
}

/// Ensure we are registered; re-register whenever heartbeat or push learn
/// the registry no longer knows us.
async fn registration_tick(ctx: Arc<AgentCtx>) -> Result<()> {
    if !ctx.regstate.needs_register.load(Ordering::Relaxed) {
        return Ok(());
    }
    let request = RegisterRequest {
        instance_id: Some(ctx.instance_id.clone()),
        location: ctx.config.location.clone(),
        ip: ctx.advertised_ip.to_string(),
        port: ctx.advertised_port,
    };
    match ctx.client.register(&request).await {
        Ok(response) => {
            ctx.reachability.mark_ok();
            ctx.gate.reset("register");
            ctx.regstate.needs_register.store(false, Ordering::Relaxed);
            info!(
                instance_id = %response.instance_id,
                location = %ctx.config.location,
                advertised = %format!("{}:{}", ctx.advertised_ip, ctx.advertised_port),
                "registered with registry"
            );
        }
        Err(err) => {
            if ctx.gate.allow("register") {
                warn!(error = %err, "registration failed; retrying next tick");
            }
        }
    }
    Ok(())
}

async fn heartbeat_tick(ctx: Arc<AgentCtx>) -> Result<()> {
    if ctx.regstate.needs_register.load(Ordering::Relaxed) {
        return Ok(());
    }
    match ctx.client.heartbeat(&ctx.instance_id).await {
        Ok(()) => {
            ctx.reachability.mark_ok();
            ctx.gate.reset("heartbeat");
        }
        Err(err) if err.requires_reregistration() => {
            info!(error = %err, "registry lost our registration; re-registering");
            ctx.regstate.needs_register.store(true, Ordering::Relaxed);
        }
        Err(err) => {
            if ctx.gate.allow("heartbeat") {
                warn!(error = %err, "heartbeat failed; retrying next cycle");
            }
        }
    }
    Ok(())
}

/// Refresh the peer cache; keep probing from the cached list whenever the
/// registry is unreachable.
async fn poll_tick(ctx: Arc<AgentCtx>) -> Result<()> {
    match ctx.client.fetch_members().await {
        Ok(records) => {
            ctx.reachability.mark_ok();
            ctx.gate.reset("poll");
            let evicted = ctx.peers.refresh(&ctx.instance_id, records);
            if !evicted.is_empty() {
                debug!(evicted = ?evicted, "dropping probe results for departed peers");
                ctx.metrics.evict_targets(&evicted);
            }
        }
        Err(err) => {
            if ctx.gate.allow("poll") {
                warn!(error = %err, "peer poll failed; probing continues from cache");
            }
        }
    }
    Ok(())
}

/// TCP + HTTP probes against every cached peer, sequential per cycle so the
/// same probe never overlaps itself on a target.
async fn connectivity_tick(ctx: Arc<AgentCtx>) -> Result<()> {
    let peers = ctx.peers.peers();
    if peers.is_empty() {
        return Ok(());
    }
    let mut targets_ok = 0usize;
    for peer in &peers {
        let addr = SocketAddr::new(peer.ip, peer.port);
        let outcome = tcp::probe(addr, ctx.config.checks.tcp_timeout).await;
        ctx.metrics.record_tcp(peer, outcome.success, outcome.elapsed);

        let mut any_endpoint_ok = false;
        for endpoint in &ctx.config.checks.http_endpoints {
            let outcome = http::probe_endpoint(
                &ctx.http,
                peer.ip,
                peer.port,
                endpoint,
                ctx.config.checks.http_timeout,
            )
            .await;
            ctx.metrics
                .record_http(peer, endpoint, outcome.success, outcome.elapsed);
            any_endpoint_ok |= outcome.success;
        }
        if any_endpoint_ok {
            targets_ok += 1;
        }
    }
    info!(
        targets = peers.len(),
        reachable = targets_ok,
        success_rate = targets_ok as f64 / peers.len() as f64,
        "connectivity cycle finished"
    );
    Ok(())
}

/// Run bandwidth tests for targets whose jittered due time has arrived.
async fn bandwidth_tick(ctx: Arc<AgentCtx>) -> Result<()> {
    let peers = ctx.peers.peers();
    let live: HashSet<String> = peers.iter().map(|p| p.instance_id.clone()).collect();
    ctx.bandwidth.retain(&live);

    for peer in peers {
        if !ctx.bandwidth.due(&peer.instance_id) {
            continue;
        }
        // reschedule up front so a failing target is not retried hot
        ctx.bandwidth
            .reschedule(&peer.instance_id, ctx.config.intervals.bandwidth_test);
        match bandwidth::probe(
            &ctx.http,
            peer.ip,
            peer.port,
            ctx.config.checks.bandwidth_payload_bytes(),
            BANDWIDTH_TIMEOUT,
        )
        .await
        {
            Ok(outcome) => {
                ctx.metrics.record_bandwidth(&peer, outcome.mbps);
                debug!(
                    target = %peer.instance_id,
                    mbps = outcome.mbps,
                    bytes = outcome.bytes,
                    "bandwidth test finished"
                );
            }
            Err(err) => {
                if ctx.gate.allow("bandwidth") {
                    warn!(target = %peer.instance_id, error = %err, "bandwidth test failed; no sample recorded");
                }
            }
        }
    }
    Ok(())
}

async fn traceroute_tick(ctx: Arc<AgentCtx>) -> Result<()> {
    for peer in ctx.peers.peers() {
        match ctx
            .tracer
            .trace(peer.ip, ctx.config.checks.traceroute_timeout)
            .await
        {
            Ok(Some(result)) => {
                ctx.metrics
                    .record_traceroute(&peer, result.total_hops, result.max_hop_latency_ms);
            }
            Ok(None) => {
                debug!(target = %peer.instance_id, "traceroute produced no usable hops; skipping");
            }
            Err(err) => {
                if ctx.gate.allow("traceroute") {
                    warn!(target = %peer.instance_id, error = %err, "traceroute failed; skipping cycle");
                }
            }
        }
    }
    Ok(())
}

/// Push a fresh snapshot upstream. Pushes are single-flight because the
/// supervised loop awaits each iteration.
async fn push_tick(ctx: Arc<AgentCtx>) -> Result<()> {
    if ctx.regstate.needs_register.load(Ordering::Relaxed) {
        return Ok(());
    }
    let snapshot = ctx.metrics.snapshot();
    match ctx.client.report_metrics(&ctx.instance_id, snapshot).await {
        Ok(()) => {
            ctx.reachability.mark_ok();
            ctx.gate.reset("push");
        }
        Err(err) if err.requires_reregistration() => {
            info!(error = %err, "registry rejected metrics push; re-registering");
            ctx.regstate.needs_register.store(true, Ordering::Relaxed);
        }
        Err(err) => {
            if ctx.gate.allow("push") {
                warn!(error = %err, "metrics push failed; retrying next cycle");
            }
        }
    }
    Ok(())
}
