//! ---
//! ring_section: "04-resilience"
//! ring_subsection: "module"
//! ring_type: "source"
//! ring_scope: "code"
//! ring_description: "Supervised task loops and liveness monitoring."
//! ring_version: "v0.1.0-alpha"
//! ring_owner: "tbd"
//! ---
//! The single sanctioned pattern for background work in netring.
//!
//! A supervised task is a named loop running one iteration per period.
//! Iterations execute on their own tokio task so panics are contained; any
//! error or panic is logged with the task name and the loop resumes after a
//! fixed backoff. A monitor loop restarts tasks whose tick timestamp goes
//! stale. Fire-and-forget `tokio::spawn` is not used for long-running work
//! anywhere else in the core.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

/// One iteration of a supervised task.
pub type IterationFuture = BoxFuture<'static, anyhow::Result<()>>;

type TaskFactory = Arc<dyn Fn() -> IterationFuture + Send + Sync>;

/// Timing knobs for supervision.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorOptions {
    /// Delay before resuming a loop after a failed or panicked iteration.
    pub error_backoff: Duration,
    /// Cadence of the stall monitor.
    pub health_check_interval: Duration,
    /// A task whose last tick is older than this is considered stalled.
    pub task_timeout: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            error_backoff: Duration::from_secs(5),
            health_check_interval: Duration::from_secs(60),
            task_timeout: Duration::from_secs(300),
        }
    }
}

/// Health of one supervised task, exposed by `/health` endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct TaskHealth {
    pub alive: bool,
    pub seconds_since_tick: u64,
    pub restart_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds_since_restart: Option<u64>,
}

#[derive(Debug)]
struct TaskState {
    last_tick: Mutex<Instant>,
    restart_count: AtomicU32,
    last_restart: Mutex<Option<Instant>>,
    stopped: AtomicBool,
}

impl TaskState {
    fn new() -> Self {
        Self {
            last_tick: Mutex::new(Instant::now()),
            restart_count: AtomicU32::new(0),
            last_restart: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }
}

struct TaskEntry {
    period: Duration,
    factory: TaskFactory,
    state: Arc<TaskState>,
    handle: JoinHandle<()>,
}

struct Inner {
    options: SupervisorOptions,
    tasks: Mutex<BTreeMap<String, TaskEntry>>,
    shutdown: broadcast::Sender<()>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

/// Runs named task loops and keeps them alive.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(options: SupervisorOptions) -> Self {
        let (shutdown, _) = broadcast::channel(8);
        Self {
            inner: Arc::new(Inner {
                options,
                tasks: Mutex::new(BTreeMap::new()),
                shutdown,
                monitor: Mutex::new(None),
            }),
        }
    }

    /// Register and start a supervised loop. `factory` produces one iteration;
    /// it is called again for every cycle and after every restart.
    pub fn spawn<F>(&self, name: &str, period: Duration, factory: F)
    where
        F: Fn() -> IterationFuture + Send + Sync + 'static,
    {
        let factory: TaskFactory = Arc::new(factory);
        let state = Arc::new(TaskState::new());
        let handle = tokio::spawn(run_loop(
            name.to_owned(),
            period,
            factory.clone(),
            state.clone(),
            self.inner.options.error_backoff,
            self.inner.shutdown.subscribe(),
        ));
        let previous = self.inner.tasks.lock().insert(
            name.to_owned(),
            TaskEntry {
                period,
                factory,
                state,
                handle,
            },
        );
        if let Some(previous) = previous {
            warn!(task = name, "supervised task re-registered; aborting previous instance");
            previous.handle.abort();
        }
    }

    /// Start the stall monitor. Stalled tasks are aborted and respawned from
    /// their factory; each replacement increments the task's restart count.
    pub fn start_monitor(&self) {
        let inner = self.inner.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let mut cadence = tokio::time::interval(inner.options.health_check_interval);
            cadence.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // the immediate first tick would inspect tasks that have not had a
            // chance to run yet
            cadence.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        debug!("supervisor monitor stopped");
                        break;
                    }
                    _ = cadence.tick() => {
                        restart_stalled(&inner);
                    }
                }
            }
        });
        *self.inner.monitor.lock() = Some(handle);
    }

    /// Health snapshot keyed by task name.
    pub fn health(&self) -> BTreeMap<String, TaskHealth> {
        let tasks = self.inner.tasks.lock();
        tasks
            .iter()
            .map(|(name, entry)| {
                let alive =
                    !entry.state.stopped.load(Ordering::Relaxed) && !entry.handle.is_finished();
                let seconds_since_tick = entry.state.last_tick.lock().elapsed().as_secs();
                let seconds_since_restart = entry
                    .state
                    .last_restart
                    .lock()
                    .map(|at| at.elapsed().as_secs());
                (
                    name.clone(),
                    TaskHealth {
                        alive,
                        seconds_since_tick,
                        restart_count: entry.state.restart_count.load(Ordering::Relaxed),
                        seconds_since_restart,
                    },
                )
            })
            .collect()
    }

    /// Whether any task was restarted within the given window.
    pub fn restarted_within(&self, window: Duration) -> bool {
        let tasks = self.inner.tasks.lock();
        tasks.values().any(|entry| {
            entry
                .state
                .last_restart
                .lock()
                .map(|at| at.elapsed() <= window)
                .unwrap_or(false)
        })
    }

    /// Broadcast cancellation and wait for every loop to wind down.
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown.send(());
        if let Some(monitor) = self.inner.monitor.lock().take() {
            monitor.abort();
        }
        let entries: Vec<(String, JoinHandle<()>)> = {
            let mut tasks = self.inner.tasks.lock();
            std::mem::take(&mut *tasks)
                .into_iter()
                .map(|(name, entry)| (name, entry.handle))
                .collect()
        };
        for (name, mut handle) in entries {
            if tokio::time::timeout(Duration::from_secs(5), &mut handle)
                .await
                .is_err()
            {
                warn!(task = %name, "supervised task did not stop in time; aborting");
                handle.abort();
            }
        }
    }
}

fn restart_stalled(inner: &Arc<Inner>) {
    let mut tasks = inner.tasks.lock();
    for (name, entry) in tasks.iter_mut() {
        if entry.state.stopped.load(Ordering::Relaxed) {
            continue;
        }
        let since_tick = entry.state.last_tick.lock().elapsed();
        if since_tick <= inner.options.task_timeout {
            continue;
        }
        warn!(
            task = %name,
            stalled_for_s = since_tick.as_secs(),
            "supervised task stalled; replacing"
        );
        entry.handle.abort();
        entry.state.restart_count.fetch_add(1, Ordering::Relaxed);
        *entry.state.last_restart.lock() = Some(Instant::now());
        // fresh tick so the replacement gets a full timeout before the next
        // stall verdict
        *entry.state.last_tick.lock() = Instant::now();
        entry.handle = tokio::spawn(run_loop(
            name.clone(),
            entry.period,
            entry.factory.clone(),
            entry.state.clone(),
            inner.options.error_backoff,
            inner.shutdown.subscribe(),
        ));
    }
}

async fn run_loop(
    name: String,
    period: Duration,
    factory: TaskFactory,
    state: Arc<TaskState>,
    error_backoff: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut cadence = tokio::time::interval(period);
    cadence.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!(task = %name, "supervised task stopped");
                state.stopped.store(true, Ordering::Relaxed);
                break;
            }
            _ = cadence.tick() => {
                let started = Instant::now();
                // iterations run on their own task so a panic is contained
                // and reported instead of killing the loop; the guard cancels
                // the iteration if this loop is aborted mid-flight
                let mut iteration = IterationGuard {
                    handle: tokio::spawn(factory()),
                };
                match (&mut iteration.handle).await {
                    Ok(Ok(())) => {
                        *state.last_tick.lock() = Instant::now();
                    }
                    Ok(Err(err)) => {
                        warn!(task = %name, error = %err, "supervised task iteration failed");
                        tokio::time::sleep(error_backoff).await;
                    }
                    Err(join_err) if join_err.is_panic() => {
                        let reason = panic_message(join_err.into_panic());
                        error!(task = %name, panic = %reason, "supervised task iteration panicked");
                        tokio::time::sleep(error_backoff).await;
                    }
                    Err(_) => {
                        // the iteration task was cancelled from outside;
                        // treat like shutdown
                        state.stopped.store(true, Ordering::Relaxed);
                        break;
                    }
                }
                let elapsed = started.elapsed();
                if elapsed > period && !period.is_zero() {
                    debug!(
                        task = %name,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "iteration overran its period; missed ticks are skipped"
                    );
                }
            }
        }
    }
}

struct IterationGuard {
    handle: JoinHandle<anyhow::Result<()>>,
}

impl Drop for IterationGuard {
    fn drop(&mut self) {
        // no-op once the iteration has completed
        self.handle.abort();
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
