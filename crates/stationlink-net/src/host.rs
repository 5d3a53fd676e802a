//! # Local Service Host
//!
//! The HTTP endpoint a main station serves to its subs.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     LocalServiceHost (Axum)                             │
//! │                                                                         │
//! │   GET /health   ──▶ "OK"                                               │
//! │   GET /station  ──▶ { role, label, app_id, store_id }                  │
//! │   anything else ──▶ collaborator Router (REST API layer)               │
//! │                                                                         │
//! │   start(port)  bind ─┬─ ok  ──▶ serve, wake lock on                     │
//! │                      └─ err ──▶ PortUnavailable | BindError             │
//! │   stop()       graceful shutdown, release port, wake lock off          │
//! │                                                                         │
//! │   HostWorker: runs start/stop off the coordinator task and reports     │
//! │   HostEvent::{Started, Failed, Stopped}.                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use stationlink_core::StationRole;

use crate::collaborators::WakeLock;
use crate::error::{HostError, StationError, StationResult};
use crate::status::StationSnapshot;

/// How long `stop` waits for in-flight requests before aborting the server.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// =============================================================================
// Routes
// =============================================================================

#[derive(Clone)]
struct HostState {
    status: watch::Receiver<StationSnapshot>,
}

/// Body of `GET /station`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationInfo {
    pub role: StationRole,
    pub label: String,
    pub app_id: String,
    pub store_id: Option<String>,
}

async fn health_handler() -> impl IntoResponse {
    "OK"
}

async fn station_handler(State(state): State<HostState>) -> Json<StationInfo> {
    let snapshot = state.status.borrow().clone();
    Json(StationInfo {
        store_id: snapshot.role.hosted_store().map(str::to_string),
        role: snapshot.role,
        label: snapshot.label,
        app_id: snapshot.app_id,
    })
}

// =============================================================================
// Local Service Host
// =============================================================================

struct RunningHost {
    port: u16,
    local_addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Owns the lifecycle of the HTTP endpoint.
pub struct LocalServiceHost {
    bind_addr: String,
    routes: Router,
    status: watch::Receiver<StationSnapshot>,
    wake_lock: Arc<dyn WakeLock>,
    running: Option<RunningHost>,
}

impl LocalServiceHost {
    /// `routes` is served for every path not handled by the built-in routes.
    pub fn new(
        bind_addr: impl Into<String>,
        routes: Router,
        status: watch::Receiver<StationSnapshot>,
        wake_lock: Arc<dyn WakeLock>,
    ) -> Self {
        LocalServiceHost {
            bind_addr: bind_addr.into(),
            routes,
            status,
            wake_lock,
            running: None,
        }
    }

    fn app(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/station", get(station_handler))
            .with_state(HostState {
                status: self.status.clone(),
            })
            .fallback_service(self.routes.clone())
    }

    /// Binds `port` and starts serving.
    ///
    /// Starting on the port already served is a no-op; starting on another
    /// port moves the host.
    pub async fn start(&mut self, port: u16) -> Result<SocketAddr, HostError> {
        if let Some(ref running) = self.running {
            if running.port == port {
                debug!(port, "Rest service already running");
                return Ok(running.local_addr);
            }
            self.stop().await;
        }

        let bind_addr = format!("{}:{}", self.bind_addr, port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| HostError::from_bind(port, e))?;
        let local_addr = listener.local_addr().map_err(|e| HostError::from_bind(port, e))?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = self.app();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                    debug!("Rest service shutting down");
                })
                .await;
            if let Err(e) = result {
                error!(error = %e, "Rest service failed");
            }
        });

        self.wake_lock.set_awake(true);
        info!(addr = %local_addr, "Rest service started");

        self.running = Some(RunningHost {
            port,
            local_addr,
            shutdown_tx,
            task,
        });
        Ok(local_addr)
    }

    /// Stops accepting connections and releases the port. Safe to call when
    /// not running.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.shutdown_tx.send(());
        let abort = running.task.abort_handle();
        if tokio::time::timeout(SHUTDOWN_GRACE, running.task).await.is_err() {
            warn!(port = running.port, "Rest service did not drain in time, aborting");
            abort.abort();
        }

        self.wake_lock.set_awake(false);
        info!(addr = %running.local_addr, "Rest service stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Address actually bound (differs from the requested one for port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    /// Moves the host onto its own task. See [`HostHandle`].
    pub fn spawn(self, events_tx: mpsc::Sender<HostEvent>) -> (HostHandle, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_worker(self, cmd_rx, events_tx));
        (HostHandle { cmd_tx }, task)
    }
}

// =============================================================================
// Host Worker
// =============================================================================

/// Outcome of host commands, reported to the coordinator.
#[derive(Debug)]
pub enum HostEvent {
    /// Serving on `addr`. Also sent for a start on the port already served.
    Started { addr: SocketAddr },
    /// The port could not be bound.
    Failed { error: HostError },
    /// The host stopped.
    Stopped,
}

#[derive(Debug)]
enum HostCommand {
    Start { port: u16 },
    Stop,
    Shutdown,
}

/// Fire-and-forget control of a spawned host.
#[derive(Clone)]
pub struct HostHandle {
    cmd_tx: mpsc::UnboundedSender<HostCommand>,
}

impl HostHandle {
    fn send(&self, cmd: HostCommand) -> StationResult<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| StationError::ChannelError("Host worker stopped".into()))
    }

    pub fn start(&self, port: u16) -> StationResult<()> {
        self.send(HostCommand::Start { port })
    }

    pub fn stop(&self) -> StationResult<()> {
        self.send(HostCommand::Stop)
    }

    /// Stops the host and ends the worker.
    pub fn shutdown(&self) -> StationResult<()> {
        self.send(HostCommand::Shutdown)
    }
}

async fn run_worker(
    mut host: LocalServiceHost,
    mut cmd_rx: mpsc::UnboundedReceiver<HostCommand>,
    events_tx: mpsc::Sender<HostEvent>,
) {
    while let Some(cmd) = cmd_rx.recv().await {
        let event = match cmd {
            HostCommand::Start { port } => match host.start(port).await {
                Ok(addr) => HostEvent::Started { addr },
                Err(error) => {
                    warn!(port, error = %error, "Rest service failed to start");
                    HostEvent::Failed { error }
                }
            },
            HostCommand::Stop => {
                if !host.is_running() {
                    continue;
                }
                host.stop().await;
                HostEvent::Stopped
            }
            HostCommand::Shutdown => break,
        };

        if events_tx.send(event).await.is_err() {
            debug!("Coordinator gone, dropping host event");
        }
    }

    host.stop().await;
}
