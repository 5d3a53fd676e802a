//! # Station Coordinator
//!
//! Owns the station's role and drives the other components from it.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Station Coordinator                              │
//! │                                                                         │
//! │  CoordinatorHandle ──cmd──▶ ┌───────────────────┐ ──▶ RoleObservers      │
//! │  (app: become_main,         │  coordinator task │ ──▶ broadcast changes  │
//! │   become_sub, ...)          │  (StationState)   │ ──▶ watch snapshot     │
//! │                             └───────────────────┘                        │
//! │            ▲ DiscoveryEvent     ▲ ResolutionOutcome    ▲ HostEvent       │
//! │            │                    │                      │                 │
//! │   ┌────────┴────────┐  ┌────────┴────────┐  ┌──────────┴─────────┐       │
//! │   │DiscoveryListener│  │ AddressResolver │  │  LocalServiceHost  │       │
//! │   │advertise/browse │  │ one per record  │  │  (host worker)     │       │
//! │   └─────────────────┘  └─────────────────┘  └────────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Transitions
//! ```text
//!   any ──single──────────────▶ SingleStation    stop advertise, browse, host
//!   any ──main{store}─────────▶ Main{store}      stop browse, start host,
//!                                                advertise once bound
//!   sub ──enter sub───────────▶ SubDisconnected  stop host, advertise; browse
//!   SubDisconnected ──resolved▶ SubConnected     remember the endpoint
//!   SubConnected ──main lost──▶ SubDisconnected  forced sign-out
//! ```
//!
//! Every input (app command, discovery event, resolution outcome, host
//! event) is applied by a single task, one at a time, so observers see a
//! strictly ordered history of role changes. The task never awaits network
//! I/O: host start/stop, advertise/browse, and resolutions are handed to
//! their own tasks and report back over channels.

use std::sync::Arc;

use axum::Router;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use stationlink_core::{
    RoleChange, RoleObserver, ServiceName, StationMode, StationRole, StationState,
};

use crate::collaborators::{AuthService, NoOpAuth, NoOpWakeLock, NoStoreId, StoreIdProvider, WakeLock};
use crate::config::StationConfig;
use crate::discovery::{
    Capability, DiscoveryBackend, DiscoveryEvent, DiscoveryListener, ListenerHandle,
    ListenerSettings,
};
use crate::error::{StationError, StationResult};
use crate::host::{HostEvent, HostHandle, LocalServiceHost};
use crate::resolver::{AddressResolver, MainEndpoint, ResolutionOutcome};
use crate::status::StationSnapshot;

/// Capacity of the channels feeding the coordinator task.
const CHANNEL_CAPACITY: usize = 64;

/// Capacity of the role change broadcast.
const CHANGES_CAPACITY: usize = 32;

// =============================================================================
// Commands & Handle
// =============================================================================

type Reply<T> = oneshot::Sender<StationResult<T>>;

#[derive(Debug)]
enum CoordinatorCommand {
    RequestRole {
        role: StationRole,
        reply: Reply<Option<RoleChange>>,
    },
    ApplyMode {
        mode: StationMode,
        reply: Reply<Option<RoleChange>>,
    },
    BecomeMainForCurrentStore {
        reply: Reply<Option<RoleChange>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle for interacting with a running coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    cmd_tx: mpsc::Sender<CoordinatorCommand>,
    status_rx: watch::Receiver<StationSnapshot>,
    changes_tx: broadcast::Sender<RoleChange>,
}

impl CoordinatorHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> CoordinatorCommand,
    ) -> StationResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(make(reply_tx))
            .await
            .map_err(|_| StationError::ShuttingDown)?;
        reply_rx.await.map_err(|_| StationError::ShuttingDown)?
    }

    /// Current role.
    pub fn role(&self) -> StationRole {
        self.status_rx.borrow().role.clone()
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> StationSnapshot {
        self.status_rx.borrow().clone()
    }

    /// Receiver for snapshot updates.
    pub fn watch(&self) -> watch::Receiver<StationSnapshot> {
        self.status_rx.clone()
    }

    /// Subscribes to role changes from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RoleChange> {
        self.changes_tx.subscribe()
    }

    /// Main this sub is connected to.
    pub fn main_endpoint(&self) -> Option<MainEndpoint> {
        self.status_rx.borrow().main.clone()
    }

    /// Requests a role.
    ///
    /// Returns the applied change, or `None` when the station already held
    /// `role`. `SubConnected` can only be reached through discovery; from
    /// `SubConnected` only a move to `SubDisconnected` is accepted.
    pub async fn request_role(&self, role: StationRole) -> StationResult<Option<RoleChange>> {
        self.request(|reply| CoordinatorCommand::RequestRole { role, reply })
            .await
    }

    /// Hosts `store_id` on this device.
    pub async fn become_main(&self, store_id: impl Into<String>) -> StationResult<Option<RoleChange>> {
        self.request_role(StationRole::Main {
            store_id: store_id.into(),
        })
        .await
    }

    /// Hosts the store reported by the configured store-identifier source.
    pub async fn become_main_for_current_store(&self) -> StationResult<Option<RoleChange>> {
        self.request(|reply| CoordinatorCommand::BecomeMainForCurrentStore { reply })
            .await
    }

    pub async fn become_single_station(&self) -> StationResult<Option<RoleChange>> {
        self.request_role(StationRole::SingleStation).await
    }

    /// Enters sub mode and starts looking for a main afresh.
    pub async fn become_sub(&self) -> StationResult<Option<RoleChange>> {
        self.request_role(StationRole::SubDisconnected).await
    }

    /// Applies a requested mode, e.g. the one persisted by the app.
    pub async fn apply_mode(&self, mode: StationMode) -> StationResult<Option<RoleChange>> {
        self.request(|reply| CoordinatorCommand::ApplyMode { mode, reply })
            .await
    }

    /// Stops host, advertise and browse, discards pending resolutions and
    /// ends the coordinator task. Calling it again is a no-op.
    pub async fn shutdown(&self) -> StationResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(CoordinatorCommand::Shutdown { reply: reply_tx })
            .await
            .is_err()
        {
            return Ok(());
        }
        let _ = reply_rx.await;
        Ok(())
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Configures and starts the coordinator.
///
/// ```ignore
/// let coordinator = StationCoordinator::new(config, Arc::new(UdpDiscovery::new(settings)))
///     .with_auth(Arc::new(LoggingAuth))
///     .with_routes(api_routes)
///     .start();
///
/// coordinator.become_main("store-001").await?;
/// ```
pub struct StationCoordinator {
    config: StationConfig,
    backend: Arc<dyn DiscoveryBackend>,
    auth: Arc<dyn AuthService>,
    store_ids: Arc<dyn StoreIdProvider>,
    wake_lock: Arc<dyn WakeLock>,
    routes: Router,
    observers: Vec<Arc<dyn RoleObserver>>,
}

impl StationCoordinator {
    pub fn new(config: StationConfig, backend: Arc<dyn DiscoveryBackend>) -> Self {
        StationCoordinator {
            config,
            backend,
            auth: Arc::new(NoOpAuth),
            store_ids: Arc::new(NoStoreId),
            wake_lock: Arc::new(NoOpWakeLock),
            routes: Router::new(),
            observers: Vec::new(),
        }
    }

    /// Session to sign out when the main is lost.
    pub fn with_auth(mut self, auth: Arc<dyn AuthService>) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_store_ids(mut self, store_ids: Arc<dyn StoreIdProvider>) -> Self {
        self.store_ids = store_ids;
        self
    }

    pub fn with_wake_lock(mut self, wake_lock: Arc<dyn WakeLock>) -> Self {
        self.wake_lock = wake_lock;
        self
    }

    /// REST API served by the local host while this station is main.
    pub fn with_routes(mut self, routes: Router) -> Self {
        self.routes = routes;
        self
    }

    /// Observer notified synchronously, in order, of every role change.
    pub fn with_observer(mut self, observer: Arc<dyn RoleObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Spawns the coordinator and its workers, then applies the configured
    /// mode.
    pub fn start(self) -> CoordinatorHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (discovery_tx, discovery_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (outcomes_tx, outcomes_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (host_tx, host_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (changes_tx, _) = broadcast::channel(CHANGES_CAPACITY);

        let app_id = self.config.app_id().to_string();
        let (status_tx, status_rx) =
            watch::channel(StationSnapshot::new(&app_id, self.config.host.port));

        let (listener, listener_task) = DiscoveryListener::spawn(
            self.backend.clone(),
            ListenerSettings::from_config(&self.config),
            discovery_tx,
        );
        let (host, host_task) = LocalServiceHost::new(
            self.config.host.bind_addr.clone(),
            self.routes,
            status_rx.clone(),
            self.wake_lock,
        )
        .spawn(host_tx);
        let resolver = AddressResolver::new(
            self.backend,
            self.config.discovery.resolve_timeout(),
            outcomes_tx,
        );

        let mut state = StationState::new();
        for observer in self.observers {
            state.subscribe(observer);
        }

        let handle = CoordinatorHandle {
            cmd_tx,
            status_rx,
            changes_tx: changes_tx.clone(),
        };

        let task = CoordinatorTask {
            config: self.config,
            app_id,
            state,
            auth: self.auth,
            store_ids: self.store_ids,
            listener,
            listener_task: Some(listener_task),
            host,
            host_task: Some(host_task),
            resolver,
            active_main: None,
            host_port: None,
            host_bind_failed: false,
            advertising: false,
            browsing: false,
            last_error: None,
            status_tx,
            changes_tx,
        };

        tokio::spawn(task.run(Inputs {
            cmd_rx,
            discovery_rx,
            outcomes_rx,
            host_rx,
        }));

        handle
    }
}

// =============================================================================
// Coordinator Task
// =============================================================================

struct Inputs {
    cmd_rx: mpsc::Receiver<CoordinatorCommand>,
    discovery_rx: mpsc::Receiver<DiscoveryEvent>,
    outcomes_rx: mpsc::Receiver<ResolutionOutcome>,
    host_rx: mpsc::Receiver<HostEvent>,
}

struct CoordinatorTask {
    config: StationConfig,
    app_id: String,
    state: StationState,
    auth: Arc<dyn AuthService>,
    store_ids: Arc<dyn StoreIdProvider>,

    listener: ListenerHandle,
    listener_task: Option<JoinHandle<()>>,
    host: HostHandle,
    host_task: Option<JoinHandle<()>>,
    resolver: AddressResolver,

    /// Endpoint of the main while `SubConnected`.
    active_main: Option<MainEndpoint>,
    host_port: Option<u16>,
    /// Last host start failed; a repeated `Main` request retries it.
    host_bind_failed: bool,
    advertising: bool,
    browsing: bool,
    last_error: Option<String>,

    status_tx: watch::Sender<StationSnapshot>,
    changes_tx: broadcast::Sender<RoleChange>,
}

impl CoordinatorTask {
    async fn run(mut self, mut inputs: Inputs) {
        info!(
            mode = %self.config.mode(),
            app_id = %self.app_id,
            port = self.config.host.port,
            "Station coordinator started"
        );

        if let Err(e) = self.apply_mode(self.config.mode()) {
            warn!(error = %e, "Could not apply configured mode, staying in sub mode");
            self.last_error = Some(e.to_string());
            self.enter_sub();
        }
        self.publish();

        let shutdown_reply = loop {
            tokio::select! {
                cmd = inputs.cmd_rx.recv() => match cmd {
                    Some(CoordinatorCommand::Shutdown { reply }) => break Some(reply),
                    Some(cmd) => self.handle_command(cmd),
                    None => break None,
                },
                Some(event) = inputs.discovery_rx.recv() => self.handle_discovery(event),
                Some(outcome) = inputs.outcomes_rx.recv() => self.handle_resolution(outcome),
                Some(event) = inputs.host_rx.recv() => self.handle_host(event),
            }
            self.publish();
        };

        info!("Station coordinator shutting down");
        drop(inputs);
        self.shutdown().await;

        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    async fn shutdown(&mut self) {
        self.resolver.cancel_all();
        self.active_main = None;

        let _ = self.listener.shutdown();
        let _ = self.host.shutdown();
        if let Some(task) = self.listener_task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Discovery listener ended abnormally");
            }
        }
        if let Some(task) = self.host_task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Host worker ended abnormally");
            }
        }

        if let Some(change) = self.state.reset() {
            let _ = self.changes_tx.send(change);
        }
        self.host_port = None;
        self.advertising = false;
        self.browsing = false;
        self.publish();
        info!("Station coordinator stopped");
    }

    // =========================================================================
    // State
    // =========================================================================

    fn role(&self) -> &StationRole {
        self.state.current_role()
    }

    /// Applies `role` to the state, notifying observers and subscribers.
    fn transition(&mut self, role: StationRole) -> StationResult<Option<RoleChange>> {
        let change = self.state.request_role(role)?;
        if let Some(ref change) = change {
            info!(
                from = %change.previous,
                to = %change.current,
                sequence = change.sequence,
                "Station role changed"
            );
            let _ = self.changes_tx.send(change.clone());
        }
        Ok(change)
    }

    fn publish(&self) {
        let role = self.role().clone();
        let port = self.host_port.unwrap_or(self.config.host.port);
        let snapshot = StationSnapshot {
            label: role.label(&self.app_id, port),
            role,
            app_id: self.app_id.clone(),
            main: self.active_main.clone(),
            host_port: self.host_port,
            advertising: self.advertising,
            browsing: self.browsing,
            pending_resolutions: self.resolver.pending_count(),
            last_error: self.last_error.clone(),
            updated_at: Utc::now(),
        };
        self.status_tx.send_replace(snapshot);
    }

    /// Logs a failed hand-off to a worker. Workers only stop on shutdown.
    fn report(&mut self, result: StationResult<()>) {
        if let Err(e) = result {
            warn!(error = %e, "Station worker unavailable");
            self.last_error = Some(e.to_string());
        }
    }

    fn active_record(&self) -> Option<&str> {
        self.active_main.as_ref().map(|m| m.record.as_str())
    }

    // =========================================================================
    // Commands
    // =========================================================================

    fn handle_command(&mut self, cmd: CoordinatorCommand) {
        match cmd {
            CoordinatorCommand::RequestRole { role, reply } => {
                let result = self.request_role(role);
                self.reply(reply, result);
            }
            CoordinatorCommand::ApplyMode { mode, reply } => {
                let result = self.apply_mode(mode);
                self.reply(reply, result);
            }
            CoordinatorCommand::BecomeMainForCurrentStore { reply } => {
                let result = self
                    .current_store_id()
                    .and_then(|store_id| self.become_main(store_id));
                self.reply(reply, result);
            }
            CoordinatorCommand::Shutdown { .. } => {}
        }
    }

    /// Publishes before answering so a caller reading the snapshot after
    /// the reply sees the role it was told about.
    fn reply<T>(&self, reply: Reply<T>, result: StationResult<T>) {
        self.publish();
        let _ = reply.send(result);
    }

    fn request_role(&mut self, role: StationRole) -> StationResult<Option<RoleChange>> {
        stationlink_core::check_transition(self.role(), &role)?;

        match role {
            StationRole::SubDisconnected => Ok(self.enter_sub()),
            StationRole::Main { store_id } => self.become_main(store_id),
            StationRole::SingleStation => self.become_single(),
            StationRole::SubConnected { main_address } => {
                if self.role().main_address() == Some(main_address.as_str()) {
                    return Ok(None);
                }
                Err(StationError::InvalidRequest(
                    "A connected sub role is only entered through discovery".into(),
                ))
            }
        }
    }

    fn apply_mode(&mut self, mode: StationMode) -> StationResult<Option<RoleChange>> {
        debug!(%mode, "Applying station mode");
        match mode {
            StationMode::Sub => Ok(self.enter_sub()),
            StationMode::Main => {
                let store_id = self.current_store_id()?;
                self.become_main(store_id)
            }
            StationMode::Single => self.become_single(),
        }
    }

    fn current_store_id(&self) -> StationResult<String> {
        self.config
            .store_id()
            .map(str::to_string)
            .or_else(|| self.store_ids.current_store_id())
            .ok_or_else(|| StationError::InvalidRequest("No store id available to host".into()))
    }

    fn become_main(&mut self, store_id: String) -> StationResult<Option<RoleChange>> {
        ServiceName::new(self.app_id.as_str(), store_id.as_str())?;

        let Some(change) = self.transition(StationRole::Main { store_id })? else {
            if self.host_bind_failed {
                info!(port = self.config.host.port, "Retrying local service host");
                self.host_bind_failed = false;
                let result = self.host.start(self.config.host.port);
                self.report(result);
            }
            return Ok(None);
        };

        self.resolver.cancel_all();
        self.active_main = None;
        let result = self.listener.stop_browse();
        self.report(result);
        // Advertising follows once the host reports it is bound.
        self.host_bind_failed = false;
        let result = self.host.start(self.config.host.port);
        self.report(result);
        Ok(Some(change))
    }

    fn become_single(&mut self) -> StationResult<Option<RoleChange>> {
        let Some(change) = self.transition(StationRole::SingleStation)? else {
            return Ok(None);
        };

        self.resolver.cancel_all();
        self.active_main = None;
        let result = self.listener.stop_advertise();
        self.report(result);
        let result = self.listener.stop_browse();
        self.report(result);
        let result = self.host.stop();
        self.report(result);
        Ok(Some(change))
    }

    /// Moves to `SubDisconnected` and looks for a main from scratch.
    ///
    /// Leaving `SubConnected` this way is voluntary and does not sign out.
    fn enter_sub(&mut self) -> Option<RoleChange> {
        let change = match self.transition(StationRole::SubDisconnected) {
            Ok(change) => change,
            Err(e) => {
                warn!(error = %e, "Could not enter sub mode");
                None
            }
        };

        self.resolver.cancel_all();
        self.active_main = None;
        let result = self.host.stop();
        self.report(result);
        let result = self.listener.stop_advertise();
        self.report(result);

        match self.config.discovery.static_main.clone() {
            Some(static_main) => {
                let result = self.listener.stop_browse();
                self.report(result);
                match MainEndpoint::from_static(&static_main) {
                    Ok(endpoint) => {
                        info!(url = %endpoint.url, store_id = %endpoint.store_id, "Using configured main station");
                        self.connect(endpoint);
                    }
                    Err(e) => {
                        warn!(error = %e, "Configured main station is unusable");
                        self.last_error = Some(e.to_string());
                    }
                }
            }
            None => {
                let result = self.listener.restart_browse();
                self.report(result);
            }
        }

        change
    }

    // =========================================================================
    // Main Station Tracking
    // =========================================================================

    fn connect(&mut self, endpoint: MainEndpoint) {
        if *self.role() != StationRole::SubDisconnected {
            debug!(record = %endpoint.record, role = %self.role(), "Not waiting for a main, ignoring");
            return;
        }

        let role = StationRole::SubConnected {
            main_address: endpoint.address.clone(),
        };
        match self.transition(role) {
            Ok(_) => {
                info!(url = %endpoint.url, store_id = %endpoint.store_id, "Connected to main station");
                self.active_main = Some(endpoint);
            }
            Err(e) => warn!(error = %e, "Could not connect to main station"),
        }
    }

    /// The active main went away: disconnect and sign the session out.
    fn main_lost(&mut self, reason: &str) {
        if !matches!(self.role(), StationRole::SubConnected { .. }) {
            return;
        }

        match self.transition(StationRole::SubDisconnected) {
            Ok(Some(_)) => {
                warn!(
                    record = self.active_record().unwrap_or_default(),
                    reason,
                    "Main station lost"
                );
                self.active_main = None;
                self.auth.sign_out();
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Could not disconnect from main station"),
        }
    }

    // =========================================================================
    // Discovery Events
    // =========================================================================

    fn handle_discovery(&mut self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::MainAppeared { record, name } => match self.role() {
                StationRole::SubDisconnected => {
                    self.resolver.resolve(record, &name);
                }
                StationRole::SubConnected { .. } if self.active_record() == Some(record.name.as_str()) => {
                    debug!(record = %record.name, "Active main re-appeared, re-resolving");
                    self.resolver.resolve(record, &name);
                }
                role => {
                    debug!(record = %record.name, %role, "Ignoring main station appearance");
                }
            },
            DiscoveryEvent::MainRemoved { record } => {
                self.resolver.cancel(&record.name);
                if self.active_record() == Some(record.name.as_str()) {
                    self.main_lost("record removed");
                }
            }
            DiscoveryEvent::Started(capability) => self.set_running(capability, true),
            DiscoveryEvent::Stopped(capability) => self.set_running(capability, false),
            DiscoveryEvent::StartFailed {
                capability,
                reason,
                retry_in,
            } => {
                self.set_running(capability, false);
                let error = StationError::DiscoveryStartFailure(format!("{}: {}", capability, reason));
                warn!(error = %error, ?retry_in, "Discovery did not start");
                self.last_error = Some(error.to_string());
            }
        }
    }

    fn set_running(&mut self, capability: Capability, running: bool) {
        match capability {
            Capability::Advertise => self.advertising = running,
            Capability::Browse => self.browsing = running,
        }
    }

    // =========================================================================
    // Resolution Outcomes
    // =========================================================================

    fn handle_resolution(&mut self, outcome: ResolutionOutcome) {
        if !self.resolver.settle(&outcome) {
            return;
        }

        let is_active = self.active_record() == Some(outcome.record.name.as_str());
        match outcome.result {
            Ok(endpoint) => match self.role() {
                StationRole::SubDisconnected => self.connect(endpoint),
                StationRole::SubConnected { main_address } if is_active => {
                    if *main_address == endpoint.address {
                        self.active_main = Some(endpoint);
                    } else {
                        warn!(
                            record = %outcome.record.name,
                            address = %endpoint.address,
                            "Active main resolved to a new address, keeping current connection"
                        );
                    }
                }
                role => debug!(record = %outcome.record.name, %role, "Ignoring resolved main"),
            },
            Err(e) => {
                self.last_error = Some(e.to_string());
                if is_active && self.config.discovery.failure_drops_active_main {
                    self.main_lost(&e.to_string());
                    let result = self.listener.restart_browse();
                    self.report(result);
                } else {
                    debug!(record = %outcome.record.name, error = %e, "Resolution failed");
                }
            }
        }
    }

    // =========================================================================
    // Host Events
    // =========================================================================

    fn handle_host(&mut self, event: HostEvent) {
        match event {
            HostEvent::Started { addr } => {
                self.host_port = Some(addr.port());
                self.host_bind_failed = false;
                if let StationRole::Main { store_id } = self.role() {
                    let result = self.listener.advertise(store_id.clone(), addr.port());
                    self.report(result);
                }
            }
            HostEvent::Failed { error } => {
                self.host_port = None;
                self.host_bind_failed = true;
                let error = StationError::HostBindFailure(error);
                warn!(error = %error, "Local service host unavailable, not advertising");
                self.last_error = Some(error.to_string());
            }
            HostEvent::Stopped => self.host_port = None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::collaborators::{CountingAuth, FixedStoreId};
    use crate::config::StaticMain;
    use crate::discovery::{MemoryNetwork, ScriptedResolution};
    use stationlink_core::DEFAULT_APP_ID;

    const WAIT: Duration = Duration::from_secs(5);

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn record_name(store_id: &str) -> String {
        format!("{}:{}", DEFAULT_APP_ID, store_id)
    }

    fn connected(addr: &str) -> StationRole {
        StationRole::SubConnected {
            main_address: addr.to_string(),
        }
    }

    fn test_config() -> StationConfig {
        let mut config = StationConfig::new();
        config.host.port = 0;
        config.host.bind_addr = "127.0.0.1".into();
        config.discovery.resolve_timeout_secs = 2;
        config
    }

    struct Fixture {
        network: MemoryNetwork,
        auth: Arc<CountingAuth>,
        handle: CoordinatorHandle,
    }

    fn start_with(config: StationConfig) -> Fixture {
        let network = MemoryNetwork::new();
        let auth = Arc::new(CountingAuth::new());
        let handle = StationCoordinator::new(config, Arc::new(network.station(ip(9))))
            .with_auth(auth.clone())
            .start();
        Fixture { network, auth, handle }
    }

    fn start() -> Fixture {
        start_with(test_config())
    }

    async fn wait_until(handle: &CoordinatorHandle, pred: impl Fn(&StationSnapshot) -> bool) -> StationSnapshot {
        let mut rx = handle.watch();
        let snapshot = tokio::time::timeout(WAIT, rx.wait_for(|s| pred(s)))
            .await
            .expect("timed out waiting for snapshot")
            .expect("coordinator stopped")
            .clone();
        snapshot
    }

    async fn eventually(check: impl Fn() -> bool) {
        tokio::time::timeout(WAIT, async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    async fn connect_to(fixture: &Fixture, store_id: &str, last: u8) {
        wait_until(&fixture.handle, |s| s.browsing).await;
        fixture.network.announce(&record_name(store_id), ip(last), 25610);
        let addr = ip(last).to_string();
        wait_until(&fixture.handle, |s| s.role == connected(&addr)).await;
    }

    fn drain(changes: &mut broadcast::Receiver<RoleChange>) -> Vec<RoleChange> {
        let mut seen = Vec::new();
        while let Ok(change) = changes.try_recv() {
            seen.push(change);
        }
        seen
    }

    #[tokio::test]
    async fn test_starts_in_sub_mode_browsing() {
        let fixture = start();
        let snapshot = wait_until(&fixture.handle, |s| s.browsing).await;

        assert_eq!(snapshot.role, StationRole::SubDisconnected);
        assert_eq!(snapshot.label, "[SUB] Disconnected");
        assert!(!snapshot.host_running());
        assert_eq!(fixture.network.browser_count(), 1);
    }

    #[tokio::test]
    async fn test_matching_main_connects_once() {
        let fixture = start();
        let mut changes = fixture.handle.subscribe();

        connect_to(&fixture, "S1", 5).await;

        let endpoint = fixture.handle.main_endpoint().unwrap();
        assert_eq!(endpoint.url, "http://10.0.0.5:25610");
        assert_eq!(endpoint.store_id, "S1");
        assert_eq!(fixture.handle.snapshot().label, "[SUB] Connected to 10.0.0.5");

        let seen = drain(&mut changes);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].previous, StationRole::SubDisconnected);
        assert_eq!(seen[0].current, connected("10.0.0.5"));
    }

    #[tokio::test]
    async fn test_foreign_app_is_ignored() {
        let fixture = start();
        wait_until(&fixture.handle, |s| s.browsing).await;

        fixture.network.announce("wrongApp:S1", ip(5), 25610);
        fixture.network.script(&record_name("S9"), ScriptedResolution::Hang);
        fixture.network.announce(&record_name("S9"), ip(6), 25610);

        let network = fixture.network.clone();
        let name = record_name("S9");
        eventually(move || network.resolve_count(&name) == 1).await;

        assert_eq!(fixture.network.resolve_count("wrongApp:S1"), 0);
        assert_eq!(fixture.handle.role(), StationRole::SubDisconnected);
    }

    #[tokio::test]
    async fn test_second_appearance_cancels_pending_resolution() {
        let fixture = start();
        let mut changes = fixture.handle.subscribe();
        wait_until(&fixture.handle, |s| s.browsing).await;

        let name = record_name("S1");
        fixture.network.script(
            &name,
            ScriptedResolution::Delayed {
                after: Duration::from_millis(300),
                ip: ip(5),
            },
        );
        fixture.network.announce(&name, ip(5), 25610);

        let network = fixture.network.clone();
        let counted = name.clone();
        eventually(move || network.resolve_count(&counted) == 1).await;

        fixture.network.script(&name, ScriptedResolution::Address(ip(6)));
        fixture.network.announce(&name, ip(5), 25610);

        wait_until(&fixture.handle, |s| s.role == connected("10.0.0.6")).await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(fixture.handle.role(), connected("10.0.0.6"));
        assert_eq!(fixture.network.resolve_count(&name), 2);
        assert_eq!(drain(&mut changes).len(), 1);
    }

    #[tokio::test]
    async fn test_main_lost_signs_out_once() {
        let fixture = start();
        connect_to(&fixture, "S1", 5).await;

        fixture.network.withdraw(&record_name("S1"));
        let snapshot = wait_until(&fixture.handle, |s| s.role == StationRole::SubDisconnected).await;

        assert!(snapshot.main.is_none());
        assert_eq!(fixture.auth.count(), 1);

        fixture.network.withdraw(&record_name("S1"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fixture.auth.count(), 1);
    }

    #[tokio::test]
    async fn test_failed_re_resolution_drops_active_main() {
        let fixture = start();
        connect_to(&fixture, "S1", 5).await;

        let name = record_name("S1");
        fixture
            .network
            .script(&name, ScriptedResolution::Fail("host unreachable".into()));
        fixture.network.announce(&name, ip(5), 25610);

        let snapshot = wait_until(&fixture.handle, |s| s.role == StationRole::SubDisconnected).await;
        assert!(snapshot.last_error.as_deref().unwrap().contains("host unreachable"));
        assert_eq!(fixture.auth.count(), 1);

        // The fresh browse resolves the still published record again.
        let network = fixture.network.clone();
        eventually(move || network.resolve_count(&name) >= 3).await;
        assert_eq!(fixture.handle.role(), StationRole::SubDisconnected);
        assert_eq!(fixture.auth.count(), 1);
    }

    #[tokio::test]
    async fn test_failed_re_resolution_can_keep_active_main() {
        let mut config = test_config();
        config.discovery.failure_drops_active_main = false;
        let fixture = start_with(config);
        connect_to(&fixture, "S1", 5).await;

        let name = record_name("S1");
        fixture
            .network
            .script(&name, ScriptedResolution::Fail("host unreachable".into()));
        fixture.network.announce(&name, ip(5), 25610);

        let snapshot = wait_until(&fixture.handle, |s| s.last_error.is_some()).await;
        assert_eq!(snapshot.role, connected("10.0.0.5"));
        assert_eq!(fixture.auth.count(), 0);
    }

    #[tokio::test]
    async fn test_direct_change_from_connected_is_rejected() {
        let fixture = start();
        connect_to(&fixture, "S1", 5).await;

        let result = fixture.handle.become_main("S1").await;
        assert!(matches!(result, Err(StationError::RoleChangeRejected(_))));
        let result = fixture.handle.become_single_station().await;
        assert!(matches!(result, Err(StationError::RoleChangeRejected(_))));
        assert_eq!(fixture.handle.role(), connected("10.0.0.5"));

        let change = fixture.handle.become_sub().await.unwrap().unwrap();
        assert_eq!(change.current, StationRole::SubDisconnected);
        assert_eq!(fixture.auth.count(), 0);
    }

    #[tokio::test]
    async fn test_connected_role_cannot_be_requested() {
        let fixture = start();
        let result = fixture.handle.request_role(connected("10.0.0.5")).await;
        assert!(matches!(result, Err(StationError::InvalidRequest(_))));
        assert_eq!(fixture.handle.role(), StationRole::SubDisconnected);
    }

    #[tokio::test]
    async fn test_become_main_hosts_then_advertises() {
        let fixture = start();
        wait_until(&fixture.handle, |s| s.browsing).await;

        let change = fixture.handle.become_main("S1").await.unwrap().unwrap();
        assert_eq!(change.current, StationRole::Main { store_id: "S1".into() });

        let snapshot = wait_until(&fixture.handle, |s| s.advertising && s.host_running()).await;
        let port = snapshot.host_port.unwrap();
        assert_eq!(snapshot.label, format!("[MAIN] {}:{}", DEFAULT_APP_ID, port));
        assert!(!snapshot.browsing);

        let record = fixture.network.record(&record_name("S1")).unwrap();
        assert_eq!(record.port, port);
        assert_eq!(fixture.network.browser_count(), 0);
    }

    #[tokio::test]
    async fn test_become_main_twice_is_idempotent() {
        let fixture = start();
        fixture.handle.become_main("S1").await.unwrap();
        let first = wait_until(&fixture.handle, |s| s.advertising).await;

        assert!(fixture.handle.become_main("S1").await.unwrap().is_none());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(fixture.network.register_count(), 1);
        assert_eq!(fixture.handle.snapshot().host_port, first.host_port);
    }

    #[tokio::test]
    async fn test_switching_store_re_advertises() {
        let fixture = start();
        fixture.handle.become_main("S1").await.unwrap();
        let first = wait_until(&fixture.handle, |s| s.advertising).await;

        fixture.handle.become_main("S2").await.unwrap();
        let network = fixture.network.clone();
        eventually(move || network.record_names() == vec![record_name("S2")]).await;

        assert_eq!(fixture.network.register_count(), 2);
        assert_eq!(fixture.handle.snapshot().host_port, first.host_port);
    }

    #[tokio::test]
    async fn test_invalid_store_id_is_rejected() {
        let fixture = start();
        let result = fixture.handle.become_main("a:b").await;
        assert!(matches!(result, Err(StationError::InvalidConfig(_))));
        assert_eq!(fixture.handle.role(), StationRole::SubDisconnected);
    }

    #[tokio::test]
    async fn test_single_station_stops_everything() {
        let fixture = start();
        fixture.handle.become_main("S1").await.unwrap();
        wait_until(&fixture.handle, |s| s.advertising && s.host_running()).await;

        fixture.handle.become_single_station().await.unwrap();
        let snapshot = wait_until(&fixture.handle, |s| !s.advertising && !s.host_running()).await;

        assert_eq!(snapshot.role, StationRole::SingleStation);
        assert_eq!(snapshot.label, "Single Station");
        assert!(!snapshot.browsing);
        assert!(fixture.network.record_names().is_empty());
    }

    #[tokio::test]
    async fn test_back_to_sub_stops_hosting_and_browses() {
        let fixture = start();
        fixture.handle.become_main("S1").await.unwrap();
        wait_until(&fixture.handle, |s| s.advertising).await;

        fixture.handle.become_sub().await.unwrap();
        let snapshot =
            wait_until(&fixture.handle, |s| s.browsing && !s.advertising && !s.host_running()).await;

        assert_eq!(snapshot.role, StationRole::SubDisconnected);
        assert!(fixture.network.record_names().is_empty());
    }

    #[tokio::test]
    async fn test_role_history_has_no_consecutive_duplicates() {
        let fixture = start();
        let mut changes = fixture.handle.subscribe();
        let handle = &fixture.handle;

        handle.become_main("S1").await.unwrap();
        handle.become_main("S1").await.unwrap();
        handle.become_single_station().await.unwrap();
        handle.become_single_station().await.unwrap();
        handle.become_sub().await.unwrap();
        handle.become_sub().await.unwrap();
        handle.become_main("S2").await.unwrap();
        handle.become_main("S3").await.unwrap();
        handle.become_sub().await.unwrap();

        let seen = drain(&mut changes);
        let roles: Vec<StationRole> = seen.iter().map(|c| c.current.clone()).collect();
        assert_eq!(
            roles,
            vec![
                StationRole::Main { store_id: "S1".into() },
                StationRole::SingleStation,
                StationRole::SubDisconnected,
                StationRole::Main { store_id: "S2".into() },
                StationRole::Main { store_id: "S3".into() },
                StationRole::SubDisconnected,
            ]
        );
        for pair in seen.windows(2) {
            assert_ne!(pair[0].current, pair[1].current);
            assert_eq!(pair[0].current, pair[1].previous);
            assert!(pair[0].sequence < pair[1].sequence);
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        seen: Mutex<Vec<StationRole>>,
    }

    impl RoleObserver for RecordingObserver {
        fn on_role_changed(&self, change: &RoleChange) {
            self.seen.lock().unwrap().push(change.current.clone());
        }
    }

    #[tokio::test]
    async fn test_observers_are_notified_in_order() {
        let observer = Arc::new(RecordingObserver::default());
        let network = MemoryNetwork::new();
        let handle = StationCoordinator::new(test_config(), Arc::new(network.station(ip(9))))
            .with_observer(observer.clone())
            .start();

        handle.become_single_station().await.unwrap();
        handle.become_main("S1").await.unwrap();

        assert_eq!(
            *observer.seen.lock().unwrap(),
            vec![
                StationRole::SingleStation,
                StationRole::Main { store_id: "S1".into() },
            ]
        );
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_browse_failure_is_reported_and_retried() {
        let network = MemoryNetwork::new();
        network.fail_next_browses(1);
        let handle = StationCoordinator::new(test_config(), Arc::new(network.station(ip(9))))
            .start();

        let failed = wait_until(&handle, |s| s.last_error.is_some()).await;
        assert!(failed.last_error.as_deref().unwrap().contains("simulated browse failure"));
        assert_eq!(failed.role, StationRole::SubDisconnected);

        wait_until(&handle, |s| s.browsing).await;
        assert_eq!(network.browser_count(), 1);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_host_bind_failure_leaves_main_unadvertised() {
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = test_config();
        config.host.port = blocker.local_addr().unwrap().port();
        let fixture = start_with(config);

        fixture.handle.become_main("S1").await.unwrap();
        let snapshot = wait_until(&fixture.handle, |s| s.last_error.is_some()).await;

        assert!(snapshot.last_error.as_deref().unwrap().contains("already in use"));
        assert_eq!(snapshot.role, StationRole::Main { store_id: "S1".into() });
        assert!(!snapshot.host_running());
        assert!(fixture.network.record_names().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_main_request_retries_failed_bind() {
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = blocker.local_addr().unwrap().port();
        let mut config = test_config();
        config.host.port = port;
        let fixture = start_with(config);

        fixture.handle.become_main("S1").await.unwrap();
        wait_until(&fixture.handle, |s| s.last_error.is_some()).await;
        drop(blocker);

        assert!(fixture.handle.become_main("S1").await.unwrap().is_none());
        let snapshot = wait_until(&fixture.handle, |s| s.advertising && s.host_running()).await;

        assert_eq!(snapshot.host_port, Some(port));
        assert_eq!(fixture.network.record(&record_name("S1")).unwrap().port, port);
        assert_eq!(fixture.network.register_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_role_is_visible_once_request_returns() {
        let fixture = start();
        let main = StationRole::Main { store_id: "S1".into() };

        for round in 0..100 {
            let want = if round % 2 == 0 {
                StationRole::SingleStation
            } else {
                main.clone()
            };
            let change = fixture.handle.request_role(want.clone()).await.unwrap();
            assert_eq!(change.unwrap().current, want);
            assert_eq!(fixture.handle.role(), want);
            assert_eq!(fixture.handle.snapshot().role, want);
        }
    }

    #[tokio::test]
    async fn test_static_main_skips_browsing() {
        let mut config = test_config();
        config.discovery.static_main = Some(StaticMain {
            url: "http://192.168.1.20:25610/".into(),
            store_id: "S1".into(),
        });
        let fixture = start_with(config);

        let snapshot = wait_until(&fixture.handle, |s| s.role == connected("192.168.1.20")).await;
        let main = snapshot.main.unwrap();
        assert_eq!(main.url, "http://192.168.1.20:25610");
        assert_eq!(main.store_id, "S1");
        assert!(!snapshot.browsing);
        assert_eq!(fixture.network.browser_count(), 0);
    }

    #[tokio::test]
    async fn test_main_mode_needs_a_store_id() {
        let fixture = start();
        let result = fixture.handle.apply_mode(StationMode::Main).await;
        assert!(matches!(result, Err(StationError::InvalidRequest(_))));

        let change = fixture.handle.apply_mode(StationMode::Single).await.unwrap();
        assert_eq!(change.unwrap().current, StationRole::SingleStation);
    }

    #[tokio::test]
    async fn test_main_for_current_store_uses_provider() {
        let network = MemoryNetwork::new();
        let handle = StationCoordinator::new(test_config(), Arc::new(network.station(ip(9))))
            .with_store_ids(Arc::new(FixedStoreId("S7".into())))
            .start();

        let change = handle.become_main_for_current_store().await.unwrap().unwrap();
        assert_eq!(change.current, StationRole::Main { store_id: "S7".into() });
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_configured_main_mode_is_applied_at_start() {
        let mut config = test_config();
        config.station.mode = StationMode::Main;
        config.station.store_id = Some("S1".into());
        let fixture = start_with(config);

        wait_until(&fixture.handle, |s| s.advertising).await;
        assert_eq!(fixture.handle.role(), StationRole::Main { store_id: "S1".into() });
        assert!(fixture.network.record(&record_name("S1")).is_some());
    }

    #[tokio::test]
    async fn test_shutdown_discards_pending_work() {
        let fixture = start();
        wait_until(&fixture.handle, |s| s.browsing).await;
        fixture.network.script(&record_name("S1"), ScriptedResolution::Hang);
        fixture.network.announce(&record_name("S1"), ip(5), 25610);
        wait_until(&fixture.handle, |s| s.pending_resolutions == 1).await;

        fixture.handle.shutdown().await.unwrap();

        assert_eq!(fixture.network.browser_count(), 0);
        assert_eq!(fixture.auth.count(), 0);
        let snapshot = fixture.handle.snapshot();
        assert_eq!(snapshot.role, StationRole::SubDisconnected);
        assert_eq!(snapshot.pending_resolutions, 0);

        assert!(matches!(
            fixture.handle.become_main("S1").await,
            Err(StationError::ShuttingDown)
        ));
        fixture.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_while_main_releases_the_advertisement() {
        let fixture = start();
        fixture.handle.become_main("S1").await.unwrap();
        wait_until(&fixture.handle, |s| s.advertising).await;

        fixture.handle.shutdown().await.unwrap();

        assert!(fixture.network.record_names().is_empty());
        assert_eq!(fixture.handle.role(), StationRole::SubDisconnected);
    }
}
