//! # Discovery Listener
//!
//! Actor owning the two discovery capabilities of a station.
//!
//! ## Capability Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 Advertise / Browse (independent)                        │
//! │                                                                         │
//! │   ┌─────────┐  start   ┌─────────┐  ok    ┌─────────┐                  │
//! │   │ Stopped │ ───────▶ │Starting │ ─────▶ │ Active  │                  │
//! │   └─────────┘          └────┬────┘        └────┬────┘                  │
//! │        ▲                    │ err              │ stop                  │
//! │        │                    ▼                  │                       │
//! │        │              ┌──────────┐  backoff    │                       │
//! │        │              │ Retrying │ ──────────▶ Starting               │
//! │        │              └──────────┘                                    │
//! │        └────────────────────── stop ───────────┘                       │
//! │                                                                         │
//! │  start while Active/Retrying → no-op                                   │
//! │  stop while Stopped          → no-op                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Commands are fire-and-forget; results come back to the coordinator as
//! [`DiscoveryEvent`]s.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use stationlink_core::{ServiceName, DEFAULT_APP_ID, SERVICE_DOMAIN, SERVICE_TYPE};

use super::{BrowseEvent, DiscoveredRecord, DiscoveryBackend, ServiceRecord};
use crate::config::StationConfig;
use crate::error::{StationError, StationResult};

// =============================================================================
// Settings
// =============================================================================

/// What the listener advertises and browses for.
#[derive(Debug, Clone)]
pub struct ListenerSettings {
    pub app_id: String,
    pub service_type: String,
    pub domain: String,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        ListenerSettings {
            app_id: DEFAULT_APP_ID.to_string(),
            service_type: SERVICE_TYPE.to_string(),
            domain: SERVICE_DOMAIN.to_string(),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl ListenerSettings {
    pub fn from_config(config: &StationConfig) -> Self {
        ListenerSettings {
            app_id: config.station.app_id.clone(),
            service_type: config.discovery.service_type.clone(),
            domain: config.discovery.domain.clone(),
            initial_backoff: config.discovery.retry_initial_backoff(),
            max_backoff: config.discovery.retry_max_backoff(),
        }
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

// =============================================================================
// Events
// =============================================================================

/// One of the two independent discovery capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Advertise,
    Browse,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Advertise => write!(f, "advertise"),
            Capability::Browse => write!(f, "browse"),
        }
    }
}

/// Notifications from the listener to the coordinator.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// A record named `"<appID>:<storeID>"` for this deployment appeared.
    MainAppeared {
        record: DiscoveredRecord,
        name: ServiceName,
    },

    /// A previously reported main record disappeared.
    MainRemoved { record: DiscoveredRecord },

    /// A capability became active.
    Started(Capability),

    /// A capability stopped.
    Stopped(Capability),

    /// A capability failed to start. `retry_in` is `None` when the failure
    /// will not be retried (e.g. an invalid store id).
    StartFailed {
        capability: Capability,
        reason: String,
        retry_in: Option<Duration>,
    },
}

// =============================================================================
// Commands & Handle
// =============================================================================

#[derive(Debug)]
enum ListenerCommand {
    Advertise { store_id: String, port: u16 },
    StopAdvertise,
    Browse { fresh: bool },
    StopBrowse,
    Retry(Capability),
    BrowseEnded { generation: u64 },
    Shutdown,
}

/// Handle for controlling the discovery listener.
///
/// Every method returns immediately.
#[derive(Clone)]
pub struct ListenerHandle {
    cmd_tx: mpsc::UnboundedSender<ListenerCommand>,
}

impl ListenerHandle {
    fn send(&self, cmd: ListenerCommand) -> StationResult<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| StationError::ChannelError("Discovery listener stopped".into()))
    }

    /// Advertises `"<appID>:<store_id>"` on `port`, replacing any record
    /// advertised for another store.
    pub fn advertise(&self, store_id: impl Into<String>, port: u16) -> StationResult<()> {
        self.send(ListenerCommand::Advertise {
            store_id: store_id.into(),
            port,
        })
    }

    pub fn stop_advertise(&self) -> StationResult<()> {
        self.send(ListenerCommand::StopAdvertise)
    }

    /// Starts browsing. No-op while already browsing.
    pub fn browse(&self) -> StationResult<()> {
        self.send(ListenerCommand::Browse { fresh: false })
    }

    /// Restarts browsing so that every visible record is reported again.
    pub fn restart_browse(&self) -> StationResult<()> {
        self.send(ListenerCommand::Browse { fresh: true })
    }

    pub fn stop_browse(&self) -> StationResult<()> {
        self.send(ListenerCommand::StopBrowse)
    }

    /// Stops both capabilities and ends the actor.
    pub fn shutdown(&self) -> StationResult<()> {
        self.send(ListenerCommand::Shutdown)
    }
}

// =============================================================================
// Discovery Listener
// =============================================================================

struct ActiveBrowse {
    generation: u64,
    task: JoinHandle<()>,
}

/// The listener actor. Create with [`DiscoveryListener::spawn`].
pub struct DiscoveryListener {
    backend: Arc<dyn DiscoveryBackend>,
    settings: ListenerSettings,
    events_tx: mpsc::Sender<DiscoveryEvent>,
    cmd_tx: mpsc::UnboundedSender<ListenerCommand>,
    cmd_rx: mpsc::UnboundedReceiver<ListenerCommand>,

    /// Record that should be advertised; `None` while advertise is stopped.
    wanted_advert: Option<ServiceRecord>,
    /// Record actually registered with the backend.
    advertised: Option<ServiceRecord>,
    wanted_browse: bool,
    browse: Option<ActiveBrowse>,
    browse_generation: u64,

    advertise_backoff: ExponentialBackoff,
    browse_backoff: ExponentialBackoff,
    retry_scheduled: HashSet<Capability>,
}

impl DiscoveryListener {
    /// Spawns the listener task.
    pub fn spawn(
        backend: Arc<dyn DiscoveryBackend>,
        settings: ListenerSettings,
        events_tx: mpsc::Sender<DiscoveryEvent>,
    ) -> (ListenerHandle, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let listener = DiscoveryListener {
            backend,
            advertise_backoff: settings.create_backoff(),
            browse_backoff: settings.create_backoff(),
            settings,
            events_tx,
            cmd_tx: cmd_tx.clone(),
            cmd_rx,
            wanted_advert: None,
            advertised: None,
            wanted_browse: false,
            browse: None,
            browse_generation: 0,
            retry_scheduled: HashSet::new(),
        };

        let task = tokio::spawn(listener.run());
        (ListenerHandle { cmd_tx }, task)
    }

    async fn run(mut self) {
        debug!(app_id = %self.settings.app_id, "Discovery listener started");

        while let Some(cmd) = self.cmd_rx.recv().await {
            match cmd {
                ListenerCommand::Advertise { store_id, port } => self.advertise(store_id, port).await,
                ListenerCommand::StopAdvertise => self.stop_advertise().await,
                ListenerCommand::Browse { fresh } => self.browse(fresh).await,
                ListenerCommand::StopBrowse => self.stop_browse().await,
                ListenerCommand::Retry(capability) => self.retry(capability).await,
                ListenerCommand::BrowseEnded { generation } => self.browse_ended(generation).await,
                ListenerCommand::Shutdown => break,
            }
        }

        self.stop_browse().await;
        self.stop_advertise().await;
        if let Err(e) = self.backend.shutdown().await {
            warn!(error = %e, "Discovery backend shutdown failed");
        }
        debug!("Discovery listener stopped");
    }

    async fn emit(&self, event: DiscoveryEvent) {
        if self.events_tx.send(event).await.is_err() {
            debug!("Coordinator gone, dropping discovery event");
        }
    }

    // =========================================================================
    // Advertise
    // =========================================================================

    async fn advertise(&mut self, store_id: String, port: u16) {
        let name = match ServiceName::new(self.settings.app_id.as_str(), store_id) {
            Ok(name) => name,
            Err(e) => {
                warn!(error = %e, "Cannot advertise main station");
                self.emit(DiscoveryEvent::StartFailed {
                    capability: Capability::Advertise,
                    reason: e.to_string(),
                    retry_in: None,
                })
                .await;
                return;
            }
        };

        let record = ServiceRecord {
            name: name.to_string(),
            service_type: self.settings.service_type.clone(),
            domain: self.settings.domain.clone(),
            port,
        };

        if self.wanted_advert.as_ref() == Some(&record) {
            debug!(record = %record.name, "Already advertising");
            return;
        }

        self.wanted_advert = Some(record);
        self.advertise_backoff.reset();
        self.try_advertise().await;
    }

    async fn try_advertise(&mut self) {
        let Some(record) = self.wanted_advert.clone() else {
            return;
        };
        if self.advertised.as_ref() == Some(&record) {
            return;
        }

        if let Some(old) = self.advertised.take() {
            info!(record = %old.name, "Withdrawing previous advertisement");
            if let Err(e) = self.backend.unregister(&old.name).await {
                warn!(record = %old.name, error = %e, "Failed to withdraw advertisement");
            }
        }

        match self.backend.register(&record).await {
            Ok(()) => {
                info!(record = %record.name, port = record.port, "Advertising main station");
                self.advertised = Some(record);
                self.advertise_backoff.reset();
                self.emit(DiscoveryEvent::Started(Capability::Advertise)).await;
            }
            Err(e) => self.schedule_retry(Capability::Advertise, e).await,
        }
    }

    async fn stop_advertise(&mut self) {
        self.wanted_advert = None;
        if let Some(record) = self.advertised.take() {
            if let Err(e) = self.backend.unregister(&record.name).await {
                warn!(record = %record.name, error = %e, "Failed to withdraw advertisement");
            }
            info!(record = %record.name, "Stopped advertising");
            self.emit(DiscoveryEvent::Stopped(Capability::Advertise)).await;
        }
    }

    // =========================================================================
    // Browse
    // =========================================================================

    async fn browse(&mut self, fresh: bool) {
        self.wanted_browse = true;
        if self.browse.is_some() {
            if !fresh {
                debug!("Already browsing");
                return;
            }
            self.end_browse().await;
        }
        self.browse_backoff.reset();
        self.try_browse().await;
    }

    async fn try_browse(&mut self) {
        if !self.wanted_browse || self.browse.is_some() {
            return;
        }

        match self.backend.browse(&self.settings.service_type).await {
            Ok(rx) => {
                self.browse_generation += 1;
                let generation = self.browse_generation;
                let task = tokio::spawn(forward_browse(
                    rx,
                    self.settings.app_id.clone(),
                    self.events_tx.clone(),
                    self.cmd_tx.clone(),
                    generation,
                ));
                self.browse = Some(ActiveBrowse { generation, task });
                self.browse_backoff.reset();
                info!(service_type = %self.settings.service_type, "Browsing for main station");
                self.emit(DiscoveryEvent::Started(Capability::Browse)).await;
            }
            Err(e) => self.schedule_retry(Capability::Browse, e).await,
        }
    }

    async fn end_browse(&mut self) {
        if let Some(active) = self.browse.take() {
            active.task.abort();
            if let Err(e) = self.backend.stop_browse().await {
                warn!(error = %e, "Failed to stop browsing");
            }
            debug!("Stopped browsing");
            self.emit(DiscoveryEvent::Stopped(Capability::Browse)).await;
        }
    }

    async fn stop_browse(&mut self) {
        self.wanted_browse = false;
        self.end_browse().await;
    }

    async fn browse_ended(&mut self, generation: u64) {
        if self.browse.as_ref().map(|b| b.generation) != Some(generation) {
            return;
        }
        self.browse = None;
        warn!("Browse stream closed by backend");
        self.emit(DiscoveryEvent::Stopped(Capability::Browse)).await;

        if self.wanted_browse {
            let err = StationError::DiscoveryStartFailure("browse stream closed".into());
            self.schedule_retry(Capability::Browse, err).await;
        }
    }

    // =========================================================================
    // Retry
    // =========================================================================

    async fn schedule_retry(&mut self, capability: Capability, err: StationError) {
        let delay = match capability {
            Capability::Advertise => self.advertise_backoff.next_backoff(),
            Capability::Browse => self.browse_backoff.next_backoff(),
        };
        warn!(%capability, error = %err, ?delay, "Discovery failed to start");

        self.emit(DiscoveryEvent::StartFailed {
            capability,
            reason: err.to_string(),
            retry_in: delay,
        })
        .await;

        if let Some(delay) = delay {
            if self.retry_scheduled.insert(capability) {
                let cmd_tx = self.cmd_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = cmd_tx.send(ListenerCommand::Retry(capability));
                });
            }
        }
    }

    async fn retry(&mut self, capability: Capability) {
        self.retry_scheduled.remove(&capability);
        match capability {
            Capability::Advertise => self.try_advertise().await,
            Capability::Browse => self.try_browse().await,
        }
    }
}

/// Filters a backend browse stream down to this deployment's main records.
async fn forward_browse(
    mut rx: mpsc::Receiver<BrowseEvent>,
    app_id: String,
    events_tx: mpsc::Sender<DiscoveryEvent>,
    cmd_tx: mpsc::UnboundedSender<ListenerCommand>,
    generation: u64,
) {
    let mut matched: HashSet<String> = HashSet::new();

    while let Some(event) = rx.recv().await {
        let forwarded = match event {
            BrowseEvent::Appeared(record) => match ServiceName::parse(&record.name, &app_id) {
                Some(name) => {
                    debug!(record = %record.name, "Main station record appeared");
                    matched.insert(record.name.clone());
                    DiscoveryEvent::MainAppeared { record, name }
                }
                None => {
                    debug!(record = %record.name, "Ignoring unrelated record");
                    continue;
                }
            },
            BrowseEvent::Removed(record) => {
                if !matched.remove(&record.name) {
                    continue;
                }
                debug!(record = %record.name, "Main station record removed");
                DiscoveryEvent::MainRemoved { record }
            }
        };

        if events_tx.send(forwarded).await.is_err() {
            return;
        }
    }

    let _ = cmd_tx.send(ListenerCommand::BrowseEnded { generation });
}
