//! # UDP Broadcast Discovery
//!
//! LAN discovery backend built on a single UDP socket shared by advertising
//! and browsing.
//!
//! ## Protocol
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Datagram Layout                                 │
//! │                                                                         │
//! │   ┌──────────┬─────────┬──────────────────────────────────────────┐    │
//! │   │ "SLNK"   │ version │ JSON body (tagged by "type")             │    │
//! │   │ 4 bytes  │ 1 byte  │                                          │    │
//! │   └──────────┴─────────┴──────────────────────────────────────────┘    │
//! │                                                                         │
//! │  MAIN                                    SUB                           │
//! │  ────                                    ───                           │
//! │  Announce (broadcast, every 2s) ═══════▶ record appears / refreshes    │
//! │                                 ◀═══════ Query (broadcast on browse)   │
//! │  Announce (unicast reply)       ───────▶                               │
//! │                                 ◀─────── ResolveRequest (unicast)      │
//! │  ResolveReply (unicast)         ───────▶ address = reply source        │
//! │  Goodbye (broadcast)            ═══════▶ record removed                │
//! │                                                                         │
//! │  A record not refreshed within the TTL (7s) is reported as removed.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{BrowseEvent, DiscoveredRecord, DiscoveryBackend, ResolvedAddress, ServiceRecord};
use crate::config::StationConfig;
use crate::error::{StationError, StationResult};

// =============================================================================
// Constants
// =============================================================================

/// Discovery message magic bytes for validation.
const DISCOVERY_MAGIC: &[u8; 4] = b"SLNK";

/// Protocol version for discovery messages.
const DISCOVERY_PROTOCOL_VERSION: u8 = 1;

/// Header length (magic + version).
const HEADER_LEN: usize = 5;

/// Receive buffer size.
const MAX_DATAGRAM_SIZE: usize = 2048;

/// Capacity of the browse event channel.
const BROWSE_CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// Wire Messages
// =============================================================================

/// Discovery datagram bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// A record is (still) advertised.
    Announce {
        name: String,
        service_type: String,
        domain: String,
        port: u16,
        device: String,
    },
    /// A record was withdrawn.
    Goodbye {
        name: String,
        service_type: String,
        domain: String,
    },
    /// Asks advertisers of `service_type` to announce now.
    Query { service_type: String },
    /// Asks the owner of `name` to confirm its address.
    ResolveRequest { request_id: Uuid, name: String },
    /// Answer to a [`WireMessage::ResolveRequest`].
    ResolveReply {
        request_id: Uuid,
        name: String,
        port: u16,
    },
}

/// Encodes a message with the discovery header.
pub fn encode(msg: &WireMessage) -> StationResult<Vec<u8>> {
    let body = serde_json::to_vec(msg)?;
    let mut datagram = Vec::with_capacity(HEADER_LEN + body.len());
    datagram.extend_from_slice(DISCOVERY_MAGIC);
    datagram.push(DISCOVERY_PROTOCOL_VERSION);
    datagram.extend_from_slice(&body);
    Ok(datagram)
}

/// Validates the header and decodes the body.
pub fn decode(data: &[u8]) -> StationResult<WireMessage> {
    if data.len() < HEADER_LEN || &data[0..4] != DISCOVERY_MAGIC {
        return Err(StationError::InvalidMessage("Invalid discovery magic".into()));
    }

    let version = data[4];
    if version != DISCOVERY_PROTOCOL_VERSION {
        return Err(StationError::InvalidMessage(format!(
            "Unsupported discovery protocol version: {}",
            version
        )));
    }

    Ok(serde_json::from_slice(&data[HEADER_LEN..])?)
}

// =============================================================================
// Settings
// =============================================================================

/// Configuration for the UDP backend.
#[derive(Debug, Clone)]
pub struct UdpSettings {
    /// Port every station binds and broadcasts to.
    pub port: u16,
    /// Destination of broadcast datagrams.
    pub broadcast_addr: IpAddr,
    /// Interval between announcements of the advertised record.
    pub announce_interval: Duration,
    /// Records not refreshed within this window are reported removed.
    pub record_ttl: Duration,
    /// Name carried in announcements, for logs on other stations.
    pub device_name: String,
}

impl Default for UdpSettings {
    fn default() -> Self {
        UdpSettings {
            port: 25611,
            broadcast_addr: IpAddr::V4(Ipv4Addr::BROADCAST),
            announce_interval: Duration::from_secs(2),
            record_ttl: Duration::from_secs(7),
            device_name: "POS Station".to_string(),
        }
    }
}

impl UdpSettings {
    pub fn from_config(config: &StationConfig) -> Self {
        UdpSettings {
            port: config.discovery.udp_port,
            broadcast_addr: IpAddr::V4(Ipv4Addr::BROADCAST),
            announce_interval: config.discovery.announce_interval(),
            record_ttl: config.discovery.record_ttl(),
            device_name: config.device.name.clone(),
        }
    }

    fn broadcast_target(&self) -> SocketAddr {
        SocketAddr::new(self.broadcast_addr, self.port)
    }
}

// =============================================================================
// Engine State
// =============================================================================

struct SeenRecord {
    record: DiscoveredRecord,
    last_seen: Instant,
}

struct BrowseState {
    service_type: String,
    tx: mpsc::Sender<BrowseEvent>,
    seen: HashMap<String, SeenRecord>,
}

struct PendingResolve {
    name: String,
    tx: oneshot::Sender<ResolvedAddress>,
}

/// Everything the receive loop and the trait methods share.
#[derive(Default)]
struct EngineState {
    advertised: Option<ServiceRecord>,
    browse: Option<BrowseState>,
    pending: HashMap<Uuid, PendingResolve>,
}

impl EngineState {
    /// Applies an incoming message; returns a unicast reply if one is due.
    fn handle(
        &mut self,
        msg: WireMessage,
        from: SocketAddr,
        now: Instant,
        device_name: &str,
    ) -> Option<(WireMessage, SocketAddr)> {
        match msg {
            WireMessage::Announce {
                name,
                service_type,
                domain,
                ..
            } => {
                if self.advertised.as_ref().is_some_and(|r| r.name == name) {
                    return None;
                }
                let browse = self.browse.as_mut()?;
                if browse.service_type != service_type {
                    return None;
                }

                match browse.seen.get_mut(&name) {
                    Some(seen) => {
                        seen.last_seen = now;
                        seen.record.origin = Some(from);
                    }
                    None => {
                        let record = DiscoveredRecord {
                            name: name.clone(),
                            service_type,
                            domain,
                            origin: Some(from),
                        };
                        // Only remembered once delivered; the next announce retries.
                        if let Err(e) = browse.tx.try_send(BrowseEvent::Appeared(record.clone())) {
                            debug!(record = %name, error = %e, "Browse consumer busy, deferring record");
                            return None;
                        }
                        debug!(record = %name, %from, "Record appeared");
                        browse.seen.insert(name, SeenRecord { record, last_seen: now });
                    }
                }
                None
            }

            WireMessage::Goodbye { name, .. } => {
                let browse = self.browse.as_mut()?;
                if browse.withdraw(&name) {
                    debug!(record = %name, "Record withdrawn");
                }
                None
            }

            WireMessage::Query { service_type } => {
                let record = self.advertised.as_ref()?;
                if record.service_type != service_type {
                    return None;
                }
                Some((announcement(record, device_name), from))
            }

            WireMessage::ResolveRequest { request_id, name } => {
                let record = self.advertised.as_ref()?;
                if record.name != name {
                    return None;
                }
                debug!(record = %name, %from, "Answering resolve request");
                Some((
                    WireMessage::ResolveReply {
                        request_id,
                        name,
                        port: record.port,
                    },
                    from,
                ))
            }

            WireMessage::ResolveReply {
                request_id,
                name,
                port,
            } => {
                let pending = self.pending.remove(&request_id)?;
                if pending.name != name {
                    warn!(expected = %pending.name, got = %name, "Resolve reply for wrong record");
                    return None;
                }
                let _ = pending.tx.send(ResolvedAddress { ip: from.ip(), port });
                None
            }
        }
    }

    /// Reports records past their TTL as removed and drops abandoned
    /// resolutions.
    fn sweep(&mut self, now: Instant, ttl: Duration) {
        self.pending.retain(|_, p| !p.tx.is_closed());

        let Some(browse) = self.browse.as_mut() else {
            return;
        };
        let expired: Vec<String> = browse
            .seen
            .iter()
            .filter(|(_, s)| now.duration_since(s.last_seen) > ttl)
            .map(|(name, _)| name.clone())
            .collect();

        for name in expired {
            if browse.withdraw(&name) {
                debug!(record = %name, "Record expired");
            }
        }
    }
}

impl BrowseState {
    /// Reports `name` as removed and forgets it. A record whose removal
    /// could not be delivered stays known so a later sweep reports it again.
    fn withdraw(&mut self, name: &str) -> bool {
        let Some(seen) = self.seen.get(name) else {
            return false;
        };
        if let Err(e) = self.tx.try_send(BrowseEvent::Removed(seen.record.clone())) {
            debug!(record = %name, error = %e, "Browse consumer busy, deferring removal");
            return false;
        }
        self.seen.remove(name);
        true
    }
}

fn announcement(record: &ServiceRecord, device_name: &str) -> WireMessage {
    WireMessage::Announce {
        name: record.name.clone(),
        service_type: record.service_type.clone(),
        domain: record.domain.clone(),
        port: record.port,
        device: device_name.to_string(),
    }
}

// =============================================================================
// UDP Discovery
// =============================================================================

struct Engine {
    socket: Arc<UdpSocket>,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

/// UDP broadcast [`DiscoveryBackend`].
///
/// The socket is bound on first use and kept until [`shutdown`].
///
/// [`shutdown`]: DiscoveryBackend::shutdown
pub struct UdpDiscovery {
    settings: UdpSettings,
    state: Arc<Mutex<EngineState>>,
    engine: tokio::sync::Mutex<Option<Engine>>,
}

fn lock(state: &Mutex<EngineState>) -> MutexGuard<'_, EngineState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl UdpDiscovery {
    pub fn new(settings: UdpSettings) -> Self {
        UdpDiscovery {
            settings,
            state: Arc::new(Mutex::new(EngineState::default())),
            engine: tokio::sync::Mutex::new(None),
        }
    }

    /// Returns the shared socket, binding it and starting the receive loop
    /// on first use.
    async fn socket(&self) -> StationResult<Arc<UdpSocket>> {
        let mut engine = self.engine.lock().await;
        if let Some(ref running) = *engine {
            return Ok(running.socket.clone());
        }

        let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.settings.port);
        let socket = UdpSocket::bind(bind_addr).await.map_err(|e| {
            StationError::DiscoveryStartFailure(format!(
                "Failed to bind discovery socket on port {}: {}",
                self.settings.port, e
            ))
        })?;
        socket.set_broadcast(true).map_err(|e| {
            StationError::DiscoveryStartFailure(format!("Failed to enable broadcast: {}", e))
        })?;

        info!(port = self.settings.port, "Discovery socket bound");

        let socket = Arc::new(socket);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(run_engine(
            socket.clone(),
            self.state.clone(),
            self.settings.clone(),
            shutdown_rx,
        ));

        *engine = Some(Engine {
            socket: socket.clone(),
            shutdown_tx,
            task,
        });
        Ok(socket)
    }

    async fn unregister_all(&self) {
        let name = lock(&self.state).advertised.as_ref().map(|r| r.name.clone());
        if let Some(name) = name {
            let _ = self.unregister(&name).await;
        }
    }

    async fn broadcast(&self, socket: &UdpSocket, msg: &WireMessage) -> StationResult<()> {
        let datagram = encode(msg)?;
        socket
            .send_to(&datagram, self.settings.broadcast_target())
            .await
            .map_err(|e| StationError::DiscoveryStartFailure(format!("Broadcast failed: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl DiscoveryBackend for UdpDiscovery {
    async fn register(&self, record: &ServiceRecord) -> StationResult<()> {
        let socket = self.socket().await?;
        lock(&self.state).advertised = Some(record.clone());

        let msg = announcement(record, &self.settings.device_name);
        if let Err(e) = self.broadcast(&socket, &msg).await {
            lock(&self.state).advertised = None;
            return Err(e);
        }
        Ok(())
    }

    async fn unregister(&self, name: &str) -> StationResult<()> {
        let withdrawn = {
            let mut state = lock(&self.state);
            if state.advertised.as_ref().is_some_and(|r| r.name == name) {
                state.advertised.take()
            } else {
                None
            }
        };

        if let Some(record) = withdrawn {
            let socket = self.socket().await?;
            let msg = WireMessage::Goodbye {
                name: record.name,
                service_type: record.service_type,
                domain: record.domain,
            };
            if let Err(e) = self.broadcast(&socket, &msg).await {
                debug!(error = %e, "Goodbye not sent");
            }
        }
        Ok(())
    }

    async fn browse(&self, service_type: &str) -> StationResult<mpsc::Receiver<BrowseEvent>> {
        let socket = self.socket().await?;
        let (tx, rx) = mpsc::channel(BROWSE_CHANNEL_CAPACITY);
        lock(&self.state).browse = Some(BrowseState {
            service_type: service_type.to_string(),
            tx,
            seen: HashMap::new(),
        });

        let query = WireMessage::Query {
            service_type: service_type.to_string(),
        };
        if let Err(e) = self.broadcast(&socket, &query).await {
            lock(&self.state).browse = None;
            return Err(e);
        }
        Ok(rx)
    }

    async fn stop_browse(&self) -> StationResult<()> {
        lock(&self.state).browse = None;
        Ok(())
    }

    async fn resolve(&self, record: &DiscoveredRecord) -> StationResult<ResolvedAddress> {
        let failure = |reason: String| StationError::ResolutionFailure {
            record: record.name.clone(),
            reason,
        };

        let origin = record
            .origin
            .ok_or_else(|| failure("record has no origin address".into()))?;
        let socket = self.socket().await.map_err(|e| failure(e.to_string()))?;

        let request_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        lock(&self.state).pending.insert(
            request_id,
            PendingResolve {
                name: record.name.clone(),
                tx,
            },
        );

        let request = encode(&WireMessage::ResolveRequest {
            request_id,
            name: record.name.clone(),
        })?;
        if let Err(e) = socket.send_to(&request, origin).await {
            lock(&self.state).pending.remove(&request_id);
            return Err(failure(e.to_string()));
        }

        rx.await.map_err(|_| failure("discovery stopped".into()))
    }

    async fn shutdown(&self) -> StationResult<()> {
        self.unregister_all().await;
        if let Some(engine) = self.engine.lock().await.take() {
            let _ = engine.shutdown_tx.send(()).await;
            if let Err(e) = engine.task.await {
                debug!(error = %e, "Discovery engine task ended abnormally");
            }
            info!("Discovery socket closed");
        }
        let mut state = lock(&self.state);
        state.browse = None;
        state.pending.clear();
        Ok(())
    }
}

/// Receive loop plus periodic announce and sweep.
async fn run_engine(
    socket: Arc<UdpSocket>,
    state: Arc<Mutex<EngineState>>,
    settings: UdpSettings,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let mut buf = [0u8; MAX_DATAGRAM_SIZE];
    let mut announce = tokio::time::interval(settings.announce_interval);
    let mut sweep = tokio::time::interval(settings.announce_interval);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Discovery engine shutting down");
                break;
            }
            result = socket.recv_from(&mut buf) => {
                let (len, from) = match result {
                    Ok(received) => received,
                    Err(e) => {
                        warn!(?e, "Error receiving discovery message");
                        continue;
                    }
                };
                let msg = match decode(&buf[..len]) {
                    Ok(msg) => msg,
                    Err(e) => {
                        debug!(%from, error = %e, "Ignoring datagram");
                        continue;
                    }
                };
                let reply = {
                    let mut state = lock(&state);
                    state.handle(msg, from, Instant::now(), &settings.device_name)
                };
                if let Some((reply, to)) = reply {
                    send_message(&socket, &reply, to).await;
                }
            }
            _ = announce.tick() => {
                let msg = {
                    let state = lock(&state);
                    state.advertised.as_ref().map(|r| announcement(r, &settings.device_name))
                };
                if let Some(msg) = msg {
                    send_message(&socket, &msg, settings.broadcast_target()).await;
                }
            }
            _ = sweep.tick() => {
                lock(&state).sweep(Instant::now(), settings.record_ttl);
            }
        }
    }
}

async fn send_message(socket: &UdpSocket, msg: &WireMessage, to: SocketAddr) {
    match encode(msg) {
        Ok(datagram) => {
            if let Err(e) = socket.send_to(&datagram, to).await {
                warn!(?e, %to, "Failed to send discovery message");
            }
        }
        Err(e) => warn!(error = %e, "Failed to encode discovery message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAME: &str = "q8ctuHjYpheAKBA3:S1";

    fn from(last: u8) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)), 25611)
    }

    fn announce(name: &str) -> WireMessage {
        WireMessage::Announce {
            name: name.into(),
            service_type: "_http._tcp".into(),
            domain: "local".into(),
            port: 25610,
            device: "Register 1".into(),
        }
    }

    fn browsing() -> (EngineState, mpsc::Receiver<BrowseEvent>) {
        browsing_with_capacity(16)
    }

    fn browsing_with_capacity(capacity: usize) -> (EngineState, mpsc::Receiver<BrowseEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        let state = EngineState {
            browse: Some(BrowseState {
                service_type: "_http._tcp".into(),
                tx,
                seen: HashMap::new(),
            }),
            ..Default::default()
        };
        (state, rx)
    }

    fn advertising() -> EngineState {
        EngineState {
            advertised: Some(ServiceRecord {
                name: NAME.into(),
                service_type: "_http._tcp".into(),
                domain: "local".into(),
                port: 25610,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_codec() {
        let msg = announce(NAME);
        let datagram = encode(&msg).unwrap();
        assert_eq!(&datagram[0..4], DISCOVERY_MAGIC);
        assert_eq!(datagram[4], DISCOVERY_PROTOCOL_VERSION);
        assert_eq!(decode(&datagram).unwrap(), msg);

        let body = String::from_utf8(datagram[HEADER_LEN..].to_vec()).unwrap();
        assert!(body.contains(r#""type":"announce""#));
    }

    #[test]
    fn test_decode_rejects_foreign_datagrams() {
        assert!(decode(b"TPOS\x01{}").is_err());
        assert!(decode(b"SLN").is_err());

        let mut datagram = encode(&announce(NAME)).unwrap();
        datagram[4] = 9;
        assert!(matches!(decode(&datagram), Err(StationError::InvalidMessage(_))));
    }

    #[tokio::test]
    async fn test_announce_reports_each_record_once() {
        let (mut state, mut rx) = browsing();
        let now = Instant::now();

        assert!(state.handle(announce(NAME), from(5), now, "sub").is_none());
        state.handle(announce(NAME), from(5), now, "sub");

        match rx.try_recv().unwrap() {
            BrowseEvent::Appeared(record) => {
                assert_eq!(record.name, NAME);
                assert_eq!(record.origin, Some(from(5)));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_goodbye_and_expiry_remove_records() {
        let (mut state, mut rx) = browsing();
        let start = Instant::now();
        let ttl = Duration::from_secs(7);

        state.handle(announce(NAME), from(5), start, "sub");
        state.handle(announce("other:S2"), from(6), start, "sub");
        let _ = rx.try_recv();
        let _ = rx.try_recv();

        let goodbye = WireMessage::Goodbye {
            name: NAME.into(),
            service_type: "_http._tcp".into(),
            domain: "local".into(),
        };
        state.handle(goodbye, from(5), start, "sub");
        assert!(matches!(rx.try_recv().unwrap(), BrowseEvent::Removed(r) if r.name == NAME));

        state.sweep(start + Duration::from_secs(5), ttl);
        assert!(rx.try_recv().is_err());
        state.sweep(start + Duration::from_secs(8), ttl);
        assert!(matches!(rx.try_recv().unwrap(), BrowseEvent::Removed(r) if r.name == "other:S2"));
    }

    #[tokio::test]
    async fn test_busy_consumer_gets_record_on_next_announce() {
        let (mut state, mut rx) = browsing_with_capacity(1);
        let now = Instant::now();

        state.handle(announce("other:S2"), from(6), now, "sub");
        state.handle(announce(NAME), from(5), now, "sub");
        assert!(matches!(rx.try_recv().unwrap(), BrowseEvent::Appeared(r) if r.name == "other:S2"));
        assert!(rx.try_recv().is_err());

        state.handle(announce(NAME), from(5), now, "sub");
        assert!(matches!(rx.try_recv().unwrap(), BrowseEvent::Appeared(r) if r.name == NAME));
        state.handle(announce(NAME), from(5), now, "sub");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_busy_consumer_gets_removal_on_later_sweep() {
        let (mut state, mut rx) = browsing_with_capacity(1);
        let start = Instant::now();
        let ttl = Duration::from_secs(7);

        state.handle(announce(NAME), from(5), start, "sub");
        let _ = rx.try_recv();
        state.handle(announce("other:S2"), from(6), start, "sub");

        let goodbye = WireMessage::Goodbye {
            name: NAME.into(),
            service_type: "_http._tcp".into(),
            domain: "local".into(),
        };
        state.handle(goodbye, from(5), start, "sub");
        assert!(matches!(rx.try_recv().unwrap(), BrowseEvent::Appeared(r) if r.name == "other:S2"));
        assert!(rx.try_recv().is_err());

        state.sweep(start + Duration::from_secs(8), ttl);
        let first = match rx.try_recv().unwrap() {
            BrowseEvent::Removed(r) => r.name,
            other => panic!("unexpected event: {:?}", other),
        };
        state.sweep(start + Duration::from_secs(9), ttl);
        let second = match rx.try_recv().unwrap() {
            BrowseEvent::Removed(r) => r.name,
            other => panic!("unexpected event: {:?}", other),
        };

        let mut removed = vec![first, second];
        removed.sort();
        assert_eq!(removed, vec![NAME.to_string(), "other:S2".to_string()]);
        assert!(state.browse.as_ref().unwrap().seen.is_empty());
    }

    #[tokio::test]
    async fn test_advertiser_answers_query_and_resolve() {
        let mut state = advertising();
        let now = Instant::now();

        let query = WireMessage::Query {
            service_type: "_http._tcp".into(),
        };
        let (reply, to) = state.handle(query, from(6), now, "main").unwrap();
        assert!(matches!(reply, WireMessage::Announce { ref name, .. } if name == NAME));
        assert_eq!(to, from(6));

        let request_id = Uuid::new_v4();
        let request = WireMessage::ResolveRequest {
            request_id,
            name: NAME.into(),
        };
        let (reply, _) = state.handle(request, from(6), now, "main").unwrap();
        assert_eq!(
            reply,
            WireMessage::ResolveReply {
                request_id,
                name: NAME.into(),
                port: 25610
            }
        );

        let other = WireMessage::ResolveRequest {
            request_id,
            name: "q8ctuHjYpheAKBA3:S2".into(),
        };
        assert!(state.handle(other, from(6), now, "main").is_none());
    }

    #[tokio::test]
    async fn test_resolve_reply_completes_pending_request() {
        let mut state = EngineState::default();
        let request_id = Uuid::new_v4();
        let (tx, mut rx) = oneshot::channel();
        state.pending.insert(
            request_id,
            PendingResolve {
                name: NAME.into(),
                tx,
            },
        );

        let reply = WireMessage::ResolveReply {
            request_id,
            name: NAME.into(),
            port: 25610,
        };
        state.handle(reply, from(5), Instant::now(), "sub");

        let resolved = rx.try_recv().unwrap();
        assert_eq!(resolved.socket_addr(), SocketAddr::new(from(5).ip(), 25610));
        assert!(state.pending.is_empty());
    }

    #[tokio::test]
    async fn test_own_announcements_are_ignored() {
        let (mut state, mut rx) = browsing();
        state.advertised = advertising().advertised;
        state.handle(announce(NAME), from(5), Instant::now(), "main");
        assert!(rx.try_recv().is_err());
    }
}
