//! # In-Memory Discovery
//!
//! A shared, in-process network segment. Every [`MemoryDiscovery`] attached
//! to the same [`MemoryNetwork`] sees the others' records. The network can
//! also inject foreign records, script resolution outcomes, and fail starts,
//! which makes coordinator behavior testable without sockets.
//!
//! ```text
//!            MemoryNetwork (records, browsers, scripts)
//!              ▲              ▲               ▲
//!   station(10.0.0.5)   station(10.0.0.6)   announce("app:S1", ...)
//! ```

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use stationlink_core::{DEFAULT_HOST_PORT, SERVICE_DOMAIN, SERVICE_TYPE};

use super::{BrowseEvent, DiscoveredRecord, DiscoveryBackend, ResolvedAddress, ServiceRecord};
use crate::error::{StationError, StationResult};

/// Capacity of each browser's event channel.
const BROWSE_CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// Scripted Resolution
// =============================================================================

/// How a resolution of a given record name should end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedResolution {
    /// Succeed immediately with this address.
    Address(IpAddr),
    /// Fail immediately.
    Fail(String),
    /// Never complete.
    Hang,
    /// Succeed after a delay.
    Delayed { after: Duration, ip: IpAddr },
}

// =============================================================================
// Network State
// =============================================================================

struct Entry {
    record: ServiceRecord,
    ip: IpAddr,
    /// Station that registered it; `None` for injected records.
    owner: Option<u64>,
}

impl Entry {
    fn discovered(&self) -> DiscoveredRecord {
        DiscoveredRecord {
            name: self.record.name.clone(),
            service_type: self.record.service_type.clone(),
            domain: self.record.domain.clone(),
            origin: Some(SocketAddr::new(self.ip, self.record.port)),
        }
    }
}

struct Browser {
    station: u64,
    service_type: String,
    tx: mpsc::Sender<BrowseEvent>,
}

#[derive(Default)]
struct NetworkState {
    next_station: u64,
    records: HashMap<String, Entry>,
    browsers: Vec<Browser>,
    scripts: HashMap<String, ScriptedResolution>,
    resolve_calls: HashMap<String, usize>,
    register_calls: usize,
    fail_registers: usize,
    fail_browses: usize,
}

impl NetworkState {
    fn notify(&mut self, entry: &Entry, appeared: bool) {
        self.browsers.retain(|b| !b.tx.is_closed());
        for browser in &self.browsers {
            if browser.service_type != entry.record.service_type || Some(browser.station) == entry.owner {
                continue;
            }
            let event = if appeared {
                BrowseEvent::Appeared(entry.discovered())
            } else {
                BrowseEvent::Removed(entry.discovered())
            };
            if browser.tx.try_send(event).is_err() {
                debug!(station = browser.station, "Dropping browse event for slow browser");
            }
        }
    }
}

// =============================================================================
// Memory Network
// =============================================================================

/// The shared segment. Cheap to clone.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attaches a station with address `ip`.
    pub fn station(&self, ip: IpAddr) -> MemoryDiscovery {
        let mut state = self.lock();
        state.next_station += 1;
        MemoryDiscovery {
            network: self.clone(),
            station: state.next_station,
            ip,
        }
    }

    /// Publishes a record that no attached station owns.
    ///
    /// Publishing an existing name again is reported to browsers as a fresh
    /// appearance.
    pub fn announce(&self, name: &str, ip: IpAddr, port: u16) {
        let entry = Entry {
            record: ServiceRecord {
                name: name.to_string(),
                service_type: SERVICE_TYPE.to_string(),
                domain: SERVICE_DOMAIN.to_string(),
                port,
            },
            ip,
            owner: None,
        };
        let mut state = self.lock();
        state.notify(&entry, true);
        state.records.insert(name.to_string(), entry);
    }

    /// Removes a record, whoever owns it.
    pub fn withdraw(&self, name: &str) {
        let mut state = self.lock();
        if let Some(entry) = state.records.remove(name) {
            state.notify(&entry, false);
        }
    }

    /// Fixes the outcome of future resolutions of `name`.
    pub fn script(&self, name: &str, outcome: ScriptedResolution) {
        self.lock().scripts.insert(name.to_string(), outcome);
    }

    /// Number of resolutions attempted for `name`.
    pub fn resolve_count(&self, name: &str) -> usize {
        self.lock().resolve_calls.get(name).copied().unwrap_or(0)
    }

    /// Number of successful `register` calls across all stations.
    pub fn register_count(&self) -> usize {
        self.lock().register_calls
    }

    /// The record currently published under `name`.
    pub fn record(&self, name: &str) -> Option<ServiceRecord> {
        self.lock().records.get(name).map(|e| e.record.clone())
    }

    /// Names of all published records, sorted.
    pub fn record_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().records.keys().cloned().collect();
        names.sort();
        names
    }

    /// Makes the next `count` registrations fail.
    pub fn fail_next_registers(&self, count: usize) {
        self.lock().fail_registers = count;
    }

    /// Makes the next `count` browse starts fail.
    pub fn fail_next_browses(&self, count: usize) {
        self.lock().fail_browses = count;
    }

    /// Number of live browsers.
    pub fn browser_count(&self) -> usize {
        let mut state = self.lock();
        state.browsers.retain(|b| !b.tx.is_closed());
        state.browsers.len()
    }
}

// =============================================================================
// Memory Discovery
// =============================================================================

/// One station's view of a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryDiscovery {
    network: MemoryNetwork,
    station: u64,
    ip: IpAddr,
}

impl MemoryDiscovery {
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

#[async_trait]
impl DiscoveryBackend for MemoryDiscovery {
    async fn register(&self, record: &ServiceRecord) -> StationResult<()> {
        let mut state = self.network.lock();
        if state.fail_registers > 0 {
            state.fail_registers -= 1;
            return Err(StationError::DiscoveryStartFailure(
                "simulated register failure".into(),
            ));
        }
        state.register_calls += 1;

        let entry = Entry {
            record: record.clone(),
            ip: self.ip,
            owner: Some(self.station),
        };
        state.notify(&entry, true);
        state.records.insert(record.name.clone(), entry);
        Ok(())
    }

    async fn unregister(&self, name: &str) -> StationResult<()> {
        let mut state = self.network.lock();
        let owned = state
            .records
            .get(name)
            .is_some_and(|e| e.owner == Some(self.station));
        if owned {
            if let Some(entry) = state.records.remove(name) {
                state.notify(&entry, false);
            }
        }
        Ok(())
    }

    async fn browse(&self, service_type: &str) -> StationResult<mpsc::Receiver<BrowseEvent>> {
        let mut state = self.network.lock();
        if state.fail_browses > 0 {
            state.fail_browses -= 1;
            return Err(StationError::DiscoveryStartFailure(
                "simulated browse failure".into(),
            ));
        }

        let station = self.station;
        state.browsers.retain(|b| b.station != station);

        let (tx, rx) = mpsc::channel(BROWSE_CHANNEL_CAPACITY);
        for entry in state.records.values() {
            if entry.record.service_type == service_type && entry.owner != Some(station) {
                let _ = tx.try_send(BrowseEvent::Appeared(entry.discovered()));
            }
        }
        state.browsers.push(Browser {
            station,
            service_type: service_type.to_string(),
            tx,
        });
        Ok(rx)
    }

    async fn stop_browse(&self) -> StationResult<()> {
        let station = self.station;
        self.network.lock().browsers.retain(|b| b.station != station);
        Ok(())
    }

    async fn resolve(&self, record: &DiscoveredRecord) -> StationResult<ResolvedAddress> {
        let (outcome, port) = {
            let mut state = self.network.lock();
            *state.resolve_calls.entry(record.name.clone()).or_default() += 1;

            let published = state.records.get(&record.name);
            let port = published.map_or(DEFAULT_HOST_PORT, |e| e.record.port);
            let outcome = match state.scripts.get(&record.name) {
                Some(script) => Some(script.clone()),
                None => published.map(|e| ScriptedResolution::Address(e.ip)),
            };
            (outcome, port)
        };

        match outcome {
            Some(ScriptedResolution::Address(ip)) => Ok(ResolvedAddress { ip, port }),
            Some(ScriptedResolution::Fail(reason)) => Err(StationError::ResolutionFailure {
                record: record.name.clone(),
                reason,
            }),
            Some(ScriptedResolution::Hang) => std::future::pending().await,
            Some(ScriptedResolution::Delayed { after, ip }) => {
                tokio::time::sleep(after).await;
                Ok(ResolvedAddress { ip, port })
            }
            None => Err(StationError::ResolutionFailure {
                record: record.name.clone(),
                reason: "record is not published".into(),
            }),
        }
    }

    async fn shutdown(&self) -> StationResult<()> {
        let station = self.station;
        let mut state = self.network.lock();
        state.browsers.retain(|b| b.station != station);

        let owned: Vec<String> = state
            .records
            .iter()
            .filter(|(_, e)| e.owner == Some(station))
            .map(|(name, _)| name.clone())
            .collect();
        for name in owned {
            if let Some(entry) = state.records.remove(&name) {
                state.notify(&entry, false);
            }
        }
        Ok(())
    }
}
