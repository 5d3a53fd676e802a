//! # Discovery Module
//!
//! Advertising a main station on the LAN and browsing for one.
//!
//! ## Layers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Discovery Layers                                │
//! │                                                                         │
//! │  Coordinator                                                           │
//! │      │ advertise / browse commands        ▲ DiscoveryEvent            │
//! │      ▼                                    │ (MainAppeared, ...)       │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │ DiscoveryListener (actor)                                        │  │
//! │  │  • idempotent start/stop of each capability                      │  │
//! │  │  • filters names through ServiceName::parse                      │  │
//! │  │  • retries failed starts with exponential backoff                │  │
//! │  └──────────────────────────────┬───────────────────────────────────┘  │
//! │                                 │ DiscoveryBackend trait               │
//! │             ┌───────────────────┴───────────────────┐                  │
//! │             ▼                                       ▼                  │
//! │  ┌──────────────────────┐              ┌──────────────────────────┐   │
//! │  │ UdpDiscovery         │              │ MemoryDiscovery          │   │
//! │  │ LAN broadcast +      │              │ in-process segment,      │   │
//! │  │ unicast resolve      │              │ scriptable resolution    │   │
//! │  └──────────────────────┘              └──────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The backend reports every record of the browsed type. Deciding which
//! ones are main stations of this deployment is the listener's job.

mod listener;
pub mod memory;
pub mod udp;

use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::StationResult;

pub use listener::{
    Capability, DiscoveryEvent, DiscoveryListener, ListenerHandle, ListenerSettings,
};
pub use memory::{MemoryDiscovery, MemoryNetwork, ScriptedResolution};
pub use udp::{UdpDiscovery, UdpSettings};

// =============================================================================
// Records
// =============================================================================

/// A service record this station registers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Instance name, `"<appID>:<storeID>"` for main stations.
    pub name: String,
    /// Service type, e.g. `_http._tcp`.
    pub service_type: String,
    /// Discovery domain.
    pub domain: String,
    /// Port of the advertised service.
    pub port: u16,
}

/// A record seen while browsing.
///
/// This is the handle handed to [`DiscoveryBackend::resolve`]; it carries no
/// usable address on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredRecord {
    pub name: String,
    pub service_type: String,
    pub domain: String,
    /// Where the announcement came from, if the backend knows.
    pub origin: Option<SocketAddr>,
}

/// Result of a successful resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl ResolvedAddress {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

/// Raw browse notification from a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowseEvent {
    /// A record appeared (or re-appeared after expiring).
    Appeared(DiscoveredRecord),
    /// A record was withdrawn or expired.
    Removed(DiscoveredRecord),
}

// =============================================================================
// Backend Trait
// =============================================================================

/// A service discovery mechanism (mDNS, UDP broadcast, in-memory, ...).
///
/// Implementations are shared between the listener task and the resolver's
/// tasks, so every method takes `&self`.
#[async_trait]
pub trait DiscoveryBackend: Send + Sync {
    /// Registers (or replaces) the advertised record.
    async fn register(&self, record: &ServiceRecord) -> StationResult<()>;

    /// Withdraws the record named `name`. Unknown names are ignored.
    async fn unregister(&self, name: &str) -> StationResult<()>;

    /// Starts browsing for `service_type`.
    ///
    /// Records already visible are reported as [`BrowseEvent::Appeared`]
    /// right away. Browsing again replaces the previous browse.
    async fn browse(&self, service_type: &str) -> StationResult<mpsc::Receiver<BrowseEvent>>;

    /// Stops browsing. The receiver returned by `browse` is closed.
    async fn stop_browse(&self) -> StationResult<()>;

    /// Resolves a discovered record to an address.
    ///
    /// May take arbitrarily long; callers apply their own timeout.
    async fn resolve(&self, record: &DiscoveredRecord) -> StationResult<ResolvedAddress>;

    /// Releases sockets and background tasks.
    async fn shutdown(&self) -> StationResult<()> {
        Ok(())
    }
}
