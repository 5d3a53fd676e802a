//! # stationlink-net: Station Coordination Runtime
//!
//! Decides, for one POS device, whether it hosts the store's local REST
//! service (MAIN), depends on another device that does (SUB), or works
//! alone (SINGLE STATION), and keeps the network side in line with that
//! role.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Station Coordination                               │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                StationCoordinator (single task)                  │  │
//! │  │                                                                  │  │
//! │  │  Owns StationState, applies app requests and network events     │  │
//! │  │  one at a time, publishes RoleChange + StationSnapshot          │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ Discovery      │  │ AddressResolver│  │ LocalServiceHost       │    │
//! │  │ Listener       │  │                │  │                        │    │
//! │  │ advertise      │  │ record → IP    │  │ Axum on the configured │    │
//! │  │ "<app>:<store>"│  │ with timeout,  │  │ port, /health,         │    │
//! │  │ browse, retry  │  │ one per name   │  │ /station + REST routes │    │
//! │  └───────┬────────┘  └────────────────┘  └────────────────────────┘    │
//! │          │ DiscoveryBackend                                             │
//! │   ┌──────┴───────┐                                                      │
//! │   ▼              ▼                                                      │
//! │  UdpDiscovery   MemoryDiscovery                                         │
//! │  (LAN)          (in-process)                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`coordinator`] - `StationCoordinator` and its handle
//! - [`discovery`] - Listener and the pluggable backends
//! - [`resolver`] - Record resolution with timeout and cancellation
//! - [`host`] - Local HTTP service host
//! - [`collaborators`] - Auth, store id and wake lock seams
//! - [`config`] - TOML + environment configuration
//! - [`status`] - Snapshot published to UIs
//! - [`error`] - Error taxonomy
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stationlink_net::{StationConfig, StationCoordinator, UdpDiscovery, UdpSettings};
//!
//! let config = StationConfig::load_or_default(None);
//! let backend = Arc::new(UdpDiscovery::new(UdpSettings::from_config(&config)));
//! let coordinator = StationCoordinator::new(config, backend).start();
//!
//! coordinator.become_main("store-001").await?;
//! println!("{}", coordinator.snapshot().label);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod collaborators;
pub mod config;
pub mod coordinator;
pub mod discovery;
pub mod error;
pub mod host;
pub mod resolver;
pub mod status;

// =============================================================================
// Re-exports
// =============================================================================

pub use collaborators::{
    AuthService, FixedStoreId, LoggingAuth, NoOpAuth, NoOpWakeLock, NoStoreId, StoreIdProvider,
    WakeLock,
};
pub use config::{DiscoverySettings, HostSettings, StaticMain, StationConfig, StationSettings};
pub use coordinator::{CoordinatorHandle, StationCoordinator};
pub use discovery::{
    DiscoveryBackend, DiscoveryEvent, MemoryDiscovery, MemoryNetwork, UdpDiscovery, UdpSettings,
};
pub use error::{HostError, StationError, StationResult};
pub use host::{HostEvent, HostHandle, LocalServiceHost};
pub use resolver::{AddressResolver, MainEndpoint};
pub use status::StationSnapshot;

pub use stationlink_core::{RoleChange, RoleObserver, StationMode, StationRole};
