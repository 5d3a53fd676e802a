//! # stationlink-core: Pure Station Role Model
//!
//! Roles, transition rules, and advertisement names shared by every station.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      StationLink Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 stationd / POS application                      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │   stationlink-net: Coordinator, Discovery, Resolver, Host       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │            ★ stationlink-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐   ┌──────────────┐   ┌────────────────┐        │   │
//! │  │   │   role    │   │    state     │   │  service_name  │        │   │
//! │  │   │ Station-  │   │ StationState │   │ "<app>:<store>"│        │   │
//! │  │   │ Role/Mode │   │ RoleChange   │   │  parse/format  │        │   │
//! │  │   └───────────┘   └──────────────┘   └────────────────┘        │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO SOCKETS • NO TASKS • PURE FUNCTIONS               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use stationlink_core::{StationRole, StationState};
//!
//! let mut state = StationState::new();
//! state
//!     .request_role(StationRole::SubConnected { main_address: "10.0.0.5".into() })
//!     .unwrap();
//!
//! // A connected sub must disconnect before taking another role.
//! assert!(state.request_role(StationRole::SingleStation).is_err());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod role;
pub mod service_name;
pub mod state;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, RoleChangeError};
pub use role::{StationMode, StationRole};
pub use service_name::ServiceName;
pub use state::{check_transition, RoleChange, RoleObserver, StationState};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Application identifier embedded in every main station advertisement.
///
/// Stations of different deployments on the same LAN ignore each other
/// because their names carry different identifiers.
pub const DEFAULT_APP_ID: &str = "q8ctuHjYpheAKBA3";

/// Port the main station's local REST service listens on.
pub const DEFAULT_HOST_PORT: u16 = 25610;

/// Service type advertised and browsed for.
pub const SERVICE_TYPE: &str = "_http._tcp";

/// Discovery domain (the local network segment).
pub const SERVICE_DOMAIN: &str = "local";
