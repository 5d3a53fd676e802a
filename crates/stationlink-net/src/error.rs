//! # Station Error Types
//!
//! Error types for discovery, resolution, hosting, and coordination.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Station Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Role           │  │   Discovery     │  │     Hosting             │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  RoleChange-    │  │  DiscoveryStart │  │  HostBindFailure        │ │
//! │  │  Rejected       │  │  Failure        │  │   ├ PortUnavailable     │ │
//! │  │                 │  │  Resolution-    │  │   └ BindError           │ │
//! │  │                 │  │  Failure        │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │    Protocol     │  │      Internal           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  InvalidMessage │  │  ChannelError           │ │
//! │  │  ConfigLoad/Save│  │  InvalidUrl     │  │  ShuttingDown           │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! None of these are fatal. Discovery and host failures are logged and
//! retried or surfaced; the UI only ever sees a station that stays
//! `SubDisconnected`.

use thiserror::Error;

use stationlink_core::{CoreError, RoleChangeError};

/// Result type alias for station operations.
pub type StationResult<T> = Result<T, StationError>;

// =============================================================================
// Host Error
// =============================================================================

/// Failure to bind the local service host.
#[derive(Debug, Error)]
pub enum HostError {
    /// Another process already owns the port.
    #[error("port {port} is already in use")]
    PortUnavailable { port: u16 },

    /// Any other bind failure (permission denied, bad address, ...).
    #[error("failed to bind port {port}: {source}")]
    BindError {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

impl HostError {
    /// Classifies a bind failure on `port`.
    pub fn from_bind(port: u16, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::AddrInUse => HostError::PortUnavailable { port },
            _ => HostError::BindError { port, source: err },
        }
    }

    /// Port that could not be bound.
    pub fn port(&self) -> u16 {
        match self {
            HostError::PortUnavailable { port } | HostError::BindError { port, .. } => *port,
        }
    }
}

// =============================================================================
// Station Error
// =============================================================================

/// Station error type covering all coordination failures.
#[derive(Debug, Error)]
pub enum StationError {
    // =========================================================================
    // Role Errors
    // =========================================================================
    /// A role transition was refused.
    #[error(transparent)]
    RoleChangeRejected(#[from] RoleChangeError),

    /// A role request could not be satisfied (e.g. no store id known).
    #[error("Invalid role request: {0}")]
    InvalidRequest(String),

    // =========================================================================
    // Discovery Errors
    // =========================================================================
    /// Advertise or browse could not start.
    #[error("Discovery failed to start: {0}")]
    DiscoveryStartFailure(String),

    /// A discovered record could not be turned into an address.
    #[error("Could not resolve '{record}': {reason}")]
    ResolutionFailure { record: String, reason: String },

    // =========================================================================
    // Hosting Errors
    // =========================================================================
    /// The local service host could not bind its port.
    #[error("Host failed to start: {0}")]
    HostBindFailure(#[from] HostError),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid station configuration.
    #[error("Invalid station configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Malformed discovery datagram.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Malformed main station URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// The coordinator is shutting down.
    #[error("Station coordinator is shutting down")]
    ShuttingDown,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for StationError {
    fn from(err: CoreError) -> Self {
        StationError::InvalidConfig(err.to_string())
    }
}

impl From<serde_json::Error> for StationError {
    fn from(err: serde_json::Error) -> Self {
        StationError::InvalidMessage(err.to_string())
    }
}

impl From<url::ParseError> for StationError {
    fn from(err: url::ParseError) -> Self {
        StationError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for StationError {
    fn from(err: std::io::Error) -> Self {
        StationError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for StationError {
    fn from(err: toml::de::Error) -> Self {
        StationError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for StationError {
    fn from(err: toml::ser::Error) -> Self {
        StationError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl StationError {
    /// Returns true if the owning application may simply try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StationError::DiscoveryStartFailure(_)
                | StationError::ResolutionFailure { .. }
                | StationError::HostBindFailure(HostError::PortUnavailable { .. })
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            StationError::InvalidConfig(_)
                | StationError::ConfigLoadFailed(_)
                | StationError::ConfigSaveFailed(_)
                | StationError::InvalidUrl(_)
        )
    }
}
