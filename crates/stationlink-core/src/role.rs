//! # Station Roles
//!
//! The finite set of roles a station can occupy, plus the *requested* mode an
//! application persists between restarts.
//!
//! ## Role Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Station Roles                                  │
//! │                                                                         │
//! │   SUB side                              MAIN side                      │
//! │   ────────                              ─────────                      │
//! │   ┌─────────────────┐  resolved   ┌──────────────────────┐             │
//! │   │ SubDisconnected │ ──────────▶ │ SubConnected{addr}   │             │
//! │   │  (initial)      │ ◀────────── │ (locked: see below)  │             │
//! │   └─────────────────┘  main lost  └──────────────────────┘             │
//! │                                                                         │
//! │   ┌─────────────────┐             ┌──────────────────────┐             │
//! │   │ Main{store_id}  │             │ SingleStation        │             │
//! │   │ hosts + adverts │             │ no network role      │             │
//! │   └─────────────────┘             └──────────────────────┘             │
//! │                                                                         │
//! │  SubConnected is the only role that refuses arbitrary reassignment:    │
//! │  it must pass through SubDisconnected first.                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::CoreError;

// =============================================================================
// Station Role
// =============================================================================

/// The role this station currently occupies. Exactly one is active.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[ts(export)]
pub enum StationRole {
    /// Sub station with no known main.
    #[default]
    SubDisconnected,

    /// Sub station aware of a reachable main at `main_address`.
    SubConnected { main_address: String },

    /// Acting as main for `store_id`, hosting the local service.
    Main { store_id: String },

    /// Standalone: no discovery, no hosting.
    SingleStation,
}

impl StationRole {
    /// Returns true for both sub variants.
    pub fn is_sub(&self) -> bool {
        matches!(
            self,
            StationRole::SubDisconnected | StationRole::SubConnected { .. }
        )
    }

    /// Returns true when this station does not depend on another one.
    ///
    /// `SingleStation` counts as main: it owns its own data.
    pub fn is_main(&self) -> bool {
        !self.is_sub()
    }

    /// Returns false only while connected to a resolved main.
    pub fn can_change_state(&self) -> bool {
        !matches!(self, StationRole::SubConnected { .. })
    }

    /// Address of the main this station is connected to, if any.
    pub fn main_address(&self) -> Option<&str> {
        match self {
            StationRole::SubConnected { main_address } => Some(main_address),
            _ => None,
        }
    }

    /// Store this station is hosting, if any.
    pub fn hosted_store(&self) -> Option<&str> {
        match self {
            StationRole::Main { store_id } => Some(store_id),
            _ => None,
        }
    }

    /// Status line shown to staff.
    ///
    /// ```rust
    /// use stationlink_core::StationRole;
    ///
    /// let role = StationRole::SubConnected { main_address: "10.0.0.5".into() };
    /// assert_eq!(role.label("app", 25610), "[SUB] Connected to 10.0.0.5");
    /// ```
    pub fn label(&self, app_id: &str, port: u16) -> String {
        match self {
            StationRole::SubDisconnected => "[SUB] Disconnected".to_string(),
            StationRole::SubConnected { main_address } => {
                format!("[SUB] Connected to {}", main_address)
            }
            StationRole::Main { .. } => format!("[MAIN] {}:{}", app_id, port),
            StationRole::SingleStation => "Single Station".to_string(),
        }
    }
}

impl std::fmt::Display for StationRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StationRole::SubDisconnected => write!(f, "sub (disconnected)"),
            StationRole::SubConnected { main_address } => {
                write!(f, "sub (connected to {})", main_address)
            }
            StationRole::Main { store_id } => write!(f, "main for store {}", store_id),
            StationRole::SingleStation => write!(f, "single station"),
        }
    }
}

// =============================================================================
// Station Mode
// =============================================================================

/// The role an application *asks* for, e.g. from persisted settings.
///
/// Unlike [`StationRole`] this carries no runtime detail: the store id and
/// the resolved main address are filled in by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum StationMode {
    /// Discover and depend on a main station.
    #[default]
    Sub,

    /// Host the local service for the configured store.
    Main,

    /// Run alone.
    Single,
}

impl std::fmt::Display for StationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StationMode::Sub => write!(f, "sub"),
            StationMode::Main => write!(f, "main"),
            StationMode::Single => write!(f, "single"),
        }
    }
}

impl std::str::FromStr for StationMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sub" | "client" | "secondary" => Ok(StationMode::Sub),
            "main" | "hub" | "server" | "primary" => Ok(StationMode::Main),
            "single" | "standalone" | "single_station" => Ok(StationMode::Single),
            other => Err(CoreError::UnknownMode(other.to_string())),
        }
    }
}

impl From<&StationRole> for StationMode {
    fn from(role: &StationRole) -> Self {
        match role {
            StationRole::SubDisconnected | StationRole::SubConnected { .. } => StationMode::Sub,
            StationRole::Main { .. } => StationMode::Main,
            StationRole::SingleStation => StationMode::Single,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected(addr: &str) -> StationRole {
        StationRole::SubConnected {
            main_address: addr.to_string(),
        }
    }

    #[test]
    fn test_default_role_is_sub_disconnected() {
        assert_eq!(StationRole::default(), StationRole::SubDisconnected);
    }

    #[test]
    fn test_is_sub_and_is_main() {
        assert!(StationRole::SubDisconnected.is_sub());
        assert!(connected("10.0.0.5").is_sub());
        assert!(StationRole::Main { store_id: "S1".into() }.is_main());
        assert!(StationRole::SingleStation.is_main());
    }

    #[test]
    fn test_only_connected_sub_refuses_change() {
        assert!(StationRole::SubDisconnected.can_change_state());
        assert!(!connected("10.0.0.5").can_change_state());
        assert!(StationRole::Main { store_id: "S1".into() }.can_change_state());
        assert!(StationRole::SingleStation.can_change_state());
    }

    #[test]
    fn test_labels() {
        assert_eq!(StationRole::SubDisconnected.label("app", 1), "[SUB] Disconnected");
        assert_eq!(
            StationRole::Main { store_id: "S1".into() }.label("q8ct", 25610),
            "[MAIN] q8ct:25610"
        );
        assert_eq!(StationRole::SingleStation.label("app", 1), "Single Station");
    }

    #[test]
    fn test_main_with_different_store_is_a_different_role() {
        let a = StationRole::Main { store_id: "S1".into() };
        let b = StationRole::Main { store_id: "S2".into() };
        assert_ne!(a, b);
        assert_eq!(a.hosted_store(), Some("S1"));
    }

    #[test]
    fn test_role_json_shape() {
        let json = serde_json::to_string(&connected("10.0.0.5")).unwrap();
        assert_eq!(json, r#"{"kind":"sub_connected","main_address":"10.0.0.5"}"#);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("sub".parse::<StationMode>().unwrap(), StationMode::Sub);
        assert_eq!("HUB".parse::<StationMode>().unwrap(), StationMode::Main);
        assert_eq!("standalone".parse::<StationMode>().unwrap(), StationMode::Single);
        assert!("leader".parse::<StationMode>().is_err());
    }

    #[test]
    fn test_mode_from_role() {
        assert_eq!(StationMode::from(&connected("x")), StationMode::Sub);
        assert_eq!(StationMode::from(&StationRole::SingleStation), StationMode::Single);
    }
}
