//! Point-in-time view of a station, published by the coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stationlink_core::StationRole;

use crate::resolver::MainEndpoint;

/// What a UI (or the `/station` route) needs to show.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationSnapshot {
    pub role: StationRole,
    /// Staff-facing status line, e.g. `"[SUB] Connected to 10.0.0.5"`.
    pub label: String,
    pub app_id: String,
    /// Main this sub is connected to; `None` unless `SubConnected`.
    pub main: Option<MainEndpoint>,
    /// Port the local service host listens on, while running.
    pub host_port: Option<u16>,
    pub advertising: bool,
    pub browsing: bool,
    pub pending_resolutions: usize,
    /// Most recent non-fatal failure.
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl StationSnapshot {
    pub fn new(app_id: &str, port: u16) -> Self {
        let role = StationRole::default();
        StationSnapshot {
            label: role.label(app_id, port),
            role,
            app_id: app_id.to_string(),
            main: None,
            host_port: None,
            advertising: false,
            browsing: false,
            pending_resolutions: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    pub fn host_running(&self) -> bool {
        self.host_port.is_some()
    }
}
