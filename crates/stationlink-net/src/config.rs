//! # Station Configuration
//!
//! Configuration management for the station coordinator.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     STATION_MODE=main                                                  │
//! │     STATION_STORE_ID=store-001                                         │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/stationlink/station.toml (Linux)                         │
//! │     ~/Library/Application Support/com.stationlink.pos/station.toml     │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     StationMode::Sub, port 25610, discovery on UDP 25611               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # station.toml
//! [device]
//! name = "Bar Tablet"
//!
//! [station]
//! mode = "main"      # sub | main | single
//! store_id = "store-001"
//!
//! [host]
//! port = 25610
//!
//! [discovery]
//! udp_port = 25611
//! resolve_timeout_secs = 10
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use stationlink_core::{StationMode, DEFAULT_APP_ID, DEFAULT_HOST_PORT, SERVICE_DOMAIN, SERVICE_TYPE};

use crate::error::{StationError, StationResult};

// =============================================================================
// Device Configuration
// =============================================================================

/// Configuration for this device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Human-readable device name, used in logs and discovery datagrams.
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "POS Station".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            name: default_device_name(),
        }
    }
}

// =============================================================================
// Station Settings
// =============================================================================

/// Requested role and identity of the deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationSettings {
    /// Role to take at startup.
    #[serde(default)]
    pub mode: StationMode,

    /// Application identifier shared by every station of this deployment.
    #[serde(default = "default_app_id")]
    pub app_id: String,

    /// Store this station belongs to. When absent, main mode asks the
    /// injected store id provider.
    #[serde(default)]
    pub store_id: Option<String>,
}

fn default_app_id() -> String {
    DEFAULT_APP_ID.to_string()
}

impl Default for StationSettings {
    fn default() -> Self {
        StationSettings {
            mode: StationMode::default(),
            app_id: default_app_id(),
            store_id: None,
        }
    }
}

// =============================================================================
// Host Settings
// =============================================================================

/// Local service host settings (used in main mode).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSettings {
    /// TCP port of the local REST service.
    #[serde(default = "default_host_port")]
    pub port: u16,

    /// Bind address (default: 0.0.0.0 for all interfaces).
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_host_port() -> u16 {
    DEFAULT_HOST_PORT
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

impl Default for HostSettings {
    fn default() -> Self {
        HostSettings {
            port: default_host_port(),
            bind_addr: default_bind_addr(),
        }
    }
}

// =============================================================================
// Discovery Settings
// =============================================================================

/// A main station configured by hand instead of discovered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticMain {
    /// Base URL of the main's REST service, e.g. `http://10.0.0.5:25610`.
    pub url: String,

    /// Store the main serves.
    pub store_id: String,
}

/// Configuration for advertising and browsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySettings {
    /// Service type advertised and browsed for.
    #[serde(default = "default_service_type")]
    pub service_type: String,

    /// Discovery domain.
    #[serde(default = "default_domain")]
    pub domain: String,

    /// UDP port shared by all stations for discovery datagrams.
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,

    /// Interval between re-announcements of an advertised record (seconds).
    #[serde(default = "default_announce_interval")]
    pub announce_interval_secs: u64,

    /// A record not re-announced within this window is considered gone (seconds).
    #[serde(default = "default_record_ttl")]
    pub record_ttl_secs: u64,

    /// Bound on a single resolution attempt (seconds).
    #[serde(default = "default_resolve_timeout")]
    pub resolve_timeout_secs: u64,

    /// Initial backoff after a failed advertise/browse start (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub retry_initial_backoff_ms: u64,

    /// Maximum backoff between start attempts (seconds).
    #[serde(default = "default_max_backoff")]
    pub retry_max_backoff_secs: u64,

    /// Whether a failed re-resolution of the active main counts as main lost.
    #[serde(default = "default_true")]
    pub failure_drops_active_main: bool,

    /// Skip browsing and connect to this main directly.
    #[serde(default)]
    pub static_main: Option<StaticMain>,
}

fn default_service_type() -> String {
    SERVICE_TYPE.to_string()
}

fn default_domain() -> String {
    SERVICE_DOMAIN.to_string()
}

fn default_udp_port() -> u16 {
    25611
}

fn default_announce_interval() -> u64 {
    2
}

fn default_record_ttl() -> u64 {
    7
}

fn default_resolve_timeout() -> u64 {
    10
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        DiscoverySettings {
            service_type: default_service_type(),
            domain: default_domain(),
            udp_port: default_udp_port(),
            announce_interval_secs: default_announce_interval(),
            record_ttl_secs: default_record_ttl(),
            resolve_timeout_secs: default_resolve_timeout(),
            retry_initial_backoff_ms: default_initial_backoff(),
            retry_max_backoff_secs: default_max_backoff(),
            failure_drops_active_main: true,
            static_main: None,
        }
    }
}

impl DiscoverySettings {
    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval_secs)
    }

    pub fn record_ttl(&self) -> Duration {
        Duration::from_secs(self.record_ttl_secs)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    pub fn retry_initial_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_initial_backoff_ms)
    }

    pub fn retry_max_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_max_backoff_secs)
    }
}

// =============================================================================
// Main Station Configuration
// =============================================================================

/// Complete station configuration.
///
/// ## Example Config File
/// ```toml
/// [device]
/// name = "Register 1"
///
/// [station]
/// mode = "sub"
/// app_id = "q8ctuHjYpheAKBA3"
///
/// [host]
/// port = 25610
/// bind_addr = "0.0.0.0"
///
/// [discovery]
/// service_type = "_http._tcp"
/// udp_port = 25611
/// failure_drops_active_main = true
///
/// [discovery.static_main]
/// url = "http://10.0.0.5:25610"
/// store_id = "store-001"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StationConfig {
    /// Device-specific configuration.
    #[serde(default)]
    pub device: DeviceConfig,

    /// Requested role and identity.
    #[serde(default)]
    pub station: StationSettings,

    /// Local service host settings.
    #[serde(default)]
    pub host: HostSettings,

    /// Discovery settings.
    #[serde(default)]
    pub discovery: DiscoverySettings,
}

impl StationConfig {
    /// Creates a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (station.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> StationResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading station config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load station config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> StationResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| StationError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StationError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| StationError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Station config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> StationResult<()> {
        let app_id = &self.station.app_id;
        if app_id.is_empty() || app_id.contains(':') {
            return Err(StationError::InvalidConfig(format!(
                "app_id must be non-empty and must not contain ':', got: '{}'",
                app_id
            )));
        }

        if let Some(ref store_id) = self.station.store_id {
            if store_id.is_empty() || store_id.contains(':') {
                return Err(StationError::InvalidConfig(format!(
                    "store_id must be non-empty and must not contain ':', got: '{}'",
                    store_id
                )));
            }
        }

        if self.host.port == 0 {
            return Err(StationError::InvalidConfig("host port must be greater than 0".into()));
        }

        if self.discovery.udp_port == self.host.port {
            return Err(StationError::InvalidConfig(format!(
                "discovery udp_port and host port must differ (both {})",
                self.host.port
            )));
        }

        if self.discovery.announce_interval_secs == 0 {
            return Err(StationError::InvalidConfig(
                "announce_interval_secs must be greater than 0".into(),
            ));
        }

        if self.discovery.record_ttl_secs <= self.discovery.announce_interval_secs {
            return Err(StationError::InvalidConfig(
                "record_ttl_secs must be longer than announce_interval_secs".into(),
            ));
        }

        if self.discovery.resolve_timeout_secs == 0 {
            return Err(StationError::InvalidConfig(
                "resolve_timeout_secs must be greater than 0".into(),
            ));
        }

        if let Some(ref main) = self.discovery.static_main {
            let url = Url::parse(&main.url)?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(StationError::InvalidUrl(format!(
                    "Static main URL must start with http:// or https://, got: {}",
                    main.url
                )));
            }
            if url.host_str().is_none() {
                return Err(StationError::InvalidUrl(format!(
                    "Static main URL has no host: {}",
                    main.url
                )));
            }
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(name) = std::env::var("STATION_DEVICE_NAME") {
            self.device.name = name;
        }

        if let Ok(mode) = std::env::var("STATION_MODE") {
            match mode.parse() {
                Ok(parsed) => {
                    debug!(mode = %mode, "Overriding station mode from environment");
                    self.station.mode = parsed;
                }
                Err(e) => warn!(mode = %mode, "Ignoring STATION_MODE: {}", e),
            }
        }

        if let Ok(app_id) = std::env::var("STATION_APP_ID") {
            self.station.app_id = app_id;
        }

        if let Ok(id) = std::env::var("STATION_STORE_ID") {
            self.station.store_id = Some(id);
        }

        if let Ok(port) = std::env::var("STATION_HOST_PORT") {
            if let Ok(p) = port.parse::<u16>() {
                debug!(port = p, "Overriding host port from environment");
                self.host.port = p;
            }
        }

        if let Ok(port) = std::env::var("STATION_DISCOVERY_PORT") {
            if let Ok(p) = port.parse::<u16>() {
                debug!(port = p, "Overriding discovery port from environment");
                self.discovery.udp_port = p;
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "stationlink", "pos")
            .map(|dirs| dirs.config_dir().join("station.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the requested mode.
    pub fn mode(&self) -> StationMode {
        self.station.mode
    }

    /// Returns the application identifier.
    pub fn app_id(&self) -> &str {
        &self.station.app_id
    }

    /// Returns the configured store id, if any.
    pub fn store_id(&self) -> Option<&str> {
        self.station.store_id.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StationConfig::default();
        assert_eq!(config.mode(), StationMode::Sub);
        assert_eq!(config.app_id(), DEFAULT_APP_ID);
        assert_eq!(config.host.port, 25610);
        assert_eq!(config.discovery.resolve_timeout(), Duration::from_secs(10));
        assert!(config.discovery.failure_drops_active_main);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = StationConfig::default();

        config.station.store_id = Some("a:b".into());
        assert!(config.validate().is_err());
        config.station.store_id = Some("store-001".into());
        assert!(config.validate().is_ok());

        config.discovery.udp_port = config.host.port;
        assert!(config.validate().unwrap_err().is_config_error());
        config.discovery.udp_port = 25611;

        config.discovery.record_ttl_secs = 1;
        assert!(config.validate().is_err());
        config.discovery.record_ttl_secs = 7;

        config.discovery.announce_interval_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("announce_interval_secs"));
    }

    #[test]
    fn test_static_main_validation() {
        let mut config = StationConfig::default();
        config.discovery.static_main = Some(StaticMain {
            url: "ws://10.0.0.5:25610".into(),
            store_id: "S1".into(),
        });
        assert!(config.validate().is_err());

        config.discovery.static_main = Some(StaticMain {
            url: "http://10.0.0.5:25610".into(),
            store_id: "S1".into(),
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: StationConfig = toml::from_str(
            r#"
            [station]
            mode = "main"
            store_id = "store-001"
            "#,
        )
        .unwrap();

        assert_eq!(config.mode(), StationMode::Main);
        assert_eq!(config.store_id(), Some("store-001"));
        assert_eq!(config.host.bind_addr, "0.0.0.0");
        assert_eq!(config.host.port, 25610);
        assert_eq!(config.discovery.udp_port, 25611);
    }

    #[test]
    fn test_toml_serialization() {
        let config = StationConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[device]"));
        assert!(toml_str.contains("[station]"));
        assert!(toml_str.contains("[discovery]"));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let path = std::env::temp_dir().join(format!("station-{}.toml", uuid::Uuid::new_v4()));
        let mut config = StationConfig::default();
        config.device.name = "Patio Tablet".into();
        config.save(Some(path.clone())).unwrap();

        let loaded = StationConfig::load(Some(path.clone())).unwrap();
        assert_eq!(loaded.device.name, "Patio Tablet");
        let _ = std::fs::remove_file(path);
    }
}
