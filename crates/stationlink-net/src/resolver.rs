//! # Address Resolver
//!
//! Turns discovered main records into concrete endpoints.
//!
//! ## Pending Resolutions
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  resolve("app:S1")            resolve("app:S1") again                   │
//! │        │                              │                                 │
//! │        ▼                              ▼                                 │
//! │  pending["app:S1"] = #1  ───▶  abort #1, pending["app:S1"] = #2         │
//! │                                                                         │
//! │  task #2: timeout(10s, backend.resolve) ──▶ ResolutionOutcome { #2 }    │
//! │                                                                         │
//! │  coordinator: settle(outcome)                                          │
//! │     attempt == pending attempt → apply, remove entry                   │
//! │     otherwise                  → stale, ignore                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The resolver is owned by the coordinator task. Resolution work runs in
//! spawned tasks and reports back through a channel, so nothing here awaits
//! network I/O.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;
use url::{Host, Url};
use uuid::Uuid;

use stationlink_core::{ServiceName, DEFAULT_HOST_PORT};

use crate::config::StaticMain;
use crate::discovery::{DiscoveredRecord, DiscoveryBackend, ResolvedAddress};
use crate::error::{StationError, StationResult};

// =============================================================================
// Main Endpoint
// =============================================================================

/// A reachable main station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MainEndpoint {
    /// Record name the endpoint was resolved from.
    pub record: String,
    /// Store the main serves.
    pub store_id: String,
    /// Host identifier (IP address or hostname).
    pub address: String,
    pub port: u16,
    /// Base URL of the main's REST service.
    pub url: String,
}

impl MainEndpoint {
    /// Builds an endpoint from a resolution result.
    pub fn resolved(record: &str, store_id: &str, resolved: ResolvedAddress) -> StationResult<Self> {
        let url = format!("http://{}", resolved.socket_addr());
        Url::parse(&url)?;

        Ok(MainEndpoint {
            record: record.to_string(),
            store_id: store_id.to_string(),
            address: resolved.ip.to_string(),
            port: resolved.port,
            url,
        })
    }

    /// Builds an endpoint from a hand-configured main.
    pub fn from_static(main: &StaticMain) -> StationResult<Self> {
        let url = Url::parse(&main.url)?;
        let address = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            None => {
                return Err(StationError::InvalidUrl(format!(
                    "Static main URL has no host: {}",
                    main.url
                )))
            }
        };
        let port = url.port_or_known_default().unwrap_or(DEFAULT_HOST_PORT);

        Ok(MainEndpoint {
            record: format!("static:{}", main.store_id),
            store_id: main.store_id.clone(),
            address,
            port,
            url: main.url.trim_end_matches('/').to_string(),
        })
    }

    /// IP address of the endpoint, when it is not a hostname.
    pub fn ip(&self) -> Option<IpAddr> {
        self.address.parse().ok()
    }
}

// =============================================================================
// Resolution Outcome
// =============================================================================

/// Result of one resolution attempt, delivered to the coordinator.
#[derive(Debug)]
pub struct ResolutionOutcome {
    pub attempt: Uuid,
    pub record: DiscoveredRecord,
    pub store_id: String,
    pub result: StationResult<MainEndpoint>,
}

/// One in-flight attempt for a record name.
#[derive(Debug)]
pub struct PendingResolution {
    pub attempt: Uuid,
    pub store_id: String,
    pub started_at: Instant,
    task: AbortHandle,
}

// =============================================================================
// Address Resolver
// =============================================================================

/// At most one in-flight resolution per record name.
pub struct AddressResolver {
    backend: Arc<dyn DiscoveryBackend>,
    timeout: Duration,
    outcomes_tx: mpsc::Sender<ResolutionOutcome>,
    pending: HashMap<String, PendingResolution>,
}

impl AddressResolver {
    pub fn new(
        backend: Arc<dyn DiscoveryBackend>,
        timeout: Duration,
        outcomes_tx: mpsc::Sender<ResolutionOutcome>,
    ) -> Self {
        AddressResolver {
            backend,
            timeout,
            outcomes_tx,
            pending: HashMap::new(),
        }
    }

    /// Starts resolving `record`, cancelling any attempt already pending for
    /// the same name. Returns the new attempt id.
    pub fn resolve(&mut self, record: DiscoveredRecord, name: &ServiceName) -> Uuid {
        if let Some(previous) = self.pending.remove(&record.name) {
            previous.task.abort();
            debug!(record = %record.name, attempt = %previous.attempt, "Restarting resolution");
        }

        let attempt = Uuid::new_v4();
        let store_id = name.store_id().to_string();
        let backend = self.backend.clone();
        let timeout = self.timeout;
        let outcomes_tx = self.outcomes_tx.clone();
        let key = record.name.clone();
        let task_store_id = store_id.clone();

        debug!(record = %key, %attempt, "Resolving main station");
        let task = tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, backend.resolve(&record)).await {
                Ok(Ok(resolved)) => MainEndpoint::resolved(&record.name, &task_store_id, resolved),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(StationError::ResolutionFailure {
                    record: record.name.clone(),
                    reason: format!("timed out after {}s", timeout.as_secs()),
                }),
            };

            let outcome = ResolutionOutcome {
                attempt,
                record,
                store_id: task_store_id,
                result,
            };
            let _ = outcomes_tx.send(outcome).await;
        });

        self.pending.insert(
            key,
            PendingResolution {
                attempt,
                store_id,
                started_at: Instant::now(),
                task: task.abort_handle(),
            },
        );
        attempt
    }

    /// Consumes the pending entry an outcome belongs to.
    ///
    /// Returns false for outcomes of cancelled or superseded attempts, which
    /// must be ignored.
    pub fn settle(&mut self, outcome: &ResolutionOutcome) -> bool {
        let current = self
            .pending
            .get(&outcome.record.name)
            .is_some_and(|p| p.attempt == outcome.attempt);
        if current {
            self.pending.remove(&outcome.record.name);
        } else {
            debug!(record = %outcome.record.name, attempt = %outcome.attempt, "Ignoring stale resolution");
        }
        current
    }

    /// Cancels the attempt for `name`, if any.
    pub fn cancel(&mut self, name: &str) -> bool {
        match self.pending.remove(name) {
            Some(pending) => {
                pending.task.abort();
                debug!(record = %name, "Resolution cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancels every pending attempt.
    pub fn cancel_all(&mut self) {
        for (_, pending) in self.pending.drain() {
            pending.task.abort();
        }
    }

    pub fn is_pending(&self, name: &str) -> bool {
        self.pending.contains_key(name)
    }

    pub fn pending(&self, name: &str) -> Option<&PendingResolution> {
        self.pending.get(name)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for AddressResolver {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
