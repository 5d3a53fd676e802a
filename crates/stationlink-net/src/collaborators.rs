//! # Collaborators
//!
//! Services owned by the surrounding application that the coordinator calls
//! into. They are injected at construction; each has a no-op default.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tracing::{debug, info};

// =============================================================================
// Auth Service
// =============================================================================

/// Session owner consulted when a sub station loses its main.
///
/// Must be idempotent and must not block.
pub trait AuthService: Send + Sync {
    /// Invalidates the current session.
    fn sign_out(&self);
}

/// Auth service that does nothing.
pub struct NoOpAuth;

impl AuthService for NoOpAuth {
    fn sign_out(&self) {}
}

/// Auth service that only logs the forced sign-out.
pub struct LoggingAuth;

impl AuthService for LoggingAuth {
    fn sign_out(&self) {
        info!("Main station lost, signing out current session");
    }
}

/// Counts sign-outs. Handy for tests and demos.
#[derive(Debug, Default)]
pub struct CountingAuth {
    count: AtomicUsize,
}

impl CountingAuth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sign-outs so far.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl AuthService for CountingAuth {
    fn sign_out(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Store Id Provider
// =============================================================================

/// Supplies the store id used when the application asks to become main
/// without naming a store.
pub trait StoreIdProvider: Send + Sync {
    fn current_store_id(&self) -> Option<String>;
}

/// Provider that never knows a store.
pub struct NoStoreId;

impl StoreIdProvider for NoStoreId {
    fn current_store_id(&self) -> Option<String> {
        None
    }
}

/// Provider returning a fixed store id.
pub struct FixedStoreId(pub String);

impl StoreIdProvider for FixedStoreId {
    fn current_store_id(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

// =============================================================================
// Wake Lock
// =============================================================================

/// Keeps the device from sleeping while it hosts the local service.
pub trait WakeLock: Send + Sync {
    fn set_awake(&self, awake: bool);
}

/// Wake lock that does nothing.
pub struct NoOpWakeLock;

impl WakeLock for NoOpWakeLock {
    fn set_awake(&self, awake: bool) {
        debug!(awake, "Wake lock request ignored");
    }
}

/// Wake lock that remembers the last request.
#[derive(Debug, Default)]
pub struct FlagWakeLock {
    awake: AtomicBool,
}

impl FlagWakeLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_awake(&self) -> bool {
        self.awake.load(Ordering::SeqCst)
    }
}

impl WakeLock for FlagWakeLock {
    fn set_awake(&self, awake: bool) {
        self.awake.store(awake, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting_auth() {
        let auth = CountingAuth::new();
        auth.sign_out();
        auth.sign_out();
        assert_eq!(auth.count(), 2);
    }

    #[test]
    fn test_store_id_providers() {
        assert_eq!(NoStoreId.current_store_id(), None);
        assert_eq!(FixedStoreId("S1".into()).current_store_id(), Some("S1".into()));
    }

    #[test]
    fn test_flag_wake_lock() {
        let lock = FlagWakeLock::new();
        lock.set_awake(true);
        assert!(lock.is_awake());
        lock.set_awake(false);
        assert!(!lock.is_awake());
    }
}
