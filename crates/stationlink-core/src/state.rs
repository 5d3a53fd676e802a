//! # Station State
//!
//! Holds the single active [`StationRole`], validates transitions, and
//! notifies observers of every accepted change.
//!
//! ## Transition Rule
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  request_role(new)                                                      │
//! │                                                                         │
//! │  new == current ──────────────────────▶ Ok(None)   (nothing emitted)    │
//! │  current.can_change_state() ──────────▶ apply + notify                  │
//! │  current = SubConnected, new = SubDisc ▶ apply + notify                 │
//! │  otherwise ───────────────────────────▶ Err(Rejected), role unchanged   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `StationState` takes `&mut self` for every mutation. Serialization is the
//! owner's job: the coordinator keeps it inside a single actor task, so
//! observers always see a strictly ordered sequence of changes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::RoleChangeError;
use crate::role::StationRole;

// =============================================================================
// Role Change
// =============================================================================

/// One accepted transition, delivered to every observer exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RoleChange {
    /// Role before the transition.
    pub previous: StationRole,
    /// Role after the transition.
    pub current: StationRole,
    /// Monotonic counter, starts at 1 for the first change.
    #[ts(as = "f64")]
    pub sequence: u64,
    /// When the transition was applied.
    #[ts(as = "String")]
    pub changed_at: DateTime<Utc>,
}

// =============================================================================
// Observer
// =============================================================================

/// Receives role changes synchronously, in order.
///
/// Implementations must not block: they run while the state owner is
/// applying the transition.
pub trait RoleObserver: Send + Sync {
    /// Called once per accepted transition.
    fn on_role_changed(&self, change: &RoleChange);
}

/// Checks whether `from → to` is allowed.
pub fn check_transition(from: &StationRole, to: &StationRole) -> Result<(), RoleChangeError> {
    if from == to || from.can_change_state() || *to == StationRole::SubDisconnected {
        return Ok(());
    }
    Err(RoleChangeError::Rejected {
        from: from.clone(),
        to: to.clone(),
    })
}

// =============================================================================
// Station State
// =============================================================================

/// The current role plus its subscribers.
pub struct StationState {
    current: StationRole,
    sequence: u64,
    observers: Vec<Arc<dyn RoleObserver>>,
}

impl Default for StationState {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StationState")
            .field("current", &self.current)
            .field("sequence", &self.sequence)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl StationState {
    /// Creates state in the initial `SubDisconnected` role.
    pub fn new() -> Self {
        StationState {
            current: StationRole::SubDisconnected,
            sequence: 0,
            observers: Vec::new(),
        }
    }

    /// Returns the active role.
    pub fn current_role(&self) -> &StationRole {
        &self.current
    }

    /// Number of transitions applied so far.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Registers an observer for all future changes.
    pub fn subscribe(&mut self, observer: Arc<dyn RoleObserver>) {
        self.observers.push(observer);
    }

    /// Validates and applies a new role.
    ///
    /// Returns `Ok(Some(change))` when the role actually changed (observers
    /// have already been notified), `Ok(None)` when `new` equals the current
    /// role.
    ///
    /// # Errors
    ///
    /// [`RoleChangeError::Rejected`] when the current role is `SubConnected`
    /// and `new` is anything other than `SubDisconnected`.
    pub fn request_role(&mut self, new: StationRole) -> Result<Option<RoleChange>, RoleChangeError> {
        check_transition(&self.current, &new)?;
        Ok(self.apply(new))
    }

    /// Returns to `SubDisconnected` unconditionally (process shutdown).
    pub fn reset(&mut self) -> Option<RoleChange> {
        self.apply(StationRole::SubDisconnected)
    }

    fn apply(&mut self, new: StationRole) -> Option<RoleChange> {
        if new == self.current {
            return None;
        }

        self.sequence += 1;
        let previous = std::mem::replace(&mut self.current, new);
        let change = RoleChange {
            previous,
            current: self.current.clone(),
            sequence: self.sequence,
            changed_at: Utc::now(),
        };

        for observer in &self.observers {
            observer.on_role_changed(&change);
        }

        Some(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<RoleChange>>,
    }

    impl RoleObserver for Recorder {
        fn on_role_changed(&self, change: &RoleChange) {
            self.seen.lock().unwrap().push(change.clone());
        }
    }

    fn connected(addr: &str) -> StationRole {
        StationRole::SubConnected {
            main_address: addr.to_string(),
        }
    }

    fn main(store: &str) -> StationRole {
        StationRole::Main {
            store_id: store.to_string(),
        }
    }

    #[test]
    fn test_initial_role() {
        let state = StationState::new();
        assert_eq!(state.current_role(), &StationRole::SubDisconnected);
        assert_eq!(state.sequence(), 0);
    }

    #[test]
    fn test_accepted_change_notifies_once() {
        let recorder = Arc::new(Recorder::default());
        let mut state = StationState::new();
        state.subscribe(recorder.clone());

        let change = state.request_role(main("S1")).unwrap().unwrap();
        assert_eq!(change.previous, StationRole::SubDisconnected);
        assert_eq!(change.current, main("S1"));
        assert_eq!(change.sequence, 1);
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_same_role_is_not_a_change() {
        let recorder = Arc::new(Recorder::default());
        let mut state = StationState::new();
        state.subscribe(recorder.clone());

        state.request_role(main("S1")).unwrap();
        assert!(state.request_role(main("S1")).unwrap().is_none());
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_connected_sub_rejects_unrelated_role() {
        let mut state = StationState::new();
        state.request_role(connected("10.0.0.5")).unwrap();

        let err = state.request_role(StationRole::SingleStation).unwrap_err();
        assert!(matches!(err, RoleChangeError::Rejected { .. }));
        assert_eq!(state.current_role(), &connected("10.0.0.5"));

        assert!(state.request_role(connected("10.0.0.9")).is_err());
        assert!(state.request_role(main("S1")).is_err());
    }

    #[test]
    fn test_connected_sub_can_disconnect_then_change() {
        let mut state = StationState::new();
        state.request_role(connected("10.0.0.5")).unwrap();
        state.request_role(StationRole::SubDisconnected).unwrap();
        state.request_role(main("S1")).unwrap();
        assert_eq!(state.current_role(), &main("S1"));
        assert_eq!(state.sequence(), 3);
    }

    #[test]
    fn test_history_never_repeats_consecutively() {
        let recorder = Arc::new(Recorder::default());
        let mut state = StationState::new();
        state.subscribe(recorder.clone());

        let requests = [
            main("S1"),
            main("S1"),
            StationRole::SingleStation,
            StationRole::SingleStation,
            StationRole::SubDisconnected,
            connected("a"),
            connected("a"),
            StationRole::SubDisconnected,
            StationRole::SubDisconnected,
        ];
        for role in requests {
            let _ = state.request_role(role);
        }

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 5);
        for pair in seen.windows(2) {
            assert_ne!(pair[0].current, pair[1].current);
            assert_eq!(pair[0].current, pair[1].previous);
            assert_eq!(pair[0].sequence + 1, pair[1].sequence);
        }
    }

    #[test]
    fn test_reset_bypasses_lock() {
        let mut state = StationState::new();
        state.request_role(connected("10.0.0.5")).unwrap();
        let change = state.reset().unwrap();
        assert_eq!(change.current, StationRole::SubDisconnected);
        assert!(state.reset().is_none());
    }
}
