//! # Error Types
//!
//! Domain-specific error types for stationlink-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  stationlink-core errors (this file)                                   │
//! │  ├── RoleChangeError  - Transition refused by StationState             │
//! │  └── CoreError        - Malformed domain values                        │
//! │                                                                         │
//! │  stationlink-net errors (separate crate)                               │
//! │  └── StationError     - Discovery, resolution, host, config failures   │
//! │                                                                         │
//! │  Flow: RoleChangeError → StationError::RoleChangeRejected → caller     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::role::StationRole;

// =============================================================================
// Role Change Error
// =============================================================================

/// A requested role transition was refused.
///
/// ## When This Occurs
/// A station that is `SubConnected` to a resolved main only leaves that
/// state through `SubDisconnected`. Any other target is refused and the
/// current role is left untouched.
///
/// ```text
/// SubConnected{10.0.0.5} ──request Main{S1}──▶ Rejected
/// SubConnected{10.0.0.5} ──request SubDisconnected──▶ OK
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoleChangeError {
    /// The transition is not allowed from the current role.
    #[error("role change rejected: cannot move from {from} to {to}")]
    Rejected { from: StationRole, to: StationRole },
}

// =============================================================================
// Core Error
// =============================================================================

/// Errors raised while building or parsing domain values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// An advertisement name could not be built.
    #[error("invalid service name '{raw}': {reason}")]
    InvalidServiceName { raw: String, reason: String },

    /// A station mode string was not recognised.
    #[error("unknown station mode '{0}'. Valid options: sub, main, single")]
    UnknownMode(String),
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_message_names_both_roles() {
        let err = RoleChangeError::Rejected {
            from: StationRole::SubConnected {
                main_address: "10.0.0.5".into(),
            },
            to: StationRole::SingleStation,
        };
        let msg = err.to_string();
        assert!(msg.contains("10.0.0.5"));
        assert!(msg.contains("single station"));
    }

    #[test]
    fn test_unknown_mode_message() {
        let err = CoreError::UnknownMode("leader".into());
        assert_eq!(
            err.to_string(),
            "unknown station mode 'leader'. Valid options: sub, main, single"
        );
    }
}
