//! Error types for chain resolution.

use liquid_store::{Scope, StoreError, UserId};
use thiserror::Error;

/// Result type alias for resolver operations.
pub type Result<T> = std::result::Result<T, ChainError>;

/// Renders a path as `a → b → c`.
pub fn format_path(path: &[UserId]) -> String {
    path.iter()
        .map(UserId::as_str)
        .collect::<Vec<_>>()
        .join(" → ")
}

/// Errors raised while walking a delegation chain.
///
/// Only strict resolution surfaces these. Lenient resolution converts every
/// variant into a degraded [`crate::Resolution`] pointing back at the origin.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The walk revisited a node. `cycle` starts and ends on the repeated node.
    #[error("delegation loop in {scope}: {}", format_path(.cycle))]
    CycleDetected { scope: Scope, cycle: Vec<UserId> },

    /// The chain needs more hops than the configured maximum.
    #[error("delegation chain in {scope} exceeds maximum depth of {max_depth}: {}", format_path(.path))]
    ChainTooLong {
        scope: Scope,
        max_depth: usize,
        /// The offending chain. A walk stops at the first hop past the
        /// limit; a pre-write check reports the whole chain it would create.
        path: Vec<UserId>,
    },

    /// The store failed while the chain was being read.
    #[error("store error during resolution: {0}")]
    Store(#[from] StoreError),
}

impl ChainError {
    /// True for the structural failures (loop or depth), false for I/O.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::CycleDetected { .. } | Self::ChainTooLong { .. })
    }
}
