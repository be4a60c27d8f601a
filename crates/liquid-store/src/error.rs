//! Error types for the delegation store.

use thiserror::Error;

use crate::models::{DelegationId, Scope, UserId};

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by persistence backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The `(delegator, scope)` slot already holds a live delegation.
    ///
    /// Raised atomically by [`crate::DelegationStore::insert_if_vacant`]; the
    /// loser of a concurrent create always sees this error.
    #[error("{delegator} already holds delegation {existing} in scope {scope}")]
    SlotOccupied {
        delegator: UserId,
        scope: Scope,
        existing: DelegationId,
    },

    /// No row with this id has ever been stored.
    #[error("delegation {0} not found")]
    NotFound(DelegationId),

    /// Sled reported an I/O or corruption error.
    #[error("database error: {0}")]
    Database(#[from] sled::Error),

    /// A stored record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backend is unreachable or refusing requests.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised when parsing identifiers, scopes and modes from text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid scope '{0}' (expected 'global' or '<kind>:<id>')")]
    InvalidScope(String),

    #[error("invalid delegation mode '{0}'")]
    InvalidMode(String),

    #[error("invalid delegation id '{0}'")]
    InvalidId(String),
}
