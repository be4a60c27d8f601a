//! Error types for the delegation engine.
//!
//! Every rejection names the invariant it protects, so a caller can show a
//! precise explanation. [`DelegationError::kind`] folds the variants into
//! the five domain failure kinds plus infrastructure.

use chrono::{DateTime, Utc};
use liquid_chain::{format_path, ChainError};
use liquid_risk::RiskError;
use liquid_store::{DelegationId, DelegationMode, Scope, StoreError, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure category of a [`DelegationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input, caught before anything is written.
    Validation,
    /// A uniqueness or count limit would be violated.
    Conflict,
    /// The edge would close a loop or exceed the chain depth.
    GraphIntegrity,
    /// A referenced user or delegation does not exist.
    NotFound,
    /// The operation is invalid in the current state.
    State,
    /// Storage or configuration trouble, not the caller's fault.
    Infrastructure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::GraphIntegrity => "graph_integrity",
            Self::NotFound => "not_found",
            Self::State => "state",
            Self::Infrastructure => "infrastructure",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by the delegation engine.
#[derive(Debug, Error)]
pub enum DelegationError {
    #[error("cannot delegate to yourself ({0})")]
    SelfDelegation(UserId),

    /// A field the mode requires was not supplied and has no default.
    #[error("{mode} delegations require {field}")]
    MissingModeField {
        mode: DelegationMode,
        field: &'static str,
    },

    /// A field was supplied that the mode does not use.
    #[error("{field} does not apply to {mode} delegations")]
    FieldNotApplicable {
        mode: DelegationMode,
        field: &'static str,
    },

    #[error("invalid legacy term: {0}")]
    InvalidTerm(String),

    #[error("end date {end} is not after start date {start}")]
    InvalidDateRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error("delegatee {0} not found")]
    DelegateeNotFound(UserId),

    #[error("delegation {0} not found")]
    DelegationNotFound(DelegationId),

    /// The delegator already cast a decision on the poll being delegated.
    #[error("{user} has already decided on {scope}")]
    AlreadyDecided { user: UserId, scope: Scope },

    #[error("already delegated in this scope: {delegator} holds delegation {existing} in {scope}")]
    AlreadyDelegated {
        delegator: UserId,
        scope: Scope,
        existing: DelegationId,
    },

    #[error("{delegator} already has {active} active or scheduled delegations (limit {limit})")]
    DelegationLimitReached {
        delegator: UserId,
        /// Active plus pending rows.
        active: usize,
        limit: usize,
    },

    /// `cycle` starts at the delegator and returns to it.
    #[error("would create a loop through {} in {scope}", format_path(.cycle))]
    CycleDetected { scope: Scope, cycle: Vec<UserId> },

    #[error("would create a chain longer than {max_depth} hops in {scope}: {}", format_path(.path))]
    ChainTooLong {
        scope: Scope,
        max_depth: usize,
        path: Vec<UserId>,
    },

    #[error("store error: {0}")]
    Store(#[source] StoreError),

    #[error("risk computation failed: {0}")]
    Risk(#[from] RiskError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl DelegationError {
    /// The failure category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SelfDelegation(_)
            | Self::MissingModeField { .. }
            | Self::FieldNotApplicable { .. }
            | Self::InvalidTerm(_)
            | Self::InvalidDateRange { .. } => ErrorKind::Validation,
            Self::AlreadyDelegated { .. } | Self::DelegationLimitReached { .. } => {
                ErrorKind::Conflict
            }
            Self::CycleDetected { .. } | Self::ChainTooLong { .. } => ErrorKind::GraphIntegrity,
            Self::UserNotFound(_) | Self::DelegateeNotFound(_) | Self::DelegationNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::AlreadyDecided { .. } => ErrorKind::State,
            Self::Store(_) | Self::Risk(_) | Self::Config(_) => ErrorKind::Infrastructure,
        }
    }
}

impl From<StoreError> for DelegationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SlotOccupied {
                delegator,
                scope,
                existing,
            } => Self::AlreadyDelegated {
                delegator,
                scope,
                existing,
            },
            StoreError::NotFound(id) => Self::DelegationNotFound(id),
            other => Self::Store(other),
        }
    }
}

impl From<ChainError> for DelegationError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::CycleDetected { scope, cycle } => Self::CycleDetected { scope, cycle },
            ChainError::ChainTooLong {
                scope,
                max_depth,
                path,
            } => Self::ChainTooLong {
                scope,
                max_depth,
                path,
            },
            ChainError::Store(store) => Self::from(store),
        }
    }
}
