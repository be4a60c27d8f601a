//! Collaborator traits the engine consumes.
//!
//! Method names encode their filter contract: anything called `*_active_*`
//! only sees rows that are [`Delegation::is_active`] at the instant passed in,
//! anything called `*_live_*` also sees pending rows
//! ([`Delegation::occupies_slot`]), and [`DelegationStore::find_by_id`] is the
//! one read that sees every row.
//! There is no hidden soft-delete interception; callers opt in by name.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{Delegation, DelegationId, Scope, UserId, UserRecord};

/// Outcome of [`DelegationStore::mark_revoked`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "delegation", rename_all = "snake_case")]
pub enum RevokeOutcome {
    /// `revoked_at` was set by this call.
    Revoked(Delegation),
    /// The row was already revoked; nothing changed.
    AlreadyRevoked(Delegation),
}

impl RevokeOutcome {
    /// The stored row after the call.
    pub fn delegation(&self) -> &Delegation {
        match self {
            Self::Revoked(d) | Self::AlreadyRevoked(d) => d,
        }
    }

    /// True when this call performed the revocation.
    pub fn changed(&self) -> bool {
        matches!(self, Self::Revoked(_))
    }
}

/// Persistence for delegation edges.
///
/// Implementations must make [`insert_if_vacant`](Self::insert_if_vacant)
/// atomic with respect to other inserts for the same `(delegator, scope)`
/// and must never change `revoked_at` once set.
#[async_trait]
pub trait DelegationStore: Send + Sync {
    /// Loads a row in any state (revoked, expired or soft-deleted included).
    async fn find_by_id(&self, id: &DelegationId) -> Result<Option<Delegation>>;

    /// The delegator's active delegation for exactly this scope.
    async fn find_active_by_delegator_and_scope(
        &self,
        delegator: &UserId,
        scope: &Scope,
        now: DateTime<Utc>,
    ) -> Result<Option<Delegation>>;

    /// The delegator's active or pending delegation for exactly this scope.
    ///
    /// Write-time checks use this so a scheduled edge is accounted for
    /// before it starts.
    async fn find_live_by_delegator_and_scope(
        &self,
        delegator: &UserId,
        scope: &Scope,
        now: DateTime<Utc>,
    ) -> Result<Option<Delegation>>;

    /// Active or pending delegations pointing at `delegatee` in exactly `scope`.
    async fn list_live_by_delegatee_and_scope(
        &self,
        delegatee: &UserId,
        scope: &Scope,
        now: DateTime<Utc>,
    ) -> Result<Vec<Delegation>>;

    /// Up to `limit` active delegations held by `delegator`, oldest first.
    async fn list_active_by_delegator(
        &self,
        delegator: &UserId,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Delegation>>;

    async fn count_active_by_delegator(
        &self,
        delegator: &UserId,
        now: DateTime<Utc>,
    ) -> Result<usize>;

    /// Active plus pending delegations held by `delegator`.
    async fn count_live_by_delegator(
        &self,
        delegator: &UserId,
        now: DateTime<Utc>,
    ) -> Result<usize>;

    /// Active delegations pointing at `delegatee`, optionally in one scope.
    async fn count_active_by_delegatee(
        &self,
        delegatee: &UserId,
        scope: Option<&Scope>,
        now: DateTime<Utc>,
    ) -> Result<usize>;

    /// All active delegations, optionally in one scope.
    async fn count_active(&self, scope: Option<&Scope>, now: DateTime<Utc>) -> Result<usize>;

    /// Number of distinct scopes among active delegations into `delegatee`.
    async fn count_distinct_scopes_by_delegatee(
        &self,
        delegatee: &UserId,
        now: DateTime<Utc>,
    ) -> Result<usize>;

    /// Number of users with at least one active incoming delegation.
    async fn count_distinct_delegatees(&self, now: DateTime<Utc>) -> Result<usize>;

    /// Number of delegatees whose active in-degree is strictly above `in_degree`.
    async fn count_delegatees_with_in_degree_above(
        &self,
        in_degree: usize,
        now: DateTime<Utc>,
    ) -> Result<usize>;

    /// Inserts `delegation` unless its `(delegator, scope)` slot is held by a
    /// live row, checked and written as one atomic step.
    ///
    /// # Errors
    ///
    /// [`crate::StoreError::SlotOccupied`] when the slot is taken.
    async fn insert_if_vacant(&self, delegation: Delegation, now: DateTime<Utc>)
        -> Result<Delegation>;

    /// Sets `revoked_at = at` unless already set.
    ///
    /// # Errors
    ///
    /// [`crate::StoreError::NotFound`] only when the id was never stored.
    async fn mark_revoked(&self, id: &DelegationId, at: DateTime<Utc>) -> Result<RevokeOutcome>;
}

/// Identity lookup (existence and soft-delete flag).
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn lookup(&self, user: &UserId) -> Result<Option<UserRecord>>;
}

/// "Has this user already decided on this target" query.
#[async_trait]
pub trait DecisionLedger: Send + Sync {
    async fn has_decided(&self, user: &UserId, scope: &Scope) -> Result<bool>;
}
