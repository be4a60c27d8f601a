//! # Persistent Storage Layer
//!
//! Sled-backed implementation of every collaborator trait, so a single
//! database directory carries delegations, identities and decisions.
//!
//! ## Storage Structure
//!
//! | Tree | Key | Value | Purpose |
//! |------|-----|-------|---------|
//! | `delegations` | delegation id | JSON [`Delegation`] | Every row, any state |
//! | `slots` | delegator `\0` scope key | delegation id | Uniqueness per `(delegator, scope)` |
//! | `users` | user id | JSON [`UserRecord`] | Identity directory |
//! | `decisions` | user `\0` scope key | empty | Decision ledger |
//!
//! ## Atomicity
//!
//! Insert and revoke run as sled transactions spanning `delegations` and
//! `slots`. The slot read, the liveness check of its occupant and both writes
//! happen inside one transaction, so two concurrent creates for the same slot
//! cannot both commit.
//!
//! Aggregate counts scan the `delegations` tree. They are advisory reads and
//! tolerate concurrent writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::models::{Delegation, DelegationId, Scope, UserId, UserRecord};
use crate::store::{DecisionLedger, DelegationStore, RevokeOutcome, UserDirectory};

const DELEGATION_TREE: &str = "delegations";
const SLOT_TREE: &str = "slots";
const USER_TREE: &str = "users";
const DECISION_TREE: &str = "decisions";

fn pair_key(user: &UserId, scope: &Scope) -> Vec<u8> {
    let mut key = Vec::with_capacity(user.as_str().len() + 16);
    key.extend_from_slice(user.as_str().as_bytes());
    key.push(0);
    key.extend_from_slice(scope.key().as_bytes());
    key
}

fn decode(raw: &[u8]) -> Result<Delegation> {
    Ok(serde_json::from_slice(raw)?)
}

fn abort(err: StoreError) -> ConflictableTransactionError<StoreError> {
    ConflictableTransactionError::Abort(err)
}

fn flatten(err: TransactionError<StoreError>) -> StoreError {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => StoreError::Database(e),
    }
}

/// Sled database holding the delegation graph and its collaborators.
///
/// # Example
///
/// ```rust
/// use liquid_store::{SledStore, UserId};
///
/// let store = SledStore::temporary().unwrap();
/// store.register_user(&UserId::new("alice")).unwrap();
/// ```
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
    delegations: sled::Tree,
    slots: sled::Tree,
    users: sled::Tree,
    decisions: sled::Tree,
}

impl SledStore {
    /// Opens or creates a database directory.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the path is unusable or the
    /// database is corrupted.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// Creates a throwaway database that disappears on drop.
    pub fn temporary() -> Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        Ok(Self {
            delegations: db.open_tree(DELEGATION_TREE)?,
            slots: db.open_tree(SLOT_TREE)?,
            users: db.open_tree(USER_TREE)?,
            decisions: db.open_tree(DECISION_TREE)?,
            db,
        })
    }

    /// Adds a live user, or revives a soft-deleted one.
    pub fn register_user(&self, user: &UserId) -> Result<()> {
        let record = UserRecord::new(user.clone());
        self.users
            .insert(user.as_str().as_bytes(), serde_json::to_vec(&record)?)?;
        Ok(())
    }

    /// Flags a user as soft-deleted. Returns false if the user is unknown.
    pub fn soft_delete_user(&self, user: &UserId) -> Result<bool> {
        let Some(raw) = self.users.get(user.as_str().as_bytes())? else {
            return Ok(false);
        };
        let mut record: UserRecord = serde_json::from_slice(&raw)?;
        record.is_deleted = true;
        self.users
            .insert(user.as_str().as_bytes(), serde_json::to_vec(&record)?)?;
        Ok(true)
    }

    /// Records that `user` has cast a final decision on `scope`.
    pub fn record_decision(&self, user: &UserId, scope: &Scope) -> Result<()> {
        self.decisions.insert(pair_key(user, scope), &[] as &[u8])?;
        Ok(())
    }

    /// Flushes dirty buffers to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn scan(&self, keep: impl Fn(&Delegation) -> bool) -> Result<Vec<Delegation>> {
        let mut rows = Vec::new();
        for item in self.delegations.iter() {
            let (_, raw) = item?;
            let delegation = decode(&raw)?;
            if keep(&delegation) {
                rows.push(delegation);
            }
        }
        Ok(rows)
    }

    fn scan_active(&self, now: DateTime<Utc>) -> Result<Vec<Delegation>> {
        self.scan(|d| d.is_active(now))
    }

    fn scan_live(&self, now: DateTime<Utc>) -> Result<Vec<Delegation>> {
        self.scan(|d| d.occupies_slot(now))
    }

    /// The row currently holding the `(delegator, scope)` slot, in any state.
    fn slot_occupant(&self, delegator: &UserId, scope: &Scope) -> Result<Option<Delegation>> {
        let Some(id) = self.slots.get(pair_key(delegator, scope))? else {
            return Ok(None);
        };
        match self.delegations.get(&id)? {
            Some(raw) => Ok(Some(decode(&raw)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl DelegationStore for SledStore {
    async fn find_by_id(&self, id: &DelegationId) -> Result<Option<Delegation>> {
        match self.delegations.get(id.to_string().as_bytes())? {
            Some(raw) => Ok(Some(decode(&raw)?)),
            None => Ok(None),
        }
    }

    async fn find_active_by_delegator_and_scope(
        &self,
        delegator: &UserId,
        scope: &Scope,
        now: DateTime<Utc>,
    ) -> Result<Option<Delegation>> {
        Ok(self
            .slot_occupant(delegator, scope)?
            .filter(|d| d.is_active(now)))
    }

    async fn find_live_by_delegator_and_scope(
        &self,
        delegator: &UserId,
        scope: &Scope,
        now: DateTime<Utc>,
    ) -> Result<Option<Delegation>> {
        Ok(self
            .slot_occupant(delegator, scope)?
            .filter(|d| d.occupies_slot(now)))
    }

    async fn list_live_by_delegatee_and_scope(
        &self,
        delegatee: &UserId,
        scope: &Scope,
        now: DateTime<Utc>,
    ) -> Result<Vec<Delegation>> {
        self.scan(|d| d.occupies_slot(now) && &d.delegatee_id == delegatee && &d.scope == scope)
    }

    async fn list_active_by_delegator(
        &self,
        delegator: &UserId,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Delegation>> {
        let mut rows: Vec<Delegation> = self
            .scan_active(now)?
            .into_iter()
            .filter(|d| &d.delegator_id == delegator)
            .collect();
        rows.sort_by_key(|d| d.created_at);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn count_active_by_delegator(
        &self,
        delegator: &UserId,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        Ok(self
            .scan_active(now)?
            .iter()
            .filter(|d| &d.delegator_id == delegator)
            .count())
    }

    async fn count_live_by_delegator(
        &self,
        delegator: &UserId,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        Ok(self
            .scan_live(now)?
            .iter()
            .filter(|d| &d.delegator_id == delegator)
            .count())
    }

    async fn count_active_by_delegatee(
        &self,
        delegatee: &UserId,
        scope: Option<&Scope>,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        Ok(self
            .scan_active(now)?
            .iter()
            .filter(|d| &d.delegatee_id == delegatee)
            .filter(|d| scope.map_or(true, |s| &d.scope == s))
            .count())
    }

    async fn count_active(&self, scope: Option<&Scope>, now: DateTime<Utc>) -> Result<usize> {
        Ok(self
            .scan_active(now)?
            .iter()
            .filter(|d| scope.map_or(true, |s| &d.scope == s))
            .count())
    }

    async fn count_distinct_scopes_by_delegatee(
        &self,
        delegatee: &UserId,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let rows = self.scan_active(now)?;
        let scopes: HashSet<&Scope> = rows
            .iter()
            .filter(|d| &d.delegatee_id == delegatee)
            .map(|d| &d.scope)
            .collect();
        Ok(scopes.len())
    }

    async fn count_distinct_delegatees(&self, now: DateTime<Utc>) -> Result<usize> {
        let rows = self.scan_active(now)?;
        let delegatees: HashSet<&UserId> = rows.iter().map(|d| &d.delegatee_id).collect();
        Ok(delegatees.len())
    }

    async fn count_delegatees_with_in_degree_above(
        &self,
        in_degree: usize,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let rows = self.scan_active(now)?;
        let mut degrees: HashMap<&UserId, usize> = HashMap::new();
        for d in &rows {
            *degrees.entry(&d.delegatee_id).or_default() += 1;
        }
        Ok(degrees.values().filter(|&&n| n > in_degree).count())
    }

    async fn insert_if_vacant(
        &self,
        delegation: Delegation,
        now: DateTime<Utc>,
    ) -> Result<Delegation> {
        let slot = pair_key(&delegation.delegator_id, &delegation.scope);
        let id_key = delegation.id.to_string().into_bytes();
        let encoded = serde_json::to_vec(&delegation)?;

        (&self.delegations, &self.slots)
            .transaction(|(rows, slots)| {
                if let Some(occupant_id) = slots.get(&slot)? {
                    if let Some(raw) = rows.get(&occupant_id)? {
                        let occupant = decode(&raw).map_err(abort)?;
                        if occupant.occupies_slot(now) {
                            return Err(abort(StoreError::SlotOccupied {
                                delegator: delegation.delegator_id.clone(),
                                scope: delegation.scope.clone(),
                                existing: occupant.id,
                            }));
                        }
                    }
                }
                rows.insert(id_key.clone(), encoded.clone())?;
                slots.insert(slot.clone(), id_key.clone())?;
                Ok(())
            })
            .map_err(flatten)?;

        debug!(id = %delegation.id, slot = %delegation.scope, "delegation row stored");
        Ok(delegation)
    }

    async fn mark_revoked(&self, id: &DelegationId, at: DateTime<Utc>) -> Result<RevokeOutcome> {
        let id_key = id.to_string().into_bytes();
        let missing = *id;

        (&self.delegations, &self.slots)
            .transaction(|(rows, slots)| {
                let Some(raw) = rows.get(&id_key)? else {
                    return Err(abort(StoreError::NotFound(missing)));
                };
                let mut delegation = decode(&raw).map_err(abort)?;
                if delegation.revoked_at.is_some() {
                    return Ok(RevokeOutcome::AlreadyRevoked(delegation));
                }

                delegation.revoked_at = Some(at);
                let encoded = serde_json::to_vec(&delegation)
                    .map_err(|e| abort(StoreError::Serialization(e)))?;
                rows.insert(id_key.clone(), encoded)?;

                let slot = pair_key(&delegation.delegator_id, &delegation.scope);
                if slots.get(&slot)?.is_some_and(|held| &held[..] == id_key.as_slice()) {
                    slots.remove(slot)?;
                }
                Ok(RevokeOutcome::Revoked(delegation))
            })
            .map_err(flatten)
    }
}

#[async_trait]
impl UserDirectory for SledStore {
    async fn lookup(&self, user: &UserId) -> Result<Option<UserRecord>> {
        match self.users.get(user.as_str().as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl DecisionLedger for SledStore {
    async fn has_decided(&self, user: &UserId, scope: &Scope) -> Result<bool> {
        Ok(self.decisions.contains_key(pair_key(user, scope))?)
    }
}
