//! In-memory backends.
//!
//! Used by tests and by hosts that rebuild the graph from another source at
//! startup. A single `tokio` write lock covers check-and-insert, which is what
//! makes [`MemoryStore::insert_if_vacant`] atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use crate::error::{Result, StoreError};
use crate::models::{Delegation, DelegationId, Scope, UserId, UserRecord};
use crate::store::{DecisionLedger, DelegationStore, RevokeOutcome, UserDirectory};

#[derive(Debug, Default)]
struct Table {
    /// Rows in insertion order.
    rows: Vec<Delegation>,
    /// Row id to position in `rows`.
    index: HashMap<DelegationId, usize>,
}

impl Table {
    fn active(&self, now: DateTime<Utc>) -> impl Iterator<Item = &Delegation> + '_ {
        self.rows.iter().filter(move |d| d.is_active(now))
    }

    fn live(&self, now: DateTime<Utc>) -> impl Iterator<Item = &Delegation> + '_ {
        self.rows.iter().filter(move |d| d.occupies_slot(now))
    }

    fn push(&mut self, delegation: Delegation) {
        self.index.insert(delegation.id, self.rows.len());
        self.rows.push(delegation);
    }
}

/// Delegation store held entirely in memory.
///
/// # Example
///
/// ```rust
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use chrono::Utc;
/// use liquid_store::{DelegationStore, MemoryStore, UserId};
///
/// let store = MemoryStore::new();
/// let n = store.count_active_by_delegator(&UserId::new("alice"), Utc::now()).await.unwrap();
/// assert_eq!(n, 0);
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    table: RwLock<Table>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a row without any invariant checks.
    ///
    /// Simulates rows that reached the table out of band, such as a restore
    /// from backup. May introduce duplicates or cycles.
    pub async fn import_unchecked(&self, delegation: Delegation) {
        self.table.write().await.push(delegation);
    }

    /// Sets the soft-delete tombstone, as the external housekeeping job does.
    pub async fn soft_delete(&self, id: &DelegationId) -> Result<()> {
        let mut table = self.table.write().await;
        let pos = *table.index.get(id).ok_or(StoreError::NotFound(*id))?;
        table.rows[pos].is_deleted = true;
        Ok(())
    }

    /// Makes every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Total rows in any state.
    pub async fn len(&self) -> usize {
        self.table.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store switched off".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DelegationStore for MemoryStore {
    async fn find_by_id(&self, id: &DelegationId) -> Result<Option<Delegation>> {
        self.check_available()?;
        let table = self.table.read().await;
        Ok(table.index.get(id).map(|&pos| table.rows[pos].clone()))
    }

    async fn find_active_by_delegator_and_scope(
        &self,
        delegator: &UserId,
        scope: &Scope,
        now: DateTime<Utc>,
    ) -> Result<Option<Delegation>> {
        self.check_available()?;
        let table = self.table.read().await;
        let found = table
            .active(now)
            .find(|d| &d.delegator_id == delegator && &d.scope == scope)
            .cloned();
        Ok(found)
    }

    async fn find_live_by_delegator_and_scope(
        &self,
        delegator: &UserId,
        scope: &Scope,
        now: DateTime<Utc>,
    ) -> Result<Option<Delegation>> {
        self.check_available()?;
        let table = self.table.read().await;
        let found = table
            .live(now)
            .find(|d| &d.delegator_id == delegator && &d.scope == scope)
            .cloned();
        Ok(found)
    }

    async fn list_live_by_delegatee_and_scope(
        &self,
        delegatee: &UserId,
        scope: &Scope,
        now: DateTime<Utc>,
    ) -> Result<Vec<Delegation>> {
        self.check_available()?;
        let table = self.table.read().await;
        let rows = table
            .live(now)
            .filter(|d| &d.delegatee_id == delegatee && &d.scope == scope)
            .cloned()
            .collect();
        Ok(rows)
    }

    async fn list_active_by_delegator(
        &self,
        delegator: &UserId,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Delegation>> {
        self.check_available()?;
        let table = self.table.read().await;
        Ok(table
            .active(now)
            .filter(|d| &d.delegator_id == delegator)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count_active_by_delegator(
        &self,
        delegator: &UserId,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        self.check_available()?;
        let table = self.table.read().await;
        Ok(table.active(now).filter(|d| &d.delegator_id == delegator).count())
    }

    async fn count_live_by_delegator(
        &self,
        delegator: &UserId,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        self.check_available()?;
        let table = self.table.read().await;
        let live = table.live(now).filter(|d| &d.delegator_id == delegator).count();
        Ok(live)
    }

    async fn count_active_by_delegatee(
        &self,
        delegatee: &UserId,
        scope: Option<&Scope>,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        self.check_available()?;
        let table = self.table.read().await;
        Ok(table
            .active(now)
            .filter(|d| &d.delegatee_id == delegatee)
            .filter(|d| scope.map_or(true, |s| &d.scope == s))
            .count())
    }

    async fn count_active(&self, scope: Option<&Scope>, now: DateTime<Utc>) -> Result<usize> {
        self.check_available()?;
        let table = self.table.read().await;
        Ok(table
            .active(now)
            .filter(|d| scope.map_or(true, |s| &d.scope == s))
            .count())
    }

    async fn count_distinct_scopes_by_delegatee(
        &self,
        delegatee: &UserId,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        self.check_available()?;
        let table = self.table.read().await;
        let scopes: HashSet<&Scope> = table
            .active(now)
            .filter(|d| &d.delegatee_id == delegatee)
            .map(|d| &d.scope)
            .collect();
        Ok(scopes.len())
    }

    async fn count_distinct_delegatees(&self, now: DateTime<Utc>) -> Result<usize> {
        self.check_available()?;
        let table = self.table.read().await;
        let delegatees: HashSet<&UserId> = table.active(now).map(|d| &d.delegatee_id).collect();
        Ok(delegatees.len())
    }

    async fn count_delegatees_with_in_degree_above(
        &self,
        in_degree: usize,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        self.check_available()?;
        let table = self.table.read().await;
        let mut degrees: HashMap<&UserId, usize> = HashMap::new();
        for d in table.active(now) {
            *degrees.entry(&d.delegatee_id).or_default() += 1;
        }
        Ok(degrees.values().filter(|&&n| n > in_degree).count())
    }

    async fn insert_if_vacant(
        &self,
        delegation: Delegation,
        now: DateTime<Utc>,
    ) -> Result<Delegation> {
        self.check_available()?;
        let mut table = self.table.write().await;

        if let Some(existing) = table.rows.iter().find(|d| {
            d.delegator_id == delegation.delegator_id
                && d.scope == delegation.scope
                && d.occupies_slot(now)
        }) {
            return Err(StoreError::SlotOccupied {
                delegator: delegation.delegator_id.clone(),
                scope: delegation.scope.clone(),
                existing: existing.id,
            });
        }

        table.push(delegation.clone());
        Ok(delegation)
    }

    async fn mark_revoked(&self, id: &DelegationId, at: DateTime<Utc>) -> Result<RevokeOutcome> {
        self.check_available()?;
        let mut table = self.table.write().await;
        let pos = *table.index.get(id).ok_or(StoreError::NotFound(*id))?;
        let row = &mut table.rows[pos];

        if row.revoked_at.is_some() {
            return Ok(RevokeOutcome::AlreadyRevoked(row.clone()));
        }
        row.revoked_at = Some(at);
        Ok(RevokeOutcome::Revoked(row.clone()))
    }
}

/// Identity directory held in memory.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    users: RwLock<HashMap<UserId, UserRecord>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a directory with every listed user present and live.
    pub fn with_users<I, U>(users: I) -> Self
    where
        I: IntoIterator<Item = U>,
        U: Into<UserId>,
    {
        let users = users
            .into_iter()
            .map(|u| {
                let record = UserRecord::new(u);
                (record.id.clone(), record)
            })
            .collect();
        Self {
            users: RwLock::new(users),
        }
    }

    pub async fn add_user(&self, user: impl Into<UserId>) {
        let record = UserRecord::new(user);
        self.users.write().await.insert(record.id.clone(), record);
    }

    /// Flags the user as soft-deleted. Unknown users are ignored.
    pub async fn soft_delete_user(&self, user: &UserId) {
        if let Some(record) = self.users.write().await.get_mut(user) {
            record.is_deleted = true;
        }
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn lookup(&self, user: &UserId) -> Result<Option<UserRecord>> {
        Ok(self.users.read().await.get(user).cloned())
    }
}

/// Decision ledger held in memory.
#[derive(Debug, Default)]
pub struct MemoryDecisions {
    decided: RwLock<HashSet<(UserId, Scope)>>,
}

impl MemoryDecisions {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, user: impl Into<UserId>, scope: Scope) {
        self.decided.write().await.insert((user.into(), scope));
    }
}

#[async_trait]
impl DecisionLedger for MemoryDecisions {
    async fn has_decided(&self, user: &UserId, scope: &Scope) -> Result<bool> {
        Ok(self
            .decided
            .read()
            .await
            .contains(&(user.clone(), scope.clone())))
    }
}
