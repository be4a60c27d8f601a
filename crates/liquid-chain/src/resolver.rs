//! # Chain Resolver
//!
//! Walks delegation edges from a user toward the terminal decision-maker for
//! a scope.
//!
//! ## Algorithm
//!
//! ```text
//!   current = origin
//!   loop:
//!     edge = active delegation of `current` in `scope`
//!          | (scope ≠ global) active global delegation of `current`,
//!            if the fallback policy admits it
//!     none  → done, `current` decides
//!     some  → walk.advance(edge.delegatee)   // visited-set + hop budget
//! ```
//!
//! The walk is a pure function of store state. It re-checks the visited set
//! on every read, so a loop restored out of band from a backup is caught here
//! even though writes already refuse to create one.
//!
//! Reads follow active edges only. The pre-write check follows live edges
//! (active or pending), so an edge scheduled to start later cannot be used to
//! close a loop that appears once it starts.
//!
//! ## Modes
//!
//! | Mode | Used by | On loop / depth / store failure |
//! |------|---------|---------------------------------|
//! | [`ResolveMode::Lenient`] | read paths | origin decides for itself, `degraded` set |
//! | [`ResolveMode::Strict`] | pre-write checks | typed [`ChainError`] |

use chrono::{DateTime, Utc};
use futures::future::join_all;
use liquid_store::{Clock, Delegation, DelegationMode, DelegationStore, Scope, StoreError, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{ChainError, Result};
use crate::walk::{ChainWalk, Resolution};

/// When a node without a scoped delegation follows its global one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Any active global delegation seeds other scopes.
    #[default]
    AnyGlobal,
    /// Only a global delegation in [`DelegationMode::HybridSeed`] seeds other scopes.
    HybridSeedOnly,
    /// Scoped chains never consult global delegations.
    Disabled,
}

impl FallbackPolicy {
    fn admits(&self, global: &Delegation) -> bool {
        match self {
            Self::HybridSeedOnly => global.mode == DelegationMode::HybridSeed,
            Self::AnyGlobal => true,
            Self::Disabled => false,
        }
    }
}

/// How resolution failures are surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveMode {
    /// Failures propagate as [`ChainError`].
    Strict,
    /// Failures degrade to "origin decides".
    #[default]
    Lenient,
}

/// Resolver configuration.
///
/// ```rust
/// use liquid_chain::{FallbackPolicy, ResolverConfig};
///
/// let config = ResolverConfig::new()
///     .with_max_depth(4)
///     .with_fallback(FallbackPolicy::HybridSeedOnly);
/// assert_eq!(config.max_depth, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Maximum hops from origin to final delegatee.
    pub max_depth: usize,
    pub fallback: FallbackPolicy,
}

impl ResolverConfig {
    /// Defaults: depth 8, any global delegation seeds scoped chains.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_depth: 8,
            fallback: FallbackPolicy::AnyGlobal,
        }
    }

    #[must_use]
    pub const fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    #[must_use]
    pub const fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Effective voting weight after resolving a set of voters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub scope: Option<Scope>,
    /// Final decision-maker to the number of voters they decide for.
    pub weights: BTreeMap<UserId, usize>,
    /// Voters whose chains were broken and who therefore decide for themselves.
    pub degraded: Vec<UserId>,
}

impl Tally {
    pub fn weight_of(&self, user: &UserId) -> usize {
        self.weights.get(user).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.weights.values().sum()
    }
}

struct Hop {
    delegatee: UserId,
    via_fallback: bool,
}

/// Which rows a walk treats as edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeView {
    /// Edges in force right now.
    Active,
    /// Active edges plus pending ones that will start later.
    Live,
}

/// Resolves delegation chains against a [`DelegationStore`].
///
/// Holds no mutable state; share it freely behind an `Arc`.
pub struct ChainResolver {
    store: Arc<dyn DelegationStore>,
    clock: Arc<dyn Clock>,
    config: ResolverConfig,
}

impl ChainResolver {
    pub fn new(
        store: Arc<dyn DelegationStore>,
        clock: Arc<dyn Clock>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolves `user`'s final decision-maker in `scope`.
    ///
    /// # Errors
    ///
    /// Only in [`ResolveMode::Strict`]: [`ChainError::CycleDetected`],
    /// [`ChainError::ChainTooLong`] or [`ChainError::Store`]. Lenient mode
    /// never fails.
    pub async fn resolve(
        &self,
        user: &UserId,
        scope: &Scope,
        mode: ResolveMode,
    ) -> Result<Resolution> {
        match self.walk_from(user, scope).await {
            Ok(walk) => {
                let resolution = walk.finish();
                debug!(
                    origin = %user,
                    scope = %scope,
                    delegatee = %resolution.delegatee,
                    hops = resolution.hops(),
                    "chain resolved"
                );
                Ok(resolution)
            }
            Err(err) => match mode {
                ResolveMode::Strict => Err(err),
                ResolveMode::Lenient => {
                    warn!(origin = %user, scope = %scope, error = %err, "chain broken, origin decides");
                    Ok(Resolution::degraded(user.clone(), scope.clone(), err.to_string()))
                }
            },
        }
    }

    /// Lenient resolution returning only the final decision-maker.
    pub async fn resolve_delegatee(&self, user: &UserId, scope: &Scope) -> UserId {
        match self.resolve(user, scope, ResolveMode::Lenient).await {
            Ok(resolution) => resolution.delegatee,
            Err(_) => user.clone(),
        }
    }

    /// Strict pre-write check for a prospective edge `delegator → delegatee`.
    ///
    /// Walks live edges from `delegatee` as though the new edge already
    /// existed, then measures the longest live chain already feeding into
    /// `delegator`. Returns the chain the delegator would end up with.
    ///
    /// # Errors
    ///
    /// - [`ChainError::CycleDetected`] if the walk returns to `delegator`
    ///   (or runs into any other loop); the cycle starts at `delegator`.
    /// - [`ChainError::ChainTooLong`] if the new chain exceeds `max_depth`,
    ///   counting both the hops below the new edge and the longest chain
    ///   above it.
    pub async fn check_new_edge(
        &self,
        delegator: &UserId,
        delegatee: &UserId,
        scope: &Scope,
    ) -> Result<Vec<UserId>> {
        let now = self.clock.now();
        let max_depth = self.config.max_depth;
        let mut walk = ChainWalk::start(delegator.clone(), scope.clone(), max_depth);
        walk.advance(delegatee.clone(), false)?;
        self.extend(&mut walk, now, EdgeView::Live).await?;

        let below = walk.hops();
        let above = self
            .longest_chain_into(delegator, scope, now, max_depth - below)
            .await?;
        if above.len() - 1 + below > max_depth {
            let mut path = above;
            path.extend(walk.path()[1..].iter().cloned());
            return Err(ChainError::ChainTooLong {
                scope: scope.clone(),
                max_depth,
                path,
            });
        }
        Ok(walk.path().to_vec())
    }

    /// Resolves every voter leniently and sums weight per decision-maker.
    pub async fn tally(&self, voters: &[UserId], scope: &Scope) -> Tally {
        let resolutions = join_all(
            voters
                .iter()
                .map(|voter| self.resolve(voter, scope, ResolveMode::Lenient)),
        )
        .await;

        let mut tally = Tally {
            scope: Some(scope.clone()),
            ..Tally::default()
        };
        for (voter, outcome) in voters.iter().zip(resolutions) {
            let resolution = outcome
                .unwrap_or_else(|e| Resolution::degraded(voter.clone(), scope.clone(), e.to_string()));
            if resolution.is_degraded() {
                tally.degraded.push(voter.clone());
            }
            *tally.weights.entry(resolution.delegatee).or_default() += 1;
        }
        tally
    }

    async fn walk_from(&self, origin: &UserId, scope: &Scope) -> Result<ChainWalk> {
        let now = self.clock.now();
        let mut walk = ChainWalk::start(origin.clone(), scope.clone(), self.config.max_depth);
        self.extend(&mut walk, now, EdgeView::Active).await?;
        Ok(walk)
    }

    async fn extend(
        &self,
        walk: &mut ChainWalk,
        now: DateTime<Utc>,
        view: EdgeView,
    ) -> Result<()> {
        while let Some(hop) = self.next_hop(walk.current(), walk.scope(), now, view).await? {
            walk.advance(hop.delegatee, hop.via_fallback)?;
        }
        Ok(())
    }

    async fn edge_of(
        &self,
        node: &UserId,
        scope: &Scope,
        now: DateTime<Utc>,
        view: EdgeView,
    ) -> std::result::Result<Option<Delegation>, StoreError> {
        match view {
            EdgeView::Active => {
                self.store
                    .find_active_by_delegator_and_scope(node, scope, now)
                    .await
            }
            EdgeView::Live => {
                self.store
                    .find_live_by_delegator_and_scope(node, scope, now)
                    .await
            }
        }
    }

    async fn next_hop(
        &self,
        node: &UserId,
        scope: &Scope,
        now: DateTime<Utc>,
        view: EdgeView,
    ) -> std::result::Result<Option<Hop>, StoreError> {
        if let Some(edge) = self.edge_of(node, scope, now, view).await? {
            return Ok(Some(Hop {
                delegatee: edge.delegatee_id,
                via_fallback: false,
            }));
        }

        match scope {
            Scope::Global => Ok(None),
            Scope::Poll(_)
            | Scope::Label(_)
            | Scope::Field(_)
            | Scope::Institution(_)
            | Scope::Value(_)
            | Scope::Idea(_) => {
                if self.config.fallback == FallbackPolicy::Disabled {
                    return Ok(None);
                }
                let global = self.edge_of(node, &Scope::Global, now, view).await?;
                Ok(global
                    .filter(|edge| self.config.fallback.admits(edge))
                    .map(|edge| Hop {
                        delegatee: edge.delegatee_id,
                        via_fallback: true,
                    }))
            }
        }
    }

    /// Users whose next live hop in `scope` lands on `target`.
    async fn feeders(
        &self,
        target: &UserId,
        scope: &Scope,
        now: DateTime<Utc>,
    ) -> std::result::Result<Vec<UserId>, StoreError> {
        let mut sources: Vec<UserId> = self
            .store
            .list_live_by_delegatee_and_scope(target, scope, now)
            .await?
            .into_iter()
            .map(|edge| edge.delegator_id)
            .collect();

        if scope.is_global() || self.config.fallback == FallbackPolicy::Disabled {
            return Ok(sources);
        }
        let globals = self
            .store
            .list_live_by_delegatee_and_scope(target, &Scope::Global, now)
            .await?;
        for edge in globals {
            if !self.config.fallback.admits(&edge) {
                continue;
            }
            // a scoped edge of its own shadows the global one
            if self
                .store
                .find_live_by_delegator_and_scope(&edge.delegator_id, scope, now)
                .await?
                .is_none()
            {
                sources.push(edge.delegator_id);
            }
        }
        Ok(sources)
    }

    /// Longest live chain ending at `node`, farthest user first.
    ///
    /// Stops once the chain is longer than `budget` hops; the caller only
    /// needs to know that the limit is exceeded.
    async fn longest_chain_into(
        &self,
        node: &UserId,
        scope: &Scope,
        now: DateTime<Utc>,
        budget: usize,
    ) -> std::result::Result<Vec<UserId>, StoreError> {
        let mut toward: HashMap<UserId, UserId> = HashMap::new();
        let mut frontier = vec![node.clone()];
        let mut farthest = node.clone();
        let mut levels = 0;

        while !frontier.is_empty() && levels <= budget {
            let mut next = Vec::new();
            for target in &frontier {
                for source in self.feeders(target, scope, now).await? {
                    if &source == node || toward.contains_key(&source) {
                        continue;
                    }
                    toward.insert(source.clone(), target.clone());
                    next.push(source);
                }
            }
            if let Some(first) = next.first() {
                farthest = first.clone();
                levels += 1;
            }
            frontier = next;
        }

        let mut chain = vec![farthest.clone()];
        let mut current = farthest;
        while let Some(step) = toward.get(&current) {
            chain.push(step.clone());
            current = step.clone();
        }
        Ok(chain)
    }
}
