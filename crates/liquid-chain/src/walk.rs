//! Visited-set walk state for delegation chains.
//!
//! Cycle detection and depth limiting live in one structure: every hop goes
//! through [`ChainWalk::advance`], which checks the visited set first and the
//! hop budget second. Nothing else mutates the path.

use liquid_store::{Scope, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{ChainError, Result};

/// An in-progress walk from an origin user toward a final delegatee.
///
/// # Example
///
/// ```rust
/// use liquid_chain::ChainWalk;
/// use liquid_store::Scope;
///
/// let mut walk = ChainWalk::start("a".into(), Scope::Global, 8);
/// walk.advance("b".into(), false).unwrap();
/// assert!(walk.advance("a".into(), false).is_err()); // a → b → a
/// ```
#[derive(Debug, Clone)]
pub struct ChainWalk {
    scope: Scope,
    max_depth: usize,
    path: Vec<UserId>,
    visited: HashSet<UserId>,
    fallback_hops: usize,
}

impl ChainWalk {
    /// Starts a walk at `origin`. `max_depth` counts hops, not nodes.
    pub fn start(origin: UserId, scope: Scope, max_depth: usize) -> Self {
        let mut visited = HashSet::new();
        visited.insert(origin.clone());
        Self {
            scope,
            max_depth,
            path: vec![origin],
            visited,
            fallback_hops: 0,
        }
    }

    /// Follows one edge to `next`.
    ///
    /// # Errors
    ///
    /// - [`ChainError::CycleDetected`] if `next` was already visited. The
    ///   reported cycle runs from its first occurrence back to itself.
    /// - [`ChainError::ChainTooLong`] if the hop would exceed `max_depth`.
    pub fn advance(&mut self, next: UserId, via_fallback: bool) -> Result<()> {
        if self.visited.contains(&next) {
            let start = self.path.iter().position(|u| u == &next).unwrap_or(0);
            let mut cycle = self.path[start..].to_vec();
            cycle.push(next);
            return Err(ChainError::CycleDetected {
                scope: self.scope.clone(),
                cycle,
            });
        }

        if self.hops() >= self.max_depth {
            let mut path = self.path.clone();
            path.push(next);
            return Err(ChainError::ChainTooLong {
                scope: self.scope.clone(),
                max_depth: self.max_depth,
                path,
            });
        }

        self.visited.insert(next.clone());
        self.path.push(next);
        if via_fallback {
            self.fallback_hops += 1;
        }
        Ok(())
    }

    pub fn origin(&self) -> &UserId {
        &self.path[0]
    }

    /// The node the walk currently stands on.
    pub fn current(&self) -> &UserId {
        // path is never empty: start() seeds it with the origin
        &self.path[self.path.len() - 1]
    }

    /// Edges followed so far.
    pub fn hops(&self) -> usize {
        self.path.len() - 1
    }

    pub fn path(&self) -> &[UserId] {
        &self.path
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Consumes the walk into a successful resolution.
    pub fn finish(self) -> Resolution {
        Resolution {
            origin: self.path[0].clone(),
            scope: self.scope,
            delegatee: self.path[self.path.len() - 1].clone(),
            fallback_hops: self.fallback_hops,
            path: self.path,
            degraded: None,
        }
    }
}

/// Outcome of resolving a user's final decision-maker in one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub origin: UserId,
    pub scope: Scope,
    /// Final decision-maker. Equals `origin` when nothing is delegated or
    /// when a lenient read degraded.
    pub delegatee: UserId,
    /// Every node visited, origin first, delegatee last.
    pub path: Vec<UserId>,
    /// Hops that followed a global delegation in place of a scoped one.
    pub fallback_hops: usize,
    /// Why a lenient read fell back to the origin, if it did.
    pub degraded: Option<String>,
}

impl Resolution {
    /// A lenient fallback: the origin decides for itself.
    pub fn degraded(origin: UserId, scope: Scope, reason: impl Into<String>) -> Self {
        Self {
            delegatee: origin.clone(),
            path: vec![origin.clone()],
            origin,
            scope,
            fallback_hops: 0,
            degraded: Some(reason.into()),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }

    /// True when the origin ends up deciding for itself.
    pub fn is_self(&self) -> bool {
        self.origin == self.delegatee
    }

    pub fn hops(&self) -> usize {
        self.path.len().saturating_sub(1)
    }
}
