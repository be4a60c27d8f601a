//! # Super-Delegate Detector
//!
//! Flags delegatees that one more delegation would push into holding an
//! outsized share of decision weight.
//!
//! ## Signals
//!
//! | Signal | Projected value | Trips when |
//! |--------|-----------------|------------|
//! | In-degree | current + 1 | `≥ global_in_degree_threshold` |
//! | Scope breadth | current + 1 if the scope is new | `≥ distinct_scopes_threshold` |
//! | Percentile rank | delegatees strictly above ÷ population | `≤ top_percentile_threshold` |
//!
//! Percentile rank runs from 0 (most delegated-to) toward 1. It is only
//! computed once the graph holds `min_population_for_percentile`
//! delegatees; in a graph of three people everyone is "top 5%".

use chrono::{DateTime, Utc};
use liquid_store::{Clock, DelegationStore, Scope, ScopeKind, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{Result, RiskError};

/// Super-delegate thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuperDelegateConfig {
    pub global_in_degree_threshold: usize,
    pub distinct_scopes_threshold: usize,
    /// Fraction in `[0, 1]`.
    pub top_percentile_threshold: f64,
    /// Fewer delegatees than this and percentile rank is not evaluated.
    pub min_population_for_percentile: usize,
}

impl SuperDelegateConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            global_in_degree_threshold: 500,
            distinct_scopes_threshold: 12,
            top_percentile_threshold: 0.05,
            min_population_for_percentile: 20,
        }
    }

    #[must_use]
    pub const fn with_in_degree_threshold(mut self, threshold: usize) -> Self {
        self.global_in_degree_threshold = threshold;
        self
    }

    #[must_use]
    pub const fn with_distinct_scopes_threshold(mut self, threshold: usize) -> Self {
        self.distinct_scopes_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_top_percentile_threshold(mut self, threshold: f64) -> Self {
        self.top_percentile_threshold = threshold;
        self
    }

    #[must_use]
    pub const fn with_min_population(mut self, population: usize) -> Self {
        self.min_population_for_percentile = population;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.global_in_degree_threshold == 0 {
            return Err(RiskError::InvalidConfig(
                "global_in_degree_threshold must be at least 1".into(),
            ));
        }
        if self.distinct_scopes_threshold == 0 {
            return Err(RiskError::InvalidConfig(
                "distinct_scopes_threshold must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.top_percentile_threshold) {
            return Err(RiskError::InvalidConfig(format!(
                "top_percentile_threshold must be within [0, 1], got {}",
                self.top_percentile_threshold
            )));
        }
        Ok(())
    }
}

impl Default for SuperDelegateConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Raw numbers behind a super-delegate assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuperDelegateStats {
    pub current_in_degree: usize,
    pub projected_in_degree: usize,
    pub current_distinct_scopes: usize,
    pub projected_distinct_scopes: usize,
    /// Whether the added scope is one the delegatee does not yet hold.
    pub scope_is_new: bool,
    /// Distinct delegatees once the new edge exists.
    pub population: usize,
    /// Delegatees with a strictly higher in-degree than the projection.
    pub delegatees_above: usize,
    /// `None` when the population is too small to rank.
    pub percentile_rank: Option<f64>,
}

/// One tripped condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum RiskTrigger {
    InDegree {
        projected: usize,
        threshold: usize,
    },
    ScopeBreadth {
        projected: usize,
        threshold: usize,
        added: Option<ScopeKind>,
    },
    TopPercentile {
        rank: f64,
        threshold: f64,
        population: usize,
    },
}

impl std::fmt::Display for RiskTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InDegree {
                projected,
                threshold,
            } => write!(
                f,
                "would receive {projected} active delegations (threshold {threshold})"
            ),
            Self::ScopeBreadth {
                projected,
                threshold,
                added,
            } => {
                write!(
                    f,
                    "would hold delegations across {projected} distinct scopes (threshold {threshold})"
                )?;
                if let Some(kind) = added {
                    write!(f, ", spreading into more distinct {}", kind.plural())?;
                }
                Ok(())
            }
            Self::TopPercentile {
                rank,
                threshold,
                population,
            } => write!(
                f,
                "would rank in the top {:.1}% of {population} delegatees (threshold {:.1}%)",
                rank * 100.0,
                threshold * 100.0
            ),
        }
    }
}

/// Outcome of [`SuperDelegateDetector::would_create_super_delegate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuperDelegateReport {
    pub delegatee: UserId,
    pub added_scope: Option<Scope>,
    pub risk: bool,
    /// Every tripped condition, joined; a short all-clear otherwise.
    pub reason: String,
    pub triggers: Vec<RiskTrigger>,
    pub stats: SuperDelegateStats,
}

impl SuperDelegateReport {
    /// Applies `config` to precomputed stats.
    pub fn evaluate(
        delegatee: UserId,
        added_scope: Option<Scope>,
        stats: SuperDelegateStats,
        config: &SuperDelegateConfig,
    ) -> Self {
        let mut triggers = Vec::new();

        if stats.projected_in_degree >= config.global_in_degree_threshold {
            triggers.push(RiskTrigger::InDegree {
                projected: stats.projected_in_degree,
                threshold: config.global_in_degree_threshold,
            });
        }
        if stats.projected_distinct_scopes >= config.distinct_scopes_threshold {
            triggers.push(RiskTrigger::ScopeBreadth {
                projected: stats.projected_distinct_scopes,
                threshold: config.distinct_scopes_threshold,
                added: added_scope
                    .as_ref()
                    .filter(|scope| stats.scope_is_new && !scope.is_global())
                    .map(Scope::kind),
            });
        }
        if let Some(rank) = stats.percentile_rank {
            if rank <= config.top_percentile_threshold {
                triggers.push(RiskTrigger::TopPercentile {
                    rank,
                    threshold: config.top_percentile_threshold,
                    population: stats.population,
                });
            }
        }

        let reason = if triggers.is_empty() {
            "below all super-delegate thresholds".to_string()
        } else {
            triggers
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ")
        };

        Self {
            delegatee,
            added_scope,
            risk: !triggers.is_empty(),
            reason,
            triggers,
            stats,
        }
    }
}

/// Computes [`SuperDelegateReport`]s from live store counts.
pub struct SuperDelegateDetector {
    store: Arc<dyn DelegationStore>,
    clock: Arc<dyn Clock>,
    config: SuperDelegateConfig,
}

impl SuperDelegateDetector {
    pub fn new(
        store: Arc<dyn DelegationStore>,
        clock: Arc<dyn Clock>,
        config: SuperDelegateConfig,
    ) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &SuperDelegateConfig {
        &self.config
    }

    /// Projects the effect of one more delegation into `delegatee`,
    /// optionally in `added_scope`.
    pub async fn would_create_super_delegate(
        &self,
        delegatee: &UserId,
        added_scope: Option<&Scope>,
    ) -> Result<SuperDelegateReport> {
        self.assess_at(delegatee, added_scope, self.clock.now()).await
    }

    /// As [`Self::would_create_super_delegate`] at an explicit instant.
    pub async fn assess_at(
        &self,
        delegatee: &UserId,
        added_scope: Option<&Scope>,
        now: DateTime<Utc>,
    ) -> Result<SuperDelegateReport> {
        let stats = self.stats(delegatee, added_scope, now).await?;
        let report =
            SuperDelegateReport::evaluate(delegatee.clone(), added_scope.cloned(), stats, &self.config);

        if report.risk {
            info!(delegatee = %delegatee, reason = %report.reason, "super-delegate risk");
        } else {
            debug!(
                delegatee = %delegatee,
                in_degree = report.stats.projected_in_degree,
                "no super-delegate risk"
            );
        }
        Ok(report)
    }

    async fn stats(
        &self,
        delegatee: &UserId,
        added_scope: Option<&Scope>,
        now: DateTime<Utc>,
    ) -> Result<SuperDelegateStats> {
        let store = &self.store;
        let current_in_degree = store.count_active_by_delegatee(delegatee, None, now).await?;
        let current_distinct_scopes = store
            .count_distinct_scopes_by_delegatee(delegatee, now)
            .await?;

        let scope_is_new = match added_scope {
            Some(scope) => {
                store
                    .count_active_by_delegatee(delegatee, Some(scope), now)
                    .await?
                    == 0
            }
            None => false,
        };

        let projected_in_degree = current_in_degree + 1;
        let projected_distinct_scopes = current_distinct_scopes + usize::from(scope_is_new);

        let population = store.count_distinct_delegatees(now).await?
            + usize::from(current_in_degree == 0);
        let delegatees_above = store
            .count_delegatees_with_in_degree_above(projected_in_degree, now)
            .await?;

        let percentile_rank = (population >= self.config.min_population_for_percentile
            && population > 0)
            .then(|| delegatees_above as f64 / population as f64);

        Ok(SuperDelegateStats {
            current_in_degree,
            projected_in_degree,
            current_distinct_scopes,
            projected_distinct_scopes,
            scope_is_new,
            population,
            delegatees_above,
            percentile_rank,
        })
    }
}
