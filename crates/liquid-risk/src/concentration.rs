//! # Concentration Monitor
//!
//! Share of all active delegations that point at one delegatee.
//!
//! ```text
//!   percent = active delegations into X (in scope)
//!             ───────────────────────────────────────
//!             all active delegations     (in scope)
//!
//!   percent ≥ high_threshold  → High
//!   percent ≥ warn_threshold  → Warn
//!   otherwise                 → Normal
//! ```
//!
//! An empty graph has `percent = 0`. Findings are advisory: nothing here
//! rejects a write.

use chrono::{DateTime, Utc};
use liquid_store::{Clock, DelegationStore, Scope, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{Result, RiskError};

/// Thresholds for the concentration levels, as fractions in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcentrationConfig {
    pub warn_threshold: f64,
    pub high_threshold: f64,
}

impl ConcentrationConfig {
    /// Defaults: warn at 5%, high at 7.5%.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            warn_threshold: 0.05,
            high_threshold: 0.075,
        }
    }

    #[must_use]
    pub fn with_warn_threshold(mut self, threshold: f64) -> Self {
        self.warn_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_high_threshold(mut self, threshold: f64) -> Self {
        self.high_threshold = threshold;
        self
    }

    /// Rejects thresholds outside `[0, 1]` or a warn level above high.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("warn_threshold", self.warn_threshold),
            ("high_threshold", self.high_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(RiskError::InvalidConfig(format!(
                    "concentration {name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.warn_threshold > self.high_threshold {
            return Err(RiskError::InvalidConfig(format!(
                "concentration warn_threshold {} is above high_threshold {}",
                self.warn_threshold, self.high_threshold
            )));
        }
        Ok(())
    }

    /// Classifies a share.
    pub fn level_for(&self, percent: f64) -> ConcentrationLevel {
        if percent >= self.high_threshold {
            ConcentrationLevel::High
        } else if percent >= self.warn_threshold {
            ConcentrationLevel::Warn
        } else {
            ConcentrationLevel::Normal
        }
    }
}

impl Default for ConcentrationConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Severity of a concentration reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcentrationLevel {
    Normal,
    Warn,
    High,
}

impl ConcentrationLevel {
    pub fn is_flagged(&self) -> bool {
        !matches!(self, Self::Normal)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Warn => "warn",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for ConcentrationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One concentration reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcentrationReport {
    pub delegatee: UserId,
    /// `None` measures across all scopes.
    pub scope: Option<Scope>,
    pub delegatee_count: usize,
    pub total_count: usize,
    /// Always within `[0, 1]`.
    pub percent: f64,
    pub level: ConcentrationLevel,
    pub flagged: bool,
}

impl ConcentrationReport {
    /// Builds a report from raw counts.
    pub fn from_counts(
        delegatee: UserId,
        scope: Option<Scope>,
        delegatee_count: usize,
        total_count: usize,
        config: &ConcentrationConfig,
    ) -> Self {
        let percent = share(delegatee_count, total_count);
        let level = config.level_for(percent);
        Self {
            delegatee,
            scope,
            delegatee_count,
            total_count,
            percent,
            level,
            flagged: level.is_flagged(),
        }
    }
}

impl std::fmt::Display for ConcentrationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} holds {}/{} active delegations ({:.1}%, {})",
            self.delegatee,
            self.delegatee_count,
            self.total_count,
            self.percent * 100.0,
            self.level
        )
    }
}

/// `part / total` clamped to `[0, 1]`, zero when `total` is zero.
fn share(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 / total as f64).clamp(0.0, 1.0)
}

/// Computes [`ConcentrationReport`]s from live store counts.
pub struct ConcentrationMonitor {
    store: Arc<dyn DelegationStore>,
    clock: Arc<dyn Clock>,
    config: ConcentrationConfig,
}

impl ConcentrationMonitor {
    pub fn new(
        store: Arc<dyn DelegationStore>,
        clock: Arc<dyn Clock>,
        config: ConcentrationConfig,
    ) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &ConcentrationConfig {
        &self.config
    }

    /// Measures `delegatee`'s share of active delegations, optionally within
    /// one scope.
    pub async fn is_high_concentration(
        &self,
        delegatee: &UserId,
        scope: Option<&Scope>,
    ) -> Result<ConcentrationReport> {
        self.measure_at(delegatee, scope, self.clock.now()).await
    }

    /// As [`Self::is_high_concentration`] at an explicit instant.
    pub async fn measure_at(
        &self,
        delegatee: &UserId,
        scope: Option<&Scope>,
        now: DateTime<Utc>,
    ) -> Result<ConcentrationReport> {
        let delegatee_count = self
            .store
            .count_active_by_delegatee(delegatee, scope, now)
            .await?;
        let total_count = self.store.count_active(scope, now).await?;

        let report = ConcentrationReport::from_counts(
            delegatee.clone(),
            scope.cloned(),
            delegatee_count,
            total_count,
            &self.config,
        );

        if report.flagged {
            info!(
                delegatee = %delegatee,
                level = %report.level,
                percent = report.percent,
                "delegation concentration flagged"
            );
        } else {
            debug!(delegatee = %delegatee, percent = report.percent, "concentration normal");
        }
        Ok(report)
    }
}
