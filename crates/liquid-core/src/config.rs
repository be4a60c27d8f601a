//! Configuration types for the delegation engine.
//!
//! Every section deserializes with defaults, so a TOML file only needs the
//! values it changes:
//!
//! ```toml
//! [chain]
//! max_depth = 6
//! fallback = "hybrid_seed_only"
//!
//! [concentration]
//! high_threshold = 0.08
//! ```

use liquid_chain::ResolverConfig;
use liquid_risk::{ConcentrationConfig, SuperDelegateConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::DelegationError;
use crate::Result;

/// Configuration for the delegation engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Chain resolution (depth, fallback policy).
    pub chain: ResolverConfig,

    /// Per-delegator limits and term rules.
    pub limits: LimitsConfig,

    /// Concentration warning levels.
    pub concentration: ConcentrationConfig,

    /// Super-delegate thresholds.
    pub super_delegate: SuperDelegateConfig,

    /// Safe summary bounds.
    pub summary: SummaryConfig,
}

impl EngineConfig {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// [`DelegationError::Config`] if the document is malformed or fails
    /// [`Self::validate`].
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| DelegationError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| DelegationError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    /// Renders the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| DelegationError::Config(e.to_string()))
    }

    /// Rejects values no deployment could want.
    pub fn validate(&self) -> Result<()> {
        if self.chain.max_depth == 0 {
            return Err(DelegationError::Config(
                "chain.max_depth must be at least 1".into(),
            ));
        }
        if self.limits.max_active_per_delegator == 0 {
            return Err(DelegationError::Config(
                "limits.max_active_per_delegator must be at least 1".into(),
            ));
        }
        if self.limits.legacy_max_term_days <= 0 {
            return Err(DelegationError::Config(
                "limits.legacy_max_term_days must be positive".into(),
            ));
        }
        if self.summary.row_cap == 0 {
            return Err(DelegationError::Config(
                "summary.row_cap must be at least 1".into(),
            ));
        }
        if self.summary.sub_operation_timeout_ms == 0 {
            return Err(DelegationError::Config(
                "summary.sub_operation_timeout_ms must be at least 1".into(),
            ));
        }
        self.concentration
            .validate()
            .map_err(|e| DelegationError::Config(e.to_string()))?;
        self.super_delegate
            .validate()
            .map_err(|e| DelegationError::Config(e.to_string()))?;
        Ok(())
    }
}

/// Per-delegator limits and legacy term rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum simultaneously active delegations held by one delegator.
    pub max_active_per_delegator: usize,

    /// Longest allowed legacy term, in days from its start.
    pub legacy_max_term_days: i64,

    /// Fill in a four-year term when a legacy delegation omits one.
    /// When off, the term is a required field.
    pub default_legacy_term: bool,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_active_per_delegator: 50,
            legacy_max_term_days: 4 * 365 + 1,
            default_legacy_term: true,
        }
    }
}

/// Safe summary bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Hard cap on rows returned by any listing, regardless of graph size.
    pub row_cap: usize,

    /// Wall-clock budget for each sub-operation.
    pub sub_operation_timeout_ms: u64,
}

impl SummaryConfig {
    pub fn sub_operation_timeout(&self) -> Duration {
        Duration::from_millis(self.sub_operation_timeout_ms)
    }
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            row_cap: 100,
            sub_operation_timeout_ms: 2_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liquid_chain::FallbackPolicy;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.chain.max_depth, 8);
        assert_eq!(config.chain.fallback, FallbackPolicy::AnyGlobal);
        assert_eq!(config.limits.max_active_per_delegator, 50);
        assert_eq!(config.limits.legacy_max_term_days, 1461);
        assert_eq!(config.concentration.warn_threshold, 0.05);
        assert_eq!(config.concentration.high_threshold, 0.075);
        assert_eq!(config.super_delegate.global_in_degree_threshold, 500);
        assert_eq!(config.super_delegate.distinct_scopes_threshold, 12);
        assert_eq!(config.summary.row_cap, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [chain]
            max_depth = 6
            fallback = "hybrid_seed_only"

            [super_delegate]
            distinct_scopes_threshold = 7
            "#,
        )
        .unwrap();

        assert_eq!(config.chain.max_depth, 6);
        assert_eq!(config.chain.fallback, FallbackPolicy::HybridSeedOnly);
        assert_eq!(config.super_delegate.distinct_scopes_threshold, 7);
        assert_eq!(config.super_delegate.global_in_degree_threshold, 500);
        assert_eq!(config.summary.sub_operation_timeout_ms, 2_000);
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(EngineConfig::from_toml_str("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = EngineConfig::from_toml_str("[chain]\nmax_depth = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_depth"));

        let err = EngineConfig::from_toml_str(
            "[concentration]\nwarn_threshold = 0.5\nhigh_threshold = 0.1\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("warn_threshold"));
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let err = EngineConfig::from_toml_str("[chain\n").unwrap_err();
        assert!(matches!(err, DelegationError::Config(_)));
    }

    #[test]
    fn test_toml_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        let mut config = EngineConfig::default();
        config.limits.max_active_per_delegator = 3;
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        assert_eq!(EngineConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = EngineConfig::load("/nonexistent/engine.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/engine.toml"));
    }
}
