//! # Mode Registry
//!
//! Static description of the three delegation modes and the per-mode field
//! rules a new delegation must satisfy.
//!
//! | Mode | Term | Seeds other scopes under `hybrid_seed_only` |
//! |------|------|---------------------------------------------|
//! | `legacy_fixed_term` | required, defaulted to four years | no |
//! | `flexible_domain` | optional `end_date` | no |
//! | `hybrid_seed` | optional `end_date` | yes, when global |

use chrono::{DateTime, Duration, Months, Utc};
use liquid_store::DelegationMode;
use serde::Serialize;

use crate::config::LimitsConfig;
use crate::error::DelegationError;
use crate::lifecycle::CreateOptions;
use crate::Result;

const LEGACY_TERM: &str = "legacy_term_ends_at";
const END_DATE: &str = "end_date";
const START_DATE: &str = "start_date";
const DEFAULT_LEGACY_TERM_MONTHS: u32 = 48;

/// What a mode is and which creation fields it takes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModeDescriptor {
    pub mode: DelegationMode,
    pub name: &'static str,
    pub summary: &'static str,
    pub required_fields: Vec<&'static str>,
    pub optional_fields: Vec<&'static str>,
    /// Whether a global delegation in this mode still seeds scoped
    /// resolution when the fallback policy is `hybrid_seed_only`. Under the
    /// default `any_global` policy every global delegation does.
    pub scoped_fallback: bool,
}

/// Creation options after mode rules and defaults were applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedOptions {
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub legacy_term_ends_at: Option<DateTime<Utc>>,
    pub is_anonymous: bool,
}

/// Registry of delegation modes. Built once, shared read-only.
#[derive(Debug, Clone)]
pub struct ModeRegistry {
    descriptors: Vec<ModeDescriptor>,
    legacy_max_term: Duration,
    default_legacy_term: bool,
}

impl ModeRegistry {
    pub fn new(limits: &LimitsConfig) -> Self {
        let descriptors = DelegationMode::ALL
            .iter()
            .map(|&mode| describe_mode(mode))
            .collect();
        Self {
            descriptors,
            legacy_max_term: Duration::days(limits.legacy_max_term_days),
            default_legacy_term: limits.default_legacy_term,
        }
    }

    /// Every mode, in registry order.
    pub fn all(&self) -> &[ModeDescriptor] {
        &self.descriptors
    }

    pub fn describe(&self, mode: DelegationMode) -> &ModeDescriptor {
        // descriptors are built from DelegationMode::ALL in order
        let index = match mode {
            DelegationMode::LegacyFixedTerm => 0,
            DelegationMode::FlexibleDomain => 1,
            DelegationMode::HybridSeed => 2,
        };
        &self.descriptors[index]
    }

    /// Checks `options` against `mode`'s field rules and fills defaults.
    ///
    /// # Errors
    ///
    /// - [`DelegationError::InvalidDateRange`] if `end_date` is not after the start.
    /// - [`DelegationError::FieldNotApplicable`] for a field the mode ignores.
    /// - [`DelegationError::MissingModeField`] when a legacy term is absent and
    ///   defaulting is off.
    /// - [`DelegationError::InvalidTerm`] for a legacy term in the past or
    ///   beyond the maximum.
    pub fn validate(
        &self,
        mode: DelegationMode,
        options: &CreateOptions,
        now: DateTime<Utc>,
    ) -> Result<ValidatedOptions> {
        let start_date = options.start_date.unwrap_or(now);

        if let Some(end) = options.end_date {
            if end <= start_date {
                return Err(DelegationError::InvalidDateRange {
                    start: start_date,
                    end,
                });
            }
        }

        let legacy_term_ends_at = match mode {
            DelegationMode::LegacyFixedTerm => {
                if options.end_date.is_some() {
                    return Err(DelegationError::FieldNotApplicable {
                        mode,
                        field: END_DATE,
                    });
                }
                Some(self.legacy_term(start_date, options.legacy_term_ends_at, now)?)
            }
            DelegationMode::FlexibleDomain | DelegationMode::HybridSeed => {
                if options.legacy_term_ends_at.is_some() {
                    return Err(DelegationError::FieldNotApplicable {
                        mode,
                        field: LEGACY_TERM,
                    });
                }
                None
            }
        };

        Ok(ValidatedOptions {
            start_date,
            end_date: options.end_date,
            legacy_term_ends_at,
            is_anonymous: options.is_anonymous,
        })
    }

    fn legacy_term(
        &self,
        start: DateTime<Utc>,
        requested: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let term = match requested {
            Some(term) => term,
            None if self.default_legacy_term => start
                .checked_add_months(Months::new(DEFAULT_LEGACY_TERM_MONTHS))
                .ok_or_else(|| DelegationError::InvalidTerm("start date out of range".into()))?,
            None => {
                return Err(DelegationError::MissingModeField {
                    mode: DelegationMode::LegacyFixedTerm,
                    field: LEGACY_TERM,
                })
            }
        };

        if term <= now || term <= start {
            return Err(DelegationError::InvalidTerm(format!(
                "term end {term} must be after both now and the start date"
            )));
        }
        if term - start > self.legacy_max_term {
            return Err(DelegationError::InvalidTerm(format!(
                "term end {term} is more than {} days after {start}",
                self.legacy_max_term.num_days()
            )));
        }
        Ok(term)
    }
}

impl Default for ModeRegistry {
    fn default() -> Self {
        Self::new(&LimitsConfig::default())
    }
}

fn describe_mode(mode: DelegationMode) -> ModeDescriptor {
    match mode {
        DelegationMode::LegacyFixedTerm => ModeDescriptor {
            mode,
            name: "Legacy fixed term",
            summary: "Delegates for a bounded term, after which the delegation expires.",
            required_fields: vec![LEGACY_TERM],
            optional_fields: vec![START_DATE],
            scoped_fallback: false,
        },
        DelegationMode::FlexibleDomain => ModeDescriptor {
            mode,
            name: "Flexible domain",
            summary: "Delegates one scope until revoked or until an optional end date.",
            required_fields: vec![],
            optional_fields: vec![START_DATE, END_DATE],
            scoped_fallback: false,
        },
        DelegationMode::HybridSeed => ModeDescriptor {
            mode,
            name: "Hybrid seed",
            summary: "A global delegation that also decides every scope without a more specific delegation.",
            required_fields: vec![],
            optional_fields: vec![START_DATE, END_DATE],
            scoped_fallback: true,
        },
    }
}
