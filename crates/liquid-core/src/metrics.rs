//! Injected metrics sink.
//!
//! Counters are pushed through a [`MetricsSink`] handed to the engine at
//! construction; there is no process-wide registry.

use liquid_store::DelegationMode;
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::ErrorKind;

/// A single measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    DelegationCreated { mode: DelegationMode },
    DelegationRejected { kind: ErrorKind },
    DelegationRevoked,
    AdvisoryWarning { signal: &'static str },
    ResolutionDegraded,
    SummaryServed { ok: bool, duration_ms: u64 },
}

impl Metric {
    /// Counter key, e.g. `delegation_rejected.conflict`.
    pub fn key(&self) -> String {
        match self {
            Self::DelegationCreated { mode } => format!("delegation_created.{mode}"),
            Self::DelegationRejected { kind } => format!("delegation_rejected.{kind}"),
            Self::DelegationRevoked => "delegation_revoked".to_string(),
            Self::AdvisoryWarning { signal } => format!("advisory_warning.{signal}"),
            Self::ResolutionDegraded => "resolution_degraded".to_string(),
            Self::SummaryServed { ok: true, .. } => "summary_served.ok".to_string(),
            Self::SummaryServed { ok: false, .. } => "summary_served.partial".to_string(),
        }
    }
}

/// Receives metrics.
pub trait MetricsSink: Send + Sync {
    fn record(&self, metric: Metric);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record(&self, _metric: Metric) {}
}

/// Counts metrics by key.
#[derive(Debug, Default)]
pub struct MemoryMetrics {
    counts: Mutex<BTreeMap<String, u64>>,
}

impl MemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, key: &str) -> u64 {
        self.counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl MetricsSink for MemoryMetrics {
    fn record(&self, metric: Metric) {
        *self
            .counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(metric.key())
            .or_default() += 1;
    }
}
