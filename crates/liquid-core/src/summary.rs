//! # Safe Summary
//!
//! A per-user overview that never fails.
//!
//! Each sub-operation runs under a timeout and a panic guard, and produces a
//! [`StepOutcome`]. The aggregator folds the outcomes into one
//! [`SummaryResult`]: successes fill their field, failures append to
//! `errors` and leave the field `null`. The response shape is the same
//! whether every step worked or none did.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use liquid_chain::{ChainResolver, ResolveMode, Resolution};
use liquid_store::{Clock, Delegation, DelegationStore, Scope, UserId};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::SummaryConfig;
use crate::metrics::{Metric, MetricsSink};

/// Active delegation counts around the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryCounts {
    /// Delegations the user has handed out.
    pub active_outgoing: Option<usize>,
    /// Delegations pointing at the user.
    pub active_incoming: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryMeta {
    pub trace_id: String,
    pub generated_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Per-user delegation overview. Every field is always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryResult {
    /// True when `errors` is empty.
    pub ok: bool,
    pub errors: Vec<String>,
    pub global_delegation: Option<Delegation>,
    /// Capped at the configured row limit.
    pub scoped_delegations: Option<Vec<Delegation>>,
    pub global_resolution: Option<Resolution>,
    pub counts: SummaryCounts,
    pub meta: SummaryMeta,
}

/// Outcome of one guarded sub-operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome<T> {
    Done(T),
    Failed { step: &'static str, message: String },
}

impl<T> StepOutcome<T> {
    /// Moves a failure into `errors`, yielding the value on success.
    pub fn collect(self, errors: &mut Vec<String>) -> Option<T> {
        match self {
            Self::Done(value) => Some(value),
            Self::Failed { step, message } => {
                errors.push(format!("{step}: {message}"));
                None
            }
        }
    }
}

/// Runs `fut` under `timeout` with a panic guard.
pub async fn guarded<T, E, F>(step: &'static str, timeout: Duration, fut: F) -> StepOutcome<T>
where
    E: Display,
    F: Future<Output = std::result::Result<T, E>>,
{
    let caught = AssertUnwindSafe(fut).catch_unwind();
    match tokio::time::timeout(timeout, caught).await {
        Ok(Ok(Ok(value))) => StepOutcome::Done(value),
        Ok(Ok(Err(err))) => StepOutcome::Failed {
            step,
            message: err.to_string(),
        },
        Ok(Err(panic)) => StepOutcome::Failed {
            step,
            message: format!("panicked: {}", panic_message(panic.as_ref())),
        },
        Err(_) => StepOutcome::Failed {
            step,
            message: format!("timed out after {}ms", timeout.as_millis()),
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

/// Builds [`SummaryResult`]s.
pub struct SafeSummaryAggregator {
    store: Arc<dyn DelegationStore>,
    resolver: Arc<ChainResolver>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
    config: SummaryConfig,
}

impl SafeSummaryAggregator {
    pub fn new(
        store: Arc<dyn DelegationStore>,
        resolver: Arc<ChainResolver>,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn MetricsSink>,
        config: SummaryConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            clock,
            metrics,
            config,
        }
    }

    /// Summarizes `user`'s delegations. Never fails.
    ///
    /// A missing `trace_id` is replaced by a fresh v4 uuid.
    pub async fn get_safe_summary(&self, user: &UserId, trace_id: Option<String>) -> SummaryResult {
        let started = Instant::now();
        let now = self.clock.now();
        let trace_id = trace_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let timeout = self.config.sub_operation_timeout();
        let row_cap = self.config.row_cap;
        let store = &self.store;

        let (global, scoped, resolution, outgoing, incoming) = tokio::join!(
            guarded(
                "global_delegation",
                timeout,
                store.find_active_by_delegator_and_scope(user, &Scope::Global, now),
            ),
            guarded("scoped_delegations", timeout, async {
                // at most one of the fetched rows is global
                let rows = store.list_active_by_delegator(user, now, row_cap + 1).await?;
                let mut scoped: Vec<Delegation> =
                    rows.into_iter().filter(|d| !d.scope.is_global()).collect();
                scoped.truncate(row_cap);
                Ok::<_, liquid_store::StoreError>(scoped)
            }),
            guarded(
                "global_resolution",
                timeout,
                self.resolver.resolve(user, &Scope::Global, ResolveMode::Lenient),
            ),
            guarded(
                "active_outgoing",
                timeout,
                store.count_active_by_delegator(user, now),
            ),
            guarded(
                "active_incoming",
                timeout,
                store.count_active_by_delegatee(user, None, now),
            ),
        );

        let mut errors = Vec::new();
        let global_delegation = global.collect(&mut errors).flatten();
        let scoped_delegations = scoped.collect(&mut errors);
        let global_resolution = resolution.collect(&mut errors);
        let counts = SummaryCounts {
            active_outgoing: outgoing.collect(&mut errors),
            active_incoming: incoming.collect(&mut errors),
        };

        let ok = errors.is_empty();
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        if ok {
            debug!(user = %user, trace_id = %trace_id, duration_ms, "summary served");
        } else {
            for error in &errors {
                warn!(user = %user, trace_id = %trace_id, error = %error, "summary step failed");
            }
        }
        self.metrics.record(Metric::SummaryServed { ok, duration_ms });

        SummaryResult {
            ok,
            errors,
            global_delegation,
            scoped_delegations,
            global_resolution,
            counts,
            meta: SummaryMeta {
                trace_id,
                generated_at: now,
                duration_ms,
            },
        }
    }
}
