//! # Delegation Lifecycle
//!
//! Creates and revokes delegation edges.
//!
//! ## Create pipeline
//!
//! ```text
//!   1. delegatee ≠ delegator                  → Validation
//!   2. delegatee exists, not soft-deleted     → NotFound
//!   3. mode field rules (+ defaults)          → Validation
//!   4. poll not already decided by delegator  → State
//!   5. (delegator, scope) slot free           → Conflict
//!   6. delegator under live cap               → Conflict
//!   7. strict chain walk over the new edge    → GraphIntegrity
//!   8. insert_if_vacant (atomic slot check)   → Conflict on a lost race
//! ```
//!
//! The first failing check wins and nothing is written. Steps 5 to 8 count
//! pending rows as well as active ones, and run under a write gate: a global
//! create excludes every other create, a scoped create excludes creates by
//! the same delegator and creates in the same scope. Concentration and
//! super-delegate findings are attached to a successful create as warnings;
//! they never reject one.

use chrono::{DateTime, Utc};
use liquid_chain::ChainResolver;
use liquid_risk::{
    ConcentrationMonitor, ConcentrationReport, SuperDelegateDetector, SuperDelegateReport,
};
use liquid_store::{
    Clock, DecisionLedger, Delegation, DelegationId, DelegationMode, DelegationStore,
    RevokeOutcome, Scope, UserDirectory, UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex as SyncMutex, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::config::LimitsConfig;
use crate::error::DelegationError;
use crate::events::{DomainEvent, EventSink};
use crate::metrics::{Metric, MetricsSink};
use crate::modes::ModeRegistry;
use crate::Result;

/// Optional creation fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateOptions {
    /// Defaults to now. A future start creates a pending delegation.
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    /// Legacy mode only.
    pub legacy_term_ends_at: Option<DateTime<Utc>>,
    pub is_anonymous: bool,
}

impl CreateOptions {
    #[must_use]
    pub fn with_start_date(mut self, start: DateTime<Utc>) -> Self {
        self.start_date = Some(start);
        self
    }

    #[must_use]
    pub fn with_end_date(mut self, end: DateTime<Utc>) -> Self {
        self.end_date = Some(end);
        self
    }

    #[must_use]
    pub fn with_legacy_term(mut self, term_end: DateTime<Utc>) -> Self {
        self.legacy_term_ends_at = Some(term_end);
        self
    }

    #[must_use]
    pub fn anonymous(mut self) -> Self {
        self.is_anonymous = true;
        self
    }
}

/// A request to delegate `delegator`'s weight in `scope` to `delegatee`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub delegator: UserId,
    pub delegatee: UserId,
    pub mode: DelegationMode,
    pub scope: Scope,
    #[serde(default)]
    pub options: CreateOptions,
}

impl CreateRequest {
    pub fn new(
        delegator: impl Into<UserId>,
        delegatee: impl Into<UserId>,
        mode: DelegationMode,
        scope: Scope,
    ) -> Self {
        Self {
            delegator: delegator.into(),
            delegatee: delegatee.into(),
            mode,
            scope,
            options: CreateOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: CreateOptions) -> Self {
        self.options = options;
        self
    }
}

/// Advisory finding attached to a successful create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "warning", content = "report", rename_all = "snake_case")]
pub enum AdvisoryWarning {
    HighConcentration(ConcentrationReport),
    SuperDelegateRisk(SuperDelegateReport),
}

impl AdvisoryWarning {
    pub fn signal(&self) -> &'static str {
        match self {
            Self::HighConcentration(_) => "high_concentration",
            Self::SuperDelegateRisk(_) => "super_delegate_risk",
        }
    }
}

/// A persisted delegation plus any advisory warnings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedDelegation {
    pub delegation: Delegation,
    pub warnings: Vec<AdvisoryWarning>,
}

/// Shared handles the lifecycle manager works through.
#[derive(Clone)]
pub struct LifecycleParts {
    pub store: Arc<dyn DelegationStore>,
    pub directory: Arc<dyn UserDirectory>,
    pub decisions: Arc<dyn DecisionLedger>,
    pub clock: Arc<dyn Clock>,
    pub resolver: Arc<ChainResolver>,
    pub concentration: Arc<ConcentrationMonitor>,
    pub super_delegate: Arc<SuperDelegateDetector>,
    pub modes: Arc<ModeRegistry>,
    pub events: Arc<dyn EventSink>,
    pub metrics: Arc<dyn MetricsSink>,
}

type GateMap<K> = SyncMutex<HashMap<K, Arc<Mutex<()>>>>;

fn gate_for<K: Eq + Hash + Clone>(gates: &GateMap<K>, key: &K) -> Arc<Mutex<()>> {
    let mut gates = gates.lock().unwrap_or_else(PoisonError::into_inner);
    gates.entry(key.clone()).or_default().clone()
}

/// Serializes the checks and the insert of creates that could interfere.
///
/// Lock order is global, then delegator, then scope.
#[derive(Default)]
struct WriteGates {
    global: RwLock<()>,
    delegators: GateMap<UserId>,
    scopes: GateMap<Scope>,
}

/// Held from the slot check until the row is stored.
struct WritePermit<'a> {
    _exclusive: Option<RwLockWriteGuard<'a, ()>>,
    _shared: Option<RwLockReadGuard<'a, ()>>,
    _delegator: Option<OwnedMutexGuard<()>>,
    _scope: Option<OwnedMutexGuard<()>>,
}

impl WriteGates {
    /// A global edge can seed every scope through fallback, so it waits for
    /// all in-flight creates.
    async fn enter(&self, delegator: &UserId, scope: &Scope) -> WritePermit<'_> {
        if scope.is_global() {
            return WritePermit {
                _exclusive: Some(self.global.write().await),
                _shared: None,
                _delegator: None,
                _scope: None,
            };
        }

        let shared = self.global.read().await;
        let by_delegator = gate_for(&self.delegators, delegator).lock_owned().await;
        let by_scope = gate_for(&self.scopes, scope).lock_owned().await;
        WritePermit {
            _exclusive: None,
            _shared: Some(shared),
            _delegator: Some(by_delegator),
            _scope: Some(by_scope),
        }
    }
}

/// Validates and persists delegation state transitions.
pub struct DelegationLifecycleManager {
    parts: LifecycleParts,
    limits: LimitsConfig,
    adopted_modes: RwLock<HashMap<UserId, DelegationMode>>,
    gates: WriteGates,
}

impl DelegationLifecycleManager {
    pub fn new(parts: LifecycleParts, limits: LimitsConfig) -> Self {
        Self {
            parts,
            limits,
            adopted_modes: RwLock::new(HashMap::new()),
            gates: WriteGates::default(),
        }
    }

    /// Validates and persists a new delegation.
    ///
    /// # Errors
    ///
    /// The first failing check of the create pipeline, mapped to its
    /// [`crate::ErrorKind`]. Nothing is written on error.
    pub async fn create(&self, request: CreateRequest) -> Result<CreatedDelegation> {
        let delegator = request.delegator.clone();
        let scope = request.scope.clone();

        match self.try_create(request).await {
            Ok(created) => Ok(created),
            Err(err) => {
                warn!(
                    delegator = %delegator,
                    scope = %scope,
                    kind = %err.kind(),
                    error = %err,
                    "delegation rejected"
                );
                self.parts
                    .metrics
                    .record(Metric::DelegationRejected { kind: err.kind() });
                Err(err)
            }
        }
    }

    async fn try_create(&self, request: CreateRequest) -> Result<CreatedDelegation> {
        let CreateRequest {
            delegator,
            delegatee,
            mode,
            scope,
            options,
        } = request;
        let parts = &self.parts;
        let now = parts.clock.now();

        if delegator == delegatee {
            return Err(DelegationError::SelfDelegation(delegator));
        }

        match parts.directory.lookup(&delegatee).await? {
            Some(user) if !user.is_deleted => {}
            _ => return Err(DelegationError::DelegateeNotFound(delegatee)),
        }

        let validated = parts.modes.validate(mode, &options, now)?;

        match &scope {
            Scope::Poll(_) => {
                if parts.decisions.has_decided(&delegator, &scope).await? {
                    return Err(DelegationError::AlreadyDecided {
                        user: delegator,
                        scope,
                    });
                }
            }
            Scope::Global
            | Scope::Label(_)
            | Scope::Field(_)
            | Scope::Institution(_)
            | Scope::Value(_)
            | Scope::Idea(_) => {}
        }

        let permit = self.gates.enter(&delegator, &scope).await;

        if let Some(existing) = parts
            .store
            .find_live_by_delegator_and_scope(&delegator, &scope, now)
            .await?
        {
            return Err(DelegationError::AlreadyDelegated {
                delegator,
                scope,
                existing: existing.id,
            });
        }

        let active = parts.store.count_live_by_delegator(&delegator, now).await?;
        if active >= self.limits.max_active_per_delegator {
            return Err(DelegationError::DelegationLimitReached {
                delegator,
                active,
                limit: self.limits.max_active_per_delegator,
            });
        }

        let path = parts
            .resolver
            .check_new_edge(&delegator, &delegatee, &scope)
            .await?;
        debug!(delegator = %delegator, hops = path.len() - 1, "new edge passes chain check");

        // Projection must see the graph without the new edge.
        let super_delegate = self.assess_super_delegate(&delegatee, &scope, now).await;

        let delegation = Delegation {
            id: DelegationId::new(),
            delegator_id: delegator,
            delegatee_id: delegatee,
            mode,
            scope,
            start_date: validated.start_date,
            end_date: validated.end_date,
            legacy_term_ends_at: validated.legacy_term_ends_at,
            is_anonymous: validated.is_anonymous,
            created_at: now,
            revoked_at: None,
            is_deleted: false,
        };
        let delegation = parts.store.insert_if_vacant(delegation, now).await?;
        drop(permit);

        info!(
            id = %delegation.id,
            delegator = %delegation.delegator_id,
            delegatee = %delegation.delegatee_id,
            mode = %delegation.mode,
            scope = %delegation.scope,
            "delegation created"
        );
        parts.events.emit(&DomainEvent::created(&delegation));
        parts.metrics.record(Metric::DelegationCreated { mode });

        let mut warnings = Vec::new();
        if let Some(report) = self.measure_concentration(&delegation, now).await {
            warnings.push(AdvisoryWarning::HighConcentration(report));
        }
        if let Some(report) = super_delegate {
            warnings.push(AdvisoryWarning::SuperDelegateRisk(report));
        }
        for warning in &warnings {
            parts.metrics.record(Metric::AdvisoryWarning {
                signal: warning.signal(),
            });
        }

        Ok(CreatedDelegation {
            delegation,
            warnings,
        })
    }

    /// Revokes a delegation. A second revoke of the same id succeeds
    /// without changing anything.
    ///
    /// # Errors
    ///
    /// [`DelegationError::DelegationNotFound`] only when the id never existed.
    pub async fn revoke(&self, id: &DelegationId) -> Result<RevokeOutcome> {
        let now = self.parts.clock.now();
        let outcome = self.parts.store.mark_revoked(id, now).await?;

        match &outcome {
            RevokeOutcome::Revoked(delegation) => {
                info!(
                    id = %delegation.id,
                    delegator = %delegation.delegator_id,
                    scope = %delegation.scope,
                    "delegation revoked"
                );
                self.parts.events.emit(&DomainEvent::revoked(delegation, now));
                self.parts.metrics.record(Metric::DelegationRevoked);
            }
            RevokeOutcome::AlreadyRevoked(delegation) => {
                debug!(id = %delegation.id, "delegation already revoked");
            }
        }
        Ok(outcome)
    }

    /// Records `user`'s preferred default mode.
    pub async fn adopt_mode(&self, user: &UserId, mode: DelegationMode) -> Result<()> {
        match self.parts.directory.lookup(user).await? {
            Some(record) if !record.is_deleted => {}
            _ => return Err(DelegationError::UserNotFound(user.clone())),
        }

        let previous = self
            .adopted_modes
            .write()
            .await
            .insert(user.clone(), mode);
        if previous == Some(mode) {
            debug!(user = %user, mode = %mode, "mode already adopted");
            return Ok(());
        }

        info!(user = %user, mode = %mode, "delegation mode adopted");
        self.parts.events.emit(&DomainEvent::ModeAdopted {
            user: user.clone(),
            mode,
            at: self.parts.clock.now(),
        });
        Ok(())
    }

    /// The mode `user` last adopted, if any.
    pub async fn adopted_mode(&self, user: &UserId) -> Option<DelegationMode> {
        self.adopted_modes.read().await.get(user).copied()
    }

    async fn measure_concentration(
        &self,
        delegation: &Delegation,
        now: DateTime<Utc>,
    ) -> Option<ConcentrationReport> {
        match self
            .parts
            .concentration
            .measure_at(&delegation.delegatee_id, Some(&delegation.scope), now)
            .await
        {
            Ok(report) if report.flagged => Some(report),
            Ok(_) => None,
            Err(err) => {
                warn!(delegatee = %delegation.delegatee_id, error = %err, "concentration check failed");
                None
            }
        }
    }

    async fn assess_super_delegate(
        &self,
        delegatee: &UserId,
        scope: &Scope,
        now: DateTime<Utc>,
    ) -> Option<SuperDelegateReport> {
        match self
            .parts
            .super_delegate
            .assess_at(delegatee, Some(scope), now)
            .await
        {
            Ok(report) if report.risk => Some(report),
            Ok(_) => None,
            Err(err) => {
                warn!(delegatee = %delegatee, error = %err, "super-delegate check failed");
                None
            }
        }
    }
}
