//! The engine facade.
//!
//! [`DelegationEngine`] wires the resolver, the risk monitors, the lifecycle
//! manager and the summary aggregator over one set of collaborators, and is
//! the surface an outer transport layer calls.

use liquid_chain::{ChainResolver, ResolveMode, Resolution, Tally};
use liquid_risk::{
    ConcentrationMonitor, ConcentrationReport, SuperDelegateDetector, SuperDelegateReport,
};
use liquid_store::{
    Clock, DecisionLedger, DelegationId, DelegationMode, DelegationStore, RevokeOutcome, Scope,
    SystemClock, UserDirectory, UserId,
};
use std::sync::Arc;
use tracing::info;

use crate::config::EngineConfig;
use crate::events::{EventSink, TracingEventSink};
use crate::lifecycle::{CreateRequest, CreatedDelegation, DelegationLifecycleManager, LifecycleParts};
use crate::metrics::{Metric, MetricsSink, NoopMetrics};
use crate::modes::ModeRegistry;
use crate::summary::{SafeSummaryAggregator, SummaryResult};
use crate::Result;

/// The engine's view of its environment.
///
/// ```rust
/// use std::sync::Arc;
/// use liquid_core::{Collaborators, MemoryEventSink};
/// use liquid_store::{ManualClock, MemoryDecisions, MemoryDirectory, MemoryStore};
///
/// let collaborators = Collaborators::new(
///     Arc::new(MemoryStore::new()),
///     Arc::new(MemoryDirectory::new()),
///     Arc::new(MemoryDecisions::new()),
/// )
/// .with_clock(Arc::new(ManualClock::default()))
/// .with_events(Arc::new(MemoryEventSink::new()));
/// # let _ = collaborators;
/// ```
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn DelegationStore>,
    pub directory: Arc<dyn UserDirectory>,
    pub decisions: Arc<dyn DecisionLedger>,
    pub clock: Arc<dyn Clock>,
    pub events: Arc<dyn EventSink>,
    pub metrics: Arc<dyn MetricsSink>,
}

impl Collaborators {
    /// System clock, tracing events, no metrics.
    pub fn new(
        store: Arc<dyn DelegationStore>,
        directory: Arc<dyn UserDirectory>,
        decisions: Arc<dyn DecisionLedger>,
    ) -> Self {
        Self {
            store,
            directory,
            decisions,
            clock: Arc::new(SystemClock),
            events: Arc::new(TracingEventSink),
            metrics: Arc::new(NoopMetrics),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }
}

/// Delegation graph resolution and governance safety engine.
///
/// # Example
///
/// ```rust
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use std::sync::Arc;
/// use liquid_core::{Collaborators, CreateRequest, DelegationEngine, EngineConfig};
/// use liquid_store::{DelegationMode, MemoryDecisions, MemoryDirectory, MemoryStore, Scope};
///
/// let engine = DelegationEngine::new(
///     EngineConfig::default(),
///     Collaborators::new(
///         Arc::new(MemoryStore::new()),
///         Arc::new(MemoryDirectory::with_users(["alice", "bob"])),
///         Arc::new(MemoryDecisions::new()),
///     ),
/// )
/// .unwrap();
///
/// engine
///     .create(CreateRequest::new("alice", "bob", DelegationMode::FlexibleDomain, Scope::Global))
///     .await
///     .unwrap();
/// assert_eq!(engine.resolve(&"alice".into(), &Scope::Global).await.as_str(), "bob");
/// # }
/// ```
pub struct DelegationEngine {
    config: EngineConfig,
    metrics: Arc<dyn MetricsSink>,
    resolver: Arc<ChainResolver>,
    concentration: Arc<ConcentrationMonitor>,
    super_delegate: Arc<SuperDelegateDetector>,
    modes: Arc<ModeRegistry>,
    lifecycle: DelegationLifecycleManager,
    summary: SafeSummaryAggregator,
}

impl DelegationEngine {
    /// Builds an engine.
    ///
    /// # Errors
    ///
    /// [`crate::DelegationError::Config`] if `config` fails validation.
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        let Collaborators {
            store,
            directory,
            decisions,
            clock,
            events,
            metrics,
        } = collaborators;

        let resolver = Arc::new(ChainResolver::new(
            store.clone(),
            clock.clone(),
            config.chain.clone(),
        ));
        let concentration = Arc::new(ConcentrationMonitor::new(
            store.clone(),
            clock.clone(),
            config.concentration,
        ));
        let super_delegate = Arc::new(SuperDelegateDetector::new(
            store.clone(),
            clock.clone(),
            config.super_delegate,
        ));
        let modes = Arc::new(ModeRegistry::new(&config.limits));

        let lifecycle = DelegationLifecycleManager::new(
            LifecycleParts {
                store: store.clone(),
                directory,
                decisions,
                clock: clock.clone(),
                resolver: resolver.clone(),
                concentration: concentration.clone(),
                super_delegate: super_delegate.clone(),
                modes: modes.clone(),
                events,
                metrics: metrics.clone(),
            },
            config.limits.clone(),
        );
        let summary = SafeSummaryAggregator::new(
            store,
            resolver.clone(),
            clock,
            metrics.clone(),
            config.summary.clone(),
        );

        info!(
            max_depth = config.chain.max_depth,
            fallback = ?config.chain.fallback,
            "delegation engine initialized"
        );

        Ok(Self {
            config,
            metrics,
            resolver,
            concentration,
            super_delegate,
            modes,
            lifecycle,
            summary,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn modes(&self) -> &ModeRegistry {
        &self.modes
    }

    pub fn lifecycle(&self) -> &DelegationLifecycleManager {
        &self.lifecycle
    }

    /// Final decision-maker for `user` in `scope`. Never fails: a broken
    /// chain resolves to `user`.
    pub async fn resolve(&self, user: &UserId, scope: &Scope) -> UserId {
        self.resolve_with_trace(user, scope).await.delegatee
    }

    /// Lenient resolution with the walked path.
    pub async fn resolve_with_trace(&self, user: &UserId, scope: &Scope) -> Resolution {
        let resolution = match self.resolver.resolve(user, scope, ResolveMode::Lenient).await {
            Ok(resolution) => resolution,
            Err(err) => Resolution::degraded(user.clone(), scope.clone(), err.to_string()),
        };
        if resolution.is_degraded() {
            self.metrics.record(Metric::ResolutionDegraded);
        }
        resolution
    }

    /// Strict resolution: loops, over-long chains and store failures surface
    /// as errors.
    pub async fn resolve_strict(&self, user: &UserId, scope: &Scope) -> Result<Resolution> {
        Ok(self.resolver.resolve(user, scope, ResolveMode::Strict).await?)
    }

    pub async fn create(&self, request: CreateRequest) -> Result<CreatedDelegation> {
        self.lifecycle.create(request).await
    }

    pub async fn revoke(&self, id: &DelegationId) -> Result<RevokeOutcome> {
        self.lifecycle.revoke(id).await
    }

    pub async fn adopt_mode(&self, user: &UserId, mode: DelegationMode) -> Result<()> {
        self.lifecycle.adopt_mode(user, mode).await
    }

    pub async fn concentration(
        &self,
        delegatee: &UserId,
        scope: Option<&Scope>,
    ) -> Result<ConcentrationReport> {
        Ok(self
            .concentration
            .is_high_concentration(delegatee, scope)
            .await?)
    }

    pub async fn super_delegate_risk(
        &self,
        delegatee: &UserId,
        scope: Option<&Scope>,
    ) -> Result<SuperDelegateReport> {
        Ok(self
            .super_delegate
            .would_create_super_delegate(delegatee, scope)
            .await?)
    }

    /// Never fails; see [`SafeSummaryAggregator`].
    pub async fn safe_summary(&self, user: &UserId, trace_id: Option<String>) -> SummaryResult {
        self.summary.get_safe_summary(user, trace_id).await
    }

    /// Effective voting weight per final decision-maker.
    pub async fn tally(&self, voters: &[UserId], scope: &Scope) -> Tally {
        let tally = self.resolver.tally(voters, scope).await;
        for _ in &tally.degraded {
            self.metrics.record(Metric::ResolutionDegraded);
        }
        tally
    }
}
