//! # Engine Integration Tests
//!
//! End-to-end behaviour of [`DelegationEngine`] over the in-memory backend.
//!
//! | Area | Covered |
//! |------|---------|
//! | Resolution | revoke restores self, scoped chains, hybrid seeding |
//! | Integrity | loops (direct and via fallback), depth limit, self-delegation |
//! | Conflicts | duplicate slot, concurrent race, per-delegator cap, pending rows |
//! | State | poll already decided, soft-deleted delegatee |
//! | Advisory | concentration and super-delegate warnings never block |
//! | Summary | store outage, panic, hang, unknown user |

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use liquid_core::{
    AdvisoryWarning, Collaborators, CreateOptions, CreateRequest, DelegationEngine,
    DelegationError, EngineConfig, ErrorKind, MemoryEventSink, MemoryMetrics,
};
use liquid_chain::FallbackPolicy;
use liquid_store::{
    Clock, Delegation, DelegationId, DelegationMode, DelegationStore, ManualClock,
    MemoryDecisions, MemoryDirectory, MemoryStore, RevokeOutcome, Scope, UserId,
};
use std::sync::Arc;

const USERS: [&str; 12] = ["a", "b", "c", "d", "x", "y", "t0", "t1", "t2", "t3", "t4", "t5"];

struct Harness {
    engine: Arc<DelegationEngine>,
    store: Arc<MemoryStore>,
    directory: Arc<MemoryDirectory>,
    decisions: Arc<MemoryDecisions>,
    clock: Arc<ManualClock>,
    events: Arc<MemoryEventSink>,
    metrics: Arc<MemoryMetrics>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    fn with_config(config: EngineConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let directory = Arc::new(MemoryDirectory::with_users(USERS));
        let decisions = Arc::new(MemoryDecisions::new());
        let clock = Arc::new(ManualClock::default());
        let events = Arc::new(MemoryEventSink::new());
        let metrics = Arc::new(MemoryMetrics::new());

        let collaborators = Collaborators::new(store.clone(), directory.clone(), decisions.clone())
            .with_clock(clock.clone())
            .with_events(events.clone())
            .with_metrics(metrics.clone());
        let engine = Arc::new(DelegationEngine::new(config, collaborators).unwrap());

        Self {
            engine,
            store,
            directory,
            decisions,
            clock,
            events,
            metrics,
        }
    }

    async fn delegate(
        &self,
        from: &str,
        to: &str,
        mode: DelegationMode,
        scope: Scope,
    ) -> Result<Delegation, DelegationError> {
        self.engine
            .create(CreateRequest::new(from, to, mode, scope))
            .await
            .map(|created| created.delegation)
    }

    async fn resolve(&self, user: &str, scope: &Scope) -> UserId {
        self.engine.resolve(&user.into(), scope).await
    }

    /// Creates a delegation that starts `days` from now.
    async fn schedule(
        &self,
        from: &str,
        to: &str,
        scope: Scope,
        days: i64,
    ) -> Result<Delegation, DelegationError> {
        let start = self.clock.now() + Duration::days(days);
        self.engine
            .create(
                CreateRequest::new(from, to, DelegationMode::FlexibleDomain, scope)
                    .with_options(CreateOptions::default().with_start_date(start)),
            )
            .await
            .map(|created| created.delegation)
    }
}

fn field(id: &str) -> Scope {
    Scope::Field(id.into())
}

// =========================================================================
// Resolution
// =========================================================================

#[tokio::test]
async fn test_revoke_returns_weight_to_delegator() {
    let h = Harness::new();
    let d = h
        .delegate("a", "b", DelegationMode::FlexibleDomain, Scope::Global)
        .await
        .unwrap();
    assert_eq!(h.resolve("a", &Scope::Global).await, UserId::from("b"));

    h.engine.revoke(&d.id).await.unwrap();
    assert_eq!(h.resolve("a", &Scope::Global).await, UserId::from("a"));
}

#[tokio::test]
async fn test_field_chain_resolves_to_end_with_path() {
    let h = Harness::new();
    let f1 = field("F1");
    h.delegate("a", "b", DelegationMode::FlexibleDomain, f1.clone())
        .await
        .unwrap();
    h.delegate("b", "c", DelegationMode::FlexibleDomain, f1.clone())
        .await
        .unwrap();

    let trace = h.engine.resolve_with_trace(&"a".into(), &f1).await;
    assert_eq!(trace.delegatee, UserId::from("c"));
    let path: Vec<&str> = trace.path.iter().map(UserId::as_str).collect();
    assert_eq!(path, ["a", "b", "c"]);
}

#[tokio::test]
async fn test_global_delegation_seeds_fields_without_scoped_edge() {
    let h = Harness::new();
    h.delegate("a", "b", DelegationMode::HybridSeed, Scope::Global)
        .await
        .unwrap();
    h.delegate("c", "d", DelegationMode::FlexibleDomain, Scope::Global)
        .await
        .unwrap();

    assert_eq!(h.resolve("a", &field("F")).await, UserId::from("b"));
    assert_eq!(h.resolve("c", &field("F")).await, UserId::from("d"));

    // a scoped edge of its own wins over the global one
    h.delegate("c", "x", DelegationMode::FlexibleDomain, field("F"))
        .await
        .unwrap();
    assert_eq!(h.resolve("c", &field("F")).await, UserId::from("x"));
}

#[tokio::test]
async fn test_hybrid_only_policy_ignores_flexible_globals() {
    let mut config = EngineConfig::default();
    config.chain.fallback = FallbackPolicy::HybridSeedOnly;
    let h = Harness::with_config(config);
    h.delegate("a", "b", DelegationMode::HybridSeed, Scope::Global)
        .await
        .unwrap();
    h.delegate("c", "d", DelegationMode::FlexibleDomain, Scope::Global)
        .await
        .unwrap();

    assert_eq!(h.resolve("a", &field("F")).await, UserId::from("b"));
    assert_eq!(h.resolve("c", &field("F")).await, UserId::from("c"));
}

#[tokio::test]
async fn test_expired_legacy_term_stops_resolving() {
    let h = Harness::new();
    let term = h.clock.now() + Duration::days(30);
    h.engine
        .create(
            CreateRequest::new("a", "b", DelegationMode::LegacyFixedTerm, Scope::Global)
                .with_options(CreateOptions::default().with_legacy_term(term)),
        )
        .await
        .unwrap();
    assert_eq!(h.resolve("a", &Scope::Global).await, UserId::from("b"));

    h.clock.advance(Duration::days(31));
    assert_eq!(h.resolve("a", &Scope::Global).await, UserId::from("a"));

    // the expired row no longer holds the slot
    h.delegate("a", "c", DelegationMode::FlexibleDomain, Scope::Global)
        .await
        .unwrap();
}

// =========================================================================
// Graph integrity
// =========================================================================

#[tokio::test]
async fn test_reverse_edge_is_rejected_as_loop() {
    let h = Harness::new();
    h.delegate("a", "b", DelegationMode::FlexibleDomain, Scope::Global)
        .await
        .unwrap();

    let err = h
        .delegate("b", "a", DelegationMode::FlexibleDomain, Scope::Global)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::GraphIntegrity);
    assert!(err.to_string().contains("would create a loop through b → a → b"));
    assert_eq!(h.store.len().await, 1);
}

#[tokio::test]
async fn test_loop_through_hybrid_fallback_is_rejected() {
    let h = Harness::new();
    h.delegate("a", "b", DelegationMode::HybridSeed, Scope::Global)
        .await
        .unwrap();

    let err = h
        .delegate("b", "a", DelegationMode::FlexibleDomain, field("F"))
        .await
        .unwrap_err();
    assert!(matches!(err, DelegationError::CycleDetected { .. }));
}

#[tokio::test]
async fn test_edge_closing_loop_with_scheduled_edge_is_rejected() {
    let h = Harness::new();
    h.schedule("b", "a", Scope::Global, 1).await.unwrap();

    let err = h
        .delegate("a", "b", DelegationMode::FlexibleDomain, Scope::Global)
        .await
        .unwrap_err();
    assert!(matches!(err, DelegationError::CycleDetected { .. }), "{err}");
    assert_eq!(h.store.len().await, 1);

    h.clock.advance(Duration::days(2));
    let strict = h.engine.resolve_strict(&"a".into(), &Scope::Global).await;
    assert!(strict.is_ok());
}

#[tokio::test]
async fn test_scheduled_edge_counts_toward_depth() {
    let mut config = EngineConfig::default();
    config.chain.max_depth = 2;
    let h = Harness::with_config(config);
    h.delegate("a", "b", DelegationMode::FlexibleDomain, Scope::Global)
        .await
        .unwrap();
    h.schedule("b", "c", Scope::Global, 1).await.unwrap();

    let err = h
        .delegate("c", "d", DelegationMode::FlexibleDomain, Scope::Global)
        .await
        .unwrap_err();
    assert!(matches!(err, DelegationError::ChainTooLong { .. }), "{err}");
}

#[tokio::test]
async fn test_self_delegation_writes_nothing() {
    let h = Harness::new();
    let err = h
        .delegate("a", "a", DelegationMode::FlexibleDomain, Scope::Global)
        .await
        .unwrap_err();
    assert!(matches!(err, DelegationError::SelfDelegation(_)));
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(h.store.is_empty().await);
    assert!(h.events.events().is_empty());
    assert_eq!(h.metrics.count("delegation_rejected.validation"), 1);
}

#[tokio::test]
async fn test_depth_limit_on_create() {
    let mut config = EngineConfig::default();
    config.chain.max_depth = 2;
    let h = Harness::with_config(config);
    h.delegate("b", "c", DelegationMode::FlexibleDomain, Scope::Global)
        .await
        .unwrap();
    h.delegate("a", "b", DelegationMode::FlexibleDomain, Scope::Global)
        .await
        .unwrap();

    let err = h
        .delegate("x", "a", DelegationMode::FlexibleDomain, Scope::Global)
        .await
        .unwrap_err();
    assert!(matches!(err, DelegationError::ChainTooLong { max_depth: 2, .. }));
}

#[tokio::test]
async fn test_extending_chain_below_long_upstream_is_rejected() {
    let mut config = EngineConfig::default();
    config.chain.max_depth = 3;
    let h = Harness::with_config(config);
    for (from, to) in [("t0", "t1"), ("t1", "t2"), ("t2", "t3")] {
        h.delegate(from, to, DelegationMode::FlexibleDomain, Scope::Global)
            .await
            .unwrap();
    }

    let err = h
        .delegate("t3", "x", DelegationMode::FlexibleDomain, Scope::Global)
        .await
        .unwrap_err();
    match &err {
        DelegationError::ChainTooLong { max_depth: 3, .. } => {}
        other => panic!("expected depth failure, got {other}"),
    }
    assert_eq!(err.kind(), ErrorKind::GraphIntegrity);

    let trace = h.engine.resolve_with_trace(&"t0".into(), &Scope::Global).await;
    assert_eq!(trace.delegatee, UserId::from("t3"));
    assert!(!trace.is_degraded());
}

#[tokio::test]
async fn test_chain_of_exactly_max_depth_is_accepted() {
    let h = Harness::new();
    let names = ["t0", "t1", "t2", "t3", "t4", "t5", "x", "y", "d"];
    for pair in names.windows(2).rev() {
        h.delegate(pair[0], pair[1], DelegationMode::FlexibleDomain, Scope::Global)
            .await
            .unwrap();
    }
    // 8 hops from t0 to d; one more link in front is too long
    assert_eq!(h.resolve("t0", &Scope::Global).await, UserId::from("d"));
    let err = h
        .delegate("a", "t0", DelegationMode::FlexibleDomain, Scope::Global)
        .await
        .unwrap_err();
    assert!(matches!(err, DelegationError::ChainTooLong { .. }));
}

// =========================================================================
// Conflicts and state
// =========================================================================

#[tokio::test]
async fn test_second_delegation_in_same_scope_conflicts() {
    let h = Harness::new();
    h.delegate("a", "b", DelegationMode::FlexibleDomain, field("F"))
        .await
        .unwrap();

    let err = h
        .delegate("a", "c", DelegationMode::FlexibleDomain, field("F"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(err.to_string().contains("already delegated in this scope"));

    // another scope is a separate slot
    h.delegate("a", "c", DelegationMode::FlexibleDomain, field("G"))
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_for_one_slot_have_one_winner() {
    let h = Harness::new();
    let targets = ["t0", "t1", "t2", "t3", "t4", "t5"];

    let tasks: Vec<_> = targets
        .iter()
        .map(|&target| {
            let engine = h.engine.clone();
            tokio::spawn(async move {
                engine
                    .create(CreateRequest::new(
                        "a",
                        target,
                        DelegationMode::FlexibleDomain,
                        field("F"),
                    ))
                    .await
            })
        })
        .collect();

    let mut wins = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => wins += 1,
            Err(err) => assert_eq!(err.kind(), ErrorKind::Conflict, "{err}"),
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(h.store.len().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_opposite_creates_never_form_a_loop() {
    for _ in 0..50 {
        let h = Harness::new();
        let forward = {
            let engine = h.engine.clone();
            tokio::spawn(async move {
                engine
                    .create(CreateRequest::new(
                        "a",
                        "b",
                        DelegationMode::FlexibleDomain,
                        Scope::Global,
                    ))
                    .await
            })
        };
        let backward = {
            let engine = h.engine.clone();
            tokio::spawn(async move {
                engine
                    .create(CreateRequest::new(
                        "b",
                        "a",
                        DelegationMode::FlexibleDomain,
                        Scope::Global,
                    ))
                    .await
            })
        };

        let outcomes = [forward.await.unwrap(), backward.await.unwrap()];
        assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
        for err in outcomes.iter().filter_map(|o| o.as_ref().err()) {
            assert!(matches!(err, DelegationError::CycleDetected { .. }), "{err}");
        }
        assert!(h
            .engine
            .resolve_strict(&"a".into(), &Scope::Global)
            .await
            .is_ok());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_scoped_creates_respect_cap() {
    let mut config = EngineConfig::default();
    config.limits.max_active_per_delegator = 1;
    let h = Harness::with_config(config);

    let tasks: Vec<_> = ["1", "2", "3", "4"]
        .iter()
        .map(|&id| {
            let engine = h.engine.clone();
            tokio::spawn(async move {
                engine
                    .create(CreateRequest::new(
                        "a",
                        "b",
                        DelegationMode::FlexibleDomain,
                        field(id),
                    ))
                    .await
            })
        })
        .collect();

    let mut wins = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => wins += 1,
            Err(err) => assert!(
                matches!(err, DelegationError::DelegationLimitReached { .. }),
                "{err}"
            ),
        }
    }
    assert_eq!(wins, 1);
}

#[tokio::test]
async fn test_scheduled_delegations_count_toward_cap() {
    let mut config = EngineConfig::default();
    config.limits.max_active_per_delegator = 2;
    let h = Harness::with_config(config);

    h.schedule("a", "b", field("1"), 1).await.unwrap();
    h.schedule("a", "b", field("2"), 1).await.unwrap();
    let err = h.schedule("a", "b", field("3"), 1).await.unwrap_err();
    assert!(matches!(
        err,
        DelegationError::DelegationLimitReached {
            active: 2,
            limit: 2,
            ..
        }
    ));

    h.clock.advance(Duration::days(2));
    assert_eq!(
        h.store
            .count_active_by_delegator(&"a".into(), h.clock.now())
            .await
            .unwrap(),
        2
    );
}

#[tokio::test]
async fn test_per_delegator_cap() {
    let mut config = EngineConfig::default();
    config.limits.max_active_per_delegator = 2;
    let h = Harness::with_config(config);

    h.delegate("a", "b", DelegationMode::FlexibleDomain, field("1"))
        .await
        .unwrap();
    h.delegate("a", "b", DelegationMode::FlexibleDomain, field("2"))
        .await
        .unwrap();
    let err = h
        .delegate("a", "b", DelegationMode::FlexibleDomain, field("3"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DelegationError::DelegationLimitReached {
            active: 2,
            limit: 2,
            ..
        }
    ));
}

#[tokio::test]
async fn test_pending_delegation_holds_slot_without_resolving() {
    let h = Harness::new();
    let start = h.clock.now() + Duration::days(1);
    h.engine
        .create(
            CreateRequest::new("a", "b", DelegationMode::FlexibleDomain, Scope::Global)
                .with_options(CreateOptions::default().with_start_date(start)),
        )
        .await
        .unwrap();

    assert_eq!(h.resolve("a", &Scope::Global).await, UserId::from("a"));
    let err = h
        .delegate("a", "c", DelegationMode::FlexibleDomain, Scope::Global)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    h.clock.advance(Duration::days(2));
    assert_eq!(h.resolve("a", &Scope::Global).await, UserId::from("b"));
}

#[tokio::test]
async fn test_decided_poll_cannot_be_delegated() {
    let h = Harness::new();
    let poll = Scope::Poll("p1".into());
    h.decisions.record("a", poll.clone()).await;

    let err = h
        .delegate("a", "b", DelegationMode::FlexibleDomain, poll)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);

    h.delegate("a", "b", DelegationMode::FlexibleDomain, Scope::Poll("p2".into()))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_missing_or_deleted_delegatee() {
    let h = Harness::new();
    let err = h
        .delegate("a", "nobody", DelegationMode::FlexibleDomain, Scope::Global)
        .await
        .unwrap_err();
    assert!(matches!(err, DelegationError::DelegateeNotFound(_)));

    h.directory.soft_delete_user(&"b".into()).await;
    let err = h
        .delegate("a", "b", DelegationMode::FlexibleDomain, Scope::Global)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_legacy_term_on_flexible_mode_is_rejected() {
    let h = Harness::new();
    let err = h
        .engine
        .create(
            CreateRequest::new("a", "b", DelegationMode::FlexibleDomain, Scope::Global)
                .with_options(
                    CreateOptions::default().with_legacy_term(h.clock.now() + Duration::days(10)),
                ),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DelegationError::FieldNotApplicable { .. }));
}

// =========================================================================
// Revocation and events
// =========================================================================

#[tokio::test]
async fn test_revoke_is_idempotent() {
    let h = Harness::new();
    let d = h
        .delegate("a", "b", DelegationMode::FlexibleDomain, Scope::Global)
        .await
        .unwrap();

    let first = h.engine.revoke(&d.id).await.unwrap();
    assert!(first.changed());
    let revoked_at = first.delegation().revoked_at;

    h.clock.advance(Duration::minutes(5));
    let second = h.engine.revoke(&d.id).await.unwrap();
    assert!(matches!(second, RevokeOutcome::AlreadyRevoked(_)));
    assert_eq!(second.delegation().revoked_at, revoked_at);

    assert_eq!(h.events.names(), ["delegation_created", "delegation_revoked"]);
}

#[tokio::test]
async fn test_revoke_unknown_id_is_not_found() {
    let h = Harness::new();
    let err = h.engine.revoke(&DelegationId::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_adopt_mode_emits_event_once() {
    let h = Harness::new();
    let user = UserId::from("a");
    h.engine
        .adopt_mode(&user, DelegationMode::HybridSeed)
        .await
        .unwrap();
    h.engine
        .adopt_mode(&user, DelegationMode::HybridSeed)
        .await
        .unwrap();

    assert_eq!(h.events.names(), ["mode_adopted"]);
    assert_eq!(
        h.engine.lifecycle().adopted_mode(&user).await,
        Some(DelegationMode::HybridSeed)
    );

    let err = h
        .engine
        .adopt_mode(&"nobody".into(), DelegationMode::HybridSeed)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// =========================================================================
// Advisory signals
// =========================================================================

#[tokio::test]
async fn test_concentration_warning_does_not_block() {
    let h = Harness::new();
    let created = h
        .engine
        .create(CreateRequest::new(
            "a",
            "x",
            DelegationMode::FlexibleDomain,
            Scope::Global,
        ))
        .await
        .unwrap();

    assert!(created
        .warnings
        .iter()
        .any(|w| matches!(w, AdvisoryWarning::HighConcentration(r) if r.percent == 1.0)));
    assert_eq!(h.metrics.count("advisory_warning.high_concentration"), 1);
}

#[tokio::test]
async fn test_dominant_delegatee_reads_high() {
    let h = Harness::new();
    for from in ["a", "b", "c", "d", "y", "t0", "t1", "t2"] {
        h.delegate(from, "x", DelegationMode::FlexibleDomain, Scope::Global)
            .await
            .unwrap();
    }
    h.delegate("t3", "y", DelegationMode::FlexibleDomain, Scope::Global)
        .await
        .unwrap();
    h.delegate("t4", "a", DelegationMode::FlexibleDomain, Scope::Global)
        .await
        .unwrap();

    let report = h.engine.concentration(&"x".into(), None).await.unwrap();
    assert_eq!((report.delegatee_count, report.total_count), (8, 10));
    assert_eq!(report.level.as_str(), "high");
}

#[tokio::test]
async fn test_super_delegate_warning_at_scope_breadth() {
    let mut config = EngineConfig::default();
    config.super_delegate.distinct_scopes_threshold = 2;
    let h = Harness::with_config(config);

    let first = h
        .engine
        .create(CreateRequest::new("a", "x", DelegationMode::FlexibleDomain, field("1")))
        .await
        .unwrap();
    assert!(!first
        .warnings
        .iter()
        .any(|w| matches!(w, AdvisoryWarning::SuperDelegateRisk(_))));

    let second = h
        .engine
        .create(CreateRequest::new("b", "x", DelegationMode::FlexibleDomain, field("2")))
        .await
        .unwrap();
    let risk = second.warnings.iter().find_map(|w| match w {
        AdvisoryWarning::SuperDelegateRisk(report) => Some(report),
        AdvisoryWarning::HighConcentration(_) => None,
    });
    let risk = risk.expect("super-delegate warning");
    assert!(risk.reason.contains("distinct fields"));
    assert_eq!(risk.stats.projected_distinct_scopes, 2);
}

#[tokio::test]
async fn test_super_delegate_risk_query() {
    let h = Harness::new();
    for (i, from) in ["a", "b", "c", "d", "y", "t0", "t1", "t2", "t3", "t4", "t5"]
        .iter()
        .enumerate()
    {
        h.delegate(from, "x", DelegationMode::FlexibleDomain, field(&i.to_string()))
            .await
            .unwrap();
    }

    let report = h
        .engine
        .super_delegate_risk(&"x".into(), Some(&field("new")))
        .await
        .unwrap();
    assert_eq!(report.stats.current_distinct_scopes, 11);
    assert!(report.risk);
}

// =========================================================================
// Tally
// =========================================================================

#[tokio::test]
async fn test_tally_counts_effective_weight() {
    let h = Harness::new();
    h.delegate("a", "c", DelegationMode::FlexibleDomain, Scope::Global)
        .await
        .unwrap();
    h.delegate("b", "a", DelegationMode::FlexibleDomain, Scope::Global)
        .await
        .unwrap();

    let voters: Vec<UserId> = ["a", "b", "c", "d"].iter().map(|&u| u.into()).collect();
    let tally = h.engine.tally(&voters, &Scope::Global).await;
    assert_eq!(tally.weight_of(&"c".into()), 3);
    assert_eq!(tally.weight_of(&"d".into()), 1);
    assert!(tally.degraded.is_empty());
}

// =========================================================================
// Safe summary
// =========================================================================

#[tokio::test]
async fn test_summary_happy_path() {
    let h = Harness::new();
    h.delegate("a", "b", DelegationMode::HybridSeed, Scope::Global)
        .await
        .unwrap();
    h.delegate("a", "c", DelegationMode::FlexibleDomain, field("F"))
        .await
        .unwrap();
    h.delegate("d", "a", DelegationMode::FlexibleDomain, Scope::Global)
        .await
        .unwrap();

    let summary = h
        .engine
        .safe_summary(&"a".into(), Some("trace-1".into()))
        .await;
    assert!(summary.ok, "{:?}", summary.errors);
    assert_eq!(summary.meta.trace_id, "trace-1");
    assert!(summary.global_delegation.is_some());
    assert_eq!(summary.scoped_delegations.as_ref().map(Vec::len), Some(1));
    assert_eq!(summary.counts.active_outgoing, Some(2));
    assert_eq!(summary.counts.active_incoming, Some(1));
    assert_eq!(
        summary.global_resolution.map(|r| r.delegatee),
        Some(UserId::from("b"))
    );
}

#[tokio::test]
async fn test_summary_respects_row_cap() {
    let mut config = EngineConfig::default();
    config.summary.row_cap = 2;
    let h = Harness::with_config(config);
    h.delegate("a", "b", DelegationMode::HybridSeed, Scope::Global)
        .await
        .unwrap();
    for i in 0..4 {
        h.delegate("a", "c", DelegationMode::FlexibleDomain, field(&i.to_string()))
            .await
            .unwrap();
    }

    let summary = h.engine.safe_summary(&"a".into(), None).await;
    assert!(summary.ok);
    assert_eq!(summary.scoped_delegations.map(|rows| rows.len()), Some(2));
    assert_eq!(summary.counts.active_outgoing, Some(5));
    assert!(!summary.meta.trace_id.is_empty());
}

#[tokio::test]
async fn test_summary_survives_store_outage() {
    let h = Harness::new();
    h.store.set_unavailable(true);

    let summary = h.engine.safe_summary(&"a".into(), None).await;
    assert!(!summary.ok);
    assert_eq!(summary.errors.len(), 4);
    assert_eq!(summary.counts.active_outgoing, None);
    assert!(summary
        .global_resolution
        .as_ref()
        .map_or(false, |r| r.is_degraded()));
    assert_eq!(h.metrics.count("summary_served.partial"), 1);

    let json = serde_json::to_value(&summary).unwrap();
    for key in ["ok", "errors", "global_delegation", "scoped_delegations", "counts"] {
        assert!(json.get(key).is_some(), "missing {key}");
    }
    assert!(json["meta"]["trace_id"].is_string());
}

#[tokio::test]
async fn test_summary_for_unknown_user_is_ok() {
    let h = Harness::new();
    let summary = h.engine.safe_summary(&"ghost".into(), None).await;
    assert!(summary.ok);
    assert_eq!(summary.global_delegation, None);
    assert_eq!(summary.counts.active_incoming, Some(0));
}

/// A store whose incoming count panics and whose listing never returns.
struct FaultyStore {
    inner: MemoryStore,
}

#[async_trait]
impl DelegationStore for FaultyStore {
    async fn find_by_id(&self, id: &DelegationId) -> liquid_store::Result<Option<Delegation>> {
        self.inner.find_by_id(id).await
    }

    async fn find_active_by_delegator_and_scope(
        &self,
        delegator: &UserId,
        scope: &Scope,
        now: DateTime<Utc>,
    ) -> liquid_store::Result<Option<Delegation>> {
        self.inner
            .find_active_by_delegator_and_scope(delegator, scope, now)
            .await
    }

    async fn find_live_by_delegator_and_scope(
        &self,
        delegator: &UserId,
        scope: &Scope,
        now: DateTime<Utc>,
    ) -> liquid_store::Result<Option<Delegation>> {
        self.inner
            .find_live_by_delegator_and_scope(delegator, scope, now)
            .await
    }

    async fn list_live_by_delegatee_and_scope(
        &self,
        delegatee: &UserId,
        scope: &Scope,
        now: DateTime<Utc>,
    ) -> liquid_store::Result<Vec<Delegation>> {
        self.inner
            .list_live_by_delegatee_and_scope(delegatee, scope, now)
            .await
    }

    async fn list_active_by_delegator(
        &self,
        _delegator: &UserId,
        _now: DateTime<Utc>,
        _limit: usize,
    ) -> liquid_store::Result<Vec<Delegation>> {
        std::future::pending().await
    }

    async fn count_active_by_delegator(
        &self,
        delegator: &UserId,
        now: DateTime<Utc>,
    ) -> liquid_store::Result<usize> {
        self.inner.count_active_by_delegator(delegator, now).await
    }

    async fn count_live_by_delegator(
        &self,
        delegator: &UserId,
        now: DateTime<Utc>,
    ) -> liquid_store::Result<usize> {
        self.inner.count_live_by_delegator(delegator, now).await
    }

    async fn count_active_by_delegatee(
        &self,
        _delegatee: &UserId,
        _scope: Option<&Scope>,
        _now: DateTime<Utc>,
    ) -> liquid_store::Result<usize> {
        panic!("index corrupted")
    }

    async fn count_active(
        &self,
        scope: Option<&Scope>,
        now: DateTime<Utc>,
    ) -> liquid_store::Result<usize> {
        self.inner.count_active(scope, now).await
    }

    async fn count_distinct_scopes_by_delegatee(
        &self,
        delegatee: &UserId,
        now: DateTime<Utc>,
    ) -> liquid_store::Result<usize> {
        self.inner
            .count_distinct_scopes_by_delegatee(delegatee, now)
            .await
    }

    async fn count_distinct_delegatees(&self, now: DateTime<Utc>) -> liquid_store::Result<usize> {
        self.inner.count_distinct_delegatees(now).await
    }

    async fn count_delegatees_with_in_degree_above(
        &self,
        in_degree: usize,
        now: DateTime<Utc>,
    ) -> liquid_store::Result<usize> {
        self.inner
            .count_delegatees_with_in_degree_above(in_degree, now)
            .await
    }

    async fn insert_if_vacant(
        &self,
        delegation: Delegation,
        now: DateTime<Utc>,
    ) -> liquid_store::Result<Delegation> {
        self.inner.insert_if_vacant(delegation, now).await
    }

    async fn mark_revoked(
        &self,
        id: &DelegationId,
        at: DateTime<Utc>,
    ) -> liquid_store::Result<RevokeOutcome> {
        self.inner.mark_revoked(id, at).await
    }
}

#[tokio::test]
async fn test_summary_contains_panics_and_hangs() {
    let mut config = EngineConfig::default();
    config.summary.sub_operation_timeout_ms = 50;

    let collaborators = Collaborators::new(
        Arc::new(FaultyStore {
            inner: MemoryStore::new(),
        }),
        Arc::new(MemoryDirectory::with_users(["a"])),
        Arc::new(MemoryDecisions::new()),
    );
    let engine = DelegationEngine::new(config, collaborators).unwrap();

    let summary = engine.safe_summary(&"a".into(), Some("t".into())).await;
    assert!(!summary.ok);
    assert_eq!(summary.errors.len(), 2, "{:?}", summary.errors);
    assert!(summary.errors.iter().any(|e| e.contains("panicked")));
    assert!(summary.errors.iter().any(|e| e.contains("timed out")));
    assert_eq!(summary.scoped_delegations, None);
    assert_eq!(summary.counts.active_incoming, None);
    assert_eq!(summary.counts.active_outgoing, Some(0));
}

#[test]
fn test_invalid_config_is_rejected_at_construction() {
    let mut config = EngineConfig::default();
    config.chain.max_depth = 0;
    let collaborators = Collaborators::new(
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryDirectory::new()),
        Arc::new(MemoryDecisions::new()),
    );
    assert!(matches!(
        DelegationEngine::new(config, collaborators),
        Err(DelegationError::Config(_))
    ));
}
