//! # Liquid Core
//!
//! Delegation graph resolution and governance safety engine.
//!
//! Users hand their decision weight to other users, globally or per scope.
//! The engine keeps that graph acyclic and shallow on write, resolves it
//! with a visited set on read, and reports when weight concentrates.
//!
//! ## Components
//!
//! | Component | Crate | Role |
//! |-----------|-------|------|
//! | [`ChainResolver`](liquid_chain::ChainResolver) | liquid-chain | Strict and lenient chain walks |
//! | [`DelegationLifecycleManager`] | liquid-core | Validated create, idempotent revoke |
//! | [`ConcentrationMonitor`](liquid_risk::ConcentrationMonitor) | liquid-risk | Share of delegations per delegatee |
//! | [`SuperDelegateDetector`](liquid_risk::SuperDelegateDetector) | liquid-risk | In-degree and scope-breadth risk |
//! | [`SafeSummaryAggregator`] | liquid-core | Never-failing per-user overview |
//! | [`ModeRegistry`] | liquid-core | Mode descriptors and field rules |
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                    DelegationEngine                       │
//! ├───────────────────────────────────────────────────────────┤
//! │                                                           │
//! │   create / revoke          resolve / tally      summary   │
//! │         │                        │                 │      │
//! │         ▼                        ▼                 ▼      │
//! │  ┌──────────────┐        ┌──────────────┐  ┌────────────┐ │
//! │  │  Lifecycle   │──────▶ │    Chain     │◀─│    Safe    │ │
//! │  │   Manager    │ strict │   Resolver   │  │  Summary   │ │
//! │  └──────┬───────┘        └──────┬───────┘  └─────┬──────┘ │
//! │         │ advisory              │                │        │
//! │         ▼                       ▼                ▼        │
//! │  ┌──────────────┐        ┌──────────────────────────────┐ │
//! │  │ Concentration│        │       DelegationStore        │ │
//! │  │ SuperDelegate│───────▶│   (memory │ sled backends)   │ │
//! │  └──────────────┘        └──────────────────────────────┘ │
//! │                                                           │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - A create that would close a loop or exceed the depth limit is rejected
//!   and writes nothing.
//! - Two concurrent creates for one `(delegator, scope)` never both succeed.
//! - Concurrent creates that could close a loop together are checked one
//!   after the other, within one engine.
//! - Revoking twice is a no-op the second time.
//! - Reads never fail on a broken chain; they fall back to "you decide".
//! - [`DelegationEngine::safe_summary`] never fails.

mod config;
mod engine;
mod error;
mod events;
mod lifecycle;
mod metrics;
mod modes;
mod summary;

pub use config::{EngineConfig, LimitsConfig, SummaryConfig};
pub use engine::{Collaborators, DelegationEngine};
pub use error::{DelegationError, ErrorKind};
pub use events::{DomainEvent, EventSink, MemoryEventSink, TracingEventSink};
pub use lifecycle::{
    AdvisoryWarning, CreateOptions, CreateRequest, CreatedDelegation, DelegationLifecycleManager,
    LifecycleParts,
};
pub use metrics::{MemoryMetrics, Metric, MetricsSink, NoopMetrics};
pub use modes::{ModeDescriptor, ModeRegistry, ValidatedOptions};
pub use summary::{
    guarded, SafeSummaryAggregator, StepOutcome, SummaryCounts, SummaryMeta, SummaryResult,
};

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, DelegationError>;
