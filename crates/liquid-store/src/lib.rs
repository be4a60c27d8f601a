//! # Liquid Store
//!
//! Data model and persistence contracts for liquid delegation.
//!
//! A user may hand their decision weight to another user, either globally or
//! for one scope (poll, label, field, institution, value, idea). This crate
//! owns the one entity that models that hand-off, the [`Delegation`] edge,
//! and the collaborator traits the engine needs from its environment.
//!
//! ## Components
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`Delegation`], [`Scope`], [`DelegationMode`] | Data model |
//! | [`DelegationStore`] | Edge persistence with atomic slot uniqueness |
//! | [`UserDirectory`] | Identity existence and soft-delete flag |
//! | [`DecisionLedger`] | "Already decided on this target" query |
//! | [`Clock`] | Injectable wall clock |
//! | [`MemoryStore`] | In-memory backend (tests, rebuilt graphs) |
//! | [`SledStore`] | Embedded persistent backend |
//!
//! ## Lifecycle
//!
//! ```text
//!   Pending ──▶ Active ──▶ Revoked ──┐
//!                  │                 ├──▶ SoftDeleted
//!                  └────▶ Expired ───┘
//! ```
//!
//! `Revoked` is written exactly once. `Expired` is never written; it is read
//! off `end_date` / `legacy_term_ends_at` at query time. `SoftDeleted` is set
//! by external housekeeping only.

mod clock;
mod error;
mod memory;
mod models;
mod storage;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ParseError, Result, StoreError};
pub use memory::{MemoryDecisions, MemoryDirectory, MemoryStore};
pub use models::{
    Delegation, DelegationId, DelegationMode, DelegationStatus, Scope, ScopeKind, UserId,
    UserRecord,
};
pub use storage::SledStore;
pub use store::{DecisionLedger, DelegationStore, RevokeOutcome, UserDirectory};
