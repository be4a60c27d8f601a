//! Domain events for external audit and telemetry consumers.
//!
//! The engine never persists audit records itself. It hands each event to an
//! injected [`EventSink`] and moves on.

use chrono::{DateTime, Utc};
use liquid_store::{Delegation, DelegationId, DelegationMode, Scope, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::info;

/// Something that happened to the delegation graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    DelegationCreated {
        delegation_id: DelegationId,
        delegator: UserId,
        delegatee: UserId,
        mode: DelegationMode,
        scope: Scope,
        at: DateTime<Utc>,
    },
    DelegationRevoked {
        delegation_id: DelegationId,
        delegator: UserId,
        delegatee: UserId,
        scope: Scope,
        at: DateTime<Utc>,
    },
    ModeAdopted {
        user: UserId,
        mode: DelegationMode,
        at: DateTime<Utc>,
    },
}

impl DomainEvent {
    pub fn created(delegation: &Delegation) -> Self {
        Self::DelegationCreated {
            delegation_id: delegation.id,
            delegator: delegation.delegator_id.clone(),
            delegatee: delegation.delegatee_id.clone(),
            mode: delegation.mode,
            scope: delegation.scope.clone(),
            at: delegation.created_at,
        }
    }

    /// Built from the revoked row; `at` is its `revoked_at`.
    pub fn revoked(delegation: &Delegation, at: DateTime<Utc>) -> Self {
        Self::DelegationRevoked {
            delegation_id: delegation.id,
            delegator: delegation.delegator_id.clone(),
            delegatee: delegation.delegatee_id.clone(),
            scope: delegation.scope.clone(),
            at: delegation.revoked_at.unwrap_or(at),
        }
    }

    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DelegationCreated { .. } => "delegation_created",
            Self::DelegationRevoked { .. } => "delegation_revoked",
            Self::ModeAdopted { .. } => "mode_adopted",
        }
    }
}

/// Receives domain events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &DomainEvent);
}

/// Writes every event as a structured `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &DomainEvent) {
        let payload = serde_json::to_string(event).unwrap_or_default();
        info!(target: "liquid::events", event = event.name(), %payload, "domain event");
    }
}

/// Keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<DomainEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(DomainEvent::name).collect()
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: &DomainEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}
