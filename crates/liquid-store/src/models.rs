//! # Core Data Models for Liquid Delegation
//!
//! The delegation edge is the only entity the engine owns. Everything else
//! (users, decisions) is referenced by opaque identifier and looked up through
//! collaborator traits.
//!
//! ## Invariants carried by the types
//!
//! - [`Scope`] is a closed union; every consumer matches it exhaustively, so an
//!   "unknown scope" cannot reach the resolver or the uniqueness check.
//! - [`Delegation::status`] is the single place expiry is interpreted. Nothing
//!   ever writes an "expired" state; it is derived from the evaluation instant.
//! - `revoked_at` is set at most once (enforced by the stores, see
//!   [`crate::DelegationStore::mark_revoked`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ParseError;

/// Opaque user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a user identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Unique identifier of a delegation row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DelegationId(Uuid);

impl DelegationId {
    /// Generates a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DelegationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DelegationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DelegationId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| ParseError::InvalidId(s.to_string()))
    }
}

/// How a delegation behaves over time and across scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationMode {
    /// Fixed-term delegation carrying a bounded expiration date.
    LegacyFixedTerm,
    /// Open-ended delegation for a single scope.
    FlexibleDomain,
    /// A global delegation in this mode seeds every scope that has no
    /// more specific delegation.
    HybridSeed,
}

impl DelegationMode {
    /// All modes, in registry order.
    pub const ALL: [DelegationMode; 3] = [
        DelegationMode::LegacyFixedTerm,
        DelegationMode::FlexibleDomain,
        DelegationMode::HybridSeed,
    ];

    /// Stable machine name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LegacyFixedTerm => "legacy_fixed_term",
            Self::FlexibleDomain => "flexible_domain",
            Self::HybridSeed => "hybrid_seed",
        }
    }
}

impl fmt::Display for DelegationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DelegationMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "legacy_fixed_term" | "legacy" => Ok(Self::LegacyFixedTerm),
            "flexible_domain" | "flexible" => Ok(Self::FlexibleDomain),
            "hybrid_seed" | "hybrid" => Ok(Self::HybridSeed),
            _ => Err(ParseError::InvalidMode(s.to_string())),
        }
    }
}

/// Scope variant without its target identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    Global,
    Poll,
    Label,
    Field,
    Institution,
    Value,
    Idea,
}

impl ScopeKind {
    /// Key prefix used in the canonical scope form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Poll => "poll",
            Self::Label => "label",
            Self::Field => "field",
            Self::Institution => "institution",
            Self::Value => "value",
            Self::Idea => "idea",
        }
    }

    /// Plural noun for human-readable explanations.
    pub fn plural(&self) -> &'static str {
        match self {
            Self::Global => "global scopes",
            Self::Poll => "polls",
            Self::Label => "labels",
            Self::Field => "fields",
            Self::Institution => "institutions",
            Self::Value => "values",
            Self::Idea => "ideas",
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The domain a delegation applies to.
///
/// # Canonical form
///
/// `global`, or `<kind>:<id>` (e.g. `field:climate`). The canonical form is
/// what [`fmt::Display`] prints, what [`FromStr`] parses, and what the sled
/// backend keys uniqueness slots on.
///
/// ```rust
/// use liquid_store::Scope;
///
/// let scope: Scope = "field:climate".parse().unwrap();
/// assert_eq!(scope, Scope::Field("climate".into()));
/// assert_eq!(scope.to_string(), "field:climate");
/// assert!("global".parse::<Scope>().unwrap().is_global());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Scope {
    Global,
    Poll(String),
    Label(String),
    Field(String),
    Institution(String),
    Value(String),
    Idea(String),
}

impl Scope {
    /// Builds a scope from a kind and target id. `id` is ignored for `Global`.
    pub fn from_parts(kind: ScopeKind, id: impl Into<String>) -> Self {
        let id = id.into();
        match kind {
            ScopeKind::Global => Self::Global,
            ScopeKind::Poll => Self::Poll(id),
            ScopeKind::Label => Self::Label(id),
            ScopeKind::Field => Self::Field(id),
            ScopeKind::Institution => Self::Institution(id),
            ScopeKind::Value => Self::Value(id),
            ScopeKind::Idea => Self::Idea(id),
        }
    }

    /// Returns the variant tag.
    pub fn kind(&self) -> ScopeKind {
        match self {
            Self::Global => ScopeKind::Global,
            Self::Poll(_) => ScopeKind::Poll,
            Self::Label(_) => ScopeKind::Label,
            Self::Field(_) => ScopeKind::Field,
            Self::Institution(_) => ScopeKind::Institution,
            Self::Value(_) => ScopeKind::Value,
            Self::Idea(_) => ScopeKind::Idea,
        }
    }

    /// Returns the target identifier, `None` for `Global`.
    pub fn target_id(&self) -> Option<&str> {
        match self {
            Self::Global => None,
            Self::Poll(id)
            | Self::Label(id)
            | Self::Field(id)
            | Self::Institution(id)
            | Self::Value(id)
            | Self::Idea(id) => Some(id),
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Self::Global)
    }

    /// Canonical key, identical to the `Display` output.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target_id() {
            None => f.write_str(ScopeKind::Global.as_str()),
            Some(id) => write!(f, "{}:{}", self.kind(), id),
        }
    }
}

impl FromStr for Scope {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("global") {
            return Ok(Self::Global);
        }

        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| ParseError::InvalidScope(s.to_string()))?;
        if id.is_empty() {
            return Err(ParseError::InvalidScope(s.to_string()));
        }

        let kind = match kind.to_ascii_lowercase().as_str() {
            "poll" => ScopeKind::Poll,
            "label" => ScopeKind::Label,
            "field" => ScopeKind::Field,
            "institution" => ScopeKind::Institution,
            "value" => ScopeKind::Value,
            "idea" => ScopeKind::Idea,
            _ => return Err(ParseError::InvalidScope(s.to_string())),
        };
        Ok(Self::from_parts(kind, id))
    }
}

/// Lifecycle state of a delegation at a given instant.
///
/// Precedence when several apply: `SoftDeleted` > `Revoked` > `Expired` >
/// `Pending` > `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationStatus {
    /// Start date still in the future.
    Pending,
    Active,
    /// Explicitly revoked. Terminal.
    Revoked,
    /// End date or legacy term has passed. Terminal, never stored.
    Expired,
    /// Tombstoned by external housekeeping. Terminal.
    SoftDeleted,
}

/// A directed delegation edge from `delegator_id` to `delegatee_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub id: DelegationId,
    pub delegator_id: UserId,
    pub delegatee_id: UserId,
    pub mode: DelegationMode,
    pub scope: Scope,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    /// Present only for [`DelegationMode::LegacyFixedTerm`].
    pub legacy_term_ends_at: Option<DateTime<Utc>>,
    pub is_anonymous: bool,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
}

impl Delegation {
    /// Earliest of `end_date` and `legacy_term_ends_at`, if any.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match (self.end_date, self.legacy_term_ends_at) {
            (Some(end), Some(term)) => Some(end.min(term)),
            (end, term) => end.or(term),
        }
    }

    /// Derives the lifecycle state at `now`.
    pub fn status(&self, now: DateTime<Utc>) -> DelegationStatus {
        if self.is_deleted {
            DelegationStatus::SoftDeleted
        } else if self.revoked_at.is_some() {
            DelegationStatus::Revoked
        } else if self.expires_at().is_some_and(|at| at <= now) {
            DelegationStatus::Expired
        } else if self.start_date > now {
            DelegationStatus::Pending
        } else {
            DelegationStatus::Active
        }
    }

    /// True when the edge participates in resolution at `now`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status(now) == DelegationStatus::Active
    }

    /// True while the row still holds its `(delegator, scope)` slot.
    ///
    /// A pending delegation holds the slot as well, so a later write cannot
    /// schedule a second edge that would overlap it once it starts.
    pub fn occupies_slot(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.status(now),
            DelegationStatus::Active | DelegationStatus::Pending
        )
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

/// Identity record as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub is_deleted: bool,
}

impl UserRecord {
    pub fn new(id: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            is_deleted: false,
        }
    }
}
