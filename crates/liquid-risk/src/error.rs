//! Error types for the risk monitors.

use thiserror::Error;

/// Result type alias for risk computations.
pub type Result<T> = std::result::Result<T, RiskError>;

/// Errors raised while computing advisory risk signals.
///
/// The monitors never reject anything themselves; the only way to fail is
/// for the counts they need to be unavailable.
#[derive(Debug, Error)]
pub enum RiskError {
    #[error("store error while computing risk: {0}")]
    Store(#[from] liquid_store::StoreError),

    /// A threshold outside its valid range.
    #[error("invalid risk configuration: {0}")]
    InvalidConfig(String),
}
