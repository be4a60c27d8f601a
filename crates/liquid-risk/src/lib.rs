//! # Liquid Risk
//!
//! Advisory signals about how decision weight is spreading through the
//! delegation graph.
//!
//! | Component | Question it answers |
//! |-----------|---------------------|
//! | [`ConcentrationMonitor`] | What share of active delegations point at X? |
//! | [`SuperDelegateDetector`] | Would one more delegation make X a super-delegate? |
//!
//! Neither component blocks anything. Their reports are attached to a
//! creation response as warnings and are otherwise informational.

mod concentration;
mod error;
mod super_delegate;

pub use concentration::{
    ConcentrationConfig, ConcentrationLevel, ConcentrationMonitor, ConcentrationReport,
};
pub use error::{Result, RiskError};
pub use super_delegate::{
    RiskTrigger, SuperDelegateConfig, SuperDelegateDetector, SuperDelegateReport,
    SuperDelegateStats,
};
