//! # Liquid Chain
//!
//! Delegation-chain resolution: given a user and a scope, find who finally
//! decides for them.
//!
//! ## Guards
//!
//! A delegation graph needs two guards on every read:
//!
//! - **Loops**: a visited set, re-checked per hop. Writes refuse to create
//!   loops, but a store restored from backup may still contain one.
//! - **Depth**: a hop budget (default 8) bounds every walk.
//!
//! Both live in [`ChainWalk`], the only structure that extends a path.
//! [`ChainResolver::check_new_edge`] applies them before a write, over
//! pending edges too, and also counts the chain already feeding into the
//! new delegator.
//!
//! ## Quick Start
//!
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use std::sync::Arc;
//! use liquid_chain::{ChainResolver, ResolveMode, ResolverConfig};
//! use liquid_store::{MemoryStore, Scope, SystemClock, UserId};
//!
//! let resolver = ChainResolver::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(SystemClock),
//!     ResolverConfig::default(),
//! );
//!
//! let alice = UserId::new("alice");
//! let r = resolver.resolve(&alice, &Scope::Global, ResolveMode::Lenient).await.unwrap();
//! assert_eq!(r.delegatee, alice); // nobody delegated, alice decides
//! # }
//! ```

mod error;
mod resolver;
mod walk;

pub use error::{format_path, ChainError, Result};
pub use resolver::{ChainResolver, FallbackPolicy, ResolveMode, ResolverConfig, Tally};
pub use walk::{ChainWalk, Resolution};
