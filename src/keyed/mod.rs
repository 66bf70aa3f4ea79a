//! Keyed State Module
//!
//! Fine-grained concurrency control for many independent mutable entities.
//! Each key (account id, project name) gets its own lock, created lazily in a
//! sharded table; updates to one key are linearizable and never wait on
//! another key.

pub mod counters;
pub mod ledger;
pub mod lock_registry;
pub mod racy;
pub mod state;

pub use counters::*;
pub use ledger::*;
pub use lock_registry::*;
pub use racy::*;
pub use state::*;
