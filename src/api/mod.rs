//! API Module
//!
//! REST API over the topology service, the account ledger and the project
//! counters.

pub mod rest;
pub mod server;

pub use rest::*;
pub use server::*;
