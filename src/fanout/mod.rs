//! Fan-Out Module
//!
//! Concurrent fan-out of topology probes with a gather step that always
//! yields one result per target.

pub mod coordinator;

pub use coordinator::*;
