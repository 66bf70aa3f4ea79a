//! Probe Module
//!
//! One outbound topology query to one remote node, bounded by a timeout and
//! decoded into a typed [`ProbeResult`].

pub mod client;
pub mod types;

pub use client::*;
pub use types::*;
