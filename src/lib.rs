//! Leaf Topology - Keyed State and Fan-Out Topology Aggregation
//!
//! Two concurrency patterns sharing one runtime:
//!
//! - per-key linearizable state, where every key gets its own lazily created
//!   lock and mutations on different keys never wait on each other;
//! - a fan-out/gather over many remote servers whose replies are folded into
//!   one graph of masters, leaf nodes and the links between them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                         REST API / CLI subcommands                          │
//! ├──────────────────────────────────────┬──────────────────────────────────────┤
//! │          Keyed State                 │          Topology Service            │
//! │  ┌────────────────┐ ┌─────────────┐  │  ┌──────────────┐ ┌───────────────┐  │
//! │  │ AccountLedger  │ │  Project    │  │  │   FanOut     │ │   Topology    │  │
//! │  │                │ │  Counters   │  │  │ Coordinator  │→│   Assembler   │  │
//! │  └───────┬────────┘ └──────┬──────┘  │  └──────┬───────┘ └───────────────┘  │
//! │          └────────┬────────┘         │         │                            │
//! │          ┌────────┴────────┐         │  ┌──────┴───────┐                    │
//! │          │KeyedLockRegistry│         │  │ Probe Client │ (one per target)   │
//! │          │ 64-way sharded  │         │  └──────────────┘                    │
//! │          └─────────────────┘         │                                      │
//! └──────────────────────────────────────┴──────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`keyed`]: Per-key lock registry, keyed state, ledger and counters
//! - [`probe`]: One bounded topology query to one server
//! - [`fanout`]: Concurrent probes with a complete gather
//! - [`topology`]: Graph assembly and the round-running service
//! - [`api`]: REST API
//! - [`config`]: YAML configuration
//! - [`error`]: Error types and handling

pub mod api;
pub mod config;
pub mod demo;
pub mod domain;
pub mod error;
pub mod fanout;
pub mod keyed;
pub mod metrics;
pub mod probe;
pub mod topology;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use api::{ApiServer, RestRouter};

pub use config::{ApiServerConfig, TopologyConfig};

pub use domain::ports::Prober;

pub use error::{Error, ErrorClass, Result};

pub use fanout::{FanOutConfig, FanOutCoordinator};

pub use keyed::{
    AccountLedger, DeclineReason, Key, KeyedLockRegistry, KeyedState, LockHandle, Mutation,
    ProjectCounters, TransferOutcome, UnguardedBalance,
};

pub use metrics::Metrics;

pub use probe::{
    HttpProbeClient, ProbeClientConfig, ProbeFailure, ProbeResult, ProbeTarget,
};

pub use topology::{
    AssemblerConfig, Edge, Graph, NodeRecord, NodeRole, TopologyAssembler, TopologyService,
    TopologySnapshot,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
