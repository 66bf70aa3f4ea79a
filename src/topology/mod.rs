//! Topology Module
//!
//! Assembles probe results into a graph of masters, their child nodes and
//! the links between them.

pub mod assembler;
pub mod graph;
pub mod service;

pub use assembler::*;
pub use graph::*;
pub use service::*;
