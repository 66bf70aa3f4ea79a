//! Domain module - ports between the topology core and its transports

pub mod ports;

pub use ports::*;
