//! Concord Test Harness - Simulation and protocol validation
//!
//! This crate provides:
//! - Seeded chaos links (delay, reordering, duplication)
//! - A multi-node network simulator running real nodes over the wire codec
//! - Scripted Byzantine peers
//! - End-to-end scenario tests (under `tests/`) and criterion benches

pub mod adversary;
pub mod chaos;
pub mod simulator;

pub use adversary::*;
pub use chaos::*;
pub use simulator::*;
