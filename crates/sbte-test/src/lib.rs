//! SBTE Test Harness - Simulation and validation of routine timing
//!
//! This crate provides:
//! - Randomized routine generation from a seeded model
//! - Live-versus-trigger consistency checks on a virtual timer host
//! - Scheduler relay scenarios
//! - Integration tests and benchmarks

pub mod simulator;

pub use simulator::*;
