//! # Workflows Module
//!
//! High-level entry points that run a complete simulation from a single
//! [`SimulationConfig`](crate::engine::config::SimulationConfig).
//!
//! ## Overview
//!
//! A workflow resolves every name in the configuration through a
//! [`Registry`](crate::engine::registry::Registry), builds the Monte Carlo driver, and then
//! walks through the phases of a run while reporting progress:
//!
//! - **Equilibration** with periodic tuning of move amplitudes toward their target acceptance.
//! - **Production** with running averages of the energy and of the particle counts per type.
//! - **Drift check** comparing the tracked energy with an exhaustive recomputation.
//!
//! Replicas ([`simulate::run_replicas`]) are fully independent drivers and run in parallel when
//! the `parallel` feature is enabled.

pub mod simulate;
