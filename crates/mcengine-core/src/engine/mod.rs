//! The stateful machinery of the engine.
//!
//! A [`system::System`] owns the particle store, the pair potentials with their cell indices and
//! energy maps, and the thermodynamic parameters. A [`trial::Trial`] drives one Monte Carlo move
//! through the select, perturb, compute, accept and finalize-or-revert protocol against a system,
//! and [`monte_carlo::MonteCarlo`] chooses among weighted trials with a seeded random stream.

pub mod cells;
pub mod checkpoint;
pub mod config;
pub mod energy_map;
pub mod error;
pub mod monte_carlo;
pub mod progress;
pub mod registry;
pub mod setup;
pub mod system;
pub mod trial;
