//! # mcengine Core Library
//!
//! A transactional Monte Carlo trial engine for particle systems: atoms and molecules
//! represented as rigid or articulated collections of interaction sites, sampled in the
//! canonical, grand canonical and volume-biased ensembles.
//!
//! ## Architectural Philosophy
//!
//! The library follows a strict three-layer architecture to keep the concerns separated.
//!
//! - **[`core`]: The Foundation.** Stateless data models (`Configuration`, `Select`,
//!   `Domain`), pure pair-potential models with their site-type parameters, and the
//!   random-source abstraction.
//!
//! - **[`engine`]: The Logic Core.** The stateful machinery of a simulation. It includes
//!   the `CellIndex` for sub-quadratic neighbor search, the transactional energy maps,
//!   the `System` that keeps both consistent with particle motion, and the complete
//!   select → perturb → compute → accept → finalize/revert trial protocol.
//!
//! - **[`workflows`]: The Public API.** Ties `engine` and `core` together to run a complete
//!   simulation (equilibration with tuning, production with averages, drift checks) from
//!   a single `SimulationConfig`.

pub mod core;
pub mod engine;
pub mod workflows;
