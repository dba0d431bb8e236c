//! # Core Module
//!
//! This module provides the stateless building blocks of the Monte Carlo engine:
//! how particles are represented, how two sites interact, and where randomness comes from.
//!
//! ## Overview
//!
//! Nothing in this module knows about trials, acceptance or caching. The types here are
//! mutated by the [`engine`](crate::engine) layer, which is responsible for keeping every
//! derived structure (cell memberships, energy maps) consistent with them.
//!
//! ## Architecture
//!
//! - **Particle Representation** ([`models`]) - Sites, particles, the periodic domain,
//!   the particle store (`Configuration`) with its ghost pools, and `Select` views
//! - **Interaction Models** ([`potential`]) - The pair-potential interface, a few simple
//!   models, site-type parameters with mixing rules, and neighbor criteria
//! - **Utilities** ([`utils`]) - The seedable random-source interface and geometric helpers
//!
//! ## Key Capabilities
//!
//! - **Stable particle indices** through ghost pools that are promoted and demoted
//!   instead of allocated and freed
//! - **Periodic boundary handling** with wrapping and minimum-image displacements in
//!   two and three dimensions
//! - **Pure, cacheable pair energies** returning a near-infinity sentinel on hard overlap

pub mod models;
pub mod potential;
pub mod utils;
