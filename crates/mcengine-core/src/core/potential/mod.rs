//! # Potential Module
//!
//! The single energy-function interface through which the engine consumes pair
//! interactions, together with the site-type parameters it is evaluated with.
//!
//! ## Overview
//!
//! A [`PairPotential`] maps a squared separation and two site types to an energy. It must be a
//! pure function of its inputs: the energy maps cache its results per pair, and a hidden state
//! would make those caches silently wrong. Hard overlap is reported with the
//! [`NEAR_INFINITY`] sentinel rather than `f64::INFINITY`, so that Boltzmann weights
//! underflow to zero instead of producing NaN.
//!
//! ## Architecture
//!
//! - **Models** ([`potentials`]) - Ideal gas, hard sphere, Lennard-Jones and square well
//! - **Parameters** ([`params`]) - Per-site-type sigma, epsilon and cutoff with mixing rules
//! - **Neighbor Criteria** ([`neighbor`]) - Distance and energy thresholds defining "bonded" pairs

pub mod neighbor;
pub mod params;
pub mod potentials;

use params::ModelParams;
use std::fmt::Debug;

/// Energy returned for hard overlaps.
pub const NEAR_INFINITY: f64 = 1e30;

/// A pure pairwise interaction model.
pub trait PairPotential: Debug + Send + Sync {
    /// Interaction energy of two sites of types `type_i` and `type_j` separated by
    /// `squared_distance`. The caller has already applied the mixed cutoff.
    fn energy(
        &self,
        squared_distance: f64,
        type_i: usize,
        type_j: usize,
        params: &ModelParams,
    ) -> f64;
}
