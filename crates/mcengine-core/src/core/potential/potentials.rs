use super::params::ModelParams;
use super::{NEAR_INFINITY, PairPotential};

#[inline]
pub fn lennard_jones(squared_distance: f64, sigma: f64, epsilon: f64) -> f64 {
    if squared_distance < 1e-12 {
        return NEAR_INFINITY;
    }
    let rho2 = sigma * sigma / squared_distance;
    let rho6 = rho2 * rho2 * rho2;
    4.0 * epsilon * (rho6 * rho6 - rho6)
}

#[inline]
pub fn hard_sphere(squared_distance: f64, sigma: f64) -> f64 {
    if squared_distance < sigma * sigma {
        NEAR_INFINITY
    } else {
        0.0
    }
}

#[inline]
pub fn square_well(squared_distance: f64, sigma: f64, epsilon: f64) -> f64 {
    if squared_distance < sigma * sigma {
        NEAR_INFINITY
    } else {
        -epsilon
    }
}

/// Non-interacting particles.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdealGas;

impl PairPotential for IdealGas {
    fn energy(&self, _: f64, _: usize, _: usize, _: &ModelParams) -> f64 {
        0.0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HardSphere;

impl PairPotential for HardSphere {
    fn energy(
        &self,
        squared_distance: f64,
        type_i: usize,
        type_j: usize,
        params: &ModelParams,
    ) -> f64 {
        hard_sphere(squared_distance, params.mixed(type_i, type_j).sigma)
    }
}

/// 12-6 Lennard-Jones, truncated at the mixed cutoff without shifting.
#[derive(Debug, Clone, Copy, Default)]
pub struct LennardJones;

impl PairPotential for LennardJones {
    fn energy(
        &self,
        squared_distance: f64,
        type_i: usize,
        type_j: usize,
        params: &ModelParams,
    ) -> f64 {
        let mixed = params.mixed(type_i, type_j);
        lennard_jones(squared_distance, mixed.sigma, mixed.epsilon)
    }
}

/// Hard core of diameter sigma with an attractive well of depth epsilon out to the cutoff.
#[derive(Debug, Clone, Copy, Default)]
pub struct SquareWell;

impl PairPotential for SquareWell {
    fn energy(
        &self,
        squared_distance: f64,
        type_i: usize,
        type_j: usize,
        params: &ModelParams,
    ) -> f64 {
        let mixed = params.mixed(type_i, type_j);
        square_well(squared_distance, mixed.sigma, mixed.epsilon)
    }
}
