use crate::core::utils::geometry::spherical_shell_volume;
use serde::{Deserialize, Serialize};

/// Defines when two sites count as neighbors: a squared-distance window, an energy ceiling and
/// an optional unordered site-type pair.
///
/// Used by volume-bias selection (association volumes) and by gated energy maps that answer
/// "is this pair within bonding criteria" queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborCriteria {
    energy_maximum: f64,
    minimum_distance_squared: f64,
    maximum_distance_squared: f64,
    site_types: Option<(usize, usize)>,
    potential_index: usize,
}

impl NeighborCriteria {
    /// Purely geometric criteria on the shell `minimum_distance < r < maximum_distance`.
    pub fn new(minimum_distance: f64, maximum_distance: f64) -> Self {
        Self {
            energy_maximum: f64::MAX,
            minimum_distance_squared: minimum_distance * minimum_distance,
            maximum_distance_squared: maximum_distance * maximum_distance,
            site_types: None,
            potential_index: 0,
        }
    }

    pub fn with_energy_maximum(mut self, energy_maximum: f64) -> Self {
        self.energy_maximum = energy_maximum;
        self
    }

    pub fn with_site_types(mut self, site_type0: usize, site_type1: usize) -> Self {
        self.site_types = Some((site_type0, site_type1));
        self
    }

    /// The potential whose pair energies are compared against the energy ceiling.
    pub fn with_potential_index(mut self, potential_index: usize) -> Self {
        self.potential_index = potential_index;
        self
    }

    pub fn potential_index(&self) -> usize {
        self.potential_index
    }

    pub fn energy_maximum(&self) -> f64 {
        self.energy_maximum
    }

    pub fn minimum_distance(&self) -> f64 {
        self.minimum_distance_squared.sqrt()
    }

    pub fn maximum_distance(&self) -> f64 {
        self.maximum_distance_squared.sqrt()
    }

    /// Whether a pair's energy needs to be evaluated to decide acceptance.
    pub fn uses_energy(&self) -> bool {
        self.energy_maximum < f64::MAX
    }

    #[inline]
    pub fn is_distance_accepted(&self, squared_distance: f64) -> bool {
        squared_distance > self.minimum_distance_squared
            && squared_distance < self.maximum_distance_squared
    }

    #[inline]
    pub fn is_type_accepted(&self, site_type0: usize, site_type1: usize) -> bool {
        match self.site_types {
            None => true,
            Some((a, b)) => {
                (a == site_type0 && b == site_type1) || (a == site_type1 && b == site_type0)
            }
        }
    }

    #[inline]
    pub fn is_accepted(
        &self,
        energy: f64,
        squared_distance: f64,
        site_type0: usize,
        site_type1: usize,
    ) -> bool {
        self.is_distance_accepted(squared_distance)
            && energy < self.energy_maximum
            && self.is_type_accepted(site_type0, site_type1)
    }

    /// Volume of the association shell.
    pub fn volume(&self, dimension: usize) -> f64 {
        spherical_shell_volume(self.minimum_distance(), self.maximum_distance(), dimension)
    }
}
