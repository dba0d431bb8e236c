//! Per-pair caches of interaction energies with a staged buffer for transactional updates.
//!
//! During an attempt only the staged buffer is written. Accepting an attempt copies the staged
//! entries of every perturbed site onto the committed buffer; rejecting copies the committed
//! entries back over the staged ones. Entry `(i, j)` and entry `(j, i)` are always written
//! together and hold the same energy with opposite displacements.

mod all;
mod neighbor;

pub use all::EnergyMapAll;
pub use neighbor::EnergyMapNeighbor;

use crate::core::models::configuration::Configuration;
use crate::core::models::select::Select;
use crate::core::potential::neighbor::NeighborCriteria;
use crate::engine::cells::SiteKey;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Cached state of one ordered site pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PairEntry {
    pub energy: f64,
    pub squared_distance: f64,
    /// Minimum-image displacement from the first site to the second.
    pub pbc: Vector3<f64>,
}

impl Default for PairEntry {
    fn default() -> Self {
        Self {
            energy: 0.0,
            squared_distance: 0.0,
            pbc: Vector3::zeros(),
        }
    }
}

impl PairEntry {
    fn mirrored(&self) -> Self {
        Self {
            pbc: -self.pbc,
            ..*self
        }
    }
}

pub trait EnergyMap {
    /// Sizes internal tables for the configuration's particle types.
    fn precompute(&mut self, config: &Configuration);

    /// Stages the energy of the pair `(i, j)` and its mirror. Later calls for the same pair
    /// overwrite earlier ones. Returns `energy`.
    #[allow(clippy::too_many_arguments)]
    fn update(
        &mut self,
        energy: f64,
        i: SiteKey,
        j: SiteKey,
        site_type_i: usize,
        site_type_j: usize,
        squared_distance: f64,
        pbc: &Vector3<f64>,
    ) -> f64;

    /// Zeroes the staged pair `(i, j)` and its mirror.
    fn clear(&mut self, i: SiteKey, j: SiteKey);

    /// Zeroes every staged pair touching `i`.
    fn clear_site(&mut self, i: SiteKey);

    /// Restores every staged pair touching a site of `select` from the committed buffer.
    fn revert(&mut self, select: &Select);

    /// Commits every staged pair touching a site of `select`.
    fn finalize(&mut self, select: &Select);

    /// Zeroes both buffers for every pair touching `particle`.
    fn remove_particle(&mut self, particle: usize);

    fn entry(&self, i: SiteKey, j: SiteKey, staged: bool) -> Option<PairEntry>;

    /// Every partner of `i` with a stored entry, in ascending key order.
    fn partners(&self, i: SiteKey, staged: bool) -> Vec<(SiteKey, PairEntry)>;

    fn query(&self, i: SiteKey, j: SiteKey, staged: bool) -> f64 {
        self.entry(i, j, staged).map_or(0.0, |e| e.energy)
    }

    fn site_energy(&self, i: SiteKey, staged: bool) -> f64 {
        self.partners(i, staged).iter().map(|(_, e)| e.energy).sum()
    }

    /// Sum over every stored pair, each counted once.
    fn total_energy(&self, staged: bool) -> f64;

    /// Partners of `i` satisfying `criteria`.
    fn neighbors(
        &self,
        criteria: &NeighborCriteria,
        i: SiteKey,
        staged: bool,
        config: &Configuration,
    ) -> Vec<SiteKey> {
        let type_i = config.site(i.0, i.1).type_id;
        self.partners(i, staged)
            .into_iter()
            .filter(|(j, e)| {
                let type_j = config.site(j.0, j.1).type_id;
                criteria.is_accepted(e.energy, e.squared_distance, type_i, type_j)
            })
            .map(|(j, _)| j)
            .collect()
    }
}

/// The energy map strategies a potential can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EnergyMapKind {
    All(EnergyMapAll),
    Neighbor(EnergyMapNeighbor),
}

impl EnergyMapKind {
    fn inner(&self) -> &dyn EnergyMap {
        match self {
            Self::All(map) => map,
            Self::Neighbor(map) => map,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn EnergyMap {
        match self {
            Self::All(map) => map,
            Self::Neighbor(map) => map,
        }
    }
}

impl EnergyMap for EnergyMapKind {
    fn precompute(&mut self, config: &Configuration) {
        self.inner_mut().precompute(config)
    }

    fn update(
        &mut self,
        energy: f64,
        i: SiteKey,
        j: SiteKey,
        site_type_i: usize,
        site_type_j: usize,
        squared_distance: f64,
        pbc: &Vector3<f64>,
    ) -> f64 {
        self.inner_mut()
            .update(energy, i, j, site_type_i, site_type_j, squared_distance, pbc)
    }

    fn clear(&mut self, i: SiteKey, j: SiteKey) {
        self.inner_mut().clear(i, j)
    }

    fn clear_site(&mut self, i: SiteKey) {
        self.inner_mut().clear_site(i)
    }

    fn revert(&mut self, select: &Select) {
        self.inner_mut().revert(select)
    }

    fn finalize(&mut self, select: &Select) {
        self.inner_mut().finalize(select)
    }

    fn remove_particle(&mut self, particle: usize) {
        self.inner_mut().remove_particle(particle)
    }

    fn entry(&self, i: SiteKey, j: SiteKey, staged: bool) -> Option<PairEntry> {
        self.inner().entry(i, j, staged)
    }

    fn partners(&self, i: SiteKey, staged: bool) -> Vec<(SiteKey, PairEntry)> {
        self.inner().partners(i, staged)
    }

    fn total_energy(&self, staged: bool) -> f64 {
        self.inner().total_energy(staged)
    }
}
