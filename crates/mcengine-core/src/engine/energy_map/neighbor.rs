use super::{EnergyMap, PairEntry};
use crate::core::models::configuration::Configuration;
use crate::core::models::select::Select;
use crate::core::potential::neighbor::NeighborCriteria;
use crate::engine::cells::SiteKey;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

type PartnerList = Vec<(SiteKey, PairEntry)>;

/// Sparse map holding, for every site, the sorted list of partners it interacts with.
///
/// Without a gate only pairs with a non-zero energy are stored. With a gate only pairs that
/// satisfy the [`NeighborCriteria`] are stored, which turns the map into a cache of bonded
/// neighbors for cluster and volume-bias moves.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EnergyMapNeighbor {
    gate: Option<NeighborCriteria>,
    sites_per_particle: usize,
    committed: Vec<PartnerList>,
    staged: Vec<PartnerList>,
}

fn set_partner(list: &mut PartnerList, partner: SiteKey, entry: PairEntry) {
    match list.binary_search_by(|(k, _)| k.cmp(&partner)) {
        Ok(pos) => list[pos].1 = entry,
        Err(pos) => list.insert(pos, (partner, entry)),
    }
}

fn remove_partner(list: &mut PartnerList, partner: SiteKey) {
    if let Ok(pos) = list.binary_search_by(|(k, _)| k.cmp(&partner)) {
        list.remove(pos);
    }
}

fn find_partner(list: &PartnerList, partner: SiteKey) -> Option<PairEntry> {
    list.binary_search_by(|(k, _)| k.cmp(&partner))
        .ok()
        .map(|pos| list[pos].1)
}

impl EnergyMapNeighbor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gate(criteria: NeighborCriteria) -> Self {
        Self {
            gate: Some(criteria),
            ..Self::default()
        }
    }

    pub fn gate(&self) -> Option<&NeighborCriteria> {
        self.gate.as_ref()
    }

    #[inline]
    fn index(&self, key: SiteKey) -> usize {
        key.0 * self.sites_per_particle + key.1
    }

    fn ensure_size(&mut self, index: usize) {
        if index >= self.committed.len() {
            self.committed.resize(index + 1, Vec::new());
            self.staged.resize(index + 1, Vec::new());
        }
    }

    fn buffer(&self, staged: bool) -> &Vec<PartnerList> {
        if staged { &self.staged } else { &self.committed }
    }

    /// Replaces the pairs touching `key` in `to` with those recorded in `from`.
    fn copy_site(&mut self, key: SiteKey, commit: bool) {
        let a = self.index(key);
        if a >= self.committed.len() {
            return;
        }
        let sites = self.sites_per_particle;
        let (from, to) = if commit {
            (&self.staged, &mut self.committed)
        } else {
            (&self.committed, &mut self.staged)
        };
        for (partner, _) in std::mem::take(&mut to[a]) {
            remove_partner(&mut to[partner.0 * sites + partner.1], key);
        }
        to[a] = from[a].clone();
        for (partner, _) in &from[a] {
            let b = partner.0 * sites + partner.1;
            if let Some(entry) = find_partner(&from[b], key) {
                set_partner(&mut to[b], key, entry);
            }
        }
    }
}

impl EnergyMap for EnergyMapNeighbor {
    fn precompute(&mut self, config: &Configuration) {
        self.sites_per_particle = config.max_sites_per_particle().max(1);
        self.committed.clear();
        self.staged.clear();
        let size = config.num_slots() * self.sites_per_particle;
        if size > 0 {
            self.ensure_size(size - 1);
        }
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
        let (a, b) = (self.index(i), self.index(j));
        self.ensure_size(a.max(b));
        let keep = match &self.gate {
            Some(criteria) => {
                criteria.is_accepted(energy, squared_distance, site_type_i, site_type_j)
            }
            None => energy != 0.0,
        };
        if keep {
            let entry = PairEntry {
                energy,
                squared_distance,
                pbc: *pbc,
            };
            set_partner(&mut self.staged[a], j, entry);
            set_partner(&mut self.staged[b], i, entry.mirrored());
        } else {
            remove_partner(&mut self.staged[a], j);
            remove_partner(&mut self.staged[b], i);
        }
        energy
    }

    fn clear(&mut self, i: SiteKey, j: SiteKey) {
        let (a, b) = (self.index(i), self.index(j));
        if a.max(b) < self.staged.len() {
            remove_partner(&mut self.staged[a], j);
            remove_partner(&mut self.staged[b], i);
        }
    }

    fn clear_site(&mut self, i: SiteKey) {
        let a = self.index(i);
        if a >= self.staged.len() {
            return;
        }
        for (partner, _) in std::mem::take(&mut self.staged[a]) {
            let b = self.index(partner);
            remove_partner(&mut self.staged[b], i);
        }
    }

    fn revert(&mut self, select: &Select) {
        for key in select.site_keys() {
            self.copy_site(key, false);
        }
    }

    fn finalize(&mut self, select: &Select) {
        for key in select.site_keys() {
            self.copy_site(key, true);
        }
    }

    fn remove_particle(&mut self, particle: usize) {
        for site in 0..self.sites_per_particle {
            let key = (particle, site);
            let a = self.index(key);
            if a >= self.committed.len() {
                continue;
            }
            for buffer in [&mut self.committed, &mut self.staged] {
                for (partner, _) in std::mem::take(&mut buffer[a]) {
                    let b = partner.0 * self.sites_per_particle + partner.1;
                    remove_partner(&mut buffer[b], key);
                }
            }
        }
    }

    fn entry(&self, i: SiteKey, j: SiteKey, staged: bool) -> Option<PairEntry> {
        self.buffer(staged)
            .get(self.index(i))
            .and_then(|list| find_partner(list, j))
    }

    fn partners(&self, i: SiteKey, staged: bool) -> Vec<(SiteKey, PairEntry)> {
        self.buffer(staged)
            .get(self.index(i))
            .cloned()
            .unwrap_or_default()
    }

    fn total_energy(&self, staged: bool) -> f64 {
        let mut total = 0.0;
        for (a, list) in self.buffer(staged).iter().enumerate() {
            for (partner, entry) in list {
                if self.index(*partner) > a {
                    total += entry.energy;
                }
            }
        }
        total
    }
}
