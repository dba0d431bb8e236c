use super::{EnergyMap, PairEntry};
use crate::core::models::configuration::Configuration;
use crate::core::models::select::Select;
use crate::engine::cells::SiteKey;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Dense map over every (particle, site) x (particle, site) pair.
///
/// Rows are indexed by `particle * sites_per_particle + site`. The table grows on demand when a
/// ghost slot beyond the current size is first touched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EnergyMapAll {
    sites_per_particle: usize,
    committed: Vec<Vec<PairEntry>>,
    staged: Vec<Vec<PairEntry>>,
}

impl EnergyMapAll {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn index(&self, key: SiteKey) -> usize {
        key.0 * self.sites_per_particle + key.1
    }

    fn ensure_size(&mut self, index: usize) {
        let size = self.committed.len();
        if index < size {
            return;
        }
        let new_size = index + 1;
        for buffer in [&mut self.committed, &mut self.staged] {
            for row in buffer.iter_mut() {
                row.resize(new_size, PairEntry::default());
            }
            buffer.resize(new_size, vec![PairEntry::default(); new_size]);
        }
    }

    fn buffer(&self, staged: bool) -> &Vec<Vec<PairEntry>> {
        if staged { &self.staged } else { &self.committed }
    }

    fn key_of(&self, index: usize) -> SiteKey {
        (index / self.sites_per_particle, index % self.sites_per_particle)
    }

    fn copy_site(from: &[Vec<PairEntry>], to: &mut [Vec<PairEntry>], index: usize) {
        to[index].copy_from_slice(&from[index]);
        for (row_to, row_from) in to.iter_mut().zip(from) {
            row_to[index] = row_from[index];
        }
    }
}

impl EnergyMap for EnergyMapAll {
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
        _site_type_i: usize,
        _site_type_j: usize,
        squared_distance: f64,
        pbc: &Vector3<f64>,
    ) -> f64 {
        let (a, b) = (self.index(i), self.index(j));
        self.ensure_size(a.max(b));
        let entry = PairEntry {
            energy,
            squared_distance,
            pbc: *pbc,
        };
        self.staged[a][b] = entry;
        self.staged[b][a] = entry.mirrored();
        energy
    }

    fn clear(&mut self, i: SiteKey, j: SiteKey) {
        let (a, b) = (self.index(i), self.index(j));
        if a.max(b) < self.staged.len() {
            self.staged[a][b] = PairEntry::default();
            self.staged[b][a] = PairEntry::default();
        }
    }

    fn clear_site(&mut self, i: SiteKey) {
        let a = self.index(i);
        if a >= self.staged.len() {
            return;
        }
        self.staged[a].fill(PairEntry::default());
        for row in &mut self.staged {
            row[a] = PairEntry::default();
        }
    }

    fn revert(&mut self, select: &Select) {
        for key in select.site_keys() {
            let a = self.index(key);
            if a < self.staged.len() {
                Self::copy_site(&self.committed, &mut self.staged, a);
            }
        }
    }

    fn finalize(&mut self, select: &Select) {
        for key in select.site_keys() {
            let a = self.index(key);
            if a < self.committed.len() {
                Self::copy_site(&self.staged, &mut self.committed, a);
            }
        }
    }

    fn remove_particle(&mut self, particle: usize) {
        for site in 0..self.sites_per_particle {
            let a = self.index((particle, site));
            if a >= self.committed.len() {
                continue;
            }
            for buffer in [&mut self.committed, &mut self.staged] {
                buffer[a].fill(PairEntry::default());
                for row in buffer.iter_mut() {
                    row[a] = PairEntry::default();
                }
            }
        }
    }

    fn entry(&self, i: SiteKey, j: SiteKey, staged: bool) -> Option<PairEntry> {
        let (a, b) = (self.index(i), self.index(j));
        self.buffer(staged).get(a).and_then(|row| row.get(b)).copied()
    }

    fn partners(&self, i: SiteKey, staged: bool) -> Vec<(SiteKey, PairEntry)> {
        let a = self.index(i);
        self.buffer(staged)
            .get(a)
            .map(|row| {
                row.iter()
                    .enumerate()
                    .filter(|(_, e)| e.energy != 0.0 || e.squared_distance != 0.0)
                    .map(|(b, e)| (self.key_of(b), *e))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn total_energy(&self, staged: bool) -> f64 {
        let buffer = self.buffer(staged);
        let mut total = 0.0;
        for (a, row) in buffer.iter().enumerate() {
            for entry in &row[a + 1..] {
                total += entry.energy;
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::domain::Domain;
    use crate::core::models::particle::{ParticleType, SiteTemplate};
    use crate::engine::energy_map::testing::check_transactional_protocol;
    use nalgebra::Point3;

    fn dimer_config(n: usize) -> Configuration {
        let mut config = Configuration::new(Domain::cubic(10.0, 3).unwrap());
        let a = config.add_site_type("A");
        let b = config.add_site_type("B");
        config.add_particle_type(
            ParticleType::new("dimer")
                .with_site(SiteTemplate::new(a, Point3::origin()))
                .with_site(SiteTemplate::new(b, Point3::new(1.0, 0.0, 0.0))),
        );
        for i in 0..n {
            config.add_particle(0, &Point3::new(i as f64, 0.0, 0.0));
        }
        config
    }

    #[test]
    fn follows_the_transactional_protocol() {
        let mut map = EnergyMapAll::new();
        map.precompute(&dimer_config(3));
        check_transactional_protocol(&mut map);
    }

    #[test]
    fn table_grows_for_new_ghost_slots() {
        let mut map = EnergyMapAll::new();
        map.precompute(&dimer_config(2));
        map.update(-1.0, (0, 1), (5, 0), 1, 0, 1.0, &Vector3::x());
        assert_eq!(map.query((5, 0), (0, 1), true), -1.0);
        assert_eq!(map.entry((5, 0), (0, 1), true).unwrap().pbc, -Vector3::x());
        assert_eq!(map.query((5, 0), (0, 1), false), 0.0);
    }

    #[test]
    fn repeated_updates_overwrite_instead_of_accumulating() {
        let mut map = EnergyMapAll::new();
        map.precompute(&dimer_config(2));
        map.update(-1.0, (0, 0), (1, 0), 0, 0, 1.0, &Vector3::x());
        map.update(-2.0, (0, 0), (1, 0), 0, 0, 1.0, &Vector3::x());
        assert_eq!(map.site_energy((0, 0), true), -2.0);
    }

    #[test]
    fn queries_outside_the_table_are_empty() {
        let mut map = EnergyMapAll::new();
        map.precompute(&dimer_config(1));
        assert_eq!(map.entry((9, 0), (0, 0), false), None);
        assert!(map.partners((9, 0), false).is_empty());
        map.clear_site((9, 0));
        map.remove_particle(9);
    }
}
