use crate::core::models::configuration::Configuration;
use crate::core::models::domain::Domain;
use crate::core::models::site::NO_CELL;
use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, warn};

pub type SiteKey = (usize, usize);

/// A uniform grid over the periodic domain for sub-quadratic pair enumeration.
///
/// Cells are at least `min_length` wide along each dimension, so every pair closer than
/// `min_length` lies in the same cell or in adjacent cells of the wrapped stencil. When the grid
/// would have no more than `3^dimension` cells the stencil covers the whole box anyway, and the
/// index disables itself; callers then fall back to the all-pairs loop.
///
/// Membership sets are ordered, so moving a site away and back restores an identical index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellIndex {
    min_length: f64,
    slot: usize,
    enabled: bool,
    dimension: usize,
    num_cells_per_dim: [usize; 3],
    members: Vec<BTreeSet<SiteKey>>,
    neighbors: Vec<Vec<usize>>,
}

impl CellIndex {
    /// A cell index that will store its cell ids in slot `slot` of every site.
    pub fn new(min_length: f64, slot: usize) -> Self {
        Self {
            min_length,
            slot,
            enabled: false,
            dimension: 0,
            num_cells_per_dim: [1; 3],
            members: Vec::new(),
            neighbors: Vec::new(),
        }
    }

    pub fn min_length(&self) -> f64 {
        self.min_length
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn num_cells(&self) -> usize {
        self.members.len()
    }

    pub fn num_cells_per_dim(&self) -> [usize; 3] {
        self.num_cells_per_dim
    }

    /// Builds the grid and the neighbor stencil, then assigns every active site to its cell.
    pub fn precompute(&mut self, config: &mut Configuration) {
        let domain = config.domain().clone();
        self.dimension = domain.dimension();
        let mut total = 1usize;
        for d in 0..3 {
            self.num_cells_per_dim[d] = if d < self.dimension {
                (domain.side_length(d) / self.min_length).floor() as usize
            } else {
                1
            };
            total *= self.num_cells_per_dim[d];
        }
        self.enabled = total > 3usize.pow(self.dimension as u32);
        self.members.clear();
        self.neighbors.clear();

        if !self.enabled {
            warn!(
                cells = total,
                min_length = self.min_length,
                "Cell grid too small to beat the all-pairs loop; cell index disabled."
            );
            for p in 0..config.num_slots() {
                for s in 0..config.particle(p).num_sites() {
                    config.set_site_cell(p, s, self.slot, NO_CELL);
                }
            }
            return;
        }

        self.members = vec![BTreeSet::new(); total];
        self.neighbors = (0..total).map(|cell| self.stencil(cell)).collect();
        for p in 0..config.num_slots() {
            if config.particle(p).active {
                self.insert_particle(config, p);
            } else {
                for s in 0..config.particle(p).num_sites() {
                    config.set_site_cell(p, s, self.slot, NO_CELL);
                }
            }
        }
        debug!(
            cells = total,
            per_dim = ?self.num_cells_per_dim,
            "Cell index built."
        );
    }

    fn coordinates(&self, cell: usize) -> [usize; 3] {
        let [nx, ny, _] = self.num_cells_per_dim;
        [cell % nx, (cell / nx) % ny, cell / (nx * ny)]
    }

    fn combine(&self, c: [usize; 3]) -> usize {
        let [nx, ny, _] = self.num_cells_per_dim;
        c[0] + nx * (c[1] + ny * c[2])
    }

    fn stencil(&self, cell: usize) -> Vec<usize> {
        let center = self.coordinates(cell);
        let range = |d: usize| if d < self.dimension { -1i64..=1 } else { 0..=0 };
        let mut cells = Vec::with_capacity(27);
        for dz in range(2) {
            for dy in range(1) {
                for dx in range(0) {
                    let mut c = [0usize; 3];
                    for (d, delta) in [dx, dy, dz].into_iter().enumerate() {
                        let n = self.num_cells_per_dim[d] as i64;
                        c[d] = (center[d] as i64 + delta).rem_euclid(n) as usize;
                    }
                    cells.push(self.combine(c));
                }
            }
        }
        // Narrow dimensions wrap onto the same cell more than once.
        cells.sort_unstable();
        cells.dedup();
        cells
    }

    /// Cell of a position, wrapping it into the primary domain first.
    pub fn cell_id(&self, domain: &Domain, position: &Point3<f64>) -> usize {
        let wrapped = domain.wrap(position);
        let mut cell = [0usize; 3];
        for (d, c) in cell.iter_mut().enumerate().take(self.dimension) {
            let n = self.num_cells_per_dim[d];
            let scaled = domain.scaled_coordinate(&wrapped, d) + 0.5;
            *c = ((n as f64 * scaled) as usize) % n;
        }
        self.combine(cell)
    }

    /// Neighboring cells of `cell`, including itself, sorted and unique.
    pub fn neighbor_cells(&self, cell: usize) -> &[usize] {
        &self.neighbors[cell]
    }

    pub fn members(&self, cell: usize) -> &BTreeSet<SiteKey> {
        &self.members[cell]
    }

    /// Moves a site between cells. A stale `old_cell` beyond the current grid is skipped.
    pub fn update(&mut self, site: SiteKey, new_cell: usize, old_cell: usize) {
        if old_cell < self.members.len() {
            self.members[old_cell].remove(&site);
        }
        self.members[new_cell].insert(site);
    }

    /// Re-bins one site after its position changed.
    pub fn sync_site(&mut self, config: &mut Configuration, particle: usize, site: usize) {
        if !self.enabled {
            return;
        }
        let current = config.site(particle, site);
        let new_cell = self.cell_id(config.domain(), &current.position);
        let old_cell = current.cell(self.slot).unwrap_or(NO_CELL);
        if new_cell != old_cell {
            self.update((particle, site), new_cell, old_cell);
            config.set_site_cell(particle, site, self.slot, new_cell);
        }
    }

    pub fn insert_particle(&mut self, config: &mut Configuration, particle: usize) {
        if !self.enabled {
            return;
        }
        for s in 0..config.particle(particle).num_sites() {
            let cell = self.cell_id(config.domain(), &config.site(particle, s).position);
            self.members[cell].insert((particle, s));
            config.set_site_cell(particle, s, self.slot, cell);
        }
    }

    pub fn remove_particle(&mut self, config: &mut Configuration, particle: usize) {
        if !self.enabled {
            return;
        }
        for s in 0..config.particle(particle).num_sites() {
            if let Some(cell) = config.site(particle, s).cell(self.slot) {
                if cell < self.members.len() {
                    self.members[cell].remove(&(particle, s));
                }
            }
            config.set_site_cell(particle, s, self.slot, NO_CELL);
        }
    }

    /// Every interparticle pair closer than `cutoff`, visiting each cell pair once.
    ///
    /// Pairs are reported with the lower key first. Returns `None` when the index is disabled.
    pub fn pairs_within(
        &self,
        config: &Configuration,
        cutoff: f64,
    ) -> Option<BTreeSet<(SiteKey, SiteKey)>> {
        if !self.enabled {
            return None;
        }
        let cutoff2 = cutoff * cutoff;
        let domain = config.domain();
        let mut pairs = BTreeSet::new();
        let mut visit = |a: SiteKey, b: SiteKey| {
            if a.0 == b.0 {
                return;
            }
            let pa = config.site(a.0, a.1).position;
            let pb = config.site(b.0, b.1).position;
            if domain.displacement(&pa, &pb).norm_squared() <= cutoff2 {
                pairs.insert(if a < b { (a, b) } else { (b, a) });
            }
        };
        for cell1 in 0..self.members.len() {
            for &cell2 in &self.neighbors[cell1] {
                if cell1 < cell2 {
                    for &a in &self.members[cell1] {
                        for &b in &self.members[cell2] {
                            visit(a, b);
                        }
                    }
                }
            }
            let inner: Vec<_> = self.members[cell1].iter().copied().collect();
            for (i, &a) in inner.iter().enumerate() {
                for &b in &inner[i + 1..] {
                    visit(a, b);
                }
            }
        }
        Some(pairs)
    }

    /// Verifies that every active site is recorded in the cell of its current position.
    pub fn check(&self, config: &Configuration) -> bool {
        if !self.enabled {
            return true;
        }
        let mut count = 0;
        for p in config.active_particles() {
            for s in 0..config.particle(p).num_sites() {
                let site = config.site(p, s);
                let expected = self.cell_id(config.domain(), &site.position);
                if site.cell(self.slot) != Some(expected)
                    || !self.members[expected].contains(&(p, s))
                {
                    return false;
                }
                count += 1;
            }
        }
        count == self.members.iter().map(BTreeSet::len).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::particle::{ParticleType, SiteTemplate};
    use crate::core::utils::random::Random;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256StarStar;

    fn random_config(side: &[f64], n: usize, seed: u64) -> Configuration {
        let mut config = Configuration::new(Domain::new(side).unwrap());
        let a = config.add_site_type("A");
        config.add_particle_type(
            ParticleType::new("dimer")
                .with_site(SiteTemplate::new(a, Point3::origin()))
                .with_site(SiteTemplate::new(a, Point3::new(0.6, 0.0, 0.0))),
        );
        let mut rng = Xoshiro256StarStar::seed_from_u64(seed);
        for _ in 0..n {
            let origin = config.domain().random_position(&mut rng);
            config.add_particle(0, &origin);
        }
        config
    }

    fn brute_force_pairs(config: &Configuration, cutoff: f64) -> BTreeSet<(SiteKey, SiteKey)> {
        let keys: Vec<SiteKey> = config
            .active_particles()
            .flat_map(|p| (0..config.particle(p).num_sites()).map(move |s| (p, s)))
            .collect();
        let mut pairs = BTreeSet::new();
        for (i, &a) in keys.iter().enumerate() {
            for &b in &keys[i + 1..] {
                if a.0 == b.0 {
                    continue;
                }
                let d = config
                    .domain()
                    .displacement(&config.site(a.0, a.1).position, &config.site(b.0, b.1).position);
                if d.norm_squared() <= cutoff * cutoff {
                    pairs.insert(if a < b { (a, b) } else { (b, a) });
                }
            }
        }
        pairs
    }

    #[test]
    fn grid_too_small_disables_index() {
        let mut config = random_config(&[6.0, 6.0, 6.0], 4, 1);
        let mut cells = CellIndex::new(2.0, 0);
        cells.precompute(&mut config);
        assert!(!cells.is_enabled());
        assert_eq!(cells.num_cells(), 0);
        assert_eq!(config.site(0, 0).cell(0), None);
        assert!(cells.pairs_within(&config, 2.0).is_none());
    }

    #[test]
    fn cell_counts_use_floor_of_side_over_min_length() {
        let mut config = random_config(&[10.0, 8.9, 4.0], 4, 1);
        let mut cells = CellIndex::new(2.0, 0);
        cells.precompute(&mut config);
        assert!(cells.is_enabled());
        assert_eq!(cells.num_cells_per_dim(), [5, 4, 2]);
        assert_eq!(cells.num_cells(), 40);
    }

    #[test]
    fn stencil_has_27_cells_in_3d_and_9_in_2d() {
        let mut config3 = random_config(&[10.0, 10.0, 10.0], 1, 1);
        let mut cells3 = CellIndex::new(2.0, 0);
        cells3.precompute(&mut config3);
        assert!((0..cells3.num_cells()).all(|c| cells3.neighbor_cells(c).len() == 27));

        let mut config2 = random_config(&[10.0, 10.0], 1, 1);
        let mut cells2 = CellIndex::new(2.0, 0);
        cells2.precompute(&mut config2);
        assert!((0..cells2.num_cells()).all(|c| cells2.neighbor_cells(c).len() == 9));
    }

    #[test]
    fn stencil_deduplicates_narrow_dimensions() {
        let mut config = random_config(&[10.0, 10.0, 4.0], 1, 1);
        let mut cells = CellIndex::new(2.0, 0);
        cells.precompute(&mut config);
        assert!((0..cells.num_cells()).all(|c| cells.neighbor_cells(c).len() == 18));
    }

    #[test]
    fn cell_id_wraps_positions_first() {
        let mut config = random_config(&[10.0, 10.0, 10.0], 1, 1);
        let mut cells = CellIndex::new(2.0, 0);
        cells.precompute(&mut config);
        let domain = config.domain().clone();
        let inside = Point3::new(-4.9, 0.1, 4.9);
        let outside = Point3::new(5.1, 10.1, -5.1);
        assert_eq!(cells.cell_id(&domain, &inside), cells.cell_id(&domain, &outside));
        assert_eq!(cells.cell_id(&domain, &Point3::new(-5.0, -5.0, -5.0)), 0);
    }

    #[test]
    fn cell_index_agrees_with_brute_force_pairs() {
        let cases = [
            (3u64, vec![9.0, 9.0, 9.0]),
            (4, vec![12.0, 7.5, 6.0]),
            (5, vec![8.0, 8.0]),
        ];
        for (seed, side) in cases {
            let mut config = random_config(&side, 60, seed);
            let mut cells = CellIndex::new(1.5, 0);
            cells.precompute(&mut config);
            assert!(cells.is_enabled());
            assert!(cells.check(&config));
            let from_cells = cells.pairs_within(&config, 1.5).unwrap();
            assert_eq!(from_cells, brute_force_pairs(&config, 1.5));
            assert!(!from_cells.is_empty());
        }
    }

    #[test]
    fn update_tolerates_stale_old_cell() {
        let mut config = random_config(&[10.0, 10.0, 10.0], 1, 1);
        let mut cells = CellIndex::new(2.0, 0);
        cells.precompute(&mut config);
        cells.update((7, 0), 3, 10_000);
        assert!(cells.members(3).contains(&(7, 0)));
    }

    #[test]
    fn moving_a_site_and_back_restores_identical_index() {
        let mut config = random_config(&[10.0, 10.0, 10.0], 20, 8);
        let mut cells = CellIndex::new(2.0, 0);
        cells.precompute(&mut config);
        let (before_cells, before_config) = (cells.clone(), config.clone());

        let mut rng = Xoshiro256StarStar::seed_from_u64(2);
        let original = config.site(5, 1).position;
        let moved = original + rng.position_in_cube(3, 4.0);
        config.set_site_position(5, 1, moved);
        cells.sync_site(&mut config, 5, 1);
        assert!(cells.check(&config));

        config.set_site_position(5, 1, original);
        cells.sync_site(&mut config, 5, 1);
        assert_eq!(cells, before_cells);
        assert_eq!(config, before_config);
    }

    #[test]
    fn remove_and_insert_particle_keep_index_consistent() {
        let mut config = random_config(&[10.0, 10.0, 10.0], 10, 9);
        let mut cells = CellIndex::new(2.0, 0);
        cells.precompute(&mut config);
        cells.remove_particle(&mut config, 3);
        config.demote(3);
        assert!(cells.check(&config));
        config.promote(3);
        cells.insert_particle(&mut config, 3);
        assert!(cells.check(&config));
    }
}
