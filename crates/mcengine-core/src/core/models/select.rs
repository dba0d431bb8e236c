use super::configuration::Configuration;
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// What the current attempt is doing to the sites of a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrialState {
    /// Positions are held; a no-op pass over the old configuration.
    #[default]
    Held,
    /// In-place move.
    Move,
    /// The particle is being removed.
    Removal,
    /// The particle is being inserted.
    Insertion,
}

/// One particle of a selection with the chosen site indices and their cached state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SelectedParticle {
    pub particle: usize,
    pub sites: Vec<usize>,
    pub positions: Vec<Point3<f64>>,
    pub orientations: Vec<Option<Vector3<f64>>>,
}

/// A sparse, ordered view of particles and sites.
///
/// A `Select` never owns sites. The cached positions are a value snapshot of the configuration
/// taken by [`Select::load_positions`] and are only written back through the engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Select {
    particles: Vec<SelectedParticle>,
    trial_state: TrialState,
}

impl Select {
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects the given sites of one particle.
    pub fn particle(particle: usize, sites: Vec<usize>) -> Self {
        let mut select = Self::new();
        select.add_sites(particle, &sites);
        select
    }

    /// Selects every site of one particle.
    pub fn whole_particle(config: &Configuration, particle: usize) -> Self {
        let num_sites = config.particle(particle).num_sites();
        Self::particle(particle, (0..num_sites).collect())
    }

    /// Selects every site of every active particle.
    pub fn all_active(config: &Configuration) -> Self {
        let mut select = Self::new();
        for p in config.active_particles() {
            let num_sites = config.particle(p).num_sites();
            select.add_sites(p, &(0..num_sites).collect::<Vec<_>>());
        }
        select
    }

    pub fn clear(&mut self) {
        self.particles.clear();
        self.trial_state = TrialState::Held;
    }

    /// Adds sites of a particle, merging with an existing entry for that particle.
    ///
    /// Sites already present are not duplicated. Cached positions of merged entries are
    /// invalidated and must be reloaded.
    pub fn add_sites(&mut self, particle: usize, sites: &[usize]) {
        if let Some(entry) = self.particles.iter_mut().find(|e| e.particle == particle) {
            for &s in sites {
                if !entry.sites.contains(&s) {
                    entry.sites.push(s);
                }
            }
            entry.positions.clear();
            entry.orientations.clear();
        } else {
            self.particles.push(SelectedParticle {
                particle,
                sites: sites.to_vec(),
                positions: Vec::new(),
                orientations: Vec::new(),
            });
        }
    }

    /// Merges every particle and site of `other` into this selection.
    pub fn merge(&mut self, other: &Select) {
        for entry in &other.particles {
            self.add_sites(entry.particle, &entry.sites);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn num_particles(&self) -> usize {
        self.particles.len()
    }

    pub fn num_sites(&self) -> usize {
        self.particles.iter().map(|e| e.sites.len()).sum()
    }

    pub fn particles(&self) -> &[SelectedParticle] {
        &self.particles
    }

    pub(crate) fn particles_mut(&mut self) -> &mut [SelectedParticle] {
        &mut self.particles
    }

    pub fn particle_index(&self, i: usize) -> usize {
        self.particles[i].particle
    }

    pub fn contains_particle(&self, particle: usize) -> bool {
        self.particles.iter().any(|e| e.particle == particle)
    }

    /// Iterates over every selected `(particle, site)` pair in order.
    pub fn site_keys(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.particles
            .iter()
            .flat_map(|e| e.sites.iter().map(move |&s| (e.particle, s)))
    }

    pub fn trial_state(&self) -> TrialState {
        self.trial_state
    }

    pub fn set_trial_state(&mut self, state: TrialState) {
        self.trial_state = state;
    }

    /// Position of the first selected site, if positions are loaded.
    pub fn first_position(&self) -> Option<Point3<f64>> {
        self.particles.first().and_then(|e| e.positions.first().copied())
    }

    /// Refreshes the cached positions and orientations from the configuration.
    pub fn load_positions(&mut self, config: &Configuration) {
        for entry in &mut self.particles {
            let particle = config.particle(entry.particle);
            entry.positions = entry
                .sites
                .iter()
                .map(|&s| particle.site(s).position)
                .collect();
            entry.orientations = entry
                .sites
                .iter()
                .map(|&s| particle.site(s).orientation)
                .collect();
        }
    }

    /// Translates every cached position by the same vector.
    pub fn translate(&mut self, shift: &Vector3<f64>) {
        for entry in &mut self.particles {
            for position in &mut entry.positions {
                *position += shift;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_sites_merges_entries_for_the_same_particle() {
        let mut select = Select::particle(4, vec![0, 1]);
        select.add_sites(4, &[1, 2]);
        select.add_sites(1, &[0]);

        assert_eq!(select.num_particles(), 2);
        assert_eq!(select.num_sites(), 4);
        assert_eq!(
            select.site_keys().collect::<Vec<_>>(),
            vec![(4, 0), (4, 1), (4, 2), (1, 0)]
        );
    }

    #[test]
    fn merge_preserves_insertion_order() {
        let mut perturbed = Select::new();
        perturbed.merge(&Select::particle(3, vec![0]));
        perturbed.merge(&Select::particle(1, vec![0]));
        assert_eq!(perturbed.particle_index(0), 3);
        assert_eq!(perturbed.particle_index(1), 1);
        assert!(perturbed.contains_particle(1));
        assert!(!perturbed.contains_particle(2));
    }

    #[test]
    fn clear_resets_trial_state() {
        let mut select = Select::particle(0, vec![0]);
        select.set_trial_state(TrialState::Insertion);
        select.clear();
        assert!(select.is_empty());
        assert_eq!(select.trial_state(), TrialState::Held);
    }
}
