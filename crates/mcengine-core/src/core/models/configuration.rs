use super::domain::Domain;
use super::particle::{Particle, ParticleType};
use super::site::Site;
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// The particle store: every particle slot, the ghost pools and type membership.
///
/// Particle indices are stable for the lifetime of a configuration. Removing a particle
/// demotes it to the ghost pool of its type and inserting one promotes a ghost, so that
/// energy maps and selections indexed by particle never need to be renumbered.
///
/// Both the active-member and ghost lists are kept sorted, which makes every
/// promote/demote/relabel pair restore a bit-identical store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    domain: Domain,
    site_type_names: Vec<String>,
    particle_types: Vec<ParticleType>,
    particles: Vec<Particle>,
    members: Vec<Vec<usize>>,
    ghosts: Vec<Vec<usize>>,
}

impl Configuration {
    pub fn new(domain: Domain) -> Self {
        Self {
            domain,
            site_type_names: Vec::new(),
            particle_types: Vec::new(),
            particles: Vec::new(),
            members: Vec::new(),
            ghosts: Vec::new(),
        }
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Registers a site type name and returns its index. Registering an existing name
    /// returns the existing index.
    pub fn add_site_type(&mut self, name: &str) -> usize {
        if let Some(index) = self.site_type_index(name) {
            return index;
        }
        self.site_type_names.push(name.to_string());
        self.site_type_names.len() - 1
    }

    pub fn site_type_index(&self, name: &str) -> Option<usize> {
        self.site_type_names.iter().position(|n| n == name)
    }

    pub fn site_type_name(&self, index: usize) -> &str {
        &self.site_type_names[index]
    }

    pub fn num_site_types(&self) -> usize {
        self.site_type_names.len()
    }

    pub fn add_particle_type(&mut self, particle_type: ParticleType) -> usize {
        self.particle_types.push(particle_type);
        self.members.push(Vec::new());
        self.ghosts.push(Vec::new());
        self.particle_types.len() - 1
    }

    pub fn particle_type_index(&self, name: &str) -> Option<usize> {
        self.particle_types.iter().position(|t| t.name == name)
    }

    pub fn particle_type(&self, index: usize) -> &ParticleType {
        &self.particle_types[index]
    }

    pub fn num_particle_types(&self) -> usize {
        self.particle_types.len()
    }

    /// The largest number of sites of any particle type.
    pub fn max_sites_per_particle(&self) -> usize {
        self.particle_types
            .iter()
            .map(ParticleType::num_sites)
            .max()
            .unwrap_or(0)
    }

    /// Adds an active particle of `type_id` with its first site at `origin`.
    pub fn add_particle(&mut self, type_id: usize, origin: &Point3<f64>) -> usize {
        let particle = self.particle_types[type_id].instantiate(type_id, origin);
        self.particles.push(particle);
        let index = self.particles.len() - 1;
        insert_sorted(&mut self.members[type_id], index);
        index
    }

    /// Appends a new ghost slot of `type_id` and returns its index.
    pub fn add_ghost(&mut self, type_id: usize) -> usize {
        let mut particle = self.particle_types[type_id].instantiate(type_id, &Point3::origin());
        particle.active = false;
        self.particles.push(particle);
        let index = self.particles.len() - 1;
        insert_sorted(&mut self.ghosts[type_id], index);
        index
    }

    /// Returns the ghost that the next insertion of `type_id` will promote, creating a
    /// new ghost slot when the pool is empty.
    pub fn ensure_ghost(&mut self, type_id: usize) -> usize {
        match self.ghosts[type_id].last() {
            Some(&index) => index,
            None => self.add_ghost(type_id),
        }
    }

    /// Moves a ghost into the active set of its type.
    ///
    /// # Panics
    ///
    /// Panics if the particle is already active.
    pub fn promote(&mut self, index: usize) {
        let type_id = self.particles[index].type_id;
        assert!(
            !self.particles[index].active,
            "particle {index} is already active and cannot be promoted"
        );
        remove_sorted(&mut self.ghosts[type_id], index);
        insert_sorted(&mut self.members[type_id], index);
        self.particles[index].active = true;
    }

    /// Moves an active particle into the ghost pool of its type.
    ///
    /// # Panics
    ///
    /// Panics if the particle is already a ghost.
    pub fn demote(&mut self, index: usize) {
        let type_id = self.particles[index].type_id;
        assert!(
            self.particles[index].active,
            "particle {index} is already a ghost and cannot be demoted"
        );
        remove_sorted(&mut self.members[type_id], index);
        insert_sorted(&mut self.ghosts[type_id], index);
        self.particles[index].active = false;
    }

    pub fn particle(&self, index: usize) -> &Particle {
        &self.particles[index]
    }

    pub fn site(&self, particle: usize, site: usize) -> &Site {
        &self.particles[particle].sites[site]
    }

    /// Total number of slots, active and ghost.
    pub fn num_slots(&self) -> usize {
        self.particles.len()
    }

    pub fn num_particles(&self) -> usize {
        self.members.iter().map(Vec::len).sum()
    }

    pub fn num_particles_of_type(&self, type_id: usize) -> usize {
        self.members[type_id].len()
    }

    /// Active particles of one type, in ascending index order.
    pub fn members_of_type(&self, type_id: usize) -> &[usize] {
        &self.members[type_id]
    }

    pub fn num_ghosts_of_type(&self, type_id: usize) -> usize {
        self.ghosts[type_id].len()
    }

    /// Iterates over every active particle index, type by type.
    pub fn active_particles(&self) -> impl Iterator<Item = usize> + '_ {
        self.members.iter().flat_map(|m| m.iter().copied())
    }

    /// Returns the `n`-th active particle in [`Configuration::active_particles`] order.
    pub fn nth_active(&self, mut n: usize) -> Option<usize> {
        for members in &self.members {
            if n < members.len() {
                return Some(members[n]);
            }
            n -= members.len();
        }
        None
    }

    pub fn set_site_position(&mut self, particle: usize, site: usize, position: Point3<f64>) {
        self.particles[particle].sites[site].position = position;
    }

    pub fn set_site_orientation(
        &mut self,
        particle: usize,
        site: usize,
        orientation: Option<Vector3<f64>>,
    ) {
        self.particles[particle].sites[site].orientation = orientation;
    }

    pub fn set_site_type(&mut self, particle: usize, site: usize, type_id: usize) {
        self.particles[particle].sites[site].type_id = type_id;
    }

    pub fn set_site_physical(&mut self, particle: usize, site: usize, physical: bool) {
        self.particles[particle].sites[site].physical = physical;
    }

    pub(crate) fn set_site_cell(&mut self, particle: usize, site: usize, slot: usize, cell: usize) {
        self.particles[particle].sites[site].set_cell(slot, cell);
    }

    /// Relabels a particle to another type, moving it between membership lists.
    ///
    /// Site types are left untouched; callers relabel them explicitly so that a revert can
    /// restore the exact previous labels.
    pub fn set_particle_type(&mut self, particle: usize, type_id: usize) {
        let old = self.particles[particle].type_id;
        if old == type_id {
            return;
        }
        if self.particles[particle].active {
            remove_sorted(&mut self.members[old], particle);
            insert_sorted(&mut self.members[type_id], particle);
        } else {
            remove_sorted(&mut self.ghosts[old], particle);
            insert_sorted(&mut self.ghosts[type_id], particle);
        }
        self.particles[particle].type_id = type_id;
    }
}

fn insert_sorted(list: &mut Vec<usize>, value: usize) {
    if let Err(pos) = list.binary_search(&value) {
        list.insert(pos, value);
    }
}

fn remove_sorted(list: &mut Vec<usize>, value: usize) {
    if let Ok(pos) = list.binary_search(&value) {
        list.remove(pos);
    }
}
