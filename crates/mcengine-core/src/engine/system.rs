use super::cells::{CellIndex, SiteKey};
use super::checkpoint::{Checkpoint, Versioned};
use super::energy_map::{EnergyMap, EnergyMapAll, EnergyMapKind, EnergyMapNeighbor};
use super::error::EngineError;
use super::registry::Registry;
use crate::core::models::configuration::Configuration;
use crate::core::models::select::Select;
use crate::core::models::site::NO_CELL;
use crate::core::potential::neighbor::NeighborCriteria;
use crate::core::potential::params::ModelParams;
use crate::core::potential::PairPotential;
use itertools::Itertools;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// How a potential enumerates the partners of a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visitor {
    AllPairs,
    /// Through the cell index stored in `slot` of every site.
    CellList { slot: usize },
}

/// Whether an energy evaluation writes the staged energy map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnergyMode {
    /// Evaluate only.
    Probe,
    /// Evaluate and stage every visited pair in the energy map.
    Stage,
}

/// One pair model together with its partner enumeration strategy and optional energy map.
#[derive(Debug, Clone)]
pub struct Potential {
    model_name: String,
    model: Arc<dyn PairPotential>,
    visitor: Visitor,
    use_cells: bool,
    cell_min_length: Option<f64>,
    energy_map: Option<EnergyMapKind>,
}

impl Potential {
    pub fn new(model_name: &str, model: Arc<dyn PairPotential>) -> Self {
        Self {
            model_name: model_name.to_string(),
            model,
            visitor: Visitor::AllPairs,
            use_cells: false,
            cell_min_length: None,
            energy_map: None,
        }
    }

    /// Enumerates partners through a cell index whose cells are at least `min_length` wide,
    /// defaulting to the largest mixed cutoff.
    pub fn with_cell_list(mut self, min_length: Option<f64>) -> Self {
        self.use_cells = true;
        self.cell_min_length = min_length;
        self
    }

    pub fn with_energy_map(mut self, map: EnergyMapKind) -> Self {
        self.energy_map = Some(map);
        self
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn visitor(&self) -> Visitor {
        self.visitor
    }

    pub fn energy_map(&self) -> Option<&EnergyMapKind> {
        self.energy_map.as_ref()
    }
}

/// Inverse temperature and chemical potentials, one per particle type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermoParams {
    pub beta: f64,
    pub chemical_potentials: Vec<f64>,
}

impl Default for ThermoParams {
    fn default() -> Self {
        Self {
            beta: 1.0,
            chemical_potentials: Vec::new(),
        }
    }
}

impl ThermoParams {
    pub fn new(beta: f64) -> Self {
        Self {
            beta,
            chemical_potentials: Vec::new(),
        }
    }

    pub fn with_chemical_potential(mut self, particle_type: usize, mu: f64) -> Self {
        if self.chemical_potentials.len() <= particle_type {
            self.chemical_potentials.resize(particle_type + 1, 0.0);
        }
        self.chemical_potentials[particle_type] = mu;
        self
    }

    /// `beta * mu` of one particle type; zero when no chemical potential was set.
    pub fn beta_mu(&self, particle_type: usize) -> f64 {
        self.beta * self.chemical_potentials.get(particle_type).copied().unwrap_or(0.0)
    }
}

/// The simulated state: particle store, potentials with their caches, and thermodynamics.
///
/// Every mutation of positions, types or particle activity goes through the system so that
/// cell indices stay consistent with the configuration at all times.
#[derive(Debug, Clone)]
pub struct System {
    config: Configuration,
    params: ModelParams,
    potentials: Vec<Potential>,
    cells: Vec<CellIndex>,
    thermo: ThermoParams,
    neighbor_criteria: Vec<NeighborCriteria>,
}

#[inline]
fn is_live(config: &Configuration, key: SiteKey) -> bool {
    let particle = config.particle(key.0);
    particle.active && particle.site(key.1).physical
}

/// Calls `visit` with every candidate partner of site `i`, including sites of its own particle.
fn for_each_candidate(
    config: &Configuration,
    cells: Option<&CellIndex>,
    i: SiteKey,
    mut visit: impl FnMut(SiteKey),
) {
    match cells {
        Some(index) => {
            let site = config.site(i.0, i.1);
            let cell = site
                .cell(index.slot())
                .unwrap_or_else(|| index.cell_id(config.domain(), &site.position));
            for &c in index.neighbor_cells(cell) {
                for &key in index.members(c) {
                    visit(key);
                }
            }
        }
        None => {
            for q in config.active_particles() {
                for t in 0..config.particle(q).num_sites() {
                    visit((q, t));
                }
            }
        }
    }
}

/// Energy, squared distance and displacement of a pair, or `None` beyond the mixed cutoff.
#[inline]
fn pair_energy(
    config: &Configuration,
    params: &ModelParams,
    model: &dyn PairPotential,
    i: SiteKey,
    j: SiteKey,
) -> Option<(f64, f64, Vector3<f64>)> {
    let si = config.site(i.0, i.1);
    let sj = config.site(j.0, j.1);
    let pbc = config.domain().displacement(&si.position, &sj.position);
    let squared_distance = pbc.norm_squared();
    if squared_distance > params.mixed(si.type_id, sj.type_id).cutoff_squared {
        return None;
    }
    let energy = model.energy(squared_distance, si.type_id, sj.type_id, params);
    Some((energy, squared_distance, pbc))
}

impl System {
    pub fn new(config: Configuration, params: ModelParams) -> Self {
        Self {
            config,
            params,
            potentials: Vec::new(),
            cells: Vec::new(),
            thermo: ThermoParams::default(),
            neighbor_criteria: Vec::new(),
        }
    }

    pub fn add_potential(&mut self, potential: Potential) -> usize {
        self.potentials.push(potential);
        self.potentials.len() - 1
    }

    pub fn add_neighbor_criteria(&mut self, criteria: NeighborCriteria) -> usize {
        self.neighbor_criteria.push(criteria);
        self.neighbor_criteria.len() - 1
    }

    pub fn set_thermo(&mut self, thermo: ThermoParams) {
        self.thermo = thermo;
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    pub fn thermo(&self) -> &ThermoParams {
        &self.thermo
    }

    pub fn beta(&self) -> f64 {
        self.thermo.beta
    }

    pub fn set_beta(&mut self, beta: f64) {
        self.thermo.beta = beta;
    }

    pub fn beta_mu(&self, particle_type: usize) -> f64 {
        self.thermo.beta_mu(particle_type)
    }

    pub fn num_potentials(&self) -> usize {
        self.potentials.len()
    }

    pub fn potential(&self, index: usize) -> &Potential {
        &self.potentials[index]
    }

    pub fn cell_indices(&self) -> &[CellIndex] {
        &self.cells
    }

    pub fn neighbor_criteria(&self, index: usize) -> Option<&NeighborCriteria> {
        self.neighbor_criteria.get(index)
    }

    /// Resolves site types against the parameter table, builds cell indices and sizes energy
    /// maps. Must be called once before the first energy evaluation.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] if a site type has no parameters, no potential is
    /// registered, or a cell index would have a non-positive cell size.
    pub fn precompute(&mut self) -> Result<(), EngineError> {
        if self.potentials.is_empty() {
            return Err(EngineError::Configuration(
                "a system needs at least one potential".to_string(),
            ));
        }
        for t in 0..self.config.num_site_types() {
            let name = self.config.site_type_name(t);
            if self.params.index_of(name) != Some(t) {
                return Err(EngineError::Configuration(format!(
                    "site type '{name}' (index {t}) does not match the parameter table"
                )));
            }
        }
        for (i, criteria) in self.neighbor_criteria.iter().enumerate() {
            if criteria.potential_index() >= self.potentials.len() {
                return Err(EngineError::Configuration(format!(
                    "neighbor criteria {i} refers to missing potential {}",
                    criteria.potential_index()
                )));
            }
        }
        let num_types = self.config.num_particle_types();
        if self.thermo.chemical_potentials.len() < num_types {
            self.thermo.chemical_potentials.resize(num_types, 0.0);
        }

        self.cells.clear();
        let max_cutoff = self.params.max_cutoff();
        for potential in &mut self.potentials {
            potential.visitor = Visitor::AllPairs;
            if !potential.use_cells {
                continue;
            }
            let min_length = potential.cell_min_length.unwrap_or(max_cutoff);
            if !(min_length > 0.0 && min_length >= max_cutoff) {
                return Err(EngineError::Configuration(format!(
                    "cell size {min_length} must be positive and at least the largest cutoff \
                     {max_cutoff}"
                )));
            }
            let slot = self.cells.len();
            let mut index = CellIndex::new(min_length, slot);
            index.precompute(&mut self.config);
            self.cells.push(index);
            potential.visitor = Visitor::CellList { slot };
        }
        for potential in &mut self.potentials {
            if let Some(map) = &mut potential.energy_map {
                map.precompute(&self.config);
            }
        }
        info!(
            particles = self.config.num_particles(),
            potentials = self.potentials.len(),
            cell_indices = self.cells.len(),
            "System precomputed."
        );
        Ok(())
    }

    fn enabled_cells(&self, visitor: Visitor) -> Option<&CellIndex> {
        match visitor {
            Visitor::CellList { slot } => self.cells.get(slot).filter(|c| c.is_enabled()),
            Visitor::AllPairs => None,
        }
    }

    /// Interaction energy of the selected sites with every other live site, one entry per
    /// potential.
    ///
    /// Only physical sites of active particles contribute. Pairs of sites of the same particle
    /// are excluded, and a pair with both sites selected is counted once. In
    /// [`EnergyMode::Stage`] the staged map entries of the selected sites are cleared first and
    /// every visited pair is then staged.
    pub fn perturbed_energy(&mut self, select: &Select, mode: EnergyMode) -> Vec<f64> {
        let selected: BTreeSet<SiteKey> = select.site_keys().collect();
        let mut profile = vec![0.0; self.potentials.len()];
        for (k, total) in profile.iter_mut().enumerate() {
            let visitor = self.potentials[k].visitor;
            let cells = match visitor {
                Visitor::CellList { slot } => self.cells.get(slot).filter(|c| c.is_enabled()),
                Visitor::AllPairs => None,
            };
            let config = &self.config;
            let params = &self.params;
            let potential = &mut self.potentials[k];
            let model = potential.model.as_ref();
            let mut map = match mode {
                EnergyMode::Stage => potential.energy_map.as_mut(),
                EnergyMode::Probe => None,
            };
            if let Some(map) = map.as_deref_mut() {
                for &key in selected.iter().filter(|&&key| is_live(config, key)) {
                    map.clear_site(key);
                }
            }
            for &i in selected.iter().filter(|&&key| is_live(config, key)) {
                for_each_candidate(config, cells, i, |j| {
                    if j.0 == i.0 || !is_live(config, j) {
                        return;
                    }
                    if j < i && selected.contains(&j) {
                        return;
                    }
                    if let Some((energy, squared_distance, pbc)) =
                        pair_energy(config, params, model, i, j)
                    {
                        *total += energy;
                        if let Some(map) = map.as_deref_mut() {
                            let ti = config.site(i.0, i.1).type_id;
                            let tj = config.site(j.0, j.1).type_id;
                            map.update(energy, i, j, ti, tj, squared_distance, &pbc);
                        }
                    }
                });
            }
        }
        profile
    }

    /// Recomputes the total energy of every live pair and rebuilds every energy map from
    /// scratch, committing the result.
    pub fn full_energy(&mut self) -> (f64, Vec<f64>) {
        let all = Select::all_active(&self.config);
        for potential in &mut self.potentials {
            if let Some(map) = &mut potential.energy_map {
                map.precompute(&self.config);
            }
        }
        let profile = self.perturbed_energy(&all, EnergyMode::Stage);
        self.finalize(&all);
        (profile.iter().sum(), profile)
    }

    /// Total energy by exhaustive pair enumeration, bypassing cell indices and energy maps.
    pub fn brute_force_energy(&self) -> (f64, Vec<f64>) {
        let keys: Vec<SiteKey> = self
            .config
            .active_particles()
            .flat_map(|p| (0..self.config.particle(p).num_sites()).map(move |s| (p, s)))
            .filter(|&key| is_live(&self.config, key))
            .collect();
        let profile: Vec<f64> = self
            .potentials
            .iter()
            .map(|potential| {
                keys.iter()
                    .tuple_combinations()
                    .filter(|(i, j)| i.0 != j.0)
                    .filter_map(|(&i, &j)| {
                        pair_energy(&self.config, &self.params, potential.model.as_ref(), i, j)
                    })
                    .map(|(energy, _, _)| energy)
                    .sum::<f64>()
            })
            .collect();
        (profile.iter().sum(), profile)
    }

    /// Commits staged energy map entries touching `select`.
    pub fn finalize(&mut self, select: &Select) {
        for potential in &mut self.potentials {
            if let Some(map) = &mut potential.energy_map {
                map.finalize(select);
            }
        }
    }

    /// Discards staged energy map entries touching `select`.
    pub fn revert(&mut self, select: &Select) {
        for potential in &mut self.potentials {
            if let Some(map) = &mut potential.energy_map {
                map.revert(select);
            }
        }
    }

    /// Writes the cached positions and orientations of `select` into the configuration.
    pub fn set_positions(&mut self, select: &Select) {
        for entry in select.particles() {
            if entry.positions.len() != entry.sites.len() {
                continue;
            }
            let active = self.config.particle(entry.particle).active;
            for (k, &s) in entry.sites.iter().enumerate() {
                self.config.set_site_position(entry.particle, s, entry.positions[k]);
                if let Some(orientation) = entry.orientations.get(k) {
                    self.config.set_site_orientation(entry.particle, s, *orientation);
                }
                if active {
                    for index in &mut self.cells {
                        index.sync_site(&mut self.config, entry.particle, s);
                    }
                }
            }
        }
    }

    pub fn set_physical(&mut self, select: &Select, physical: bool) {
        for (p, s) in select.site_keys() {
            self.config.set_site_physical(p, s, physical);
        }
    }

    pub fn set_site_type(&mut self, particle: usize, site: usize, type_id: usize) {
        self.config.set_site_type(particle, site, type_id);
    }

    pub fn set_particle_type(&mut self, particle: usize, type_id: usize) {
        self.config.set_particle_type(particle, type_id);
    }

    /// The ghost the next insertion of `particle_type` promotes, allocating one if needed.
    pub fn ensure_ghost(&mut self, particle_type: usize) -> usize {
        let ghost = self.config.ensure_ghost(particle_type);
        for index in &self.cells {
            for s in 0..self.config.particle(ghost).num_sites() {
                self.config.set_site_cell(ghost, s, index.slot(), NO_CELL);
            }
        }
        ghost
    }

    pub fn promote(&mut self, particle: usize) {
        self.config.promote(particle);
        for index in &mut self.cells {
            index.insert_particle(&mut self.config, particle);
        }
    }

    pub fn demote(&mut self, particle: usize) {
        for index in &mut self.cells {
            index.remove_particle(&mut self.config, particle);
        }
        self.config.demote(particle);
        for potential in &mut self.potentials {
            if let Some(map) = &mut potential.energy_map {
                map.remove_particle(particle);
            }
        }
    }

    /// Active particles of `mobile_type`, other than the anchor's, whose `mobile_site` passes
    /// neighbor criteria `criteria_index` against the anchor site.
    ///
    /// A pair passes when it lies inside the distance shell, matches the site-type pair and,
    /// if the criteria set an energy maximum, its site-site energy under the criteria's
    /// potential is below that maximum. Pairs beyond the mixed cutoff count as zero energy.
    /// The search goes through the potential's cell index when that index is enabled and its
    /// cells cover the shell.
    pub fn find_neighbors(
        &self,
        criteria_index: usize,
        anchor: SiteKey,
        mobile_type: usize,
        mobile_site: usize,
    ) -> Vec<usize> {
        let criteria = &self.neighbor_criteria[criteria_index];
        let potential = &self.potentials[criteria.potential_index()];
        let domain = self.config.domain();
        let anchor_site = self.config.site(anchor.0, anchor.1);
        let accepts = |q: usize| {
            let particle = self.config.particle(q);
            if q == anchor.0 || !particle.active || particle.type_id != mobile_type {
                return false;
            }
            let site = particle.site(mobile_site);
            let r2 = domain.displacement(&anchor_site.position, &site.position).norm_squared();
            if !criteria.is_distance_accepted(r2)
                || !criteria.is_type_accepted(anchor_site.type_id, site.type_id)
            {
                return false;
            }
            if !criteria.uses_energy() {
                return true;
            }
            let energy = pair_energy(
                &self.config,
                &self.params,
                potential.model.as_ref(),
                anchor,
                (q, mobile_site),
            )
            .map_or(0.0, |(energy, _, _)| energy);
            energy < criteria.energy_maximum()
        };
        let cells = self
            .enabled_cells(potential.visitor)
            .filter(|index| criteria.maximum_distance() <= index.min_length());
        let mut found: Vec<usize> = match cells {
            Some(_) => {
                let mut candidates = Vec::new();
                for_each_candidate(&self.config, cells, anchor, |(q, t)| {
                    if t == mobile_site {
                        candidates.push(q);
                    }
                });
                candidates.into_iter().filter(|&q| accepts(q)).collect()
            }
            None => self
                .config
                .members_of_type(mobile_type)
                .iter()
                .copied()
                .filter(|&q| accepts(q))
                .collect(),
        };
        found.sort_unstable();
        found.dedup();
        found
    }

    /// Verifies that every cell index agrees with the current positions.
    pub fn check_cells(&self) -> bool {
        self.cells.iter().all(|index| index.check(&self.config))
    }

    pub fn to_state(&self) -> SystemState {
        SystemState {
            config: Versioned(self.config.clone()),
            params: self.params.clone(),
            potentials: self
                .potentials
                .iter()
                .map(|p| PotentialState {
                    model_name: p.model_name.clone(),
                    visitor: p.visitor,
                    use_cells: p.use_cells,
                    cell_min_length: p.cell_min_length,
                    energy_map: p.energy_map.as_ref().map(|map| match map {
                        EnergyMapKind::All(m) => MapState::All(Versioned(m.clone())),
                        EnergyMapKind::Neighbor(m) => MapState::Neighbor(Versioned(m.clone())),
                    }),
                })
                .collect(),
            cells: self.cells.iter().cloned().map(Versioned).collect(),
            thermo: self.thermo.clone(),
            neighbor_criteria: self.neighbor_criteria.iter().cloned().map(Versioned).collect(),
        }
    }

    /// Rebuilds a system from a checkpointed state, resolving pair models by name.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownName`] if a model is not registered.
    pub fn from_state(state: SystemState, registry: &Registry) -> Result<Self, EngineError> {
        let potentials = state
            .potentials
            .into_iter()
            .map(|p| {
                Ok(Potential {
                    model: registry.model(&p.model_name)?,
                    model_name: p.model_name,
                    visitor: p.visitor,
                    use_cells: p.use_cells,
                    cell_min_length: p.cell_min_length,
                    energy_map: p.energy_map.map(|map| match map {
                        MapState::All(m) => EnergyMapKind::All(m.into_inner()),
                        MapState::Neighbor(m) => EnergyMapKind::Neighbor(m.into_inner()),
                    }),
                })
            })
            .collect::<Result<Vec<_>, EngineError>>()?;
        debug!(potentials = potentials.len(), "System restored from checkpoint.");
        Ok(Self {
            config: state.config.into_inner(),
            params: state.params,
            potentials,
            cells: state.cells.into_iter().map(Versioned::into_inner).collect(),
            thermo: state.thermo,
            neighbor_criteria: state
                .neighbor_criteria
                .into_iter()
                .map(Versioned::into_inner)
                .collect(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum MapState {
    All(Versioned<EnergyMapAll>),
    Neighbor(Versioned<EnergyMapNeighbor>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PotentialState {
    model_name: String,
    visitor: Visitor,
    use_cells: bool,
    cell_min_length: Option<f64>,
    energy_map: Option<MapState>,
}

/// Serializable form of a [`System`]; pair models are stored by registry name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemState {
    config: Versioned<Configuration>,
    params: ModelParams,
    potentials: Vec<PotentialState>,
    cells: Vec<Versioned<CellIndex>>,
    thermo: ThermoParams,
    neighbor_criteria: Vec<Versioned<NeighborCriteria>>,
}

impl Checkpoint for Configuration {
    const KIND: &'static str = "configuration";
    const VERSION: u32 = 8451;
}

impl Checkpoint for CellIndex {
    const KIND: &'static str = "cell_index";
    const VERSION: u32 = 958;
}

impl Checkpoint for EnergyMapAll {
    const KIND: &'static str = "energy_map_all";
    const VERSION: u32 = 210;
}

impl Checkpoint for EnergyMapNeighbor {
    const KIND: &'static str = "energy_map_neighbor";
    const VERSION: u32 = 3856;
}

impl Checkpoint for NeighborCriteria {
    const KIND: &'static str = "neighbor_criteria";
    const VERSION: u32 = 903;
}

impl Checkpoint for SystemState {
    const KIND: &'static str = "system";
    const VERSION: u32 = 7277;
}
