use super::acceptance::Acceptance;
use super::select::TrialSelect;
use super::tunable::Tunable;
use crate::core::models::select::{Select, TrialState};
use crate::core::utils::geometry::{rotate_about, rotate_euler_angles};
use crate::core::utils::random::Random;
use crate::engine::error::EngineError;
use crate::engine::system::System;
use nalgebra::{Point3, Rotation3};
use serde::{Deserialize, Serialize};

const MAX_PLACEMENT_ATTEMPTS: usize = 100_000;

/// Point about which a rotation is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pivot {
    FirstMobileSite,
    /// The first anchor site, or the first mobile site when there is no anchor.
    Anchor,
}

/// Where inserted particles (and the trial positions of removals) are placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Region {
    Anywhere,
    /// Inside the association shell of neighbor criteria `neighbor_index` around the anchor.
    AnchorShell { neighbor_index: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PerturbKind {
    Translate { tunable: Tunable },
    Rotate { tunable: Tunable, pivot: Pivot },
    /// Exchanges the labels of two site types on every mobile site.
    SiteTypeSwap { site_types: (String, String) },
    /// Exchanges the types of whole particles between two particle types with equal site counts.
    ParticleTypeSwap { particle_types: (String, String) },
    Add { region: Region },
    Remove { region: Region },
    /// Places the mobile particle inside or outside the anchor's association shell.
    MoveAvb { inside: bool, neighbor_index: usize },
    /// Perturbs the inverse temperature by `+step` or `-step`.
    Beta { step: f64 },
}

/// Exactly what is needed to undo one perturbation.
#[derive(Debug, Clone, Default, PartialEq)]
struct PerturbRecord {
    original: Select,
    site_types: Vec<((usize, usize), usize)>,
    particle_types: Vec<(usize, usize)>,
    promoted: Option<usize>,
    removed: Option<usize>,
    previous_beta: Option<f64>,
}

/// Mutates the mobile sites of a stage and records how to invert the mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Perturb {
    kind: PerturbKind,
    #[serde(skip)]
    resolved_types: Option<(usize, usize)>,
    #[serde(skip)]
    record: Option<PerturbRecord>,
}

fn rigid_placement(
    original: &Select,
    reference: usize,
    target: &Point3<f64>,
    rotation: &Rotation3<f64>,
) -> Select {
    let mut placed = original.clone();
    for entry in placed.particles_mut() {
        let Some(&origin) = entry.positions.get(reference).or(entry.positions.first()) else {
            continue;
        };
        for position in &mut entry.positions {
            *position = target + rotation * (*position - origin);
        }
        for orientation in entry.orientations.iter_mut().flatten() {
            *orientation = rotate_euler_angles(orientation, rotation);
        }
    }
    placed
}

impl Perturb {
    pub fn new(kind: PerturbKind) -> Self {
        Self {
            kind,
            resolved_types: None,
            record: None,
        }
    }

    pub fn kind(&self) -> &PerturbKind {
        &self.kind
    }

    pub fn tunable(&self) -> Option<&Tunable> {
        match &self.kind {
            PerturbKind::Translate { tunable } | PerturbKind::Rotate { tunable, .. } => {
                Some(tunable)
            }
            _ => None,
        }
    }

    pub fn tunable_mut(&mut self) -> Option<&mut Tunable> {
        match &mut self.kind {
            PerturbKind::Translate { tunable } | PerturbKind::Rotate { tunable, .. } => {
                Some(tunable)
            }
            _ => None,
        }
    }

    /// Whether the last perturbation can be reverted.
    pub fn revert_possible(&self) -> bool {
        self.record.is_some()
    }

    pub fn is_insertion(&self) -> bool {
        matches!(self.kind, PerturbKind::Add { .. })
    }

    pub fn is_removal(&self) -> bool {
        matches!(self.kind, PerturbKind::Remove { .. })
    }

    /// Resolves type names and validates indices against the system.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] for unknown type names, missing neighbor criteria, particle types
    /// with different site counts, or a non-positive beta step.
    pub fn precompute(&mut self, system: &System) -> Result<(), EngineError> {
        let config = system.config();
        let criteria_exists = |index: usize| {
            system.neighbor_criteria(index).map(|_| ()).ok_or_else(|| {
                EngineError::Configuration(format!("missing neighbor criteria {index}"))
            })
        };
        match &self.kind {
            PerturbKind::SiteTypeSwap { site_types: (a, b) } => {
                let find = |name: &String| {
                    config.site_type_index(name).ok_or_else(|| EngineError::UnknownName {
                        kind: "site type",
                        name: name.clone(),
                    })
                };
                self.resolved_types = Some((find(a)?, find(b)?));
            }
            PerturbKind::ParticleTypeSwap { particle_types: (a, b) } => {
                let find = |name: &String| {
                    config.particle_type_index(name).ok_or_else(|| EngineError::UnknownName {
                        kind: "particle type",
                        name: name.clone(),
                    })
                };
                let (ta, tb) = (find(a)?, find(b)?);
                if config.particle_type(ta).num_sites() != config.particle_type(tb).num_sites() {
                    return Err(EngineError::Configuration(format!(
                        "particle types '{a}' and '{b}' have different numbers of sites"
                    )));
                }
                self.resolved_types = Some((ta, tb));
            }
            PerturbKind::Add { region: Region::AnchorShell { neighbor_index } }
            | PerturbKind::Remove { region: Region::AnchorShell { neighbor_index } }
            | PerturbKind::MoveAvb { neighbor_index, .. } => criteria_exists(*neighbor_index)?,
            PerturbKind::Beta { step } if !(*step > 0.0) => {
                return Err(EngineError::Configuration(format!(
                    "beta step {step} must be positive"
                )));
            }
            _ => {}
        }
        Ok(())
    }

    /// Applies the perturbation to the mobile sites of `select`.
    ///
    /// Every call starts from the snapshot taken at selection time, so repeated calls within one
    /// attempt each produce an independent trial outcome. With `is_position_held` the geometry is
    /// left unchanged and only the trial state is set.
    pub fn perturb<R: Random + ?Sized>(
        &mut self,
        system: &mut System,
        select: &mut TrialSelect,
        rng: &mut R,
        is_position_held: bool,
        acceptance: &mut Acceptance,
    ) {
        let record = self.record.get_or_insert_with(|| PerturbRecord {
            original: select.mobile_original().clone(),
            ..PerturbRecord::default()
        });
        let held = is_position_held;
        let move_state = if held {
            TrialState::Held
        } else {
            TrialState::Move
        };
        let dimension = system.config().domain().dimension();
        match &self.kind {
            PerturbKind::Translate { tunable } => {
                select.mobile_mut().set_trial_state(move_state);
                if held {
                    return;
                }
                let shift = rng.position_in_cube(dimension, tunable.value());
                let mut moved = select.mobile_original().clone();
                moved.translate(&shift);
                let domain = system.config().domain().clone();
                for entry in moved.particles_mut() {
                    let whole =
                        entry.sites.len() == system.config().particle(entry.particle).num_sites();
                    if let (true, Some(&first)) = (whole, entry.positions.first()) {
                        let wrap = domain.wrap_shift(&first);
                        for position in &mut entry.positions {
                            *position += wrap;
                        }
                    }
                }
                Self::apply(system, select, moved, TrialState::Move);
            }
            PerturbKind::Rotate { tunable, pivot } => {
                select.mobile_mut().set_trial_state(move_state);
                if held {
                    return;
                }
                let original = select.mobile_original();
                let pivot_point = match pivot {
                    Pivot::Anchor => select.anchor().first_position().or(original.first_position()),
                    Pivot::FirstMobileSite => original.first_position(),
                };
                let Some(pivot_point) = pivot_point else {
                    return;
                };
                let rotation = rng.small_rotation(dimension, tunable.value());
                let mut moved = original.clone();
                for entry in moved.particles_mut() {
                    for position in &mut entry.positions {
                        *position = rotate_about(position, &pivot_point, &rotation);
                    }
                    for orientation in entry.orientations.iter_mut().flatten() {
                        *orientation = rotate_euler_angles(orientation, &rotation);
                    }
                }
                Self::apply(system, select, moved, TrialState::Move);
            }
            PerturbKind::SiteTypeSwap { .. } => {
                select.mobile_mut().set_trial_state(move_state);
                if held || !record.site_types.is_empty() {
                    return;
                }
                let Some((a, b)) = self.resolved_types else {
                    panic!("site type swap used before precompute");
                };
                for (p, s) in select.mobile().site_keys() {
                    let old = system.config().site(p, s).type_id;
                    let new = if old == a { b } else if old == b { a } else { old };
                    record.site_types.push(((p, s), old));
                    system.set_site_type(p, s, new);
                }
            }
            PerturbKind::ParticleTypeSwap { .. } => {
                select.mobile_mut().set_trial_state(move_state);
                if held || !record.particle_types.is_empty() {
                    return;
                }
                let Some((a, b)) = self.resolved_types else {
                    panic!("particle type swap used before precompute");
                };
                for entry in select.mobile().particles() {
                    let p = entry.particle;
                    let old = system.config().particle(p).type_id;
                    let new = if old == a {
                        b
                    } else if old == b {
                        a
                    } else {
                        acceptance.set_reject(true);
                        continue;
                    };
                    record.particle_types.push((p, old));
                    for s in 0..system.config().particle(p).num_sites() {
                        record.site_types.push(((p, s), system.config().site(p, s).type_id));
                        let template_type = system.config().particle_type(new).sites[s].type_id;
                        system.set_site_type(p, s, template_type);
                    }
                    system.set_particle_type(p, new);
                    acceptance.add_to_macrostate_shift(old, -1);
                    acceptance.add_to_macrostate_shift(new, 1);
                    acceptance.add_to_ln_metropolis_prob(system.beta_mu(new) - system.beta_mu(old));
                }
            }
            PerturbKind::Add { region } => {
                select.mobile_mut().set_trial_state(TrialState::Insertion);
                for entry in select.mobile_original().particles() {
                    if !system.config().particle(entry.particle).active {
                        system.promote(entry.particle);
                        record.promoted = Some(entry.particle);
                    }
                }
                let placed = Self::place(system, select, *region, rng);
                Self::apply(system, select, placed, TrialState::Insertion);
            }
            PerturbKind::Remove { region } => {
                select.mobile_mut().set_trial_state(TrialState::Removal);
                record.removed = select.mobile().particles().first().map(|e| e.particle);
                if held {
                    return;
                }
                let placed = Self::place(system, select, *region, rng);
                Self::apply(system, select, placed, TrialState::Removal);
            }
            PerturbKind::MoveAvb {
                inside,
                neighbor_index,
            } => {
                select.mobile_mut().set_trial_state(move_state);
                if held {
                    return;
                }
                let placed = if *inside {
                    Self::place(
                        system,
                        select,
                        Region::AnchorShell {
                            neighbor_index: *neighbor_index,
                        },
                        rng,
                    )
                } else {
                    Self::place_outside(system, select, *neighbor_index, rng)
                };
                Self::apply(system, select, placed, TrialState::Move);
            }
            PerturbKind::Beta { step } => {
                if record.previous_beta.is_none() {
                    record.previous_beta = Some(system.beta());
                }
                if held {
                    return;
                }
                let beta = record.previous_beta.unwrap_or(system.beta());
                let proposed = if rng.coin_flip() { beta + step } else { beta - step };
                if proposed > 0.0 {
                    system.set_beta(proposed);
                } else {
                    acceptance.set_reject(true);
                }
            }
        }
    }

    fn apply(system: &mut System, select: &mut TrialSelect, mut placed: Select, state: TrialState) {
        placed.set_trial_state(state);
        system.set_positions(&placed);
        *select.mobile_mut() = placed;
    }

    fn placement_site(select: &TrialSelect) -> usize {
        select.volume_bias().map_or(0, |bias| bias.mobile_site)
    }

    /// Uniformly rotates the snapshot and moves its placement site to a random point of `region`.
    fn place<R: Random + ?Sized>(
        system: &System,
        select: &TrialSelect,
        region: Region,
        rng: &mut R,
    ) -> Select {
        let domain = system.config().domain();
        let dimension = domain.dimension();
        let rotation = rng.uniform_rotation(dimension);
        let target = match region {
            Region::Anywhere => domain.random_position(rng),
            Region::AnchorShell { neighbor_index } => {
                let Some(criteria) = system.neighbor_criteria(neighbor_index) else {
                    panic!("neighbor criteria {neighbor_index} missing after precompute");
                };
                let anchor = select.anchor().first_position().unwrap_or_else(Point3::origin);
                let offset = rng.position_in_shell(
                    dimension,
                    criteria.minimum_distance(),
                    criteria.maximum_distance(),
                );
                domain.wrap(&(anchor + offset))
            }
        };
        rigid_placement(select.mobile_original(), Self::placement_site(select), &target, &rotation)
    }

    fn place_outside<R: Random + ?Sized>(
        system: &System,
        select: &TrialSelect,
        neighbor_index: usize,
        rng: &mut R,
    ) -> Select {
        let domain = system.config().domain();
        let Some(criteria) = system.neighbor_criteria(neighbor_index) else {
            panic!("neighbor criteria {neighbor_index} missing after precompute");
        };
        let anchor = select.anchor().first_position().unwrap_or_else(Point3::origin);
        let rotation = rng.uniform_rotation(domain.dimension());
        for _ in 0..MAX_PLACEMENT_ATTEMPTS {
            let target = domain.random_position(rng);
            let r2 = domain.displacement(&anchor, &target).norm_squared();
            if !criteria.is_distance_accepted(r2) {
                return rigid_placement(
                    select.mobile_original(),
                    Self::placement_site(select),
                    &target,
                    &rotation,
                );
            }
        }
        panic!(
            "no position outside the association shell found in {MAX_PLACEMENT_ATTEMPTS} attempts"
        );
    }

    /// Undoes the recorded perturbation.
    ///
    /// # Panics
    ///
    /// Panics if there is no recorded perturbation, which includes a second revert.
    pub fn revert(&mut self, system: &mut System) {
        let Some(record) = self.record.take() else {
            panic!("Perturb::revert called without a preceding perturb");
        };
        if let Some(p) = record.promoted {
            system.demote(p);
        }
        system.set_positions(&record.original);
        for &(p, old) in record.particle_types.iter().rev() {
            system.set_particle_type(p, old);
        }
        for &((p, s), old) in record.site_types.iter().rev() {
            system.set_site_type(p, s, old);
        }
        if let Some(beta) = record.previous_beta {
            system.set_beta(beta);
        }
    }

    /// Makes the perturbation permanent.
    pub fn finalize(&mut self, system: &mut System) {
        if let Some(record) = self.record.take() {
            if let (PerturbKind::Remove { .. }, Some(p)) = (&self.kind, record.removed) {
                system.demote(p);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::configuration::Configuration;
    use crate::core::models::domain::Domain;
    use crate::core::models::particle::{ParticleType, SiteTemplate};
    use crate::core::potential::neighbor::NeighborCriteria;
    use crate::core::potential::params::{ModelParams, SiteTypeParams};
    use crate::core::potential::potentials::LennardJones;
    use crate::engine::energy_map::{EnergyMapAll, EnergyMapKind};
    use crate::engine::system::{EnergyMode, Potential};
    use crate::engine::trial::select::SelectPolicy;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256StarStar;
    use std::sync::Arc;

    fn system(n: usize) -> System {
        let mut config = Configuration::new(Domain::cubic(10.0, 3).unwrap());
        let a = config.add_site_type("A");
        let b = config.add_site_type("B");
        config.add_particle_type(
            ParticleType::new("AB")
                .with_site(SiteTemplate::new(a, Point3::origin()))
                .with_site(SiteTemplate::new(b, Point3::new(1.0, 0.0, 0.0))),
        );
        config.add_particle_type(
            ParticleType::new("BA")
                .with_site(SiteTemplate::new(b, Point3::origin()))
                .with_site(SiteTemplate::new(a, Point3::new(1.0, 0.0, 0.0))),
        );
        let mut rng = Xoshiro256StarStar::seed_from_u64(42);
        for _ in 0..n {
            let origin = config.domain().random_position(&mut rng);
            config.add_particle(0, &origin);
        }
        let params = ModelParams::new(vec![
            SiteTypeParams::new("A", 1.0, 1.0, 2.5),
            SiteTypeParams::new("B", 1.0, 0.5, 2.5),
        ]);
        let mut system = System::new(config, params);
        system.add_potential(
            Potential::new("lennard_jones", Arc::new(LennardJones))
                .with_cell_list(None)
                .with_energy_map(EnergyMapKind::All(EnergyMapAll::new())),
        );
        system.add_neighbor_criteria(NeighborCriteria::new(1.0, 1.5));
        system.precompute().unwrap();
        system.full_energy();
        system
    }

    fn selected(system: &mut System, policy: SelectPolicy, particle_type: &str) -> TrialSelect {
        let mut select = TrialSelect::new(policy).with_particle_type(particle_type);
        select.precompute(system).unwrap();
        let mut rng = Xoshiro256StarStar::seed_from_u64(9);
        assert!(select.select(&Select::new(), system, &mut rng));
        select
    }

    /// Perturbs, stages the new energy, then reverts and checks that nothing changed.
    fn assert_reversible(kind: PerturbKind, policy: SelectPolicy, particle_type: &str) {
        let mut system = system(20);
        system.ensure_ghost(0);
        system.full_energy();
        let mut select = selected(&mut system, policy, particle_type);
        let before_config = system.config().clone();
        let before_cells = system.cell_indices().to_vec();
        let before_map = system.potential(0).energy_map().cloned();
        let before_beta = system.beta();

        let mut perturb = Perturb::new(kind);
        perturb.precompute(&system).unwrap();
        let mut rng = Xoshiro256StarStar::seed_from_u64(3);
        let mut acceptance = Acceptance::default();
        perturb.perturb(&mut system, &mut select, &mut rng, false, &mut acceptance);
        system.perturbed_energy(select.mobile(), EnergyMode::Stage);
        assert!(perturb.revert_possible());
        perturb.revert(&mut system);
        system.revert(select.mobile());

        assert_eq!(system.config(), &before_config);
        assert_eq!(system.cell_indices(), before_cells.as_slice());
        assert_eq!(system.potential(0).energy_map().cloned(), before_map);
        assert_eq!(system.beta(), before_beta);
    }

    #[test]
    fn translate_is_reversible() {
        assert_reversible(
            PerturbKind::Translate {
                tunable: Tunable::new(2.0, 0.1, 5.0),
            },
            SelectPolicy::WholeParticle { ghost: false },
            "AB",
        );
    }

    #[test]
    fn rotate_is_reversible() {
        assert_reversible(
            PerturbKind::Rotate {
                tunable: Tunable::new(1.0, 0.1, 3.0),
                pivot: Pivot::FirstMobileSite,
            },
            SelectPolicy::WholeParticle { ghost: false },
            "AB",
        );
    }

    #[test]
    fn insertion_is_reversible() {
        assert_reversible(
            PerturbKind::Add {
                region: Region::Anywhere,
            },
            SelectPolicy::WholeParticle { ghost: true },
            "AB",
        );
    }

    #[test]
    fn type_swaps_are_reversible() {
        assert_reversible(
            PerturbKind::ParticleTypeSwap {
                particle_types: ("AB".to_string(), "BA".to_string()),
            },
            SelectPolicy::WholeParticle { ghost: false },
            "AB",
        );
        assert_reversible(
            PerturbKind::SiteTypeSwap {
                site_types: ("A".to_string(), "B".to_string()),
            },
            SelectPolicy::WholeParticle { ghost: false },
            "AB",
        );
    }

    #[test]
    fn held_translate_only_sets_trial_state() {
        let mut system = system(5);
        let mut select = selected(&mut system, SelectPolicy::WholeParticle { ghost: false }, "AB");
        let before = system.config().clone();
        let mut perturb = Perturb::new(PerturbKind::Translate {
            tunable: Tunable::new(2.0, 0.1, 5.0),
        });
        let mut rng = Xoshiro256StarStar::seed_from_u64(3);
        perturb.perturb(&mut system, &mut select, &mut rng, true, &mut Acceptance::default());
        assert_eq!(select.mobile().trial_state(), TrialState::Held);
        assert_eq!(system.config(), &before);
    }

    #[test]
    fn translate_keeps_first_site_in_the_primary_box() {
        let mut system = system(5);
        let mut select = selected(&mut system, SelectPolicy::WholeParticle { ghost: false }, "AB");
        let mut perturb = Perturb::new(PerturbKind::Translate {
            tunable: Tunable::new(5.0, 0.1, 5.0),
        });
        let mut rng = Xoshiro256StarStar::seed_from_u64(4);
        for _ in 0..100 {
            perturb.perturb(&mut system, &mut select, &mut rng, false, &mut Acceptance::default());
            let first = select.mobile().first_position().unwrap();
            assert!((0..3).all(|d| first[d].abs() <= 5.0 + 1e-12));
            let second = select.mobile().particles()[0].positions[1];
            assert!(((second - first).norm() - 1.0).abs() < 1e-12);
        }
        perturb.revert(&mut system);
    }

    #[test]
    fn removal_demotes_only_on_finalize() {
        let mut system = system(5);
        let mut select = selected(&mut system, SelectPolicy::WholeParticle { ghost: false }, "AB");
        let p = select.mobile().particle_index(0);
        let mut perturb = Perturb::new(PerturbKind::Remove {
            region: Region::Anywhere,
        });
        let mut rng = Xoshiro256StarStar::seed_from_u64(4);
        perturb.perturb(&mut system, &mut select, &mut rng, true, &mut Acceptance::default());
        assert!(system.config().particle(p).active);
        perturb.finalize(&mut system);
        assert!(!system.config().particle(p).active);
        assert!(system.check_cells());
        assert!(!perturb.revert_possible());
    }

    #[test]
    fn beta_perturbation_is_restored_on_revert() {
        let mut system = system(1);
        let mut select = TrialSelect::new(SelectPolicy::Nothing);
        let mut perturb = Perturb::new(PerturbKind::Beta { step: 0.1 });
        perturb.precompute(&system).unwrap();
        let mut rng = Xoshiro256StarStar::seed_from_u64(4);
        select.select(&Select::new(), &mut system, &mut rng);
        perturb.perturb(&mut system, &mut select, &mut rng, false, &mut Acceptance::default());
        assert!((system.beta() - 1.0).abs() > 0.05);
        perturb.revert(&mut system);
        assert_eq!(system.beta(), 1.0);
    }

    #[test]
    fn avb_move_inside_lands_in_the_shell() {
        let mut system = system(10);
        let mut avb = TrialSelect::new(SelectPolicy::VolumeBiasTarget(
            crate::engine::trial::select::VolumeBias::new("AB", 0).moving(true),
        ))
        .with_particle_type("AB");
        avb.precompute(&system).unwrap();
        let mut perturb = Perturb::new(PerturbKind::MoveAvb {
            inside: true,
            neighbor_index: 0,
        });
        perturb.precompute(&system).unwrap();
        let mut rng = Xoshiro256StarStar::seed_from_u64(5);
        let mut placed = 0;
        for _ in 0..50 {
            if !avb.select(&Select::new(), &mut system, &mut rng) {
                continue;
            }
            perturb.perturb(&mut system, &mut avb, &mut rng, false, &mut Acceptance::default());
            let a = avb.anchor().first_position().unwrap();
            let m = avb.mobile().first_position().unwrap();
            let r = system.config().domain().displacement(&a, &m).norm();
            assert!(r >= 1.0 && r <= 1.5);
            perturb.finalize(&mut system);
            placed += 1;
        }
        assert!(placed > 0);
        assert!(system.check_cells());
    }

    #[test]
    #[should_panic(expected = "without a preceding perturb")]
    fn revert_without_perturb_panics() {
        let mut system = system(1);
        Perturb::new(PerturbKind::Beta { step: 0.1 }).revert(&mut system);
    }
}
