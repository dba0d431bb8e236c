//! The trial protocol: select, perturb, compute, accept, then finalize or revert.

pub mod acceptance;
pub mod compute;
pub mod criteria;
pub mod factory;
pub mod perturb;
pub mod rosenbluth;
pub mod select;
pub mod stage;
pub mod tunable;

use crate::core::utils::random::Random;
use crate::engine::checkpoint::Checkpoint;
use crate::engine::error::EngineError;
use crate::engine::system::System;
use acceptance::Acceptance;
use compute::TrialCompute;
use criteria::Criteria;
use serde::{Deserialize, Serialize};
use stage::TrialStage;
use tracing::{debug, trace};

/// A Monte Carlo move made of one or more stages and the ensemble it samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    name: String,
    weight: f64,
    stages: Vec<TrialStage>,
    compute: TrialCompute,
    num_attempts: u64,
    num_success: u64,
    num_auto_reject: u64,
    tune_attempts: u64,
    tune_success: u64,
    tune_auto_reject: u64,
    #[serde(skip)]
    acceptance: Acceptance,
}

impl Trial {
    pub fn new(name: &str, compute: TrialCompute) -> Self {
        Self {
            name: name.to_string(),
            weight: 1.0,
            stages: Vec::new(),
            compute,
            num_attempts: 0,
            num_success: 0,
            num_auto_reject: 0,
            tune_attempts: 0,
            tune_success: 0,
            tune_auto_reject: 0,
            acceptance: Acceptance::default(),
        }
    }

    pub fn with_stage(mut self, stage: TrialStage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn compute(&self) -> TrialCompute {
        self.compute
    }

    pub fn stages(&self) -> &[TrialStage] {
        &self.stages
    }

    /// The bookkeeping of the most recent attempt.
    pub fn acceptance(&self) -> &Acceptance {
        &self.acceptance
    }

    pub fn num_attempts(&self) -> u64 {
        self.num_attempts
    }

    pub fn num_success(&self) -> u64 {
        self.num_success
    }

    pub fn num_auto_rejects(&self) -> u64 {
        self.num_auto_reject
    }

    pub fn acceptance_rate(&self) -> Option<f64> {
        (self.num_attempts > 0).then(|| self.num_success as f64 / self.num_attempts as f64)
    }

    /// Resolves names and validates every stage against the system.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] when the trial has no stages, a non-positive
    /// weight, or a first stage that does not match its ensemble, and propagates stage errors.
    pub fn precompute(&mut self, system: &System) -> Result<(), EngineError> {
        if self.stages.is_empty() {
            return Err(EngineError::Configuration(format!(
                "trial '{}' has no stages",
                self.name
            )));
        }
        if !(self.weight > 0.0) {
            return Err(EngineError::Configuration(format!(
                "trial '{}' has non-positive weight {}",
                self.name, self.weight
            )));
        }
        if let Some(insertion) = self.compute.required_first_stage() {
            let first = self.stages[0].perturb();
            let ok = if insertion { first.is_insertion() } else { first.is_removal() };
            if !ok {
                return Err(EngineError::Configuration(format!(
                    "trial '{}' computes {:?} but its first stage does not match",
                    self.name, self.compute
                )));
            }
        }
        for stage in &mut self.stages {
            stage.precompute(system)?;
        }
        debug!(trial = %self.name, stages = self.stages.len(), "Trial precomputed.");
        Ok(())
    }

    /// Runs one complete attempt and returns whether it was accepted.
    pub fn attempt<C: Criteria, R: Random + ?Sized>(
        &mut self,
        criteria: &mut C,
        system: &mut System,
        rng: &mut R,
    ) -> bool {
        criteria.begin_attempt();
        let counts = (0..system.config().num_particle_types())
            .map(|t| system.config().num_particles_of_type(t))
            .collect();
        self.acceptance.reset(system.num_potentials(), counts);
        self.num_attempts += 1;
        self.tune_attempts += 1;

        let mut num_selected = 0;
        for stage in &mut self.stages {
            if !stage.select_candidates(&self.acceptance.perturbed, system, rng) {
                self.acceptance.set_reject(true);
                break;
            }
            self.acceptance.perturbed.merge(stage.select().mobile());
            num_selected += 1;
        }
        if !self.acceptance.reject {
            for stage in &self.stages {
                stage.set_mobile_physical(system, false);
            }
            self.compute.perturb_and_acceptance(
                criteria,
                system,
                &mut self.acceptance,
                &mut self.stages,
                rng,
            );
        }
        if self.acceptance.reject {
            self.num_auto_reject += 1;
            self.tune_auto_reject += 1;
        }

        let accepted = criteria.is_accepted(&self.acceptance, system, rng);
        if accepted {
            for stage in self.stages.iter_mut().rev() {
                stage.finalize(system);
            }
            system.finalize(&self.acceptance.perturbed);
            self.num_success += 1;
            self.tune_success += 1;
        } else {
            for stage in self.stages.iter_mut().rev() {
                stage.revert(system);
            }
            system.revert(&self.acceptance.perturbed);
        }
        for stage in &self.stages[..num_selected] {
            stage.set_mobile_physical(system, true);
        }
        trace!(trial = %self.name, accepted, "Trial attempt finished.");
        accepted
    }

    /// Adjusts tunable amplitudes from the acceptance ratio since the last call, not counting
    /// auto-rejected attempts, and restarts the window.
    pub fn tune(&mut self) {
        let counted = self.tune_attempts - self.tune_auto_reject;
        if counted > 0 {
            let rate = self.tune_success as f64 / counted as f64;
            for stage in &mut self.stages {
                stage.tune(rate);
            }
            debug!(trial = %self.name, rate, "Trial tuned.");
        }
        self.tune_attempts = 0;
        self.tune_success = 0;
        self.tune_auto_reject = 0;
    }
}

impl Checkpoint for Trial {
    const KIND: &'static str = "trial";
    const VERSION: u32 = 571;
}

#[cfg(test)]
mod tests {
    use super::compute::CONSTRAINT_PENALTY_LN;
    use super::criteria::{CriteriaState, Metropolis};
    use super::factory;
    use super::factory::TrialArgs;
    use super::*;
    use crate::core::models::configuration::Configuration;
    use crate::core::models::domain::Domain;
    use crate::core::models::particle::{ParticleType, SiteTemplate};
    use crate::core::potential::neighbor::NeighborCriteria;
    use crate::core::potential::params::{ModelParams, SiteTypeParams};
    use crate::core::potential::potentials::{HardSphere, IdealGas, LennardJones};
    use crate::core::potential::PairPotential;
    use crate::engine::energy_map::{EnergyMapAll, EnergyMapKind};
    use crate::engine::system::{Potential, ThermoParams};
    use nalgebra::Point3;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256StarStar;
    use std::sync::Arc;

    /// Rejects every attempt after it has been fully computed.
    #[derive(Default)]
    struct RejectAll {
        energy: f64,
        profile: Vec<f64>,
        state: CriteriaState,
    }

    impl Criteria for RejectAll {
        fn begin_attempt(&mut self) {
            self.state = CriteriaState::Pending;
        }

        fn is_accepted<R: Random + ?Sized>(
            &mut self,
            _: &Acceptance,
            _: &System,
            _: &mut R,
        ) -> bool {
            self.state = CriteriaState::Resolved { accepted: false };
            false
        }

        fn current_energy(&self) -> f64 {
            self.energy
        }

        fn current_profile(&self) -> &[f64] {
            &self.profile
        }

        fn set_current_energy(&mut self, energy: f64, profile: Vec<f64>) {
            self.energy = energy;
            self.profile = profile;
        }

        fn state(&self) -> CriteriaState {
            self.state
        }
    }

    struct Setup {
        side: f64,
        particles: Vec<Point3<f64>>,
        sites: usize,
        model: Arc<dyn PairPotential>,
        sigma: f64,
        cutoff: f64,
        cells: bool,
        map: bool,
        beta_mu: f64,
    }

    impl Default for Setup {
        fn default() -> Self {
            Self {
                side: 10.0,
                particles: Vec::new(),
                sites: 1,
                model: Arc::new(IdealGas),
                sigma: 1.0,
                cutoff: 2.5,
                cells: false,
                map: false,
                beta_mu: 0.0,
            }
        }
    }

    impl Setup {
        fn build(self) -> System {
            let mut config = Configuration::new(Domain::cubic(self.side, 3).unwrap());
            let a = config.add_site_type("A");
            let mut molecule = ParticleType::new("mol");
            for s in 0..self.sites {
                let position = Point3::new(0.9 * s as f64, 0.0, 0.0);
                molecule = molecule.with_site(SiteTemplate::new(a, position));
                if s > 0 {
                    molecule = molecule.with_bond(s - 1, s);
                }
            }
            config.add_particle_type(molecule.clone());
            config.add_particle_type(ParticleType { name: "alt".to_string(), ..molecule });
            for origin in &self.particles {
                config.add_particle(0, origin);
            }
            let params =
                ModelParams::new(vec![SiteTypeParams::new("A", self.sigma, 1.0, self.cutoff)]);
            let mut system = System::new(config, params);
            let mut potential = Potential::new("model", self.model);
            if self.cells {
                potential = potential.with_cell_list(None);
            }
            if self.map {
                potential = potential.with_energy_map(EnergyMapKind::All(EnergyMapAll::new()));
            }
            system.add_potential(potential);
            system.add_neighbor_criteria(NeighborCriteria::new(1.0, 1.5));
            system.set_thermo(
                ThermoParams::new(1.0)
                    .with_chemical_potential(0, self.beta_mu)
                    .with_chemical_potential(1, self.beta_mu),
            );
            system.precompute().unwrap();
            system
        }
    }

    fn lattice(n: usize, spacing: f64) -> Vec<Point3<f64>> {
        let per_side = (n as f64).cbrt().ceil() as usize;
        (0..n)
            .map(|i| {
                let (x, y, z) = (
                    i % per_side,
                    (i / per_side) % per_side,
                    i / (per_side * per_side),
                );
                Point3::new(x as f64, y as f64, z as f64) * spacing - nalgebra::Vector3::repeat(4.0)
            })
            .collect()
    }

    fn start<C: Criteria>(system: &mut System, criteria: &mut C) {
        let (energy, profile) = system.full_energy();
        criteria.set_current_energy(energy, profile);
    }

    fn trial(name: &str, args: TrialArgs) -> Trial {
        let build = match name {
            "translate" => factory::translate,
            "rotate" => factory::rotate,
            "add" => factory::add,
            "remove" => factory::remove,
            "avb_in" => factory::avb_in,
            "add_avb" => factory::add_avb,
            "remove_avb" => factory::remove_avb,
            "particle_type_swap" => factory::particle_type_swap,
            "bond_pivot" => factory::bond_pivot,
            "beta" => factory::beta,
            _ => panic!("unknown test trial {name}"),
        };
        build(&args).unwrap()
    }

    #[test]
    fn rejected_attempts_restore_every_cache_bit_for_bit() {
        let kinds = [
            ("translate", TrialArgs::default()),
            ("rotate", TrialArgs::default()),
            ("add", TrialArgs::for_particle_type("mol")),
            ("add", TrialArgs { num_steps: Some(4), ..TrialArgs::for_particle_type("mol") }),
            ("remove", TrialArgs { num_steps: Some(3), ..TrialArgs::for_particle_type("mol") }),
            ("avb_in", TrialArgs::volume_bias("mol", 0)),
            ("add_avb", TrialArgs::volume_bias("mol", 0)),
            ("remove_avb", TrialArgs::volume_bias("mol", 0)),
            ("bond_pivot", TrialArgs::for_particle_type("mol")),
            (
                "particle_type_swap",
                TrialArgs {
                    swap: Some(["mol".to_string(), "alt".to_string()]),
                    ..TrialArgs::default()
                },
            ),
            ("beta", TrialArgs { beta_step: Some(0.2), ..TrialArgs::default() }),
        ];
        for (name, args) in kinds {
            let mut system = Setup {
                particles: lattice(27, 1.1),
                sites: 2,
                model: Arc::new(LennardJones),
                side: 12.0,
                cells: true,
                map: true,
                ..Setup::default()
            }
            .build();
            system.ensure_ghost(0);
            let mut criteria = RejectAll::default();
            start(&mut system, &mut criteria);
            let mut trial = trial(name, args);
            trial.precompute(&system).unwrap();
            let mut rng = Xoshiro256StarStar::seed_from_u64(11);
            for _ in 0..20 {
                let config = system.config().clone();
                let cells = system.cell_indices().to_vec();
                let map = system.potential(0).energy_map().cloned();
                let beta = system.beta();
                assert!(!trial.attempt(&mut criteria, &mut system, &mut rng));
                assert_eq!(system.config(), &config, "{name}: configuration changed");
                assert_eq!(system.cell_indices(), cells.as_slice(), "{name}: cells changed");
                assert_eq!(system.potential(0).energy_map().cloned(), map, "{name}: map changed");
                assert_eq!(system.beta(), beta, "{name}: beta changed");
            }
            assert!(system.check_cells());
        }
    }

    #[test]
    fn hard_overlap_is_rejected_and_leaves_the_system_unchanged() {
        let mut system = Setup {
            side: 12.0,
            particles: vec![Point3::origin(), Point3::new(3.05, 0.0, 0.0)],
            model: Arc::new(HardSphere),
            sigma: 3.0,
            cutoff: 3.0,
            cells: true,
            map: true,
            ..Setup::default()
        }
        .build();
        let mut criteria = Metropolis::new();
        start(&mut system, &mut criteria);
        let mut trial = trial(
            "translate",
            TrialArgs {
                tunable: Some(1.0),
                tunable_min: Some(1.0),
                tunable_max: Some(1.0),
                ..TrialArgs::default()
            },
        );
        trial.precompute(&system).unwrap();
        let mut rng = Xoshiro256StarStar::seed_from_u64(5);
        let mut rejected = 0;
        for _ in 0..200 {
            let config = system.config().clone();
            let cells = system.cell_indices().to_vec();
            let map = system.potential(0).energy_map().cloned();
            if !trial.attempt(&mut criteria, &mut system, &mut rng) {
                rejected += 1;
                assert!(trial.acceptance().energy_new >= 1.0e29);
                assert_eq!(system.config(), &config);
                assert_eq!(system.cell_indices(), cells.as_slice());
                assert_eq!(system.potential(0).energy_map().cloned(), map);
            }
            assert_eq!(criteria.current_energy(), 0.0);
        }
        assert!(rejected > 0);
        assert_eq!(system.brute_force_energy().0, 0.0);
    }

    #[test]
    fn translation_samples_the_domain_uniformly() {
        let mut system = Setup {
            side: 8.0,
            particles: vec![Point3::origin()],
            sites: 2,
            ..Setup::default()
        }
        .build();
        let mut criteria = Metropolis::new();
        start(&mut system, &mut criteria);
        let mut trial = trial(
            "translate",
            TrialArgs {
                tunable: Some(4.0),
                tunable_min: Some(4.0),
                tunable_max: Some(4.0),
                ..TrialArgs::default()
            },
        );
        trial.precompute(&system).unwrap();
        let mut rng = Xoshiro256StarStar::seed_from_u64(2024);
        let n = 100_000;
        let mut samples: Vec<f64> = (0..n)
            .map(|_| {
                assert!(trial.attempt(&mut criteria, &mut system, &mut rng));
                system.config().site(0, 0).position.x
            })
            .collect();
        samples.sort_by(f64::total_cmp);
        let statistic = samples
            .iter()
            .enumerate()
            .map(|(i, &x)| {
                let cdf = (x + 4.0) / 8.0;
                (cdf - i as f64 / n as f64).abs().max(((i + 1) as f64 / n as f64 - cdf).abs())
            })
            .fold(0.0, f64::max);
        assert!(statistic < 1.95 / (n as f64).sqrt(), "KS statistic {statistic}");
    }

    fn ideal_gas_average(num_steps: usize, attempts: usize, seed: u64) -> f64 {
        let beta_mu = (10.0f64 / 125.0).ln();
        let mut system = Setup {
            side: 5.0,
            beta_mu,
            ..Setup::default()
        }
        .build();
        let mut criteria = Metropolis::new();
        start(&mut system, &mut criteria);
        let args = TrialArgs {
            num_steps: Some(num_steps),
            ..TrialArgs::for_particle_type("mol")
        };
        let mut trials = [trial("add", args.clone()), trial("remove", args)];
        for trial in &mut trials {
            trial.precompute(&system).unwrap();
        }
        let mut rng = Xoshiro256StarStar::seed_from_u64(seed);
        let mut total = 0usize;
        let mut samples = 0usize;
        for i in 0..attempts {
            let k = usize::from(rng.coin_flip());
            trials[k].attempt(&mut criteria, &mut system, &mut rng);
            if i >= attempts / 10 {
                total += system.config().num_particles_of_type(0);
                samples += 1;
            }
        }
        total as f64 / samples as f64
    }

    #[test]
    fn grand_canonical_ideal_gas_matches_v_exp_beta_mu() {
        let average = ideal_gas_average(1, 200_000, 7);
        assert!((average - 10.0).abs() < 1.0, "average N = {average}");
    }

    #[test]
    fn ideal_gas_average_is_independent_of_rosenbluth_steps() {
        let average = ideal_gas_average(4, 100_000, 8);
        assert!((average - 10.0).abs() < 1.0, "average N = {average}");
    }

    #[test]
    fn constraint_penalty_is_folded_once_for_insertions_and_moves() {
        for name in ["add_avb", "avb_in"] {
            let mut system = Setup {
                particles: lattice(8, 3.0),
                ..Setup::default()
            }
            .build();
            let mut criteria = Metropolis::new();
            start(&mut system, &mut criteria);
            let mut trial = trial(
                name,
                TrialArgs {
                    max_anchor_distance: Some(0.5),
                    ..TrialArgs::volume_bias("mol", 0)
                },
            );
            trial.precompute(&system).unwrap();
            let mut rng = Xoshiro256StarStar::seed_from_u64(13);
            let mut checked = 0;
            for _ in 0..50 {
                assert!(!trial.attempt(&mut criteria, &mut system, &mut rng));
                let acceptance = trial.acceptance();
                if acceptance.reject {
                    continue;
                }
                let ln = acceptance.ln_metropolis_prob;
                assert!(
                    ln < 0.5 * CONSTRAINT_PENALTY_LN && ln > 1.5 * CONSTRAINT_PENALTY_LN,
                    "{name}: ln = {ln}"
                );
                checked += 1;
            }
            assert!(checked > 0, "{name}: no attempt reached the compute step");
        }
    }

    #[test]
    fn tuning_ignores_auto_rejects_and_follows_acceptance() {
        let mut system = Setup {
            particles: vec![Point3::origin()],
            ..Setup::default()
        }
        .build();
        let mut criteria = Metropolis::new();
        start(&mut system, &mut criteria);
        let mut translate = trial(
            "translate",
            TrialArgs {
                tunable: Some(1.0),
                tunable_min: Some(0.1),
                tunable_max: Some(2.0),
                ..TrialArgs::default()
            },
        );
        translate.precompute(&system).unwrap();
        let mut rng = Xoshiro256StarStar::seed_from_u64(1);
        for _ in 0..100 {
            translate.attempt(&mut criteria, &mut system, &mut rng);
        }
        translate.tune();
        let value = translate.stages()[0].perturb().tunable().unwrap().value();
        assert!((value - 1.05).abs() < 1e-12);

        let mut empty = trial(
            "translate",
            TrialArgs {
                tunable: Some(1.0),
                tunable_min: Some(0.1),
                tunable_max: Some(2.0),
                ..TrialArgs::for_particle_type("alt")
            },
        );
        empty.precompute(&system).unwrap();
        for _ in 0..10 {
            assert!(!empty.attempt(&mut criteria, &mut system, &mut rng));
        }
        assert_eq!(empty.num_auto_rejects(), 10);
        empty.tune();
        assert_eq!(empty.stages()[0].perturb().tunable().unwrap().value(), 1.0);
    }

    #[test]
    fn add_trial_requires_an_insertion_first_stage() {
        let system = Setup::default().build();
        let mut bad = Trial::new("bad", TrialCompute::Add).with_stage(TrialStage::new(
            select::TrialSelect::new(select::SelectPolicy::Nothing),
            perturb::Perturb::new(perturb::PerturbKind::Beta { step: 0.1 }),
        ));
        assert!(matches!(bad.precompute(&system), Err(EngineError::Configuration(_))));
        assert!(matches!(
            Trial::new("empty", TrialCompute::Move).precompute(&system),
            Err(EngineError::Configuration(_))
        ));
    }

    #[test]
    fn trial_checkpoint_round_trips_statistics() {
        let mut system = Setup {
            particles: vec![Point3::origin()],
            ..Setup::default()
        }
        .build();
        let mut criteria = Metropolis::new();
        start(&mut system, &mut criteria);
        let mut original = trial("translate", TrialArgs::default());
        original.precompute(&system).unwrap();
        let mut rng = Xoshiro256StarStar::seed_from_u64(1);
        for _ in 0..5 {
            original.attempt(&mut criteria, &mut system, &mut rng);
        }
        let restored = Trial::from_checkpoint(&original.to_checkpoint().unwrap()).unwrap();
        assert_eq!(restored.num_attempts(), 5);
        assert_eq!(restored.name(), "translate");
        assert_eq!(restored.stages().len(), 1);
    }
}
