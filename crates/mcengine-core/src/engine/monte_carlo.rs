use super::checkpoint::{Checkpoint, Versioned};
use super::error::EngineError;
use super::registry::Registry;
use super::system::{System, SystemState};
use super::trial::Trial;
use super::trial::criteria::{Criteria, Metropolis};
use rand::SeedableRng;
use rand::distributions::{Distribution, WeightedIndex};
use rand_xoshiro::Xoshiro256StarStar;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Difference between the running energy kept by the criteria and a from-scratch recomputation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyDrift {
    pub tracked: f64,
    pub recomputed: f64,
}

impl EnergyDrift {
    pub fn absolute(&self) -> f64 {
        (self.tracked - self.recomputed).abs()
    }

    /// Drift relative to `max(1, |recomputed|)`.
    pub fn relative(&self) -> f64 {
        self.absolute() / self.recomputed.abs().max(1.0)
    }
}

/// Chooses among weighted trials with one seeded random stream and applies them to a system.
#[derive(Debug, Clone)]
pub struct MonteCarlo<C: Criteria = Metropolis> {
    system: System,
    criteria: C,
    trials: Vec<Trial>,
    rng: Xoshiro256StarStar,
    chooser: Option<WeightedIndex<f64>>,
    num_attempts: u64,
}

impl<C: Criteria> MonteCarlo<C> {
    pub fn new(system: System, criteria: C, seed: u64) -> Self {
        Self {
            system,
            criteria,
            trials: Vec::new(),
            rng: Xoshiro256StarStar::seed_from_u64(seed),
            chooser: None,
            num_attempts: 0,
        }
    }

    /// Appends a trial. [`MonteCarlo::precompute`] must run again before the next attempt.
    pub fn add_trial(&mut self, trial: Trial) {
        self.trials.push(trial);
        self.chooser = None;
    }

    /// Prepares the system and every trial, builds the weighted trial chooser and computes the
    /// initial energy.
    ///
    /// # Errors
    ///
    /// Propagates system and trial validation errors, and returns
    /// [`EngineError::Configuration`] if there are no trials.
    pub fn precompute(&mut self) -> Result<(), EngineError> {
        self.system.precompute()?;
        self.prepare_trials()?;
        let (energy, profile) = self.system.full_energy();
        self.criteria.set_current_energy(energy, profile);
        info!(
            trials = self.trials.len(),
            energy,
            "Monte Carlo driver ready."
        );
        Ok(())
    }

    fn prepare_trials(&mut self) -> Result<(), EngineError> {
        if self.trials.is_empty() {
            return Err(EngineError::Configuration(
                "a Monte Carlo driver needs at least one trial".to_string(),
            ));
        }
        for trial in &mut self.trials {
            trial.precompute(&self.system)?;
        }
        let weights = self.trials.iter().map(Trial::weight);
        let chooser = WeightedIndex::new(weights)
            .map_err(|e| EngineError::Configuration(format!("invalid trial weights: {e}")))?;
        self.chooser = Some(chooser);
        Ok(())
    }

    /// Picks one trial by weight and runs it. Returns the trial index and whether it was
    /// accepted.
    ///
    /// # Panics
    ///
    /// Panics if [`MonteCarlo::precompute`] has not run since the last trial was added.
    pub fn step(&mut self) -> (usize, bool) {
        let Some(chooser) = &self.chooser else {
            panic!("MonteCarlo::step called before precompute");
        };
        let index = chooser.sample(&mut self.rng);
        let accepted =
            self.trials[index].attempt(&mut self.criteria, &mut self.system, &mut self.rng);
        self.num_attempts += 1;
        (index, accepted)
    }

    /// Runs `num_attempts` weighted attempts and returns how many were accepted.
    pub fn attempt(&mut self, num_attempts: u64) -> u64 {
        let mut accepted = 0;
        for _ in 0..num_attempts {
            if self.step().1 {
                accepted += 1;
            }
        }
        accepted
    }

    pub fn tune_trials(&mut self) {
        for trial in &mut self.trials {
            trial.tune();
        }
    }

    /// Compares the running energy with an exhaustive recomputation that bypasses cell
    /// indices and energy maps.
    pub fn check_energy_drift(&self) -> EnergyDrift {
        let (recomputed, _) = self.system.brute_force_energy();
        let drift = EnergyDrift {
            tracked: self.criteria.current_energy(),
            recomputed,
        };
        debug!(
            tracked = drift.tracked,
            recomputed = drift.recomputed,
            "Energy drift checked."
        );
        drift
    }

    pub fn system(&self) -> &System {
        &self.system
    }

    pub fn criteria(&self) -> &C {
        &self.criteria
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    pub fn current_energy(&self) -> f64 {
        self.criteria.current_energy()
    }

    pub fn num_attempts(&self) -> u64 {
        self.num_attempts
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MonteCarloState {
    system: Versioned<SystemState>,
    criteria: Versioned<Metropolis>,
    trials: Vec<Versioned<Trial>>,
    rng: Xoshiro256StarStar,
    num_attempts: u64,
}

impl Checkpoint for MonteCarloState {
    const KIND: &'static str = "monte_carlo";
    const VERSION: u32 = 3;
}

impl MonteCarlo<Metropolis> {
    /// Serializes the complete driver state, random stream included, to JSON text.
    ///
    /// Restoring the text with [`MonteCarlo::restore`] and continuing gives the same attempt
    /// sequence as continuing this driver.
    pub fn checkpoint(&self) -> Result<String, EngineError> {
        let state = MonteCarloState {
            system: Versioned(self.system.to_state()),
            criteria: Versioned(self.criteria.clone()),
            trials: self.trials.iter().cloned().map(Versioned).collect(),
            rng: self.rng.clone(),
            num_attempts: self.num_attempts,
        };
        Ok(state.to_checkpoint()?)
    }

    /// Rebuilds a driver from [`MonteCarlo::checkpoint`] text, resolving pair models through
    /// `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Checkpoint`] on malformed text or any version mismatch, and
    /// [`EngineError::UnknownName`] if a stored pair model is not registered.
    pub fn restore(text: &str, registry: &Registry) -> Result<Self, EngineError> {
        let state = MonteCarloState::from_checkpoint(text)?;
        let mut restored = Self {
            system: System::from_state(state.system.into_inner(), registry)?,
            criteria: state.criteria.into_inner(),
            trials: state.trials.into_iter().map(Versioned::into_inner).collect(),
            rng: state.rng,
            chooser: None,
            num_attempts: state.num_attempts,
        };
        restored.prepare_trials()?;
        info!(
            attempts = restored.num_attempts,
            energy = restored.current_energy(),
            "Monte Carlo driver restored from checkpoint."
        );
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::potential::params::SiteTypeParams;
    use crate::engine::checkpoint::CheckpointError;
    use crate::engine::config::{
        EnergyMapChoice, ParticleTypeConfig, ParticlesConfig, PotentialConfig, SimulationConfig,
        SimulationConfigBuilder, SiteConfig,
    };
    use crate::engine::setup::build_monte_carlo;
    use crate::engine::trial::factory::TrialArgs;

    fn lj_config(seed: u64) -> SimulationConfig {
        SimulationConfigBuilder::new()
            .seed(seed)
            .side_lengths(vec![10.0, 10.0, 10.0])
            .chemical_potential("lj", -3.0)
            .site_type(SiteTypeParams::new("A", 1.0, 1.0, 2.5))
            .particle_type(ParticleTypeConfig {
                name: "lj".to_string(),
                sites: vec![SiteConfig {
                    site_type: "A".to_string(),
                    position: [0.0; 3],
                    orientation: None,
                }],
                bonds: Vec::new(),
            })
            .particles(ParticlesConfig {
                particle_type: "lj".to_string(),
                positions: Vec::new(),
                count: 27,
            })
            .potential(PotentialConfig {
                model: "lennard_jones".to_string(),
                cell_list: true,
                cell_min_length: None,
                energy_map: EnergyMapChoice::Neighbor,
                energy_map_gate: None,
            })
            .trial(
                "translate",
                TrialArgs {
                    tunable: Some(0.5),
                    weight: Some(4.0),
                    ..TrialArgs::for_particle_type("lj")
                },
            )
            .trial("add", TrialArgs::for_particle_type("lj"))
            .trial("remove", TrialArgs::for_particle_type("lj"))
            .build()
            .unwrap()
    }

    fn driver(seed: u64) -> MonteCarlo {
        build_monte_carlo(&lj_config(seed), &Registry::with_defaults()).unwrap()
    }

    #[test]
    fn same_seed_gives_the_same_run() {
        let mut a = driver(11);
        let mut b = driver(11);
        let outcomes_a: Vec<_> = (0..1500).map(|_| a.step()).collect();
        let outcomes_b: Vec<_> = (0..1500).map(|_| b.step()).collect();
        assert_eq!(outcomes_a, outcomes_b);
        assert_eq!(a.current_energy().to_bits(), b.current_energy().to_bits());
        assert_eq!(a.system().config(), b.system().config());
    }

    #[test]
    fn tracked_energy_matches_recomputation_with_cells_and_maps() {
        let mut mc = driver(5);
        assert!(mc.system().cell_indices()[0].is_enabled());
        let accepted = mc.attempt(3000);
        assert!(accepted > 0);
        assert!(mc.system().check_cells());
        let drift = mc.check_energy_drift();
        assert!(drift.relative() < 1e-9, "drift {drift:?}");
    }

    #[test]
    fn restored_checkpoint_continues_identically() {
        let mut original = driver(23);
        original.attempt(600);
        let text = original.checkpoint().unwrap();
        let mut restored = MonteCarlo::restore(&text, &Registry::with_defaults()).unwrap();
        assert_eq!(restored.num_attempts(), 600);

        let continued: Vec<_> = (0..600).map(|_| original.step()).collect();
        let replayed: Vec<_> = (0..600).map(|_| restored.step()).collect();
        assert_eq!(continued, replayed);
        assert_eq!(
            original.current_energy().to_bits(),
            restored.current_energy().to_bits()
        );
        assert_eq!(original.system().config(), restored.system().config());
        for (a, b) in original.trials().iter().zip(restored.trials()) {
            assert_eq!(a.num_success(), b.num_success());
        }
    }

    #[test]
    fn checkpoint_version_mismatch_is_rejected() {
        let mut mc = driver(3);
        mc.attempt(50);
        let text = mc.checkpoint().unwrap();
        let registry = Registry::with_defaults();

        let mut outer: serde_json::Value = serde_json::from_str(&text).unwrap();
        outer["version"] = serde_json::json!(2);
        match MonteCarlo::restore(&outer.to_string(), &registry) {
            Err(EngineError::Checkpoint {
                source: CheckpointError::VersionMismatch { found, .. },
            }) => assert_eq!(found, 2),
            other => panic!("expected a version mismatch, got {other:?}"),
        }

        let mut nested: serde_json::Value = serde_json::from_str(&text).unwrap();
        nested["state"]["trials"][0]["version"] = serde_json::json!(570);
        let err = MonteCarlo::restore(&nested.to_string(), &registry).unwrap_err();
        assert!(err.to_string().contains("unsupported trial version 570"));
    }

    #[test]
    fn unknown_model_in_checkpoint_is_reported() {
        let mc = driver(3);
        let text = mc.checkpoint().unwrap();
        let err = MonteCarlo::restore(&text, &Registry::new()).unwrap_err();
        assert!(matches!(err, EngineError::UnknownName { kind: "pair model", .. }));
    }

    #[test]
    #[should_panic(expected = "before precompute")]
    fn stepping_without_precompute_panics() {
        let mut mc = driver(1);
        mc.add_trial(Trial::new("late", crate::engine::trial::compute::TrialCompute::Move));
        mc.step();
    }
}
