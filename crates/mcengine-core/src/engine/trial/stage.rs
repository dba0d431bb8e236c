use super::acceptance::Acceptance;
use super::perturb::Perturb;
use super::rosenbluth::Rosenbluth;
use super::select::TrialSelect;
use crate::core::models::select::Select;
use crate::core::utils::random::Random;
use crate::engine::error::EngineError;
use crate::engine::system::{EnergyMode, System};
use serde::{Deserialize, Serialize};

/// One selector and one perturbation, sampled over `num_steps` Rosenbluth steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialStage {
    select: TrialSelect,
    perturb: Perturb,
    rosenbluth: Rosenbluth,
}

impl TrialStage {
    pub fn new(select: TrialSelect, perturb: Perturb) -> Self {
        Self {
            select,
            perturb,
            rosenbluth: Rosenbluth::new(1),
        }
    }

    pub fn with_num_steps(mut self, num_steps: usize) -> Self {
        self.rosenbluth = Rosenbluth::new(num_steps);
        self
    }

    pub fn select(&self) -> &TrialSelect {
        &self.select
    }

    pub fn perturb(&self) -> &Perturb {
        &self.perturb
    }

    pub fn perturb_mut(&mut self) -> &mut Perturb {
        &mut self.perturb
    }

    pub fn rosenbluth(&self) -> &Rosenbluth {
        &self.rosenbluth
    }

    pub fn precompute(&mut self, system: &System) -> Result<(), EngineError> {
        self.select.precompute(system)?;
        self.perturb.precompute(system)
    }

    pub fn select_candidates<R: Random + ?Sized>(
        &mut self,
        perturbed: &Select,
        system: &mut System,
        rng: &mut R,
    ) -> bool {
        self.select.select(perturbed, system, rng)
    }

    /// Runs every Rosenbluth step of this stage and leaves the system in the sampled state.
    ///
    /// Step 0 of the old pass holds the current positions. A single-step new pass stages its
    /// energy map entries directly; otherwise the steps are probed and the outcome that survives
    /// (step 0 when old, the chosen step when new) is written back and, for the new pass,
    /// staged once.
    pub fn sample<R: Random + ?Sized>(
        &mut self,
        old: bool,
        system: &mut System,
        acceptance: &mut Acceptance,
        rng: &mut R,
    ) {
        self.rosenbluth.reset();
        let num_steps = self.rosenbluth.num_steps();
        let mode = if num_steps == 1 && !old {
            EnergyMode::Stage
        } else {
            EnergyMode::Probe
        };
        for step in 0..num_steps {
            let held = old && step == 0;
            self.perturb
                .perturb(system, &mut self.select, rng, held, acceptance);
            if step == 0 {
                system.set_physical(self.select.mobile(), true);
            }
            let profile = system.perturbed_energy(self.select.mobile(), mode);
            self.rosenbluth.store(profile, self.select.mobile().clone());
        }
        self.rosenbluth.compute(system.beta(), old, rng);
        if num_steps == 1 {
            return;
        }
        let survivor = if old { Some(0) } else { self.rosenbluth.chosen() };
        if let Some(step) = survivor {
            let positions = self.rosenbluth.stored(step).clone();
            system.set_positions(&positions);
            *self.select.mobile_mut() = positions;
            if !old {
                system.perturbed_energy(self.select.mobile(), EnergyMode::Stage);
            }
        }
    }

    pub fn is_constraint_satisfied(&self, system: &System) -> bool {
        self.select.is_constraint_satisfied(system)
    }

    pub fn set_mobile_physical(&self, system: &mut System, physical: bool) {
        system.set_physical(self.select.mobile(), physical);
    }

    pub fn finalize(&mut self, system: &mut System) {
        self.perturb.finalize(system);
    }

    /// Reverts the perturbation if one was recorded in this attempt.
    pub fn revert(&mut self, system: &mut System) {
        if self.perturb.revert_possible() {
            self.perturb.revert(system);
        }
    }

    pub fn tune(&mut self, acceptance_rate: f64) {
        if let Some(tunable) = self.perturb.tunable_mut() {
            tunable.tune(acceptance_rate);
        }
    }
}
