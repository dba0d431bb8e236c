use super::acceptance::Acceptance;
use super::criteria::Criteria;
use super::stage::TrialStage;
use crate::core::utils::random::Random;
use crate::engine::system::System;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Added to the log acceptance probability when a selection constraint fails after a move.
///
/// Large enough to reject in practice while keeping the attempt countable for tuning.
pub const CONSTRAINT_PENALTY_LN: f64 = -1.0e10;

/// Samples every stage in the old or new pass and accumulates energies and Rosenbluth weights.
///
/// A pass that draws no feasible outcome sets the reject flag, marks every mobile site physical
/// again and stops early.
pub fn compute_rosenbluth<R: Random + ?Sized>(
    old: bool,
    system: &mut System,
    acceptance: &mut Acceptance,
    stages: &mut [TrialStage],
    rng: &mut R,
) {
    for k in 0..stages.len() {
        stages[k].sample(old, system, acceptance, rng);
        let stage = &stages[k];
        let Some(profile) = stage.rosenbluth().chosen_profile().map(<[f64]>::to_vec) else {
            acceptance.set_reject(true);
            for stage in stages.iter() {
                stage.set_mobile_physical(system, true);
            }
            return;
        };
        let ln_total = stage.rosenbluth().ln_total();
        if old {
            acceptance.add_energy_old(&profile);
            acceptance.add_to_ln_metropolis_prob(-ln_total);
        } else {
            if !stage.is_constraint_satisfied(system) {
                acceptance.add_to_ln_metropolis_prob(CONSTRAINT_PENALTY_LN);
            }
            acceptance.add_energy_new(&profile);
            acceptance.add_to_ln_metropolis_prob(ln_total);
        }
    }
}

/// The ensemble a trial samples, which fixes the passes run and the extra acceptance terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialCompute {
    /// Canonical move: old and new passes.
    Move,
    /// Canonical move with a volume-bias selection; adds `ln(p_select)`.
    MoveAvb,
    /// Insertion from the ghost pool; new pass only.
    Add,
    AddAvb,
    /// Removal to the ghost pool; old pass only.
    Remove,
    RemoveAvb,
    /// Inverse temperature change; no sites move.
    Beta,
}

impl TrialCompute {
    /// Whether the first stage must be an insertion (`Some(true)`) or a removal (`Some(false)`).
    pub fn required_first_stage(self) -> Option<bool> {
        match self {
            TrialCompute::Add | TrialCompute::AddAvb => Some(true),
            TrialCompute::Remove | TrialCompute::RemoveAvb => Some(false),
            _ => None,
        }
    }

    pub fn perturb_and_acceptance<C: Criteria, R: Random + ?Sized>(
        self,
        criteria: &C,
        system: &mut System,
        acceptance: &mut Acceptance,
        stages: &mut [TrialStage],
        rng: &mut R,
    ) {
        let current = criteria.current_energy();
        let current_profile = criteria.current_profile().to_vec();
        match self {
            TrialCompute::Move | TrialCompute::MoveAvb => {
                compute_rosenbluth(true, system, acceptance, stages, rng);
                if acceptance.reject {
                    return;
                }
                for stage in stages.iter() {
                    stage.set_mobile_physical(system, false);
                }
                compute_rosenbluth(false, system, acceptance, stages, rng);
                acceptance.propose(current, &current_profile, true, true);
                if self == TrialCompute::MoveAvb {
                    acceptance.add_to_ln_metropolis_prob(first_selection_probability(stages).ln());
                }
            }
            TrialCompute::Add | TrialCompute::AddAvb => {
                compute_rosenbluth(false, system, acceptance, stages, rng);
                acceptance.propose(current, &current_profile, false, true);
                if acceptance.reject {
                    return;
                }
                if self == TrialCompute::Add {
                    add_ideal_terms(system, acceptance, stages);
                } else {
                    let t = first_particle_type(system, stages);
                    acceptance.add_to_ln_metropolis_prob(
                        first_selection_probability(stages).ln() + system.beta_mu(t),
                    );
                    acceptance.add_to_macrostate_shift(t, 1);
                }
            }
            TrialCompute::Remove | TrialCompute::RemoveAvb => {
                compute_rosenbluth(true, system, acceptance, stages, rng);
                acceptance.propose(current, &current_profile, true, false);
                if acceptance.reject {
                    return;
                }
                if self == TrialCompute::Remove {
                    remove_ideal_terms(system, acceptance, stages);
                } else {
                    let t = first_particle_type(system, stages);
                    acceptance.add_to_ln_metropolis_prob(
                        first_selection_probability(stages).ln() - system.beta_mu(t),
                    );
                    acceptance.add_to_macrostate_shift(t, -1);
                }
            }
            TrialCompute::Beta => {
                let beta_old = system.beta();
                compute_rosenbluth(false, system, acceptance, stages, rng);
                let beta_new = system.beta();
                acceptance.propose(current, &current_profile, false, false);
                acceptance.ln_metropolis_prob = -(beta_new - beta_old) * current;
            }
        }
    }
}

fn first_selection_probability(stages: &[TrialStage]) -> f64 {
    stages.first().map_or(1.0, |stage| stage.select().probability())
}

fn first_particle_type(system: &System, stages: &[TrialStage]) -> usize {
    let Some(entry) = stages.first().and_then(|s| s.select().mobile().particles().first()) else {
        panic!("volume-bias exchange computed without a selected particle");
    };
    system.config().particle(entry.particle).type_id
}

/// Particle types of the particles added (or removed) by the insertion (or removal) stages.
fn exchanged_types(system: &System, stages: &[TrialStage], insertion: bool) -> Vec<usize> {
    stages
        .iter()
        .filter(|s| if insertion { s.perturb().is_insertion() } else { s.perturb().is_removal() })
        .flat_map(|s| s.select().mobile().particles().iter().map(|e| e.particle))
        .map(|p| system.config().particle(p).type_id)
        .collect()
}

/// `ln(V / N_i) + beta * mu` per inserted particle, with `N_i` the count once the `i`-th of
/// `m` insertions of the type is in place.
fn add_ideal_terms(system: &System, acceptance: &mut Acceptance, stages: &[TrialStage]) {
    let volume = system.config().domain().volume();
    let types = exchanged_types(system, stages, true);
    let mut totals: BTreeMap<usize, usize> = BTreeMap::new();
    for &t in &types {
        *totals.entry(t).or_default() += 1;
    }
    let mut seen: BTreeMap<usize, usize> = BTreeMap::new();
    for &t in &types {
        let i = {
            let count = seen.entry(t).or_default();
            *count += 1;
            *count
        };
        let count_after = system.config().num_particles_of_type(t);
        let n = count_after - totals[&t] + i;
        acceptance.add_to_ln_metropolis_prob((volume / n as f64).ln() + system.beta_mu(t));
        acceptance.add_to_macrostate_shift(t, 1);
    }
}

/// `-ln(V / N_i) - beta * mu` per removed particle, with `N_i` the count before the `i`-th
/// removal of the type.
fn remove_ideal_terms(system: &System, acceptance: &mut Acceptance, stages: &[TrialStage]) {
    let volume = system.config().domain().volume();
    let types = exchanged_types(system, stages, false);
    let mut seen: BTreeMap<usize, usize> = BTreeMap::new();
    for &t in &types {
        let i = {
            let count = seen.entry(t).or_default();
            *count += 1;
            *count
        };
        let count_before = acceptance.initial_counts.get(t).copied().unwrap_or(0);
        let n = count_before + 1 - i;
        acceptance.add_to_ln_metropolis_prob(-(volume / n as f64).ln() - system.beta_mu(t));
        acceptance.add_to_macrostate_shift(t, -1);
    }
}
