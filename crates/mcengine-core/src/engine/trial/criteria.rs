use super::acceptance::Acceptance;
use crate::core::utils::random::Random;
use crate::engine::checkpoint::Checkpoint;
use crate::engine::system::System;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Whether the current attempt has been decided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CriteriaState {
    #[default]
    Pending,
    Resolved { accepted: bool },
}

/// A hard limit on the macrostate reached by an accepted move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constraint {
    NumParticles {
        particle_type: usize,
        min: Option<usize>,
        max: Option<usize>,
    },
    EqualCounts {
        particle_type_a: usize,
        particle_type_b: usize,
    },
}

impl Constraint {
    /// Whether the particle counts after the move satisfy the constraint.
    pub fn is_allowed(&self, acceptance: &Acceptance) -> bool {
        match *self {
            Constraint::NumParticles {
                particle_type,
                min,
                max,
            } => {
                let count = acceptance.proposed_count(particle_type);
                min.is_none_or(|min| count >= min as i64)
                    && max.is_none_or(|max| count <= max as i64)
            }
            Constraint::EqualCounts {
                particle_type_a,
                particle_type_b,
            } => {
                acceptance.proposed_count(particle_type_a)
                    == acceptance.proposed_count(particle_type_b)
            }
        }
    }
}

/// Decides whether an attempt is accepted and tracks the running energy of the system.
pub trait Criteria {
    /// Moves the state machine back to pending at the start of an attempt.
    fn begin_attempt(&mut self);

    fn is_accepted<R: Random + ?Sized>(
        &mut self,
        acceptance: &Acceptance,
        system: &System,
        rng: &mut R,
    ) -> bool;

    fn current_energy(&self) -> f64;

    fn current_profile(&self) -> &[f64];

    fn set_current_energy(&mut self, energy: f64, profile: Vec<f64>);

    fn state(&self) -> CriteriaState;
}

/// The Metropolis criterion with optional hard macrostate constraints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metropolis {
    current_energy: f64,
    current_profile: Vec<f64>,
    constraints: Vec<Constraint>,
    #[serde(skip)]
    state: CriteriaState,
}

impl Metropolis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }
}

impl Criteria for Metropolis {
    fn begin_attempt(&mut self) {
        self.state = CriteriaState::Pending;
    }

    fn is_accepted<R: Random + ?Sized>(
        &mut self,
        acceptance: &Acceptance,
        _system: &System,
        rng: &mut R,
    ) -> bool {
        let accepted = if acceptance.reject {
            false
        } else if !self.constraints.iter().all(|c| c.is_allowed(acceptance)) {
            trace!("Macrostate constraint violated; rejected.");
            false
        } else {
            let ln_prob = acceptance.ln_metropolis_prob;
            ln_prob >= 0.0 || rng.uniform() < ln_prob.exp()
        };
        if accepted {
            self.current_energy = acceptance.energy_proposed;
            self.current_profile.clone_from(&acceptance.profile_proposed);
        }
        trace!(
            accepted,
            ln_prob = acceptance.ln_metropolis_prob,
            energy = self.current_energy,
            "Attempt resolved."
        );
        self.state = CriteriaState::Resolved { accepted };
        accepted
    }

    fn current_energy(&self) -> f64 {
        self.current_energy
    }

    fn current_profile(&self) -> &[f64] {
        &self.current_profile
    }

    fn set_current_energy(&mut self, energy: f64, profile: Vec<f64>) {
        self.current_energy = energy;
        self.current_profile = profile;
    }

    fn state(&self) -> CriteriaState {
        self.state
    }
}

impl Checkpoint for Metropolis {
    const KIND: &'static str = "metropolis";
    const VERSION: u32 = 1101;
}
