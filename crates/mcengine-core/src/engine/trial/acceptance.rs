use crate::core::models::select::Select;

/// Everything one attempt accumulates for the acceptance decision.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Acceptance {
    /// Energy of the perturbed sites before the move.
    pub energy_old: f64,
    /// Energy of the perturbed sites after the move.
    pub energy_new: f64,
    pub profile_old: Vec<f64>,
    pub profile_new: Vec<f64>,
    /// Total energy of the system if the move is accepted.
    pub energy_proposed: f64,
    pub profile_proposed: Vec<f64>,
    pub ln_metropolis_prob: f64,
    /// Hard auto-reject set by selection or sampling.
    pub reject: bool,
    /// Signed particle count changes implied by the move, as `(particle type, delta)`.
    pub macrostate_shift: Vec<(usize, i64)>,
    /// Particle counts per type when the attempt began.
    pub initial_counts: Vec<usize>,
    /// Union of the mobile sites of every stage.
    pub perturbed: Select,
}

impl Acceptance {
    pub fn reset(&mut self, num_potentials: usize, initial_counts: Vec<usize>) {
        self.energy_old = 0.0;
        self.energy_new = 0.0;
        self.profile_old.clear();
        self.profile_old.resize(num_potentials, 0.0);
        self.profile_new.clear();
        self.profile_new.resize(num_potentials, 0.0);
        self.energy_proposed = 0.0;
        self.profile_proposed.clear();
        self.profile_proposed.resize(num_potentials, 0.0);
        self.ln_metropolis_prob = 0.0;
        self.reject = false;
        self.macrostate_shift.clear();
        self.initial_counts = initial_counts;
        self.perturbed.clear();
    }

    pub fn add_to_ln_metropolis_prob(&mut self, value: f64) {
        self.ln_metropolis_prob += value;
    }

    pub fn set_reject(&mut self, reject: bool) {
        self.reject = reject;
    }

    pub fn add_energy_old(&mut self, profile: &[f64]) {
        for (total, e) in self.profile_old.iter_mut().zip(profile) {
            *total += e;
        }
        self.energy_old += profile.iter().sum::<f64>();
    }

    pub fn add_energy_new(&mut self, profile: &[f64]) {
        for (total, e) in self.profile_new.iter_mut().zip(profile) {
            *total += e;
        }
        self.energy_new += profile.iter().sum::<f64>();
    }

    /// Sets the proposed total as `current - old + new`, term by term.
    pub fn propose(&mut self, current: f64, current_profile: &[f64], old: bool, new: bool) {
        let sign = |flag: bool| if flag { 1.0 } else { 0.0 };
        let (a, b) = (sign(old), sign(new));
        self.energy_proposed = current - a * self.energy_old + b * self.energy_new;
        self.profile_proposed = current_profile
            .iter()
            .enumerate()
            .map(|(k, &c)| {
                c - a * self.profile_old.get(k).copied().unwrap_or(0.0)
                    + b * self.profile_new.get(k).copied().unwrap_or(0.0)
            })
            .collect();
    }

    pub fn add_to_macrostate_shift(&mut self, particle_type: usize, delta: i64) {
        match self.macrostate_shift.iter_mut().find(|(t, _)| *t == particle_type) {
            Some((_, total)) => *total += delta,
            None => self.macrostate_shift.push((particle_type, delta)),
        }
    }

    pub fn shift_of(&self, particle_type: usize) -> i64 {
        self.macrostate_shift
            .iter()
            .find(|(t, _)| *t == particle_type)
            .map_or(0, |(_, d)| *d)
    }

    /// Particle count of a type if the move is accepted.
    pub fn proposed_count(&self, particle_type: usize) -> i64 {
        self.initial_counts.get(particle_type).copied().unwrap_or(0) as i64
            + self.shift_of(particle_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_every_accumulator() {
        let mut acceptance = Acceptance::default();
        acceptance.add_energy_new(&[1.0, 2.0]);
        acceptance.set_reject(true);
        acceptance.add_to_macrostate_shift(0, 1);
        acceptance.reset(2, vec![5]);
        assert_eq!(acceptance.energy_new, 0.0);
        assert_eq!(acceptance.profile_new, vec![0.0, 0.0]);
        assert!(!acceptance.reject);
        assert_eq!(acceptance.proposed_count(0), 5);
    }

    #[test]
    fn propose_combines_old_and_new_per_potential() {
        let mut acceptance = Acceptance::default();
        acceptance.reset(2, vec![]);
        acceptance.add_energy_old(&[1.0, -2.0]);
        acceptance.add_energy_new(&[0.5, -4.0]);
        acceptance.propose(10.0, &[4.0, 6.0], true, true);
        assert_eq!(acceptance.energy_proposed, 7.5);
        assert_eq!(acceptance.profile_proposed, vec![3.5, 4.0]);
        acceptance.propose(10.0, &[4.0, 6.0], false, true);
        assert_eq!(acceptance.energy_proposed, 6.5);
    }

    #[test]
    fn macrostate_shifts_accumulate_per_type() {
        let mut acceptance = Acceptance::default();
        acceptance.reset(1, vec![3, 1]);
        acceptance.add_to_macrostate_shift(1, 1);
        acceptance.add_to_macrostate_shift(1, 1);
        acceptance.add_to_macrostate_shift(0, -1);
        assert_eq!(acceptance.proposed_count(0), 2);
        assert_eq!(acceptance.proposed_count(1), 3);
        assert_eq!(acceptance.proposed_count(7), 0);
    }
}
