use crate::core::models::select::Select;
use crate::core::potential::NEAR_INFINITY;
use crate::core::utils::random::Random;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Bias sampling over one or more trial outcomes of a stage.
///
/// Each step stores the energy profile and positions of one trial outcome. With a single step
/// the outcome is taken as is and the log weight is `-beta * U`. With several steps the weights
/// are normalized in log space, one outcome is drawn in proportion to its Boltzmann factor (the
/// old configuration always keeps step 0), and the log of the mean weight is reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rosenbluth {
    num_steps: usize,
    #[serde(skip)]
    profiles: Vec<Vec<f64>>,
    #[serde(skip)]
    stored: Vec<Select>,
    #[serde(skip)]
    ln_weights: Vec<f64>,
    #[serde(skip)]
    cumulative: Vec<f64>,
    #[serde(skip)]
    chosen: Option<usize>,
    #[serde(skip)]
    ln_total: f64,
}

impl Rosenbluth {
    pub fn new(num_steps: usize) -> Self {
        Self {
            num_steps: num_steps.max(1),
            profiles: Vec::new(),
            stored: Vec::new(),
            ln_weights: Vec::new(),
            cumulative: Vec::new(),
            chosen: None,
            ln_total: 0.0,
        }
    }

    pub fn num_steps(&self) -> usize {
        self.num_steps
    }

    pub fn reset(&mut self) {
        self.profiles.clear();
        self.stored.clear();
        self.ln_weights.clear();
        self.cumulative.clear();
        self.chosen = None;
        self.ln_total = 0.0;
    }

    /// Records the outcome of the next step.
    pub fn store(&mut self, profile: Vec<f64>, positions: Select) {
        self.profiles.push(profile);
        self.stored.push(positions);
    }

    pub fn energy(&self, step: usize) -> f64 {
        self.profiles[step].iter().sum()
    }

    pub fn compute<R: Random + ?Sized>(&mut self, beta: f64, old: bool, rng: &mut R) {
        let n = self.profiles.len();
        assert!(n > 0, "Rosenbluth::compute requires at least one stored step");
        self.ln_weights = (0..n).map(|step| -beta * self.energy(step)).collect();
        if n == 1 {
            self.chosen = Some(0);
            self.ln_total = self.ln_weights[0];
            return;
        }

        let max = self.ln_weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let shift = 10.0 - max;
        let weights: Vec<f64> = self.ln_weights.iter().map(|w| (w + shift).exp()).collect();
        let total: f64 = weights.iter().sum();
        self.ln_total = total.ln() - shift;
        self.cumulative.clear();
        let mut running = 0.0;
        for w in &weights {
            running += w / total;
            self.cumulative.push(running);
        }
        if let Some(last) = self.cumulative.last_mut() {
            *last = 1.0;
        }

        if self.ln_total <= -NEAR_INFINITY / 10f64.powi(n as i32) {
            self.chosen = None;
        } else if old {
            self.chosen = Some(0);
        } else {
            self.chosen = Some(rng.index_from_cumulative(&self.cumulative));
        }
        self.ln_total -= (n as f64).ln();
        trace!(
            steps = n,
            ln_total = self.ln_total,
            chosen = ?self.chosen,
            "Rosenbluth sampling resolved."
        );
    }

    /// The selected step, or `None` when every outcome was infeasible.
    pub fn chosen(&self) -> Option<usize> {
        self.chosen
    }

    pub fn ln_total(&self) -> f64 {
        self.ln_total
    }

    pub fn chosen_profile(&self) -> Option<&[f64]> {
        self.chosen.map(|c| self.profiles[c].as_slice())
    }

    pub fn stored(&self, step: usize) -> &Select {
        &self.stored[step]
    }
}
