use serde::{Deserialize, Serialize};

/// A move amplitude adjusted toward a target acceptance ratio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tunable {
    value: f64,
    min: f64,
    max: f64,
    target: f64,
    percent_change: f64,
    enabled: bool,
}

impl Tunable {
    pub fn new(value: f64, min: f64, max: f64) -> Self {
        Self {
            value: value.clamp(min, max),
            min,
            max,
            target: 0.25,
            percent_change: 0.05,
            enabled: true,
        }
    }

    /// A fixed amplitude that tuning never changes.
    pub fn fixed(value: f64) -> Self {
        Self {
            enabled: false,
            ..Self::new(value, value, value)
        }
    }

    pub fn with_target(mut self, target: f64) -> Self {
        self.target = target;
        self
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Grows the amplitude when moves are accepted more often than the target, shrinks it
    /// otherwise, and clamps it to `[min, max]`.
    pub fn tune(&mut self, acceptance_rate: f64) {
        if !self.enabled {
            return;
        }
        let factor = if acceptance_rate > self.target {
            1.0 + self.percent_change
        } else {
            1.0 - self.percent_change
        };
        self.value = (self.value * factor).clamp(self.min, self.max);
    }
}
