use super::trial::factory::TrialArgs;
use crate::core::potential::params::SiteTypeParams;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Invalid configuration file '{path}': {reason}")]
    File { path: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DomainConfig {
    /// One side length per dimension; two or three entries.
    pub side_lengths: Vec<f64>,
}

fn default_beta() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ThermoConfig {
    #[serde(default = "default_beta")]
    pub beta: f64,
    /// Chemical potential per particle type name.
    #[serde(default)]
    pub chemical_potentials: BTreeMap<String, f64>,
}

impl Default for ThermoConfig {
    fn default() -> Self {
        Self {
            beta: default_beta(),
            chemical_potentials: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SiteConfig {
    pub site_type: String,
    /// Position relative to the first site of the particle.
    pub position: [f64; 3],
    #[serde(default)]
    pub orientation: Option<[f64; 3]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ParticleTypeConfig {
    pub name: String,
    pub sites: Vec<SiteConfig>,
    #[serde(default)]
    pub bonds: Vec<[usize; 2]>,
}

/// Initial particles of one type: explicit first-site positions, a count placed on a lattice,
/// or both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ParticlesConfig {
    pub particle_type: String,
    #[serde(default)]
    pub positions: Vec<[f64; 3]>,
    #[serde(default)]
    pub count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnergyMapChoice {
    #[default]
    None,
    All,
    Neighbor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PotentialConfig {
    /// Registry name of the pair model.
    pub model: String,
    #[serde(default)]
    pub cell_list: bool,
    /// Minimum cell side; defaults to the largest cutoff.
    #[serde(default)]
    pub cell_min_length: Option<f64>,
    #[serde(default)]
    pub energy_map: EnergyMapChoice,
    /// Neighbor criteria index gating a neighbor energy map.
    #[serde(default)]
    pub energy_map_gate: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct NeighborCriteriaConfig {
    #[serde(default)]
    pub minimum_distance: f64,
    pub maximum_distance: f64,
    #[serde(default)]
    pub energy_maximum: Option<f64>,
    #[serde(default)]
    pub site_types: Option<[String; 2]>,
    #[serde(default)]
    pub potential_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TrialConfig {
    /// Registry name of the trial.
    pub name: String,
    #[serde(flatten)]
    pub args: TrialArgs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ConstraintConfig {
    #[serde(rename_all = "kebab-case")]
    NumParticles {
        particle_type: String,
        #[serde(default)]
        min: Option<usize>,
        #[serde(default)]
        max: Option<usize>,
    },
    #[serde(rename_all = "kebab-case")]
    EqualCounts { particle_types: [String; 2] },
}

fn default_tune_interval() -> u64 {
    1_000
}

fn default_sample_interval() -> u64 {
    100
}

fn default_drift_tolerance() -> f64 {
    1e-6
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RunConfig {
    #[serde(default)]
    pub equilibration_attempts: u64,
    #[serde(default)]
    pub production_attempts: u64,
    /// Attempts between tuning passes during equilibration; 0 disables tuning.
    #[serde(default = "default_tune_interval")]
    pub tune_interval: u64,
    /// Attempts between samples of the production averages.
    #[serde(default = "default_sample_interval")]
    pub sample_interval: u64,
    /// Largest accepted drift between the tracked and the recomputed energy, relative to
    /// `max(1, |E|)`.
    #[serde(default = "default_drift_tolerance")]
    pub drift_tolerance: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            equilibration_attempts: 0,
            production_attempts: 0,
            tune_interval: default_tune_interval(),
            sample_interval: default_sample_interval(),
            drift_tolerance: default_drift_tolerance(),
        }
    }
}

/// A complete simulation description, readable from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SimulationConfig {
    pub seed: u64,
    pub domain: DomainConfig,
    #[serde(default)]
    pub thermo: ThermoConfig,
    /// Site-type parameters given inline.
    #[serde(default)]
    pub site_types: Vec<SiteTypeParams>,
    /// Site-type parameters loaded from a separate TOML file, appended after the inline ones.
    #[serde(default)]
    pub site_types_file: Option<PathBuf>,
    pub particle_types: Vec<ParticleTypeConfig>,
    #[serde(default)]
    pub particles: Vec<ParticlesConfig>,
    pub potentials: Vec<PotentialConfig>,
    #[serde(default)]
    pub neighbor_criteria: Vec<NeighborCriteriaConfig>,
    pub trials: Vec<TrialConfig>,
    #[serde(default)]
    pub constraints: Vec<ConstraintConfig>,
    #[serde(default)]
    pub run: RunConfig,
}

impl SimulationConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::File {
            path: "<inline>".to_string(),
            reason: e.to_string(),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::File {
            path: display.clone(),
            reason: e.to_string(),
        })?;
        toml::from_str(&text).map_err(|e| ConfigError::File {
            path: display,
            reason: e.to_string(),
        })
    }
}

#[derive(Default)]
pub struct SimulationConfigBuilder {
    seed: Option<u64>,
    side_lengths: Option<Vec<f64>>,
    thermo: ThermoConfig,
    site_types: Vec<SiteTypeParams>,
    site_types_file: Option<PathBuf>,
    particle_types: Vec<ParticleTypeConfig>,
    particles: Vec<ParticlesConfig>,
    potentials: Vec<PotentialConfig>,
    neighbor_criteria: Vec<NeighborCriteriaConfig>,
    trials: Vec<TrialConfig>,
    constraints: Vec<ConstraintConfig>,
    run: RunConfig,
}

impl SimulationConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
    pub fn side_lengths(mut self, side_lengths: Vec<f64>) -> Self {
        self.side_lengths = Some(side_lengths);
        self
    }
    pub fn beta(mut self, beta: f64) -> Self {
        self.thermo.beta = beta;
        self
    }
    pub fn chemical_potential(mut self, particle_type: &str, mu: f64) -> Self {
        self.thermo
            .chemical_potentials
            .insert(particle_type.to_string(), mu);
        self
    }
    pub fn site_type(mut self, params: SiteTypeParams) -> Self {
        self.site_types.push(params);
        self
    }
    pub fn site_types_file(mut self, path: PathBuf) -> Self {
        self.site_types_file = Some(path);
        self
    }
    pub fn particle_type(mut self, particle_type: ParticleTypeConfig) -> Self {
        self.particle_types.push(particle_type);
        self
    }
    pub fn particles(mut self, particles: ParticlesConfig) -> Self {
        self.particles.push(particles);
        self
    }
    pub fn potential(mut self, potential: PotentialConfig) -> Self {
        self.potentials.push(potential);
        self
    }
    pub fn neighbor_criteria(mut self, criteria: NeighborCriteriaConfig) -> Self {
        self.neighbor_criteria.push(criteria);
        self
    }
    pub fn trial(mut self, name: &str, args: TrialArgs) -> Self {
        self.trials.push(TrialConfig {
            name: name.to_string(),
            args,
        });
        self
    }
    pub fn constraint(mut self, constraint: ConstraintConfig) -> Self {
        self.constraints.push(constraint);
        self
    }
    pub fn run(mut self, run: RunConfig) -> Self {
        self.run = run;
        self
    }

    pub fn build(self) -> Result<SimulationConfig, ConfigError> {
        if self.particle_types.is_empty() {
            return Err(ConfigError::MissingParameter("particle_types"));
        }
        if self.potentials.is_empty() {
            return Err(ConfigError::MissingParameter("potentials"));
        }
        if self.trials.is_empty() {
            return Err(ConfigError::MissingParameter("trials"));
        }
        if self.site_types.is_empty() && self.site_types_file.is_none() {
            return Err(ConfigError::MissingParameter("site_types"));
        }
        Ok(SimulationConfig {
            seed: self.seed.ok_or(ConfigError::MissingParameter("seed"))?,
            domain: DomainConfig {
                side_lengths: self
                    .side_lengths
                    .ok_or(ConfigError::MissingParameter("side_lengths"))?,
            },
            thermo: self.thermo,
            site_types: self.site_types,
            site_types_file: self.site_types_file,
            particle_types: self.particle_types,
            particles: self.particles,
            potentials: self.potentials,
            neighbor_criteria: self.neighbor_criteria,
            trials: self.trials,
            constraints: self.constraints,
            run: self.run,
        })
    }
}
