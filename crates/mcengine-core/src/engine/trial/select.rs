use crate::core::models::select::Select;
use crate::core::utils::random::Random;
use crate::engine::error::EngineError;
use crate::engine::system::System;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// A condition on the perturbed selection, checked after the move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SelectionConstraint {
    /// The first mobile site must stay within this distance of the first anchor site.
    MaxAnchorDistance(f64),
}

/// Parameters of a volume-bias (association volume) selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeBias {
    pub target_type_name: String,
    pub target_site: usize,
    pub mobile_site: usize,
    /// Canonical moves only: whether the mobile particle ends up inside the target's shell.
    pub inside: bool,
    /// Grand canonical insertion of a ghost into the shell.
    pub ghost: bool,
    /// Grand canonical insertion or removal rather than a canonical move.
    pub grand_canonical: bool,
    pub neighbor_index: usize,
    #[serde(default)]
    target_type: usize,
    #[serde(default)]
    shell_volume: f64,
}

impl VolumeBias {
    pub fn new(target_type_name: &str, neighbor_index: usize) -> Self {
        Self {
            target_type_name: target_type_name.to_string(),
            target_site: 0,
            mobile_site: 0,
            inside: true,
            ghost: false,
            grand_canonical: false,
            neighbor_index,
            target_type: 0,
            shell_volume: 0.0,
        }
    }

    pub fn with_sites(mut self, target_site: usize, mobile_site: usize) -> Self {
        self.target_site = target_site;
        self.mobile_site = mobile_site;
        self
    }

    /// Canonical move ending outside (`false`) or inside (`true`) the shell.
    pub fn moving(mut self, inside: bool) -> Self {
        self.inside = inside;
        self.grand_canonical = false;
        self.ghost = false;
        self
    }

    /// Grand canonical insertion (`ghost = true`) or removal within the shell.
    pub fn grand_canonical(mut self, ghost: bool) -> Self {
        self.inside = true;
        self.grand_canonical = true;
        self.ghost = ghost;
        self
    }
}

/// How a selector chooses its mobile sites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SelectPolicy {
    /// A uniformly chosen active particle, or the next ghost of the type.
    WholeParticle { ghost: bool },
    /// One end of a random bond; the other end is the anchor.
    BondedSite,
    /// A contiguous run of sites of a random particle.
    ChainSegment { max_length: Option<usize> },
    VolumeBiasTarget(VolumeBias),
    /// The particle at `index` of the selection perturbed by earlier stages.
    Echo { index: usize },
    /// No sites; used by system-wide perturbations.
    Nothing,
}

/// Chooses the participants of one stage and records the probability of that choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialSelect {
    policy: SelectPolicy,
    particle_type_name: Option<String>,
    particle_type: Option<usize>,
    probability: f64,
    constraint: Option<SelectionConstraint>,
    #[serde(skip)]
    mobile: Select,
    #[serde(skip)]
    mobile_original: Select,
    #[serde(skip)]
    anchor: Select,
}

impl TrialSelect {
    pub fn new(policy: SelectPolicy) -> Self {
        Self {
            policy,
            particle_type_name: None,
            particle_type: None,
            probability: 1.0,
            constraint: None,
            mobile: Select::new(),
            mobile_original: Select::new(),
            anchor: Select::new(),
        }
    }

    /// Restricts the candidates to one particle type, resolved by name at precompute.
    pub fn with_particle_type(mut self, name: &str) -> Self {
        self.particle_type_name = Some(name.to_string());
        self
    }

    pub fn with_constraint(mut self, constraint: SelectionConstraint) -> Self {
        self.constraint = Some(constraint);
        self
    }

    pub fn policy(&self) -> &SelectPolicy {
        &self.policy
    }

    pub fn particle_type(&self) -> Option<usize> {
        self.particle_type
    }

    /// Probability of the most recent selection.
    pub fn probability(&self) -> f64 {
        self.probability
    }

    pub fn mobile(&self) -> &Select {
        &self.mobile
    }

    pub fn mobile_mut(&mut self) -> &mut Select {
        &mut self.mobile
    }

    /// Value snapshot of the mobile sites taken at selection time.
    pub fn mobile_original(&self) -> &Select {
        &self.mobile_original
    }

    pub fn anchor(&self) -> &Select {
        &self.anchor
    }

    pub fn volume_bias(&self) -> Option<&VolumeBias> {
        match &self.policy {
            SelectPolicy::VolumeBiasTarget(bias) => Some(bias),
            _ => None,
        }
    }

    /// Resolves names to indices and validates preconditions against the system.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownName`] for unknown particle types and
    /// [`EngineError::Configuration`] when a policy's preconditions cannot hold, such as an
    /// association shell that does not fit in the periodic domain.
    pub fn precompute(&mut self, system: &System) -> Result<(), EngineError> {
        let config = system.config();
        let resolve = |name: &str| {
            config
                .particle_type_index(name)
                .ok_or_else(|| EngineError::UnknownName {
                    kind: "particle type",
                    name: name.to_string(),
                })
        };
        self.particle_type = match &self.particle_type_name {
            Some(name) => Some(resolve(name)?),
            None => None,
        };

        match &mut self.policy {
            SelectPolicy::WholeParticle { ghost: true } if self.particle_type.is_none() => {
                return Err(EngineError::Configuration(
                    "ghost selection requires a particle type".to_string(),
                ));
            }
            SelectPolicy::VolumeBiasTarget(bias) => {
                let mobile_type = self.particle_type.ok_or_else(|| {
                    EngineError::Configuration(
                        "volume-bias selection requires a mobile particle type".to_string(),
                    )
                })?;
                bias.target_type = resolve(&bias.target_type_name)?;
                let criteria = system.neighbor_criteria(bias.neighbor_index).ok_or_else(|| {
                    EngineError::Configuration(format!(
                        "missing neighbor criteria {}",
                        bias.neighbor_index
                    ))
                })?;
                let domain = config.domain();
                bias.shell_volume = criteria.volume(domain.dimension());
                if bias.shell_volume >= domain.volume() {
                    return Err(EngineError::Configuration(format!(
                        "association volume {} is not smaller than the domain volume {}",
                        bias.shell_volume,
                        domain.volume()
                    )));
                }
                if criteria.maximum_distance() >= 0.5 * domain.min_side_length() {
                    return Err(EngineError::Configuration(format!(
                        "association radius {} must be less than half the smallest side length {}",
                        criteria.maximum_distance(),
                        domain.min_side_length()
                    )));
                }
                let sites_ok = bias.target_site < config.particle_type(bias.target_type).num_sites()
                    && bias.mobile_site < config.particle_type(mobile_type).num_sites();
                if !sites_ok {
                    return Err(EngineError::Configuration(
                        "volume-bias site index out of range".to_string(),
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn num_candidates(&self, system: &System) -> usize {
        match self.particle_type {
            Some(t) => system.config().num_particles_of_type(t),
            None => system.config().num_particles(),
        }
    }

    fn random_particle<R: Random + ?Sized>(
        &self,
        system: &System,
        rng: &mut R,
    ) -> Option<(usize, usize)> {
        let n = self.num_candidates(system);
        if n == 0 {
            return None;
        }
        let i = rng.uniform_int(0, n - 1);
        let particle = match self.particle_type {
            Some(t) => system.config().members_of_type(t)[i],
            None => system.config().nth_active(i)?,
        };
        Some((particle, n))
    }

    /// Chooses mobile and anchor sites. Returns `false` when no valid candidate exists.
    pub fn select<R: Random + ?Sized>(
        &mut self,
        perturbed: &Select,
        system: &mut System,
        rng: &mut R,
    ) -> bool {
        self.mobile.clear();
        self.anchor.clear();
        let chosen = match self.policy.clone() {
            SelectPolicy::WholeParticle { ghost: false } => {
                self.random_particle(system, rng).map(|(p, n)| {
                    self.mobile = Select::whole_particle(system.config(), p);
                    1.0 / n as f64
                })
            }
            SelectPolicy::WholeParticle { ghost: true } => self.particle_type.map(|t| {
                let p = system.ensure_ghost(t);
                self.mobile = Select::whole_particle(system.config(), p);
                1.0
            }),
            SelectPolicy::BondedSite => self.select_bonded_site(system, rng),
            SelectPolicy::ChainSegment { max_length } => {
                self.select_segment(system, max_length, rng)
            }
            SelectPolicy::VolumeBiasTarget(bias) => self.select_volume_bias(&bias, system, rng),
            SelectPolicy::Echo { index } => {
                (index < perturbed.num_particles()).then(|| {
                    let p = perturbed.particle_index(index);
                    self.mobile = Select::whole_particle(system.config(), p);
                    1.0
                })
            }
            SelectPolicy::Nothing => Some(1.0),
        };
        let Some(probability) = chosen else {
            trace!(policy = ?self.policy, "No valid candidate; auto-reject.");
            self.mobile.clear();
            self.anchor.clear();
            return false;
        };
        self.probability = probability;
        self.mobile.load_positions(system.config());
        self.anchor.load_positions(system.config());
        self.mobile_original = self.mobile.clone();
        true
    }

    fn select_bonded_site<R: Random + ?Sized>(
        &mut self,
        system: &System,
        rng: &mut R,
    ) -> Option<f64> {
        let (p, n) = self.random_particle(system, rng)?;
        let config = system.config();
        let bonds = &config.particle_type(config.particle(p).type_id).bonds;
        if bonds.is_empty() {
            return None;
        }
        let bond = &bonds[rng.uniform_int(0, bonds.len() - 1)];
        let (mobile, anchor) = if rng.coin_flip() {
            (bond.site_a, bond.site_b)
        } else {
            (bond.site_b, bond.site_a)
        };
        self.mobile = Select::particle(p, vec![mobile]);
        self.anchor = Select::particle(p, vec![anchor]);
        Some(1.0 / (n * bonds.len() * 2) as f64)
    }

    fn select_segment<R: Random + ?Sized>(
        &mut self,
        system: &System,
        max_length: Option<usize>,
        rng: &mut R,
    ) -> Option<f64> {
        let (p, n) = self.random_particle(system, rng)?;
        let num_sites = system.config().particle(p).num_sites();
        let first = rng.uniform_int(0, num_sites - 1);
        let second = match max_length {
            Some(max) => {
                let reach = max.max(1) - 1;
                rng.uniform_int(first.saturating_sub(reach), (first + reach).min(num_sites - 1))
            }
            None => rng.uniform_int(0, num_sites - 1),
        };
        let (begin, end) = if first <= second { (first, second) } else { (second, first) };
        self.mobile = Select::particle(p, (begin..=end).collect());
        if begin > 0 {
            self.anchor = Select::particle(p, vec![begin - 1]);
        } else if end + 1 < num_sites {
            self.anchor = Select::particle(p, vec![end + 1]);
        }
        Some(1.0 / n as f64)
    }

    fn select_volume_bias<R: Random + ?Sized>(
        &mut self,
        bias: &VolumeBias,
        system: &mut System,
        rng: &mut R,
    ) -> Option<f64> {
        let mobile_type = self.particle_type?;
        let targets = system.config().members_of_type(bias.target_type);
        let num_targets = targets.len();
        if num_targets == 0 {
            return None;
        }
        let target = targets[rng.uniform_int(0, num_targets - 1)];
        let neighbors = system.find_neighbors(
            bias.neighbor_index,
            (target, bias.target_site),
            mobile_type,
            bias.mobile_site,
        );
        let n_in = neighbors.len();
        let same_type = mobile_type == bias.target_type;
        let v_in = bias.shell_volume;
        let v_out = system.config().domain().volume() - v_in;
        let targets_f = num_targets as f64;

        let (mobile, probability) = if bias.grand_canonical && bias.ghost {
            let ghost = system.ensure_ghost(mobile_type);
            let mut p = v_in / (n_in + 1) as f64;
            if same_type {
                p *= targets_f / (targets_f + 1.0);
            }
            (ghost, p)
        } else if bias.grand_canonical {
            if n_in == 0 {
                return None;
            }
            let mut p = n_in as f64 / v_in;
            if same_type {
                p *= targets_f / (targets_f - 1.0);
            }
            (neighbors[rng.uniform_int(0, n_in - 1)], p)
        } else {
            let num_mobile = system.config().num_particles_of_type(mobile_type);
            let n_out = num_mobile - n_in - usize::from(same_type);
            if bias.inside {
                let outside: Vec<usize> = system
                    .config()
                    .members_of_type(mobile_type)
                    .iter()
                    .copied()
                    .filter(|&q| q != target && neighbors.binary_search(&q).is_err())
                    .collect();
                if outside.is_empty() {
                    return None;
                }
                let p = n_out as f64 / (n_in + 1) as f64 * v_in / v_out;
                (outside[rng.uniform_int(0, outside.len() - 1)], p)
            } else {
                if n_in == 0 {
                    return None;
                }
                let p = n_in as f64 / (n_out + 1) as f64 * v_out / v_in;
                (neighbors[rng.uniform_int(0, n_in - 1)], p)
            }
        };
        self.mobile = Select::whole_particle(system.config(), mobile);
        self.anchor = Select::particle(target, vec![bias.target_site]);
        Some(probability)
    }

    /// Whether the current positions satisfy the selection constraint, if any.
    pub fn is_constraint_satisfied(&self, system: &System) -> bool {
        let Some(SelectionConstraint::MaxAnchorDistance(max)) = &self.constraint else {
            return true;
        };
        let (Some(anchor), Some(mobile)) =
            (self.anchor.site_keys().next(), self.mobile.site_keys().next())
        else {
            return true;
        };
        let config = system.config();
        let d = config.domain().displacement(
            &config.site(anchor.0, anchor.1).position,
            &config.site(mobile.0, mobile.1).position,
        );
        d.norm() <= *max
    }
}
