//! Constructors for the built-in trials, keyed by name in the registry.

use super::compute::TrialCompute;
use super::perturb::{Perturb, PerturbKind, Pivot, Region};
use super::select::{SelectPolicy, SelectionConstraint, TrialSelect, VolumeBias};
use super::stage::TrialStage;
use super::tunable::Tunable;
use super::Trial;
use crate::engine::config::ConfigError;
use crate::engine::error::EngineError;
use serde::{Deserialize, Serialize};

/// Arguments shared by the trial constructors. Each constructor reads the fields it needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TrialArgs {
    pub weight: Option<f64>,
    pub particle_type: Option<String>,
    /// Initial move amplitude: maximum displacement, or maximum rotation angle in radians.
    pub tunable: Option<f64>,
    pub tunable_min: Option<f64>,
    pub tunable_max: Option<f64>,
    pub tunable_target: Option<f64>,
    /// Rosenbluth trial positions per stage.
    pub num_steps: Option<usize>,
    pub max_length: Option<usize>,
    pub target_particle_type: Option<String>,
    pub target_site: Option<usize>,
    pub mobile_site: Option<usize>,
    pub neighbor_index: Option<usize>,
    /// Two site types (for `site_type_swap`) or particle types (for `particle_type_swap`).
    pub swap: Option<[String; 2]>,
    pub beta_step: Option<f64>,
    pub max_anchor_distance: Option<f64>,
}

impl TrialArgs {
    pub fn for_particle_type(name: &str) -> Self {
        Self {
            particle_type: Some(name.to_string()),
            ..Self::default()
        }
    }

    /// Volume-bias moves of `name` particles around targets of the same type.
    pub fn volume_bias(name: &str, neighbor_index: usize) -> Self {
        Self {
            particle_type: Some(name.to_string()),
            target_particle_type: Some(name.to_string()),
            neighbor_index: Some(neighbor_index),
            ..Self::default()
        }
    }

    fn required_particle_type(&self) -> Result<&str, ConfigError> {
        self.particle_type
            .as_deref()
            .ok_or(ConfigError::MissingParameter("particle-type"))
    }

    fn tunable(&self, default: f64, default_max: f64) -> Tunable {
        let value = self.tunable.unwrap_or(default);
        let tunable = Tunable::new(
            value,
            self.tunable_min.unwrap_or(value.min(default) * 1.0e-3),
            self.tunable_max.unwrap_or(default_max.max(value)),
        );
        match self.tunable_target {
            Some(target) => tunable.with_target(target),
            None => tunable,
        }
    }

    fn select(&self, policy: SelectPolicy) -> TrialSelect {
        let mut select = TrialSelect::new(policy);
        if let Some(name) = &self.particle_type {
            select = select.with_particle_type(name);
        }
        if let Some(max) = self.max_anchor_distance {
            select = select.with_constraint(SelectionConstraint::MaxAnchorDistance(max));
        }
        select
    }

    fn volume_bias_policy(&self) -> Result<VolumeBias, ConfigError> {
        let target = self
            .target_particle_type
            .as_deref()
            .or(self.particle_type.as_deref())
            .ok_or(ConfigError::MissingParameter("target-particle-type"))?;
        let neighbor_index = self
            .neighbor_index
            .ok_or(ConfigError::MissingParameter("neighbor-index"))?;
        Ok(VolumeBias::new(target, neighbor_index)
            .with_sites(self.target_site.unwrap_or(0), self.mobile_site.unwrap_or(0)))
    }

    fn stage(&self, select: TrialSelect, kind: PerturbKind) -> TrialStage {
        TrialStage::new(select, Perturb::new(kind)).with_num_steps(self.num_steps.unwrap_or(1))
    }

    fn trial(&self, name: &str, compute: TrialCompute, stage: TrialStage) -> Trial {
        Trial::new(name, compute)
            .with_stage(stage)
            .with_weight(self.weight.unwrap_or(1.0))
    }

    fn swap_pair(&self) -> Result<(String, String), ConfigError> {
        let [a, b] = self.swap.clone().ok_or(ConfigError::MissingParameter("swap"))?;
        Ok((a, b))
    }
}

pub type TrialFactory = fn(&TrialArgs) -> Result<Trial, EngineError>;

pub fn translate(args: &TrialArgs) -> Result<Trial, EngineError> {
    let stage = args.stage(
        args.select(SelectPolicy::WholeParticle { ghost: false }),
        PerturbKind::Translate {
            tunable: args.tunable(1.0, f64::MAX),
        },
    );
    Ok(args.trial("translate", TrialCompute::Move, stage))
}

pub fn rotate(args: &TrialArgs) -> Result<Trial, EngineError> {
    let stage = args.stage(
        args.select(SelectPolicy::WholeParticle { ghost: false }),
        PerturbKind::Rotate {
            tunable: args.tunable(0.5, std::f64::consts::PI),
            pivot: Pivot::FirstMobileSite,
        },
    );
    Ok(args.trial("rotate", TrialCompute::Move, stage))
}

/// Rotates a contiguous run of sites about the site adjacent to it.
pub fn segment(args: &TrialArgs) -> Result<Trial, EngineError> {
    let stage = args.stage(
        args.select(SelectPolicy::ChainSegment {
            max_length: args.max_length,
        }),
        PerturbKind::Rotate {
            tunable: args.tunable(0.5, std::f64::consts::PI),
            pivot: Pivot::Anchor,
        },
    );
    Ok(args.trial("segment", TrialCompute::Move, stage))
}

/// Rotates one end of a random bond about the other end.
pub fn bond_pivot(args: &TrialArgs) -> Result<Trial, EngineError> {
    let stage = args.stage(
        args.select(SelectPolicy::BondedSite),
        PerturbKind::Rotate {
            tunable: args.tunable(0.5, std::f64::consts::PI),
            pivot: Pivot::Anchor,
        },
    );
    Ok(args.trial("bond_pivot", TrialCompute::Move, stage))
}

pub fn add(args: &TrialArgs) -> Result<Trial, EngineError> {
    args.required_particle_type()?;
    let stage = args.stage(
        args.select(SelectPolicy::WholeParticle { ghost: true }),
        PerturbKind::Add {
            region: Region::Anywhere,
        },
    );
    Ok(args.trial("add", TrialCompute::Add, stage))
}

pub fn remove(args: &TrialArgs) -> Result<Trial, EngineError> {
    args.required_particle_type()?;
    let stage = args.stage(
        args.select(SelectPolicy::WholeParticle { ghost: false }),
        PerturbKind::Remove {
            region: Region::Anywhere,
        },
    );
    Ok(args.trial("remove", TrialCompute::Remove, stage))
}

pub fn site_type_swap(args: &TrialArgs) -> Result<Trial, EngineError> {
    let stage = args.stage(
        args.select(SelectPolicy::WholeParticle { ghost: false }),
        PerturbKind::SiteTypeSwap {
            site_types: args.swap_pair()?,
        },
    );
    Ok(args.trial("site_type_swap", TrialCompute::Move, stage))
}

pub fn particle_type_swap(args: &TrialArgs) -> Result<Trial, EngineError> {
    let stage = args.stage(
        args.select(SelectPolicy::WholeParticle { ghost: false }),
        PerturbKind::ParticleTypeSwap {
            particle_types: args.swap_pair()?,
        },
    );
    Ok(args.trial("particle_type_swap", TrialCompute::Move, stage))
}

fn avb_move(args: &TrialArgs, inside: bool, name: &str) -> Result<Trial, EngineError> {
    args.required_particle_type()?;
    let bias = args.volume_bias_policy()?;
    let neighbor_index = bias.neighbor_index;
    let stage = args.stage(
        args.select(SelectPolicy::VolumeBiasTarget(bias.moving(inside))),
        PerturbKind::MoveAvb {
            inside,
            neighbor_index,
        },
    );
    Ok(args.trial(name, TrialCompute::MoveAvb, stage))
}

/// Moves a particle from outside a target's association shell to inside it.
pub fn avb_in(args: &TrialArgs) -> Result<Trial, EngineError> {
    avb_move(args, true, "avb_in")
}

/// Moves a particle from inside a target's association shell to outside it.
pub fn avb_out(args: &TrialArgs) -> Result<Trial, EngineError> {
    avb_move(args, false, "avb_out")
}

pub fn add_avb(args: &TrialArgs) -> Result<Trial, EngineError> {
    args.required_particle_type()?;
    let bias = args.volume_bias_policy()?;
    let neighbor_index = bias.neighbor_index;
    let stage = args.stage(
        args.select(SelectPolicy::VolumeBiasTarget(bias.grand_canonical(true))),
        PerturbKind::Add {
            region: Region::AnchorShell { neighbor_index },
        },
    );
    Ok(args.trial("add_avb", TrialCompute::AddAvb, stage))
}

pub fn remove_avb(args: &TrialArgs) -> Result<Trial, EngineError> {
    args.required_particle_type()?;
    let bias = args.volume_bias_policy()?;
    let neighbor_index = bias.neighbor_index;
    let stage = args.stage(
        args.select(SelectPolicy::VolumeBiasTarget(bias.grand_canonical(false))),
        PerturbKind::Remove {
            region: Region::AnchorShell { neighbor_index },
        },
    );
    Ok(args.trial("remove_avb", TrialCompute::RemoveAvb, stage))
}

pub fn beta(args: &TrialArgs) -> Result<Trial, EngineError> {
    let step = args
        .beta_step
        .ok_or(ConfigError::MissingParameter("beta-step"))?;
    let stage = args.stage(
        TrialSelect::new(SelectPolicy::Nothing),
        PerturbKind::Beta { step },
    );
    Ok(args.trial("beta", TrialCompute::Beta, stage))
}
