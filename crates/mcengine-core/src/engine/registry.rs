use super::error::EngineError;
use super::trial::factory::{self, TrialArgs, TrialFactory};
use super::trial::Trial;
use crate::core::potential::potentials::{HardSphere, IdealGas, LennardJones, SquareWell};
use crate::core::potential::PairPotential;
use std::collections::HashMap;
use std::sync::Arc;

pub type ModelFactory = fn() -> Arc<dyn PairPotential>;

/// Name-keyed constructors for pair models and trials.
///
/// Built once at startup by [`Registry::with_defaults`] and extended explicitly; there is no
/// global registration.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    models: HashMap<String, ModelFactory>,
    trials: HashMap<String, TrialFactory>,
}

fn ideal_gas() -> Arc<dyn PairPotential> {
    Arc::new(IdealGas)
}

fn hard_sphere() -> Arc<dyn PairPotential> {
    Arc::new(HardSphere)
}

fn lennard_jones() -> Arc<dyn PairPotential> {
    Arc::new(LennardJones)
}

fn square_well() -> Arc<dyn PairPotential> {
    Arc::new(SquareWell)
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in pair model and trial.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_model("ideal_gas", ideal_gas);
        registry.register_model("hard_sphere", hard_sphere);
        registry.register_model("lennard_jones", lennard_jones);
        registry.register_model("square_well", square_well);

        let trials: [(&str, TrialFactory); 13] = [
            ("translate", factory::translate),
            ("rotate", factory::rotate),
            ("segment", factory::segment),
            ("bond_pivot", factory::bond_pivot),
            ("add", factory::add),
            ("remove", factory::remove),
            ("site_type_swap", factory::site_type_swap),
            ("particle_type_swap", factory::particle_type_swap),
            ("avb_in", factory::avb_in),
            ("avb_out", factory::avb_out),
            ("add_avb", factory::add_avb),
            ("remove_avb", factory::remove_avb),
            ("beta", factory::beta),
        ];
        for (name, build) in trials {
            registry.register_trial(name, build);
        }
        registry
    }

    pub fn register_model(&mut self, name: &str, factory: ModelFactory) {
        self.models.insert(name.to_string(), factory);
    }

    pub fn register_trial(&mut self, name: &str, factory: TrialFactory) {
        self.trials.insert(name.to_string(), factory);
    }

    pub fn model(&self, name: &str) -> Result<Arc<dyn PairPotential>, EngineError> {
        self.models
            .get(name)
            .map(|build| build())
            .ok_or_else(|| EngineError::UnknownName {
                kind: "pair model",
                name: name.to_string(),
            })
    }

    pub fn trial(&self, name: &str, args: &TrialArgs) -> Result<Trial, EngineError> {
        let build = self.trials.get(name).ok_or_else(|| EngineError::UnknownName {
            kind: "trial",
            name: name.to_string(),
        })?;
        build(args)
    }

    pub fn model_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.models.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn trial_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.trials.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_built_in_name() {
        let registry = Registry::with_defaults();
        assert_eq!(
            registry.model_names(),
            vec!["hard_sphere", "ideal_gas", "lennard_jones", "square_well"]
        );
        assert_eq!(registry.trial_names().len(), 13);
        assert!(registry.model("lennard_jones").is_ok());
        assert_eq!(
            registry.trial("translate", &TrialArgs::default()).unwrap().name(),
            "translate"
        );
    }

    #[test]
    fn unknown_names_are_reported_with_their_kind() {
        let registry = Registry::with_defaults();
        match registry.model("jagla") {
            Err(EngineError::UnknownName { kind, name }) => {
                assert_eq!(kind, "pair model");
                assert_eq!(name, "jagla");
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert!(matches!(
            registry.trial("reptate", &TrialArgs::default()),
            Err(EngineError::UnknownName { kind: "trial", .. })
        ));
    }

    #[test]
    fn user_models_can_be_registered() {
        fn always_zero() -> Arc<dyn PairPotential> {
            Arc::new(IdealGas)
        }
        let mut registry = Registry::new();
        assert!(registry.model("zero").is_err());
        registry.register_model("zero", always_zero);
        assert!(registry.model("zero").is_ok());
    }
}
