use super::checkpoint::CheckpointError;
use super::config::ConfigError;
use crate::core::models::domain::DomainError;
use crate::core::potential::params::ParamLoadError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Unknown {kind} '{name}'")]
    UnknownName { kind: &'static str, name: String },

    #[error("Invalid domain: {source}")]
    Domain {
        #[from]
        source: DomainError,
    },

    #[error("Parameter loading failed: {source}")]
    Params {
        #[from]
        source: ParamLoadError,
    },

    #[error("Configuration build failed: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("Checkpoint failed: {source}")]
    Checkpoint {
        #[from]
        source: CheckpointError,
    },

    #[error("Simulation phase '{phase}' failed: {reason}")]
    PhaseFailed { phase: &'static str, reason: String },
}
