use serde::de::{DeserializeOwned, Error as DeError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Malformed checkpoint: {0}")]
    Format(#[from] serde_json::Error),

    #[error("Checkpoint holds a '{found}' where a '{expected}' was expected")]
    KindMismatch { expected: &'static str, found: String },

    #[error("Unsupported {kind} checkpoint version {found} (this build reads version {expected})")]
    VersionMismatch {
        kind: &'static str,
        expected: u32,
        found: u32,
    },
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    kind: String,
    version: u32,
    state: serde_json::Value,
}

/// A stateful object with an explicit schema version per kind.
///
/// Checkpoints are JSON text of the form `{"kind": .., "version": .., "state": ..}`. A reader
/// rejects a checkpoint of another kind or of another version instead of reinterpreting it.
pub trait Checkpoint: Serialize + DeserializeOwned {
    const KIND: &'static str;
    const VERSION: u32;

    fn to_checkpoint(&self) -> Result<String, CheckpointError> {
        let envelope = Envelope {
            kind: Self::KIND.to_string(),
            version: Self::VERSION,
            state: serde_json::to_value(self)?,
        };
        Ok(serde_json::to_string_pretty(&envelope)?)
    }

    fn from_checkpoint(text: &str) -> Result<Self, CheckpointError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        if envelope.kind != Self::KIND {
            return Err(CheckpointError::KindMismatch {
                expected: Self::KIND,
                found: envelope.kind,
            });
        }
        if envelope.version != Self::VERSION {
            return Err(CheckpointError::VersionMismatch {
                kind: Self::KIND,
                expected: Self::VERSION,
                found: envelope.version,
            });
        }
        Ok(serde_json::from_value(envelope.state)?)
    }
}

/// Wraps a nested checkpointed object so that its own version is written and verified.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T>(pub T);

impl<T> Versioned<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

#[derive(Serialize)]
struct VersionedRef<'a, T> {
    version: u32,
    state: &'a T,
}

#[derive(Deserialize)]
struct VersionedRaw {
    version: u32,
    state: serde_json::Value,
}

impl<T: Checkpoint> Serialize for Versioned<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        VersionedRef {
            version: T::VERSION,
            state: &self.0,
        }
        .serialize(serializer)
    }
}

impl<'de, T: Checkpoint> Deserialize<'de> for Versioned<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = VersionedRaw::deserialize(deserializer)?;
        if raw.version != T::VERSION {
            return Err(D::Error::custom(format!(
                "unsupported {} version {} (this build reads version {})",
                T::KIND,
                raw.version,
                T::VERSION
            )));
        }
        serde_json::from_value(raw.state)
            .map(Versioned)
            .map_err(D::Error::custom)
    }
}
