use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

fn default_sigma() -> f64 {
    1.0
}

fn default_epsilon() -> f64 {
    1.0
}

fn default_cutoff() -> f64 {
    3.0
}

/// Parameters of one site type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SiteTypeParams {
    pub name: String,
    #[serde(default = "default_sigma")]
    pub sigma: f64,
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    #[serde(default = "default_cutoff")]
    pub cutoff: f64,
    /// Sites of anisotropic types carry an orientation.
    #[serde(default)]
    pub anisotropic: bool,
}

impl SiteTypeParams {
    pub fn new(name: &str, sigma: f64, epsilon: f64, cutoff: f64) -> Self {
        Self {
            name: name.to_string(),
            sigma,
            epsilon,
            cutoff,
            anisotropic: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MixedParams {
    pub sigma: f64,
    pub epsilon: f64,
    pub cutoff: f64,
    pub cutoff_squared: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct ParamsFile {
    site_types: Vec<SiteTypeParams>,
}

#[derive(Debug, Error)]
pub enum ParamLoadError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
}

/// Per-site-type parameters and their Lorentz-Berthelot mixed pair table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelParams {
    site_types: Vec<SiteTypeParams>,
    mixed: Vec<MixedParams>,
}

impl ModelParams {
    pub fn new(site_types: Vec<SiteTypeParams>) -> Self {
        let n = site_types.len();
        let mut mixed = Vec::with_capacity(n * n);
        for a in &site_types {
            for b in &site_types {
                let cutoff = 0.5 * (a.cutoff + b.cutoff);
                mixed.push(MixedParams {
                    sigma: 0.5 * (a.sigma + b.sigma),
                    epsilon: (a.epsilon * b.epsilon).sqrt(),
                    cutoff,
                    cutoff_squared: cutoff * cutoff,
                });
            }
        }
        Self { site_types, mixed }
    }

    /// Loads `[[site-types]]` tables from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ParamLoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| ParamLoadError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        let file: ParamsFile = toml::from_str(&content).map_err(|e| ParamLoadError::Toml {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        Ok(Self::new(file.site_types))
    }

    pub fn num_site_types(&self) -> usize {
        self.site_types.len()
    }

    pub fn site_type(&self, index: usize) -> &SiteTypeParams {
        &self.site_types[index]
    }

    pub fn site_types(&self) -> &[SiteTypeParams] {
        &self.site_types
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.site_types.iter().position(|s| s.name == name)
    }

    #[inline]
    pub fn mixed(&self, type_i: usize, type_j: usize) -> &MixedParams {
        &self.mixed[type_i * self.site_types.len() + type_j]
    }

    /// The largest mixed cutoff, used to size cell indices.
    pub fn max_cutoff(&self) -> f64 {
        self.mixed.iter().map(|m| m.cutoff).fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn mixing_follows_lorentz_berthelot() {
        let params = ModelParams::new(vec![
            SiteTypeParams::new("A", 1.0, 1.0, 2.0),
            SiteTypeParams::new("B", 2.0, 4.0, 4.0),
        ]);
        let ab = params.mixed(0, 1);
        assert_eq!(ab.sigma, 1.5);
        assert_eq!(ab.epsilon, 2.0);
        assert_eq!(ab.cutoff, 3.0);
        assert_eq!(ab.cutoff_squared, 9.0);
        assert_eq!(params.mixed(1, 0), ab);
        assert_eq!(params.max_cutoff(), 4.0);
    }

    #[test]
    fn load_succeeds_with_valid_toml_and_applies_defaults() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("params.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(
            file,
            r#"
            [[site-types]]
            name = "A"
            sigma = 1.0
            epsilon = 1.0
            cutoff = 2.5

            [[site-types]]
            name = "P"
            anisotropic = true
            "#
        )
        .unwrap();

        let params = ModelParams::load(&file_path).unwrap();
        assert_eq!(params.num_site_types(), 2);
        assert_eq!(params.index_of("P"), Some(1));
        let p = params.site_type(1);
        assert_eq!((p.sigma, p.epsilon, p.cutoff), (1.0, 1.0, 3.0));
        assert!(p.anisotropic);
    }

    #[test]
    fn load_fails_for_missing_file() {
        let dir = tempdir().unwrap();
        let result = ModelParams::load(&dir.path().join("non_existent.toml"));
        assert!(matches!(result, Err(ParamLoadError::Io { .. })));
    }

    #[test]
    fn load_fails_for_malformed_toml() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("malformed.toml");
        fs::write(&file_path, "this is not toml").unwrap();
        let result = ModelParams::load(&file_path);
        assert!(matches!(result, Err(ParamLoadError::Toml { .. })));
    }

    #[test]
    fn load_rejects_unknown_fields() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("unknown.toml");
        fs::write(&file_path, "[[site-types]]\nname = \"A\"\ncharge = 1.0\n").unwrap();
        assert!(matches!(
            ModelParams::load(&file_path),
            Err(ParamLoadError::Toml { .. })
        ));
    }
}
