//! Builds a ready-to-run [`MonteCarlo`] driver from a [`SimulationConfig`].

use super::config::{
    ConstraintConfig, EnergyMapChoice, NeighborCriteriaConfig, ParticleTypeConfig,
    SimulationConfig,
};
use super::energy_map::{EnergyMapAll, EnergyMapKind, EnergyMapNeighbor};
use super::error::EngineError;
use super::monte_carlo::MonteCarlo;
use super::registry::Registry;
use super::system::{Potential, System, ThermoParams};
use super::trial::criteria::{Constraint, Metropolis};
use crate::core::models::configuration::Configuration;
use crate::core::models::domain::Domain;
use crate::core::models::particle::{ParticleType, SiteTemplate};
use crate::core::potential::neighbor::NeighborCriteria;
use crate::core::potential::params::{ModelParams, SiteTypeParams};
use nalgebra::{Point3, Vector3};
use tracing::{debug, info, instrument};

/// Resolves every name in `config`, builds the system and its trials, and precomputes the
/// driver.
///
/// # Errors
///
/// Returns [`EngineError::UnknownName`] for unresolved site types, particle types, pair models
/// or trials, and propagates domain, parameter file and validation errors.
#[instrument(skip_all, name = "build_monte_carlo")]
pub fn build_monte_carlo(
    config: &SimulationConfig,
    registry: &Registry,
) -> Result<MonteCarlo<Metropolis>, EngineError> {
    let domain = Domain::new(&config.domain.side_lengths)?;
    let params = load_site_types(config)?;

    let mut configuration = Configuration::new(domain);
    for site_type in params.site_types() {
        configuration.add_site_type(&site_type.name);
    }
    for particle_type in &config.particle_types {
        let template = build_particle_type(&configuration, particle_type)?;
        configuration.add_particle_type(template);
    }
    place_particles(&mut configuration, config)?;

    let mut system = System::new(configuration, params);
    system.set_thermo(build_thermo(system.config(), config)?);

    let criteria = config
        .neighbor_criteria
        .iter()
        .map(|c| build_neighbor_criteria(system.config(), c))
        .collect::<Result<Vec<_>, _>>()?;
    for potential in &config.potentials {
        let mut built = Potential::new(&potential.model, registry.model(&potential.model)?);
        if potential.cell_list {
            built = built.with_cell_list(potential.cell_min_length);
        }
        match potential.energy_map {
            EnergyMapChoice::None => {}
            EnergyMapChoice::All => {
                built = built.with_energy_map(EnergyMapKind::All(EnergyMapAll::new()));
            }
            EnergyMapChoice::Neighbor => {
                let map = match potential.energy_map_gate {
                    Some(index) => {
                        let gate = criteria.get(index).cloned().ok_or_else(|| {
                            EngineError::Configuration(format!(
                                "energy map gate refers to missing neighbor criteria {index}"
                            ))
                        })?;
                        EnergyMapNeighbor::with_gate(gate)
                    }
                    None => EnergyMapNeighbor::new(),
                };
                built = built.with_energy_map(EnergyMapKind::Neighbor(map));
            }
        }
        system.add_potential(built);
    }
    for c in criteria {
        system.add_neighbor_criteria(c);
    }

    let mut metropolis = Metropolis::new();
    for constraint in &config.constraints {
        metropolis = metropolis.with_constraint(build_constraint(system.config(), constraint)?);
    }

    let mut mc = MonteCarlo::new(system, metropolis, config.seed);
    for trial in &config.trials {
        mc.add_trial(registry.trial(&trial.name, &trial.args)?);
        debug!(trial = %trial.name, "Trial added.");
    }
    mc.precompute()?;
    info!(
        particles = mc.system().config().num_particles(),
        seed = config.seed,
        "Simulation built."
    );
    Ok(mc)
}

fn load_site_types(config: &SimulationConfig) -> Result<ModelParams, EngineError> {
    let mut site_types: Vec<SiteTypeParams> = config.site_types.clone();
    if let Some(path) = &config.site_types_file {
        let loaded = ModelParams::load(path)?;
        site_types.extend(loaded.site_types().iter().cloned());
    }
    for (i, site_type) in site_types.iter().enumerate() {
        if site_types[..i].iter().any(|other| other.name == site_type.name) {
            return Err(EngineError::Configuration(format!(
                "site type '{}' is defined twice",
                site_type.name
            )));
        }
    }
    Ok(ModelParams::new(site_types))
}

fn site_type_index(configuration: &Configuration, name: &str) -> Result<usize, EngineError> {
    configuration
        .site_type_index(name)
        .ok_or_else(|| EngineError::UnknownName {
            kind: "site type",
            name: name.to_string(),
        })
}

fn particle_type_index(configuration: &Configuration, name: &str) -> Result<usize, EngineError> {
    configuration
        .particle_type_index(name)
        .ok_or_else(|| EngineError::UnknownName {
            kind: "particle type",
            name: name.to_string(),
        })
}

fn build_particle_type(
    configuration: &Configuration,
    config: &ParticleTypeConfig,
) -> Result<ParticleType, EngineError> {
    if config.sites.is_empty() {
        return Err(EngineError::Configuration(format!(
            "particle type '{}' has no sites",
            config.name
        )));
    }
    let mut template = ParticleType::new(&config.name);
    for site in &config.sites {
        let [x, y, z] = site.position;
        let mut built = SiteTemplate::new(
            site_type_index(configuration, &site.site_type)?,
            Point3::new(x, y, z),
        );
        if let Some([a, b, c]) = site.orientation {
            built = built.with_orientation(Vector3::new(a, b, c));
        }
        template = template.with_site(built);
    }
    for &[a, b] in &config.bonds {
        if a == b || a >= config.sites.len() || b >= config.sites.len() {
            return Err(EngineError::Configuration(format!(
                "particle type '{}' has an invalid bond {a}-{b}",
                config.name
            )));
        }
        template = template.with_bond(a, b);
    }
    Ok(template)
}

/// Adds the explicit particles of every entry, then fills each requested count on a simple
/// cubic (or square) lattice spanning the domain.
fn place_particles(
    configuration: &mut Configuration,
    config: &SimulationConfig,
) -> Result<(), EngineError> {
    let dimension = configuration.domain().dimension();
    for entry in &config.particles {
        let t = particle_type_index(configuration, &entry.particle_type)?;
        for &[x, y, z] in &entry.positions {
            let z = if dimension == 2 { 0.0 } else { z };
            configuration.add_particle(t, &Point3::new(x, y, z));
        }
        for origin in lattice_points(configuration.domain(), entry.count) {
            configuration.add_particle(t, &origin);
        }
        debug!(
            particle_type = %entry.particle_type,
            count = configuration.num_particles_of_type(t),
            "Particles placed."
        );
    }
    Ok(())
}

fn lattice_points(domain: &Domain, count: usize) -> Vec<Point3<f64>> {
    if count == 0 {
        return Vec::new();
    }
    let dimension = domain.dimension();
    let per_side = (count as f64).powf(1.0 / dimension as f64).ceil() as usize;
    let per_side = if per_side.pow(dimension as u32) < count {
        per_side + 1
    } else {
        per_side
    };
    (0..count)
        .map(|n| {
            let mut point = Point3::origin();
            let mut rest = n;
            for d in 0..dimension {
                let length = domain.side_length(d);
                let spacing = length / per_side as f64;
                point[d] = -0.5 * length + (0.5 + (rest % per_side) as f64) * spacing;
                rest /= per_side;
            }
            point
        })
        .collect()
}

fn build_thermo(
    configuration: &Configuration,
    config: &SimulationConfig,
) -> Result<ThermoParams, EngineError> {
    let mut thermo = ThermoParams::new(config.thermo.beta);
    for (name, &mu) in &config.thermo.chemical_potentials {
        thermo = thermo.with_chemical_potential(particle_type_index(configuration, name)?, mu);
    }
    Ok(thermo)
}

fn build_neighbor_criteria(
    configuration: &Configuration,
    config: &NeighborCriteriaConfig,
) -> Result<NeighborCriteria, EngineError> {
    let mut criteria = NeighborCriteria::new(config.minimum_distance, config.maximum_distance)
        .with_potential_index(config.potential_index);
    if let Some(energy_maximum) = config.energy_maximum {
        criteria = criteria.with_energy_maximum(energy_maximum);
    }
    if let Some([a, b]) = &config.site_types {
        criteria = criteria.with_site_types(
            site_type_index(configuration, a)?,
            site_type_index(configuration, b)?,
        );
    }
    Ok(criteria)
}

fn build_constraint(
    configuration: &Configuration,
    config: &ConstraintConfig,
) -> Result<Constraint, EngineError> {
    Ok(match config {
        ConstraintConfig::NumParticles {
            particle_type,
            min,
            max,
        } => Constraint::NumParticles {
            particle_type: particle_type_index(configuration, particle_type)?,
            min: *min,
            max: *max,
        },
        ConstraintConfig::EqualCounts {
            particle_types: [a, b],
        } => Constraint::EqualCounts {
            particle_type_a: particle_type_index(configuration, a)?,
            particle_type_b: particle_type_index(configuration, b)?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::trial::criteria::Criteria;
    use std::io::Write;

    const CONFIG: &str = r#"
seed = 17

[domain]
side-lengths = [12.0, 12.0]

[thermo]
beta = 1.2
chemical-potentials = { mono = -2.0 }

[[site-types]]
name = "A"
sigma = 1.0
epsilon = 1.0
cutoff = 2.5

[[site-types]]
name = "B"
sigma = 1.2
cutoff = 2.5

[[particle-types]]
name = "mono"
sites = [{ site-type = "A", position = [0.0, 0.0, 0.0] }]

[[particle-types]]
name = "dimer"
sites = [
    { site-type = "A", position = [0.0, 0.0, 0.0] },
    { site-type = "B", position = [1.0, 0.0, 0.0] },
]
bonds = [[0, 1]]

[[particles]]
particle-type = "mono"
positions = [[5.5, 5.5, 9.0]]
count = 8

[[particles]]
particle-type = "dimer"
count = 3

[[potentials]]
model = "lennard_jones"
energy-map = "neighbor"
energy-map-gate = 0

[[neighbor-criteria]]
maximum-distance = 1.5
energy-maximum = 0.0
site-types = ["A", "A"]

[[trials]]
name = "translate"
particle-type = "mono"

[[trials]]
name = "avb_in"
particle-type = "mono"
neighbor-index = 0
weight = 0.5

[[trials]]
name = "bond_pivot"
particle-type = "dimer"

[[constraints]]
kind = "num-particles"
particle-type = "mono"
max = 20
"#;

    #[test]
    fn builds_every_section_of_a_config() {
        let config = SimulationConfig::from_toml_str(CONFIG).unwrap();
        let mc = build_monte_carlo(&config, &Registry::with_defaults()).unwrap();
        let system = mc.system();
        let configuration = system.config();

        assert_eq!(configuration.domain().dimension(), 2);
        assert_eq!(configuration.num_particles_of_type(0), 9);
        assert_eq!(configuration.num_particles_of_type(1), 3);
        assert_eq!(configuration.site(0, 0).position.z, 0.0);
        assert_eq!(configuration.particle_type(1).bonds.len(), 1);
        assert!((system.beta() - 1.2).abs() < 1e-15);
        assert!((system.beta_mu(0) - 1.2 * -2.0).abs() < 1e-12);
        assert_eq!(
            system.neighbor_criteria(0).unwrap().maximum_distance(),
            1.5
        );
        assert!(system.potential(0).energy_map().is_some());
        assert_eq!(mc.trials().len(), 3);
        assert_eq!(mc.criteria().constraints().len(), 1);
        let (recomputed, _) = system.brute_force_energy();
        assert!((mc.criteria().current_energy() - recomputed).abs() < 1e-9);
    }

    #[test]
    fn lattice_points_are_distinct_and_inside_the_domain() {
        let domain = Domain::cubic(6.0, 3).unwrap();
        let points = lattice_points(&domain, 10);
        assert_eq!(points.len(), 10);
        for (i, a) in points.iter().enumerate() {
            for d in 0..3 {
                assert!(a[d] > -3.0 && a[d] < 3.0);
            }
            for b in &points[i + 1..] {
                assert!((a - b).norm() > 1.0);
            }
        }
    }

    #[test]
    fn unknown_names_are_reported() {
        let bad_site = CONFIG.replace("site-type = \"B\"", "site-type = \"C\"");
        let config = SimulationConfig::from_toml_str(&bad_site).unwrap();
        assert!(matches!(
            build_monte_carlo(&config, &Registry::with_defaults()),
            Err(EngineError::UnknownName { kind: "site type", .. })
        ));

        let bad_mu = CONFIG.replace("{ mono = -2.0 }", "{ trimer = -2.0 }");
        let config = SimulationConfig::from_toml_str(&bad_mu).unwrap();
        assert!(matches!(
            build_monte_carlo(&config, &Registry::with_defaults()),
            Err(EngineError::UnknownName { kind: "particle type", .. })
        ));

        let bad_model = CONFIG.replace("\"lennard_jones\"", "\"yukawa\"");
        let config = SimulationConfig::from_toml_str(&bad_model).unwrap();
        assert!(matches!(
            build_monte_carlo(&config, &Registry::with_defaults()),
            Err(EngineError::UnknownName { kind: "pair model", .. })
        ));
    }

    #[test]
    fn site_types_can_come_from_a_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[[site-types]]\nname = \"B\"\nsigma = 1.2\ncutoff = 2.5"
        )
        .unwrap();
        let start = CONFIG.find("[[site-types]]\nname = \"B\"").unwrap();
        let end = CONFIG.find("[[particle-types]]").unwrap();
        let mut text = CONFIG.to_string();
        text.replace_range(start..end, "");
        let path = file.path().display().to_string().replace('\\', "/");
        text = text.replacen("seed = 17", &format!("seed = 17\nsite-types-file = \"{path}\""), 1);

        let config = SimulationConfig::from_toml_str(&text).unwrap();
        let mc = build_monte_carlo(&config, &Registry::with_defaults()).unwrap();
        assert_eq!(mc.system().params().num_site_types(), 2);
        assert_eq!(mc.system().params().site_type(1).name, "B");
    }

    #[test]
    fn duplicate_site_types_are_rejected() {
        let text = CONFIG.replace("name = \"B\"", "name = \"A\"");
        let config = SimulationConfig::from_toml_str(&text).unwrap();
        assert!(matches!(
            build_monte_carlo(&config, &Registry::with_defaults()),
            Err(EngineError::Configuration(_))
        ));
    }
}
