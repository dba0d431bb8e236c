//! # Core Models Module
//!
//! Data structures representing the particle system being simulated.
//!
//! ## Key Components
//!
//! - [`site`] - Interaction centers with type, position, optional orientation and cell assignments
//! - [`particle`] - Particles, particle type templates and intraparticle bonds
//! - [`domain`] - The periodic simulation box with wrap and minimum-image operations
//! - [`configuration`] - The particle store: active particles, ghost pools and type membership
//! - [`select`] - Sparse, ordered views of particles and sites with position snapshots
//!
//! ## Usage
//!
//! ```ignore
//! use mcengine::core::models::{configuration::Configuration, domain::Domain};
//! use mcengine::core::models::particle::{ParticleType, SiteTemplate};
//!
//! let mut config = Configuration::new(Domain::cubic(8.0, 3)?);
//! let a = config.add_site_type("A");
//! let dimer = config.add_particle_type(ParticleType::new("dimer")
//!     .with_site(SiteTemplate::new(a, Point3::origin()))
//!     .with_site(SiteTemplate::new(a, Point3::new(1.0, 0.0, 0.0)))
//!     .with_bond(0, 1));
//! let index = config.add_particle(dimer, &Point3::new(0.5, 0.5, 0.5));
//! ```

pub mod configuration;
pub mod domain;
pub mod particle;
pub mod select;
pub mod site;
