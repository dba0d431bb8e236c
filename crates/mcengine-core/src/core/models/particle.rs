use super::site::Site;
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// A bond between two sites of the same particle, by site index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bond {
    pub site_a: usize,
    pub site_b: usize,
}

/// Describes one site of a particle type relative to the particle's first site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteTemplate {
    pub type_id: usize,
    pub position: Point3<f64>,
    pub orientation: Option<Vector3<f64>>,
}

impl SiteTemplate {
    pub fn new(type_id: usize, position: Point3<f64>) -> Self {
        Self {
            type_id,
            position,
            orientation: None,
        }
    }

    pub fn with_orientation(mut self, euler_angles: Vector3<f64>) -> Self {
        self.orientation = Some(euler_angles);
        self
    }
}

/// The read-only template every particle of one type is built from.
///
/// Topology (the bond list) lives on the template, not on the particle, because it never
/// changes during a simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleType {
    pub name: String,
    pub sites: Vec<SiteTemplate>,
    pub bonds: Vec<Bond>,
}

impl ParticleType {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            sites: Vec::new(),
            bonds: Vec::new(),
        }
    }

    pub fn with_site(mut self, site: SiteTemplate) -> Self {
        self.sites.push(site);
        self
    }

    pub fn with_bond(mut self, site_a: usize, site_b: usize) -> Self {
        self.bonds.push(Bond { site_a, site_b });
        self
    }

    pub fn num_sites(&self) -> usize {
        self.sites.len()
    }

    /// Instantiates the template with its first site at `origin`.
    pub fn instantiate(&self, type_id: usize, origin: &Point3<f64>) -> Particle {
        let offset = self
            .sites
            .first()
            .map(|s| s.position.coords)
            .unwrap_or_else(Vector3::zeros);
        let sites = self
            .sites
            .iter()
            .map(|template| {
                let position = origin + (template.position.coords - offset);
                let mut site = Site::new(template.type_id, position);
                site.orientation = template.orientation;
                site
            })
            .collect();
        Particle {
            type_id,
            sites,
            active: true,
        }
    }
}

/// An ordered collection of sites owned exclusively by the configuration.
///
/// Inactive particles are ghosts: retained slots that insertion moves promote so that
/// particle indices never shift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    pub type_id: usize,
    pub sites: Vec<Site>,
    pub active: bool,
}

impl Particle {
    pub fn num_sites(&self) -> usize {
        self.sites.len()
    }

    pub fn site(&self, index: usize) -> &Site {
        &self.sites[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instantiate_places_first_site_at_origin_and_keeps_relative_geometry() {
        let template = ParticleType::new("dimer")
            .with_site(SiteTemplate::new(0, Point3::new(1.0, 1.0, 1.0)))
            .with_site(SiteTemplate::new(1, Point3::new(2.0, 1.0, 1.0)))
            .with_bond(0, 1);
        let particle = template.instantiate(3, &Point3::new(-2.0, 0.0, 0.5));

        assert_eq!(particle.type_id, 3);
        assert!(particle.active);
        assert_eq!(particle.site(0).position, Point3::new(-2.0, 0.0, 0.5));
        assert_eq!(particle.site(1).position, Point3::new(-1.0, 0.0, 0.5));
        assert_eq!(particle.site(1).type_id, 1);
    }

    #[test]
    fn instantiate_copies_template_orientation() {
        let template = ParticleType::new("patchy").with_site(
            SiteTemplate::new(0, Point3::origin()).with_orientation(Vector3::new(0.1, 0.2, 0.3)),
        );
        let particle = template.instantiate(0, &Point3::origin());
        assert_eq!(particle.site(0).orientation, Some(Vector3::new(0.1, 0.2, 0.3)));
    }
}
