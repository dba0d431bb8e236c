use crate::core::utils::random::Random;
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum DomainError {
    #[error("Unsupported dimension {0}: only 2 and 3 are supported")]
    UnsupportedDimension(usize),
    #[error("Side length {0} must be positive and finite")]
    InvalidSideLength(f64),
}

/// An orthorhombic, fully periodic simulation box centered on the origin.
///
/// Wrapped positions lie in `[-L/2, L/2]` along each periodic dimension. In two dimensions
/// the z component of every position is ignored and kept at zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    side_lengths: Vector3<f64>,
    dimension: usize,
}

impl Domain {
    /// Builds a domain from one side length per dimension.
    ///
    /// # Arguments
    ///
    /// * `side_lengths` - Two or three positive side lengths.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError`] if the dimension is not 2 or 3, or a side is not positive.
    pub fn new(side_lengths: &[f64]) -> Result<Self, DomainError> {
        let dimension = side_lengths.len();
        if dimension != 2 && dimension != 3 {
            return Err(DomainError::UnsupportedDimension(dimension));
        }
        if let Some(&bad) = side_lengths.iter().find(|&&l| !(l.is_finite() && l > 0.0)) {
            return Err(DomainError::InvalidSideLength(bad));
        }
        let mut sides = Vector3::repeat(1.0);
        for (i, &l) in side_lengths.iter().enumerate() {
            sides[i] = l;
        }
        Ok(Self {
            side_lengths: sides,
            dimension,
        })
    }

    pub fn cubic(side_length: f64, dimension: usize) -> Result<Self, DomainError> {
        Self::new(&vec![side_length; dimension])
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn side_length(&self, dim: usize) -> f64 {
        self.side_lengths[dim]
    }

    pub fn min_side_length(&self) -> f64 {
        (0..self.dimension)
            .map(|d| self.side_lengths[d])
            .fold(f64::INFINITY, f64::min)
    }

    pub fn volume(&self) -> f64 {
        (0..self.dimension).map(|d| self.side_lengths[d]).product()
    }

    /// Returns the shift that brings `position` back into the primary box.
    #[inline]
    pub fn wrap_shift(&self, position: &Point3<f64>) -> Vector3<f64> {
        let mut shift = Vector3::zeros();
        for d in 0..self.dimension {
            let l = self.side_lengths[d];
            shift[d] = -l * (position[d] / l).round();
        }
        shift
    }

    #[inline]
    pub fn wrap(&self, position: &Point3<f64>) -> Point3<f64> {
        position + self.wrap_shift(position)
    }

    /// Minimum-image convention applied to a displacement vector.
    #[inline]
    pub fn minimum_image(&self, displacement: &Vector3<f64>) -> Vector3<f64> {
        let mut d = *displacement;
        for dim in 0..self.dimension {
            let l = self.side_lengths[dim];
            d[dim] -= l * (d[dim] / l).round();
        }
        d
    }

    /// Minimum-image displacement pointing from `from` to `to`.
    #[inline]
    pub fn displacement(&self, from: &Point3<f64>, to: &Point3<f64>) -> Vector3<f64> {
        self.minimum_image(&(to - from))
    }

    /// Fractional coordinate of a wrapped position along `dim`, in `[-0.5, 0.5]`.
    #[inline]
    pub fn scaled_coordinate(&self, position: &Point3<f64>, dim: usize) -> f64 {
        position[dim] / self.side_lengths[dim]
    }

    pub fn random_position(&self, rng: &mut (impl Random + ?Sized)) -> Point3<f64> {
        let mut p = Point3::origin();
        for d in 0..self.dimension {
            p[d] = self.side_lengths[d] * (rng.uniform() - 0.5);
        }
        p
    }
}
