use nalgebra::{Quaternion, Rotation3, Unit, UnitQuaternion, Vector3};
use rand::Rng;
use std::f64::consts::PI;

/// The random source consumed by every stochastic step of a trial.
///
/// Implemented for every [`rand::Rng`], so a seeded `Xoshiro256StarStar` (or any other seedable
/// generator) gives reproducible attempt sequences. The derived helpers are built only on the
/// three primitives so that two streams producing the same primitives produce the same moves.
pub trait Random {
    /// Uniform in `[0, 1)`.
    fn uniform(&mut self) -> f64;

    /// Uniform integer in `[low, high]`, both inclusive.
    fn uniform_int(&mut self, low: usize, high: usize) -> usize;

    fn coin_flip(&mut self) -> bool;

    /// Uniform in `[low, high)`.
    fn uniform_range(&mut self, low: f64, high: f64) -> f64 {
        low + (high - low) * self.uniform()
    }

    /// Uniform in the cube of half-width `half_width`, zero beyond `dimension`.
    fn position_in_cube(&mut self, dimension: usize, half_width: f64) -> Vector3<f64> {
        let mut v = Vector3::zeros();
        for d in 0..dimension {
            v[d] = self.uniform_range(-half_width, half_width);
        }
        v
    }

    /// Uniform direction on the unit circle (2D) or sphere (3D), by rejection.
    fn unit_vector(&mut self, dimension: usize) -> Vector3<f64> {
        loop {
            let v = self.position_in_cube(dimension, 1.0);
            let r2 = v.norm_squared();
            if r2 > 1e-12 && r2 <= 1.0 {
                return v / r2.sqrt();
            }
        }
    }

    /// Uniform in the spherical shell `min_radius < r < max_radius`, by rejection.
    fn position_in_shell(
        &mut self,
        dimension: usize,
        min_radius: f64,
        max_radius: f64,
    ) -> Vector3<f64> {
        let (min2, max2) = (min_radius * min_radius, max_radius * max_radius);
        loop {
            let v = self.position_in_cube(dimension, max_radius);
            let r2 = v.norm_squared();
            if r2 > min2 && r2 < max2 {
                return v;
            }
        }
    }

    /// A random rotation by at most `max_angle` radians about a random axis
    /// (about z in two dimensions).
    fn small_rotation(&mut self, dimension: usize, max_angle: f64) -> Rotation3<f64> {
        let axis = if dimension == 2 {
            Vector3::z()
        } else {
            self.unit_vector(3)
        };
        let angle = self.uniform_range(-max_angle, max_angle);
        Rotation3::from_axis_angle(&Unit::new_unchecked(axis), angle)
    }

    /// A rotation uniformly distributed over all orientations.
    fn uniform_rotation(&mut self, dimension: usize) -> Rotation3<f64> {
        if dimension == 2 {
            let angle = self.uniform_range(-PI, PI);
            return Rotation3::from_axis_angle(&Vector3::z_axis(), angle);
        }
        let (u1, u2, u3) = (self.uniform(), self.uniform(), self.uniform());
        let (a, b) = ((1.0 - u1).sqrt(), u1.sqrt());
        let q = Quaternion::new(
            b * (2.0 * PI * u3).cos(),
            a * (2.0 * PI * u2).sin(),
            a * (2.0 * PI * u2).cos(),
            b * (2.0 * PI * u3).sin(),
        );
        UnitQuaternion::from_quaternion(q).to_rotation_matrix()
    }

    /// Index drawn from a cumulative distribution whose last entry is 1.
    fn index_from_cumulative(&mut self, cumulative: &[f64]) -> usize {
        let r = self.uniform();
        cumulative
            .iter()
            .position(|&c| r < c)
            .unwrap_or(cumulative.len().saturating_sub(1))
    }
}

impl<R: Rng + ?Sized> Random for R {
    #[inline]
    fn uniform(&mut self) -> f64 {
        self.r#gen::<f64>()
    }

    #[inline]
    fn uniform_int(&mut self, low: usize, high: usize) -> usize {
        self.gen_range(low..=high)
    }

    #[inline]
    fn coin_flip(&mut self) -> bool {
        self.r#gen::<bool>()
    }
}
