use nalgebra::{Point3, Rotation3, Unit, Vector3};
use std::f64::consts::PI;

pub fn rotation_from_axis_angle(axis: &Vector3<f64>, angle_degrees: f64) -> Rotation3<f64> {
    Rotation3::from_axis_angle(&Unit::new_normalize(*axis), angle_degrees.to_radians())
}

#[inline]
pub fn rotate_about(
    position: &Point3<f64>,
    pivot: &Point3<f64>,
    rotation: &Rotation3<f64>,
) -> Point3<f64> {
    pivot + rotation * (position - pivot)
}

/// Composes `rotation` with an orientation stored as (roll, pitch, yaw) Euler angles.
pub fn rotate_euler_angles(euler: &Vector3<f64>, rotation: &Rotation3<f64>) -> Vector3<f64> {
    let current = Rotation3::from_euler_angles(euler.x, euler.y, euler.z);
    let (roll, pitch, yaw) = (rotation * current).euler_angles();
    Vector3::new(roll, pitch, yaw)
}

/// Volume of the shell `min_radius < r < max_radius` in two or three dimensions.
pub fn spherical_shell_volume(min_radius: f64, max_radius: f64, dimension: usize) -> f64 {
    if dimension == 2 {
        PI * (max_radius.powi(2) - min_radius.powi(2))
    } else {
        4.0 / 3.0 * PI * (max_radius.powi(3) - min_radius.powi(3))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-9;

    #[test]
    fn rotate_about_pivot_preserves_distance_to_pivot() {
        let pivot = Point3::new(1.0, 1.0, 1.0);
        let p = Point3::new(2.0, 1.0, 1.0);
        let rotated = rotate_about(&p, &pivot, &rotation_from_axis_angle(&Vector3::z(), 90.0));
        assert!((rotated - Point3::new(1.0, 2.0, 1.0)).norm() < TOLERANCE);
    }

    #[test]
    fn rotate_euler_angles_by_identity_is_noop() {
        let euler = Vector3::new(0.1, -0.2, 0.3);
        let rotated = rotate_euler_angles(&euler, &Rotation3::identity());
        assert!((rotated - euler).norm() < TOLERANCE);
    }

    #[test]
    fn spherical_shell_volume_matches_closed_forms() {
        assert!((spherical_shell_volume(0.0, 1.0, 3) - 4.0 / 3.0 * PI).abs() < TOLERANCE);
        assert!((spherical_shell_volume(1.0, 2.0, 2) - 3.0 * PI).abs() < TOLERANCE);
    }
}
