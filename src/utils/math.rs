//! Additional math helpers layered on top of `glam`.

use glam::{Mat3, Quat, Vec3};

/// Integrates an orientation by an angular velocity over `dt` (axis-angle form).
pub fn integrate_rotation(rotation: Quat, angular: Vec3, dt: f32) -> Quat {
    let angle = angular.length() * dt;
    if angle < 1.0e-6 {
        return rotation;
    }
    let axis = angular / angular.length();
    (Quat::from_axis_angle(axis, angle) * rotation).normalize()
}

/// Skew-symmetric cross-product matrix of `v`, so that `skew(v) * w == v × w`.
pub fn skew(v: Vec3) -> Mat3 {
    Mat3::from_cols(
        Vec3::new(0.0, v.z, -v.y),
        Vec3::new(-v.z, 0.0, v.x),
        Vec3::new(v.y, -v.x, 0.0),
    )
}

/// Any unit vector perpendicular to `v` (`v` must be non-zero).
pub fn normalized_perpendicular(v: Vec3) -> Vec3 {
    if v.x.abs() > v.y.abs() {
        Vec3::new(-v.z, 0.0, v.x).normalize()
    } else {
        Vec3::new(0.0, v.z, -v.y).normalize()
    }
}

/// Inertia tensor for a solid box given half extents.
pub fn inertia_box(half_extents: Vec3, mass: f32) -> Mat3 {
    let lx = half_extents.x * 2.0;
    let ly = half_extents.y * 2.0;
    let lz = half_extents.z * 2.0;
    let factor = mass / 12.0;
    Mat3::from_diagonal(Vec3::new(
        factor * (ly * ly + lz * lz),
        factor * (lx * lx + lz * lz),
        factor * (lx * lx + ly * ly),
    ))
}

/// Inertia tensor for a solid sphere.
pub fn inertia_sphere(radius: f32, mass: f32) -> Mat3 {
    Mat3::from_diagonal(Vec3::splat(0.4 * mass * radius * radius))
}

/// Inertia tensor for a solid capsule aligned along Y.
pub fn inertia_capsule(radius: f32, half_height: f32, mass: f32) -> Mat3 {
    let height = half_height * 2.0;
    let cylinder_mass = mass * 0.6;
    let sphere_mass = (mass - cylinder_mass) / 2.0;

    let cylinder_inertia = Mat3::from_diagonal(Vec3::new(
        (1.0 / 12.0) * cylinder_mass * (3.0 * radius * radius + height * height),
        0.5 * cylinder_mass * radius * radius,
        (1.0 / 12.0) * cylinder_mass * (3.0 * radius * radius + height * height),
    ));

    let sphere_inertia = Mat3::from_diagonal(Vec3::splat(0.4 * sphere_mass * radius * radius));

    cylinder_inertia + sphere_inertia
}

/// Shifts an inertia tensor away from the center of mass by `d` (parallel axis theorem).
pub fn inertia_offset(inertia: Mat3, d: Vec3, mass: f32) -> Mat3 {
    let d2 = d.length_squared();
    let outer = Mat3::from_cols(d * d.x, d * d.y, d * d.z);
    inertia + (Mat3::IDENTITY * d2 - outer) * mass
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrate_rotation_quarter_turn() {
        let q = integrate_rotation(
            Quat::IDENTITY,
            Vec3::new(0.0, std::f32::consts::FRAC_PI_2, 0.0),
            1.0,
        );
        let rotated = q * Vec3::X;
        assert!((rotated - Vec3::new(0.0, 0.0, -1.0)).length() < 1.0e-5);
    }

    #[test]
    fn perpendicular_is_perpendicular() {
        for v in [Vec3::X, Vec3::Y, Vec3::new(0.3, -0.9, 0.1).normalize()] {
            let p = normalized_perpendicular(v);
            assert!(v.dot(p).abs() < 1.0e-6);
            assert!((p.length() - 1.0).abs() < 1.0e-5);
        }
    }
}
