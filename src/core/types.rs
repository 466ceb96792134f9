use glam::{Mat3, Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::utils::math::inertia_offset;

/// Axis-aligned bounding box.
///
/// The "invalid" box (`min > max`) is used as a tombstone throughout the
/// broadphase: it never overlaps anything, including itself.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const INVALID: Aabb = Aabb {
        min: Vec3::splat(f32::MAX),
        max: Vec3::splat(f32::MIN),
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_center_extents(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    pub fn from_points(points: &[Vec3]) -> Self {
        let mut bounds = Self::INVALID;
        for p in points {
            bounds.encapsulate_point(*p);
        }
        bounds
    }

    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y && self.min.z <= self.max.z
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }

    pub fn contains(&self, other: &Aabb) -> bool {
        other.min.x >= self.min.x
            && other.max.x <= self.max.x
            && other.min.y >= self.min.y
            && other.max.y <= self.max.y
            && other.min.z >= self.min.z
            && other.max.z <= self.max.z
    }

    pub fn encapsulate_point(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn encapsulate(&mut self, other: &Aabb) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn expanded(&self, margin: Vec3) -> Aabb {
        Aabb {
            min: self.min - margin,
            max: self.max + margin,
        }
    }

    pub fn translated(&self, offset: Vec3) -> Aabb {
        Aabb {
            min: self.min + offset,
            max: self.max + offset,
        }
    }

    /// Bounds swept along a displacement: the union of the box at the start
    /// and at the end of the motion.
    pub fn swept(&self, displacement: Vec3) -> Aabb {
        let mut result = *self;
        result.encapsulate(&self.translated(displacement));
        result
    }

    /// Conservative bounds of this box under a rotation + translation.
    pub fn transformed(&self, rotation: Quat, translation: Vec3) -> Aabb {
        let abs = {
            let m = Mat3::from_quat(rotation);
            Mat3::from_cols(m.x_axis.abs(), m.y_axis.abs(), m.z_axis.abs())
        };
        let center = rotation * self.center() + translation;
        let extents = abs * self.extents();
        Aabb::from_center_extents(center, extents)
    }

    pub fn surface_area_half(&self) -> f32 {
        if !self.is_valid() {
            return 0.0;
        }
        let size = self.max - self.min;
        size.x * size.y + size.y * size.z + size.z * size.x
    }
}

/// Mass, inertia tensor about the center of mass, and the center of mass in
/// shape-local space.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MassProperties {
    pub mass: f32,
    pub inertia: Mat3,
    pub center_of_mass: Vec3,
}

impl Default for MassProperties {
    fn default() -> Self {
        Self {
            mass: 1.0,
            inertia: Mat3::IDENTITY,
            center_of_mass: Vec3::ZERO,
        }
    }
}

impl MassProperties {
    pub fn new(mass: f32, inertia: Mat3) -> Self {
        Self {
            mass,
            inertia,
            center_of_mass: Vec3::ZERO,
        }
    }

    /// Merges another mass into this one, shifting both inertia tensors to the
    /// combined center of mass.
    pub fn merge(&self, other: &MassProperties) -> MassProperties {
        let total_mass = self.mass + other.mass;
        if total_mass < 1.0e-9 {
            return *self;
        }
        let com = (self.center_of_mass * self.mass + other.center_of_mass * other.mass) / total_mass;
        let inertia = inertia_offset(self.inertia, self.center_of_mass - com, self.mass)
            + inertia_offset(other.inertia, other.center_of_mass - com, other.mass);
        MassProperties {
            mass: total_mass,
            inertia,
            center_of_mass: com,
        }
    }

    /// Rotates the inertia tensor into a parent frame.
    pub fn rotated(&self, rotation: Quat) -> MassProperties {
        let m = Mat3::from_quat(rotation);
        MassProperties {
            mass: self.mass,
            inertia: m * self.inertia * m.transpose(),
            center_of_mass: rotation * self.center_of_mass,
        }
    }

    pub fn translated(&self, offset: Vec3) -> MassProperties {
        MassProperties {
            mass: self.mass,
            inertia: self.inertia,
            center_of_mass: self.center_of_mass + offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_box_overlaps_nothing() {
        let invalid = Aabb::INVALID;
        let unit = Aabb::new(Vec3::ZERO, Vec3::ONE);
        assert!(!invalid.is_valid());
        assert!(!invalid.overlaps(&unit));
        assert!(!invalid.overlaps(&invalid));
    }

    #[test]
    fn transformed_bounds_stay_conservative() {
        let bounds = Aabb::from_center_extents(Vec3::ZERO, Vec3::new(2.0, 1.0, 1.0));
        let rotated = bounds.transformed(Quat::from_rotation_z(std::f32::consts::FRAC_PI_2), Vec3::ZERO);
        // After a 90 degree roll the long axis points along Y.
        assert!(rotated.max.y >= 2.0 - 1.0e-5);
        assert!(rotated.max.x >= 1.0 - 1.0e-5);
    }

    #[test]
    fn merged_mass_properties_conserve_mass() {
        let a = MassProperties::new(2.0, Mat3::IDENTITY).translated(Vec3::X);
        let b = MassProperties::new(2.0, Mat3::IDENTITY).translated(-Vec3::X);
        let merged = a.merge(&b);
        assert!((merged.mass - 4.0).abs() < 1.0e-6);
        assert!(merged.center_of_mass.length() < 1.0e-6);
        // Moving mass off-axis adds inertia about the perpendicular axes.
        assert!(merged.inertia.y_axis.y > a.inertia.y_axis.y);
    }
}
