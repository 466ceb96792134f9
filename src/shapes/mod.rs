//! Collision shapes behind the narrow interface the simulation needs:
//! bounds, inner radius, support mapping, mass properties, and enumeration of
//! convex leaves with stable sub-shape ids.
//!
//! Shapes are immutable and shared between bodies via `Arc`. Compound,
//! scaled, and rotated-translated shapes are containers; collision always
//! happens between convex leaves.

pub mod subshape;

pub use subshape::{SubShapeId, SubShapeIdBuilder};

use std::sync::Arc;

use glam::{Quat, Vec3};

use crate::core::types::{Aabb, MassProperties};
use crate::utils::math::{inertia_box, inertia_capsule, inertia_sphere};

/// A child of a compound shape, posed in the compound's local space.
#[derive(Debug, Clone)]
pub struct CompoundChild {
    pub shape: Arc<Shape>,
    pub position: Vec3,
    pub rotation: Quat,
}

/// Supported shape variants. Capsules are aligned along local Y.
#[derive(Debug, Clone)]
pub enum Shape {
    Sphere { radius: f32 },
    Box { half_extents: Vec3 },
    Capsule { radius: f32, half_height: f32 },
    ConvexHull { points: Vec<Vec3> },
    Compound { children: Vec<CompoundChild> },
    Scaled { inner: Arc<Shape>, scale: Vec3 },
    RotatedTranslated { inner: Arc<Shape>, position: Vec3, rotation: Quat },
}

/// A convex leaf of a shape hierarchy, fully posed in world space.
#[derive(Debug, Clone, Copy)]
pub struct ConvexLeaf<'a> {
    pub shape: &'a Shape,
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub sub_shape_id: SubShapeId,
}

impl Shape {
    pub fn sphere(radius: f32) -> Arc<Shape> {
        Arc::new(Shape::Sphere { radius })
    }

    pub fn cuboid(half_extents: Vec3) -> Arc<Shape> {
        Arc::new(Shape::Box { half_extents })
    }

    pub fn capsule(radius: f32, half_height: f32) -> Arc<Shape> {
        Arc::new(Shape::Capsule { radius, half_height })
    }

    pub fn convex_hull(points: Vec<Vec3>) -> Arc<Shape> {
        Arc::new(Shape::ConvexHull { points })
    }

    pub fn compound(children: Vec<CompoundChild>) -> Arc<Shape> {
        Arc::new(Shape::Compound { children })
    }

    pub fn scaled(inner: Arc<Shape>, scale: Vec3) -> Arc<Shape> {
        Arc::new(Shape::Scaled { inner, scale })
    }

    pub fn rotated_translated(inner: Arc<Shape>, position: Vec3, rotation: Quat) -> Arc<Shape> {
        Arc::new(Shape::RotatedTranslated { inner, position, rotation })
    }

    pub fn is_convex(&self) -> bool {
        matches!(
            self,
            Shape::Sphere { .. } | Shape::Box { .. } | Shape::Capsule { .. } | Shape::ConvexHull { .. }
        )
    }

    /// Bounds in the shape's local frame, with wrapper scaling folded in.
    pub fn local_bounds(&self) -> Aabb {
        match self {
            Shape::Sphere { radius } => {
                Aabb::from_center_extents(Vec3::ZERO, Vec3::splat(*radius))
            }
            Shape::Box { half_extents } => Aabb::from_center_extents(Vec3::ZERO, *half_extents),
            Shape::Capsule { radius, half_height } => Aabb::from_center_extents(
                Vec3::ZERO,
                Vec3::new(*radius, half_height + radius, *radius),
            ),
            Shape::ConvexHull { points } => Aabb::from_points(points),
            Shape::Compound { children } => {
                let mut bounds = Aabb::INVALID;
                for child in children {
                    bounds.encapsulate(
                        &child.shape.local_bounds().transformed(child.rotation, child.position),
                    );
                }
                bounds
            }
            Shape::Scaled { inner, scale } => {
                let inner_bounds = inner.local_bounds();
                let a = inner_bounds.min * *scale;
                let b = inner_bounds.max * *scale;
                Aabb::new(a.min(b), a.max(b))
            }
            Shape::RotatedTranslated { inner, position, rotation } => {
                inner.local_bounds().transformed(*rotation, *position)
            }
        }
    }

    /// Conservative world-space bounds under a body pose.
    pub fn world_bounds(&self, rotation: Quat, position: Vec3) -> Aabb {
        self.local_bounds().transformed(rotation, position)
    }

    /// Radius of the largest sphere that fits inside the shape. Determines
    /// the translation budget for linear-cast motion quality.
    pub fn inner_radius(&self) -> f32 {
        match self {
            Shape::Sphere { radius } => *radius,
            Shape::Box { half_extents } => half_extents.min_element(),
            Shape::Capsule { radius, .. } => *radius,
            Shape::ConvexHull { points } => Aabb::from_points(points).extents().min_element(),
            Shape::Compound { children } => children
                .iter()
                .map(|child| child.shape.inner_radius())
                .fold(f32::MAX, f32::min),
            Shape::Scaled { inner, scale } => inner.inner_radius() * scale.abs().min_element(),
            Shape::RotatedTranslated { inner, .. } => inner.inner_radius(),
        }
    }

    fn volume(&self) -> f32 {
        match self {
            Shape::Sphere { radius } => 4.0 / 3.0 * std::f32::consts::PI * radius.powi(3),
            Shape::Box { half_extents } => 8.0 * half_extents.x * half_extents.y * half_extents.z,
            Shape::Capsule { radius, half_height } => {
                std::f32::consts::PI * radius * radius * (2.0 * half_height)
                    + 4.0 / 3.0 * std::f32::consts::PI * radius.powi(3)
            }
            // Half the bounding volume is a serviceable stand-in for a hull.
            Shape::ConvexHull { points } => {
                let e = Aabb::from_points(points).extents();
                4.0 * e.x * e.y * e.z
            }
            Shape::Compound { children } => children.iter().map(|c| c.shape.volume()).sum(),
            Shape::Scaled { inner, scale } => {
                inner.volume() * (scale.x * scale.y * scale.z).abs()
            }
            Shape::RotatedTranslated { inner, .. } => inner.volume(),
        }
    }

    fn mass_properties_unit_density(&self) -> MassProperties {
        match self {
            Shape::Sphere { radius } => {
                let mass = self.volume();
                MassProperties::new(mass, inertia_sphere(*radius, mass))
            }
            Shape::Box { half_extents } => {
                let mass = self.volume();
                MassProperties::new(mass, inertia_box(*half_extents, mass))
            }
            Shape::Capsule { radius, half_height } => {
                let mass = self.volume();
                MassProperties::new(mass, inertia_capsule(*radius, *half_height, mass))
            }
            Shape::ConvexHull { points } => {
                let bounds = Aabb::from_points(points);
                let mass = self.volume();
                MassProperties {
                    mass,
                    inertia: inertia_box(bounds.extents(), mass),
                    center_of_mass: bounds.center(),
                }
            }
            Shape::Compound { children } => {
                let mut total = MassProperties {
                    mass: 0.0,
                    inertia: glam::Mat3::ZERO,
                    center_of_mass: Vec3::ZERO,
                };
                for child in children {
                    let props = child
                        .shape
                        .mass_properties_unit_density()
                        .rotated(child.rotation)
                        .translated(child.position);
                    total = if total.mass <= 0.0 { props } else { total.merge(&props) };
                }
                total
            }
            Shape::Scaled { inner, scale } => {
                // Inertia of the scaled solid approximated by its bounding box.
                let ratio = (scale.x * scale.y * scale.z).abs();
                let mass = inner.volume() * ratio;
                let bounds = self.local_bounds();
                MassProperties {
                    mass,
                    inertia: inertia_box(bounds.extents(), mass),
                    center_of_mass: inner.mass_properties_unit_density().center_of_mass * *scale,
                }
            }
            Shape::RotatedTranslated { inner, position, rotation } => inner
                .mass_properties_unit_density()
                .rotated(*rotation)
                .translated(*position),
        }
    }

    /// Mass properties for a given total mass, distributed over the shape's
    /// volume. Offered for convex and compound shapes.
    pub fn compute_mass_properties(&self, mass: f32) -> MassProperties {
        let unit = self.mass_properties_unit_density();
        if unit.mass <= 1.0e-9 {
            return MassProperties::new(mass, glam::Mat3::IDENTITY * mass);
        }
        let ratio = mass / unit.mass;
        MassProperties {
            mass,
            inertia: unit.inertia * ratio,
            center_of_mass: unit.center_of_mass,
        }
    }

    /// Walks the hierarchy and emits every convex leaf posed in world space,
    /// each tagged with the bit-packed path that re-identifies it next frame.
    ///
    /// Non-uniform scale composed through a rotated child is applied along
    /// the child's local axes (same approximation the transform combiner
    /// makes elsewhere in the crate).
    pub fn collect_leaves<'a>(
        &'a self,
        position: Vec3,
        rotation: Quat,
        scale: Vec3,
        builder: SubShapeIdBuilder,
        out: &mut Vec<ConvexLeaf<'a>>,
    ) {
        match self {
            Shape::Sphere { .. }
            | Shape::Box { .. }
            | Shape::Capsule { .. }
            | Shape::ConvexHull { .. } => out.push(ConvexLeaf {
                shape: self,
                position,
                rotation,
                scale,
                sub_shape_id: builder.id(),
            }),
            Shape::Compound { children } => {
                let bits = SubShapeIdBuilder::bits_for(children.len());
                for (index, child) in children.iter().enumerate() {
                    child.shape.collect_leaves(
                        position + rotation * (scale * child.position),
                        rotation * child.rotation,
                        scale,
                        builder.push(index as u32, bits),
                        out,
                    );
                }
            }
            Shape::Scaled { inner, scale: inner_scale } => {
                inner.collect_leaves(position, rotation, scale * *inner_scale, builder, out);
            }
            Shape::RotatedTranslated { inner, position: offset, rotation: tilt } => {
                inner.collect_leaves(
                    position + rotation * (scale * *offset),
                    rotation * *tilt,
                    scale,
                    builder,
                    out,
                );
            }
        }
    }

    /// Resolves a sub-shape id back to the leaf shape it names.
    pub fn leaf_shape(&self, id: SubShapeId) -> Option<&Shape> {
        match self {
            Shape::Sphere { .. }
            | Shape::Box { .. }
            | Shape::Capsule { .. }
            | Shape::ConvexHull { .. } => Some(self),
            Shape::Compound { children } => {
                let bits = SubShapeIdBuilder::bits_for(children.len());
                let (index, rest) = id.pop(bits);
                children.get(index as usize).and_then(|child| child.shape.leaf_shape(rest))
            }
            Shape::Scaled { inner, .. } => inner.leaf_shape(id),
            Shape::RotatedTranslated { inner, .. } => inner.leaf_shape(id),
        }
    }
}

impl ConvexLeaf<'_> {
    /// World-space support point: the furthest point of the leaf along `direction`.
    pub fn support(&self, direction: Vec3) -> Vec3 {
        let dir_local = self.rotation.conjugate() * direction;
        // For a diagonal scale matrix M, sup_{x in M·S} d·x = M · sup_S (M d).
        let local = self.scale * local_support(self.shape, dir_local * self.scale);
        self.position + self.rotation * local
    }

    pub fn bounds(&self) -> Aabb {
        let local = self.shape.local_bounds();
        let a = local.min * self.scale;
        let b = local.max * self.scale;
        Aabb::new(a.min(b), a.max(b)).transformed(self.rotation, self.position)
    }

    pub fn inner_radius(&self) -> f32 {
        self.shape.inner_radius() * self.scale.abs().min_element()
    }
}

/// Support mapping of a convex variant in its own local frame.
fn local_support(shape: &Shape, direction: Vec3) -> Vec3 {
    match shape {
        Shape::Sphere { radius } => direction.normalize_or_zero() * *radius,
        Shape::Box { half_extents } => Vec3::new(
            half_extents.x.copysign(direction.x),
            half_extents.y.copysign(direction.y),
            half_extents.z.copysign(direction.z),
        ),
        Shape::Capsule { radius, half_height } => {
            let cap = Vec3::new(0.0, half_height.copysign(direction.y), 0.0);
            cap + direction.normalize_or_zero() * *radius
        }
        Shape::ConvexHull { points } => {
            let mut best = Vec3::ZERO;
            let mut best_dot = f32::MIN;
            for p in points {
                let dot = p.dot(direction);
                if dot > best_dot {
                    best_dot = dot;
                    best = *p;
                }
            }
            best
        }
        _ => {
            debug_assert!(false, "support mapping queried on a non-convex shape");
            Vec3::ZERO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compound_leaves_carry_distinct_paths() {
        let shape = Shape::compound(vec![
            CompoundChild {
                shape: Shape::sphere(0.5),
                position: Vec3::new(-1.0, 0.0, 0.0),
                rotation: Quat::IDENTITY,
            },
            CompoundChild {
                shape: Shape::cuboid(Vec3::splat(0.5)),
                position: Vec3::new(1.0, 0.0, 0.0),
                rotation: Quat::IDENTITY,
            },
        ]);

        let mut leaves = Vec::new();
        shape.collect_leaves(Vec3::ZERO, Quat::IDENTITY, Vec3::ONE, SubShapeIdBuilder::new(), &mut leaves);
        assert_eq!(leaves.len(), 2);
        assert_ne!(leaves[0].sub_shape_id, leaves[1].sub_shape_id);
        assert!(matches!(shape.leaf_shape(leaves[0].sub_shape_id), Some(Shape::Sphere { .. })));
        assert!(matches!(shape.leaf_shape(leaves[1].sub_shape_id), Some(Shape::Box { .. })));
    }

    #[test]
    fn scaled_sphere_support_respects_scale() {
        let shape = Shape::sphere(1.0);
        let mut leaves = Vec::new();
        shape.collect_leaves(
            Vec3::ZERO,
            Quat::IDENTITY,
            Vec3::new(2.0, 1.0, 1.0),
            SubShapeIdBuilder::new(),
            &mut leaves,
        );
        let support = leaves[0].support(Vec3::X);
        assert!((support.x - 2.0).abs() < 1.0e-4);
    }

    #[test]
    fn box_mass_properties_match_analytic_inertia() {
        let shape = Shape::cuboid(Vec3::new(0.5, 0.5, 0.5));
        let props = shape.compute_mass_properties(12.0);
        // Solid cube of side 1: I = m/6 per axis.
        assert!((props.inertia.x_axis.x - 2.0).abs() < 1.0e-4);
        assert!((props.mass - 12.0).abs() < 1.0e-6);
    }

    #[test]
    fn inner_radius_shrinks_with_scale() {
        let shape = Shape::scaled(Shape::cuboid(Vec3::new(1.0, 2.0, 3.0)), Vec3::splat(0.5));
        assert!((shape.inner_radius() - 0.5).abs() < 1.0e-6);
    }
}
