//! Narrowphase: reduces a pair of arbitrary shapes to contact manifolds.
//!
//! Shapes are decomposed into convex leaves; each leaf pair is dispatched to
//! the cheapest applicable routine (analytic sphere-sphere, separating-axis
//! box-box, GJK/EPA otherwise). Leaf results carry the two supporting face
//! polygons, from which the full manifold is built by polygon clipping.
//!
//! Convention: the contact normal is a unit vector pointing from shape A
//! toward shape B. Penetration is positive when overlapping and negative for
//! speculative contacts that have not touched yet.

use glam::{Quat, Vec3};
use log::warn;

use crate::collision::clipping::{manifold_between_two_faces, prune_contact_points, FaceContact};
use crate::collision::gjk::{closest_points, GjkResult};
use crate::config::{PhysicsSettings, MAX_MANIFOLD_POINTS};
use crate::shapes::{ConvexLeaf, Shape, SubShapeId, SubShapeIdBuilder};

/// One leaf-pair collision, before manifold construction.
#[derive(Debug, Clone)]
pub struct CollideShapeResult {
    pub point_on_a: Vec3,
    pub point_on_b: Vec3,
    /// Unit contact axis from A toward B.
    pub axis: Vec3,
    /// Positive when overlapping, negative separation otherwise.
    pub penetration: f32,
    pub face_a: Vec<Vec3>,
    pub face_b: Vec<Vec3>,
    pub sub_shape_id_a: SubShapeId,
    pub sub_shape_id_b: SubShapeId,
}

/// A contact manifold between two bodies, keyed by the sub-shape pair.
#[derive(Debug, Clone)]
pub struct Manifold {
    /// Unit normal from body A toward body B, world space.
    pub normal: Vec3,
    pub points: Vec<FaceContact>,
    pub sub_shape_id_a: SubShapeId,
    pub sub_shape_id_b: SubShapeId,
}

/// Collides two posed shapes and returns the reduced manifolds.
pub fn collide_body_pair(
    shape_a: &Shape,
    position_a: Vec3,
    rotation_a: Quat,
    shape_b: &Shape,
    position_b: Vec3,
    rotation_b: Quat,
    settings: &PhysicsSettings,
) -> Vec<Manifold> {
    let mut leaves_a = Vec::new();
    let mut leaves_b = Vec::new();
    shape_a.collect_leaves(position_a, rotation_a, Vec3::ONE, SubShapeIdBuilder::new(), &mut leaves_a);
    shape_b.collect_leaves(position_b, rotation_b, Vec3::ONE, SubShapeIdBuilder::new(), &mut leaves_b);

    let speculative = settings.speculative_contact_distance;
    let margin = Vec3::splat(speculative);

    let mut manifolds: Vec<Manifold> = Vec::new();
    for leaf_a in &leaves_a {
        let bounds_a = leaf_a.bounds().expanded(margin);
        for leaf_b in &leaves_b {
            if !bounds_a.overlaps(&leaf_b.bounds()) {
                continue;
            }
            let Some(result) = collide_leaves(leaf_a, leaf_b, speculative) else {
                continue;
            };

            let max_separation_sq = speculative * speculative + settings.manifold_tolerance_sq;
            let mut points = manifold_between_two_faces(
                result.point_on_a,
                result.point_on_b,
                result.axis,
                max_separation_sq,
                &result.face_a,
                &result.face_b,
            );
            prune_contact_points(&mut points, result.axis, MAX_MANIFOLD_POINTS);

            let manifold = Manifold {
                normal: result.axis,
                points,
                sub_shape_id_a: result.sub_shape_id_a,
                sub_shape_id_b: result.sub_shape_id_b,
            };

            if settings.use_manifold_reduction {
                merge_manifold(&mut manifolds, manifold, settings.contact_normal_cos_max_delta_rotation);
            } else {
                manifolds.push(manifold);
            }
        }
    }

    for manifold in &mut manifolds {
        prune_contact_points(&mut manifold.points, manifold.normal, MAX_MANIFOLD_POINTS);
    }
    manifolds
}

/// Folds a new manifold into the set: manifolds whose normals agree within
/// the configured tolerance accumulate their points instead of multiplying.
fn merge_manifold(manifolds: &mut Vec<Manifold>, manifold: Manifold, cos_max_delta: f32) {
    for existing in manifolds.iter_mut() {
        if existing.normal.dot(manifold.normal) >= cos_max_delta {
            existing.points.extend_from_slice(&manifold.points);
            // The first sub-shape pair keeps naming the merged manifold.
            return;
        }
    }
    manifolds.push(manifold);
}

/// Collides two convex leaves. Returns `None` when they are further apart
/// than `max_separation` or the geometry is degenerate.
pub fn collide_leaves(
    leaf_a: &ConvexLeaf,
    leaf_b: &ConvexLeaf,
    max_separation: f32,
) -> Option<CollideShapeResult> {
    if let (Shape::Sphere { radius: radius_a }, Shape::Sphere { radius: radius_b }) =
        (leaf_a.shape, leaf_b.shape)
    {
        return collide_spheres(leaf_a, *radius_a, leaf_b, *radius_b, max_separation);
    }

    let (axis, penetration, point_on_a, point_on_b) =
        match closest_points(leaf_a, leaf_b, max_separation) {
            GjkResult::Penetrating { depth, point_on_a, point_on_b, axis } => {
                (axis, depth, point_on_a, point_on_b)
            }
            GjkResult::Separated { distance, point_on_a, point_on_b, axis } => {
                if distance > max_separation {
                    return None;
                }
                (axis, -distance, point_on_a, point_on_b)
            }
            GjkResult::Degenerate => {
                warn!("narrowphase produced a degenerate result, contact skipped");
                return None;
            }
        };

    if axis.length_squared() < 0.5 {
        // Zero-length normals are skipped silently (traced in debug builds).
        warn!("narrowphase produced a zero-length normal, contact skipped");
        return None;
    }

    Some(CollideShapeResult {
        point_on_a,
        point_on_b,
        axis,
        penetration,
        face_a: supporting_face(leaf_a, axis),
        face_b: supporting_face(leaf_b, -axis),
        sub_shape_id_a: leaf_a.sub_shape_id,
        sub_shape_id_b: leaf_b.sub_shape_id,
    })
}

fn collide_spheres(
    leaf_a: &ConvexLeaf,
    radius_a: f32,
    leaf_b: &ConvexLeaf,
    radius_b: f32,
    max_separation: f32,
) -> Option<CollideShapeResult> {
    let radius_a = radius_a * leaf_a.scale.abs().max_element();
    let radius_b = radius_b * leaf_b.scale.abs().max_element();
    let delta = leaf_b.position - leaf_a.position;
    let center_distance = delta.length();
    let penetration = radius_a + radius_b - center_distance;
    if -penetration > max_separation {
        return None;
    }
    let axis = if center_distance > 1.0e-6 { delta / center_distance } else { Vec3::Y };
    let point_on_a = leaf_a.position + axis * radius_a;
    let point_on_b = leaf_b.position - axis * radius_b;
    Some(CollideShapeResult {
        point_on_a,
        point_on_b,
        axis,
        penetration,
        face_a: vec![point_on_a],
        face_b: vec![point_on_b],
        sub_shape_id_a: leaf_a.sub_shape_id,
        sub_shape_id_b: leaf_b.sub_shape_id,
    })
}

/// The face of a leaf most aligned with `direction` (its outward normal is
/// within the supporting cone of `direction`), as a world-space polygon.
pub fn supporting_face(leaf: &ConvexLeaf, direction: Vec3) -> Vec<Vec3> {
    let dir_local = (leaf.rotation.conjugate() * direction) * leaf.scale;
    match leaf.shape {
        Shape::Sphere { .. } => vec![leaf.support(direction)],
        Shape::Box { half_extents } => {
            let he = *half_extents;
            let abs = dir_local.abs();
            let (axis, sign) = if abs.x >= abs.y && abs.x >= abs.z {
                (0, dir_local.x.signum())
            } else if abs.y >= abs.z {
                (1, dir_local.y.signum())
            } else {
                (2, dir_local.z.signum())
            };
            let (u_index, v_index) = match axis {
                0 => (1, 2),
                1 => (0, 2),
                _ => (0, 1),
            };
            let mut center = Vec3::ZERO;
            center[axis] = he[axis] * sign;
            let mut u = Vec3::ZERO;
            u[u_index] = he[u_index];
            let mut v = Vec3::ZERO;
            v[v_index] = he[v_index];
            // Loop order: consecutive vertices share an edge.
            [center + u + v, center + u - v, center - u - v, center - u + v]
                .iter()
                .map(|p| leaf.position + leaf.rotation * (*p * leaf.scale))
                .collect()
        }
        Shape::Capsule { radius, half_height } => {
            let axis_world = leaf.rotation * Vec3::Y;
            let radius = radius * leaf.scale.x.abs().max(leaf.scale.z.abs());
            let half_height = half_height * leaf.scale.y.abs();
            let alignment = direction.normalize_or_zero().dot(axis_world);
            if alignment.abs() > 0.9 {
                // Cap contact: a single point.
                return vec![leaf.support(direction)];
            }
            // Side contact: the segment pushed out along the radial direction.
            let radial = (direction - axis_world * direction.dot(axis_world)).normalize_or_zero() * radius;
            let top = leaf.position + axis_world * half_height + radial;
            let bottom = leaf.position - axis_world * half_height + radial;
            vec![bottom, top]
        }
        Shape::ConvexHull { points } => {
            let dir = dir_local.normalize_or_zero();
            if dir == Vec3::ZERO {
                return vec![leaf.support(direction)];
            }
            let mut best = f32::MIN;
            for p in points {
                best = best.max(p.dot(dir));
            }
            let bounds = leaf.shape.local_bounds();
            let tolerance = 1.0e-3 * bounds.extents().max_element().max(1.0);
            let mut face: Vec<Vec3> = points
                .iter()
                .filter(|p| p.dot(dir) >= best - tolerance)
                .copied()
                .collect();
            if face.len() > 2 {
                sort_polygon_around_centroid(&mut face, dir);
            }
            face.iter()
                .map(|p| leaf.position + leaf.rotation * (*p * leaf.scale))
                .collect()
        }
        _ => vec![leaf.support(direction)],
    }
}

fn sort_polygon_around_centroid(points: &mut [Vec3], normal: Vec3) {
    let centroid = points.iter().copied().sum::<Vec3>() / points.len() as f32;
    let u = crate::utils::math::normalized_perpendicular(normal);
    let v = normal.cross(u);
    points.sort_unstable_by(|a, b| {
        let pa = *a - centroid;
        let pb = *b - centroid;
        let angle_a = pa.dot(v).atan2(pa.dot(u));
        let angle_b = pb.dot(v).atan2(pb.dot(u));
        angle_a.partial_cmp(&angle_b).unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Result of sweeping leaf A along a displacement against leaf B.
#[derive(Debug, Clone, Copy)]
pub struct ShapeCastResult {
    /// Fraction of the displacement at which contact occurs (0 when already
    /// overlapping at the start).
    pub fraction: f32,
    /// Contact point on B, world space.
    pub contact_point: Vec3,
    /// Unit contact normal from A toward B at the time of impact.
    pub normal: Vec3,
    /// Penetration at the reported fraction (only non-zero for overlapping starts).
    pub penetration: f32,
    pub sub_shape_id_b: SubShapeId,
}

const CAST_TOLERANCE: f32 = 1.0e-3;
const MAX_CAST_ITERATIONS: usize = 32;

/// Conservative-advancement linear cast of a convex leaf along `delta`.
/// With `return_deepest_point` an overlapping start still reports a hit at
/// fraction zero instead of being ignored.
pub fn cast_leaf(
    leaf_a: &ConvexLeaf,
    delta: Vec3,
    leaf_b: &ConvexLeaf,
    return_deepest_point: bool,
) -> Option<ShapeCastResult> {
    let mut fraction: f32 = 0.0;

    for _ in 0..MAX_CAST_ITERATIONS {
        let moved = ConvexLeaf {
            position: leaf_a.position + delta * fraction,
            ..*leaf_a
        };

        match closest_points(&moved, leaf_b, f32::MAX) {
            GjkResult::Penetrating { depth, point_on_b, axis, .. } => {
                if fraction == 0.0 && !return_deepest_point {
                    return None;
                }
                return Some(ShapeCastResult {
                    fraction,
                    contact_point: point_on_b,
                    normal: axis,
                    penetration: depth,
                    sub_shape_id_b: leaf_b.sub_shape_id,
                });
            }
            GjkResult::Separated { distance, point_on_b, axis, .. } => {
                if distance <= CAST_TOLERANCE {
                    return Some(ShapeCastResult {
                        fraction,
                        contact_point: point_on_b,
                        normal: axis,
                        penetration: 0.0,
                        sub_shape_id_b: leaf_b.sub_shape_id,
                    });
                }
                let approach = delta.dot(axis);
                if approach <= 1.0e-9 {
                    // Moving parallel or away; no hit along this sweep.
                    return None;
                }
                fraction += distance / approach;
                if fraction > 1.0 {
                    return None;
                }
            }
            GjkResult::Degenerate => return None,
        }
    }
    None
}

/// Sweeps shape A (all leaves) against shape B and returns the earliest hit.
#[allow(clippy::too_many_arguments)]
pub fn cast_shape(
    shape_a: &Shape,
    position_a: Vec3,
    rotation_a: Quat,
    delta: Vec3,
    shape_b: &Shape,
    position_b: Vec3,
    rotation_b: Quat,
    return_deepest_point: bool,
) -> Option<ShapeCastResult> {
    let mut leaves_a = Vec::new();
    let mut leaves_b = Vec::new();
    shape_a.collect_leaves(position_a, rotation_a, Vec3::ONE, SubShapeIdBuilder::new(), &mut leaves_a);
    shape_b.collect_leaves(position_b, rotation_b, Vec3::ONE, SubShapeIdBuilder::new(), &mut leaves_b);

    let mut best: Option<ShapeCastResult> = None;
    for leaf_a in &leaves_a {
        let swept = leaf_a.bounds().swept(delta);
        for leaf_b in &leaves_b {
            if !swept.overlaps(&leaf_b.bounds()) {
                continue;
            }
            if let Some(hit) = cast_leaf(leaf_a, delta, leaf_b, return_deepest_point) {
                if best.as_ref().map(|b| hit.fraction < b.fraction).unwrap_or(true) {
                    best = Some(hit);
                }
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> PhysicsSettings {
        PhysicsSettings::default()
    }

    #[test]
    fn stacked_boxes_make_a_four_point_manifold() {
        let cube = Shape::Box { half_extents: Vec3::splat(0.5) };
        let manifolds = collide_body_pair(
            &cube,
            Vec3::ZERO,
            Quat::IDENTITY,
            &cube,
            Vec3::new(0.0, 0.98, 0.0),
            Quat::IDENTITY,
            &settings(),
        );
        assert_eq!(manifolds.len(), 1);
        let manifold = &manifolds[0];
        assert!(manifold.normal.y > 0.9, "normal {:?}", manifold.normal);
        assert_eq!(manifold.points.len(), 4);
        for point in &manifold.points {
            assert!((point.penetration - 0.02).abs() < 5.0e-3, "penetration {}", point.penetration);
        }
    }

    #[test]
    fn nearby_spheres_make_a_speculative_contact() {
        let sphere = Shape::Sphere { radius: 0.5 };
        let manifolds = collide_body_pair(
            &sphere,
            Vec3::ZERO,
            Quat::IDENTITY,
            &sphere,
            Vec3::new(0.0, 1.01, 0.0),
            Quat::IDENTITY,
            &settings(),
        );
        assert_eq!(manifolds.len(), 1);
        let point = &manifolds[0].points[0];
        assert!(point.penetration < 0.0, "speculative contacts have negative penetration");
        assert!((point.penetration + 0.01).abs() < 2.0e-3);
    }

    #[test]
    fn distant_shapes_produce_no_manifold() {
        let sphere = Shape::Sphere { radius: 0.5 };
        let manifolds = collide_body_pair(
            &sphere,
            Vec3::ZERO,
            Quat::IDENTITY,
            &sphere,
            Vec3::new(0.0, 5.0, 0.0),
            Quat::IDENTITY,
            &settings(),
        );
        assert!(manifolds.is_empty());
    }

    #[test]
    fn compound_children_collide_under_distinct_sub_shape_ids() {
        use crate::shapes::CompoundChild;
        let compound = Shape::Compound {
            children: vec![
                CompoundChild { shape: Shape::sphere(0.5), position: Vec3::new(-2.0, 0.0, 0.0), rotation: Quat::IDENTITY },
                CompoundChild { shape: Shape::sphere(0.5), position: Vec3::new(2.0, 0.0, 0.0), rotation: Quat::IDENTITY },
            ],
        };
        let sphere = Shape::Sphere { radius: 0.5 };
        let manifolds = collide_body_pair(
            &compound,
            Vec3::ZERO,
            Quat::IDENTITY,
            &sphere,
            Vec3::new(2.0, 0.9, 0.0),
            Quat::IDENTITY,
            &settings(),
        );
        assert_eq!(manifolds.len(), 1);
        assert!(!manifolds[0].sub_shape_id_a.is_empty());
        assert!(manifolds[0].sub_shape_id_b.is_empty());
    }

    #[test]
    fn cast_stops_a_sphere_at_a_wall() {
        let sphere = Shape::Sphere { radius: 0.1 };
        let wall = Shape::Box { half_extents: Vec3::new(0.1, 10.0, 10.0) };
        let hit = cast_shape(
            &sphere,
            Vec3::ZERO,
            Quat::IDENTITY,
            Vec3::new(2.0, 0.0, 0.0),
            &wall,
            Vec3::new(1.0, 0.0, 0.0),
            Quat::IDENTITY,
            true,
        )
        .expect("cast should hit the wall");
        // Sphere surface meets the wall face at x = 0.9, i.e. 40% of the sweep.
        assert!((hit.fraction - 0.4).abs() < 0.02, "fraction {}", hit.fraction);
        assert!(hit.normal.x > 0.9);
        assert!((hit.contact_point.x - 0.9).abs() < 0.05);
    }

    #[test]
    fn cast_ignores_receding_motion() {
        let sphere = Shape::Sphere { radius: 0.1 };
        let wall = Shape::Box { half_extents: Vec3::new(0.1, 10.0, 10.0) };
        let hit = cast_shape(
            &sphere,
            Vec3::ZERO,
            Quat::IDENTITY,
            Vec3::new(-2.0, 0.0, 0.0),
            &wall,
            Vec3::new(1.0, 0.0, 0.0),
            Quat::IDENTITY,
            false,
        );
        assert!(hit.is_none());
    }
}
