//! Narrowphase queries against the live simulation: ray casts, shape casts,
//! shape overlap, and point containment, with early-out collectors.

use glam::{Quat, Vec3};

use crate::broadphase::BroadPhase;
use crate::collision::gjk::{closest_points, GjkResult};
use crate::collision::narrowphase::{self, Manifold};
use crate::config::PhysicsSettings;
use crate::core::body::BodyId;
use crate::core::body_store::BodyStore;
use crate::core::layers::{ObjectLayer, ObjectLayerPairFilter, ObjectVsBroadPhaseLayerFilter};
use crate::shapes::{ConvexLeaf, Shape, SubShapeId, SubShapeIdBuilder};

/// A ray hit on a body.
#[derive(Debug, Clone, Copy)]
pub struct RayCastHit {
    pub body_id: BodyId,
    pub sub_shape_id: SubShapeId,
    pub fraction: f32,
    pub point: Vec3,
    pub normal: Vec3,
}

/// A shape-cast hit on a body.
#[derive(Debug, Clone, Copy)]
pub struct ShapeCastHit {
    pub body_id: BodyId,
    pub sub_shape_id: SubShapeId,
    pub fraction: f32,
    pub point: Vec3,
    pub normal: Vec3,
}

/// A shape-overlap hit: the manifold between the query shape and a body.
#[derive(Debug, Clone)]
pub struct CollideShapeHit {
    pub body_id: BodyId,
    pub manifold: Manifold,
}

/// A posed convex leaf reported by `collect_transformed_shapes`.
#[derive(Debug, Clone, Copy)]
pub struct TransformedShape {
    pub body_id: BodyId,
    pub sub_shape_id: SubShapeId,
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

/// Receives query hits; returning `false` aborts the query early.
pub trait CollisionCollector<Hit> {
    fn add_hit(&mut self, hit: Hit) -> bool;
}

/// Collects every hit.
pub struct AllHitsCollector<Hit> {
    pub hits: Vec<Hit>,
}

impl<Hit> Default for AllHitsCollector<Hit> {
    fn default() -> Self {
        Self { hits: Vec::new() }
    }
}

impl<Hit> CollisionCollector<Hit> for AllHitsCollector<Hit> {
    fn add_hit(&mut self, hit: Hit) -> bool {
        self.hits.push(hit);
        true
    }
}

/// Stops at the first hit.
pub struct AnyHitCollector<Hit> {
    pub hit: Option<Hit>,
}

impl<Hit> Default for AnyHitCollector<Hit> {
    fn default() -> Self {
        Self { hit: None }
    }
}

impl<Hit> CollisionCollector<Hit> for AnyHitCollector<Hit> {
    fn add_hit(&mut self, hit: Hit) -> bool {
        self.hit = Some(hit);
        false
    }
}

/// World-space query interface over the body store and broadphase.
pub struct NarrowPhaseQuery<'a> {
    store: &'a BodyStore,
    broadphase: &'a BroadPhase,
    bp_filter: &'a dyn ObjectVsBroadPhaseLayerFilter,
    object_filter: &'a dyn ObjectLayerPairFilter,
}

impl<'a> NarrowPhaseQuery<'a> {
    pub fn new(
        store: &'a BodyStore,
        broadphase: &'a BroadPhase,
        bp_filter: &'a dyn ObjectVsBroadPhaseLayerFilter,
        object_filter: &'a dyn ObjectLayerPairFilter,
    ) -> Self {
        Self { store, broadphase, bp_filter, object_filter }
    }

    /// Closest ray hit, if any.
    pub fn cast_ray(&self, origin: Vec3, direction: Vec3, max_distance: f32, query_layer: ObjectLayer) -> Option<RayCastHit> {
        let direction = direction.normalize_or_zero();
        if direction == Vec3::ZERO {
            return None;
        }

        let mut best: Option<RayCastHit> = None;
        self.broadphase.cast_ray(
            origin,
            direction,
            max_distance,
            query_layer,
            self.bp_filter,
            self.object_filter,
            |candidate| {
                // Early-out: the broadphase visits near boxes first, so once
                // a candidate's bounds start beyond the best hit, stop.
                if let Some(best) = &best {
                    if candidate.fraction > best.fraction {
                        return false;
                    }
                }
                let Some(body) = self.store.get(candidate.body_id) else { return true };
                if let Some(hit) = ray_cast_shape(
                    &body.shape,
                    body.position,
                    body.rotation,
                    origin,
                    direction,
                    max_distance,
                ) {
                    let replace = best.as_ref().map(|b| hit.0 < b.fraction).unwrap_or(true);
                    if replace {
                        best = Some(RayCastHit {
                            body_id: candidate.body_id,
                            sub_shape_id: hit.2,
                            fraction: hit.0,
                            point: origin + direction * hit.0,
                            normal: hit.1,
                        });
                    }
                }
                true
            },
        );
        best
    }

    /// Ray cast reporting every body hit, unordered.
    pub fn cast_ray_all<C>(&self, origin: Vec3, direction: Vec3, max_distance: f32, query_layer: ObjectLayer, collector: &mut C)
    where
        C: CollisionCollector<RayCastHit>,
    {
        let direction = direction.normalize_or_zero();
        if direction == Vec3::ZERO {
            return;
        }
        self.broadphase.cast_ray(
            origin,
            direction,
            max_distance,
            query_layer,
            self.bp_filter,
            self.object_filter,
            |candidate| {
                let Some(body) = self.store.get(candidate.body_id) else { return true };
                if let Some((fraction, normal, sub_shape_id)) = ray_cast_shape(
                    &body.shape,
                    body.position,
                    body.rotation,
                    origin,
                    direction,
                    max_distance,
                ) {
                    return collector.add_hit(RayCastHit {
                        body_id: candidate.body_id,
                        sub_shape_id,
                        fraction,
                        point: origin + direction * fraction,
                        normal,
                    });
                }
                true
            },
        );
    }

    /// Sweeps a shape along `delta` and reports the hits.
    #[allow(clippy::too_many_arguments)]
    pub fn cast_shape<C>(
        &self,
        shape: &Shape,
        position: Vec3,
        rotation: Quat,
        delta: Vec3,
        query_layer: ObjectLayer,
        collector: &mut C,
    ) where
        C: CollisionCollector<ShapeCastHit>,
    {
        let bounds = shape.world_bounds(rotation, position);
        let mut candidates: Vec<BodyId> = Vec::new();
        self.broadphase.cast_aabb(&bounds, delta, query_layer, self.bp_filter, self.object_filter, |hit| {
            candidates.push(hit.body_id);
            true
        });
        candidates.sort_unstable();
        candidates.dedup();

        for body_id in candidates {
            let Some(body) = self.store.get(body_id) else { continue };
            if let Some(hit) = narrowphase::cast_shape(
                shape,
                position,
                rotation,
                delta,
                &body.shape,
                body.position,
                body.rotation,
                true,
            ) {
                let keep_going = collector.add_hit(ShapeCastHit {
                    body_id,
                    sub_shape_id: hit.sub_shape_id_b,
                    fraction: hit.fraction,
                    point: hit.contact_point,
                    normal: hit.normal,
                });
                if !keep_going {
                    return;
                }
            }
        }
    }

    /// Overlap test of a posed shape against the world.
    pub fn collide_shape<C>(
        &self,
        shape: &Shape,
        position: Vec3,
        rotation: Quat,
        settings: &PhysicsSettings,
        query_layer: ObjectLayer,
        collector: &mut C,
    ) where
        C: CollisionCollector<CollideShapeHit>,
    {
        let bounds = shape
            .world_bounds(rotation, position)
            .expanded(Vec3::splat(settings.speculative_contact_distance));
        let mut candidates: Vec<BodyId> = Vec::new();
        self.broadphase.collide_aabb(&bounds, query_layer, self.bp_filter, self.object_filter, |hit| {
            candidates.push(hit.body_id);
            true
        });
        candidates.sort_unstable();
        candidates.dedup();

        for body_id in candidates {
            let Some(body) = self.store.get(body_id) else { continue };
            let manifolds = narrowphase::collide_body_pair(
                shape,
                position,
                rotation,
                &body.shape,
                body.position,
                body.rotation,
                settings,
            );
            for manifold in manifolds {
                if manifold.points.iter().all(|p| p.penetration < 0.0) {
                    continue;
                }
                if !collector.add_hit(CollideShapeHit { body_id, manifold }) {
                    return;
                }
            }
        }
    }

    /// Every convex leaf whose owning body's bounds overlap `bounds`, posed
    /// in world space. Useful for custom per-triangle/per-leaf processing.
    pub fn collect_transformed_shapes<C>(&self, bounds: &crate::core::types::Aabb, query_layer: ObjectLayer, collector: &mut C)
    where
        C: CollisionCollector<TransformedShape>,
    {
        let mut candidates: Vec<BodyId> = Vec::new();
        self.broadphase.collide_aabb(bounds, query_layer, self.bp_filter, self.object_filter, |hit| {
            candidates.push(hit.body_id);
            true
        });
        candidates.sort_unstable();
        candidates.dedup();

        for body_id in candidates {
            let Some(body) = self.store.get(body_id) else { continue };
            let mut leaves = Vec::new();
            body.shape.collect_leaves(
                body.position,
                body.rotation,
                Vec3::ONE,
                SubShapeIdBuilder::new(),
                &mut leaves,
            );
            for leaf in leaves {
                if !leaf.bounds().overlaps(bounds) {
                    continue;
                }
                let keep_going = collector.add_hit(TransformedShape {
                    body_id,
                    sub_shape_id: leaf.sub_shape_id,
                    position: leaf.position,
                    rotation: leaf.rotation,
                    scale: leaf.scale,
                });
                if !keep_going {
                    return;
                }
            }
        }
    }

    /// All bodies whose shape contains the point.
    pub fn collide_point<C>(&self, point: Vec3, query_layer: ObjectLayer, collector: &mut C)
    where
        C: CollisionCollector<BodyId>,
    {
        let mut candidates: Vec<BodyId> = Vec::new();
        self.broadphase.collide_point(point, query_layer, self.bp_filter, self.object_filter, |hit| {
            candidates.push(hit.body_id);
            true
        });
        candidates.sort_unstable();
        candidates.dedup();

        let probe_shape = Shape::Sphere { radius: 0.0 };
        let probe = ConvexLeaf {
            shape: &probe_shape,
            position: point,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            sub_shape_id: SubShapeId::EMPTY,
        };

        for body_id in candidates {
            let Some(body) = self.store.get(body_id) else { continue };
            let mut leaves = Vec::new();
            body.shape.collect_leaves(
                body.position,
                body.rotation,
                Vec3::ONE,
                SubShapeIdBuilder::new(),
                &mut leaves,
            );
            let inside = leaves
                .iter()
                .any(|leaf| matches!(closest_points(&probe, leaf, 0.0), GjkResult::Penetrating { .. }));
            if inside && !collector.add_hit(body_id) {
                return;
            }
        }
    }
}

/// Ray against a whole shape: the closest leaf hit.
/// Returns `(distance, world normal, sub shape id)`.
pub fn ray_cast_shape(
    shape: &Shape,
    position: Vec3,
    rotation: Quat,
    origin: Vec3,
    direction: Vec3,
    max_distance: f32,
) -> Option<(f32, Vec3, SubShapeId)> {
    let mut leaves = Vec::new();
    shape.collect_leaves(position, rotation, Vec3::ONE, SubShapeIdBuilder::new(), &mut leaves);

    let mut best: Option<(f32, Vec3, SubShapeId)> = None;
    for leaf in &leaves {
        if let Some((distance, normal)) = ray_cast_leaf(leaf, origin, direction, max_distance) {
            if best.as_ref().map(|b| distance < b.0).unwrap_or(true) {
                best = Some((distance, normal, leaf.sub_shape_id));
            }
        }
    }
    best
}

/// Ray against one convex leaf. Spheres and boxes are tested analytically;
/// other leaves reuse the conservative-advancement cast with a point probe.
fn ray_cast_leaf(leaf: &ConvexLeaf, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<(f32, Vec3)> {
    match leaf.shape {
        Shape::Sphere { radius } => {
            let radius = radius * leaf.scale.abs().max_element();
            ray_sphere(origin, direction, max_distance, leaf.position, radius)
        }
        Shape::Box { half_extents } => {
            // Into box-local space.
            let inv_rotation = leaf.rotation.conjugate();
            let local_origin = inv_rotation * (origin - leaf.position);
            let local_direction = inv_rotation * direction;
            let he = *half_extents * leaf.scale.abs();
            let (distance, local_normal) = ray_box_local(local_origin, local_direction, max_distance, he)?;
            Some((distance, leaf.rotation * local_normal))
        }
        _ => {
            let probe_shape = Shape::Sphere { radius: 0.0 };
            let probe = ConvexLeaf {
                shape: &probe_shape,
                position: origin,
                rotation: Quat::IDENTITY,
                scale: Vec3::ONE,
                sub_shape_id: SubShapeId::EMPTY,
            };
            let hit = narrowphase::cast_leaf(&probe, direction * max_distance, leaf, false)?;
            Some((hit.fraction * max_distance, -hit.normal))
        }
    }
}

fn ray_sphere(origin: Vec3, direction: Vec3, max_distance: f32, center: Vec3, radius: f32) -> Option<(f32, Vec3)> {
    let oc = origin - center;
    let b = 2.0 * oc.dot(direction);
    let c = oc.length_squared() - radius * radius;
    let discriminant = b * b - 4.0 * c;
    if discriminant < 0.0 {
        return None;
    }
    let t = (-b - discriminant.sqrt()) * 0.5;
    if t < 0.0 || t > max_distance {
        return None;
    }
    let point = origin + direction * t;
    Some((t, (point - center).normalize_or_zero()))
}

fn ray_box_local(origin: Vec3, direction: Vec3, max_distance: f32, half_extents: Vec3) -> Option<(f32, Vec3)> {
    let mut t_min = 0.0f32;
    let mut t_max = max_distance;
    let mut normal = Vec3::ZERO;

    for axis in 0..3 {
        if direction[axis].abs() < 1.0e-9 {
            if origin[axis].abs() > half_extents[axis] {
                return None;
            }
            continue;
        }
        let inv = 1.0 / direction[axis];
        let mut t1 = (-half_extents[axis] - origin[axis]) * inv;
        let mut t2 = (half_extents[axis] - origin[axis]) * inv;
        let mut axis_normal = Vec3::ZERO;
        axis_normal[axis] = -direction[axis].signum();
        if t1 > t2 {
            std::mem::swap(&mut t1, &mut t2);
        }
        if t1 > t_min {
            t_min = t1;
            normal = axis_normal;
        }
        t_max = t_max.min(t2);
        if t_min > t_max {
            return None;
        }
    }
    if normal == Vec3::ZERO {
        // Ray started inside the box.
        normal = -direction;
    }
    Some((t_min, normal))
}
