//! Continuous collision detection for linear-cast bodies.
//!
//! Bodies whose per-sub-step translation exceeds a fraction of their shape's
//! inner radius skip normal position integration and get a [`CcdBody`]
//! record. `find_ccd_contacts` sweeps each record against the broadphase and
//! narrowphase; `resolve_ccd_contacts` applies the impulse response and
//! advances each body to its time of impact plus a small slop.

use glam::Vec3;

use crate::broadphase::BroadPhase;
use crate::collision::cache::ContactCacheSet;
use crate::collision::clipping::FaceContact;
use crate::collision::narrowphase::{cast_shape, Manifold};
use crate::config::PhysicsSettings;
use crate::core::body::BodyId;
use crate::core::body_store::BodyStore;
use crate::core::layers::{ObjectLayerPairFilter, ObjectVsBroadPhaseLayerFilter};
use crate::listeners::{ContactListener, ContactSettings};
use crate::shapes::SubShapeId;
use crate::utils::math::normalized_perpendicular;

/// Per-body continuous-collision record for one sub-step.
#[derive(Debug, Clone)]
pub struct CcdBody {
    pub body_id: BodyId,
    /// Deferred translation for this sub-step.
    pub delta_position: Vec3,
    /// Earliest hit fraction along `delta_position`; 1.0 = no hit.
    pub fraction: f32,
    /// How far the body is allowed to travel before reacting: the hit
    /// fraction plus a small penetration allowance, so the body does not
    /// freeze a hair's breadth away from the surface.
    pub fraction_plus_slop: f32,
    pub max_penetration: f32,
    pub hit_body: BodyId,
    pub hit_normal: Vec3,
    pub hit_point: Vec3,
    pub hit_sub_shape: SubShapeId,
    pub contact_settings: ContactSettings,
}

impl CcdBody {
    pub fn new(body_id: BodyId, delta_position: Vec3, max_penetration: f32) -> Self {
        Self {
            body_id,
            delta_position,
            fraction: 1.0,
            fraction_plus_slop: 1.0,
            max_penetration,
            hit_body: BodyId::INVALID,
            hit_normal: Vec3::ZERO,
            hit_point: Vec3::ZERO,
            hit_sub_shape: SubShapeId::EMPTY,
            contact_settings: ContactSettings::default(),
        }
    }
}

/// Looks up another body's CCD record index, if it has one this sub-step.
fn ccd_record_of(store: &BodyStore, active_to_ccd: &[i32], id: BodyId) -> Option<usize> {
    let body = store.get(id)?;
    let active_index = body.motion()?.active_index as usize;
    let slot = *active_to_ccd.get(active_index)?;
    (slot >= 0).then_some(slot as usize)
}

/// Sweeps every CCD body against the world and records the earliest hit.
#[allow(clippy::too_many_arguments)]
pub fn find_ccd_contacts(
    store: &BodyStore,
    broadphase: &BroadPhase,
    bp_filter: &dyn ObjectVsBroadPhaseLayerFilter,
    object_filter: &dyn ObjectLayerPairFilter,
    listener: Option<&dyn ContactListener>,
    cache: &ContactCacheSet,
    active_to_ccd: &[i32],
    ccd_bodies: &mut [CcdBody],
) {
    for record in ccd_bodies.iter_mut() {
        let Some(body) = store.get(record.body_id) else { continue };
        let bounds = body.world_bounds();
        let delta = record.delta_position;

        let mut candidates: Vec<BodyId> = Vec::new();
        broadphase.cast_aabb(bounds, delta, body.object_layer, bp_filter, object_filter, |hit| {
            if hit.body_id != record.body_id {
                candidates.push(hit.body_id);
            }
            true
        });
        candidates.sort_unstable();
        candidates.dedup();

        for other_id in candidates {
            let Some(other) = store.get(other_id) else { continue };

            // A dynamic pair is swept by exactly one of its members: the one
            // with the smaller id. The other member ignores the pair here.
            if other.is_dynamic()
                && ccd_record_of(store, active_to_ccd, other_id).is_some()
                && other_id.raw() < record.body_id.raw()
            {
                continue;
            }

            let Some(hit) = cast_shape(
                &body.shape,
                body.position,
                body.rotation,
                delta,
                &other.shape,
                other.position,
                other.rotation,
                // Overlapping starts still get resolved.
                true,
            ) else {
                continue;
            };

            // Allow a little extra travel so the body ends slightly inside
            // the surface instead of epsilon away from it.
            let approach = hit.normal.dot(delta);
            let slop = if approach > 1.0e-9 { record.max_penetration / approach } else { 0.0 };
            let fraction_plus_slop = (hit.fraction + slop).min(1.0);

            if fraction_plus_slop < record.fraction_plus_slop {
                record.fraction = hit.fraction;
                record.fraction_plus_slop = fraction_plus_slop;
                record.hit_body = other_id;
                record.hit_normal = hit.normal;
                record.hit_point = hit.contact_point;
                record.hit_sub_shape = hit.sub_shape_id_b;
                record.contact_settings = ContactSettings {
                    combined_friction: (body.friction * other.friction).sqrt(),
                    combined_restitution: body.restitution.max(other.restitution),
                    is_sensor: false,
                };

                // The contact callbacks fire at discovery time. A hit that is
                // later discarded by the pair adoption rule has then already
                // notified the listener; this window is accepted behavior.
                let manifold = Manifold {
                    normal: record.hit_normal,
                    points: vec![FaceContact {
                        on_a: record.hit_point,
                        on_b: record.hit_point,
                        penetration: hit.penetration,
                    }],
                    sub_shape_id_a: SubShapeId::EMPTY,
                    sub_shape_id_b: record.hit_sub_shape,
                };
                if let Some(listener) = listener {
                    let mut contact_settings = record.contact_settings;
                    listener.on_contact_added(record.body_id, other_id, &manifold, &mut contact_settings);
                    record.contact_settings = contact_settings;
                }
                cache.record_ccd_contact(body, other, &manifold);
            }
        }
    }
}

/// Applies the collision response for every CCD body and advances it to its
/// allowed fraction. Returns the bodies that must be woken.
pub fn resolve_ccd_contacts(
    settings: &PhysicsSettings,
    store: &BodyStore,
    active_to_ccd: &[i32],
    ccd_bodies: &mut [CcdBody],
    dt: f32,
) -> Vec<BodyId> {
    // Earliest hits resolve first; ties break on body id for determinism.
    let mut order: Vec<usize> = (0..ccd_bodies.len()).collect();
    order.sort_unstable_by(|&a, &b| {
        ccd_bodies[a]
            .fraction_plus_slop
            .partial_cmp(&ccd_bodies[b].fraction_plus_slop)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| ccd_bodies[a].body_id.cmp(&ccd_bodies[b].body_id))
    });

    let mut bodies_to_wake = Vec::new();

    for &record_index in &order {
        // Adoption rule: if the other body of a dynamic pair found a later
        // hit, it abandons its own and adopts our collision fraction. Any
        // callbacks it already fired for the abandoned hit stay fired.
        let (hit_body, fraction) = {
            let record = &ccd_bodies[record_index];
            (record.hit_body, record.fraction)
        };
        if !hit_body.is_invalid() {
            if let Some(other_index) = ccd_record_of(store, active_to_ccd, hit_body) {
                if ccd_bodies[other_index].fraction > fraction {
                    ccd_bodies[other_index].hit_body = BodyId::INVALID;
                    ccd_bodies[other_index].fraction_plus_slop = fraction;
                }
            }
        }

        let record = &ccd_bodies[record_index];
        // SAFETY: resolve runs single-threaded; each record owns its body.
        let Some(body) = (unsafe { store.get_mut_unchecked(record.body_id) }) else { continue };

        if !record.hit_body.is_invalid() {
            let other_still_hits = ccd_record_of(store, active_to_ccd, record.hit_body)
                .map(|other_index| ccd_bodies[other_index].fraction >= record.fraction)
                .unwrap_or(true);
            if other_still_hits {
                // SAFETY: hit_body != body_id (self hits are filtered out).
                if let Some(other) = unsafe { store.get_mut_unchecked(record.hit_body) } {
                    resolve_collision(settings, body, other, record, dt);
                    if other.is_dynamic() && !other.is_active() {
                        bodies_to_wake.push(record.hit_body);
                    }
                }
            }
        }

        // Advance to the allowed fraction (the full delta when nothing hit).
        body.position += record.delta_position * record.fraction_plus_slop;
        body.update_world_bounds();
    }

    bodies_to_wake
}

/// Impulse response at the time of impact: non-penetration with restitution
/// bias, then two friction impulses bounded by the friction cone.
fn resolve_collision(
    settings: &PhysicsSettings,
    body: &mut crate::core::body::Body,
    other: &mut crate::core::body::Body,
    record: &CcdBody,
    _dt: f32,
) {
    let normal = record.hit_normal;
    // Arms relative to each body's center of mass at the moment of impact.
    let arm_a = record.hit_point - (body.position + record.delta_position * record.fraction);
    let arm_b = record.hit_point - other.position;

    let velocity_a = body.point_velocity_with_arm(arm_a);
    let velocity_b = other.point_velocity_with_arm(arm_b);
    let normal_velocity = (velocity_b - velocity_a).dot(normal);

    // Restitution only above the threshold approach speed.
    let restitution = record.contact_settings.combined_restitution;
    let bias = if restitution > 0.0 && normal_velocity < -settings.min_velocity_for_restitution {
        restitution * normal_velocity
    } else {
        0.0
    };

    let normal_lambda = solve_axis(body, other, arm_a, arm_b, normal, bias, f32::MIN, f32::MAX);

    let friction = record.contact_settings.combined_friction;
    if friction > 0.0 && normal_lambda > 0.0 {
        let max_friction = friction * normal_lambda;
        let tangent1 = normalized_perpendicular(normal);
        let tangent2 = normal.cross(tangent1);
        solve_axis(body, other, arm_a, arm_b, tangent1, 0.0, -max_friction, max_friction);
        solve_axis(body, other, arm_a, arm_b, tangent2, 0.0, -max_friction, max_friction);
    }

    if let Some(motion) = body.motion_mut() {
        motion.clamp_velocities();
    }
    if other.is_dynamic() {
        if let Some(motion) = other.motion_mut() {
            motion.clamp_velocities();
        }
    }
}

/// One-shot impulse along an axis between two bodies (the CCD counterpart of
/// an axis constraint part, solved exactly once).
fn solve_axis(
    body_a: &mut crate::core::body::Body,
    body_b: &mut crate::core::body::Body,
    arm_a: Vec3,
    arm_b: Vec3,
    axis: Vec3,
    bias: f32,
    min_lambda: f32,
    max_lambda: f32,
) -> f32 {
    let inv_mass_a = body_a.inv_mass();
    let inv_mass_b = if body_b.is_dynamic() { body_b.inv_mass() } else { 0.0 };
    let inv_inertia_a = body_a.inv_inertia_world();
    let inv_inertia_b = if body_b.is_dynamic() {
        body_b.inv_inertia_world()
    } else {
        glam::Mat3::ZERO
    };

    let angular_a = inv_inertia_a * arm_a.cross(axis);
    let angular_b = inv_inertia_b * arm_b.cross(axis);
    let k = inv_mass_a + inv_mass_b + angular_a.cross(arm_a).dot(axis) + angular_b.cross(arm_b).dot(axis);
    if k <= 1.0e-9 {
        return 0.0;
    }

    let velocity_a = body_a.point_velocity_with_arm(arm_a);
    let velocity_b = body_b.point_velocity_with_arm(arm_b);
    let normal_velocity = (velocity_b - velocity_a).dot(axis);
    let lambda = (-(normal_velocity + bias) / k).clamp(min_lambda, max_lambda);

    let impulse = axis * lambda;
    if let Some(motion) = body_a.motion_mut() {
        motion.linear_velocity -= impulse * inv_mass_a;
        motion.angular_velocity -= angular_a * lambda;
    }
    if body_b.is_dynamic() {
        if let Some(motion) = body_b.motion_mut() {
            motion.linear_velocity += impulse * inv_mass_b;
            motion.angular_velocity += angular_b * lambda;
        }
    }
    lambda
}
