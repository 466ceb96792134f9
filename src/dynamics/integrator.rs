//! Velocity and position integration (symplectic Euler).

use glam::Vec3;

use crate::config::PhysicsSettings;
use crate::core::body::{Body, BodyId, MotionQuality};
use crate::core::body_store::BodyStore;
use crate::core::types::Aabb;
use crate::utils::math::integrate_rotation;

/// Applies gravity, accumulated forces, and damping to the velocities of the
/// given active bodies.
pub fn apply_forces(store: &BodyStore, active: &[BodyId], gravity: Vec3, dt: f32) {
    for id in active {
        // SAFETY: each active id is unique; this phase owns velocity writes.
        let Some(body) = (unsafe { store.get_mut_unchecked(*id) }) else { continue };
        if !body.is_dynamic() {
            continue;
        }
        let inv_inertia = body.inv_inertia_world();
        let Some(motion) = body.motion_mut() else { continue };

        motion.linear_velocity +=
            (gravity * motion.gravity_scale + motion.accumulated_force * motion.inv_mass) * dt;
        motion.angular_velocity += inv_inertia * motion.accumulated_torque * dt;
        motion.accumulated_force = Vec3::ZERO;
        motion.accumulated_torque = Vec3::ZERO;

        motion.linear_velocity *= (1.0 - motion.linear_damping * dt).max(0.0);
        motion.angular_velocity *= (1.0 - motion.angular_damping * dt).max(0.0);
    }
}

/// What position integration decided for one body.
pub enum IntegrateOutcome {
    /// Body moved; the broadphase needs its new bounds.
    Moved(BodyId, Aabb),
    /// Translation exceeded the linear-cast budget: the move is deferred and
    /// the body needs a CCD record for `delta_position`.
    NeedsCast(BodyId, Vec3, f32),
    /// Body did not move measurably.
    Rested(BodyId),
}

/// Integrates one body's pose. Rotation always happens first so a long body
/// hitting a surface can rotate away from the contact before translating.
pub fn integrate_position(settings: &PhysicsSettings, body: &mut Body, dt: f32) -> IntegrateOutcome {
    let id = body.id();
    let is_dynamic = body.is_dynamic();
    let (angular, delta_position, linear_cast) = {
        let Some(motion) = body.motion_mut() else { return IntegrateOutcome::Rested(id) };
        if is_dynamic {
            motion.clamp_velocities();
        }
        (
            motion.angular_velocity,
            motion.linear_velocity * dt,
            is_dynamic && motion.motion_quality == MotionQuality::LinearCast,
        )
    };

    body.rotation = integrate_rotation(body.rotation, angular, dt);

    if linear_cast {
        let inner_radius = body.shape.inner_radius();
        debug_assert!(
            inner_radius > 0.0,
            "linear-cast body has no inner radius; it cannot be swept safely"
        );
        let threshold = settings.linear_cast_threshold * inner_radius;
        if delta_position.length_squared() > threshold * threshold {
            let max_penetration = settings
                .penetration_slop
                .min(settings.linear_cast_max_penetration * inner_radius);
            // Position update is deferred to the CCD resolve pass.
            body.update_world_bounds();
            return IntegrateOutcome::NeedsCast(id, delta_position, max_penetration);
        }
    }

    body.position += delta_position;
    body.update_world_bounds();
    if delta_position.length_squared() > 0.0 || angular.length_squared() > 0.0 {
        IntegrateOutcome::Moved(id, body.world_bounds)
    } else {
        IntegrateOutcome::Rested(id)
    }
}

/// Advances the per-body sleep timer and returns whether the body currently
/// qualifies for sleep.
pub fn update_sleep_timer(settings: &PhysicsSettings, body: &mut Body, dt: f32) -> bool {
    let radius = body.world_bounds.extents().max_element();
    let Some(motion) = body.motion_mut() else { return true };
    if !motion.allow_sleeping {
        motion.sleep_timer = 0.0;
        return false;
    }
    // Fastest point on the body: linear speed plus spin times the radius.
    let max_point_velocity =
        motion.linear_velocity.length() + motion.angular_velocity.length() * radius;
    if max_point_velocity < settings.point_velocity_sleep_threshold {
        motion.sleep_timer += dt;
    } else {
        motion.sleep_timer = 0.0;
    }
    motion.sleep_timer >= settings.time_before_sleep
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::body::{BodyCreationSettings, MotionType};
    use crate::core::layers::ObjectLayer;
    use crate::shapes::Shape;
    use glam::Quat;

    fn dynamic_body(quality: MotionQuality, velocity: Vec3) -> Body {
        let settings = BodyCreationSettings::new(
            Shape::sphere(0.1),
            Vec3::ZERO,
            Quat::IDENTITY,
            MotionType::Dynamic,
            ObjectLayer(0),
        )
        .with_motion_quality(quality)
        .with_velocity(velocity, Vec3::ZERO);
        Body::from_settings(BodyId::new(0, 0), &settings)
    }

    #[test]
    fn discrete_bodies_always_move() {
        let settings = PhysicsSettings::default();
        let mut body = dynamic_body(MotionQuality::Discrete, Vec3::new(100.0, 0.0, 0.0));
        match integrate_position(&settings, &mut body, 1.0 / 60.0) {
            IntegrateOutcome::Moved(_, _) => {}
            _ => panic!("discrete body must integrate its position"),
        }
        assert!((body.position.x - 100.0 / 60.0).abs() < 1.0e-5);
    }

    #[test]
    fn fast_linear_cast_bodies_defer_their_move() {
        let settings = PhysicsSettings::default();
        let mut body = dynamic_body(MotionQuality::LinearCast, Vec3::new(100.0, 0.0, 0.0));
        match integrate_position(&settings, &mut body, 1.0 / 60.0) {
            IntegrateOutcome::NeedsCast(_, delta, max_penetration) => {
                assert!((delta.x - 100.0 / 60.0).abs() < 1.0e-5);
                assert!(max_penetration <= settings.penetration_slop);
            }
            _ => panic!("fast linear-cast body must defer integration"),
        }
        assert_eq!(body.position.x, 0.0);
    }

    #[test]
    fn slow_linear_cast_bodies_integrate_normally() {
        let settings = PhysicsSettings::default();
        // 0.07 m per step < 0.75 * 0.1 m inner radius.
        let mut body = dynamic_body(MotionQuality::LinearCast, Vec3::new(4.2, 0.0, 0.0));
        match integrate_position(&settings, &mut body, 1.0 / 60.0) {
            IntegrateOutcome::Moved(_, _) => {}
            _ => panic!("slow linear-cast body integrates like a discrete one"),
        }
    }

    #[test]
    fn sleep_timer_accumulates_only_below_the_threshold() {
        let settings = PhysicsSettings::default();
        let mut body = dynamic_body(MotionQuality::Discrete, Vec3::ZERO);
        body.update_world_bounds();
        assert!(!update_sleep_timer(&settings, &mut body, 0.3));
        assert!(update_sleep_timer(&settings, &mut body, 0.3));

        body.set_linear_velocity(Vec3::new(1.0, 0.0, 0.0));
        assert!(!update_sleep_timer(&settings, &mut body, 0.3));
        assert_eq!(body.motion().unwrap().sleep_timer, 0.0);
    }
}
