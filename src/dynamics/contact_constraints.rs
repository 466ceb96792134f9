//! Contact constraints, rebuilt every step from the warm manifold cache.

use glam::Vec3;

use crate::collision::cache::{ManifoldKey, WarmManifold};
use crate::config::PhysicsSettings;
use crate::dynamics::solver_parts::{AxisConstraintPart, SolverBody};
use crate::utils::math::normalized_perpendicular;

/// One solved contact point: a non-penetration row plus two friction rows
/// along the tangent basis.
#[derive(Debug, Clone)]
pub struct ContactPointConstraint {
    /// Anchor in body A space (relative to its center of mass) for position
    /// re-projection.
    local_a: Vec3,
    local_b: Vec3,
    non_penetration: AxisConstraintPart,
    friction: [AxisConstraintPart; 2],
}

/// All contact points of one manifold against one body pair.
#[derive(Debug, Clone)]
pub struct ContactConstraint {
    pub body_a: usize,
    pub body_b: usize,
    pub normal: Vec3,
    pub combined_friction: f32,
    pub is_sensor: bool,
    pub key: ManifoldKey,
    points: Vec<ContactPointConstraint>,
}

impl ContactConstraint {
    /// Builds the constraint from a warm manifold. `body_a`/`body_b` are
    /// island-local indices into the solver body array.
    pub fn setup(
        settings: &PhysicsSettings,
        dt: f32,
        bodies: &[SolverBody],
        body_a: usize,
        body_b: usize,
        warm: &WarmManifold,
    ) -> Self {
        let normal = warm.manifold.normal;
        let tangent1 = normalized_perpendicular(normal);
        let tangent2 = normal.cross(tangent1);

        let solver_a = &bodies[body_a];
        let solver_b = &bodies[body_b];
        let inv_rotation_a = solver_a.rotation.conjugate();
        let inv_rotation_b = solver_b.rotation.conjugate();
        let restitution = warm.settings.combined_restitution;

        let mut points = Vec::with_capacity(warm.manifold.points.len());
        for (point, lambdas) in warm.manifold.points.iter().zip(&warm.lambdas) {
            let world = (point.on_a + point.on_b) * 0.5;
            let arm_a = world - solver_a.position;
            let arm_b = world - solver_b.position;

            // Restitution policy: bounce only above the threshold approach
            // speed; otherwise allow exactly enough velocity to close a
            // speculative gap within this sub-step.
            let normal_velocity =
                (solver_b.point_velocity(arm_b) - solver_a.point_velocity(arm_a)).dot(normal);
            let bias = if restitution > 0.0 && normal_velocity < -settings.min_velocity_for_restitution {
                restitution * normal_velocity
            } else if point.penetration < 0.0 {
                -point.penetration / dt
            } else {
                0.0
            };

            let mut non_penetration =
                AxisConstraintPart::calculate(solver_a, solver_b, arm_a, arm_b, normal, bias);
            non_penetration.total_lambda = lambdas.0;
            let mut friction1 =
                AxisConstraintPart::calculate(solver_a, solver_b, arm_a, arm_b, tangent1, 0.0);
            friction1.total_lambda = lambdas.1[0];
            let mut friction2 =
                AxisConstraintPart::calculate(solver_a, solver_b, arm_a, arm_b, tangent2, 0.0);
            friction2.total_lambda = lambdas.1[1];

            points.push(ContactPointConstraint {
                local_a: inv_rotation_a * (point.on_a - solver_a.position),
                local_b: inv_rotation_b * (point.on_b - solver_b.position),
                non_penetration,
                friction: [friction1, friction2],
            });
        }

        Self {
            body_a,
            body_b,
            normal,
            combined_friction: warm.settings.combined_friction,
            is_sensor: warm.settings.is_sensor,
            key: warm.key,
            points,
        }
    }

    pub fn warm_start(&mut self, bodies: &mut [SolverBody], warm_start_ratio: f32) {
        let (body_a, body_b) = pair_mut(bodies, self.body_a, self.body_b);
        for point in &mut self.points {
            point.friction[0].warm_start(body_a, body_b, warm_start_ratio);
            point.friction[1].warm_start(body_a, body_b, warm_start_ratio);
            point.non_penetration.warm_start(body_a, body_b, warm_start_ratio);
        }
    }

    /// One velocity iteration: friction first (bounded by the friction cone
    /// of the current normal impulse), then non-penetration.
    pub fn solve_velocity(&mut self, bodies: &mut [SolverBody]) -> bool {
        let (body_a, body_b) = pair_mut(bodies, self.body_a, self.body_b);
        let mut changed = false;
        for point in &mut self.points {
            let max_friction = self.combined_friction * point.non_penetration.total_lambda;
            if max_friction > 0.0 {
                changed |= point.friction[0].solve(body_a, body_b, -max_friction, max_friction);
                changed |= point.friction[1].solve(body_a, body_b, -max_friction, max_friction);
            }
            changed |= point.non_penetration.solve(body_a, body_b, 0.0, f32::MAX);
        }
        changed
    }

    /// One pseudo-Baumgarte position iteration: re-projects the cached local
    /// points with the current poses and pushes out remaining penetration.
    pub fn solve_position(&mut self, bodies: &mut [SolverBody], settings: &PhysicsSettings) {
        let (body_a, body_b) = pair_mut(bodies, self.body_a, self.body_b);
        for point in &self.points {
            let world_a = body_a.position + body_a.rotation * point.local_a;
            let world_b = body_b.position + body_b.rotation * point.local_b;
            let penetration = (world_a - world_b).dot(self.normal);

            let excess = penetration - settings.penetration_slop;
            if excess <= 0.0 {
                continue;
            }
            let correction = settings.baumgarte * excess.min(settings.max_penetration_distance);
            // Error is negative along the normal: push B away from A.
            point.non_penetration.solve_position(body_a, body_b, -correction);
        }
    }

    /// Accumulated impulses, written back into the contact cache after the
    /// last sub-step.
    pub fn lambdas(&self) -> Vec<(f32, [f32; 2])> {
        self.points
            .iter()
            .map(|p| {
                (
                    p.non_penetration.total_lambda,
                    [p.friction[0].total_lambda, p.friction[1].total_lambda],
                )
            })
            .collect()
    }
}

/// Disjoint mutable access to two island bodies.
pub(crate) fn pair_mut(bodies: &mut [SolverBody], a: usize, b: usize) -> (&mut SolverBody, &mut SolverBody) {
    debug_assert!(a != b);
    if a < b {
        let (left, right) = bodies.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = bodies.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadphase::BodyPair;
    use crate::collision::clipping::FaceContact;
    use crate::collision::narrowphase::Manifold;
    use crate::core::body::BodyId;
    use crate::listeners::ContactSettings;
    use crate::shapes::SubShapeId;
    use glam::{Mat3, Quat};

    fn solver_body(position: Vec3, inv_mass: f32) -> SolverBody {
        SolverBody {
            position,
            rotation: Quat::IDENTITY,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            inv_mass,
            inv_inertia: if inv_mass > 0.0 { Mat3::IDENTITY } else { Mat3::ZERO },
        }
    }

    fn warm_manifold(penetration: f32, restitution: f32) -> WarmManifold {
        let on_a = Vec3::new(0.0, penetration.max(0.0), 0.0);
        let on_b = Vec3::new(0.0, 0.0, 0.0);
        WarmManifold {
            manifold: Manifold {
                normal: Vec3::Y,
                points: vec![FaceContact { on_a, on_b, penetration }],
                sub_shape_id_a: SubShapeId::EMPTY,
                sub_shape_id_b: SubShapeId::EMPTY,
            },
            lambdas: vec![(0.0, [0.0, 0.0])],
            settings: ContactSettings {
                combined_friction: 0.5,
                combined_restitution: restitution,
                is_sensor: false,
            },
            key: ManifoldKey {
                pair: BodyPair::new(BodyId::new(0, 0), BodyId::new(1, 0)),
                sub_shape_a: SubShapeId::EMPTY,
                sub_shape_b: SubShapeId::EMPTY,
            },
        }
    }

    #[test]
    fn restitution_reflects_fast_approach() {
        let settings = PhysicsSettings::default();
        let mut bodies = vec![solver_body(Vec3::ZERO, 0.0), solver_body(Vec3::Y, 1.0)];
        bodies[1].linear_velocity = Vec3::new(0.0, -4.0, 0.0);

        let mut constraint =
            ContactConstraint::setup(&settings, 1.0 / 60.0, &bodies, 0, 1, &warm_manifold(0.0, 0.5));
        for _ in 0..10 {
            constraint.solve_velocity(&mut bodies);
        }
        // Half the approach speed comes back.
        assert!((bodies[1].linear_velocity.y - 2.0).abs() < 0.05, "vy {}", bodies[1].linear_velocity.y);
    }

    #[test]
    fn slow_approach_gets_no_restitution() {
        let settings = PhysicsSettings::default();
        let mut bodies = vec![solver_body(Vec3::ZERO, 0.0), solver_body(Vec3::Y, 1.0)];
        bodies[1].linear_velocity = Vec3::new(0.0, -0.5, 0.0);

        let mut constraint =
            ContactConstraint::setup(&settings, 1.0 / 60.0, &bodies, 0, 1, &warm_manifold(0.0, 0.5));
        for _ in 0..10 {
            constraint.solve_velocity(&mut bodies);
        }
        assert!(bodies[1].linear_velocity.y.abs() < 1.0e-3, "resting contact must not bounce");
    }

    #[test]
    fn speculative_contact_only_absorbs_the_gap() {
        let settings = PhysicsSettings::default();
        let dt = 1.0 / 60.0;
        let mut bodies = vec![solver_body(Vec3::ZERO, 0.0), solver_body(Vec3::Y, 1.0)];
        // Approaching at 0.6 m/s with a 5 mm gap: the body may only travel the
        // gap in one sub-step, i.e. keep 0.005/dt = 0.3 m/s of approach speed.
        bodies[1].linear_velocity = Vec3::new(0.0, -0.6, 0.0);

        let mut constraint =
            ContactConstraint::setup(&settings, dt, &bodies, 0, 1, &warm_manifold(-0.005, 0.0));
        for _ in 0..10 {
            constraint.solve_velocity(&mut bodies);
        }
        assert!((bodies[1].linear_velocity.y + 0.3).abs() < 1.0e-3, "vy {}", bodies[1].linear_velocity.y);
    }

    #[test]
    fn friction_is_bounded_by_the_normal_impulse() {
        let settings = PhysicsSettings::default();
        let mut bodies = vec![solver_body(Vec3::ZERO, 0.0), solver_body(Vec3::Y, 1.0)];
        bodies[1].linear_velocity = Vec3::new(5.0, -1.0, 0.0);

        let mut constraint =
            ContactConstraint::setup(&settings, 1.0 / 60.0, &bodies, 0, 1, &warm_manifold(0.0, 0.0));
        for _ in 0..10 {
            constraint.solve_velocity(&mut bodies);
        }
        let lambdas = constraint.lambdas();
        let normal_lambda = lambdas[0].0;
        let friction_mag = (lambdas[0].1[0].powi(2) + lambdas[0].1[1].powi(2)).sqrt();
        assert!(normal_lambda > 0.0);
        // Box clamp per axis: each axis within mu * lambda_n.
        assert!(friction_mag <= 0.5 * normal_lambda * std::f32::consts::SQRT_2 + 1.0e-4);
        // Sliding continues (friction cannot cancel 5 m/s with this budget).
        assert!(bodies[1].linear_velocity.x > 0.0);
    }

    #[test]
    fn position_solve_removes_excess_penetration() {
        let settings = PhysicsSettings::default();
        let mut bodies = vec![solver_body(Vec3::ZERO, 0.0), solver_body(Vec3::Y, 1.0)];

        let mut constraint =
            ContactConstraint::setup(&settings, 1.0 / 60.0, &bodies, 0, 1, &warm_manifold(0.1, 0.0));
        let before = bodies[1].position.y;
        for _ in 0..20 {
            constraint.solve_position(&mut bodies, &settings);
        }
        let pushed = bodies[1].position.y - before;
        assert!(pushed > 0.05, "body pushed out by {pushed}");
        // The slop stays in place.
        assert!(pushed < 0.1);
    }
}
