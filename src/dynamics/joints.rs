//! Articulated constraints between body pairs.
//!
//! Every joint is factored into axis parts (see `solver_parts`): a point
//! block for the positional anchor, angular rows for rotation locks and
//! limits, and one-sided rows for limit stops. Anchors and axes are given in
//! each body's local space, relative to its center of mass.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::core::body::BodyId;
use crate::dynamics::contact_constraints::pair_mut;
use crate::dynamics::solver_parts::{
    AxisConstraintPart, PointConstraintPart, RotationConstraintPart, SolverBody,
};
use crate::utils::math::normalized_perpendicular;

/// Per-axis freedom of a six-DOF joint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AxisState {
    Free,
    Locked,
    Limited(f32, f32),
}

/// Motor driving a hinge or slider along its free axis.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MotorSettings {
    pub target_velocity: f32,
    /// Max torque (hinge) or force (slider) the motor may spend.
    pub max_impulse_per_second: f32,
}

/// Polymorphic joint. Solver state (effective masses, accumulated lambdas)
/// lives inside and persists across sub-steps for warm starting.
#[derive(Debug, Clone)]
pub enum Constraint {
    /// Anchors of both bodies coincide; rotation is free.
    Point {
        body_a: BodyId,
        body_b: BodyId,
        local_anchor_a: Vec3,
        local_anchor_b: Vec3,
        part: PointConstraintPart,
    },
    /// Anchor distance kept within `[min_distance, max_distance]`.
    Distance {
        body_a: BodyId,
        body_b: BodyId,
        local_anchor_a: Vec3,
        local_anchor_b: Vec3,
        min_distance: f32,
        max_distance: f32,
        part: AxisConstraintPart,
        current_distance: f32,
    },
    /// Rotation about a single shared axis, with optional limits and motor.
    Hinge {
        body_a: BodyId,
        body_b: BodyId,
        local_anchor_a: Vec3,
        local_anchor_b: Vec3,
        local_axis_a: Vec3,
        local_axis_b: Vec3,
        /// Reference directions perpendicular to the axes, used to measure
        /// the hinge angle.
        local_reference_a: Vec3,
        local_reference_b: Vec3,
        limits: Option<(f32, f32)>,
        motor: Option<MotorSettings>,
        point: PointConstraintPart,
        lock: [AxisConstraintPart; 2],
        limit_part: AxisConstraintPart,
        motor_part: AxisConstraintPart,
        current_angle: f32,
    },
    /// Translation along a single axis; rotation fully locked.
    Slider {
        body_a: BodyId,
        body_b: BodyId,
        local_anchor_a: Vec3,
        local_anchor_b: Vec3,
        local_axis_a: Vec3,
        limits: Option<(f32, f32)>,
        motor: Option<MotorSettings>,
        rotation: RotationConstraintPart,
        lock: [AxisConstraintPart; 2],
        limit_part: AxisConstraintPart,
        motor_part: AxisConstraintPart,
        current_position: f32,
        initial_rotation: Quat,
    },
    /// All six degrees of freedom locked.
    Fixed {
        body_a: BodyId,
        body_b: BodyId,
        local_anchor_a: Vec3,
        local_anchor_b: Vec3,
        initial_rotation: Quat,
        point: PointConstraintPart,
        rotation: RotationConstraintPart,
    },
    /// Twist axes kept within an opening cone; rotation otherwise free.
    Cone {
        body_a: BodyId,
        body_b: BodyId,
        local_anchor_a: Vec3,
        local_anchor_b: Vec3,
        local_twist_a: Vec3,
        local_twist_b: Vec3,
        half_cone_angle: f32,
        point: PointConstraintPart,
        limit_part: AxisConstraintPart,
        violation: f32,
    },
    /// Shoulder-style joint: swing cone plus twist range about the axis.
    SwingTwist {
        body_a: BodyId,
        body_b: BodyId,
        local_anchor_a: Vec3,
        local_anchor_b: Vec3,
        local_twist_a: Vec3,
        local_twist_b: Vec3,
        half_swing_angle: f32,
        twist_min: f32,
        twist_max: f32,
        point: PointConstraintPart,
        swing_part: AxisConstraintPart,
        twist_part: AxisConstraintPart,
        swing_violation: f32,
        twist_violation: f32,
    },
    /// Generic joint with per-axis translation and rotation freedom, in body
    /// A's frame.
    SixDof {
        body_a: BodyId,
        body_b: BodyId,
        local_anchor_a: Vec3,
        local_anchor_b: Vec3,
        translation: [AxisState; 3],
        rotation_state: [AxisState; 3],
        linear_parts: [AxisConstraintPart; 3],
        angular_parts: [AxisConstraintPart; 3],
        linear_errors: [f32; 3],
        angular_errors: [f32; 3],
    },
    /// Body B's anchor rides a polyline path fixed in body A's space.
    Path {
        body_a: BodyId,
        body_b: BodyId,
        local_anchor_b: Vec3,
        /// Path vertices in body A local space.
        path_points: Vec<Vec3>,
        closed: bool,
        lock: [AxisConstraintPart; 2],
        errors: [f32; 2],
    },
}

impl Constraint {
    pub fn bodies(&self) -> (BodyId, BodyId) {
        match self {
            Constraint::Point { body_a, body_b, .. }
            | Constraint::Distance { body_a, body_b, .. }
            | Constraint::Hinge { body_a, body_b, .. }
            | Constraint::Slider { body_a, body_b, .. }
            | Constraint::Fixed { body_a, body_b, .. }
            | Constraint::Cone { body_a, body_b, .. }
            | Constraint::SwingTwist { body_a, body_b, .. }
            | Constraint::SixDof { body_a, body_b, .. }
            | Constraint::Path { body_a, body_b, .. } => (*body_a, *body_b),
        }
    }

    pub fn point(body_a: BodyId, body_b: BodyId, local_anchor_a: Vec3, local_anchor_b: Vec3) -> Self {
        Constraint::Point {
            body_a,
            body_b,
            local_anchor_a,
            local_anchor_b,
            part: PointConstraintPart::default(),
        }
    }

    pub fn distance(
        body_a: BodyId,
        body_b: BodyId,
        local_anchor_a: Vec3,
        local_anchor_b: Vec3,
        min_distance: f32,
        max_distance: f32,
    ) -> Self {
        Constraint::Distance {
            body_a,
            body_b,
            local_anchor_a,
            local_anchor_b,
            min_distance,
            max_distance,
            part: AxisConstraintPart::default(),
            current_distance: 0.0,
        }
    }

    pub fn hinge(
        body_a: BodyId,
        body_b: BodyId,
        local_anchor_a: Vec3,
        local_anchor_b: Vec3,
        local_axis_a: Vec3,
        local_axis_b: Vec3,
    ) -> Self {
        Constraint::Hinge {
            body_a,
            body_b,
            local_anchor_a,
            local_anchor_b,
            local_axis_a,
            local_axis_b,
            local_reference_a: normalized_perpendicular(local_axis_a),
            local_reference_b: normalized_perpendicular(local_axis_b),
            limits: None,
            motor: None,
            point: PointConstraintPart::default(),
            lock: Default::default(),
            limit_part: AxisConstraintPart::default(),
            motor_part: AxisConstraintPart::default(),
            current_angle: 0.0,
        }
    }

    pub fn slider(
        body_a: BodyId,
        body_b: BodyId,
        local_anchor_a: Vec3,
        local_anchor_b: Vec3,
        local_axis_a: Vec3,
        initial_rotation: Quat,
    ) -> Self {
        Constraint::Slider {
            body_a,
            body_b,
            local_anchor_a,
            local_anchor_b,
            local_axis_a,
            limits: None,
            motor: None,
            rotation: RotationConstraintPart::default(),
            lock: Default::default(),
            limit_part: AxisConstraintPart::default(),
            motor_part: AxisConstraintPart::default(),
            current_position: 0.0,
            initial_rotation,
        }
    }

    pub fn fixed(
        body_a: BodyId,
        body_b: BodyId,
        local_anchor_a: Vec3,
        local_anchor_b: Vec3,
        initial_rotation: Quat,
    ) -> Self {
        Constraint::Fixed {
            body_a,
            body_b,
            local_anchor_a,
            local_anchor_b,
            initial_rotation,
            point: PointConstraintPart::default(),
            rotation: RotationConstraintPart::default(),
        }
    }

    /// Recomputes effective masses and current errors against the bodies'
    /// poses at the start of a sub-step.
    pub(crate) fn setup(&mut self, bodies: &mut [SolverBody], index_a: usize, index_b: usize) {
        let (body_a, body_b) = pair_mut(bodies, index_a, index_b);
        match self {
            Constraint::Point { local_anchor_a, local_anchor_b, part, .. } => {
                let arm_a = body_a.rotation * *local_anchor_a;
                let arm_b = body_b.rotation * *local_anchor_b;
                let lambda = part.total_lambda;
                *part = PointConstraintPart::calculate(body_a, body_b, arm_a, arm_b);
                part.total_lambda = lambda;
            }
            Constraint::Distance {
                local_anchor_a,
                local_anchor_b,
                part,
                current_distance,
                ..
            } => {
                let arm_a = body_a.rotation * *local_anchor_a;
                let arm_b = body_b.rotation * *local_anchor_b;
                let anchor_a = body_a.position + arm_a;
                let anchor_b = body_b.position + arm_b;
                let delta = anchor_b - anchor_a;
                *current_distance = delta.length();
                let axis = if *current_distance > 1.0e-6 { delta / *current_distance } else { Vec3::Y };
                let lambda = part.total_lambda;
                *part = AxisConstraintPart::calculate(body_a, body_b, arm_a, arm_b, axis, 0.0);
                part.total_lambda = lambda;
            }
            Constraint::Hinge {
                local_anchor_a,
                local_anchor_b,
                local_axis_a,
                local_axis_b,
                local_reference_a,
                local_reference_b,
                limits,
                motor,
                point,
                lock,
                limit_part,
                motor_part,
                current_angle,
                ..
            } => {
                let arm_a = body_a.rotation * *local_anchor_a;
                let arm_b = body_b.rotation * *local_anchor_b;
                let point_lambda = point.total_lambda;
                *point = PointConstraintPart::calculate(body_a, body_b, arm_a, arm_b);
                point.total_lambda = point_lambda;

                let axis_a = body_a.rotation * *local_axis_a;
                let perp1 = normalized_perpendicular(axis_a);
                let perp2 = axis_a.cross(perp1);
                for (slot, axis) in lock.iter_mut().zip([perp1, perp2]) {
                    let lambda = slot.total_lambda;
                    *slot = AxisConstraintPart::calculate_angular(body_a, body_b, axis, 0.0);
                    slot.total_lambda = lambda;
                }

                // Hinge angle from the two reference directions.
                let reference_a = body_a.rotation * *local_reference_a;
                let reference_b = body_b.rotation * *local_reference_b;
                *current_angle = reference_a.cross(reference_b).dot(axis_a).atan2(reference_a.dot(reference_b));

                if limits.is_some() {
                    let lambda = limit_part.total_lambda;
                    *limit_part = AxisConstraintPart::calculate_angular(body_a, body_b, axis_a, 0.0);
                    limit_part.total_lambda = lambda;
                }
                if motor.is_some() {
                    *motor_part = AxisConstraintPart::calculate_angular(body_a, body_b, axis_a, 0.0);
                }
            }
            Constraint::Slider {
                local_anchor_a,
                local_anchor_b,
                local_axis_a,
                limits,
                motor,
                rotation,
                lock,
                limit_part,
                motor_part,
                current_position,
                ..
            } => {
                let rotation_lambda = rotation.total_lambda;
                *rotation = RotationConstraintPart::calculate(body_a, body_b);
                rotation.total_lambda = rotation_lambda;

                let arm_a = body_a.rotation * *local_anchor_a;
                let arm_b = body_b.rotation * *local_anchor_b;
                let axis = body_a.rotation * *local_axis_a;
                let delta = (body_b.position + arm_b) - (body_a.position + arm_a);
                *current_position = delta.dot(axis);

                let perp1 = normalized_perpendicular(axis);
                let perp2 = axis.cross(perp1);
                for (slot, lock_axis) in lock.iter_mut().zip([perp1, perp2]) {
                    let lambda = slot.total_lambda;
                    *slot = AxisConstraintPart::calculate(body_a, body_b, arm_a, arm_b, lock_axis, 0.0);
                    slot.total_lambda = lambda;
                }

                if limits.is_some() {
                    let lambda = limit_part.total_lambda;
                    *limit_part = AxisConstraintPart::calculate(body_a, body_b, arm_a, arm_b, axis, 0.0);
                    limit_part.total_lambda = lambda;
                }
                if motor.is_some() {
                    *motor_part = AxisConstraintPart::calculate(body_a, body_b, arm_a, arm_b, axis, 0.0);
                }
            }
            Constraint::Fixed { local_anchor_a, local_anchor_b, point, rotation, .. } => {
                let arm_a = body_a.rotation * *local_anchor_a;
                let arm_b = body_b.rotation * *local_anchor_b;
                let point_lambda = point.total_lambda;
                *point = PointConstraintPart::calculate(body_a, body_b, arm_a, arm_b);
                point.total_lambda = point_lambda;
                let rotation_lambda = rotation.total_lambda;
                *rotation = RotationConstraintPart::calculate(body_a, body_b);
                rotation.total_lambda = rotation_lambda;
            }
            Constraint::Cone {
                local_anchor_a,
                local_anchor_b,
                local_twist_a,
                local_twist_b,
                half_cone_angle,
                point,
                limit_part,
                violation,
                ..
            } => {
                let arm_a = body_a.rotation * *local_anchor_a;
                let arm_b = body_b.rotation * *local_anchor_b;
                let point_lambda = point.total_lambda;
                *point = PointConstraintPart::calculate(body_a, body_b, arm_a, arm_b);
                point.total_lambda = point_lambda;

                let twist_a = body_a.rotation * *local_twist_a;
                let twist_b = body_b.rotation * *local_twist_b;
                let angle = twist_a.dot(twist_b).clamp(-1.0, 1.0).acos();
                *violation = angle - *half_cone_angle;
                if *violation > 0.0 {
                    // Pushing B's twist axis back toward A's: rotate about the
                    // mutual perpendicular.
                    let axis = twist_b.cross(twist_a).normalize_or_zero();
                    let axis = if axis == Vec3::ZERO { normalized_perpendicular(twist_a) } else { axis };
                    let lambda = limit_part.total_lambda;
                    *limit_part = AxisConstraintPart::calculate_angular(body_a, body_b, axis, 0.0);
                    limit_part.total_lambda = lambda;
                } else {
                    *limit_part = AxisConstraintPart::default();
                }
            }
            Constraint::SwingTwist {
                local_anchor_a,
                local_anchor_b,
                local_twist_a,
                local_twist_b,
                half_swing_angle,
                twist_min,
                twist_max,
                point,
                swing_part,
                twist_part,
                swing_violation,
                twist_violation,
                ..
            } => {
                let arm_a = body_a.rotation * *local_anchor_a;
                let arm_b = body_b.rotation * *local_anchor_b;
                let point_lambda = point.total_lambda;
                *point = PointConstraintPart::calculate(body_a, body_b, arm_a, arm_b);
                point.total_lambda = point_lambda;

                let twist_axis_a = body_a.rotation * *local_twist_a;
                let twist_axis_b = body_b.rotation * *local_twist_b;

                // Swing: opening angle between the twist axes.
                let swing = twist_axis_a.dot(twist_axis_b).clamp(-1.0, 1.0).acos();
                *swing_violation = swing - *half_swing_angle;
                if *swing_violation > 0.0 {
                    let axis = twist_axis_b.cross(twist_axis_a).normalize_or_zero();
                    let axis = if axis == Vec3::ZERO { normalized_perpendicular(twist_axis_a) } else { axis };
                    let lambda = swing_part.total_lambda;
                    *swing_part = AxisConstraintPart::calculate_angular(body_a, body_b, axis, 0.0);
                    swing_part.total_lambda = lambda;
                } else {
                    *swing_part = AxisConstraintPart::default();
                }

                // Twist: rotation of B about A's twist axis after swing is
                // factored out (swing-twist decomposition of the relative
                // rotation).
                let relative = (body_a.rotation.conjugate() * body_b.rotation).normalize();
                let twist_local = swing_twist_decompose_twist(relative, *local_twist_a);
                *twist_violation = 0.0;
                if twist_local < *twist_min {
                    *twist_violation = twist_local - *twist_min;
                } else if twist_local > *twist_max {
                    *twist_violation = twist_local - *twist_max;
                }
                if *twist_violation != 0.0 {
                    let lambda = twist_part.total_lambda;
                    *twist_part = AxisConstraintPart::calculate_angular(body_a, body_b, twist_axis_a, 0.0);
                    twist_part.total_lambda = lambda;
                } else {
                    *twist_part = AxisConstraintPart::default();
                }
            }
            Constraint::SixDof {
                local_anchor_a,
                local_anchor_b,
                translation,
                rotation_state,
                linear_parts,
                angular_parts,
                linear_errors,
                angular_errors,
                ..
            } => {
                let arm_a = body_a.rotation * *local_anchor_a;
                let arm_b = body_b.rotation * *local_anchor_b;
                let delta = (body_b.position + arm_b) - (body_a.position + arm_a);
                let frame = [
                    body_a.rotation * Vec3::X,
                    body_a.rotation * Vec3::Y,
                    body_a.rotation * Vec3::Z,
                ];

                for axis_index in 0..3 {
                    let axis = frame[axis_index];
                    let offset = delta.dot(axis);
                    let error = constrained_error(translation[axis_index], offset);
                    linear_errors[axis_index] = error;
                    if translation[axis_index] != AxisState::Free && error != 0.0
                        || translation[axis_index] == AxisState::Locked
                    {
                        let lambda = linear_parts[axis_index].total_lambda;
                        linear_parts[axis_index] =
                            AxisConstraintPart::calculate(body_a, body_b, arm_a, arm_b, axis, 0.0);
                        linear_parts[axis_index].total_lambda = lambda;
                    } else {
                        linear_parts[axis_index] = AxisConstraintPart::default();
                    }
                }

                let relative = (body_a.rotation.conjugate() * body_b.rotation).normalize();
                let angles = relative_euler_angles(relative);
                for axis_index in 0..3 {
                    let axis = frame[axis_index];
                    let error = constrained_error(rotation_state[axis_index], angles[axis_index]);
                    angular_errors[axis_index] = error;
                    if rotation_state[axis_index] != AxisState::Free && error != 0.0
                        || rotation_state[axis_index] == AxisState::Locked
                    {
                        let lambda = angular_parts[axis_index].total_lambda;
                        angular_parts[axis_index] =
                            AxisConstraintPart::calculate_angular(body_a, body_b, axis, 0.0);
                        angular_parts[axis_index].total_lambda = lambda;
                    } else {
                        angular_parts[axis_index] = AxisConstraintPart::default();
                    }
                }
            }
            Constraint::Path { local_anchor_b, path_points, closed, lock, errors, .. } => {
                let anchor = body_b.position + body_b.rotation * *local_anchor_b;
                let (closest, tangent_local) = closest_point_on_path(path_points, *closed, body_a, anchor);
                let tangent = (body_a.rotation * tangent_local).normalize_or_zero();
                let tangent = if tangent == Vec3::ZERO { Vec3::X } else { tangent };
                let perp1 = normalized_perpendicular(tangent);
                let perp2 = tangent.cross(perp1);

                let arm_a = closest - body_a.position;
                let arm_b = anchor - body_b.position;
                let offset = anchor - closest;
                for ((slot, axis), error) in lock.iter_mut().zip([perp1, perp2]).zip(errors.iter_mut()) {
                    let lambda = slot.total_lambda;
                    *slot = AxisConstraintPart::calculate(body_a, body_b, arm_a, arm_b, axis, 0.0);
                    slot.total_lambda = lambda;
                    *error = offset.dot(axis);
                }
            }
        }
    }

    pub(crate) fn warm_start(&mut self, bodies: &mut [SolverBody], index_a: usize, index_b: usize, ratio: f32) {
        let (body_a, body_b) = pair_mut(bodies, index_a, index_b);
        match self {
            Constraint::Point { part, .. } => part.warm_start(body_a, body_b, ratio),
            Constraint::Distance { part, .. } => part.warm_start(body_a, body_b, ratio),
            Constraint::Hinge { point, lock, limit_part, .. } => {
                point.warm_start(body_a, body_b, ratio);
                for slot in lock {
                    slot.warm_start_angular(body_a, body_b, ratio);
                }
                limit_part.warm_start_angular(body_a, body_b, ratio);
            }
            Constraint::Slider { rotation, lock, limit_part, .. } => {
                rotation.warm_start(body_a, body_b, ratio);
                for slot in lock {
                    slot.warm_start(body_a, body_b, ratio);
                }
                limit_part.warm_start(body_a, body_b, ratio);
            }
            Constraint::Fixed { point, rotation, .. } => {
                point.warm_start(body_a, body_b, ratio);
                rotation.warm_start(body_a, body_b, ratio);
            }
            Constraint::Cone { point, limit_part, .. } => {
                point.warm_start(body_a, body_b, ratio);
                limit_part.warm_start_angular(body_a, body_b, ratio);
            }
            Constraint::SwingTwist { point, swing_part, twist_part, .. } => {
                point.warm_start(body_a, body_b, ratio);
                swing_part.warm_start_angular(body_a, body_b, ratio);
                twist_part.warm_start_angular(body_a, body_b, ratio);
            }
            Constraint::SixDof { linear_parts, angular_parts, .. } => {
                for part in linear_parts {
                    part.warm_start(body_a, body_b, ratio);
                }
                for part in angular_parts {
                    part.warm_start_angular(body_a, body_b, ratio);
                }
            }
            Constraint::Path { lock, .. } => {
                for slot in lock {
                    slot.warm_start(body_a, body_b, ratio);
                }
            }
        }
    }

    /// One velocity iteration over all axis parts. Returns whether any
    /// impulse changed significantly.
    pub(crate) fn solve_velocity(&mut self, bodies: &mut [SolverBody], index_a: usize, index_b: usize, dt: f32) -> bool {
        let (body_a, body_b) = pair_mut(bodies, index_a, index_b);
        match self {
            Constraint::Point { part, .. } => part.solve(body_a, body_b, Vec3::ZERO),
            Constraint::Distance { min_distance, max_distance, part, current_distance, .. } => {
                // Equal limits behave as a rigid rod; otherwise the row only
                // activates one-sided at a violated end.
                if (*max_distance - *min_distance).abs() < 1.0e-6 {
                    part.solve(body_a, body_b, f32::MIN, f32::MAX)
                } else if *current_distance >= *max_distance {
                    part.solve(body_a, body_b, f32::MIN, 0.0)
                } else if *current_distance <= *min_distance {
                    part.solve(body_a, body_b, 0.0, f32::MAX)
                } else {
                    false
                }
            }
            Constraint::Hinge { limits, motor, point, lock, limit_part, motor_part, current_angle, .. } => {
                let mut changed = false;
                if let Some(motor) = motor {
                    let max_lambda = motor.max_impulse_per_second * dt;
                    motor_part.bias = -motor.target_velocity;
                    changed |= motor_part.solve_angular(body_a, body_b, -max_lambda, max_lambda);
                }
                changed |= point.solve(body_a, body_b, Vec3::ZERO);
                for slot in lock.iter_mut() {
                    changed |= slot.solve_angular(body_a, body_b, f32::MIN, f32::MAX);
                }
                if let Some((lower, upper)) = limits {
                    if *current_angle <= *lower {
                        changed |= limit_part.solve_angular(body_a, body_b, 0.0, f32::MAX);
                    } else if *current_angle >= *upper {
                        changed |= limit_part.solve_angular(body_a, body_b, f32::MIN, 0.0);
                    }
                }
                changed
            }
            Constraint::Slider { limits, motor, rotation, lock, limit_part, motor_part, current_position, .. } => {
                let mut changed = false;
                if let Some(motor) = motor {
                    let max_lambda = motor.max_impulse_per_second * dt;
                    motor_part.bias = -motor.target_velocity;
                    changed |= motor_part.solve(body_a, body_b, -max_lambda, max_lambda);
                }
                changed |= rotation.solve(body_a, body_b, Vec3::ZERO);
                for slot in lock.iter_mut() {
                    changed |= slot.solve(body_a, body_b, f32::MIN, f32::MAX);
                }
                if let Some((lower, upper)) = limits {
                    if *current_position <= *lower {
                        changed |= limit_part.solve(body_a, body_b, 0.0, f32::MAX);
                    } else if *current_position >= *upper {
                        changed |= limit_part.solve(body_a, body_b, f32::MIN, 0.0);
                    }
                }
                changed
            }
            Constraint::Fixed { point, rotation, .. } => {
                let changed_point = point.solve(body_a, body_b, Vec3::ZERO);
                let changed_rotation = rotation.solve(body_a, body_b, Vec3::ZERO);
                changed_point || changed_rotation
            }
            Constraint::Cone { point, limit_part, violation, .. } => {
                let mut changed = point.solve(body_a, body_b, Vec3::ZERO);
                if *violation > 0.0 {
                    changed |= limit_part.solve_angular(body_a, body_b, 0.0, f32::MAX);
                }
                changed
            }
            Constraint::SwingTwist { point, swing_part, twist_part, swing_violation, twist_violation, .. } => {
                let mut changed = point.solve(body_a, body_b, Vec3::ZERO);
                if *swing_violation > 0.0 {
                    changed |= swing_part.solve_angular(body_a, body_b, 0.0, f32::MAX);
                }
                if *twist_violation > 0.0 {
                    changed |= twist_part.solve_angular(body_a, body_b, f32::MIN, 0.0);
                } else if *twist_violation < 0.0 {
                    changed |= twist_part.solve_angular(body_a, body_b, 0.0, f32::MAX);
                }
                changed
            }
            Constraint::SixDof { translation, rotation_state, linear_parts, angular_parts, linear_errors, angular_errors, .. } => {
                let mut changed = false;
                for axis_index in 0..3 {
                    let (min, max) = limit_clamp(translation[axis_index], linear_errors[axis_index]);
                    changed |= linear_parts[axis_index].solve(body_a, body_b, min, max);
                    let (min, max) = limit_clamp(rotation_state[axis_index], angular_errors[axis_index]);
                    changed |= angular_parts[axis_index].solve_angular(body_a, body_b, min, max);
                }
                changed
            }
            Constraint::Path { lock, .. } => {
                let mut changed = false;
                for slot in lock.iter_mut() {
                    changed |= slot.solve(body_a, body_b, f32::MIN, f32::MAX);
                }
                changed
            }
        }
    }

    /// Position-level correction for the joints that support it.
    pub(crate) fn solve_position(&mut self, bodies: &mut [SolverBody], index_a: usize, index_b: usize, baumgarte: f32) {
        let (body_a, body_b) = pair_mut(bodies, index_a, index_b);
        match self {
            Constraint::Point { local_anchor_a, local_anchor_b, part, .. } => {
                let error = anchor_error(body_a, body_b, *local_anchor_a, *local_anchor_b);
                part.solve_position(body_a, body_b, error * baumgarte);
            }
            Constraint::Distance { local_anchor_a, local_anchor_b, min_distance, max_distance, part, .. } => {
                let delta = (body_b.position + body_b.rotation * *local_anchor_b)
                    - (body_a.position + body_a.rotation * *local_anchor_a);
                let distance = delta.length();
                let error = if distance > *max_distance {
                    distance - *max_distance
                } else if distance < *min_distance {
                    distance - *min_distance
                } else {
                    0.0
                };
                part.solve_position(body_a, body_b, -error * baumgarte);
            }
            Constraint::Hinge { local_anchor_a, local_anchor_b, local_axis_a, local_axis_b, point, lock, .. } => {
                let error = anchor_error(body_a, body_b, *local_anchor_a, *local_anchor_b);
                point.solve_position(body_a, body_b, error * baumgarte);

                // Realign the hinge axes.
                let axis_a = body_a.rotation * *local_axis_a;
                let axis_b = body_b.rotation * *local_axis_b;
                let misalignment = axis_b.cross(axis_a);
                let perp1 = normalized_perpendicular(axis_a);
                let perp2 = axis_a.cross(perp1);
                lock[0].solve_position_angular(body_a, body_b, misalignment.dot(perp1) * baumgarte);
                lock[1].solve_position_angular(body_a, body_b, misalignment.dot(perp2) * baumgarte);
            }
            Constraint::Slider { local_anchor_a, local_anchor_b, local_axis_a, initial_rotation, rotation, lock, .. } => {
                let relative = (body_a.rotation.conjugate() * body_b.rotation).normalize();
                let error_rotation = (relative * initial_rotation.conjugate()).normalize();
                let (axis, angle) = error_rotation.to_axis_angle();
                let angle = wrap_angle(angle);
                rotation.solve_position(body_a, body_b, body_a.rotation * (axis * angle) * baumgarte);

                let axis_world = body_a.rotation * *local_axis_a;
                let delta = (body_b.position + body_b.rotation * *local_anchor_b)
                    - (body_a.position + body_a.rotation * *local_anchor_a);
                let off_axis = delta - axis_world * delta.dot(axis_world);
                let perp1 = normalized_perpendicular(axis_world);
                let perp2 = axis_world.cross(perp1);
                lock[0].solve_position(body_a, body_b, -off_axis.dot(perp1) * baumgarte);
                lock[1].solve_position(body_a, body_b, -off_axis.dot(perp2) * baumgarte);
            }
            Constraint::Fixed { local_anchor_a, local_anchor_b, initial_rotation, point, rotation, .. } => {
                let error = anchor_error(body_a, body_b, *local_anchor_a, *local_anchor_b);
                point.solve_position(body_a, body_b, error * baumgarte);

                let relative = (body_a.rotation.conjugate() * body_b.rotation).normalize();
                let error_rotation = (relative * initial_rotation.conjugate()).normalize();
                let (axis, angle) = error_rotation.to_axis_angle();
                let angle = wrap_angle(angle);
                rotation.solve_position(body_a, body_b, body_a.rotation * (axis * angle) * baumgarte);
            }
            // Cone, swing-twist, six-DOF limits and the path joint converge
            // through their velocity rows only.
            _ => {}
        }
    }
}

impl Constraint {
    /// Streams the warm-start impulse state through a state recorder so a
    /// restored world resumes with identical solver behavior.
    pub(crate) fn sync_state(&mut self, recorder: &mut crate::state::StateRecorder) {
        match self {
            Constraint::Point { part, .. } => recorder.sync_vec3(&mut part.total_lambda),
            Constraint::Distance { part, .. } => recorder.sync_f32(&mut part.total_lambda),
            Constraint::Hinge { point, lock, limit_part, .. } => {
                recorder.sync_vec3(&mut point.total_lambda);
                recorder.sync_f32(&mut lock[0].total_lambda);
                recorder.sync_f32(&mut lock[1].total_lambda);
                recorder.sync_f32(&mut limit_part.total_lambda);
            }
            Constraint::Slider { rotation, lock, limit_part, .. } => {
                recorder.sync_vec3(&mut rotation.total_lambda);
                recorder.sync_f32(&mut lock[0].total_lambda);
                recorder.sync_f32(&mut lock[1].total_lambda);
                recorder.sync_f32(&mut limit_part.total_lambda);
            }
            Constraint::Fixed { point, rotation, .. } => {
                recorder.sync_vec3(&mut point.total_lambda);
                recorder.sync_vec3(&mut rotation.total_lambda);
            }
            Constraint::Cone { point, limit_part, .. } => {
                recorder.sync_vec3(&mut point.total_lambda);
                recorder.sync_f32(&mut limit_part.total_lambda);
            }
            Constraint::SwingTwist { point, swing_part, twist_part, .. } => {
                recorder.sync_vec3(&mut point.total_lambda);
                recorder.sync_f32(&mut swing_part.total_lambda);
                recorder.sync_f32(&mut twist_part.total_lambda);
            }
            Constraint::SixDof { linear_parts, angular_parts, .. } => {
                for part in linear_parts.iter_mut().chain(angular_parts.iter_mut()) {
                    recorder.sync_f32(&mut part.total_lambda);
                }
            }
            Constraint::Path { lock, .. } => {
                recorder.sync_f32(&mut lock[0].total_lambda);
                recorder.sync_f32(&mut lock[1].total_lambda);
            }
        }
    }
}

fn anchor_error(body_a: &SolverBody, body_b: &SolverBody, local_anchor_a: Vec3, local_anchor_b: Vec3) -> Vec3 {
    (body_b.position + body_b.rotation * local_anchor_b)
        - (body_a.position + body_a.rotation * local_anchor_a)
}

fn wrap_angle(angle: f32) -> f32 {
    if angle > std::f32::consts::PI {
        angle - 2.0 * std::f32::consts::PI
    } else {
        angle
    }
}

/// Signed violation of an axis state: zero while the coordinate is in range.
fn constrained_error(state: AxisState, value: f32) -> f32 {
    match state {
        AxisState::Free => 0.0,
        AxisState::Locked => value,
        AxisState::Limited(min, max) => {
            if value < min {
                value - min
            } else if value > max {
                value - max
            } else {
                0.0
            }
        }
    }
}

/// Lambda clamp for an axis row: locked axes are two-sided, limit rows only
/// push back toward the valid range.
fn limit_clamp(state: AxisState, error: f32) -> (f32, f32) {
    match state {
        AxisState::Free => (0.0, 0.0),
        AxisState::Locked => (f32::MIN, f32::MAX),
        AxisState::Limited(_, _) => {
            if error > 0.0 {
                (f32::MIN, 0.0)
            } else if error < 0.0 {
                (0.0, f32::MAX)
            } else {
                (0.0, 0.0)
            }
        }
    }
}

/// Twist angle of the swing-twist decomposition of `relative` about `axis`.
fn swing_twist_decompose_twist(relative: Quat, axis: Vec3) -> f32 {
    let rotation_axis = Vec3::new(relative.x, relative.y, relative.z);
    let projected = axis * rotation_axis.dot(axis);
    let twist = Quat::from_xyzw(projected.x, projected.y, projected.z, relative.w);
    if twist.length_squared() < 1.0e-9 {
        return 0.0;
    }
    let twist = twist.normalize();
    let angle = 2.0 * twist.w.clamp(-1.0, 1.0).acos();
    let angle = if angle > std::f32::consts::PI { angle - 2.0 * std::f32::consts::PI } else { angle };
    if Vec3::new(twist.x, twist.y, twist.z).dot(axis) < 0.0 {
        -angle
    } else {
        angle
    }
}

/// Extracts small per-axis rotation angles from a relative rotation.
fn relative_euler_angles(relative: Quat) -> [f32; 3] {
    let (axis, angle) = relative.to_axis_angle();
    let angle = wrap_angle(angle);
    let vector = axis * angle;
    [vector.x, vector.y, vector.z]
}

/// Closest point on the path (in world space) and the local tangent there.
fn closest_point_on_path(path_points: &[Vec3], closed: bool, body_a: &SolverBody, anchor_world: Vec3) -> (Vec3, Vec3) {
    if path_points.is_empty() {
        return (body_a.position, Vec3::X);
    }
    if path_points.len() == 1 {
        return (body_a.position + body_a.rotation * path_points[0], Vec3::X);
    }

    let anchor_local = body_a.rotation.conjugate() * (anchor_world - body_a.position);
    let segment_count = if closed { path_points.len() } else { path_points.len() - 1 };

    let mut best_point = path_points[0];
    let mut best_tangent = path_points[1] - path_points[0];
    let mut best_dist = f32::MAX;
    for i in 0..segment_count {
        let a = path_points[i];
        let b = path_points[(i + 1) % path_points.len()];
        let edge = b - a;
        let length_sq = edge.length_squared();
        if length_sq < 1.0e-12 {
            continue;
        }
        let t = ((anchor_local - a).dot(edge) / length_sq).clamp(0.0, 1.0);
        let candidate = a + edge * t;
        let dist = (candidate - anchor_local).length_squared();
        if dist < best_dist {
            best_dist = dist;
            best_point = candidate;
            best_tangent = edge;
        }
    }
    (body_a.position + body_a.rotation * best_point, best_tangent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Mat3;

    fn dynamic_body(position: Vec3) -> SolverBody {
        SolverBody {
            position,
            rotation: Quat::IDENTITY,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            inv_mass: 1.0,
            inv_inertia: Mat3::IDENTITY,
        }
    }

    fn static_body(position: Vec3) -> SolverBody {
        SolverBody {
            inv_mass: 0.0,
            inv_inertia: Mat3::ZERO,
            ..dynamic_body(position)
        }
    }

    fn ids() -> (BodyId, BodyId) {
        (BodyId::new(0, 0), BodyId::new(1, 0))
    }

    #[test]
    fn point_joint_removes_relative_anchor_velocity() {
        let (id_a, id_b) = ids();
        let mut bodies = vec![static_body(Vec3::ZERO), dynamic_body(Vec3::X)];
        bodies[1].linear_velocity = Vec3::new(3.0, 0.0, 0.0);

        let mut joint = Constraint::point(id_a, id_b, Vec3::ZERO, -Vec3::X);
        joint.setup(&mut bodies, 0, 1);
        for _ in 0..8 {
            joint.solve_velocity(&mut bodies, 0, 1, 1.0 / 60.0);
        }
        let anchor_velocity = bodies[1].point_velocity(-Vec3::X);
        assert!(anchor_velocity.length() < 1.0e-3, "residual {anchor_velocity:?}");
    }

    #[test]
    fn distance_joint_only_resists_stretching_past_the_limit() {
        let (id_a, id_b) = ids();
        let mut bodies = vec![static_body(Vec3::ZERO), dynamic_body(Vec3::X * 2.0)];
        bodies[1].linear_velocity = Vec3::new(1.0, 0.0, 0.0);

        let mut joint = Constraint::distance(id_a, id_b, Vec3::ZERO, Vec3::ZERO, 0.0, 2.0);
        joint.setup(&mut bodies, 0, 1);
        joint.solve_velocity(&mut bodies, 0, 1, 1.0 / 60.0);
        // At max distance and moving outward, the rope goes taut.
        assert!(bodies[1].linear_velocity.x.abs() < 1.0e-4);

        // Moving inward is free.
        bodies[1].linear_velocity = Vec3::new(-1.0, 0.0, 0.0);
        let mut joint = Constraint::distance(id_a, id_b, Vec3::ZERO, Vec3::ZERO, 0.0, 2.0);
        joint.setup(&mut bodies, 0, 1);
        joint.solve_velocity(&mut bodies, 0, 1, 1.0 / 60.0);
        assert!((bodies[1].linear_velocity.x + 1.0).abs() < 1.0e-4);
    }

    #[test]
    fn hinge_blocks_off_axis_rotation() {
        let (id_a, id_b) = ids();
        let mut bodies = vec![static_body(Vec3::ZERO), dynamic_body(Vec3::X)];
        bodies[1].angular_velocity = Vec3::new(1.0, 2.0, 1.0);

        let mut joint = Constraint::hinge(id_a, id_b, Vec3::ZERO, -Vec3::X, Vec3::Y, Vec3::Y);
        joint.setup(&mut bodies, 0, 1);
        for _ in 0..16 {
            joint.solve_velocity(&mut bodies, 0, 1, 1.0 / 60.0);
        }
        let angular = bodies[1].angular_velocity;
        assert!(angular.x.abs() < 1.0e-2, "off-axis x spin {angular:?}");
        assert!(angular.z.abs() < 1.0e-2, "off-axis z spin {angular:?}");
        assert!(angular.y.abs() > 0.1, "hinge axis spin must survive {angular:?}");
    }

    #[test]
    fn fixed_joint_locks_both_bodies_together() {
        let (id_a, id_b) = ids();
        let mut bodies = vec![dynamic_body(Vec3::ZERO), dynamic_body(Vec3::X)];
        bodies[1].linear_velocity = Vec3::Y;
        bodies[1].angular_velocity = Vec3::Z;

        let mut joint = Constraint::fixed(id_a, id_b, Vec3::X * 0.5, -Vec3::X * 0.5, Quat::IDENTITY);
        joint.setup(&mut bodies, 0, 1);
        for _ in 0..16 {
            joint.solve_velocity(&mut bodies, 0, 1, 1.0 / 60.0);
        }
        let relative_angular = bodies[1].angular_velocity - bodies[0].angular_velocity;
        assert!(relative_angular.length() < 1.0e-3);
        let va = bodies[0].point_velocity(Vec3::X * 0.5);
        let vb = bodies[1].point_velocity(-Vec3::X * 0.5);
        assert!((va - vb).length() < 1.0e-3);
    }

    #[test]
    fn slider_permits_motion_along_its_axis_only() {
        let (id_a, id_b) = ids();
        let mut bodies = vec![static_body(Vec3::ZERO), dynamic_body(Vec3::X)];
        bodies[1].linear_velocity = Vec3::new(2.0, 1.5, 0.0);

        let mut joint = Constraint::slider(id_a, id_b, Vec3::ZERO, Vec3::ZERO, Vec3::X, Quat::IDENTITY);
        joint.setup(&mut bodies, 0, 1);
        for _ in 0..16 {
            joint.solve_velocity(&mut bodies, 0, 1, 1.0 / 60.0);
        }
        assert!((bodies[1].linear_velocity.x - 2.0).abs() < 1.0e-3);
        assert!(bodies[1].linear_velocity.y.abs() < 1.0e-3);
    }

    #[test]
    fn cone_joint_stops_swing_outside_the_cone() {
        let (id_a, id_b) = ids();
        let mut bodies = vec![static_body(Vec3::ZERO), dynamic_body(Vec3::Y)];
        // B already tilted past the 0.2 rad cone.
        bodies[0].rotation = Quat::IDENTITY;
        bodies[1].rotation = Quat::from_rotation_z(0.4);
        bodies[1].angular_velocity = Vec3::Z * 1.0; // swinging further out

        let mut joint = Constraint::Cone {
            body_a: id_a,
            body_b: id_b,
            local_anchor_a: Vec3::ZERO,
            local_anchor_b: Vec3::ZERO,
            local_twist_a: Vec3::Y,
            local_twist_b: Vec3::Y,
            half_cone_angle: 0.2,
            point: PointConstraintPart::default(),
            limit_part: AxisConstraintPart::default(),
            violation: 0.0,
        };
        joint.setup(&mut bodies, 0, 1);
        for _ in 0..8 {
            joint.solve_velocity(&mut bodies, 0, 1, 1.0 / 60.0);
        }
        // Outward swing about +Z is cancelled (or reversed slightly).
        assert!(bodies[1].angular_velocity.z <= 1.0e-3, "swing {:?}", bodies[1].angular_velocity);
    }

    #[test]
    fn six_dof_with_all_axes_locked_behaves_like_fixed() {
        let (id_a, id_b) = ids();
        let mut bodies = vec![static_body(Vec3::ZERO), dynamic_body(Vec3::X)];
        bodies[1].linear_velocity = Vec3::new(1.0, 1.0, 1.0);
        bodies[1].angular_velocity = Vec3::new(0.5, 0.5, 0.5);

        let mut joint = Constraint::SixDof {
            body_a: id_a,
            body_b: id_b,
            local_anchor_a: Vec3::ZERO,
            local_anchor_b: -Vec3::X,
            translation: [AxisState::Locked; 3],
            rotation_state: [AxisState::Locked; 3],
            linear_parts: Default::default(),
            angular_parts: Default::default(),
            linear_errors: [0.0; 3],
            angular_errors: [0.0; 3],
        };
        joint.setup(&mut bodies, 0, 1);
        for _ in 0..16 {
            joint.solve_velocity(&mut bodies, 0, 1, 1.0 / 60.0);
        }
        assert!(bodies[1].angular_velocity.length() < 1.0e-2);
        assert!(bodies[1].point_velocity(-Vec3::X).length() < 1.0e-2);
    }
}
