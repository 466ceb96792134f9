//! Building blocks of the sequential-impulse solver.
//!
//! Every constraint is factored into one or more *axis parts*: a single
//! Lagrange multiplier along one Jacobian row with an accumulated lambda for
//! warm starting and a min/max clamp. The effective mass is computed once at
//! setup and reused by every iteration.

use glam::{Mat3, Quat, Vec3};

/// Velocity and mass state of one body inside an island, indexed locally.
/// Static and kinematic bodies participate with zero inverse mass, so
/// impulses applied to them vanish without branching.
#[derive(Debug, Clone)]
pub struct SolverBody {
    pub position: Vec3,
    pub rotation: Quat,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    pub inv_mass: f32,
    pub inv_inertia: Mat3,
}

impl SolverBody {
    pub fn point_velocity(&self, arm: Vec3) -> Vec3 {
        self.linear_velocity + self.angular_velocity.cross(arm)
    }

    fn apply_impulse(&mut self, impulse: Vec3, arm: Vec3) {
        self.linear_velocity += impulse * self.inv_mass;
        self.angular_velocity += self.inv_inertia * arm.cross(impulse);
    }

    /// Moves the body without touching velocities (position solver).
    fn apply_position_impulse(&mut self, impulse: Vec3, arm: Vec3) {
        self.position += impulse * self.inv_mass;
        let delta_rotation = self.inv_inertia * arm.cross(impulse);
        let angle = delta_rotation.length();
        if angle > 1.0e-9 {
            self.rotation =
                (Quat::from_axis_angle(delta_rotation / angle, angle) * self.rotation).normalize();
        }
    }
}

/// One scalar constraint row along a world-space axis.
#[derive(Debug, Clone, Copy, Default)]
pub struct AxisConstraintPart {
    axis: Vec3,
    arm_a: Vec3,
    arm_b: Vec3,
    /// 1 / (J M⁻¹ Jᵀ), precomputed at setup.
    effective_mass: f32,
    /// Velocity bias (restitution or speculative separation).
    pub bias: f32,
    /// Accumulated impulse, the warm-start state.
    pub total_lambda: f32,
}

impl AxisConstraintPart {
    /// Sets up the row for a constraint at arms `arm_a`/`arm_b` from the two
    /// bodies' centers of mass along `axis`.
    pub fn calculate(
        body_a: &SolverBody,
        body_b: &SolverBody,
        arm_a: Vec3,
        arm_b: Vec3,
        axis: Vec3,
        bias: f32,
    ) -> Self {
        let inv_i_a = body_a.inv_inertia * arm_a.cross(axis);
        let inv_i_b = body_b.inv_inertia * arm_b.cross(axis);
        let k = body_a.inv_mass
            + body_b.inv_mass
            + inv_i_a.cross(arm_a).dot(axis)
            + inv_i_b.cross(arm_b).dot(axis);
        Self {
            axis,
            arm_a,
            arm_b,
            effective_mass: if k > 1.0e-9 { 1.0 / k } else { 0.0 },
            bias,
            total_lambda: 0.0,
        }
    }

    /// Angular-only row (no linear motion), used by rotation locks and limits.
    pub fn calculate_angular(body_a: &SolverBody, body_b: &SolverBody, axis: Vec3, bias: f32) -> Self {
        let k = axis.dot(body_a.inv_inertia * axis) + axis.dot(body_b.inv_inertia * axis);
        Self {
            axis,
            arm_a: Vec3::ZERO,
            arm_b: Vec3::ZERO,
            effective_mass: if k > 1.0e-9 { 1.0 / k } else { 0.0 },
            bias,
            total_lambda: 0.0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.effective_mass > 0.0
    }

    /// Re-applies the cached impulse, scaled by `warm_start_ratio`
    /// (`dt_current / dt_previous`).
    pub fn warm_start(&mut self, body_a: &mut SolverBody, body_b: &mut SolverBody, warm_start_ratio: f32) {
        self.total_lambda *= warm_start_ratio;
        if self.total_lambda == 0.0 {
            return;
        }
        let impulse = self.axis * self.total_lambda;
        body_a.apply_impulse(-impulse, self.arm_a);
        body_b.apply_impulse(impulse, self.arm_b);
    }

    /// Angular-only warm start.
    pub fn warm_start_angular(&mut self, body_a: &mut SolverBody, body_b: &mut SolverBody, warm_start_ratio: f32) {
        self.total_lambda *= warm_start_ratio;
        if self.total_lambda == 0.0 {
            return;
        }
        let impulse = self.axis * self.total_lambda;
        body_a.angular_velocity -= body_a.inv_inertia * impulse;
        body_b.angular_velocity += body_b.inv_inertia * impulse;
    }

    /// One Gauss-Seidel update. The accumulated lambda is clamped to
    /// `[min_lambda, max_lambda]`. Returns whether the impulse changed
    /// significantly (drives the solver's early-out).
    pub fn solve(
        &mut self,
        body_a: &mut SolverBody,
        body_b: &mut SolverBody,
        min_lambda: f32,
        max_lambda: f32,
    ) -> bool {
        if !self.is_active() {
            return false;
        }
        let relative_velocity =
            body_b.point_velocity(self.arm_b) - body_a.point_velocity(self.arm_a);
        let lambda = -self.effective_mass * (relative_velocity.dot(self.axis) + self.bias);

        let new_total = (self.total_lambda + lambda).clamp(min_lambda, max_lambda);
        let delta = new_total - self.total_lambda;
        self.total_lambda = new_total;
        if delta == 0.0 {
            return false;
        }

        let impulse = self.axis * delta;
        body_a.apply_impulse(-impulse, self.arm_a);
        body_b.apply_impulse(impulse, self.arm_b);
        delta.abs() > 1.0e-6
    }

    /// Angular-only Gauss-Seidel update.
    pub fn solve_angular(
        &mut self,
        body_a: &mut SolverBody,
        body_b: &mut SolverBody,
        min_lambda: f32,
        max_lambda: f32,
    ) -> bool {
        if !self.is_active() {
            return false;
        }
        let relative = body_b.angular_velocity - body_a.angular_velocity;
        let lambda = -self.effective_mass * (relative.dot(self.axis) + self.bias);

        let new_total = (self.total_lambda + lambda).clamp(min_lambda, max_lambda);
        let delta = new_total - self.total_lambda;
        self.total_lambda = new_total;
        if delta == 0.0 {
            return false;
        }

        let impulse = self.axis * delta;
        body_a.angular_velocity -= body_a.inv_inertia * impulse;
        body_b.angular_velocity += body_b.inv_inertia * impulse;
        delta.abs() > 1.0e-6
    }

    /// Position-level correction of `error` along the stored axis, applied
    /// without touching velocities.
    pub fn solve_position(&self, body_a: &mut SolverBody, body_b: &mut SolverBody, error: f32) {
        if !self.is_active() || error == 0.0 {
            return;
        }
        let impulse = self.axis * (-self.effective_mass * error);
        body_a.apply_position_impulse(-impulse, self.arm_a);
        body_b.apply_position_impulse(impulse, self.arm_b);
    }

    /// Rotation-only position correction of an angular `error` (radians)
    /// about the stored axis.
    pub fn solve_position_angular(&self, body_a: &mut SolverBody, body_b: &mut SolverBody, error: f32) {
        if !self.is_active() || error == 0.0 {
            return;
        }
        let impulse = self.axis * (-self.effective_mass * error);
        rotate_by(body_a, -(body_a.inv_inertia * impulse));
        rotate_by(body_b, body_b.inv_inertia * impulse);
    }
}

/// 3-DOF point-to-point block (a small K-matrix constraint shared by the
/// point, hinge, fixed, and swing-twist joints).
#[derive(Debug, Clone, Copy, Default)]
pub struct PointConstraintPart {
    arm_a: Vec3,
    arm_b: Vec3,
    effective_mass: Mat3,
    pub total_lambda: Vec3,
}

impl PointConstraintPart {
    pub fn calculate(body_a: &SolverBody, body_b: &SolverBody, arm_a: Vec3, arm_b: Vec3) -> Self {
        let skew_a = crate::utils::math::skew(arm_a);
        let skew_b = crate::utils::math::skew(arm_b);
        let k = Mat3::IDENTITY * (body_a.inv_mass + body_b.inv_mass)
            - skew_a * body_a.inv_inertia * skew_a
            - skew_b * body_b.inv_inertia * skew_b;
        let effective_mass = if k.determinant().abs() > 1.0e-9 { k.inverse() } else { Mat3::ZERO };
        Self {
            arm_a,
            arm_b,
            effective_mass,
            total_lambda: Vec3::ZERO,
        }
    }

    pub fn warm_start(&mut self, body_a: &mut SolverBody, body_b: &mut SolverBody, warm_start_ratio: f32) {
        self.total_lambda *= warm_start_ratio;
        if self.total_lambda == Vec3::ZERO {
            return;
        }
        body_a.apply_impulse(-self.total_lambda, self.arm_a);
        body_b.apply_impulse(self.total_lambda, self.arm_b);
    }

    pub fn solve(&mut self, body_a: &mut SolverBody, body_b: &mut SolverBody, bias: Vec3) -> bool {
        let relative_velocity =
            body_b.point_velocity(self.arm_b) - body_a.point_velocity(self.arm_a);
        let lambda = self.effective_mass * -(relative_velocity + bias);
        self.total_lambda += lambda;
        body_a.apply_impulse(-lambda, self.arm_a);
        body_b.apply_impulse(lambda, self.arm_b);
        lambda.length_squared() > 1.0e-12
    }

    /// Position-level correction moving the anchors together by `error`.
    pub fn solve_position(&self, body_a: &mut SolverBody, body_b: &mut SolverBody, error: Vec3) {
        if error == Vec3::ZERO {
            return;
        }
        let impulse = self.effective_mass * -error;
        body_a.apply_position_impulse(-impulse, self.arm_a);
        body_b.apply_position_impulse(impulse, self.arm_b);
    }
}

/// 3-DOF angular lock block (fixed and slider joints).
#[derive(Debug, Clone, Copy, Default)]
pub struct RotationConstraintPart {
    effective_mass: Mat3,
    pub total_lambda: Vec3,
}

impl RotationConstraintPart {
    pub fn calculate(body_a: &SolverBody, body_b: &SolverBody) -> Self {
        let k = body_a.inv_inertia + body_b.inv_inertia;
        let effective_mass = if k.determinant().abs() > 1.0e-9 { k.inverse() } else { Mat3::ZERO };
        Self { effective_mass, total_lambda: Vec3::ZERO }
    }

    pub fn warm_start(&mut self, body_a: &mut SolverBody, body_b: &mut SolverBody, warm_start_ratio: f32) {
        self.total_lambda *= warm_start_ratio;
        if self.total_lambda == Vec3::ZERO {
            return;
        }
        body_a.angular_velocity -= body_a.inv_inertia * self.total_lambda;
        body_b.angular_velocity += body_b.inv_inertia * self.total_lambda;
    }

    pub fn solve(&mut self, body_a: &mut SolverBody, body_b: &mut SolverBody, bias: Vec3) -> bool {
        let relative = body_b.angular_velocity - body_a.angular_velocity;
        let lambda = self.effective_mass * -(relative + bias);
        self.total_lambda += lambda;
        body_a.angular_velocity -= body_a.inv_inertia * lambda;
        body_b.angular_velocity += body_b.inv_inertia * lambda;
        lambda.length_squared() > 1.0e-12
    }

    pub fn solve_position(&self, body_a: &mut SolverBody, body_b: &mut SolverBody, error: Vec3) {
        if error == Vec3::ZERO {
            return;
        }
        let impulse = self.effective_mass * -error;
        let delta_a = body_a.inv_inertia * impulse;
        let delta_b = body_b.inv_inertia * impulse;
        rotate_by(body_a, -delta_a);
        rotate_by(body_b, delta_b);
    }
}

fn rotate_by(body: &mut SolverBody, rotation_vector: Vec3) {
    let angle = rotation_vector.length();
    if angle > 1.0e-9 {
        body.rotation =
            (Quat::from_axis_angle(rotation_vector / angle, angle) * body.rotation).normalize();
    }
}
