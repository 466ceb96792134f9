use std::fmt;
use std::sync::Arc;

use glam::{Mat3, Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::core::layers::{BroadPhaseLayer, ObjectLayer};
use crate::core::types::{Aabb, MassProperties};
use crate::shapes::Shape;

/// Generation-tagged body handle: low 24 bits index, high 8 bits generation.
/// Stale handles from a destroyed body compare not-equal to the reused slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BodyId(u32);

impl BodyId {
    pub const INVALID: BodyId = BodyId(u32::MAX);
    pub const MAX_BODIES: usize = 1 << 24;

    pub(crate) fn new(index: u32, generation: u8) -> Self {
        debug_assert!((index as usize) < Self::MAX_BODIES);
        Self(index | ((generation as u32) << 24))
    }

    pub fn index(self) -> usize {
        (self.0 & 0x00ff_ffff) as usize
    }

    pub fn generation(self) -> u8 {
        (self.0 >> 24) as u8
    }

    pub fn is_invalid(self) -> bool {
        self.0 == u32::MAX
    }

    pub(crate) fn raw(self) -> u32 {
        self.0
    }

    pub(crate) fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
}

impl Default for BodyId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Debug for BodyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_invalid() {
            write!(f, "BodyId(invalid)")
        } else {
            write!(f, "BodyId({}:{})", self.index(), self.generation())
        }
    }
}

/// How a body participates in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotionType {
    /// Never moves; carries no motion properties.
    Static,
    /// Moved by velocities only, unaffected by forces or contacts.
    Kinematic,
    /// Fully simulated.
    Dynamic,
}

/// Per-body choice between plain discrete stepping and linear-cast CCD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotionQuality {
    Discrete,
    LinearCast,
}

pub(crate) const INACTIVE_INDEX: u32 = u32::MAX;

/// Velocities, mass data, and bookkeeping for non-static bodies.
#[derive(Debug, Clone)]
pub struct MotionProperties {
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    pub inv_mass: f32,
    /// Inverse inertia tensor in body-local space, about the center of mass.
    pub inv_inertia_local: Mat3,
    pub gravity_scale: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub max_linear_velocity: f32,
    pub max_angular_velocity: f32,
    pub motion_quality: MotionQuality,
    pub allow_sleeping: bool,
    /// Seconds this body has stayed below the sleep velocity threshold.
    pub(crate) sleep_timer: f32,
    /// Force accumulated since the last velocity integration.
    pub(crate) accumulated_force: Vec3,
    pub(crate) accumulated_torque: Vec3,
    /// Position of this body in the active-bodies array, or `INACTIVE_INDEX`.
    pub(crate) active_index: u32,
    /// Island this body was assigned in the current step.
    pub(crate) island_index: u32,
}

impl MotionProperties {
    fn new(quality: MotionQuality) -> Self {
        Self {
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            inv_mass: 1.0,
            inv_inertia_local: Mat3::IDENTITY,
            gravity_scale: 1.0,
            linear_damping: 0.05,
            angular_damping: 0.05,
            max_linear_velocity: 500.0,
            max_angular_velocity: 0.25 * std::f32::consts::PI * 60.0,
            motion_quality: quality,
            allow_sleeping: true,
            sleep_timer: 0.0,
            accumulated_force: Vec3::ZERO,
            accumulated_torque: Vec3::ZERO,
            active_index: INACTIVE_INDEX,
            island_index: u32::MAX,
        }
    }

    pub fn set_mass_properties(&mut self, props: &MassProperties) {
        self.inv_mass = if props.mass > f32::EPSILON { 1.0 / props.mass } else { 0.0 };
        self.inv_inertia_local = if props.inertia.determinant().abs() > f32::EPSILON {
            props.inertia.inverse()
        } else {
            Mat3::ZERO
        };
    }

    pub fn inv_inertia_world(&self, rotation: Quat) -> Mat3 {
        let m = Mat3::from_quat(rotation);
        m * self.inv_inertia_local * m.transpose()
    }

    pub fn clamp_velocities(&mut self) {
        let linear_sq = self.linear_velocity.length_squared();
        if linear_sq > self.max_linear_velocity * self.max_linear_velocity {
            self.linear_velocity *= self.max_linear_velocity / linear_sq.sqrt();
        }
        let angular_sq = self.angular_velocity.length_squared();
        if angular_sq > self.max_angular_velocity * self.max_angular_velocity {
            self.angular_velocity *= self.max_angular_velocity / angular_sq.sqrt();
        }
    }
}

/// A rigid body. Owned exclusively by the body store; application code refers
/// to bodies by [`BodyId`].
#[derive(Debug, Clone)]
pub struct Body {
    pub(crate) id: BodyId,
    pub position: Vec3,
    pub rotation: Quat,
    pub shape: Arc<Shape>,
    pub object_layer: ObjectLayer,
    pub(crate) broad_phase_layer: BroadPhaseLayer,
    pub(crate) world_bounds: Aabb,
    pub motion_type: MotionType,
    pub friction: f32,
    pub restitution: f32,
    pub user_data: u64,
    pub(crate) in_broad_phase: bool,
    pub(crate) motion: Option<MotionProperties>,
}

impl Body {
    pub(crate) fn from_settings(id: BodyId, settings: &BodyCreationSettings) -> Self {
        let motion = if settings.motion_type == MotionType::Static {
            None
        } else {
            let mut motion = MotionProperties::new(settings.motion_quality);
            motion.linear_velocity = settings.linear_velocity;
            motion.angular_velocity = settings.angular_velocity;
            motion.gravity_scale = settings.gravity_scale;
            motion.linear_damping = settings.linear_damping;
            motion.angular_damping = settings.angular_damping;
            motion.max_linear_velocity = settings.max_linear_velocity;
            motion.max_angular_velocity = settings.max_angular_velocity;
            motion.allow_sleeping = settings.allow_sleeping;
            if settings.motion_type == MotionType::Dynamic {
                let props = settings
                    .override_mass_properties
                    .unwrap_or_else(|| settings.shape.compute_mass_properties(settings.mass));
                motion.set_mass_properties(&props);
            } else {
                // Kinematic bodies behave as infinite mass toward the solver.
                motion.inv_mass = 0.0;
                motion.inv_inertia_local = Mat3::ZERO;
            }
            Some(motion)
        };

        let mut body = Self {
            id,
            position: settings.position,
            rotation: settings.rotation.normalize(),
            shape: settings.shape.clone(),
            object_layer: settings.object_layer,
            broad_phase_layer: BroadPhaseLayer(0),
            world_bounds: Aabb::INVALID,
            motion_type: settings.motion_type,
            friction: settings.friction,
            restitution: settings.restitution,
            user_data: settings.user_data,
            in_broad_phase: false,
            motion,
        };
        body.update_world_bounds();
        body
    }

    pub fn id(&self) -> BodyId {
        self.id
    }

    pub fn is_static(&self) -> bool {
        self.motion_type == MotionType::Static
    }

    pub fn is_kinematic(&self) -> bool {
        self.motion_type == MotionType::Kinematic
    }

    pub fn is_dynamic(&self) -> bool {
        self.motion_type == MotionType::Dynamic
    }

    /// Whether the body is currently in the active (simulating) set.
    pub fn is_active(&self) -> bool {
        self.motion
            .as_ref()
            .is_some_and(|m| m.active_index != INACTIVE_INDEX)
    }

    pub fn motion(&self) -> Option<&MotionProperties> {
        self.motion.as_ref()
    }

    pub fn motion_mut(&mut self) -> Option<&mut MotionProperties> {
        self.motion.as_mut()
    }

    pub fn world_bounds(&self) -> &Aabb {
        &self.world_bounds
    }

    pub(crate) fn update_world_bounds(&mut self) {
        self.world_bounds = self.shape.world_bounds(self.rotation, self.position);
    }

    pub fn linear_velocity(&self) -> Vec3 {
        self.motion.as_ref().map_or(Vec3::ZERO, |m| m.linear_velocity)
    }

    pub fn angular_velocity(&self) -> Vec3 {
        self.motion.as_ref().map_or(Vec3::ZERO, |m| m.angular_velocity)
    }

    /// Velocity of a world-space point rigidly attached to the body.
    pub fn point_velocity(&self, point: Vec3) -> Vec3 {
        self.point_velocity_with_arm(point - self.position)
    }

    /// Point velocity given the arm from the center of mass.
    pub(crate) fn point_velocity_with_arm(&self, arm: Vec3) -> Vec3 {
        match &self.motion {
            Some(m) => m.linear_velocity + m.angular_velocity.cross(arm),
            None => Vec3::ZERO,
        }
    }

    pub fn inv_mass(&self) -> f32 {
        self.motion.as_ref().map_or(0.0, |m| m.inv_mass)
    }

    pub fn inv_inertia_world(&self) -> Mat3 {
        match &self.motion {
            Some(m) => m.inv_inertia_world(self.rotation),
            None => Mat3::ZERO,
        }
    }

    pub fn set_linear_velocity(&mut self, velocity: Vec3) {
        if let Some(motion) = self.motion.as_mut() {
            motion.linear_velocity = velocity;
        }
    }

    pub fn set_angular_velocity(&mut self, velocity: Vec3) {
        if let Some(motion) = self.motion.as_mut() {
            motion.angular_velocity = velocity;
        }
    }

    /// Accumulates a force through the next velocity integration.
    pub fn add_force(&mut self, force: Vec3) {
        if self.is_dynamic() {
            if let Some(motion) = self.motion.as_mut() {
                motion.accumulated_force += force;
            }
        }
    }

    pub fn add_torque(&mut self, torque: Vec3) {
        if self.is_dynamic() {
            if let Some(motion) = self.motion.as_mut() {
                motion.accumulated_torque += torque;
            }
        }
    }

    /// Applies an instantaneous impulse at the center of mass.
    pub fn add_impulse(&mut self, impulse: Vec3) {
        if self.is_dynamic() {
            if let Some(motion) = self.motion.as_mut() {
                motion.linear_velocity += impulse * motion.inv_mass;
            }
        }
    }

    /// Applies an instantaneous impulse at a world-space point.
    pub fn add_impulse_at(&mut self, impulse: Vec3, point: Vec3) {
        if !self.is_dynamic() {
            return;
        }
        let inv_inertia = self.inv_inertia_world();
        let arm = point - self.position;
        if let Some(motion) = self.motion.as_mut() {
            motion.linear_velocity += impulse * motion.inv_mass;
            motion.angular_velocity += inv_inertia * arm.cross(impulse);
        }
    }

    pub fn add_angular_impulse(&mut self, impulse: Vec3) {
        if !self.is_dynamic() {
            return;
        }
        let inv_inertia = self.inv_inertia_world();
        if let Some(motion) = self.motion.as_mut() {
            motion.angular_velocity += inv_inertia * impulse;
        }
    }

    /// Sets the velocities of a kinematic body so that it arrives at the
    /// target pose after `dt` seconds of integration.
    pub fn move_kinematic(&mut self, target_position: Vec3, target_rotation: Quat, dt: f32) {
        debug_assert!(!self.is_static());
        if dt <= 0.0 {
            return;
        }
        let inv_dt = 1.0 / dt;
        let linear = (target_position - self.position) * inv_dt;

        let delta = target_rotation * self.rotation.inverse();
        let (axis, angle) = delta.to_axis_angle();
        let angle = if angle > std::f32::consts::PI {
            angle - 2.0 * std::f32::consts::PI
        } else {
            angle
        };
        let angular = axis * (angle * inv_dt);

        if let Some(motion) = self.motion.as_mut() {
            motion.linear_velocity = linear;
            motion.angular_velocity = angular;
        }
    }
}

/// Everything needed to create a body. Plain data with builder-style setters.
#[derive(Debug, Clone)]
pub struct BodyCreationSettings {
    pub position: Vec3,
    pub rotation: Quat,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    pub shape: Arc<Shape>,
    pub motion_type: MotionType,
    pub motion_quality: MotionQuality,
    pub object_layer: ObjectLayer,
    pub friction: f32,
    pub restitution: f32,
    pub gravity_scale: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub max_linear_velocity: f32,
    pub max_angular_velocity: f32,
    pub allow_sleeping: bool,
    pub user_data: u64,
    /// Total mass used when deriving mass properties from the shape.
    pub mass: f32,
    pub override_mass_properties: Option<MassProperties>,
}

impl BodyCreationSettings {
    pub fn new(shape: Arc<Shape>, position: Vec3, rotation: Quat, motion_type: MotionType, object_layer: ObjectLayer) -> Self {
        Self {
            position,
            rotation,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            shape,
            motion_type,
            motion_quality: MotionQuality::Discrete,
            object_layer,
            friction: 0.2,
            restitution: 0.0,
            gravity_scale: 1.0,
            linear_damping: 0.05,
            angular_damping: 0.05,
            max_linear_velocity: 500.0,
            max_angular_velocity: 0.25 * std::f32::consts::PI * 60.0,
            allow_sleeping: true,
            user_data: 0,
            mass: 1.0,
            override_mass_properties: None,
        }
    }

    pub fn with_motion_quality(mut self, quality: MotionQuality) -> Self {
        self.motion_quality = quality;
        self
    }

    pub fn with_velocity(mut self, linear: Vec3, angular: Vec3) -> Self {
        self.linear_velocity = linear;
        self.angular_velocity = angular;
        self
    }

    pub fn with_friction(mut self, friction: f32) -> Self {
        self.friction = friction;
        self
    }

    pub fn with_restitution(mut self, restitution: f32) -> Self {
        self.restitution = restitution;
        self
    }

    pub fn with_mass(mut self, mass: f32) -> Self {
        self.mass = mass;
        self
    }

    pub fn with_mass_properties(mut self, props: MassProperties) -> Self {
        self.override_mass_properties = Some(props);
        self
    }

    pub fn with_damping(mut self, linear: f32, angular: f32) -> Self {
        self.linear_damping = linear;
        self.angular_damping = angular;
        self
    }

    pub fn with_gravity_scale(mut self, scale: f32) -> Self {
        self.gravity_scale = scale;
        self
    }

    pub fn with_allow_sleeping(mut self, allow: bool) -> Self {
        self.allow_sleeping = allow;
        self
    }

    pub fn with_user_data(mut self, user_data: u64) -> Self {
        self.user_data = user_data;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_ids_encode_index_and_generation() {
        let id = BodyId::new(1234, 7);
        assert_eq!(id.index(), 1234);
        assert_eq!(id.generation(), 7);
        assert_ne!(id, BodyId::new(1234, 8));
        assert!(BodyId::INVALID.is_invalid());
    }

    #[test]
    fn static_bodies_have_no_motion_properties() {
        let settings = BodyCreationSettings::new(
            Shape::sphere(1.0),
            Vec3::ZERO,
            Quat::IDENTITY,
            MotionType::Static,
            ObjectLayer(0),
        );
        let body = Body::from_settings(BodyId::new(0, 0), &settings);
        assert!(body.motion().is_none());
        assert_eq!(body.inv_mass(), 0.0);
        assert!(!body.is_active());
    }

    #[test]
    fn impulse_at_offset_point_spins_the_body() {
        let settings = BodyCreationSettings::new(
            Shape::sphere(1.0),
            Vec3::ZERO,
            Quat::IDENTITY,
            MotionType::Dynamic,
            ObjectLayer(0),
        );
        let mut body = Body::from_settings(BodyId::new(0, 0), &settings);
        body.add_impulse_at(Vec3::Y, Vec3::X);
        assert!(body.angular_velocity().z > 0.0);
        assert!(body.linear_velocity().y > 0.0);
    }

    #[test]
    fn move_kinematic_reaches_the_target() {
        let settings = BodyCreationSettings::new(
            Shape::cuboid(Vec3::ONE),
            Vec3::ZERO,
            Quat::IDENTITY,
            MotionType::Kinematic,
            ObjectLayer(0),
        );
        let mut body = Body::from_settings(BodyId::new(0, 0), &settings);
        body.move_kinematic(Vec3::new(2.0, 0.0, 0.0), Quat::IDENTITY, 0.5);
        assert!((body.linear_velocity() - Vec3::new(4.0, 0.0, 0.0)).length() < 1.0e-5);
    }
}
