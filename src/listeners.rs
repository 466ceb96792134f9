//! Application-facing callback traits: contact events, body activation, and
//! per-step hooks. All callbacks may be invoked from worker threads and must
//! be thread-safe.

use glam::Vec3;

use crate::collision::narrowphase::Manifold;
use crate::core::body::BodyId;
use crate::shapes::SubShapeId;

/// Reply of [`ContactListener::on_contact_validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidateResult {
    /// Process this contact and keep asking for the rest of the pair.
    AcceptContact,
    /// Accept every further contact of this pair without asking again.
    AcceptAllContactsForThisBodyPair,
    /// Drop this contact but keep asking.
    RejectContact,
    /// Drop the whole pair for this step.
    RejectAllContactsForThisBodyPair,
}

/// Combined surface properties of one contact, derived from both bodies and
/// adjustable from `on_contact_added` / `on_contact_persisted`.
#[derive(Debug, Clone, Copy)]
pub struct ContactSettings {
    pub combined_friction: f32,
    pub combined_restitution: f32,
    /// Sensors report contacts but produce no collision response.
    pub is_sensor: bool,
}

impl Default for ContactSettings {
    fn default() -> Self {
        Self {
            combined_friction: 0.2,
            combined_restitution: 0.0,
            is_sensor: false,
        }
    }
}

/// Receives the lifecycle of every contact manifold.
#[allow(unused_variables)]
pub trait ContactListener: Send + Sync {
    /// Called before a pair enters the contact cache; runs once per pair per
    /// step until the first `AcceptAllContactsForThisBodyPair` reply.
    fn on_contact_validate(&self, body_a: BodyId, body_b: BodyId, offset: Vec3) -> ValidateResult {
        ValidateResult::AcceptAllContactsForThisBodyPair
    }

    /// A manifold was discovered this step.
    fn on_contact_added(
        &self,
        body_a: BodyId,
        body_b: BodyId,
        manifold: &Manifold,
        settings: &mut ContactSettings,
    ) {
    }

    /// A manifold from the previous step was found again.
    fn on_contact_persisted(
        &self,
        body_a: BodyId,
        body_b: BodyId,
        manifold: &Manifold,
        settings: &mut ContactSettings,
    ) {
    }

    /// A manifold from the previous step was not re-found.
    fn on_contact_removed(
        &self,
        body_a: BodyId,
        sub_shape_a: SubShapeId,
        body_b: BodyId,
        sub_shape_b: SubShapeId,
    ) {
    }
}

/// Notified when bodies enter or leave the active set.
#[allow(unused_variables)]
pub trait BodyActivationListener: Send + Sync {
    fn on_body_activated(&self, body: BodyId, user_data: u64) {}
    fn on_body_deactivated(&self, body: BodyId, user_data: u64) {}
}

/// Called at the start of every collision step, before gravity is applied.
pub trait StepListener: Send + Sync {
    fn on_step(&self, dt: f32);
}
