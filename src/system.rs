//! The physics system: owner of all simulation state and the application's
//! entry point.

use std::sync::Arc;

use glam::{Quat, Vec3};

use crate::broadphase::BroadPhase;
use crate::collision::cache::ContactCacheSet;
use crate::collision::queries::NarrowPhaseQuery;
use crate::config::{PhysicsSettings, DEFAULT_GRAVITY};
use crate::core::body::{Body, BodyCreationSettings, BodyId};
use crate::core::body_lock::{BodyLockManager, BodyLockRead, BodyLockWrite};
use crate::core::body_store::BodyStore;
use crate::core::layers::{
    BroadPhaseLayerInterface, ObjectLayerPairFilter, ObjectVsBroadPhaseLayerFilter,
};
use crate::dynamics::island::IslandBuilder;
use crate::dynamics::joints::Constraint;
use crate::dynamics::solver::JointCell;
use crate::listeners::{BodyActivationListener, ContactListener, StepListener};
use crate::state::StateRecorder;
use crate::utils::allocator::{Arena, ArenaId};
use crate::utils::profiling::StepProfile;

/// Handle of an added constraint.
pub type ConstraintHandle = ArenaId;

/// Capacities and collaborators needed to build a [`PhysicsSystem`].
pub struct PhysicsSystemSettings {
    pub max_bodies: usize,
    /// 0 picks a default based on the available parallelism.
    pub num_body_mutexes: usize,
    pub max_body_pairs: usize,
    pub max_contact_constraints: usize,
    pub broad_phase_layer_interface: Arc<dyn BroadPhaseLayerInterface>,
    pub object_vs_broad_phase_filter: Arc<dyn ObjectVsBroadPhaseLayerFilter>,
    pub object_pair_filter: Arc<dyn ObjectLayerPairFilter>,
    pub physics_settings: PhysicsSettings,
}

impl PhysicsSystemSettings {
    pub fn new(
        max_bodies: usize,
        broad_phase_layer_interface: Arc<dyn BroadPhaseLayerInterface>,
        object_vs_broad_phase_filter: Arc<dyn ObjectVsBroadPhaseLayerFilter>,
        object_pair_filter: Arc<dyn ObjectLayerPairFilter>,
    ) -> Self {
        Self {
            max_bodies,
            num_body_mutexes: 0,
            max_body_pairs: max_bodies * 8,
            max_contact_constraints: max_bodies * 4,
            broad_phase_layer_interface,
            object_vs_broad_phase_filter,
            object_pair_filter,
            physics_settings: PhysicsSettings::default(),
        }
    }
}

pub struct PhysicsSystem {
    pub(crate) settings: PhysicsSettings,
    pub(crate) gravity: Vec3,
    pub(crate) store: BodyStore,
    pub(crate) locks: BodyLockManager,
    pub(crate) broadphase: BroadPhase,
    pub(crate) layer_interface: Arc<dyn BroadPhaseLayerInterface>,
    pub(crate) bp_filter: Arc<dyn ObjectVsBroadPhaseLayerFilter>,
    pub(crate) object_filter: Arc<dyn ObjectLayerPairFilter>,
    pub(crate) cache: ContactCacheSet,
    pub(crate) joints: Arena<JointCell>,
    pub(crate) islands: IslandBuilder,
    pub(crate) contact_listener: Option<Arc<dyn ContactListener>>,
    pub(crate) activation_listener: Option<Arc<dyn BodyActivationListener>>,
    pub(crate) step_listeners: Vec<Arc<dyn StepListener>>,
    /// dt of the previous sub-step; feeds the warm-start impulse ratio.
    pub(crate) previous_sub_step_dt: f32,
    pub(crate) profile: StepProfile,
}

impl PhysicsSystem {
    pub fn new(settings: PhysicsSystemSettings) -> Self {
        let broadphase = BroadPhase::new(settings.max_bodies, settings.broad_phase_layer_interface.as_ref());
        Self {
            settings: settings.physics_settings,
            gravity: Vec3::from_slice(&DEFAULT_GRAVITY),
            store: BodyStore::new(settings.max_bodies),
            locks: BodyLockManager::new(settings.num_body_mutexes),
            broadphase,
            layer_interface: settings.broad_phase_layer_interface,
            bp_filter: settings.object_vs_broad_phase_filter,
            object_filter: settings.object_pair_filter,
            cache: ContactCacheSet::new(settings.max_body_pairs, settings.max_contact_constraints),
            joints: Arena::new(),
            islands: IslandBuilder::new(),
            contact_listener: None,
            activation_listener: None,
            step_listeners: Vec::new(),
            previous_sub_step_dt: 0.0,
            profile: StepProfile::default(),
        }
    }

    pub fn set_gravity(&mut self, gravity: Vec3) {
        self.gravity = gravity;
    }

    pub fn gravity(&self) -> Vec3 {
        self.gravity
    }

    pub fn physics_settings(&self) -> &PhysicsSettings {
        &self.settings
    }

    pub fn physics_settings_mut(&mut self) -> &mut PhysicsSettings {
        &mut self.settings
    }

    pub fn set_contact_listener(&mut self, listener: Arc<dyn ContactListener>) {
        self.contact_listener = Some(listener);
    }

    pub fn set_body_activation_listener(&mut self, listener: Arc<dyn BodyActivationListener>) {
        self.activation_listener = Some(listener);
    }

    pub fn add_step_listener(&mut self, listener: Arc<dyn StepListener>) {
        self.step_listeners.push(listener);
    }

    pub fn remove_step_listeners(&mut self) {
        self.step_listeners.clear();
    }

    pub fn num_bodies(&self) -> usize {
        self.store.len()
    }

    pub fn num_active_bodies(&self) -> usize {
        self.store.active_bodies().len()
    }

    pub fn profile(&self) -> &StepProfile {
        &self.profile
    }

    /// Access to bodies for creation, removal, and state changes.
    pub fn body_interface(&mut self) -> BodyInterface<'_> {
        BodyInterface { system: self }
    }

    /// Locked read access to a body (validates the generation tag).
    pub fn read_body(&self, id: BodyId) -> Option<BodyLockRead<'_>> {
        self.locks.lock_read(&self.store, id)
    }

    /// Locked write access to a body.
    pub fn write_body(&self, id: BodyId) -> Option<BodyLockWrite<'_>> {
        debug_assert!(
            !self.store.is_step_in_progress(),
            "application-side body writes are not allowed during a step"
        );
        self.locks.lock_write(&self.store, id)
    }

    /// World-space queries against the current simulation state.
    pub fn narrow_phase_query(&self) -> NarrowPhaseQuery<'_> {
        NarrowPhaseQuery::new(
            &self.store,
            &self.broadphase,
            self.bp_filter.as_ref(),
            self.object_filter.as_ref(),
        )
    }

    pub fn add_constraint(&mut self, constraint: Constraint) -> ConstraintHandle {
        debug_assert!(!self.store.is_step_in_progress());
        let (body_a, body_b) = constraint.bodies();
        debug_assert!(self.store.is_valid(body_a) && self.store.is_valid(body_b));
        // A new constraint wakes both of its bodies.
        self.activate_body_internal(body_a);
        self.activate_body_internal(body_b);
        self.joints.insert(JointCell::new(constraint))
    }

    pub fn remove_constraint(&mut self, handle: ConstraintHandle) -> Option<Constraint> {
        debug_assert!(!self.store.is_step_in_progress());
        self.joints.remove(handle).map(JointCell::into_inner)
    }

    /// Forces a full synchronous rebuild of every broadphase tree. Useful
    /// after inserting a large batch of bodies.
    pub fn optimize_broad_phase(&mut self) {
        self.broadphase.optimize();
    }

    pub(crate) fn activate_body_internal(&mut self, id: BodyId) {
        let is_dynamic_or_kinematic = self.store.get(id).map(|b| !b.is_static()).unwrap_or(false);
        if is_dynamic_or_kinematic && self.store.activate_body(id) {
            if let Some(listener) = &self.activation_listener {
                let user_data = self.store.get(id).map(|b| b.user_data).unwrap_or(0);
                listener.on_body_activated(id, user_data);
            }
        }
    }

    pub(crate) fn deactivate_body_internal(&mut self, id: BodyId) {
        if self.store.deactivate_body(id) {
            if let Some(listener) = &self.activation_listener {
                let user_data = self.store.get(id).map(|b| b.user_data).unwrap_or(0);
                listener.on_body_deactivated(id, user_data);
            }
        }
    }

    /// Serializes every physics-visible quantity in a canonical order, or
    /// validates/restores, depending on the recorder's mode.
    pub fn save_state(&mut self, recorder: &mut StateRecorder) {
        self.sync_state(recorder);
    }

    /// Restores state captured by [`Self::save_state`]. The body and
    /// constraint sets must match the ones present at capture time.
    pub fn restore_state(&mut self, recorder: &mut StateRecorder) {
        debug_assert!(recorder.is_restoring());
        self.sync_state(recorder);
    }

    fn sync_state(&mut self, recorder: &mut StateRecorder) {
        recorder.sync_vec3(&mut self.gravity);
        recorder.sync_f32(&mut self.previous_sub_step_dt);

        // Bodies in id order.
        let ids = self.store.body_ids();
        let mut count = ids.len() as u32;
        recorder.sync_u32(&mut count);
        assert_eq!(count as usize, ids.len(), "state stream does not match the body set");
        let mut bounds_updates = Vec::new();
        for id in ids {
            let was_active = self.store.get(id).map(|b| b.is_active()).unwrap_or(false);
            let mut is_active = was_active;
            {
                let Some(body) = self.store.get_mut(id) else { continue };
                let mut raw = body.id().raw();
                recorder.sync_u32(&mut raw);
                debug_assert_eq!(raw, body.id().raw(), "state stream body order mismatch");
                recorder.sync_vec3(&mut body.position);
                recorder.sync_quat(&mut body.rotation);
                recorder.sync_bool(&mut is_active);
                if let Some(motion) = body.motion_mut() {
                    recorder.sync_vec3(&mut motion.linear_velocity);
                    recorder.sync_vec3(&mut motion.angular_velocity);
                    recorder.sync_f32(&mut motion.sleep_timer);
                }
                if recorder.is_restoring() {
                    body.update_world_bounds();
                    if body.in_broad_phase {
                        bounds_updates.push((id, body.world_bounds));
                    }
                }
            }
            if recorder.is_restoring() && is_active != was_active {
                if is_active {
                    self.activate_body_internal(id);
                } else {
                    self.deactivate_body_internal(id);
                }
            }
        }
        // The trees only ever widen, so restored poses must be folded in for
        // the pair finder to stay conservative.
        self.broadphase.notify_bounds_changed(&bounds_updates);

        // Constraint warm-start state in slot order.
        let handles: Vec<ConstraintHandle> = self.joints.iter().map(|(id, _)| id).collect();
        for handle in handles {
            if let Some(cell) = self.joints.get(handle) {
                // SAFETY: exclusive access through &mut self.
                let constraint = unsafe { cell.get_mut() };
                constraint.sync_state(recorder);
            }
        }

        // Contact cache (manifolds + warm-start impulses).
        self.cache.sync_state(recorder);
    }
}

/// Application-facing body operations.
pub struct BodyInterface<'a> {
    system: &'a mut PhysicsSystem,
}

impl<'a> BodyInterface<'a> {
    /// Creates a body without adding it to the broadphase. Returns `None`
    /// when the body capacity is exhausted.
    pub fn create_body(&mut self, settings: &BodyCreationSettings) -> Option<BodyId> {
        self.system.store.create_body(settings)
    }

    /// Adds a body to the broadphase and activates it (unless static).
    pub fn add_body(&mut self, id: BodyId) {
        self.add_bodies(&[id]);
    }

    /// Batched add: prepares the subtree once and attaches it atomically.
    pub fn add_bodies(&mut self, ids: &[BodyId]) {
        let system = &mut *self.system;
        let state = system
            .broadphase
            .add_bodies_prepare(&system.store, system.layer_interface.as_ref(), ids);
        let added = system.broadphase.add_bodies_finalize(state);
        for id in added {
            let layer = system.store.get(id).map(|b| b.object_layer);
            if let Some(body) = system.store.get_mut(id) {
                body.in_broad_phase = true;
                if let Some(layer) = layer {
                    body.broad_phase_layer = system.layer_interface.broad_phase_layer(layer);
                }
            }
            system.activate_body_internal(id);
        }
    }

    /// Removes a body from the broadphase (it stays in the body store).
    pub fn remove_body(&mut self, id: BodyId) {
        self.system.deactivate_body_internal(id);
        if self.system.store.get(id).map(|b| b.in_broad_phase).unwrap_or(false) {
            self.system.broadphase.remove_bodies(&[id]);
            if let Some(body) = self.system.store.get_mut(id) {
                body.in_broad_phase = false;
            }
        }
    }

    /// Destroys a body. It must have been removed from the broadphase first.
    pub fn destroy_body(&mut self, id: BodyId) {
        self.system.store.destroy_body(id);
    }

    pub fn is_active(&self, id: BodyId) -> bool {
        self.system.store.get(id).map(|b| b.is_active()).unwrap_or(false)
    }

    pub fn activate_body(&mut self, id: BodyId) {
        self.system.activate_body_internal(id);
    }

    pub fn deactivate_body(&mut self, id: BodyId) {
        self.system.deactivate_body_internal(id);
    }

    pub fn set_position_and_rotation(&mut self, id: BodyId, position: Vec3, rotation: Quat) {
        let mut bounds_update = None;
        if let Some(body) = self.system.store.get_mut(id) {
            body.position = position;
            body.rotation = rotation.normalize();
            body.update_world_bounds();
            if body.in_broad_phase {
                bounds_update = Some(body.world_bounds);
            }
        }
        if let Some(bounds) = bounds_update {
            self.system.broadphase.notify_bounds_changed(&[(id, bounds)]);
        }
        self.system.activate_body_internal(id);
    }

    pub fn position(&self, id: BodyId) -> Option<Vec3> {
        self.system.store.get(id).map(|b| b.position)
    }

    pub fn rotation(&self, id: BodyId) -> Option<Quat> {
        self.system.store.get(id).map(|b| b.rotation)
    }

    pub fn center_of_mass_position(&self, id: BodyId) -> Option<Vec3> {
        // Body positions are center-of-mass positions.
        self.position(id)
    }

    pub fn linear_velocity(&self, id: BodyId) -> Option<Vec3> {
        self.system.store.get(id).map(|b| b.linear_velocity())
    }

    pub fn angular_velocity(&self, id: BodyId) -> Option<Vec3> {
        self.system.store.get(id).map(|b| b.angular_velocity())
    }

    pub fn set_linear_velocity(&mut self, id: BodyId, velocity: Vec3) {
        if let Some(body) = self.system.store.get_mut(id) {
            body.set_linear_velocity(velocity);
        }
        self.system.activate_body_internal(id);
    }

    pub fn set_angular_velocity(&mut self, id: BodyId, velocity: Vec3) {
        if let Some(body) = self.system.store.get_mut(id) {
            body.set_angular_velocity(velocity);
        }
        self.system.activate_body_internal(id);
    }

    pub fn add_force(&mut self, id: BodyId, force: Vec3) {
        if let Some(body) = self.system.store.get_mut(id) {
            body.add_force(force);
        }
        self.system.activate_body_internal(id);
    }

    pub fn add_torque(&mut self, id: BodyId, torque: Vec3) {
        if let Some(body) = self.system.store.get_mut(id) {
            body.add_torque(torque);
        }
        self.system.activate_body_internal(id);
    }

    pub fn add_impulse(&mut self, id: BodyId, impulse: Vec3) {
        if let Some(body) = self.system.store.get_mut(id) {
            body.add_impulse(impulse);
        }
        self.system.activate_body_internal(id);
    }

    pub fn add_impulse_at(&mut self, id: BodyId, impulse: Vec3, point: Vec3) {
        if let Some(body) = self.system.store.get_mut(id) {
            body.add_impulse_at(impulse, point);
        }
        self.system.activate_body_internal(id);
    }

    pub fn add_angular_impulse(&mut self, id: BodyId, impulse: Vec3) {
        if let Some(body) = self.system.store.get_mut(id) {
            body.add_angular_impulse(impulse);
        }
        self.system.activate_body_internal(id);
    }

    /// Drives a kinematic body so it reaches the target pose after `dt`.
    pub fn move_kinematic(&mut self, id: BodyId, target_position: Vec3, target_rotation: Quat, dt: f32) {
        if let Some(body) = self.system.store.get_mut(id) {
            body.move_kinematic(target_position, target_rotation, dt);
        }
        self.system.activate_body_internal(id);
    }

    pub fn user_data(&self, id: BodyId) -> Option<u64> {
        self.system.store.get(id).map(|b| b.user_data)
    }

    /// Immutable snapshot access without locking. Only safe to use while no
    /// step is in progress.
    pub fn body(&self, id: BodyId) -> Option<&Body> {
        self.system.store.get(id)
    }
}
