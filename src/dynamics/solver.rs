//! Per-island sequential-impulse solving.
//!
//! Bodies of one island are gathered into a dense [`SolverBody`] array; all
//! constraints of the island reference bodies by local index. Velocity and
//! position passes run single-threaded per island, so islands can be solved
//! concurrently without sharing mutable state.

use std::cell::UnsafeCell;

use glam::Quat;

use crate::config::PhysicsSettings;
use crate::core::body::BodyId;
use crate::core::body_store::BodyStore;
use crate::core::types::Aabb;
use crate::dynamics::contact_constraints::ContactConstraint;
use crate::dynamics::joints::Constraint;
use crate::dynamics::solver_parts::SolverBody;
use crate::utils::allocator::{Arena, ArenaId};

/// Shared-access cell for a joint. Each joint belongs to exactly one island
/// per step, so islands solved in parallel never touch the same cell.
pub struct JointCell(UnsafeCell<Constraint>);

// SAFETY: see above; the island partition makes accesses disjoint, and
// structural changes (add/remove constraint) are rejected during a step.
unsafe impl Sync for JointCell {}

impl JointCell {
    pub fn new(constraint: Constraint) -> Self {
        Self(UnsafeCell::new(constraint))
    }

    pub fn get(&self) -> &Constraint {
        // SAFETY: shared read outside the solve phase.
        unsafe { &*self.0.get() }
    }

    pub fn into_inner(self) -> Constraint {
        self.0.into_inner()
    }

    /// # Safety
    /// Only one island may hold this reference at a time.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn get_mut(&self) -> &mut Constraint {
        &mut *self.0.get()
    }
}

/// A joint scheduled into an island: arena slot plus island-local body indices.
#[derive(Debug, Clone, Copy)]
pub struct IslandJoint {
    pub id: ArenaId,
    pub body_a: usize,
    pub body_b: usize,
}

/// Everything one island needs to solve, gathered from the body store.
pub struct PreparedIsland {
    pub body_ids: Vec<BodyId>,
    pub bodies: Vec<SolverBody>,
    /// Which solver bodies write their state back (dynamic bodies only).
    pub write_back: Vec<bool>,
    pub contacts: Vec<ContactConstraint>,
    pub joints: Vec<IslandJoint>,
}

impl PreparedIsland {
    pub fn gather(store: &BodyStore, body_ids: Vec<BodyId>) -> Self {
        let mut bodies = Vec::with_capacity(body_ids.len());
        let mut write_back = Vec::with_capacity(body_ids.len());
        for id in &body_ids {
            let body = store.get(*id);
            match body {
                Some(body) => {
                    let motion = body.motion();
                    bodies.push(SolverBody {
                        position: body.position,
                        rotation: body.rotation,
                        linear_velocity: motion.map_or(glam::Vec3::ZERO, |m| m.linear_velocity),
                        angular_velocity: motion.map_or(glam::Vec3::ZERO, |m| m.angular_velocity),
                        inv_mass: motion.map_or(0.0, |m| m.inv_mass),
                        inv_inertia: body.inv_inertia_world(),
                    });
                    write_back.push(body.is_dynamic());
                }
                None => {
                    bodies.push(SolverBody {
                        position: glam::Vec3::ZERO,
                        rotation: Quat::IDENTITY,
                        linear_velocity: glam::Vec3::ZERO,
                        angular_velocity: glam::Vec3::ZERO,
                        inv_mass: 0.0,
                        inv_inertia: glam::Mat3::ZERO,
                    });
                    write_back.push(false);
                }
            }
        }
        Self {
            body_ids,
            bodies,
            write_back,
            contacts: Vec::new(),
            joints: Vec::new(),
        }
    }

    /// Refreshes solver poses from the store (positions changed by
    /// integration or CCD between the velocity and position passes).
    pub fn refresh_poses(&mut self, store: &BodyStore) {
        for (index, id) in self.body_ids.iter().enumerate() {
            if let Some(body) = store.get(*id) {
                self.bodies[index].position = body.position;
                self.bodies[index].rotation = body.rotation;
            }
        }
    }

    /// Refreshes poses and velocities (used at the start of every sub-step
    /// after the first; integration and CCD changed both).
    pub fn refresh_from_store(&mut self, store: &BodyStore) {
        for (index, id) in self.body_ids.iter().enumerate() {
            if let Some(body) = store.get(*id) {
                self.bodies[index].position = body.position;
                self.bodies[index].rotation = body.rotation;
                self.bodies[index].inv_inertia = body.inv_inertia_world();
                if let Some(motion) = body.motion() {
                    self.bodies[index].linear_velocity = motion.linear_velocity;
                    self.bodies[index].angular_velocity = motion.angular_velocity;
                }
            }
        }
    }

    pub fn scatter_velocities(&self, store: &BodyStore) {
        for ((id, solver_body), write) in self.body_ids.iter().zip(&self.bodies).zip(&self.write_back) {
            if !write {
                continue;
            }
            // SAFETY: islands are disjoint; only this island writes the body.
            if let Some(body) = unsafe { store.get_mut_unchecked(*id) } {
                if let Some(motion) = body.motion_mut() {
                    motion.linear_velocity = solver_body.linear_velocity;
                    motion.angular_velocity = solver_body.angular_velocity;
                }
            }
        }
    }

    /// Writes corrected poses back and returns the new bounds for the
    /// broadphase notification batch.
    pub fn scatter_positions(&self, store: &BodyStore) -> Vec<(BodyId, Aabb)> {
        let mut updates = Vec::new();
        for ((id, solver_body), write) in self.body_ids.iter().zip(&self.bodies).zip(&self.write_back) {
            if !write {
                continue;
            }
            // SAFETY: as in scatter_velocities.
            if let Some(body) = unsafe { store.get_mut_unchecked(*id) } {
                if body.position != solver_body.position || body.rotation != solver_body.rotation {
                    body.position = solver_body.position;
                    body.rotation = solver_body.rotation;
                    body.update_world_bounds();
                    updates.push((*id, body.world_bounds));
                }
            }
        }
        updates
    }

    /// Warm start plus the velocity iterations, with early-out once an
    /// entire pass changes nothing significantly.
    ///
    /// # Safety contract
    /// `joint_arena` cells of this island must not be touched by any other
    /// thread while this runs.
    pub fn solve_velocity(
        &mut self,
        settings: &PhysicsSettings,
        joint_arena: &Arena<JointCell>,
        dt: f32,
        warm_start_ratio: f32,
    ) {
        let ratio = if settings.constraint_warm_start { warm_start_ratio } else { 0.0 };
        for contact in &mut self.contacts {
            contact.warm_start(&mut self.bodies, ratio);
        }
        for joint in &self.joints {
            if let Some(cell) = joint_arena.get(joint.id) {
                // SAFETY: this island owns the joint for the step.
                let constraint = unsafe { cell.get_mut() };
                constraint.setup(&mut self.bodies, joint.body_a, joint.body_b);
                constraint.warm_start(&mut self.bodies, joint.body_a, joint.body_b, ratio);
            }
        }

        for _ in 0..settings.num_velocity_steps {
            let mut changed = false;
            for contact in &mut self.contacts {
                changed |= contact.solve_velocity(&mut self.bodies);
            }
            for joint in &self.joints {
                if let Some(cell) = joint_arena.get(joint.id) {
                    // SAFETY: as above.
                    let constraint = unsafe { cell.get_mut() };
                    changed |= constraint.solve_velocity(&mut self.bodies, joint.body_a, joint.body_b, dt);
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// The position (pseudo-Baumgarte) iterations.
    pub fn solve_position(&mut self, settings: &PhysicsSettings, joint_arena: &Arena<JointCell>) {
        for _ in 0..settings.num_position_steps {
            for contact in &mut self.contacts {
                contact.solve_position(&mut self.bodies, settings);
            }
            for joint in &self.joints {
                if let Some(cell) = joint_arena.get(joint.id) {
                    // SAFETY: as in solve_velocity.
                    let constraint = unsafe { cell.get_mut() };
                    constraint.solve_position(&mut self.bodies, joint.body_a, joint.body_b, settings.baumgarte);
                }
            }
        }
    }

    /// Accumulated contact impulses, keyed for the write cache.
    pub fn contact_lambdas(&self) -> impl Iterator<Item = (crate::collision::cache::ManifoldKey, Vec<(f32, [f32; 2])>)> + '_ {
        self.contacts.iter().map(|c| (c.key, c.lambdas()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::body::{BodyCreationSettings, MotionType};
    use crate::core::layers::ObjectLayer;
    use crate::shapes::Shape;
    use glam::Vec3;

    #[test]
    fn gather_and_scatter_round_trip_velocities() {
        let mut store = BodyStore::new(8);
        let settings = BodyCreationSettings::new(
            Shape::sphere(0.5),
            Vec3::ZERO,
            Quat::IDENTITY,
            MotionType::Dynamic,
            ObjectLayer(0),
        )
        .with_velocity(Vec3::X, Vec3::ZERO);
        let id = store.create_body(&settings).unwrap();

        let mut island = PreparedIsland::gather(&store, vec![id]);
        assert_eq!(island.bodies.len(), 1);
        assert_eq!(island.bodies[0].linear_velocity, Vec3::X);

        island.bodies[0].linear_velocity = Vec3::Y * 5.0;
        island.scatter_velocities(&store);
        assert_eq!(store.get(id).unwrap().linear_velocity(), Vec3::Y * 5.0);
    }

    #[test]
    fn static_bodies_never_write_back() {
        let mut store = BodyStore::new(8);
        let settings = BodyCreationSettings::new(
            Shape::cuboid(Vec3::ONE),
            Vec3::ZERO,
            Quat::IDENTITY,
            MotionType::Static,
            ObjectLayer(0),
        );
        let id = store.create_body(&settings).unwrap();

        let mut island = PreparedIsland::gather(&store, vec![id]);
        island.bodies[0].position = Vec3::splat(9.0);
        let updates = island.scatter_positions(&store);
        assert!(updates.is_empty());
        assert_eq!(store.get(id).unwrap().position, Vec3::ZERO);
    }
}
