//! The update pipeline: builds the per-step job graph and implements every
//! job against the subsystems.
//!
//! One `PhysicsSystem::update` call produces `collision_steps ×
//! integration_sub_steps` sub-steps. Each collision step constructs an
//! explicit job DAG (see `jobs`) whose edges encode the required
//! happens-before relationships: all narrowphase work completes before any
//! island solves, the broadphase swap completes before integration, and the
//! sub-step chain runs velocity-solve, integrate, CCD, then position-solve.

pub mod jobs;

use std::time::Instant;

use log::warn;

use crate::broadphase::BodyPair;
use crate::collision::cache::WarmManifold;
use crate::collision::ccd::{self, CcdBody};
use crate::collision::narrowphase;
use crate::core::body::BodyId;
use crate::core::body_store::BodyAccess;
use crate::core::types::Aabb;
use crate::dynamics::contact_constraints::ContactConstraint;
use crate::dynamics::integrator::{self, IntegrateOutcome};
use crate::dynamics::solver::{IslandJoint, PreparedIsland};
use crate::system::PhysicsSystem;
use crate::utils::allocator::ArenaId;
use jobs::{JobGraph, StepJobKind};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Work batch sizes. Fixed so that the work partition (and therefore every
/// result order) is independent of the worker count.
const PAIR_BATCH: usize = 64;
const BODY_BATCH: usize = 64;

/// Everything a collision step accumulates while its jobs run.
struct StepContext {
    dt_step: f32,
    dt_sub: f32,
    num_sub_steps: u32,
    is_last_collision_step: bool,
    /// Warm-start ratio for the very first sub-step of the update call;
    /// later sub-steps use 1.0 (their dt equals the previous one's).
    first_warm_start_ratio: f32,
    is_first_sub_step_of_update: bool,

    /// Active bodies as of gravity application (pre-narrowphase).
    active_snapshot: Vec<BodyId>,
    /// Active bodies as of island building (includes bodies woken by contacts).
    solver_active: Vec<BodyId>,
    pairs: Vec<BodyPair>,
    warm_manifolds: Vec<WarmManifold>,
    active_constraints: Vec<ArenaId>,
    islands: Vec<PreparedIsland>,
    broadphase_update: Option<(usize, crate::broadphase::UpdateState)>,
    ccd_records: Vec<CcdBody>,
    active_to_ccd: Vec<i32>,
    bodies_to_sleep: Vec<BodyId>,
}

impl PhysicsSystem {
    /// Advances the simulation by `delta_time`, split into
    /// `collision_steps × integration_sub_steps` fixed sub-steps.
    pub fn update(&mut self, delta_time: f32, collision_steps: u32, integration_sub_steps: u32) {
        if delta_time <= 0.0 {
            return;
        }
        let collision_steps = collision_steps.max(1);
        let integration_sub_steps = integration_sub_steps.max(1);
        let dt_step = delta_time / collision_steps as f32;
        let dt_sub = dt_step / integration_sub_steps as f32;

        let start = Instant::now();
        self.profile.reset();

        self.store.begin_step();
        self.broadphase.lock_modifications();

        let first_warm_start_ratio = if self.settings.constraint_warm_start && self.previous_sub_step_dt > 0.0 {
            dt_sub / self.previous_sub_step_dt
        } else {
            0.0
        };
        self.previous_sub_step_dt = dt_sub;

        for step in 0..collision_steps {
            let mut context = StepContext {
                dt_step,
                dt_sub,
                num_sub_steps: integration_sub_steps,
                is_last_collision_step: step == collision_steps - 1,
                first_warm_start_ratio,
                is_first_sub_step_of_update: step == 0,
                active_snapshot: Vec::new(),
                solver_active: Vec::new(),
                pairs: Vec::new(),
                warm_manifolds: Vec::new(),
                active_constraints: Vec::new(),
                islands: Vec::new(),
                broadphase_update: None,
                ccd_records: Vec::new(),
                active_to_ccd: Vec::new(),
                bodies_to_sleep: Vec::new(),
            };

            let graph = build_step_graph(integration_sub_steps);
            graph.run(|kind, sub_step| {
                self.store.grant_access(kind.body_access());
                self.dispatch_job(kind, sub_step, &mut context);
            });
            self.store.grant_access(BodyAccess::ALL);
        }

        self.broadphase.unlock_modifications();
        self.store.end_step();

        self.profile.body_count = self.store.len();
        self.profile.active_body_count = self.store.active_bodies().len();
        self.profile.total_step_time = start.elapsed();
    }

    fn dispatch_job(&mut self, kind: StepJobKind, sub_step: u32, context: &mut StepContext) {
        match kind {
            StepJobKind::StepListeners => self.job_step_listeners(context),
            StepJobKind::ApplyGravity => self.job_apply_gravity(context),
            StepJobKind::DetermineActiveConstraints => self.job_determine_active_constraints(context),
            StepJobKind::BroadPhasePrepare => self.job_broad_phase_prepare(context),
            StepJobKind::FindCollisions => self.job_find_collisions(context),
            StepJobKind::SetupVelocityConstraints => self.job_setup_velocity_constraints(context),
            StepJobKind::BuildIslands => self.job_build_islands(context),
            StepJobKind::FinalizeIslands => self.job_finalize_islands(context),
            StepJobKind::BodySetIslandIndex => self.job_body_set_island_index(context),
            StepJobKind::BroadPhaseFinalize => self.job_broad_phase_finalize(context),
            StepJobKind::ContactRemovedCallbacks => self.job_contact_removed_callbacks(context),
            StepJobKind::SolveVelocity => self.job_solve_velocity(context, sub_step),
            StepJobKind::Integrate => self.job_integrate(context, sub_step),
            StepJobKind::FindCcdContacts => self.job_find_ccd_contacts(context),
            StepJobKind::ResolveCcdContacts => self.job_resolve_ccd_contacts(context),
            StepJobKind::SolvePosition => self.job_solve_position(context, sub_step),
            StepJobKind::StartNextStep => self.job_start_next_step(context),
        }
    }

    fn job_step_listeners(&mut self, context: &mut StepContext) {
        for listener in &self.step_listeners {
            listener.on_step(context.dt_step);
        }
    }

    fn job_apply_gravity(&mut self, context: &mut StepContext) {
        context.active_snapshot = self.store.active_bodies().to_vec();
        integrator::apply_forces(&self.store, &context.active_snapshot, self.gravity, context.dt_step);
    }

    fn job_determine_active_constraints(&mut self, context: &mut StepContext) {
        context.active_constraints = self
            .joints
            .iter()
            .filter(|(_, cell)| {
                let (body_a, body_b) = cell.get().bodies();
                let active = |id: BodyId| self.store.get(id).map(|b| b.is_active()).unwrap_or(false);
                active(body_a) || active(body_b)
            })
            .map(|(id, _)| id)
            .collect();
    }

    fn job_broad_phase_prepare(&mut self, context: &mut StepContext) {
        let start = Instant::now();
        context.broadphase_update = Some(self.broadphase.update_prepare());
        self.profile.broad_phase_time += start.elapsed();
    }

    fn job_find_collisions(&mut self, context: &mut StepContext) {
        let start = Instant::now();
        self.cache.prepare();

        self.broadphase.find_colliding_pairs(
            &self.store,
            &context.active_snapshot,
            self.settings.speculative_contact_distance,
            self.bp_filter.as_ref(),
            self.object_filter.as_ref(),
            &mut context.pairs,
        );
        context.pairs.sort_unstable();
        context.pairs.dedup();
        self.profile.body_pair_count = context.pairs.len();
        self.profile.broad_phase_time += start.elapsed();

        let narrow_start = Instant::now();
        let settings = self.settings;
        let store = &self.store;
        let cache = &self.cache;
        let listener = self.contact_listener.as_deref();

        let process_batch = |batch: &[BodyPair]| -> Vec<WarmManifold> {
            let mut output = Vec::new();
            for pair in batch {
                let (Some(body_a), Some(body_b)) = (store.get(pair.a), store.get(pair.b)) else {
                    continue;
                };
                // At least one body must be dynamic for a contact response.
                if !body_a.is_dynamic() && !body_b.is_dynamic() {
                    continue;
                }
                let warmed = cache.process_pair(&settings, listener, body_a, body_b, || {
                    narrowphase::collide_body_pair(
                        &body_a.shape,
                        body_a.position,
                        body_a.rotation,
                        &body_b.shape,
                        body_b.position,
                        body_b.rotation,
                        &settings,
                    )
                });
                if !warmed.is_empty() {
                    // A contact with a sleeping body wakes it.
                    for id in [pair.a, pair.b] {
                        let body = if id == pair.a { &body_a } else { &body_b };
                        if body.is_dynamic() && !body.is_active() {
                            store.request_activation(id);
                        }
                    }
                }
                output.extend(warmed);
            }
            output
        };

        #[cfg(feature = "parallel")]
        let batches: Vec<Vec<WarmManifold>> =
            context.pairs.par_chunks(PAIR_BATCH).map(process_batch).collect();
        #[cfg(not(feature = "parallel"))]
        let batches: Vec<Vec<WarmManifold>> =
            context.pairs.chunks(PAIR_BATCH).map(process_batch).collect();

        context.warm_manifolds = batches.into_iter().flatten().collect();
        self.profile.contact_constraint_count = context.warm_manifolds.len();

        for id in self.store.drain_pending_activations() {
            if let Some(listener) = &self.activation_listener {
                let user_data = self.store.get(id).map(|b| b.user_data).unwrap_or(0);
                listener.on_body_activated(id, user_data);
            }
        }
        self.profile.narrow_phase_time += narrow_start.elapsed();
    }

    fn job_setup_velocity_constraints(&mut self, context: &mut StepContext) {
        // Deterministic constraint order regardless of the batch partition.
        context.warm_manifolds.sort_unstable_by_key(|m| m.key);
    }

    fn job_build_islands(&mut self, context: &mut StepContext) {
        context.solver_active = self.store.active_bodies().to_vec();
        self.islands.prepare(context.solver_active.len());

        let active_index = |id: BodyId| -> Option<u32> {
            self.store.get(id).and_then(|b| b.motion()).and_then(|m| {
                (m.active_index != crate::core::body::INACTIVE_INDEX).then_some(m.active_index)
            })
        };

        for (index, manifold) in context.warm_manifolds.iter().enumerate() {
            self.islands.link_contact(
                index as u32,
                active_index(manifold.key.pair.a),
                active_index(manifold.key.pair.b),
            );
        }
        for (index, joint_id) in context.active_constraints.iter().enumerate() {
            if let Some(cell) = self.joints.get(*joint_id) {
                let (body_a, body_b) = cell.get().bodies();
                self.islands
                    .link_constraint(index as u32, active_index(body_a), active_index(body_b));
            }
        }
    }

    fn job_finalize_islands(&mut self, context: &mut StepContext) {
        self.islands.finalize(&context.solver_active);
        self.profile.island_count = self.islands.islands().len();

        // Materialize per-island solver data.
        let mut prepared = Vec::with_capacity(self.islands.islands().len());
        for island in self.islands.islands() {
            if self.islands.is_singleton(island) {
                continue;
            }

            // Island bodies plus the static/kinematic bodies its constraints
            // reference, deduplicated with stable local indices.
            let mut body_ids: Vec<BodyId> = self.islands.island_bodies(island).to_vec();
            let mut local_index = |ids: &mut Vec<BodyId>, id: BodyId| -> usize {
                match ids.iter().position(|existing| *existing == id) {
                    Some(index) => index,
                    None => {
                        ids.push(id);
                        ids.len() - 1
                    }
                }
            };

            let mut contact_refs = Vec::new();
            for &manifold_index in self.islands.island_contacts(island) {
                let key = context.warm_manifolds[manifold_index as usize].key;
                let index_a = local_index(&mut body_ids, key.pair.a);
                let index_b = local_index(&mut body_ids, key.pair.b);
                contact_refs.push((manifold_index, index_a, index_b));
            }

            let mut joint_refs = Vec::new();
            for &constraint_slot in self.islands.island_constraints(island) {
                let joint_id = context.active_constraints[constraint_slot as usize];
                if let Some(cell) = self.joints.get(joint_id) {
                    let (body_a, body_b) = cell.get().bodies();
                    let index_a = local_index(&mut body_ids, body_a);
                    let index_b = local_index(&mut body_ids, body_b);
                    joint_refs.push(IslandJoint { id: joint_id, body_a: index_a, body_b: index_b });
                }
            }

            let mut island_data = PreparedIsland::gather(&self.store, body_ids);
            for (manifold_index, index_a, index_b) in contact_refs {
                let warm = &context.warm_manifolds[manifold_index as usize];
                if warm.settings.is_sensor {
                    continue;
                }
                island_data.contacts.push(ContactConstraint::setup(
                    &self.settings,
                    context.dt_sub,
                    &island_data.bodies,
                    index_a,
                    index_b,
                    warm,
                ));
            }
            island_data.joints = joint_refs;
            prepared.push(island_data);
        }
        context.islands = prepared;
    }

    fn job_body_set_island_index(&mut self, context: &mut StepContext) {
        for (active_index, id) in context.solver_active.iter().enumerate() {
            let island = self.islands.island_of_body(active_index as u32);
            if let Some(body) = self.store.get_mut(*id) {
                if let Some(motion) = body.motion_mut() {
                    motion.island_index = island;
                }
            }
        }
    }

    fn job_broad_phase_finalize(&mut self, context: &mut StepContext) {
        let start = Instant::now();
        if let Some(update) = context.broadphase_update.take() {
            self.broadphase.update_finalize(update);
        }
        self.profile.broad_phase_time += start.elapsed();
    }

    fn job_contact_removed_callbacks(&mut self, _context: &mut StepContext) {
        // The write cache is complete once narrowphase finished; swap the
        // caches and notify for every manifold that was not re-found.
        self.cache.finalize();
        self.cache.contact_removed_callbacks(self.contact_listener.as_deref());
    }

    fn job_solve_velocity(&mut self, context: &mut StepContext, sub_step: u32) {
        let start = Instant::now();
        let warm_start_ratio = if sub_step == 0 && context.is_first_sub_step_of_update {
            context.first_warm_start_ratio
        } else {
            1.0
        };
        let settings = self.settings;
        let dt_sub = context.dt_sub;
        let store = &self.store;
        let joints = &self.joints;
        let refresh = sub_step > 0;

        let solve = |island: &mut PreparedIsland| {
            if refresh {
                island.refresh_from_store(store);
            }
            island.solve_velocity(&settings, joints, dt_sub, warm_start_ratio);
            island.scatter_velocities(store);
        };

        #[cfg(feature = "parallel")]
        context.islands.par_iter_mut().for_each(solve);
        #[cfg(not(feature = "parallel"))]
        context.islands.iter_mut().for_each(solve);

        self.profile.solver_time += start.elapsed();
    }

    fn job_integrate(&mut self, context: &mut StepContext, _sub_step: u32) {
        let start = Instant::now();
        let settings = self.settings;
        let dt_sub = context.dt_sub;
        let store = &self.store;

        struct BatchOutput {
            bounds: Vec<(BodyId, Aabb)>,
            casts: Vec<CcdBody>,
        }

        let integrate_batch = |batch: &[BodyId]| -> BatchOutput {
            let mut output = BatchOutput { bounds: Vec::new(), casts: Vec::new() };
            for id in batch {
                // SAFETY: active ids are unique; batches are disjoint.
                let Some(body) = (unsafe { store.get_mut_unchecked(*id) }) else { continue };
                match integrator::integrate_position(&settings, body, dt_sub) {
                    IntegrateOutcome::Moved(id, bounds) => output.bounds.push((id, bounds)),
                    IntegrateOutcome::NeedsCast(id, delta, max_penetration) => {
                        output.casts.push(CcdBody::new(id, delta, max_penetration));
                    }
                    IntegrateOutcome::Rested(_) => {}
                }
                integrator::update_sleep_timer(&settings, body, dt_sub);
            }
            output
        };

        #[cfg(feature = "parallel")]
        let outputs: Vec<BatchOutput> =
            context.solver_active.par_chunks(BODY_BATCH).map(integrate_batch).collect();
        #[cfg(not(feature = "parallel"))]
        let outputs: Vec<BatchOutput> =
            context.solver_active.chunks(BODY_BATCH).map(integrate_batch).collect();

        let mut bounds_updates = Vec::new();
        context.ccd_records.clear();
        for output in outputs {
            bounds_updates.extend(output.bounds);
            context.ccd_records.extend(output.casts);
        }
        self.broadphase.notify_bounds_changed(&bounds_updates);

        // Map active index -> CCD record for O(1) pair adoption lookups.
        context.active_to_ccd = vec![-1; context.solver_active.len()];
        for (record_index, record) in context.ccd_records.iter().enumerate() {
            if let Some(motion) = self.store.get(record.body_id).and_then(|b| b.motion()) {
                if (motion.active_index as usize) < context.active_to_ccd.len() {
                    context.active_to_ccd[motion.active_index as usize] = record_index as i32;
                }
            }
        }
        self.profile.ccd_body_count += context.ccd_records.len();
        self.profile.integrate_time += start.elapsed();
    }

    fn job_find_ccd_contacts(&mut self, context: &mut StepContext) {
        if context.ccd_records.is_empty() {
            return;
        }
        let start = Instant::now();
        ccd::find_ccd_contacts(
            &self.store,
            &self.broadphase,
            self.bp_filter.as_ref(),
            self.object_filter.as_ref(),
            self.contact_listener.as_deref(),
            &self.cache,
            &context.active_to_ccd,
            &mut context.ccd_records,
        );
        self.profile.ccd_time += start.elapsed();
    }

    fn job_resolve_ccd_contacts(&mut self, context: &mut StepContext) {
        if context.ccd_records.is_empty() {
            return;
        }
        let start = Instant::now();
        let woken = ccd::resolve_ccd_contacts(
            &self.settings,
            &self.store,
            &context.active_to_ccd,
            &mut context.ccd_records,
            context.dt_sub,
        );
        let mut bounds_updates = Vec::with_capacity(context.ccd_records.len());
        for record in &context.ccd_records {
            if let Some(body) = self.store.get(record.body_id) {
                bounds_updates.push((record.body_id, body.world_bounds));
            }
        }
        self.broadphase.notify_bounds_changed(&bounds_updates);
        for id in woken {
            self.activate_body_internal(id);
        }
        self.profile.ccd_time += start.elapsed();
    }

    fn job_solve_position(&mut self, context: &mut StepContext, sub_step: u32) {
        let start = Instant::now();
        let settings = self.settings;
        let store = &self.store;
        let joints = &self.joints;

        let solve = |island: &mut PreparedIsland| -> Vec<(BodyId, Aabb)> {
            island.refresh_poses(store);
            island.solve_position(&settings, joints);
            island.scatter_positions(store)
        };

        #[cfg(feature = "parallel")]
        let updates: Vec<Vec<(BodyId, Aabb)>> = context.islands.par_iter_mut().map(solve).collect();
        #[cfg(not(feature = "parallel"))]
        let updates: Vec<Vec<(BodyId, Aabb)>> = context.islands.iter_mut().map(solve).collect();

        let flattened: Vec<(BodyId, Aabb)> = updates.into_iter().flatten().collect();
        self.broadphase.notify_bounds_changed(&flattened);

        let is_last_sub_step = sub_step + 1 == context.num_sub_steps;
        if is_last_sub_step {
            // Converged impulses feed next step's warm start. The caches
            // already swapped, so this step's manifolds live in the read side.
            for island in &context.islands {
                for (key, lambdas) in island.contact_lambdas() {
                    self.cache.read_cache().store_lambdas(&key, &lambdas);
                }
            }

            // Sleep: an island goes down only when every body qualifies.
            if settings.allow_sleeping && context.is_last_collision_step {
                let islands = &self.islands;
                for island in islands.islands() {
                    let bodies = islands.island_bodies(island);
                    let all_sleepy = !bodies.is_empty()
                        && bodies.iter().all(|id| {
                            self.store
                                .get(*id)
                                .and_then(|b| b.motion())
                                .map(|m| m.allow_sleeping && m.sleep_timer >= settings.time_before_sleep)
                                .unwrap_or(false)
                        });
                    if all_sleepy {
                        context.bodies_to_sleep.extend_from_slice(bodies);
                    }
                }
            }
        }
        self.profile.solver_time += start.elapsed();
    }

    fn job_start_next_step(&mut self, context: &mut StepContext) {
        let bodies_to_sleep = std::mem::take(&mut context.bodies_to_sleep);
        for id in bodies_to_sleep {
            self.deactivate_body_internal(id);
        }
        if context.warm_manifolds.len() >= self.store.max_bodies() * 4 {
            warn!("contact volume is saturating the configured capacity");
        }
    }
}

/// Builds the job DAG of one collision step, mirroring the data-flow diagram
/// of the pipeline. Sub-step solver jobs are chained one after another.
fn build_step_graph(num_sub_steps: u32) -> JobGraph {
    let mut graph = JobGraph::new();

    let listeners = graph.add_job(StepJobKind::StepListeners, 0);
    let gravity = graph.add_job(StepJobKind::ApplyGravity, 0);
    let determine_active = graph.add_job(StepJobKind::DetermineActiveConstraints, 0);
    let broad_prepare = graph.add_job(StepJobKind::BroadPhasePrepare, 0);
    let find_collisions = graph.add_job(StepJobKind::FindCollisions, 0);
    let setup_velocity = graph.add_job(StepJobKind::SetupVelocityConstraints, 0);
    let build_islands = graph.add_job(StepJobKind::BuildIslands, 0);
    let finalize_islands = graph.add_job(StepJobKind::FinalizeIslands, 0);
    let body_island_index = graph.add_job(StepJobKind::BodySetIslandIndex, 0);
    let broad_finalize = graph.add_job(StepJobKind::BroadPhaseFinalize, 0);
    let contact_removed = graph.add_job(StepJobKind::ContactRemovedCallbacks, 0);
    let start_next = graph.add_job(StepJobKind::StartNextStep, 0);

    graph.add_edge(listeners, gravity);
    graph.add_edge(listeners, determine_active);
    graph.add_edge(gravity, find_collisions);
    graph.add_edge(determine_active, find_collisions);
    graph.add_edge(find_collisions, setup_velocity);
    graph.add_edge(find_collisions, build_islands);
    // Islands reference manifolds by index; the canonical sort comes first.
    graph.add_edge(setup_velocity, build_islands);
    graph.add_edge(determine_active, build_islands);
    graph.add_edge(build_islands, finalize_islands);
    graph.add_edge(setup_velocity, finalize_islands);
    graph.add_edge(finalize_islands, body_island_index);
    graph.add_edge(find_collisions, broad_finalize);
    graph.add_edge(broad_prepare, broad_finalize);
    graph.add_edge(finalize_islands, contact_removed);

    let mut previous = contact_removed;
    for sub_step in 0..num_sub_steps {
        let solve_velocity = graph.add_job(StepJobKind::SolveVelocity, sub_step);
        let integrate = graph.add_job(StepJobKind::Integrate, sub_step);
        let find_ccd = graph.add_job(StepJobKind::FindCcdContacts, sub_step);
        let resolve_ccd = graph.add_job(StepJobKind::ResolveCcdContacts, sub_step);
        let solve_position = graph.add_job(StepJobKind::SolvePosition, sub_step);

        if sub_step == 0 {
            graph.add_edge(finalize_islands, solve_velocity);
            graph.add_edge(body_island_index, solve_velocity);
            // Integration must see the finalized broadphase of this step.
            graph.add_edge(broad_finalize, integrate);
            graph.add_edge(contact_removed, solve_velocity);
        } else {
            graph.add_edge(previous, solve_velocity);
        }
        graph.add_edge(solve_velocity, integrate);
        graph.add_edge(integrate, find_ccd);
        graph.add_edge(find_ccd, resolve_ccd);
        graph.add_edge(resolve_ccd, solve_position);
        previous = solve_position;
    }
    graph.add_edge(previous, start_next);

    graph
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_graph_orders_narrowphase_before_solving() {
        let graph = build_step_graph(2);
        let mut order = Vec::new();
        graph.run(|kind, sub| order.push((kind, sub)));

        let position = |kind: StepJobKind, sub: u32| {
            order.iter().position(|entry| *entry == (kind, sub)).unwrap()
        };

        assert!(position(StepJobKind::FindCollisions, 0) < position(StepJobKind::SolveVelocity, 0));
        assert!(position(StepJobKind::FinalizeIslands, 0) < position(StepJobKind::SolveVelocity, 0));
        assert!(position(StepJobKind::BroadPhaseFinalize, 0) < position(StepJobKind::Integrate, 0));
        assert!(position(StepJobKind::SolveVelocity, 0) < position(StepJobKind::Integrate, 0));
        assert!(position(StepJobKind::Integrate, 0) < position(StepJobKind::FindCcdContacts, 0));
        assert!(position(StepJobKind::ResolveCcdContacts, 0) < position(StepJobKind::SolvePosition, 0));
        assert!(position(StepJobKind::SolvePosition, 0) < position(StepJobKind::SolveVelocity, 1));
        assert!(position(StepJobKind::SolvePosition, 1) < position(StepJobKind::StartNextStep, 0));
    }
}
