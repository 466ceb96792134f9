//! Broadphase: one loose quadtree per broadphase layer, plus the pair finder
//! that feeds the narrowphase.

pub mod quadtree;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use glam::Vec3;

use crate::core::body::BodyId;
use crate::core::body_store::BodyStore;
use crate::core::layers::{
    BroadPhaseLayerInterface, ObjectLayer, ObjectLayerPairFilter, ObjectVsBroadPhaseLayerFilter,
};
use crate::core::types::Aabb;
use quadtree::{QuadTree, INVALID_U32};

pub use quadtree::{AddState, BroadPhaseHit, UpdateState};

/// An unordered body pair, stored with the smaller raw id first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BodyPair {
    pub a: BodyId,
    pub b: BodyId,
}

impl BodyPair {
    pub fn new(a: BodyId, b: BodyId) -> Self {
        if a.raw() <= b.raw() {
            Self { a, b }
        } else {
            Self { a: b, b: a }
        }
    }
}

/// Pending batch-add state handed from `add_bodies_prepare` to `_finalize`.
pub struct BroadPhaseAddState {
    per_tree: Vec<(usize, quadtree::AddState)>,
    bodies: Vec<BodyId>,
}

pub struct BroadPhase {
    trees: Vec<QuadTree>,
    /// Which tree each body index currently lives in.
    tree_of_body: Box<[AtomicU32]>,
    /// Round-robin cursor for the background rebuild.
    next_rebuild: usize,
    /// Set for the duration of a step; application-side structural changes
    /// are refused while held.
    modifications_locked: AtomicBool,
}

impl BroadPhase {
    pub fn new(max_bodies: usize, layer_interface: &dyn BroadPhaseLayerInterface) -> Self {
        let num_layers = layer_interface.num_broad_phase_layers().max(1) as usize;
        let trees = (0..num_layers).map(|_| QuadTree::new(max_bodies)).collect();
        let tree_of_body = (0..max_bodies).map(|_| AtomicU32::new(INVALID_U32)).collect();
        Self {
            trees,
            tree_of_body,
            next_rebuild: 0,
            modifications_locked: AtomicBool::new(false),
        }
    }

    pub fn lock_modifications(&self) {
        self.modifications_locked.store(true, Ordering::Release);
    }

    pub fn unlock_modifications(&self) {
        self.modifications_locked.store(false, Ordering::Release);
    }

    fn assert_unlocked(&self) {
        debug_assert!(
            !self.modifications_locked.load(Ordering::Acquire),
            "broadphase add/remove is not allowed while a step is in progress"
        );
    }

    /// Groups bodies by broadphase layer and builds detached subtrees.
    /// May run concurrently with queries.
    pub fn add_bodies_prepare(
        &self,
        store: &BodyStore,
        layer_interface: &dyn BroadPhaseLayerInterface,
        ids: &[BodyId],
    ) -> BroadPhaseAddState {
        self.assert_unlocked();
        let mut grouped: Vec<Vec<(BodyId, ObjectLayer, Aabb)>> = vec![Vec::new(); self.trees.len()];
        for id in ids {
            let Some(body) = store.get(*id) else { continue };
            debug_assert!(!body.in_broad_phase, "body is already in the broadphase");
            let tree = layer_interface.broad_phase_layer(body.object_layer).0 as usize;
            let tree = tree.min(self.trees.len() - 1);
            grouped[tree].push((*id, body.object_layer, body.world_bounds));
        }

        let mut per_tree = Vec::new();
        for (tree_index, group) in grouped.iter().enumerate() {
            if group.is_empty() {
                continue;
            }
            per_tree.push((tree_index, self.trees[tree_index].add_bodies_prepare(group)));
            for (id, _, _) in group {
                self.tree_of_body[id.index()].store(tree_index as u32, Ordering::Release);
            }
        }
        BroadPhaseAddState { per_tree, bodies: ids.to_vec() }
    }

    /// Atomically attaches the prepared subtrees. Returns the ids that are now
    /// in the broadphase so the caller can flip their body flags.
    pub fn add_bodies_finalize(&self, state: BroadPhaseAddState) -> Vec<BodyId> {
        for (tree_index, add) in state.per_tree {
            self.trees[tree_index].add_bodies_finalize(add);
        }
        state.bodies
    }

    pub fn remove_bodies(&self, ids: &[BodyId]) {
        self.assert_unlocked();
        for id in ids {
            let tree = self.tree_of_body[id.index()].swap(INVALID_U32, Ordering::AcqRel);
            if tree != INVALID_U32 {
                self.trees[tree as usize].remove_bodies(std::slice::from_ref(id));
            }
        }
    }

    /// Widens stored bounds after bodies moved. Lock-free; safe during a step.
    pub fn notify_bounds_changed(&self, updates: &[(BodyId, Aabb)]) {
        for (id, bounds) in updates {
            let tree = self.tree_of_body[id.index()].load(Ordering::Acquire);
            if tree != INVALID_U32 {
                self.trees[tree as usize].notify_bounds_changed(std::slice::from_ref(&(*id, *bounds)));
            }
        }
    }

    /// Kicks the background rebuild of one tree (round-robin across layers).
    pub fn update_prepare(&mut self) -> (usize, quadtree::UpdateState) {
        let tree_index = self.next_rebuild % self.trees.len();
        self.next_rebuild = self.next_rebuild.wrapping_add(1);
        (tree_index, self.trees[tree_index].update_prepare())
    }

    pub fn update_finalize(&self, prepared: (usize, quadtree::UpdateState)) {
        self.trees[prepared.0].update_finalize(prepared.1);
    }

    /// Synchronously rebuilds every tree. Useful after bulk scene loading.
    pub fn optimize(&mut self) {
        for tree in &self.trees {
            let state = tree.update_prepare();
            tree.update_finalize(state);
            tree.discard_old_tree();
        }
    }

    fn body_id_of(&self, tree: &QuadTree, body_index: u32) -> Option<BodyId> {
        let raw = tree.tracking(body_index as usize).raw_id.load(Ordering::Acquire);
        (raw != INVALID_U32).then(|| BodyId::from_raw(raw))
    }

    /// All bodies whose stored bounds overlap `bounds`, across the trees the
    /// filter admits. The callback returns false to early-out.
    pub fn collide_aabb<F>(
        &self,
        bounds: &Aabb,
        query_layer: ObjectLayer,
        bp_filter: &dyn ObjectVsBroadPhaseLayerFilter,
        object_filter: &dyn ObjectLayerPairFilter,
        mut hit: F,
    ) where
        F: FnMut(BroadPhaseHit) -> bool,
    {
        for (tree_index, tree) in self.trees.iter().enumerate() {
            if !bp_filter.should_collide(query_layer, crate::core::layers::BroadPhaseLayer(tree_index as u8)) {
                continue;
            }
            let mut keep_going = true;
            tree.collide_aabb(bounds, |body_index, stored| {
                let layer = ObjectLayer(tree.tracking(body_index as usize).object_layer.load(Ordering::Relaxed) as u16);
                if !object_filter.should_collide(query_layer, layer) {
                    return true;
                }
                let Some(body_id) = self.body_id_of(tree, body_index) else { return true };
                keep_going = hit(BroadPhaseHit { body_id, object_layer: layer, bounds: *stored, fraction: 0.0 });
                keep_going
            });
            if !keep_going {
                return;
            }
        }
    }

    /// Broadphase ray cast, visiting candidates approximately nearest-first.
    pub fn cast_ray<F>(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        query_layer: ObjectLayer,
        bp_filter: &dyn ObjectVsBroadPhaseLayerFilter,
        object_filter: &dyn ObjectLayerPairFilter,
        mut hit: F,
    ) where
        F: FnMut(BroadPhaseHit) -> bool,
    {
        for (tree_index, tree) in self.trees.iter().enumerate() {
            if !bp_filter.should_collide(query_layer, crate::core::layers::BroadPhaseLayer(tree_index as u8)) {
                continue;
            }
            let mut keep_going = true;
            tree.cast_ray(origin, direction, max_distance, |body_index, fraction| {
                let layer = ObjectLayer(tree.tracking(body_index as usize).object_layer.load(Ordering::Relaxed) as u16);
                if !object_filter.should_collide(query_layer, layer) {
                    return true;
                }
                let Some(body_id) = self.body_id_of(tree, body_index) else { return true };
                keep_going = hit(BroadPhaseHit { body_id, object_layer: layer, bounds: Aabb::INVALID, fraction });
                keep_going
            });
            if !keep_going {
                return;
            }
        }
    }

    /// Bodies whose stored bounds are entered by a box swept along `delta`.
    pub fn cast_aabb<F>(
        &self,
        bounds: &Aabb,
        delta: Vec3,
        query_layer: ObjectLayer,
        bp_filter: &dyn ObjectVsBroadPhaseLayerFilter,
        object_filter: &dyn ObjectLayerPairFilter,
        mut hit: F,
    ) where
        F: FnMut(BroadPhaseHit) -> bool,
    {
        for (tree_index, tree) in self.trees.iter().enumerate() {
            if !bp_filter.should_collide(query_layer, crate::core::layers::BroadPhaseLayer(tree_index as u8)) {
                continue;
            }
            let mut keep_going = true;
            tree.cast_aabb(bounds, delta, |body_index, stored| {
                let layer = ObjectLayer(tree.tracking(body_index as usize).object_layer.load(Ordering::Relaxed) as u16);
                if !object_filter.should_collide(query_layer, layer) {
                    return true;
                }
                let Some(body_id) = self.body_id_of(tree, body_index) else { return true };
                let fraction = sweep_aabb_entry(bounds, delta, stored).unwrap_or(0.0);
                keep_going = hit(BroadPhaseHit { body_id, object_layer: layer, bounds: *stored, fraction });
                keep_going
            });
            if !keep_going {
                return;
            }
        }
    }

    /// Bodies whose stored bounds contain the point.
    pub fn collide_point<F>(
        &self,
        point: Vec3,
        query_layer: ObjectLayer,
        bp_filter: &dyn ObjectVsBroadPhaseLayerFilter,
        object_filter: &dyn ObjectLayerPairFilter,
        hit: F,
    ) where
        F: FnMut(BroadPhaseHit) -> bool,
    {
        self.collide_aabb(&Aabb::new(point, point), query_layer, bp_filter, object_filter, hit)
    }

    /// Bodies whose stored bounds overlap a sphere (box prefilter + distance check).
    pub fn collide_sphere<F>(
        &self,
        center: Vec3,
        radius: f32,
        query_layer: ObjectLayer,
        bp_filter: &dyn ObjectVsBroadPhaseLayerFilter,
        object_filter: &dyn ObjectLayerPairFilter,
        mut hit: F,
    ) where
        F: FnMut(BroadPhaseHit) -> bool,
    {
        let bounds = Aabb::from_center_extents(center, Vec3::splat(radius));
        self.collide_aabb(&bounds, query_layer, bp_filter, object_filter, |candidate| {
            let closest = center.clamp(candidate.bounds.min, candidate.bounds.max);
            if (closest - center).length_squared() > radius * radius {
                return true;
            }
            hit(candidate)
        });
    }

    /// Bodies whose stored bounds overlap an oriented box. The walker uses
    /// the enclosing AABB; candidates get an exact separating-axis check.
    #[allow(clippy::too_many_arguments)]
    pub fn collide_oriented_box<F>(
        &self,
        center: Vec3,
        half_extents: Vec3,
        rotation: glam::Quat,
        query_layer: ObjectLayer,
        bp_filter: &dyn ObjectVsBroadPhaseLayerFilter,
        object_filter: &dyn ObjectLayerPairFilter,
        mut hit: F,
    ) where
        F: FnMut(BroadPhaseHit) -> bool,
    {
        let local = Aabb::from_center_extents(Vec3::ZERO, half_extents);
        let enclosing = local.transformed(rotation, center);
        self.collide_aabb(&enclosing, query_layer, bp_filter, object_filter, |candidate| {
            if !oriented_box_overlaps_aabb(center, half_extents, rotation, &candidate.bounds) {
                return true;
            }
            hit(candidate)
        });
    }

    /// Finds all potentially colliding pairs among the active bodies. Each
    /// unordered pair is reported exactly once; pairs of two active bodies
    /// are reported by the body with the smaller raw id.
    pub fn find_colliding_pairs(
        &self,
        store: &BodyStore,
        active: &[BodyId],
        speculative_contact_distance: f32,
        bp_filter: &dyn ObjectVsBroadPhaseLayerFilter,
        object_filter: &dyn ObjectLayerPairFilter,
        out: &mut Vec<BodyPair>,
    ) {
        let margin = Vec3::splat(speculative_contact_distance);
        for id in active {
            let Some(body) = store.get(*id) else { continue };
            if !body.in_broad_phase {
                continue;
            }
            let query_bounds = body.world_bounds.expanded(margin);
            let query_layer = body.object_layer;

            for (tree_index, tree) in self.trees.iter().enumerate() {
                if !bp_filter
                    .should_collide(query_layer, crate::core::layers::BroadPhaseLayer(tree_index as u8))
                {
                    continue;
                }
                tree.collide_aabb(&query_bounds, |other_index, _| {
                    let Some(other_id) = self.body_id_of(tree, other_index) else { return true };
                    if other_id == *id {
                        return true;
                    }
                    let layer = ObjectLayer(
                        tree.tracking(other_index as usize).object_layer.load(Ordering::Relaxed) as u16,
                    );
                    if !object_filter.should_collide(query_layer, layer) {
                        return true;
                    }
                    // Dedup: if the other body is active too it will (or did)
                    // run its own query; the smaller raw id owns the pair.
                    let other_active = store.get(other_id).map(|b| b.is_active()).unwrap_or(false);
                    if other_active && other_id.raw() < id.raw() {
                        return true;
                    }
                    out.push(BodyPair::new(*id, other_id));
                    true
                });
            }
        }
    }
}

/// First time of impact of a moving box against a static box, in [0, 1].
pub(crate) fn sweep_aabb_entry(moving: &Aabb, delta: Vec3, target: &Aabb) -> Option<f32> {
    let mut entry: f32 = 0.0;
    let mut exit: f32 = 1.0;
    for axis in 0..3 {
        let v = delta[axis];
        let min_gap = target.min[axis] - moving.max[axis];
        let max_gap = target.max[axis] - moving.min[axis];
        if v.abs() < 1.0e-12 {
            if min_gap > 0.0 || max_gap < 0.0 {
                return None;
            }
        } else {
            let t1 = min_gap / v;
            let t2 = max_gap / v;
            entry = entry.max(t1.min(t2));
            exit = exit.min(t1.max(t2));
        }
    }
    (entry <= exit).then_some(entry)
}

fn oriented_box_overlaps_aabb(center: Vec3, half_extents: Vec3, rotation: glam::Quat, aabb: &Aabb) -> bool {
    let axes = [rotation * Vec3::X, rotation * Vec3::Y, rotation * Vec3::Z];
    let aabb_half = aabb.extents();
    let offset = aabb.center() - center;

    let mut test_axes: Vec<Vec3> = vec![Vec3::X, Vec3::Y, Vec3::Z];
    test_axes.extend_from_slice(&axes);
    for a in [Vec3::X, Vec3::Y, Vec3::Z] {
        for b in &axes {
            let cross = a.cross(*b);
            if cross.length_squared() > 1.0e-6 {
                test_axes.push(cross.normalize());
            }
        }
    }

    for axis in test_axes {
        let obb_radius = half_extents.x * axes[0].dot(axis).abs()
            + half_extents.y * axes[1].dot(axis).abs()
            + half_extents.z * axes[2].dot(axis).abs();
        let aabb_radius = aabb_half.x * axis.x.abs() + aabb_half.y * axis.y.abs() + aabb_half.z * axis.z.abs();
        if offset.dot(axis).abs() > obb_radius + aabb_radius {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::body::{BodyCreationSettings, MotionType};
    use crate::core::layers::SingleBroadPhaseLayer;
    use crate::shapes::Shape;
    use glam::Quat;

    fn make_store(positions: &[Vec3]) -> (BodyStore, Vec<BodyId>) {
        let mut store = BodyStore::new(64);
        let ids = positions
            .iter()
            .map(|p| {
                let settings = BodyCreationSettings::new(
                    Shape::cuboid(Vec3::splat(0.5)),
                    *p,
                    Quat::IDENTITY,
                    MotionType::Dynamic,
                    ObjectLayer(0),
                );
                store.create_body(&settings).unwrap()
            })
            .collect();
        (store, ids)
    }

    fn add_to_broadphase(broadphase: &BroadPhase, store: &mut BodyStore, ids: &[BodyId]) {
        let layers = SingleBroadPhaseLayer;
        let state = broadphase.add_bodies_prepare(store, &layers, ids);
        for id in broadphase.add_bodies_finalize(state) {
            store.get_mut(id).unwrap().in_broad_phase = true;
        }
    }

    #[test]
    fn pair_finder_reports_each_pair_once() {
        let (mut store, ids) = make_store(&[
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.6, 0.0, 0.0),
            Vec3::new(10.0, 0.0, 0.0),
        ]);
        let broadphase = BroadPhase::new(64, &SingleBroadPhaseLayer);
        add_to_broadphase(&broadphase, &mut store, &ids);
        for id in &ids {
            store.activate_body(*id);
        }

        let mut pairs = Vec::new();
        let layers = SingleBroadPhaseLayer;
        broadphase.find_colliding_pairs(
            &store,
            &ids.clone(),
            0.02,
            &layers,
            &layers,
            &mut pairs,
        );
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0], BodyPair::new(ids[0], ids[1]));
    }

    #[test]
    fn sweep_entry_fraction_is_exact_for_axis_motion() {
        let moving = Aabb::from_center_extents(Vec3::ZERO, Vec3::splat(0.5));
        let target = Aabb::from_center_extents(Vec3::new(4.0, 0.0, 0.0), Vec3::splat(0.5));
        let t = sweep_aabb_entry(&moving, Vec3::new(6.0, 0.0, 0.0), &target).unwrap();
        assert!((t - 0.5).abs() < 1.0e-5);
    }

    #[test]
    fn sphere_query_prunes_corner_candidates() {
        let (mut store, ids) = make_store(&[Vec3::new(3.0, 3.0, 0.0)]);
        let broadphase = BroadPhase::new(64, &SingleBroadPhaseLayer);
        add_to_broadphase(&broadphase, &mut store, &ids);

        let layers = SingleBroadPhaseLayer;
        let mut hits = 0;
        // Sphere whose bounding box overlaps the body box but whose surface does not.
        broadphase.collide_sphere(Vec3::ZERO, 3.2, ObjectLayer(0), &layers, &layers, |_| {
            hits += 1;
            true
        });
        assert_eq!(hits, 0);

        broadphase.collide_sphere(Vec3::ZERO, 4.0, ObjectLayer(0), &layers, &layers, |_| {
            hits += 1;
            true
        });
        assert_eq!(hits, 1);
    }
}
