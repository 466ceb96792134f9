//! Loose 4-ary bounding volume hierarchy.
//!
//! The tree is never mutated in a way a concurrent query can observe as
//! inconsistent:
//!
//! - Child bounds write their coordinates in the order `max.z, max.y, max.x,
//!   min.z, min.y, min.x` with `Release` on `min.x`; a reader loads `min.x`
//!   with `Acquire` first and rejects any child whose box is inverted.
//! - Removal only invalidates the child box (max = -inf, then min = +inf) and
//!   clears the child id; nodes are never shrunk while queries run.
//! - Bounds changes only widen, walking parent links with compare-exchange
//!   min/max until nothing widens further.
//! - Insertion builds a subtree offline (nodes flagged `locked` so widening
//!   walks skip them), then attaches it with a compare-exchange on a root
//!   child slot or on the root index itself.
//! - The background rebuild constructs a whole new tree and toggles the
//!   root-index slot; finished queries release the old nodes via a deferred
//!   free list drained on the next rebuild cycle.

use std::sync::atomic::{AtomicU32, Ordering};

use glam::{Vec3, Vec4};
use log::warn;
use parking_lot::Mutex;

use crate::core::body::BodyId;
use crate::core::layers::ObjectLayer;
use crate::core::types::Aabb;
use crate::utils::simd::AabbBatch;

pub(crate) const INVALID_U32: u32 = u32::MAX;
const NODE_BIT: u32 = 1 << 31;
/// Fixed traversal stack depth; enough for a tree of millions of bodies.
const WALK_STACK_SIZE: usize = 128;

/// A child slot holds either a body (by body index), another node, or nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChildId(u32);

impl ChildId {
    pub const INVALID: ChildId = ChildId(INVALID_U32);

    pub fn from_body_index(index: u32) -> Self {
        debug_assert!(index & NODE_BIT == 0);
        ChildId(index)
    }

    pub fn from_node(index: u32) -> Self {
        debug_assert!(index & NODE_BIT == 0);
        ChildId(index | NODE_BIT)
    }

    pub fn is_invalid(self) -> bool {
        self.0 == INVALID_U32
    }

    pub fn is_node(self) -> bool {
        !self.is_invalid() && self.0 & NODE_BIT != 0
    }

    pub fn is_body(self) -> bool {
        !self.is_invalid() && self.0 & NODE_BIT == 0
    }

    pub fn index(self) -> u32 {
        self.0 & !NODE_BIT
    }

    fn raw(self) -> u32 {
        self.0
    }

    fn from_raw(raw: u32) -> Self {
        ChildId(raw)
    }
}

const INVALID_MIN: u32 = 0x7f7f_ffff; // f32::MAX bits
const INVALID_MAX: u32 = 0xff7f_ffff; // f32::MIN bits

/// One interior node: four child boxes in structure-of-arrays layout so the
/// walker can test all four with one `AabbBatch` evaluation.
pub(crate) struct Node {
    min_x: [AtomicU32; 4],
    min_y: [AtomicU32; 4],
    min_z: [AtomicU32; 4],
    max_x: [AtomicU32; 4],
    max_y: [AtomicU32; 4],
    max_z: [AtomicU32; 4],
    children: [AtomicU32; 4],
    parent: AtomicU32,
    /// Set while this node belongs to a subtree that is being prepared;
    /// widening walks stop at locked nodes until the attach completes.
    locked: AtomicU32,
}

fn atomic4(value: u32) -> [AtomicU32; 4] {
    [
        AtomicU32::new(value),
        AtomicU32::new(value),
        AtomicU32::new(value),
        AtomicU32::new(value),
    ]
}

impl Node {
    fn empty() -> Self {
        Self {
            min_x: atomic4(INVALID_MIN),
            min_y: atomic4(INVALID_MIN),
            min_z: atomic4(INVALID_MIN),
            max_x: atomic4(INVALID_MAX),
            max_y: atomic4(INVALID_MAX),
            max_z: atomic4(INVALID_MAX),
            children: [
                AtomicU32::new(INVALID_U32),
                AtomicU32::new(INVALID_U32),
                AtomicU32::new(INVALID_U32),
                AtomicU32::new(INVALID_U32),
            ],
            parent: AtomicU32::new(INVALID_U32),
            locked: AtomicU32::new(0),
        }
    }

    fn reset(&self) {
        for lane in 0..4 {
            self.min_x[lane].store(INVALID_MIN, Ordering::Relaxed);
            self.min_y[lane].store(INVALID_MIN, Ordering::Relaxed);
            self.min_z[lane].store(INVALID_MIN, Ordering::Relaxed);
            self.max_x[lane].store(INVALID_MAX, Ordering::Relaxed);
            self.max_y[lane].store(INVALID_MAX, Ordering::Relaxed);
            self.max_z[lane].store(INVALID_MAX, Ordering::Relaxed);
            self.children[lane].store(INVALID_U32, Ordering::Relaxed);
        }
        self.parent.store(INVALID_U32, Ordering::Relaxed);
        self.locked.store(0, Ordering::Relaxed);
    }

    /// Snapshot of the four child boxes. `min.x` is loaded first with
    /// `Acquire`; a box published by `set_child_bounds` is therefore seen in
    /// full or rejected as inverted.
    fn load_batch(&self) -> AabbBatch {
        let mut min_x = [0.0f32; 4];
        for lane in 0..4 {
            min_x[lane] = f32::from_bits(self.min_x[lane].load(Ordering::Acquire));
        }
        let load4 = |coords: &[AtomicU32; 4]| {
            Vec4::new(
                f32::from_bits(coords[0].load(Ordering::Relaxed)),
                f32::from_bits(coords[1].load(Ordering::Relaxed)),
                f32::from_bits(coords[2].load(Ordering::Relaxed)),
                f32::from_bits(coords[3].load(Ordering::Relaxed)),
            )
        };
        AabbBatch {
            min_x: Vec4::from_array(min_x),
            min_y: load4(&self.min_y),
            min_z: load4(&self.min_z),
            max_x: load4(&self.max_x),
            max_y: load4(&self.max_y),
            max_z: load4(&self.max_z),
        }
    }

    fn child(&self, lane: usize) -> ChildId {
        ChildId::from_raw(self.children[lane].load(Ordering::Acquire))
    }

    fn child_bounds(&self, lane: usize) -> Aabb {
        Aabb {
            min: Vec3::new(
                f32::from_bits(self.min_x[lane].load(Ordering::Acquire)),
                f32::from_bits(self.min_y[lane].load(Ordering::Relaxed)),
                f32::from_bits(self.min_z[lane].load(Ordering::Relaxed)),
            ),
            max: Vec3::new(
                f32::from_bits(self.max_x[lane].load(Ordering::Relaxed)),
                f32::from_bits(self.max_y[lane].load(Ordering::Relaxed)),
                f32::from_bits(self.max_z[lane].load(Ordering::Relaxed)),
            ),
        }
    }

    /// Publishes a child box: max coordinates first, `min.x` last (Release).
    fn set_child_bounds(&self, lane: usize, bounds: &Aabb) {
        self.max_z[lane].store(bounds.max.z.to_bits(), Ordering::Relaxed);
        self.max_y[lane].store(bounds.max.y.to_bits(), Ordering::Relaxed);
        self.max_x[lane].store(bounds.max.x.to_bits(), Ordering::Relaxed);
        self.min_z[lane].store(bounds.min.z.to_bits(), Ordering::Relaxed);
        self.min_y[lane].store(bounds.min.y.to_bits(), Ordering::Relaxed);
        self.min_x[lane].store(bounds.min.x.to_bits(), Ordering::Release);
    }

    /// Tombstones a child box: max first so the box turns inverted, then min
    /// with `Release` as the final write.
    fn invalidate_child_bounds(&self, lane: usize) {
        self.max_z[lane].store(INVALID_MAX, Ordering::Relaxed);
        self.max_y[lane].store(INVALID_MAX, Ordering::Relaxed);
        self.max_x[lane].store(INVALID_MAX, Ordering::Relaxed);
        self.min_z[lane].store(INVALID_MIN, Ordering::Relaxed);
        self.min_y[lane].store(INVALID_MIN, Ordering::Relaxed);
        self.min_x[lane].store(INVALID_MIN, Ordering::Release);
    }

    /// Grows a child box to enclose `bounds`. Returns whether anything grew.
    fn widen_child_bounds(&self, lane: usize, bounds: &Aabb) -> bool {
        let mut changed = false;
        changed |= atomic_min_f32(&self.min_x[lane], bounds.min.x);
        changed |= atomic_min_f32(&self.min_y[lane], bounds.min.y);
        changed |= atomic_min_f32(&self.min_z[lane], bounds.min.z);
        changed |= atomic_max_f32(&self.max_x[lane], bounds.max.x);
        changed |= atomic_max_f32(&self.max_y[lane], bounds.max.y);
        changed |= atomic_max_f32(&self.max_z[lane], bounds.max.z);
        changed
    }

    /// Union of the valid child boxes, i.e. the bounds of this node.
    fn node_bounds(&self) -> Aabb {
        let mut bounds = Aabb::INVALID;
        for lane in 0..4 {
            let child = self.child_bounds(lane);
            if child.is_valid() {
                bounds.encapsulate(&child);
            }
        }
        bounds
    }

    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire) != 0
    }
}

fn atomic_min_f32(cell: &AtomicU32, value: f32) -> bool {
    let mut current = cell.load(Ordering::Relaxed);
    loop {
        if value >= f32::from_bits(current) {
            return false;
        }
        match cell.compare_exchange_weak(current, value.to_bits(), Ordering::Release, Ordering::Relaxed) {
            Ok(_) => return true,
            Err(observed) => current = observed,
        }
    }
}

fn atomic_max_f32(cell: &AtomicU32, value: f32) -> bool {
    let mut current = cell.load(Ordering::Relaxed);
    loop {
        if value <= f32::from_bits(current) {
            return false;
        }
        match cell.compare_exchange_weak(current, value.to_bits(), Ordering::Release, Ordering::Relaxed) {
            Ok(_) => return true,
            Err(observed) => current = observed,
        }
    }
}

/// Where a body currently lives in the tree. All fields are atomics so
/// queries and the pair finder read them without touching body locks.
pub(crate) struct BodyTracking {
    pub node: AtomicU32,
    pub lane: AtomicU32,
    /// Cached `ObjectLayer` so filters run without locking the body.
    pub object_layer: AtomicU32,
    /// Raw `BodyId` the body was added with.
    pub raw_id: AtomicU32,
}

impl BodyTracking {
    fn empty() -> Self {
        Self {
            node: AtomicU32::new(INVALID_U32),
            lane: AtomicU32::new(0),
            object_layer: AtomicU32::new(0),
            raw_id: AtomicU32::new(INVALID_U32),
        }
    }

    pub fn is_in_tree(&self) -> bool {
        self.node.load(Ordering::Acquire) != INVALID_U32
    }
}

/// A body reported by a query, together with the loose bounds it was stored
/// under. The caller re-validates against live body state.
#[derive(Debug, Clone, Copy)]
pub struct BroadPhaseHit {
    pub body_id: BodyId,
    pub object_layer: ObjectLayer,
    pub bounds: Aabb,
    /// Entry fraction along the cast, 0.0 for overlap queries.
    pub fraction: f32,
}

/// Pending state between `add_bodies_prepare` and `add_bodies_finalize`.
pub struct AddState {
    root: ChildId,
    bounds: Aabb,
    bodies: Vec<(u32, Aabb)>,
}

/// Pending state between `update_prepare` and `update_finalize`.
pub struct UpdateState {
    new_root: u32,
    old_nodes: Vec<u32>,
}

pub(crate) struct QuadTree {
    nodes: Box<[Node]>,
    free_nodes: Mutex<Vec<u32>>,
    /// Nodes of a replaced tree, released on the next `discard_old_tree`.
    deferred_free: Mutex<Vec<u32>>,
    /// Two root slots; `current_root` toggles between them on rebuild.
    roots: [AtomicU32; 2],
    current_root: AtomicU32,
    tracking: Box<[BodyTracking]>,
}

impl QuadTree {
    pub fn new(max_bodies: usize) -> Self {
        let node_capacity = (max_bodies * 2).max(64);
        let nodes: Box<[Node]> = (0..node_capacity).map(|_| Node::empty()).collect();
        // Hand nodes out from the back so low indices go first on rebuilds.
        let free_nodes = (0..node_capacity as u32).rev().collect();
        let tracking: Box<[BodyTracking]> = (0..max_bodies).map(|_| BodyTracking::empty()).collect();

        let tree = Self {
            nodes,
            free_nodes: Mutex::new(free_nodes),
            deferred_free: Mutex::new(Vec::new()),
            roots: [AtomicU32::new(INVALID_U32), AtomicU32::new(INVALID_U32)],
            current_root: AtomicU32::new(0),
            tracking,
        };
        let root = tree.alloc_node().expect("node pool cannot be empty at startup");
        tree.roots[0].store(root, Ordering::Release);
        tree
    }

    fn alloc_node(&self) -> Option<u32> {
        let index = self.free_nodes.lock().pop();
        if index.is_none() {
            warn!("quadtree node pool exhausted");
        }
        index
    }

    fn free_node(&self, index: u32) {
        self.nodes[index as usize].reset();
        self.free_nodes.lock().push(index);
    }

    fn root_index(&self) -> u32 {
        let slot = self.current_root.load(Ordering::Acquire) as usize;
        self.roots[slot & 1].load(Ordering::Acquire)
    }

    pub fn tracking(&self, body_index: usize) -> &BodyTracking {
        &self.tracking[body_index]
    }

    /// Bounds the tree stores for a body (loose; only widened between rebuilds).
    pub fn body_bounds(&self, body_index: usize) -> Option<Aabb> {
        let tracking = &self.tracking[body_index];
        let node = tracking.node.load(Ordering::Acquire);
        if node == INVALID_U32 {
            return None;
        }
        let lane = tracking.lane.load(Ordering::Relaxed) as usize;
        let bounds = self.nodes[node as usize].child_bounds(lane);
        bounds.is_valid().then_some(bounds)
    }

    // ---- insertion ------------------------------------------------------

    /// Builds a detached subtree for the given bodies. Runs concurrently with
    /// queries; nothing becomes visible until `add_bodies_finalize`.
    pub fn add_bodies_prepare(&self, bodies: &[(BodyId, ObjectLayer, Aabb)]) -> AddState {
        let mut entries: Vec<(u32, Aabb)> = Vec::with_capacity(bodies.len());
        for (id, layer, bounds) in bodies {
            let tracking = &self.tracking[id.index()];
            debug_assert!(!tracking.is_in_tree(), "body added to the broadphase twice");
            tracking.object_layer.store(layer.0 as u32, Ordering::Relaxed);
            tracking.raw_id.store(id.raw(), Ordering::Relaxed);
            entries.push((id.index() as u32, *bounds));
        }

        let mut total = Aabb::INVALID;
        for (_, bounds) in &entries {
            total.encapsulate(bounds);
        }

        let root = self.build_subtree(&mut entries.clone(), true);
        AddState { root, bounds: total, bodies: entries }
    }

    /// Attaches a prepared subtree, then clears the `locked` flags so
    /// widening walks can pass through the new nodes.
    pub fn add_bodies_finalize(&self, state: AddState) {
        if state.root.is_invalid() {
            return;
        }

        loop {
            let root_index = self.root_index();
            let root = &self.nodes[root_index as usize];

            // Try to claim an empty lane in the current root.
            let mut attached = false;
            for lane in 0..4 {
                if root.children[lane]
                    .compare_exchange(INVALID_U32, state.root.raw(), Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    if state.root.is_node() {
                        self.nodes[state.root.index() as usize]
                            .parent
                            .store(root_index, Ordering::Release);
                    }
                    self.set_tracking_for_direct_child(state.root, root_index, lane);
                    root.set_child_bounds(lane, &state.bounds);
                    self.widen_ancestors(root_index, &state.bounds);
                    attached = true;
                    break;
                }
            }
            if attached {
                break;
            }

            // Root is full: push the old root down under a fresh root.
            let Some(new_root_index) = self.alloc_node() else {
                warn!("dropping broadphase insert of {} bodies", state.bodies.len());
                return;
            };
            let new_root = &self.nodes[new_root_index as usize];
            new_root.children[0].store(ChildId::from_node(root_index).raw(), Ordering::Relaxed);
            new_root.set_child_bounds(0, &self.nodes[root_index as usize].node_bounds());

            let slot = (self.current_root.load(Ordering::Acquire) & 1) as usize;
            if self.roots[slot]
                .compare_exchange(root_index, new_root_index, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.nodes[root_index as usize].parent.store(new_root_index, Ordering::Release);
                // Next loop iteration lands in one of the new root's free lanes.
            } else {
                self.free_node(new_root_index);
            }
        }

        self.unlock_subtree(state.root);
        for (body_index, _) in &state.bodies {
            debug_assert!(self.tracking[*body_index as usize].is_in_tree());
        }
    }

    fn set_tracking_for_direct_child(&self, child: ChildId, node: u32, lane: usize) {
        if child.is_body() {
            let tracking = &self.tracking[child.index() as usize];
            tracking.lane.store(lane as u32, Ordering::Relaxed);
            tracking.node.store(node, Ordering::Release);
        }
    }

    /// Recursively builds a subtree via median splits. Nodes are created
    /// `locked` when `locked` is set so concurrent widening walks skip them.
    fn build_subtree(&self, entries: &mut [(u32, Aabb)], locked: bool) -> ChildId {
        match entries.len() {
            0 => return ChildId::INVALID,
            1 => {
                // A single body attaches directly; tracking is set at attach.
                return ChildId::from_body_index(entries[0].0);
            }
            _ => {}
        }

        let Some(node_index) = self.alloc_node() else {
            warn!("quadtree subtree build dropped {} bodies", entries.len());
            return ChildId::INVALID;
        };
        let node = &self.nodes[node_index as usize];
        node.locked.store(locked as u32, Ordering::Release);

        if entries.len() <= 4 {
            for (lane, (body_index, bounds)) in entries.iter().enumerate() {
                node.children[lane].store(ChildId::from_body_index(*body_index).raw(), Ordering::Relaxed);
                node.set_child_bounds(lane, bounds);
                let tracking = &self.tracking[*body_index as usize];
                tracking.lane.store(lane as u32, Ordering::Relaxed);
                tracking.node.store(node_index, Ordering::Release);
            }
            return ChildId::from_node(node_index);
        }

        let ranges = partition_into_four(entries);
        let mut lane = 0;
        for range in ranges {
            if range.is_empty() {
                continue;
            }
            let single_body_bounds = (range.len() == 1).then(|| range[0].1);
            let child = self.build_subtree(&mut *range, locked);
            if child.is_invalid() {
                continue;
            }
            let bounds = if child.is_node() {
                self.nodes[child.index() as usize].node_bounds()
            } else {
                // Single body becomes a direct child of this node.
                let tracking = &self.tracking[child.index() as usize];
                tracking.lane.store(lane as u32, Ordering::Relaxed);
                tracking.node.store(node_index, Ordering::Release);
                single_body_bounds.unwrap_or(Aabb::INVALID)
            };
            node.children[lane].store(child.raw(), Ordering::Relaxed);
            node.set_child_bounds(lane, &bounds);
            if child.is_node() {
                self.nodes[child.index() as usize].parent.store(node_index, Ordering::Release);
            }
            lane += 1;
        }
        ChildId::from_node(node_index)
    }

    fn unlock_subtree(&self, child: ChildId) {
        if !child.is_node() {
            return;
        }
        let node = &self.nodes[child.index() as usize];
        node.locked.store(0, Ordering::Release);
        for lane in 0..4 {
            self.unlock_subtree(node.child(lane));
        }
    }

    // ---- removal --------------------------------------------------------

    /// Detaches bodies by tombstoning their child slots. The tree never
    /// shrinks here; dead branches disappear at the next rebuild.
    pub fn remove_bodies(&self, bodies: &[BodyId]) {
        for id in bodies {
            let tracking = &self.tracking[id.index()];
            let node_index = tracking.node.swap(INVALID_U32, Ordering::AcqRel);
            if node_index == INVALID_U32 {
                debug_assert!(false, "body removed from the broadphase twice");
                continue;
            }
            let lane = tracking.lane.load(Ordering::Relaxed) as usize;
            let node = &self.nodes[node_index as usize];
            node.invalidate_child_bounds(lane);
            node.children[lane].store(INVALID_U32, Ordering::Release);
            tracking.raw_id.store(INVALID_U32, Ordering::Relaxed);
        }
    }

    // ---- bounds updates -------------------------------------------------

    /// Widens the stored bounds of each body to enclose its new AABB, then
    /// walks toward the root widening ancestors until nothing changes.
    pub fn notify_bounds_changed(&self, bodies: &[(BodyId, Aabb)]) {
        for (id, bounds) in bodies {
            let tracking = &self.tracking[id.index()];
            let node_index = tracking.node.load(Ordering::Acquire);
            if node_index == INVALID_U32 {
                continue;
            }
            let lane = tracking.lane.load(Ordering::Relaxed) as usize;
            let node = &self.nodes[node_index as usize];
            if node.widen_child_bounds(lane, bounds) {
                self.widen_ancestors(node_index, bounds);
            }
        }
    }

    fn widen_ancestors(&self, mut node_index: u32, bounds: &Aabb) {
        loop {
            let node = &self.nodes[node_index as usize];
            let parent_index = node.parent.load(Ordering::Acquire);
            if parent_index == INVALID_U32 {
                return;
            }
            let parent = &self.nodes[parent_index as usize];
            if parent.is_locked() {
                // Subtree still being attached; Finalize publishes the final bounds.
                return;
            }
            let mut widened = false;
            for lane in 0..4 {
                if parent.child(lane) == ChildId::from_node(node_index) {
                    widened = parent.widen_child_bounds(lane, bounds);
                    break;
                }
            }
            if !widened {
                return;
            }
            node_index = parent_index;
        }
    }

    // ---- background rebuild --------------------------------------------

    /// Collects every tracked body and builds a compact replacement tree.
    /// Runs while queries use the live tree.
    pub fn update_prepare(&self) -> UpdateState {
        // Reclaim nodes retired by the previous rebuild first.
        self.discard_old_tree();

        let old_root = self.root_index();
        let mut entries: Vec<(u32, Aabb)> = Vec::new();
        let mut old_nodes = Vec::new();
        self.collect_tree(old_root, &mut entries, &mut old_nodes);

        let new_root = if entries.is_empty() {
            let index = self.alloc_node().unwrap_or(old_root);
            if index == old_root {
                old_nodes.clear();
            }
            index
        } else {
            match self.build_rebuilt_tree(&mut entries) {
                Some(index) => index,
                None => {
                    old_nodes.clear();
                    old_root
                }
            }
        };

        UpdateState { new_root, old_nodes }
    }

    /// Publishes the rebuilt tree by toggling the root-index slot. Queries
    /// that already started keep walking the old nodes, which stay allocated
    /// until `discard_old_tree`.
    pub fn update_finalize(&self, state: UpdateState) {
        if state.new_root == self.root_index() {
            return;
        }
        let slot = self.current_root.load(Ordering::Acquire);
        let next_slot = (slot + 1) & 1;
        self.roots[next_slot as usize].store(state.new_root, Ordering::Release);
        self.current_root.store(next_slot, Ordering::Release);
        self.deferred_free.lock().extend(state.old_nodes);
    }

    /// Releases the nodes of a tree replaced by a finished rebuild.
    pub fn discard_old_tree(&self) {
        let retired = std::mem::take(&mut *self.deferred_free.lock());
        for index in retired {
            self.free_node(index);
        }
    }

    fn collect_tree(&self, node_index: u32, entries: &mut Vec<(u32, Aabb)>, old_nodes: &mut Vec<u32>) {
        if node_index == INVALID_U32 {
            return;
        }
        let node = &self.nodes[node_index as usize];
        if node.is_locked() {
            // A subtree attach is in flight; leave it for the next rebuild.
            return;
        }
        old_nodes.push(node_index);
        for lane in 0..4 {
            let child = node.child(lane);
            if child.is_body() {
                let bounds = node.child_bounds(lane);
                if bounds.is_valid() {
                    entries.push((child.index(), bounds));
                }
            } else if child.is_node() {
                self.collect_tree(child.index(), entries, old_nodes);
            }
        }
    }

    /// Builds a fresh tree bottom-up; unlike `build_subtree` the nodes are
    /// live immediately (the root swap is the publication point).
    fn build_rebuilt_tree(&self, entries: &mut Vec<(u32, Aabb)>) -> Option<u32> {
        let root_child = self.build_subtree(entries, false);
        match root_child {
            c if c.is_node() => Some(c.index()),
            c if c.is_body() => {
                // Tree of one body still needs an interior root node.
                let index = self.alloc_node()?;
                let node = &self.nodes[index as usize];
                let tracking = &self.tracking[c.index() as usize];
                node.children[0].store(c.raw(), Ordering::Relaxed);
                node.set_child_bounds(0, &entries_bounds(entries, c.index()));
                tracking.lane.store(0, Ordering::Relaxed);
                tracking.node.store(index, Ordering::Release);
                Some(index)
            }
            _ => None,
        }
    }

    // ---- queries --------------------------------------------------------

    /// Shared iterative walker over a small fixed-depth stack of node ids.
    ///
    /// `visit_node` tests the four child boxes of a node and writes the lanes
    /// to accept into `order` (already sorted, nearest-first for casts).
    /// Accepted body lanes are reported to `visit_body` immediately with the
    /// bounds that were just tested; accepted node lanes are pushed.
    /// `visit_body` returns false to early-out the entire walk.
    pub fn walk<N, B>(&self, mut visit_node: N, mut visit_body: B)
    where
        N: FnMut(&AabbBatch, &mut [u32; 4]) -> usize,
        B: FnMut(u32, &Aabb) -> bool,
    {
        let root = self.root_index();
        if root == INVALID_U32 {
            return;
        }

        let mut stack = [0u32; WALK_STACK_SIZE];
        stack[0] = root;
        let mut depth = 1usize;

        while depth > 0 {
            depth -= 1;
            let node = &self.nodes[stack[depth] as usize];
            let batch = node.load_batch();
            let mut order = [0u32; 4];
            let count = visit_node(&batch, &mut order);

            // Report body lanes in accept order.
            for i in 0..count {
                let lane = order[i] as usize;
                let child = node.child(lane);
                if child.is_body() {
                    let bounds = node.child_bounds(lane);
                    if bounds.is_valid() && !visit_body(child.index(), &bounds) {
                        return;
                    }
                }
            }
            // Push node lanes in reverse so order[0] pops first.
            for i in (0..count).rev() {
                let lane = order[i] as usize;
                let child = node.child(lane);
                if child.is_node() {
                    if depth == WALK_STACK_SIZE {
                        warn!("quadtree walk stack overflow, dropping a branch");
                        continue;
                    }
                    stack[depth] = child.index();
                    depth += 1;
                }
            }
        }
    }

    /// All bodies whose stored bounds overlap `bounds`.
    pub fn collide_aabb<F>(&self, bounds: &Aabb, mut hit: F)
    where
        F: FnMut(u32, &Aabb) -> bool,
    {
        let (min, max) = (bounds.min, bounds.max);
        self.walk(
            move |batch, order| {
                let mask = batch.overlaps(min, max);
                lanes_from_mask(mask, order)
            },
            |body, stored| hit(body, stored),
        );
    }

    /// Bodies hit by a ray, visited approximately nearest-first. The hit
    /// callback receives the entry distance into the stored (loose) bounds.
    pub fn cast_ray<F>(&self, origin: Vec3, direction: Vec3, max_distance: f32, mut hit: F)
    where
        F: FnMut(u32, f32) -> bool,
    {
        let inv = crate::utils::simd::safe_inverse_direction(direction);
        self.walk(
            move |batch, order| {
                let (distance, mask) = batch.ray_intersect(origin, inv, max_distance);
                lanes_sorted_by_distance(mask, distance, order)
            },
            |body, bounds| {
                let entry = ray_aabb_entry(origin, inv, bounds, max_distance).unwrap_or(0.0);
                hit(body, entry)
            },
        );
    }

    /// Bodies whose stored bounds are entered by a swept box.
    pub fn cast_aabb<F>(&self, bounds: &Aabb, delta: Vec3, mut hit: F)
    where
        F: FnMut(u32, &Aabb) -> bool,
    {
        let swept = bounds.swept(delta);
        let (min, max) = (swept.min, swept.max);
        self.walk(
            move |batch, order| {
                let mask = batch.overlaps(min, max);
                lanes_from_mask(mask, order)
            },
            |body, stored| hit(body, stored),
        );
    }
}

fn entries_bounds(entries: &[(u32, Aabb)], body_index: u32) -> Aabb {
    entries
        .iter()
        .find(|(index, _)| *index == body_index)
        .map(|(_, bounds)| *bounds)
        .unwrap_or(Aabb::INVALID)
}

/// Scalar slab test returning the entry distance of a ray into a box.
pub(crate) fn ray_aabb_entry(origin: Vec3, inv_direction: Vec3, bounds: &Aabb, max_distance: f32) -> Option<f32> {
    let t1 = (bounds.min - origin) * inv_direction;
    let t2 = (bounds.max - origin) * inv_direction;
    let entry = t1.min(t2).max_element().max(0.0);
    let exit = t1.max(t2).min_element().min(max_distance);
    (entry <= exit).then_some(entry)
}

pub(crate) fn lanes_from_mask(mask: u32, order: &mut [u32; 4]) -> usize {
    let mut count = 0;
    for lane in 0..4u32 {
        if mask & (1 << lane) != 0 {
            order[count] = lane;
            count += 1;
        }
    }
    count
}

fn lanes_sorted_by_distance(mask: u32, distance: Vec4, order: &mut [u32; 4]) -> usize {
    let count = lanes_from_mask(mask, order);
    let keys = distance.to_array();
    order[..count].sort_unstable_by(|a, b| {
        keys[*a as usize]
            .partial_cmp(&keys[*b as usize])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    count
}

/// Median split into 4 ordered ranges: split along the axis of maximum center
/// spread, then split each half again along its own best axis.
fn partition_into_four(entries: &mut [(u32, Aabb)]) -> [&mut [(u32, Aabb)]; 4] {
    let mid = entries.len() / 2;
    sort_by_best_axis(entries);
    let (low, high) = entries.split_at_mut(mid);

    sort_by_best_axis(low);
    sort_by_best_axis(high);
    let low_mid = low.len() / 2;
    let high_mid = high.len() / 2;
    let (a, b) = low.split_at_mut(low_mid);
    let (c, d) = high.split_at_mut(high_mid);
    [a, b, c, d]
}

fn sort_by_best_axis(entries: &mut [(u32, Aabb)]) {
    if entries.len() < 2 {
        return;
    }
    let mut center_bounds = Aabb::INVALID;
    for (_, bounds) in entries.iter() {
        center_bounds.encapsulate_point(bounds.center());
    }
    let spread = center_bounds.max - center_bounds.min;
    let axis = if spread.x >= spread.y && spread.x >= spread.z {
        0
    } else if spread.y >= spread.z {
        1
    } else {
        2
    };
    // Total order on (center coordinate, body index) keeps rebuilds deterministic.
    entries.sort_unstable_by(|a, b| {
        let ca = a.1.center()[axis];
        let cb = b.1.center()[axis];
        ca.partial_cmp(&cb)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(index: u32) -> BodyId {
        BodyId::new(index, 0)
    }

    fn unit_box_at(center: Vec3) -> Aabb {
        Aabb::from_center_extents(center, Vec3::splat(0.5))
    }

    fn add_all(tree: &QuadTree, bodies: &[(BodyId, ObjectLayer, Aabb)]) {
        let state = tree.add_bodies_prepare(bodies);
        tree.add_bodies_finalize(state);
    }

    fn query_all(tree: &QuadTree, bounds: &Aabb) -> Vec<u32> {
        let mut found = Vec::new();
        tree.collide_aabb(bounds, |body, _| {
            found.push(body);
            true
        });
        found.sort_unstable();
        found
    }

    #[test]
    fn inserted_bodies_are_found_by_overlap_queries() {
        let tree = QuadTree::new(64);
        let bodies: Vec<_> = (0..20)
            .map(|i| (id(i), ObjectLayer(0), unit_box_at(Vec3::new(i as f32 * 3.0, 0.0, 0.0))))
            .collect();
        add_all(&tree, &bodies);

        let found = query_all(&tree, &unit_box_at(Vec3::new(9.0, 0.0, 0.0)));
        assert_eq!(found, vec![3]);

        let all = query_all(&tree, &Aabb::new(Vec3::splat(-100.0), Vec3::splat(100.0)));
        assert_eq!(all.len(), 20);
    }

    #[test]
    fn removed_bodies_disappear_from_queries() {
        let tree = QuadTree::new(16);
        let bodies: Vec<_> = (0..6)
            .map(|i| (id(i), ObjectLayer(0), unit_box_at(Vec3::new(i as f32 * 2.0, 0.0, 0.0))))
            .collect();
        add_all(&tree, &bodies);

        tree.remove_bodies(&[id(2), id(4)]);
        let all = query_all(&tree, &Aabb::new(Vec3::splat(-100.0), Vec3::splat(100.0)));
        assert_eq!(all, vec![0, 1, 3, 5]);
    }

    #[test]
    fn widening_keeps_moved_bodies_visible() {
        let tree = QuadTree::new(16);
        add_all(&tree, &[(id(0), ObjectLayer(0), unit_box_at(Vec3::ZERO))]);

        let moved = unit_box_at(Vec3::new(10.0, 0.0, 0.0));
        tree.notify_bounds_changed(&[(id(0), moved)]);

        let found = query_all(&tree, &unit_box_at(Vec3::new(10.0, 0.0, 0.0)));
        assert_eq!(found, vec![0]);
    }

    #[test]
    fn rebuild_preserves_contents_and_recycles_nodes() {
        let tree = QuadTree::new(64);
        let bodies: Vec<_> = (0..32)
            .map(|i| {
                let p = Vec3::new((i % 8) as f32 * 2.0, (i / 8) as f32 * 2.0, 0.0);
                (id(i), ObjectLayer(0), unit_box_at(p))
            })
            .collect();
        add_all(&tree, &bodies);

        for _ in 0..3 {
            let state = tree.update_prepare();
            tree.update_finalize(state);
            tree.discard_old_tree();
            let all = query_all(&tree, &Aabb::new(Vec3::splat(-100.0), Vec3::splat(100.0)));
            assert_eq!(all.len(), 32);
        }
    }

    #[test]
    fn ray_cast_visits_nearest_first() {
        let tree = QuadTree::new(16);
        add_all(
            &tree,
            &[
                (id(0), ObjectLayer(0), unit_box_at(Vec3::new(10.0, 0.0, 0.0))),
                (id(1), ObjectLayer(0), unit_box_at(Vec3::new(5.0, 0.0, 0.0))),
                (id(2), ObjectLayer(0), unit_box_at(Vec3::new(20.0, 0.0, 0.0))),
            ],
        );

        let mut hits = Vec::new();
        tree.cast_ray(Vec3::ZERO, Vec3::X, 100.0, |body, _| {
            hits.push(body);
            true
        });
        assert_eq!(hits.len(), 3);
        // Nearest body comes out first.
        assert_eq!(hits[0], 1);
    }
}
