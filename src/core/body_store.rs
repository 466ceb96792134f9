//! Owner of all bodies. Hands out generation-tagged ids, keeps the compact
//! active-bodies array, and defers slot reuse until the step that destroyed a
//! body has finished.

use std::cell::UnsafeCell;

use log::warn;
use parking_lot::Mutex;

use crate::core::body::{Body, BodyCreationSettings, BodyId, INACTIVE_INDEX};

/// Bit set naming the body fields a pipeline job is allowed to touch. The
/// pipeline grants the proper set per phase; accessors assert it in debug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BodyAccess(pub u32);

impl BodyAccess {
    pub const NONE: BodyAccess = BodyAccess(0);
    pub const READ_POSITION: BodyAccess = BodyAccess(1);
    pub const WRITE_POSITION: BodyAccess = BodyAccess(2);
    pub const READ_VELOCITY: BodyAccess = BodyAccess(4);
    pub const WRITE_VELOCITY: BodyAccess = BodyAccess(8);
    pub const WRITE_ACTIVE_SET: BodyAccess = BodyAccess(16);
    pub const ALL: BodyAccess = BodyAccess(31);

    pub fn contains(self, other: BodyAccess) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: BodyAccess) -> BodyAccess {
        BodyAccess(self.0 | other.0)
    }
}

struct BodyCell(UnsafeCell<Body>);

// SAFETY: concurrent access to cells is coordinated by the body lock manager
// and by the pipeline's phase discipline (parallel jobs touch disjoint index
// sets). The store itself never hands out overlapping mutable references.
unsafe impl Sync for BodyCell {}

pub struct BodyStore {
    slots: Vec<Option<BodyCell>>,
    generations: Vec<u8>,
    free_list: Vec<u32>,
    /// Destroyed this step; indices become reusable once the step ends.
    deferred_free: Vec<u32>,
    active_bodies: Vec<BodyId>,
    /// Bodies woken from a parallel phase, appended here and folded into the
    /// active array at the next single-threaded point.
    pending_activations: Mutex<Vec<BodyId>>,
    max_bodies: usize,
    step_in_progress: bool,
    current_access: BodyAccess,
}

impl BodyStore {
    pub fn new(max_bodies: usize) -> Self {
        let max_bodies = max_bodies.min(BodyId::MAX_BODIES);
        Self {
            slots: Vec::new(),
            generations: Vec::new(),
            free_list: Vec::new(),
            deferred_free: Vec::new(),
            active_bodies: Vec::new(),
            pending_activations: Mutex::new(Vec::new()),
            max_bodies,
            step_in_progress: false,
            current_access: BodyAccess::ALL,
        }
    }

    /// Number of live bodies.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_bodies(&self) -> usize {
        self.max_bodies
    }

    /// Creates a body without adding it to the broadphase. Returns `None`
    /// when the body capacity is exhausted (the step continues without it).
    pub fn create_body(&mut self, settings: &BodyCreationSettings) -> Option<BodyId> {
        debug_assert!(!self.step_in_progress, "create_body called during a step");
        if self.len() >= self.max_bodies {
            warn!("body capacity ({}) exceeded, body not created", self.max_bodies);
            return None;
        }

        let id = if let Some(index) = self.free_list.pop() {
            BodyId::new(index, self.generations[index as usize])
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(None);
            self.generations.push(0);
            BodyId::new(index, 0)
        };

        let body = Body::from_settings(id, settings);
        self.slots[id.index()] = Some(BodyCell(UnsafeCell::new(body)));
        Some(id)
    }

    /// Destroys a body. The slot only becomes reusable after the current (or
    /// next) step ends, so stale ids keep comparing not-equal meanwhile.
    pub fn destroy_body(&mut self, id: BodyId) {
        debug_assert!(!self.step_in_progress, "destroy_body called during a step");
        if !self.is_valid(id) {
            return;
        }
        debug_assert!(
            !self.get(id).map(|b| b.in_broad_phase).unwrap_or(false),
            "destroy_body called on a body still in the broadphase"
        );
        if self.get(id).is_some_and(|b| b.is_active()) {
            self.deactivate_body(id);
        }
        self.slots[id.index()] = None;
        self.generations[id.index()] = self.generations[id.index()].wrapping_add(1);
        self.deferred_free.push(id.index() as u32);
    }

    pub fn is_valid(&self, id: BodyId) -> bool {
        !id.is_invalid()
            && id.index() < self.slots.len()
            && self.slots[id.index()].is_some()
            && self.generations[id.index()] == id.generation()
    }

    pub fn get(&self, id: BodyId) -> Option<&Body> {
        if !self.is_valid(id) {
            return None;
        }
        // SAFETY: shared borrow of self; writers go through &mut self or the
        // lock manager, which excludes this path by discipline (see BodyCell).
        self.slots[id.index()].as_ref().map(|cell| unsafe { &*cell.0.get() })
    }

    pub fn get_mut(&mut self, id: BodyId) -> Option<&mut Body> {
        if !self.is_valid(id) {
            return None;
        }
        // SAFETY: exclusive borrow of the store.
        self.slots[id.index()].as_mut().map(|cell| unsafe { &mut *cell.0.get() })
    }

    /// Mutable access from a shared borrow, used by the lock guards and by
    /// parallel jobs that partition bodies into disjoint sets.
    ///
    /// # Safety
    /// The caller must guarantee no other reference to this body exists for
    /// the lifetime of the returned borrow.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn get_mut_unchecked(&self, id: BodyId) -> Option<&mut Body> {
        if !self.is_valid(id) {
            return None;
        }
        self.slots[id.index()].as_ref().map(|cell| &mut *cell.0.get())
    }

    /// All live body ids, in index order.
    pub fn body_ids(&self) -> Vec<BodyId> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.as_ref()
                    .map(|_| BodyId::new(index as u32, self.generations[index]))
            })
            .collect()
    }

    pub fn active_bodies(&self) -> &[BodyId] {
        &self.active_bodies
    }

    /// Wakes a body: appends it to the active array and resets its sleep
    /// timer. Returns true if the body transitioned from inactive to active.
    pub fn activate_body(&mut self, id: BodyId) -> bool {
        let next_index = self.active_bodies.len() as u32;
        let Some(body) = self.get_mut(id) else { return false };
        let Some(motion) = body.motion_mut() else { return false };
        if motion.active_index != INACTIVE_INDEX {
            return false;
        }
        motion.active_index = next_index;
        motion.sleep_timer = 0.0;
        self.active_bodies.push(id);
        true
    }

    /// Puts a body to sleep: swap-removes it from the active array and zeroes
    /// its velocities. Returns true if it transitioned from active to inactive.
    pub fn deactivate_body(&mut self, id: BodyId) -> bool {
        let Some(body) = self.get_mut(id) else { return false };
        let Some(motion) = body.motion_mut() else { return false };
        let index = motion.active_index;
        if index == INACTIVE_INDEX {
            return false;
        }
        motion.active_index = INACTIVE_INDEX;
        motion.linear_velocity = glam::Vec3::ZERO;
        motion.angular_velocity = glam::Vec3::ZERO;

        let index = index as usize;
        self.active_bodies.swap_remove(index);
        if let Some(&moved) = self.active_bodies.get(index) {
            if let Some(moved_body) = self.get_mut(moved) {
                if let Some(moved_motion) = moved_body.motion_mut() {
                    moved_motion.active_index = index as u32;
                }
            }
        }
        true
    }

    /// Queues an activation from a parallel phase. Folded into the active
    /// array by [`Self::drain_pending_activations`].
    pub(crate) fn request_activation(&self, id: BodyId) {
        self.pending_activations.lock().push(id);
    }

    /// Applies queued activations in a deterministic order. Returns the
    /// bodies that actually woke up.
    pub(crate) fn drain_pending_activations(&mut self) -> Vec<BodyId> {
        let mut pending = std::mem::take(&mut *self.pending_activations.lock());
        pending.sort_unstable();
        pending.dedup();
        pending.retain(|&id| self.activate_body(id));
        pending
    }

    pub(crate) fn begin_step(&mut self) {
        debug_assert!(!self.step_in_progress);
        self.step_in_progress = true;
    }

    /// Ends the step: destroyed slots become reusable again.
    pub(crate) fn end_step(&mut self) {
        debug_assert!(self.step_in_progress);
        self.step_in_progress = false;
        self.free_list.append(&mut self.deferred_free);
    }

    pub(crate) fn is_step_in_progress(&self) -> bool {
        self.step_in_progress
    }

    pub(crate) fn grant_access(&mut self, access: BodyAccess) {
        self.current_access = access;
    }

    #[allow(dead_code)]
    pub(crate) fn assert_access(&self, needed: BodyAccess) {
        debug_assert!(
            self.current_access.contains(needed),
            "job touched body state outside its declared access ({:?} vs {:?})",
            needed,
            self.current_access
        );
    }
}
