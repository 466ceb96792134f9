//! Mutex-striped body locking.
//!
//! A body's lock is `hash(id) mod M` over `M` mutexes. Pair locks are always
//! taken in ascending stripe order so two threads locking the same two bodies
//! can never deadlock. Guards re-validate the generation tag after acquiring,
//! since the body may have been destroyed while the caller was blocked.

use std::ops::{Deref, DerefMut};

use parking_lot::{Mutex, MutexGuard};

use crate::core::body::{Body, BodyId};
use crate::core::body_store::BodyStore;

pub struct BodyLockManager {
    stripes: Box<[Mutex<()>]>,
    mask: usize,
}

impl BodyLockManager {
    /// `num_mutexes` is rounded up to a power of two; 0 picks a default of
    /// twice the available parallelism.
    pub fn new(num_mutexes: usize) -> Self {
        let requested = if num_mutexes == 0 {
            std::thread::available_parallelism().map_or(8, |n| n.get() * 2)
        } else {
            num_mutexes
        };
        let count = requested.next_power_of_two();
        let stripes = (0..count).map(|_| Mutex::new(())).collect::<Vec<_>>().into_boxed_slice();
        Self { stripes, mask: count - 1 }
    }

    pub fn num_stripes(&self) -> usize {
        self.stripes.len()
    }

    fn stripe_index(&self, id: BodyId) -> usize {
        // Fibonacci hash of the raw id spreads consecutive indices.
        (id.raw().wrapping_mul(2654435769) as usize >> 8) & self.mask
    }

    /// Shared access to one body. `None` if the id is stale.
    pub fn lock_read<'a>(&'a self, store: &'a BodyStore, id: BodyId) -> Option<BodyLockRead<'a>> {
        let guard = self.stripes[self.stripe_index(id)].lock();
        let body = store.get(id)?;
        Some(BodyLockRead { _guard: guard, body })
    }

    /// Exclusive access to one body. `None` if the id is stale.
    pub fn lock_write<'a>(&'a self, store: &'a BodyStore, id: BodyId) -> Option<BodyLockWrite<'a>> {
        let guard = self.stripes[self.stripe_index(id)].lock();
        // SAFETY: the stripe mutex serializes lock-based writers; phase
        // discipline keeps unlocked accessors off this body meanwhile.
        let body = unsafe { store.get_mut_unchecked(id)? };
        Some(BodyLockWrite { _guard: guard, body })
    }

    /// Exclusive access to two distinct bodies, acquired in ascending stripe
    /// order. `None` if either id is stale or both ids are equal.
    pub fn lock_pair_write<'a>(
        &'a self,
        store: &'a BodyStore,
        id_a: BodyId,
        id_b: BodyId,
    ) -> Option<BodyLockPairWrite<'a>> {
        if id_a == id_b {
            return None;
        }
        let stripe_a = self.stripe_index(id_a);
        let stripe_b = self.stripe_index(id_b);

        let (guard_first, guard_second) = if stripe_a == stripe_b {
            (self.stripes[stripe_a].lock(), None)
        } else {
            let (low, high) = if stripe_a < stripe_b { (stripe_a, stripe_b) } else { (stripe_b, stripe_a) };
            let first = self.stripes[low].lock();
            let second = self.stripes[high].lock();
            (first, Some(second))
        };

        // SAFETY: ids are distinct, so the two mutable borrows are disjoint;
        // the stripe locks serialize other lock-based writers.
        let body_a = unsafe { store.get_mut_unchecked(id_a) };
        let body_b = unsafe { store.get_mut_unchecked(id_b) };
        match (body_a, body_b) {
            (Some(body_a), Some(body_b)) => Some(BodyLockPairWrite {
                _guard_first: guard_first,
                _guard_second: guard_second,
                body_a,
                body_b,
            }),
            _ => None,
        }
    }
}

pub struct BodyLockRead<'a> {
    _guard: MutexGuard<'a, ()>,
    body: &'a Body,
}

impl<'a> Deref for BodyLockRead<'a> {
    type Target = Body;

    fn deref(&self) -> &Body {
        self.body
    }
}

pub struct BodyLockWrite<'a> {
    _guard: MutexGuard<'a, ()>,
    body: &'a mut Body,
}

impl<'a> Deref for BodyLockWrite<'a> {
    type Target = Body;

    fn deref(&self) -> &Body {
        self.body
    }
}

impl<'a> DerefMut for BodyLockWrite<'a> {
    fn deref_mut(&mut self) -> &mut Body {
        self.body
    }
}

pub struct BodyLockPairWrite<'a> {
    _guard_first: MutexGuard<'a, ()>,
    _guard_second: Option<MutexGuard<'a, ()>>,
    body_a: &'a mut Body,
    body_b: &'a mut Body,
}

impl<'a> BodyLockPairWrite<'a> {
    pub fn bodies(&mut self) -> (&mut Body, &mut Body) {
        (&mut *self.body_a, &mut *self.body_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::body::{BodyCreationSettings, MotionType};
    use crate::core::layers::ObjectLayer;
    use crate::shapes::Shape;
    use glam::{Quat, Vec3};

    fn store_with_two() -> (BodyStore, BodyId, BodyId) {
        let mut store = BodyStore::new(8);
        let settings = BodyCreationSettings::new(
            Shape::sphere(0.5),
            Vec3::ZERO,
            Quat::IDENTITY,
            MotionType::Dynamic,
            ObjectLayer(0),
        );
        let a = store.create_body(&settings).unwrap();
        let b = store.create_body(&settings).unwrap();
        (store, a, b)
    }

    #[test]
    fn stale_ids_fail_to_lock() {
        let (mut store, a, _) = store_with_two();
        let locks = BodyLockManager::new(4);
        store.destroy_body(a);
        assert!(locks.lock_read(&store, a).is_none());
        assert!(locks.lock_write(&store, a).is_none());
    }

    #[test]
    fn pair_lock_rejects_identical_ids() {
        let (store, a, _) = store_with_two();
        let locks = BodyLockManager::new(4);
        assert!(locks.lock_pair_write(&store, a, a).is_none());
    }

    #[test]
    fn pair_lock_yields_both_bodies() {
        let (store, a, b) = store_with_two();
        let locks = BodyLockManager::new(1);
        let mut pair = locks.lock_pair_write(&store, a, b).unwrap();
        let (body_a, body_b) = pair.bodies();
        body_a.position = Vec3::X;
        body_b.position = Vec3::Y;
        assert_ne!(body_a.position, body_b.position);
    }
}
