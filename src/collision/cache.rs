//! Persistent contact cache.
//!
//! Two cache instances alternate per step: the frozen *read* cache holds last
//! step's manifolds, the *write* cache collects this step's. Narrowphase
//! workers write concurrently through hash-sharded locks. Cached data is
//! stored in body-local space (the normal in body B's frame) so a pair that
//! barely moved can skip narrowphase entirely and replay its manifolds.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

use glam::{Quat, Vec3};
use log::warn;
use parking_lot::Mutex;

use crate::broadphase::BodyPair;
use crate::collision::clipping::FaceContact;
use crate::collision::narrowphase::Manifold;
use crate::config::{PhysicsSettings, MIN_CACHE_BUCKETS};
use crate::core::body::Body;
use crate::listeners::{ContactListener, ContactSettings, ValidateResult};
use crate::shapes::SubShapeId;

const NUM_SHARDS: usize = 16;

/// Key of a cached manifold: the unordered body pair plus both sub-shape
/// paths, normalized so body A carries the smaller raw id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ManifoldKey {
    pub pair: BodyPair,
    pub sub_shape_a: SubShapeId,
    pub sub_shape_b: SubShapeId,
}

/// One cached contact point: positions in each body's local space and the
/// converged impulses for warm starting.
#[derive(Debug, Clone, Copy)]
pub struct CachedContactPoint {
    pub local_a: Vec3,
    pub local_b: Vec3,
    pub normal_lambda: f32,
    pub friction_lambda: [f32; 2],
}

#[derive(Debug, Clone)]
pub struct CachedManifold {
    /// Contact normal in body B local space; survives pair translation and
    /// shared rotation.
    pub normal_local_b: Vec3,
    pub points: Vec<CachedContactPoint>,
    pub ccd_contact: bool,
}

/// Relative pose of a body pair at caching time, plus its manifold keys.
#[derive(Debug, Clone)]
pub struct BodyPairEntry {
    pub delta_position: Vec3,
    pub delta_rotation: Quat,
    pub manifold_keys: Vec<ManifoldKey>,
}

#[derive(Default)]
struct CacheShard {
    pairs: HashMap<BodyPair, BodyPairEntry>,
    manifolds: HashMap<ManifoldKey, CachedManifold>,
}

/// One cache generation (read or write).
pub struct ContactCache {
    shards: Vec<Mutex<CacheShard>>,
    manifold_count: AtomicUsize,
    pair_count: AtomicUsize,
    max_pairs: usize,
    max_manifolds: usize,
}

impl ContactCache {
    fn new(max_pairs: usize, max_manifolds: usize) -> Self {
        Self {
            shards: (0..NUM_SHARDS).map(|_| Mutex::new(CacheShard::default())).collect(),
            manifold_count: AtomicUsize::new(0),
            pair_count: AtomicUsize::new(0),
            max_pairs,
            max_manifolds,
        }
    }

    fn shard_of(&self, pair: &BodyPair) -> &Mutex<CacheShard> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        pair.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % NUM_SHARDS]
    }

    fn clear(&self, expected_buckets: usize) {
        let per_shard = (expected_buckets / NUM_SHARDS).max(MIN_CACHE_BUCKETS / NUM_SHARDS);
        for shard in &self.shards {
            let mut shard = shard.lock();
            shard.pairs = HashMap::with_capacity(per_shard);
            shard.manifolds = HashMap::with_capacity(per_shard);
        }
        self.manifold_count.store(0, Ordering::Relaxed);
        self.pair_count.store(0, Ordering::Relaxed);
    }

    pub fn num_manifolds(&self) -> usize {
        self.manifold_count.load(Ordering::Relaxed)
    }

    pub fn num_pairs(&self) -> usize {
        self.pair_count.load(Ordering::Relaxed)
    }

    pub fn pair_entry(&self, pair: &BodyPair) -> Option<BodyPairEntry> {
        self.shard_of(pair).lock().pairs.get(pair).cloned()
    }

    pub fn manifold(&self, key: &ManifoldKey) -> Option<CachedManifold> {
        self.shard_of(&key.pair).lock().manifolds.get(key).cloned()
    }

    pub fn contains_manifold(&self, key: &ManifoldKey) -> bool {
        self.shard_of(&key.pair).lock().manifolds.contains_key(key)
    }

    /// Inserts a pair entry; fails (with a trace) when the pair budget is
    /// spent. The step then simply records fewer contacts.
    fn try_insert_pair(&self, pair: BodyPair, entry: BodyPairEntry) -> bool {
        if self.pair_count.fetch_add(1, Ordering::Relaxed) >= self.max_pairs {
            self.pair_count.fetch_sub(1, Ordering::Relaxed);
            warn!("body pair capacity ({}) exceeded, pair dropped", self.max_pairs);
            return false;
        }
        self.shard_of(&pair).lock().pairs.insert(pair, entry);
        true
    }

    fn try_insert_manifold(&self, key: ManifoldKey, manifold: CachedManifold) -> bool {
        if self.manifold_count.fetch_add(1, Ordering::Relaxed) >= self.max_manifolds {
            self.manifold_count.fetch_sub(1, Ordering::Relaxed);
            warn!(
                "contact constraint capacity ({}) exceeded, manifold dropped",
                self.max_manifolds
            );
            return false;
        }
        self.shard_of(&key.pair).lock().manifolds.insert(key, manifold);
        true
    }

    /// Writes back converged impulses after the solver ran.
    pub fn store_lambdas(&self, key: &ManifoldKey, lambdas: &[(f32, [f32; 2])]) {
        let mut shard = self.shard_of(&key.pair).lock();
        if let Some(manifold) = shard.manifolds.get_mut(key) {
            for (point, lambda) in manifold.points.iter_mut().zip(lambdas) {
                point.normal_lambda = lambda.0;
                point.friction_lambda = lambda.1;
            }
        }
    }

    /// All manifold keys, sorted. Deterministic iteration for callbacks and
    /// state serialization.
    pub fn sorted_manifold_keys(&self) -> Vec<ManifoldKey> {
        let mut keys: Vec<ManifoldKey> = Vec::with_capacity(self.num_manifolds());
        for shard in &self.shards {
            keys.extend(shard.lock().manifolds.keys().copied());
        }
        keys.sort_unstable();
        keys
    }
}

/// A manifold ready for constraint setup: world-space points plus the warm
/// start impulses inherited from the previous step.
#[derive(Debug, Clone)]
pub struct WarmManifold {
    pub manifold: Manifold,
    /// Per point: (normal lambda, two friction lambdas).
    pub lambdas: Vec<(f32, [f32; 2])>,
    pub settings: ContactSettings,
    pub key: ManifoldKey,
}

/// The read/write cache pair with the per-step swap.
pub struct ContactCacheSet {
    caches: [ContactCache; 2],
    read_index: usize,
    last_manifold_count: usize,
}

impl ContactCacheSet {
    pub fn new(max_pairs: usize, max_manifolds: usize) -> Self {
        Self {
            caches: [
                ContactCache::new(max_pairs, max_manifolds),
                ContactCache::new(max_pairs, max_manifolds),
            ],
            read_index: 0,
            last_manifold_count: 0,
        }
    }

    pub fn read_cache(&self) -> &ContactCache {
        &self.caches[self.read_index]
    }

    pub fn write_cache(&self) -> &ContactCache {
        &self.caches[1 - self.read_index]
    }

    /// Sizes the write cache from last step's manifold count.
    pub fn prepare(&mut self) {
        let expected = self.last_manifold_count.next_power_of_two().max(MIN_CACHE_BUCKETS);
        self.caches[1 - self.read_index].clear(expected);
    }

    /// Marks the write cache complete and swaps the roles of the caches.
    pub fn finalize(&mut self) {
        self.last_manifold_count = self.write_cache().num_manifolds();
        self.read_index = 1 - self.read_index;
    }

    /// Fires `on_contact_removed` for every manifold of the previous step
    /// that was not re-found this step. Must run after [`Self::finalize`].
    pub fn contact_removed_callbacks(&self, listener: Option<&dyn ContactListener>) {
        let Some(listener) = listener else { return };
        // After the swap, the write cache holds the previous step's data.
        let previous = self.write_cache();
        let current = self.read_cache();
        for key in previous.sorted_manifold_keys() {
            if !current.contains_manifold(&key) {
                listener.on_contact_removed(key.pair.a, key.sub_shape_a, key.pair.b, key.sub_shape_b);
            }
        }
    }

    /// Processes one body pair during narrowphase.
    ///
    /// If the read cache has the pair and its relative pose barely moved, the
    /// cached manifolds are replayed (narrowphase skipped) and only the
    /// persisted callbacks fire. Otherwise `collide` runs and each fresh
    /// contact point inherits the lambda of the nearest cached point.
    pub fn process_pair<F>(
        &self,
        settings: &PhysicsSettings,
        listener: Option<&dyn ContactListener>,
        body_a: &Body,
        body_b: &Body,
        collide: F,
    ) -> Vec<WarmManifold>
    where
        F: FnOnce() -> Vec<Manifold>,
    {
        debug_assert!(body_a.id().raw() < body_b.id().raw());
        let pair = BodyPair::new(body_a.id(), body_b.id());
        let read = self.read_cache();
        let write = self.write_cache();

        let inv_rotation_a = body_a.rotation.conjugate();
        let delta_position = inv_rotation_a * (body_b.position - body_a.position);
        let delta_rotation = (inv_rotation_a * body_b.rotation).normalize();

        // Fast path: relative pose within tolerance, replay the cached manifolds.
        if let Some(cached_pair) = read.pair_entry(&pair) {
            let position_close = (delta_position - cached_pair.delta_position).length_squared()
                <= settings.body_pair_cache_max_delta_position_sq;
            let rotation_close = delta_rotation.dot(cached_pair.delta_rotation).abs()
                >= settings.body_pair_cache_cos_max_delta_rotation;
            if position_close && rotation_close {
                return self.replay_pair(listener, body_a, body_b, pair, &cached_pair);
            }
        }

        // Slow path: run narrowphase and rebuild the cache entry.
        let manifolds = collide();
        let mut warmed = Vec::with_capacity(manifolds.len());
        let mut manifold_keys = Vec::with_capacity(manifolds.len());
        let mut accept_all = false;

        for manifold in manifolds {
            if manifold.points.is_empty() {
                continue;
            }

            if !accept_all {
                if let Some(listener) = listener {
                    let offset = manifold.points[0].on_b;
                    match listener.on_contact_validate(body_a.id(), body_b.id(), offset) {
                        ValidateResult::AcceptAllContactsForThisBodyPair => accept_all = true,
                        ValidateResult::AcceptContact => {}
                        ValidateResult::RejectContact => continue,
                        ValidateResult::RejectAllContactsForThisBodyPair => break,
                    }
                }
            }

            let key = ManifoldKey {
                pair,
                sub_shape_a: manifold.sub_shape_id_a,
                sub_shape_b: manifold.sub_shape_id_b,
            };

            let cached = read.manifold(&key);
            let was_persisted = cached.is_some();
            let lambdas = inherit_lambdas(settings, body_a, body_b, &manifold, cached.as_ref());

            let mut contact_settings = default_contact_settings(body_a, body_b);
            if let Some(listener) = listener {
                if was_persisted {
                    listener.on_contact_persisted(body_a.id(), body_b.id(), &manifold, &mut contact_settings);
                } else {
                    listener.on_contact_added(body_a.id(), body_b.id(), &manifold, &mut contact_settings);
                }
            }

            let stored = CachedManifold {
                normal_local_b: body_b.rotation.conjugate() * manifold.normal,
                points: manifold
                    .points
                    .iter()
                    .zip(&lambdas)
                    .map(|(point, lambda)| CachedContactPoint {
                        local_a: inv_rotation_a * (point.on_a - body_a.position),
                        local_b: body_b.rotation.conjugate() * (point.on_b - body_b.position),
                        normal_lambda: lambda.0,
                        friction_lambda: lambda.1,
                    })
                    .collect(),
                ccd_contact: false,
            };
            if !write.try_insert_manifold(key, stored) {
                continue;
            }
            manifold_keys.push(key);
            warmed.push(WarmManifold { manifold, lambdas, settings: contact_settings, key });
        }

        if !manifold_keys.is_empty() {
            write.try_insert_pair(
                pair,
                BodyPairEntry { delta_position, delta_rotation, manifold_keys },
            );
        }
        warmed
    }

    /// Copies a pair's manifolds from the read cache into the write cache,
    /// reconstructing world-space data from the current body poses.
    fn replay_pair(
        &self,
        listener: Option<&dyn ContactListener>,
        body_a: &Body,
        body_b: &Body,
        pair: BodyPair,
        cached_pair: &BodyPairEntry,
    ) -> Vec<WarmManifold> {
        let read = self.read_cache();
        let write = self.write_cache();
        let mut warmed = Vec::with_capacity(cached_pair.manifold_keys.len());

        for key in &cached_pair.manifold_keys {
            let Some(cached) = read.manifold(key) else { continue };
            let normal = body_b.rotation * cached.normal_local_b;
            let points: Vec<FaceContact> = cached
                .points
                .iter()
                .map(|point| {
                    let on_a = body_a.position + body_a.rotation * point.local_a;
                    let on_b = body_b.position + body_b.rotation * point.local_b;
                    FaceContact { on_a, on_b, penetration: (on_a - on_b).dot(normal) }
                })
                .collect();
            let lambdas: Vec<(f32, [f32; 2])> = cached
                .points
                .iter()
                .map(|point| (point.normal_lambda, point.friction_lambda))
                .collect();

            let manifold = Manifold {
                normal,
                points,
                sub_shape_id_a: key.sub_shape_a,
                sub_shape_id_b: key.sub_shape_b,
            };

            let mut contact_settings = default_contact_settings(body_a, body_b);
            if let Some(listener) = listener {
                listener.on_contact_persisted(body_a.id(), body_b.id(), &manifold, &mut contact_settings);
            }

            if !write.try_insert_manifold(*key, cached) {
                continue;
            }
            warmed.push(WarmManifold { manifold, lambdas, settings: contact_settings, key: *key });
        }

        if !warmed.is_empty() {
            write.try_insert_pair(pair, cached_pair.clone());
        }
        warmed
    }
}

impl ContactCache {
    /// Serializes the cache in sorted-key order: body pair entries first,
    /// then every manifold with its cached points and impulses.
    pub(crate) fn save_state(&self, recorder: &mut crate::state::StateRecorder) {
        let mut pair_keys: Vec<BodyPair> = Vec::with_capacity(self.num_pairs());
        for shard in &self.shards {
            pair_keys.extend(shard.lock().pairs.keys().copied());
        }
        pair_keys.sort_unstable();

        let mut count = pair_keys.len() as u32;
        recorder.sync_u32(&mut count);
        for pair in &pair_keys {
            let Some(mut entry) = self.pair_entry(pair) else { continue };
            let mut raw_a = pair.a.raw();
            let mut raw_b = pair.b.raw();
            recorder.sync_u32(&mut raw_a);
            recorder.sync_u32(&mut raw_b);
            recorder.sync_vec3(&mut entry.delta_position);
            recorder.sync_quat(&mut entry.delta_rotation);
            let mut key_count = entry.manifold_keys.len() as u32;
            recorder.sync_u32(&mut key_count);
            for key in &entry.manifold_keys {
                let mut sub_a = key.sub_shape_a.0;
                let mut sub_b = key.sub_shape_b.0;
                recorder.sync_u32(&mut sub_a);
                recorder.sync_u32(&mut sub_b);
            }
        }

        let keys = self.sorted_manifold_keys();
        let mut count = keys.len() as u32;
        recorder.sync_u32(&mut count);
        for key in &keys {
            let Some(mut manifold) = self.manifold(key) else { continue };
            let mut raw = [key.pair.a.raw(), key.pair.b.raw(), key.sub_shape_a.0, key.sub_shape_b.0];
            for value in &mut raw {
                recorder.sync_u32(value);
            }
            recorder.sync_vec3(&mut manifold.normal_local_b);
            recorder.sync_bool(&mut manifold.ccd_contact);
            let mut point_count = manifold.points.len() as u32;
            recorder.sync_u32(&mut point_count);
            for point in &mut manifold.points {
                recorder.sync_vec3(&mut point.local_a);
                recorder.sync_vec3(&mut point.local_b);
                recorder.sync_f32(&mut point.normal_lambda);
                recorder.sync_f32(&mut point.friction_lambda[0]);
                recorder.sync_f32(&mut point.friction_lambda[1]);
            }
        }
    }

    /// Rebuilds the cache from a stream produced by [`Self::save_state`].
    pub(crate) fn restore_state(&self, recorder: &mut crate::state::StateRecorder) {
        self.clear(MIN_CACHE_BUCKETS);

        let mut pair_count = 0u32;
        recorder.sync_u32(&mut pair_count);
        for _ in 0..pair_count {
            let mut raw_a = 0u32;
            let mut raw_b = 0u32;
            recorder.sync_u32(&mut raw_a);
            recorder.sync_u32(&mut raw_b);
            let pair = BodyPair {
                a: crate::core::body::BodyId::from_raw(raw_a),
                b: crate::core::body::BodyId::from_raw(raw_b),
            };
            let mut entry = BodyPairEntry {
                delta_position: Vec3::ZERO,
                delta_rotation: Quat::IDENTITY,
                manifold_keys: Vec::new(),
            };
            recorder.sync_vec3(&mut entry.delta_position);
            recorder.sync_quat(&mut entry.delta_rotation);
            let mut key_count = 0u32;
            recorder.sync_u32(&mut key_count);
            for _ in 0..key_count {
                let mut sub_a = 0u32;
                let mut sub_b = 0u32;
                recorder.sync_u32(&mut sub_a);
                recorder.sync_u32(&mut sub_b);
                entry.manifold_keys.push(ManifoldKey {
                    pair,
                    sub_shape_a: SubShapeId(sub_a),
                    sub_shape_b: SubShapeId(sub_b),
                });
            }
            self.try_insert_pair(pair, entry);
        }

        let mut manifold_count = 0u32;
        recorder.sync_u32(&mut manifold_count);
        for _ in 0..manifold_count {
            let mut raw = [0u32; 4];
            for value in &mut raw {
                recorder.sync_u32(value);
            }
            let key = ManifoldKey {
                pair: BodyPair {
                    a: crate::core::body::BodyId::from_raw(raw[0]),
                    b: crate::core::body::BodyId::from_raw(raw[1]),
                },
                sub_shape_a: SubShapeId(raw[2]),
                sub_shape_b: SubShapeId(raw[3]),
            };
            let mut manifold = CachedManifold {
                normal_local_b: Vec3::ZERO,
                points: Vec::new(),
                ccd_contact: false,
            };
            recorder.sync_vec3(&mut manifold.normal_local_b);
            recorder.sync_bool(&mut manifold.ccd_contact);
            let mut point_count = 0u32;
            recorder.sync_u32(&mut point_count);
            for _ in 0..point_count {
                let mut point = CachedContactPoint {
                    local_a: Vec3::ZERO,
                    local_b: Vec3::ZERO,
                    normal_lambda: 0.0,
                    friction_lambda: [0.0, 0.0],
                };
                recorder.sync_vec3(&mut point.local_a);
                recorder.sync_vec3(&mut point.local_b);
                recorder.sync_f32(&mut point.normal_lambda);
                recorder.sync_f32(&mut point.friction_lambda[0]);
                recorder.sync_f32(&mut point.friction_lambda[1]);
                manifold.points.push(point);
            }
            self.try_insert_manifold(key, manifold);
        }
    }
}

impl ContactCacheSet {
    /// Streams the read cache (what the next step warm-starts from).
    pub(crate) fn sync_state(&mut self, recorder: &mut crate::state::StateRecorder) {
        if recorder.is_restoring() {
            self.read_cache().restore_state(recorder);
            self.last_manifold_count = self.read_cache().num_manifolds();
        } else {
            self.read_cache().save_state(recorder);
        }
    }

    /// Records a contact discovered by the CCD pass so that later steps fire
    /// the proper persisted/removed callbacks for it.
    pub fn record_ccd_contact(&self, body_a: &Body, body_b: &Body, manifold: &Manifold) {
        let pair = BodyPair::new(body_a.id(), body_b.id());
        let key = ManifoldKey {
            pair,
            sub_shape_a: manifold.sub_shape_id_a,
            sub_shape_b: manifold.sub_shape_id_b,
        };
        let stored = CachedManifold {
            normal_local_b: body_b.rotation.conjugate() * manifold.normal,
            points: manifold
                .points
                .iter()
                .map(|point| CachedContactPoint {
                    local_a: body_a.rotation.conjugate() * (point.on_a - body_a.position),
                    local_b: body_b.rotation.conjugate() * (point.on_b - body_b.position),
                    normal_lambda: 0.0,
                    friction_lambda: [0.0, 0.0],
                })
                .collect(),
            ccd_contact: true,
        };
        self.write_cache().try_insert_manifold(key, stored);
    }
}

fn default_contact_settings(body_a: &Body, body_b: &Body) -> ContactSettings {
    ContactSettings {
        combined_friction: (body_a.friction * body_b.friction).sqrt(),
        combined_restitution: body_a.restitution.max(body_b.restitution),
        is_sensor: false,
    }
}

/// For each fresh contact point, searches the cached manifold for a point
/// within the preserve distance and inherits its accumulated impulses.
fn inherit_lambdas(
    settings: &PhysicsSettings,
    _body_a: &Body,
    body_b: &Body,
    manifold: &Manifold,
    cached: Option<&CachedManifold>,
) -> Vec<(f32, [f32; 2])> {
    let Some(cached) = cached else {
        return vec![(0.0, [0.0, 0.0]); manifold.points.len()];
    };
    let inv_rotation_b = body_b.rotation.conjugate();
    manifold
        .points
        .iter()
        .map(|point| {
            let local_b = inv_rotation_b * (point.on_b - body_b.position);
            let mut best: Option<(f32, &CachedContactPoint)> = None;
            for cached_point in &cached.points {
                let dist_sq = (cached_point.local_b - local_b).length_squared();
                if dist_sq <= settings.contact_point_preserve_lambda_max_dist_sq
                    && best.map(|(d, _)| dist_sq < d).unwrap_or(true)
                {
                    best = Some((dist_sq, cached_point));
                }
            }
            match best {
                Some((_, cached_point)) => (cached_point.normal_lambda, cached_point.friction_lambda),
                None => (0.0, [0.0, 0.0]),
            }
        })
        .collect()
}
