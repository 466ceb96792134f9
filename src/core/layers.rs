//! Two-level collision filtering: object layers assigned per body, and a
//! smaller set of broadphase layers that group object layers into trees.

use serde::{Deserialize, Serialize};

/// Application-defined collision layer tag carried by every body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct ObjectLayer(pub u16);

/// Layer within the broadphase; each broadphase layer owns one quadtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct BroadPhaseLayer(pub u8);

/// Maps object layers onto broadphase layers. Must be pure and thread-safe.
pub trait BroadPhaseLayerInterface: Send + Sync {
    fn num_broad_phase_layers(&self) -> u32;
    fn broad_phase_layer(&self, layer: ObjectLayer) -> BroadPhaseLayer;
}

/// Filters an object layer against a broadphase layer during tree selection.
pub trait ObjectVsBroadPhaseLayerFilter: Send + Sync {
    fn should_collide(&self, layer: ObjectLayer, broad_phase_layer: BroadPhaseLayer) -> bool;
}

/// Filters two object layers against each other. Must be symmetric.
pub trait ObjectLayerPairFilter: Send + Sync {
    fn should_collide(&self, layer_a: ObjectLayer, layer_b: ObjectLayer) -> bool;
}

/// Single-tree mapping where every object layer collides with everything.
/// Convenient for tests and small scenes.
#[derive(Debug, Default)]
pub struct SingleBroadPhaseLayer;

impl BroadPhaseLayerInterface for SingleBroadPhaseLayer {
    fn num_broad_phase_layers(&self) -> u32 {
        1
    }

    fn broad_phase_layer(&self, _layer: ObjectLayer) -> BroadPhaseLayer {
        BroadPhaseLayer(0)
    }
}

impl ObjectVsBroadPhaseLayerFilter for SingleBroadPhaseLayer {
    fn should_collide(&self, _layer: ObjectLayer, _broad_phase_layer: BroadPhaseLayer) -> bool {
        true
    }
}

impl ObjectLayerPairFilter for SingleBroadPhaseLayer {
    fn should_collide(&self, _layer_a: ObjectLayer, _layer_b: ObjectLayer) -> bool {
        true
    }
}

/// Mask-based pair filter: two layers collide when each appears in the other's
/// mask. Layer numbers above 31 share the top mask bit.
#[derive(Debug, Clone)]
pub struct MaskObjectLayerPairFilter {
    pub masks: Vec<u32>,
}

impl MaskObjectLayerPairFilter {
    pub fn new(masks: Vec<u32>) -> Self {
        Self { masks }
    }

    fn bit(layer: ObjectLayer) -> u32 {
        1u32 << (layer.0 as u32).min(31)
    }
}

impl ObjectLayerPairFilter for MaskObjectLayerPairFilter {
    fn should_collide(&self, layer_a: ObjectLayer, layer_b: ObjectLayer) -> bool {
        let mask_a = self.masks.get(layer_a.0 as usize).copied().unwrap_or(u32::MAX);
        let mask_b = self.masks.get(layer_b.0 as usize).copied().unwrap_or(u32::MAX);
        mask_a & Self::bit(layer_b) != 0 && mask_b & Self::bit(layer_a) != 0
    }
}
