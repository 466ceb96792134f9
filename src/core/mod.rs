//! Core types: bodies, the body store and lock manager, layers, and shared
//! math data.

pub mod body;
pub mod body_lock;
pub mod body_store;
pub mod layers;
pub mod types;

pub use body::{Body, BodyCreationSettings, BodyId, MotionProperties, MotionQuality, MotionType};
pub use body_lock::{BodyLockManager, BodyLockPairWrite, BodyLockRead, BodyLockWrite};
pub use body_store::BodyStore;
pub use layers::{
    BroadPhaseLayer, BroadPhaseLayerInterface, MaskObjectLayerPairFilter, ObjectLayer,
    ObjectLayerPairFilter, ObjectVsBroadPhaseLayerFilter, SingleBroadPhaseLayer,
};
pub use types::{Aabb, MassProperties};
